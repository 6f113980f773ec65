use clap::Parser;
use team_report_mailer::domain::model::{PipelineRun, RecipientStatus, RunOutcome};
use team_report_mailer::utils::{logger, validation::Validate};
use team_report_mailer::{AppConfig, CliConfig, PipelineOrchestrator, ReportError};

const EXIT_INTERRUPTED: i32 = 130;

fn fail(error: &ReportError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        error,
        error.category(),
        error.severity()
    );
    eprintln!("❌ {}", error.user_friendly_message());
    eprintln!("💡 Suggestion: {}", error.recovery_suggestion());
    std::process::exit(1);
}

fn print_summary(run: &PipelineRun) {
    println!();
    println!("===== {} =====", run.run_id);
    println!(
        "Mode:        {}",
        if run.validate_only { "validation" } else { "delivery" }
    );
    if let Some(freshness) = &run.freshness {
        println!("Freshness:   {}", freshness.message);
    }
    match &run.outcome {
        RunOutcome::Completed => println!("Outcome:     completed"),
        RunOutcome::EarlyExit { reason } => println!("Outcome:     stopped early ({})", reason),
        RunOutcome::Failed { error } => println!("Outcome:     failed ({})", error),
    }
    println!("Duration:    {:.1}s", run.duration.as_secs_f64());
    println!(
        "Recipients:  {} total, {} ok, {} failed ({:.1}% success)",
        run.total_recipients,
        run.successful,
        run.failed,
        run.success_rate()
    );
    println!(
        "Records:     {} total, {} settled, {} pending, amount {:.2}",
        run.statistics.total_records,
        run.statistics.total_settled,
        run.statistics.total_pending,
        run.statistics.total_amount
    );

    for outcome in run.outcomes() {
        if let RecipientStatus::Delivered(receipt) = &outcome.status {
            if receipt.attempts > 1 {
                println!(
                    "  ↻ team {} delivered after {} attempts",
                    outcome.recipient.team_code, receipt.attempts
                );
            }
        }
    }
    if !run.errors().is_empty() {
        println!("Errors:");
        for failure in run.errors() {
            println!(
                "  ✗ team {} {} <{}> at {}: {}",
                failure.team_code,
                failure.name,
                failure.address,
                failure.timestamp.format("%H:%M:%S"),
                failure.error
            );
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = CliConfig::parse();

    let config = match AppConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    if config.json_logs() {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::info!("Starting {} with {}", config.pipeline.name, cli.config);
    if cli.verbose {
        tracing::debug!("CLI options: {:?}", cli);
    }

    if let Err(e) = config.validate() {
        fail(&e);
    }

    let orchestrator = match PipelineOrchestrator::from_config(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => fail(&e),
    };
    tracing::debug!("Orchestrator status: {:?}", orchestrator.status());

    let teams = cli.team_filter();
    let run = orchestrator.run(teams.as_deref(), cli.validate);

    // Dropping the run future on interrupt removes any staged attachment.
    let finished = tokio::select! {
        run = run => Some(run),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(run) => {
            print_summary(&run);
            if !run.success() {
                std::process::exit(1);
            }
        }
        None => {
            tracing::warn!("🛑 Interrupted, abandoning the current run");
            eprintln!("🛑 Interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}
