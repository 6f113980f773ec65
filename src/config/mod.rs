pub mod toml_config;

pub use toml_config::{AppConfig, ClientErrorPolicy, RoutingRule};

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "team-report-mailer")]
#[command(about = "Sends each team its order report, after checking the source was refreshed today")]
pub struct CliConfig {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/pipeline.toml")]
    pub config: String,

    /// Team codes to process (comma-separated); all teams when omitted
    #[arg(long, value_delimiter = ',')]
    pub teams: Vec<i64>,

    /// Run every stage except mail delivery
    #[arg(long)]
    pub validate: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn team_filter(&self) -> Option<Vec<i64>> {
        if self.teams.is_empty() {
            None
        } else {
            Some(self.teams.clone())
        }
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_teams_and_flags() {
        let cli = CliConfig::parse_from([
            "team-report-mailer",
            "--teams",
            "200,300",
            "--validate",
            "-v",
        ]);
        assert_eq!(cli.team_filter(), Some(vec![200, 300]));
        assert!(cli.validate);
        assert!(cli.verbose);
        assert_eq!(cli.config, "config/pipeline.toml");
    }

    #[test]
    fn test_no_teams_means_all() {
        let cli = CliConfig::parse_from(["team-report-mailer"]);
        assert_eq!(cli.team_filter(), None);
        assert!(!cli.validate);
    }
}
