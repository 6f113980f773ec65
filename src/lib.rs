pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::AppConfig;
pub use core::orchestrator::{OrchestratorStatus, PipelineOrchestrator};
pub use domain::model::{PipelineRun, RunOutcome};
pub use utils::error::{ReportError, Result};
