pub mod delivery;
pub mod extract;
pub mod freshness;
pub mod mailer;
pub mod orchestrator;
pub mod query_client;
pub mod recipients;
pub mod retry;
pub mod routing;
pub mod transformer;
pub mod workbook;

pub use crate::domain::model::{PipelineRun, ReportBundle, RunOutcome};
pub use crate::utils::error::Result;
