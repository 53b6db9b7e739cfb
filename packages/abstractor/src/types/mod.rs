//! Data types owned by the extraction controller.

pub mod config;
pub mod error_detail;
pub mod job;
pub mod log;
pub mod result;
pub mod state;

pub use config::{format_interval, ControllerConfig};
pub use error_detail::{ErrorCode, ErrorDetail, RelatedLink};
pub use job::{initial_steps, Job, JobStatus, Step, StepId, StepStatus};
pub use log::{
    export_logs, log_export_filename, LogEntry, LogLevel, CONNECTION_LOG_STEP, PIPELINE_LOG_STEP,
};
pub use result::{ArtifactRef, ExtractionResult};
pub use state::{ControllerState, Phase, Resolution};
