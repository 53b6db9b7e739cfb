//! Extraction job controller for the article abstractor service.
//!
//! Tracks one remote job at a time from submission to slide-deck download:
//! validates input locally, submits it, follows progress over the server's
//! push feed and falls back to bounded polling when the feed drops, and
//! reconciles every snapshot into a step list and an append-only log.
//!
//! # Usage
//!
//! ```rust,ignore
//! use abstractor::{ExtractionController, ExtractionInput, Resolution};
//! use abstractor::testing::{MemorySink, MockGateway};
//!
//! let controller = ExtractionController::builder(MockGateway::new(), MemorySink::new()).build();
//! controller.start(ExtractionInput::url("https://jamanetwork.com/journals/jama/fullarticle/1")).await?;
//!
//! let state = controller.wait_until_resolved().await;
//! match state.resolution() {
//!     Resolution::Completed(result) => println!("{:?}", result.title()),
//!     Resolution::Failed(error) => println!("{}: {}", error.code, error.reason),
//!     _ => {}
//! }
//! ```
//!
//! # Modules
//!
//! - [`controller`] - The controller and its actions
//! - [`traits`] - Gateway, sink, clock and id seams
//! - [`types`] - Jobs, steps, logs, results and error details
//! - [`sinks`] - Filesystem artifact sink
//! - [`testing`] - Mock implementations for testing

pub mod controller;
pub mod error;
pub mod input;
mod reconcile;
pub mod sinks;
pub mod testing;
mod tracker;
pub mod traits;
pub mod types;

pub use controller::{ControllerBuilder, ExtractionController};
pub use error::{ControllerError, Result};
pub use input::ExtractionInput;
pub use sinks::DirectorySink;
pub use traits::{
    clock::{Clock, SystemClock},
    gateway::{JobGateway, ProgressFeed},
    ids::{IdGenerator, UuidIds},
    sink::ArtifactSink,
};
pub use types::{
    export_logs, ArtifactRef, ControllerConfig, ControllerState, ErrorCode, ErrorDetail,
    ExtractionResult, Job, JobStatus, LogEntry, LogLevel, Phase, RelatedLink, Resolution, Step,
    StepId, StepStatus,
};
