//! Complaint priority classification.
//!
//! Fuses an issue type, a free-text description and an attachment count into
//! one feature row, trains a random forest with cross-validated
//! hyperparameter search, and serves predictions from a versioned artifact
//! bundle.

pub mod config;
pub mod dataset;
pub mod error;
pub mod interactive;
pub mod ml;
pub mod models;

pub use config::Config;
pub use error::{AppError, Result};
pub use ml::{InferencePipeline, PipelineHandle, PriorityService, Trainer};
pub use models::{ComplaintRecord, InferenceRequest, Priority};
