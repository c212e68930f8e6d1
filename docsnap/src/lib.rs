//! Single-frame document capture and text extraction.
//!
//! A [`pipeline::Orchestrator`] takes one photo through a
//! [`camera::CaptureSessionController`], normalizes it, and hands it to a
//! cloud vision model or an on-device recognizer chosen per run.

pub mod camera;
pub mod config;
pub mod credentials;
pub mod error;
pub mod extraction;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod telemetry;

pub use error::{PipelineError, Result};
