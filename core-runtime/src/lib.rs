//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the upload pipeline:
//! - Logging and tracing infrastructure
//! - Ingestion configuration
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the pipeline crates depend on.
//! It establishes the logging conventions, configuration validation and event
//! broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{IngestionConfig, IngestionConfigBuilder};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
