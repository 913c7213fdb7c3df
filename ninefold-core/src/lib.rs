//! Ninefold Core Module
//!
//! This module contains the shared vocabulary of the Ninefold gateway:
//! - Closed worker/domain/tier identifiers
//! - Query analysis and routing types
//! - The error taxonomy
//! - Configuration loading

pub mod catalogue;
pub mod config;
pub mod error;
pub mod types;

pub use catalogue::{Catalogue, default_catalogue};
pub use config::NinefoldConfig;
pub use error::{Error, WorkerErrorKind};
pub type Result<T> = std::result::Result<T, Error>;

/// Version of the Ninefold protocol
pub const PROTOCOL_VERSION: &str = "0.1.0";
