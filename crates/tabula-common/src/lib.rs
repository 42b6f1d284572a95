//! Tabula Common - Shared types and utilities
//!
//! This crate provides the entity model, error taxonomy and configuration
//! shared by the storage engine and its tooling.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ClusterError, Error, Result, TimeoutKind};
pub use types::*;
