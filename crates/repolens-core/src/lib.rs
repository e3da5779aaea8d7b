//! Core types, configuration, and error handling for repolens.
//!
//! This crate provides the shared foundation used by all other repolens crates:
//! - [`RepolensError`] — unified error type using `thiserror`, with a
//!   caller-facing [`ErrorKind`]
//! - [`RepolensConfig`] — configuration loaded from `.repolens.toml`
//! - Shared types: [`RepositoryKey`], [`FileRef`], [`Finding`], [`Review`],
//!   [`Severity`], [`Category`], [`DerivedArtifact`], [`OutputFormat`]

mod config;
mod error;
mod review;
mod types;

pub use config::{GitHubConfig, LlmConfig, RepolensConfig, ReviewConfig};
pub use error::{ErrorKind, RepolensError};
pub use review::{
    sort_findings, ArtifactKind, DerivedArtifact, Finding, Location, Review, ReviewId,
    ReviewStatus,
};
pub use types::{normalize_path, Category, FileRef, OutputFormat, RepositoryKey, Severity};

/// A convenience `Result` type for repolens operations.
pub type Result<T> = std::result::Result<T, RepolensError>;
