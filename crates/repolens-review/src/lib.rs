//! Review orchestration and derivation for repolens.
//!
//! Provides the collaborator traits ([`fetcher`]) and their GitHub and LLM
//! adapters, the in-memory [`store`], the [`coordinator`] that turns a
//! fetched snapshot into a stored review, the stale-review [`watchdog`], and
//! the [`derive`] engine that builds artifacts from completed reviews.

pub mod analyzer;
pub mod coordinator;
pub mod derive;
pub mod fetcher;
pub mod github;
pub mod llm;
pub mod prompt;
pub mod snapshot;
pub mod store;
pub mod watchdog;

#[cfg(test)]
mod test_support;
