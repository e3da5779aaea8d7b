//! MCP (Model Context Protocol) server for repolens.
//!
//! Exposes repository reviews and everything derived from them as tools
//! that LLM agents can call. The server runs on stdio and keeps every review
//! in memory for the lifetime of the process.

pub mod server;
pub mod tools;
