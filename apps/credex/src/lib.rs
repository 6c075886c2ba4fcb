//! # credex
//!
//! The Credex binary's library half: the HTTP request layer, the clap CLI
//! and the TOML configuration they share. Exposed as a library so the
//! integration tests can drive the router directly.

pub mod api;
pub mod cli;
pub mod config;
