// harden/src/lib.rs
//! # Harden CLI Application
//!
//! Command-line front end of the hardening orchestration engine in
//! `harden-core`: argument parsing, logging setup, the installation pipeline
//! and console output.

pub mod cli;
pub mod commands;
pub mod logger;
pub mod ui;

pub use commands::install::{run_install, InstallOptions, InstallOutcome};
