// harden/src/commands/mod.rs
pub mod install;
