//! CLI subcommands.

pub mod common;
pub mod download;
pub mod export;
