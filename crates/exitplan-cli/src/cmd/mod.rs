//! Subcommands

pub mod serve;
