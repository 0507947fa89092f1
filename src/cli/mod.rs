//! The delsync command line.

pub mod args;
pub mod commands;
pub mod report;
