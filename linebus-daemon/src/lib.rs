//! linebus daemon library
//!
//! This module re-exports the daemon's modules for integration testing.

pub mod app;
pub mod cli;
pub mod config;
