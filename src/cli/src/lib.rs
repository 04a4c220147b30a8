//! A3S Catalog CLI - manage locally cached operator catalogs.

pub mod commands;
pub mod output;
pub mod progress;
