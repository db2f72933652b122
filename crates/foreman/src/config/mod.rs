//! Procfile configuration parsing and validation

mod procfile;

pub use procfile::*;
