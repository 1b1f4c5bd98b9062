//! SDMX Collector Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the SDMX collector workspace.
//!
//! # Overview
//!
//! - **Error Handling**: common error and result types
//! - **Checksums**: content hashing over ordered record sequences
//! - **Identifiers**: deterministic table/source identifiers
//! - **Logging**: `tracing` subscriber setup driven by the environment
//!
//! # Example
//!
//! ```no_run
//! use sdmx_common::ident::table_name;
//!
//! assert_eq!(table_name("INSEE", "CHOMAGE-TRIM-NATIONAL"), "insee_chomage_trim_national");
//! ```

pub mod checksum;
pub mod error;
pub mod ident;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
