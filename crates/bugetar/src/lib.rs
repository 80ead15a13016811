//! Bugetar CLI tools.
//!
//! This crate provides command-line tools over the aggregation engine:
//!
//! - `bugetar-aggregate`: Explain, key or run an aggregate request
//!
//! # Example Usage
//!
//! ```bash
//! bugetar-aggregate explain request.json
//! bugetar-aggregate key request.json
//! bugetar-aggregate run request.json --dataset dataset.json --format csv
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cmd;
pub mod output;
