//! Core test-definition resolution for httpcase, agnostic of the front end.
//! This crate takes raw test documents (APIs, test cases, test suites) and
//! produces fully-resolved test-case trees ready for an HTTP runner. File
//! loading, HTTP execution, and reporting all live elsewhere.
//!
//! **This crate is not semver compliant**. The version is locked to the root
//! `httpcase` crate version. If you choose to depend directly on this crate,
//! you do so at your own risk of breakage.

pub mod collection;
mod error;
pub mod merge;
pub mod parameters;
mod parse;

pub use error::ParseError;
pub use parse::{parse_tests, parse_tests_with_options};
