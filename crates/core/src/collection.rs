//! A test document defines API definitions, test cases, and test suites
//! that make resolved test runs possible

mod cereal;
mod models;

pub use models::*;
