//! Operation sets published by the toolbridge server binaries.
//!
//! - **calculator**: arithmetic over two floats
//! - **employee**: employee records in SQLite
//! - **serve**: shared stdio server plumbing for the binaries

pub mod calculator;
pub mod employee;
pub mod serve;
