//! Test modules for the scanner crate

mod runtime_tests;
mod store_tests;
