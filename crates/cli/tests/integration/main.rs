//! CLI integration tests.

mod common;

mod build_tests;
mod cat_tests;
mod gc_tests;
