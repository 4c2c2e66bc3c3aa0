//! Library integration tests: packages built end to end through the engine.

mod common;

mod package_tests;
mod texture_tests;
