//! Integration tests for building and executing chains.

mod common;

mod concurrency_tests;
mod scenario_tests;
