//! Integration test suite.
//!
//! 1. End-to-end workflows across registry, records and migrations
//! 2. Persistence and migration history replay

pub mod end_to_end_tests;
pub mod persistence_tests;
