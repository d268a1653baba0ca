//! Integration test crate for the Strata layer stack.
//!
//! This crate has no library code. It only contains integration tests that
//! compose layers from several workspace crates into real stacks.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p strata-integration-tests
//! ```
