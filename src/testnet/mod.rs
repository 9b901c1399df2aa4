//! Test helpers for in-process nodes
//!
//! Builds throwaway nodes over in-memory storage with easy chain parameters so
//! unit tests can mine and transact without touching disk.

pub mod test_utils;

pub use test_utils::*;
