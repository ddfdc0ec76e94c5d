//! Shared helpers

pub mod rate_limit;
