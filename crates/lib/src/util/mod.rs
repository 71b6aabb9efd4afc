//! Shared utilities: content hashing and test fixtures.

pub mod hash;

#[cfg(test)]
pub mod testutil;
