//! Shared helpers for siltdb benchmarks.

#![warn(missing_docs)]

/// Deterministic pseudo-random payload of the given size.
#[must_use]
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}
