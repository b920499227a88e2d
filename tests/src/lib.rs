//! Shared helpers for the trellis integration tests.
