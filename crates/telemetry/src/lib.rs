//! Internal telemetry for the trellis broker.
//!
//! The broker is an in-process library, so metrics stay in-process too:
//! atomic counters and histograms with a snapshot type the embedding
//! application can export however it likes.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::*;
pub use tracing_setup::*;
