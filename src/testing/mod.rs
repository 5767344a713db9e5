//! Test support
//!
//! [`SimulatedDatabase`] is an in-process stand-in for an openGauss instance
//! with the hypopg extension. It keeps table statistics and physical indexes,
//! accepts hypothetical indexes per batch and answers `EXPLAIN` with a small
//! deterministic cost model, which is enough to exercise the advisor end to end.

pub mod simulated;

pub use simulated::SimulatedDatabase;
