//! `serde` support for the wire message types, gated behind `use-serde` the
//! same way the host gates its own `Message` variants.

pub mod transaction;
