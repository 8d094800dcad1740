//! Vector metadata
//!
//! The declarative render specification: crop, layout grid, serial-number
//! series, and watermark overlays. Parsed once into typed values, validated
//! once, and integrity-protected by a keyed MAC for the lifetime of a job.

mod color;
mod mac;
mod types;
mod validate;

pub use color::{Color, BLACK};
pub use mac::{canonical_json, compute_mac, verify_mac, MacError};
pub use types::*;
pub use validate::{validate, validate_for_enqueue, ValidationErrors};
