//! Topology model.
//!
//! A [`Lab`] owns its devices ([`Machine`]) and links ([`Link`]); devices
//! refer to links by name through their [`Interface`] list. Runtime handles
//! are assigned by the container management layer once the matching
//! runtime object exists.

use serde_json::Value;

pub mod lab;
pub mod link;
pub mod machine;

pub use lab::{generate_urlsafe_hash, Lab, PRIVILEGED_MACHINES};
pub use link::Link;
pub use machine::{Interface, Machine, PortMapping};

/// Loose boolean reading of a metadata value (`true`, `"true"`, `"yes"`, `1`).
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "on"),
        _ => false,
    }
}
