//! Module: relation
//! Responsibility: cross-document references (marker decoding, batched
//! hydration, delete policies and reference validation).
//! Does not own: relationship declarations (see `registry`).
//! Boundary: reads and writes go through an adapter handed in by the session.

pub(crate) mod hydrate;
pub(crate) mod integrity;
pub(crate) mod marker;

// re-exports
pub use integrity::{
    DeletePolicy, DeleteReport, IntegrityViolation, ReferenceState, ReferenceStatus, Referrer,
};
pub use marker::Marker;
