//! Application services: the document pipeline and its collaborators.

pub mod conformance;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod render;
pub mod transform;
