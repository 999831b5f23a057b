//! Thumbnail and preview generation.
//!
//! [`ArtifactGenerator`] does the per-video work, [`RunRegistry`] tracks one
//! batch run per artifact kind, and [`GenerationService`] ties both to owned
//! background tasks.

mod error;
mod generator;
mod run;
mod service;

pub use error::{GenerationError, GenerationResult};
pub use generator::{
    ArtifactGenerator, ArtifactOrigin, ArtifactOutcome, GenerationSettings,
};
pub use run::{GenerationProgress, RunRegistry, RunTicket};
pub use service::GenerationService;
