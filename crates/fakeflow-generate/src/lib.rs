//! Concurrent synthetic-record generation engine for fakeflow.
//!
//! A [`fakeflow_schema::Config`] compiles into an immutable tree of nodes
//! ([`CompiledSchema`]). The [`GenerationEngine`] then drives a worker pool
//! over that tree and streams one JSON or CSV output per entity.

pub mod compile;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod external;
pub mod gate;
pub mod generators;
pub mod model;
pub mod output;
pub mod random;

pub use compile::{CompiledEntity, CompiledSchema};
pub use diagnostics::Diagnostics;
pub use engine::{GenerationEngine, PipelineState};
pub use errors::{ExternalSourceError, GenerationError, LeafError};
pub use external::ExternalSource;
pub use gate::EntityGate;
pub use generators::geometry::{Coordinates, Position, close_ring, convex_hull};
pub use generators::{GeneratedValue, GeneratorContext, Node, SharedFields};
pub use model::{DEFAULT_QUEUE_CAPACITY, EntityReport, GenerateOptions, GenerationReport};
pub use random::RandomSource;
