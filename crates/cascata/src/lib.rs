#![forbid(unsafe_code)]

//! Umbrella crate for the cascata workspace. Re-exports the member crates
//! so a single dependency gives the whole engine: the dimension registry,
//! the predicate layer with its preset wire format, the natural-language
//! renderer, and the cascade resolver.

pub use cf_cascade as cascade;
pub use cf_graph as graph;
pub use cf_predicate as predicate;
pub use cf_registry as registry;
pub use cf_render as render;
pub use cf_types as types;

pub use cf_cascade::{
    CanonicalKey, CascadeConfig, CascadeEvent, LookupRequest, MetadataSnapshot, OptionMode,
    ResolvedOptionSet, ResolverOutcome, ResolverSession, Selection,
};
pub use cf_graph::CascadeGraph;
pub use cf_predicate::{Clause, FilterExpression, ValidationError};
pub use cf_registry::{DimensionId, DimensionRegistry, Operator};
pub use cf_render::{render, render_compact};
pub use cf_types::{ClauseValue, DataType, OptionItem, Scalar};
