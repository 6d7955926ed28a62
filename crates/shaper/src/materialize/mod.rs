//! Materializer and identity map
//!
//! Turns the row streams of an executed plan set into one object graph in
//! which every entity identity has exactly one instance. Entities live in an
//! arena ([`EntityGraph`]) and reference each other by [`EntityId`], so cyclic
//! graphs (a dependent pointing back at its principal) need no shared
//! ownership.

pub mod graph;
pub mod identity;
pub mod materializer;

pub use graph::{CollectionValue, EntityData, EntityGraph, ResultValue};
pub use identity::{EntityId, EntityIdentity, IdentityMap};
pub use materializer::{materialize_grouped, MaterializedResult, Materializer};
