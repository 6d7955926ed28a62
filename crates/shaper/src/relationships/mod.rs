//! Relationship Model
//!
//! Entity types, their keys and navigations, as seen by the query-shape
//! compiler. The model is built once and shared read-only.

pub mod collection;
pub mod metadata;
pub mod registry;

pub use collection::{CollectionConstructor, CollectionKind, DeclaredCollectionType};
pub use metadata::{EntityType, ForeignKeyConfig, Navigation, PivotConfig, RelationshipType};
pub use registry::RelationshipModel;
