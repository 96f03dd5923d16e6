//! Requirement-to-document merge engine for LCA process data sets.
//!
//! A [`RequirementBundle`] is resolved per document into an ordered list of
//! field updates, which a [`DocumentUpdater`] writes into the JSON tree. Every
//! decision that needs a human is recorded in the run's [`AuditLog`].

pub mod audit;
pub mod catalog;
pub mod multilang;
pub mod normalize;
pub mod path;
pub mod reference;
pub mod requirement;
pub mod resolve;
pub mod translation;
pub mod tree;
pub mod updater;

pub use audit::{AuditEntry, AuditError, AuditLog, Decision, DocumentAudit};
pub use catalog::{CatalogError, EnumTable, FieldCatalog, FieldSpec, ValueKind};
pub use path::{PathError, PathSegment, SchemaPath};
pub use reference::{
    GlobalReference, LookupError, NoRecords, RecordSource, ReferenceDescriptor, ReferenceKind,
    ReferenceResolver, SourceRecord,
};
pub use requirement::{
    BundleError, ExchangeUpdate, FieldUpdate, FieldValue, MatchKind, NameRule, RequirementBundle,
    RuleSet,
};
pub use resolve::{Resolution, ResolutionPath};
pub use translation::{LabelTable, TranslationError, TranslationIndex};
pub use updater::DocumentUpdater;
