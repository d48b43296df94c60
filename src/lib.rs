//! kvdex - embedded key-value store with typed secondary indexes.
//!
//! Records are JSON objects addressed by a [`Key`] (type name plus 64-bit
//! id). A published [`Schema`] declares typed attributes and secondary
//! indexes; each index lives in its own SQL table, kept in step with the
//! primary record inside the same transaction and queried with compiled,
//! paginated statements.

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod key;
pub mod keyvalue;
pub mod schema;
pub mod sequence;
pub mod storage;
pub mod utils;

pub use codec::{DerivedKeyCache, KeyCodec};
pub use error::{Result, StoreError};
pub use index::{IndexPage, IndexQuery, QueryOperator, QueryTerm, SecondaryIndexStore};
pub use key::Key;
pub use keyvalue::KeyValueStore;
pub use schema::{
    Attribute, AttributeTransform, AttributeType, FieldValue, IndexAttribute, IndexDefinition,
    Schema, SortDirection,
};
pub use sequence::{MemorySequenceService, SequenceService};
