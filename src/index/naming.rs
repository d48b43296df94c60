//! Physical identifiers of index tables.
//!
//! Names are pure functions of (type id, index name), so every process that
//! agrees on the type id computes the same names without coordination.

use xxhash_rust::xxh3::xxh3_64;

/// Table and index object names of one secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTableNames {
    pub table: String,
    pub index: String,
}

/// Derives index table names under a configurable prefix.
#[derive(Debug, Clone, Default)]
pub struct IndexNaming {
    prefix: String,
}

impl IndexNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>_i_<type id:04>__<hash:016x>`
    pub fn table_name(&self, type_id: u32, index_name: &str) -> String {
        format!(
            "{}_i_{}",
            self.prefix,
            unique_index_identifier(type_id, index_name)
        )
    }

    /// `<prefix>_idx_<type id:04>__<hash:016x>`
    pub fn index_name(&self, type_id: u32, index_name: &str) -> String {
        format!(
            "{}_idx_{}",
            self.prefix,
            unique_index_identifier(type_id, index_name)
        )
    }

    pub fn names(&self, type_id: u32, index_name: &str) -> IndexTableNames {
        IndexTableNames {
            table: self.table_name(type_id, index_name),
            index: self.index_name(type_id, index_name),
        }
    }
}

/// Fixed 64-bit hash of an index name.
pub fn index_hash(index_name: &str) -> u64 {
    xxh3_64(index_name.as_bytes())
}

/// Column holding the values of an attribute.
pub fn column_name(attribute_name: &str) -> String {
    format!("_{attribute_name}")
}

fn unique_index_identifier(type_id: u32, index_name: &str) -> String {
    format!("{type_id:04}__{:016x}", index_hash(index_name))
}
