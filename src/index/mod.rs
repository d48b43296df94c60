//! Secondary indexes.
//!
//! Every index of a record type lives in its own table, named from the
//! type id and the index name. Statement builders in this module are pure;
//! [`SecondaryIndexStore`] executes them.

pub(crate) mod binding;
pub mod cursor;
pub mod ddl;
pub mod hooks;
pub mod naming;
pub mod query;
pub mod store;

use crate::key::Key;
use crate::schema::{IndexDefinition, Schema};

pub use cursor::{decode_token, encode_token};
pub use naming::{IndexNaming, IndexTableNames};
pub use query::{
    compile_full_scan_query, compile_index_query, CompiledQuery, IndexQuery, QueryOperator,
    QueryTerm, TermValue,
};
pub use store::{IndexedType, SecondaryIndexStore};

/// One index of one record type, with its physical names resolved.
#[derive(Debug, Clone, Copy)]
pub struct IndexTarget<'a> {
    pub type_name: &'a str,
    pub schema: &'a Schema,
    pub index: &'a IndexDefinition,
    pub names: &'a IndexTableNames,
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexPage {
    pub keys: Vec<Key>,
    /// Token of the following page, present when more rows exist.
    pub next_token: Option<String>,
}

impl IndexPage {
    /// Build a page from fetched ids, dropping the sentinel row past
    /// `page_size` and issuing the token of the following page.
    pub(crate) fn from_ids(
        type_name: &str,
        mut ids: Vec<u64>,
        offset: u64,
        page_size: Option<u64>,
    ) -> Self {
        let next_token = match page_size {
            Some(size) if ids.len() as u64 > size => {
                ids.truncate(size as usize);
                Some(encode_token(offset.saturating_add(size)))
            }
            _ => None,
        };

        Self {
            keys: ids.into_iter().map(|id| Key::new(type_name, id)).collect(),
            next_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_drops_sentinel_row() {
        let page = IndexPage::from_ids("user", vec![4, 5, 6], 10, Some(2));
        assert_eq!(page.keys, vec![Key::new("user", 4), Key::new("user", 5)]);
        assert_eq!(page.next_token, Some(encode_token(12)));
    }

    #[test]
    fn test_last_page_has_no_token() {
        let page = IndexPage::from_ids("user", vec![4, 5], 0, Some(2));
        assert_eq!(page.keys.len(), 2);
        assert_eq!(page.next_token, None);

        let unbounded = IndexPage::from_ids("user", vec![1, 2, 3], 0, None);
        assert_eq!(unbounded.keys.len(), 3);
        assert_eq!(unbounded.next_token, None);
    }
}
