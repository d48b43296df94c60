//! Type and identifier authority.
//!
//! Assigns each record type a small integer id, which namespaces every
//! physical index identifier, and hands out record ids per type.

mod memory;
mod sql;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemorySequenceService;
pub use sql::SqlSequenceService;

/// Interface for type id and record id allocation.
///
/// Type ids start at 1 and are never reused. Record ids start at 1 for
/// each type.
///
/// Implementations:
/// - `MemorySequenceService`: process-local, for tests and embedding
/// - `SqlSequenceService`: persisted in the `_key_types` table
#[async_trait]
pub trait SequenceService: Send + Sync {
    /// Look up the id of a type, registering it first when `create` is set.
    ///
    /// Returns `None` for an unregistered type when `create` is false.
    async fn type_id(&self, type_name: &str, create: bool) -> Result<Option<u32>>;

    /// Allocate the next record id of a registered type.
    async fn next_id(&self, type_name: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    pub(super) async fn exercise(sequence: &dyn SequenceService) {
        assert_eq!(sequence.type_id("user", false).await.unwrap(), None);
        assert!(matches!(
            sequence.next_id("user").await,
            Err(StoreError::UnknownType(_))
        ));

        assert_eq!(sequence.type_id("user", true).await.unwrap(), Some(1));
        assert_eq!(sequence.type_id("order", true).await.unwrap(), Some(2));
        assert_eq!(sequence.type_id("user", true).await.unwrap(), Some(1));
        assert_eq!(sequence.type_id("user", false).await.unwrap(), Some(1));

        assert_eq!(sequence.next_id("user").await.unwrap(), 1);
        assert_eq!(sequence.next_id("user").await.unwrap(), 2);
        assert_eq!(sequence.next_id("order").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_sequence() {
        exercise(&MemorySequenceService::new()).await;
    }
}
