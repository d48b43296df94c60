//! In-memory type authority.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SequenceService;
use crate::error::{Result, StoreError};

struct TypeEntry {
    type_id: u32,
    next_id: u64,
}

/// Sequence service that keeps every counter in process memory.
#[derive(Default)]
pub struct MemorySequenceService {
    types: RwLock<HashMap<String, TypeEntry>>,
}

impl MemorySequenceService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceService for MemorySequenceService {
    async fn type_id(&self, type_name: &str, create: bool) -> Result<Option<u32>> {
        if let Some(entry) = self.types.read().await.get(type_name) {
            return Ok(Some(entry.type_id));
        }
        if !create {
            return Ok(None);
        }

        let mut types = self.types.write().await;
        let next_type_id = types.len() as u32 + 1;
        let entry = types.entry(type_name.to_string()).or_insert(TypeEntry {
            type_id: next_type_id,
            next_id: 1,
        });
        Ok(Some(entry.type_id))
    }

    async fn next_id(&self, type_name: &str) -> Result<u64> {
        let mut types = self.types.write().await;
        let entry = types
            .get_mut(type_name)
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))?;
        let id = entry.next_id;
        entry.next_id += 1;
        Ok(id)
    }
}
