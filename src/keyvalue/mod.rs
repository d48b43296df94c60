//! Primary record store.
//!
//! Records are JSON objects kept in `_key_values`, one row per key. Every
//! mutation runs in a single transaction together with the index hooks of
//! the record's type, so a rejected index write rolls the primary write back.
//! The schema those hooks follow is read inside the same transaction, under
//! a lock that publishing and dropping schemas wait for.
//!
//! Deleted rows stay in the table flagged `Y`. Quarantined rows are flagged
//! `Q`; they drop out of default scans and index queries but remain readable
//! by key.
//!
//! Uses a macro to generate implementations for each SQL backend.

use std::collections::HashMap;
use std::sync::Arc;

use sea_query::{ColumnDef, Expr, Index, Query, SelectStatement, Table, TableCreateStatement};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::RwLock;

use crate::codec::KeyCodec;
use crate::config::IndexConfig;
use crate::error::{Result, StoreError};
use crate::index::{IndexQuery, SecondaryIndexStore, TermValue};
use crate::key::Key;
use crate::schema::{FieldValue, Schema, ID_ATTRIBUTE};
use crate::sequence::SequenceService;
use crate::storage::schema::{KeyTypes, KeyValues, Schemas, FLAG_NO, FLAG_QUARANTINED, FLAG_YES};
use crate::storage::SqlBackend;

const MAX_TYPE_NAME_LEN: usize = 255;

/// Keys per `IN (...)` list when fetching many records at once.
const MULTI_RETRIEVE_CHUNK: usize = 500;

/// JSON record store with schema-driven secondary indexes.
pub struct KeyValueStore<DB: SqlBackend> {
    pool: DB::Pool,
    sequence: Arc<dyn SequenceService>,
    index: SecondaryIndexStore<DB>,
    codec: KeyCodec,
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl<DB: SqlBackend> KeyValueStore<DB> {
    pub fn new(
        pool: DB::Pool,
        sequence: Arc<dyn SequenceService>,
        codec: KeyCodec,
        config: &IndexConfig,
    ) -> Self {
        let index = SecondaryIndexStore::new(pool.clone(), Arc::clone(&sequence), config);
        Self {
            pool,
            sequence,
            index,
            codec,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }

    pub fn index_store(&self) -> &SecondaryIndexStore<DB> {
        &self.index
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Opaque form of `key`, accepted anywhere the store takes key text.
    pub fn encode_key(&self, key: &Key) -> Result<String> {
        self.codec.encode(key)
    }

    /// Parse plain (`type:id`) or opaque (`@type:hex`) key text.
    pub fn decode_key(&self, text: &str) -> Result<Key> {
        self.codec.decode(text)
    }

    /// Decode key text and look up its type id. `None` when the type was
    /// never registered, in which case no record can exist.
    async fn resolve(&self, text: &str) -> Result<Option<(Key, u32)>> {
        let key = self.codec.decode(text)?;
        let type_id = self.sequence.type_id(key.type_name(), false).await?;
        Ok(type_id.map(|type_id| (key, type_id)))
    }

    /// Rewrite opaque keys in `id` terms to their plain form.
    fn resolve_id_terms(&self, mut query: IndexQuery) -> Result<IndexQuery> {
        for term in query.terms.iter_mut().filter(|t| t.field == ID_ATTRIBUTE) {
            match &mut term.value {
                TermValue::Scalar(value) => self.resolve_id(value)?,
                TermValue::List(values) => {
                    for value in values {
                        self.resolve_id(value)?;
                    }
                }
            }
        }
        Ok(query)
    }

    fn resolve_id(&self, value: &mut FieldValue) -> Result<()> {
        if let FieldValue::Text(text) = value {
            if text.starts_with('@') {
                let key = self
                    .codec
                    .decode(text)
                    .map_err(|e| StoreError::QueryValidation(format!("{ID_ATTRIBUTE}: {e}")))?;
                *text = key.to_string();
            }
        }
        Ok(())
    }
}

fn validate_type_name(type_name: &str) -> Result<()> {
    let valid = !type_name.is_empty()
        && type_name.len() <= MAX_TYPE_NAME_LEN
        && type_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(format!("invalid type name '{type_name}'")))
    }
}

fn record_object(value: &JsonValue) -> Result<&Map<String, JsonValue>> {
    value
        .as_object()
        .ok_or_else(|| StoreError::SchemaMismatch("records must be JSON objects".to_string()))
}

fn physical_id(key: &Key) -> Result<i64> {
    i64::try_from(key.id()).map_err(|_| StoreError::InvalidKey(format!("{key} is out of range")))
}

fn record_id(id: i64) -> Result<u64> {
    u64::try_from(id)
        .map_err(|_| StoreError::ConsistencyViolation(format!("negative record id {id}")))
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn key_values_table() -> TableCreateStatement {
    Table::create()
        .table(KeyValues::Table)
        .if_not_exists()
        .col(ColumnDef::new(KeyValues::KeyType).big_integer().not_null())
        .col(ColumnDef::new(KeyValues::KeyId).big_integer().not_null())
        .col(
            ColumnDef::new(KeyValues::IsDeleted)
                .char_len(1)
                .not_null()
                .default(FLAG_NO),
        )
        .col(ColumnDef::new(KeyValues::CreatedDt).big_integer().not_null())
        .col(ColumnDef::new(KeyValues::UpdatedDt).big_integer().not_null())
        .col(ColumnDef::new(KeyValues::Value).text().not_null())
        .primary_key(Index::create().col(KeyValues::KeyType).col(KeyValues::KeyId))
        .to_owned()
}

fn schemas_table() -> TableCreateStatement {
    Table::create()
        .table(Schemas::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Schemas::TypeName)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Schemas::Schema).text().not_null())
        .to_owned()
}

/// Row lock on the type's `_key_types` entry, held until the transaction
/// ends. Record writes share it; publishing or dropping a schema takes it
/// exclusively. SQLite has no row locks and serializes write transactions
/// instead.
fn type_lock_query(type_name: &str, exclusive: bool) -> SelectStatement {
    let mut stmt = Query::select()
        .column(KeyTypes::TypeId)
        .from(KeyTypes::Table)
        .and_where(Expr::col(KeyTypes::TypeName).eq(type_name))
        .to_owned();
    if exclusive {
        stmt.lock_exclusive();
    } else {
        stmt.lock_shared();
    }
    stmt
}

fn schema_query(type_name: &str) -> SelectStatement {
    Query::select()
        .column(Schemas::Schema)
        .from(Schemas::Table)
        .and_where(Expr::col(Schemas::TypeName).eq(type_name))
        .to_owned()
}

/// `WHERE` clause selecting one primary row.
fn key_condition(type_id: u32, id: i64) -> sea_query::Condition {
    sea_query::Cond::all()
        .add(Expr::col(KeyValues::KeyType).eq(i64::from(type_id)))
        .add(Expr::col(KeyValues::KeyId).eq(id))
}

macro_rules! impl_kv_store {
    ($db_type:ty, $conn_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl KeyValueStore<$db_type> {
            /// Open a store on `pool` with the SQL type authority, creating
            /// the fixed tables when missing.
            pub async fn open(
                pool: <$db_type as SqlBackend>::Pool,
                config: &crate::config::Config,
            ) -> Result<Self> {
                use crate::codec::DerivedKeyCache;
                use crate::sequence::SqlSequenceService;

                let sequence = SqlSequenceService::<$db_type>::new(pool.clone());
                sequence.init().await?;
                let codec = KeyCodec::new(&config.key_codec, DerivedKeyCache::new())?;

                let store = Self::new(pool, Arc::new(sequence), codec, &config.index);
                store.init().await?;
                Ok(store)
            }

            /// Create `_key_values` and `_schemas` if they do not exist.
            pub async fn init(&self) -> Result<()> {
                use crate::storage::SqlDatabase;

                for stmt in [key_values_table(), schemas_table()] {
                    let sql = <$db_type>::build_schema(&stmt);
                    sqlx::query(&sql).execute(&self.pool).await?;
                }
                Ok(())
            }

            /// Published schema of a type, if any.
            pub async fn schema(&self, type_name: &str) -> Result<Option<Arc<Schema>>> {
                use crate::storage::SqlDatabase;
                use sqlx::Row;

                if let Some(schema) = self.schemas.read().await.get(type_name) {
                    return Ok(Some(Arc::clone(schema)));
                }

                let stmt = <$db_type>::build_query(&schema_query(type_name));
                let Some(row) = sqlx::query_with(&stmt.sql, stmt.binder())
                    .fetch_optional(&self.pool)
                    .await?
                else {
                    return Ok(None);
                };

                let json: String = row.try_get(0)?;
                let schema = Arc::new(serde_json::from_str::<Schema>(&json)?);
                self.schemas
                    .write()
                    .await
                    .insert(type_name.to_string(), Arc::clone(&schema));
                Ok(Some(schema))
            }

            /// Lock the type on `conn` (see [`type_lock_query`]) and read its
            /// schema as that transaction sees it.
            async fn schema_in(
                conn: &mut $conn_type,
                type_name: &str,
                exclusive: bool,
            ) -> Result<Option<Schema>> {
                use crate::storage::SqlDatabase;
                use sqlx::Row;

                let lock = <$db_type>::build_query(&type_lock_query(type_name, exclusive));
                sqlx::query_with(&lock.sql, lock.binder())
                    .fetch_optional(&mut *conn)
                    .await?;

                let stmt = <$db_type>::build_query(&schema_query(type_name));
                let row = sqlx::query_with(&stmt.sql, stmt.binder())
                    .fetch_optional(&mut *conn)
                    .await?;
                match row {
                    Some(row) => {
                        let json: String = row.try_get(0)?;
                        Ok(Some(serde_json::from_str(&json)?))
                    }
                    None => Ok(None),
                }
            }

            async fn begin_write(
                &self,
            ) -> Result<sqlx::Transaction<'static, <$db_type as SqlBackend>::Database>> {
                Ok(self
                    .pool
                    .begin_with(<$db_type as SqlBackend>::BEGIN_WRITE)
                    .await?)
            }

            /// Publish the schema of a type and provision its indexes.
            ///
            /// Records already stored under the type are validated and
            /// indexed in the same transaction. Publishing an identical
            /// schema again is a no-op; a different one is rejected.
            pub async fn create_schema(&self, type_name: &str, schema: Schema) -> Result<()> {
                use crate::index::IndexedType;
                use crate::storage::SqlDatabase;
                use sqlx::Row;

                validate_type_name(type_name)?;
                if let Some(existing) = self.schema(type_name).await? {
                    if *existing == schema {
                        tracing::debug!(type_name, "Schema already published");
                        return Ok(());
                    }
                    return Err(StoreError::SchemaMismatch(format!(
                        "type {type_name} already has a different schema"
                    )));
                }

                let type_id = self.index.type_id(type_name, true).await?;
                let json = serde_json::to_string(&schema)?;
                let indexed = IndexedType {
                    type_id,
                    type_name,
                    schema: &schema,
                };

                let mut tx = self.begin_write().await?;

                // Published by a concurrent caller since the check above.
                if let Some(existing) = Self::schema_in(&mut tx, type_name, true).await? {
                    if existing == schema {
                        return Ok(());
                    }
                    return Err(StoreError::SchemaMismatch(format!(
                        "type {type_name} already has a different schema"
                    )));
                }

                let insert = <$db_type>::build_query(
                    &Query::insert()
                        .into_table(Schemas::Table)
                        .columns([Schemas::TypeName, Schemas::Schema])
                        .values([type_name.into(), json.into()])?
                        .to_owned(),
                );
                sqlx::query_with(&insert.sql, insert.binder())
                    .execute(&mut *tx)
                    .await?;

                for index in schema.indexes() {
                    self.index
                        .create_index_in(&mut tx, indexed, &index.name)
                        .await?;
                }

                let existing = <$db_type>::build_query(
                    &Query::select()
                        .columns([KeyValues::KeyId, KeyValues::Value, KeyValues::IsDeleted])
                        .from(KeyValues::Table)
                        .and_where(Expr::col(KeyValues::KeyType).eq(i64::from(type_id)))
                        .and_where(Expr::col(KeyValues::IsDeleted).ne(FLAG_YES))
                        .to_owned(),
                );
                let rows = sqlx::query_with(&existing.sql, existing.binder())
                    .fetch_all(&mut *tx)
                    .await?;

                for row in &rows {
                    let id = record_id(row.try_get(0)?)?;
                    let value: String = row.try_get(1)?;
                    let flag: String = row.try_get(2)?;

                    let value: JsonValue = serde_json::from_str(&value)?;
                    let record = record_object(&value)?;
                    schema.validate_record(type_name, record)?;

                    self.index.insert_rows_in(&mut tx, indexed, id, record).await?;
                    if flag == FLAG_QUARANTINED {
                        self.index.quarantine_rows_in(&mut tx, indexed, id, true).await?;
                    }
                }

                tx.commit().await?;

                tracing::info!(
                    type_name,
                    type_id,
                    indexes = schema.indexes().len(),
                    rows = rows.len(),
                    "Published schema"
                );
                self.schemas
                    .write()
                    .await
                    .insert(type_name.to_string(), Arc::new(schema));
                Ok(())
            }

            /// Remove the schema of a type and drop its index tables. Records
            /// are kept. Returns `false` when no schema was published.
            pub async fn drop_schema(&self, type_name: &str) -> Result<bool> {
                use crate::storage::SqlDatabase;

                let Some(type_id) = self.sequence.type_id(type_name, false).await? else {
                    return Ok(false);
                };

                let mut tx = self.begin_write().await?;
                let Some(schema) = Self::schema_in(&mut tx, type_name, true).await? else {
                    self.schemas.write().await.remove(type_name);
                    return Ok(false);
                };

                let delete = <$db_type>::build_query(
                    &Query::delete()
                        .from_table(Schemas::Table)
                        .and_where(Expr::col(Schemas::TypeName).eq(type_name))
                        .to_owned(),
                );
                sqlx::query_with(&delete.sql, delete.binder())
                    .execute(&mut *tx)
                    .await?;

                for index in schema.indexes() {
                    self.index
                        .drop_table_and_index_in(&mut tx, type_id, &index.name)
                        .await?;
                }

                tx.commit().await?;
                self.schemas.write().await.remove(type_name);

                tracing::info!(type_name, type_id, "Dropped schema");
                Ok(true)
            }

            /// Store a new record and return its key.
            pub async fn create(&self, type_name: &str, value: &JsonValue) -> Result<Key> {
                use crate::index::IndexedType;
                use crate::storage::SqlDatabase;

                validate_type_name(type_name)?;
                let record = record_object(value)?;

                let type_id = self.index.type_id(type_name, true).await?;
                let key = Key::new(type_name, self.sequence.next_id(type_name).await?);
                let json = serde_json::to_string(value)?;
                let now = now_secs();

                let mut tx = self.begin_write().await?;
                let schema = Self::schema_in(&mut tx, type_name, false).await?;
                if let Some(schema) = &schema {
                    schema.validate_record(type_name, record)?;
                }

                let insert = <$db_type>::build_query(
                    &Query::insert()
                        .into_table(KeyValues::Table)
                        .columns([
                            KeyValues::KeyType,
                            KeyValues::KeyId,
                            KeyValues::IsDeleted,
                            KeyValues::CreatedDt,
                            KeyValues::UpdatedDt,
                            KeyValues::Value,
                        ])
                        .values([
                            i64::from(type_id).into(),
                            physical_id(&key)?.into(),
                            FLAG_NO.into(),
                            now.into(),
                            now.into(),
                            json.into(),
                        ])?
                        .to_owned(),
                );
                sqlx::query_with(&insert.sql, insert.binder())
                    .execute(&mut *tx)
                    .await?;

                if let Some(schema) = &schema {
                    let indexed = IndexedType {
                        type_id,
                        type_name,
                        schema,
                    };
                    self.index
                        .insert_rows_in(&mut tx, indexed, key.id(), record)
                        .await?;
                }

                tx.commit().await?;

                tracing::debug!(key = %key, "Created record");
                Ok(key)
            }

            /// Read one record. Deleted records read as `None`.
            pub async fn retrieve(&self, key: &str) -> Result<Option<JsonValue>> {
                use crate::storage::SqlDatabase;
                use sqlx::Row;

                let Some((key, type_id)) = self.resolve(key).await? else {
                    return Ok(None);
                };

                let stmt = <$db_type>::build_query(
                    &Query::select()
                        .column(KeyValues::Value)
                        .from(KeyValues::Table)
                        .cond_where(key_condition(type_id, physical_id(&key)?))
                        .and_where(Expr::col(KeyValues::IsDeleted).ne(FLAG_YES))
                        .to_owned(),
                );
                let row = sqlx::query_with(&stmt.sql, stmt.binder())
                    .fetch_optional(&self.pool)
                    .await?;

                match row {
                    Some(row) => {
                        let json: String = row.try_get(0)?;
                        Ok(Some(serde_json::from_str(&json)?))
                    }
                    None => Ok(None),
                }
            }

            /// Read many records, keyed by their plain key. Missing and
            /// deleted records are absent from the result.
            pub async fn multi_retrieve(&self, keys: &[&str]) -> Result<HashMap<Key, JsonValue>> {
                use crate::storage::SqlDatabase;
                use sqlx::Row;

                let mut by_type: HashMap<String, Vec<i64>> = HashMap::new();
                for text in keys {
                    let key = self.codec.decode(text)?;
                    let id = physical_id(&key)?;
                    by_type.entry(key.type_name().to_string()).or_default().push(id);
                }

                let mut found = HashMap::new();
                for (type_name, ids) in by_type {
                    let Some(type_id) = self.sequence.type_id(&type_name, false).await? else {
                        continue;
                    };

                    for chunk in ids.chunks(MULTI_RETRIEVE_CHUNK) {
                        let stmt = <$db_type>::build_query(
                            &Query::select()
                                .columns([KeyValues::KeyId, KeyValues::Value])
                                .from(KeyValues::Table)
                                .and_where(Expr::col(KeyValues::KeyType).eq(i64::from(type_id)))
                                .and_where(Expr::col(KeyValues::KeyId).is_in(chunk.iter().copied()))
                                .and_where(Expr::col(KeyValues::IsDeleted).ne(FLAG_YES))
                                .to_owned(),
                        );
                        let rows = sqlx::query_with(&stmt.sql, stmt.binder())
                            .fetch_all(&self.pool)
                            .await?;

                        for row in rows {
                            let id = record_id(row.try_get(0)?)?;
                            let json: String = row.try_get(1)?;
                            found.insert(Key::new(type_name.as_str(), id), serde_json::from_str(&json)?);
                        }
                    }
                }

                tracing::debug!(requested = keys.len(), rows = found.len(), "Retrieved records");
                Ok(found)
            }

            /// Replace a record. Returns `false` when it does not exist or was
            /// deleted.
            pub async fn update(&self, key: &str, value: &JsonValue) -> Result<bool> {
                use crate::index::IndexedType;
                use crate::storage::SqlDatabase;

                let record = record_object(value)?;
                let Some((key, type_id)) = self.resolve(key).await? else {
                    return Ok(false);
                };
                let json = serde_json::to_string(value)?;

                let mut tx = self.begin_write().await?;
                let schema = Self::schema_in(&mut tx, key.type_name(), false).await?;
                if let Some(schema) = &schema {
                    schema.validate_record(key.type_name(), record)?;
                }

                let stmt = <$db_type>::build_query(
                    &Query::update()
                        .table(KeyValues::Table)
                        .values([
                            (KeyValues::Value, json.into()),
                            (KeyValues::UpdatedDt, now_secs().into()),
                        ])
                        .cond_where(key_condition(type_id, physical_id(&key)?))
                        .and_where(Expr::col(KeyValues::IsDeleted).ne(FLAG_YES))
                        .to_owned(),
                );
                let result = sqlx::query_with(&stmt.sql, stmt.binder())
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Ok(false);
                }

                if let Some(schema) = &schema {
                    let indexed = IndexedType {
                        type_id,
                        type_name: key.type_name(),
                        schema,
                    };
                    self.index
                        .update_rows_in(&mut tx, indexed, key.id(), record)
                        .await?;
                }

                tx.commit().await?;

                tracing::debug!(key = %key, "Updated record");
                Ok(true)
            }

            /// Delete a record and its index rows. Returns `false` when it does
            /// not exist or was already deleted.
            pub async fn delete(&self, key: &str) -> Result<bool> {
                use crate::index::IndexedType;
                use crate::storage::SqlDatabase;

                let Some((key, type_id)) = self.resolve(key).await? else {
                    return Ok(false);
                };
                let mut tx = self.begin_write().await?;
                let schema = Self::schema_in(&mut tx, key.type_name(), false).await?;

                let stmt = <$db_type>::build_query(
                    &Query::update()
                        .table(KeyValues::Table)
                        .values([
                            (KeyValues::IsDeleted, FLAG_YES.into()),
                            (KeyValues::UpdatedDt, now_secs().into()),
                        ])
                        .cond_where(key_condition(type_id, physical_id(&key)?))
                        .and_where(Expr::col(KeyValues::IsDeleted).ne(FLAG_YES))
                        .to_owned(),
                );
                let result = sqlx::query_with(&stmt.sql, stmt.binder())
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Ok(false);
                }

                if let Some(schema) = &schema {
                    let indexed = IndexedType {
                        type_id,
                        type_name: key.type_name(),
                        schema,
                    };
                    self.index.delete_rows_in(&mut tx, indexed, key.id()).await?;
                }

                tx.commit().await?;

                tracing::debug!(key = %key, "Deleted record");
                Ok(true)
            }

            /// Hide a live record from scans and index queries. Returns
            /// `false` unless the record exists and is not quarantined.
            pub async fn quarantine(&self, key: &str) -> Result<bool> {
                self.set_quarantined(key, true).await
            }

            /// Undo [`quarantine`](Self::quarantine). Returns `false` unless
            /// the record is quarantined.
            pub async fn release(&self, key: &str) -> Result<bool> {
                self.set_quarantined(key, false).await
            }

            async fn set_quarantined(&self, key: &str, quarantined: bool) -> Result<bool> {
                use crate::index::IndexedType;
                use crate::storage::SqlDatabase;

                let (from, to) = if quarantined {
                    (FLAG_NO, FLAG_QUARANTINED)
                } else {
                    (FLAG_QUARANTINED, FLAG_NO)
                };

                let Some((key, type_id)) = self.resolve(key).await? else {
                    return Ok(false);
                };
                let mut tx = self.begin_write().await?;
                let schema = Self::schema_in(&mut tx, key.type_name(), false).await?;

                let stmt = <$db_type>::build_query(
                    &Query::update()
                        .table(KeyValues::Table)
                        .values([
                            (KeyValues::IsDeleted, to.into()),
                            (KeyValues::UpdatedDt, now_secs().into()),
                        ])
                        .cond_where(key_condition(type_id, physical_id(&key)?))
                        .and_where(Expr::col(KeyValues::IsDeleted).eq(from))
                        .to_owned(),
                );
                let result = sqlx::query_with(&stmt.sql, stmt.binder())
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Ok(false);
                }

                if let Some(schema) = &schema {
                    let indexed = IndexedType {
                        type_id,
                        type_name: key.type_name(),
                        schema,
                    };
                    self.index
                        .quarantine_rows_in(&mut tx, indexed, key.id(), quarantined)
                        .await?;
                }

                tx.commit().await?;

                tracing::debug!(key = %key, quarantined, "Changed quarantine");
                Ok(true)
            }

            /// Remove every record of a type, deleted ones included, and empty
            /// its index tables. Returns the number of primary rows removed.
            pub async fn clear(&self, type_name: &str) -> Result<u64> {
                use crate::index::IndexedType;
                use crate::storage::SqlDatabase;

                let Some(type_id) = self.sequence.type_id(type_name, false).await? else {
                    return Ok(0);
                };
                let mut tx = self.begin_write().await?;
                let schema = Self::schema_in(&mut tx, type_name, false).await?;

                let stmt = <$db_type>::build_query(
                    &Query::delete()
                        .from_table(KeyValues::Table)
                        .and_where(Expr::col(KeyValues::KeyType).eq(i64::from(type_id)))
                        .to_owned(),
                );
                let result = sqlx::query_with(&stmt.sql, stmt.binder())
                    .execute(&mut *tx)
                    .await?;

                if let Some(schema) = &schema {
                    let indexed = IndexedType {
                        type_id,
                        type_name,
                        schema,
                    };
                    self.index.truncate_all_in(&mut tx, indexed).await?;
                }

                tx.commit().await?;

                tracing::info!(type_name, rows = result.rows_affected(), "Cleared type");
                Ok(result.rows_affected())
            }

            /// Query one secondary index of a type. `id` terms may carry
            /// opaque keys.
            pub async fn query(
                &self,
                type_name: &str,
                index_name: &str,
                query: IndexQuery,
            ) -> Result<crate::index::IndexPage> {
                let schema = self.schema(type_name).await?.ok_or_else(|| {
                    StoreError::SchemaMismatch(format!("no schema published for type {type_name}"))
                })?;
                let query = self.resolve_id_terms(query)?;
                self.index
                    .query(type_name, &schema, index_name, &query)
                    .await
            }

            /// List the keys of a type in id order, one page at a time.
            pub async fn scan(
                &self,
                type_name: &str,
                direction: crate::schema::SortDirection,
                token: Option<&str>,
                page_size: Option<u64>,
                include_quarantined: bool,
            ) -> Result<crate::index::IndexPage> {
                use crate::index::{compile_full_scan_query, IndexPage};
                use sqlx::Row;

                let Some(type_id) = self.sequence.type_id(type_name, false).await? else {
                    return Ok(IndexPage::default());
                };

                let compiled = compile_full_scan_query::<$db_type>(
                    type_id,
                    direction,
                    token,
                    page_size,
                    include_quarantined,
                )?;
                let stmt = &compiled.statement;
                let rows = sqlx::query_with(&stmt.sql, stmt.binder())
                    .fetch_all(&self.pool)
                    .await?;

                let ids = rows
                    .iter()
                    .map(|row| record_id(row.try_get(0)?))
                    .collect::<Result<Vec<_>>>()?;

                tracing::debug!(type_name, rows = ids.len(), offset = compiled.offset, "Scanned type");
                Ok(IndexPage::from_ids(
                    type_name,
                    ids,
                    compiled.offset,
                    compiled.page_size,
                ))
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_kv_store!(crate::storage::Sqlite, sqlx::SqliteConnection, "sqlite");
impl_kv_store!(crate::storage::Postgres, sqlx::PgConnection, "postgres");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Postgres, Sqlite, SqlDatabase};

    #[test]
    fn test_type_names() {
        for ok in ["user", "user_v2", "com.example.Order", "a-b"] {
            validate_type_name(ok).unwrap();
        }
        let too_long = "x".repeat(MAX_TYPE_NAME_LEN + 1);
        for bad in ["", "a:b", "@user", "with space", too_long.as_str()] {
            let err = validate_type_name(bad).unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "{bad}");
        }
    }

    #[test]
    fn test_records_must_be_objects() {
        assert!(record_object(&serde_json::json!({"a": 1})).is_ok());
        let err = record_object(&serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
    }

    #[test]
    fn test_primary_table_ddl() {
        let sql = Sqlite::build_schema(&key_values_table());
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "_key_values""#));
        assert!(sql.contains(r#""_is_deleted" char(1) NOT NULL DEFAULT 'N'"#));
        assert!(sql.contains(r#"PRIMARY KEY ("_key_type", "_key_id")"#));

        let sql = Postgres::build_schema(&schemas_table());
        assert!(sql.contains(r#""_type_name" varchar(255) NOT NULL PRIMARY KEY"#));
        assert!(sql.contains(r#""_schema" text NOT NULL"#));
    }

    #[test]
    fn test_type_lock_query() {
        let shared = Postgres::build_query(&type_lock_query("user", false));
        assert!(shared.sql.starts_with(r#"SELECT "_type_id" FROM "_key_types""#));
        assert!(shared.sql.ends_with("FOR SHARE"));

        let exclusive = Postgres::build_query(&type_lock_query("user", true));
        assert!(exclusive.sql.ends_with("FOR UPDATE"));

        // Write transactions on SQLite are serialized by BEGIN IMMEDIATE.
        let sqlite = Sqlite::build_query(&type_lock_query("user", true));
        assert!(!sqlite.sql.contains(" FOR "));
    }

    #[test]
    fn test_out_of_range_key() {
        let err = physical_id(&Key::new("user", u64::MAX)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert_eq!(physical_id(&Key::new("user", 7)).unwrap(), 7);
    }
}
