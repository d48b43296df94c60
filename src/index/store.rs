//! Execution of index DDL, queries and maintenance hooks.
//!
//! Uses a macro to generate implementations for each SQL backend,
//! eliminating code duplication while maintaining type safety.
//!
//! Methods suffixed `_in` run on a caller-supplied connection, normally
//! the transaction of a primary-record mutation. They never commit.

use std::marker::PhantomData;
use std::sync::Arc;

use super::naming::{IndexNaming, IndexTableNames};
use super::IndexTarget;
use crate::config::IndexConfig;
use crate::error::{Result, StoreError};
use crate::schema::{IndexDefinition, Schema};
use crate::sequence::SequenceService;
use crate::storage::SqlBackend;

/// A record type whose indexes are being maintained.
#[derive(Debug, Clone, Copy)]
pub struct IndexedType<'a> {
    pub type_id: u32,
    pub type_name: &'a str,
    pub schema: &'a Schema,
}

/// Runs secondary index statements against a sqlx pool or connection.
pub struct SecondaryIndexStore<DB: SqlBackend> {
    pool: DB::Pool,
    sequence: Arc<dyn SequenceService>,
    naming: IndexNaming,
    unique_lookup_limit: u64,
    _marker: PhantomData<DB>,
}

impl<DB: SqlBackend> SecondaryIndexStore<DB> {
    pub fn new(pool: DB::Pool, sequence: Arc<dyn SequenceService>, config: &IndexConfig) -> Self {
        Self {
            pool,
            sequence,
            naming: IndexNaming::new(config.table_prefix.clone()),
            unique_lookup_limit: config.unique_lookup_limit,
            _marker: PhantomData,
        }
    }

    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }

    pub fn naming(&self) -> &IndexNaming {
        &self.naming
    }

    /// Resolve the type id of `type_name`, registering it when `create` is set.
    pub async fn type_id(&self, type_name: &str, create: bool) -> Result<u32> {
        self.sequence
            .type_id(type_name, create)
            .await?
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))
    }

    /// Physical names of one index of a type.
    pub fn names(&self, type_id: u32, index_name: &str) -> IndexTableNames {
        self.naming.names(type_id, index_name)
    }
}

fn target<'a>(
    indexed: IndexedType<'a>,
    index: &'a IndexDefinition,
    names: &'a IndexTableNames,
) -> IndexTarget<'a> {
    IndexTarget {
        type_name: indexed.type_name,
        schema: indexed.schema,
        index,
        names,
    }
}

fn to_record_id(id: i64, table: &str) -> Result<u64> {
    u64::try_from(id)
        .map_err(|_| StoreError::ConsistencyViolation(format!("negative id {id} in {table}")))
}

macro_rules! impl_index_store {
    ($db_type:ty, $conn_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SecondaryIndexStore<$db_type> {
            /// Create (or recreate) the table and index object of one index in
            /// a single transaction.
            pub async fn create_index(
                &self,
                type_name: &str,
                schema: &Schema,
                index_name: &str,
            ) -> Result<()> {
                let type_id = self.type_id(type_name, true).await?;
                let indexed = IndexedType {
                    type_id,
                    type_name,
                    schema,
                };

                let mut tx = self.pool.begin().await?;
                self.create_index_in(&mut tx, indexed, index_name).await?;
                tx.commit().await?;
                Ok(())
            }

            /// Create sequence on the caller's connection: best-effort drop of
            /// the index object, then table, then index.
            pub async fn create_index_in(
                &self,
                conn: &mut $conn_type,
                indexed: IndexedType<'_>,
                index_name: &str,
            ) -> Result<()> {
                use super::ddl::{build_create_index, build_create_table, build_index_drop};

                let index = indexed.schema.require_index(indexed.type_name, index_name)?;
                let names = self.names(indexed.type_id, index_name);

                Self::execute_best_effort(conn, &build_index_drop::<$db_type>(&names)).await;

                let create_table = build_create_table::<$db_type>(&names, index, indexed.schema)?;
                sqlx::query(&create_table).execute(&mut *conn).await?;

                let create_index = build_create_index::<$db_type>(&names, index, indexed.schema)?;
                sqlx::query(&create_index).execute(&mut *conn).await?;

                tracing::info!(
                    type_name = indexed.type_name,
                    index = index_name,
                    table = %names.table,
                    unique = index.unique,
                    "Created index"
                );
                Ok(())
            }

            /// Drop the table and index object of one index in a single
            /// transaction.
            pub async fn drop_table_and_index(&self, type_name: &str, index_name: &str) -> Result<()> {
                let type_id = self.type_id(type_name, false).await?;

                let mut tx = self.pool.begin().await?;
                self.drop_table_and_index_in(&mut tx, type_id, index_name).await?;
                tx.commit().await?;
                Ok(())
            }

            pub async fn drop_table_and_index_in(
                &self,
                conn: &mut $conn_type,
                type_id: u32,
                index_name: &str,
            ) -> Result<()> {
                use super::ddl::{build_index_drop, build_table_drop};

                let names = self.names(type_id, index_name);

                sqlx::query(&build_table_drop::<$db_type>(&names))
                    .execute(&mut *conn)
                    .await?;
                Self::execute_best_effort(conn, &build_index_drop::<$db_type>(&names)).await;

                tracing::info!(type_id, index = index_name, table = %names.table, "Dropped index");
                Ok(())
            }

            /// Remove every row of one index table.
            pub async fn truncate_index_table(
                &self,
                conn: &mut $conn_type,
                type_id: u32,
                index_name: &str,
            ) -> Result<()> {
                use super::ddl::build_truncate;

                let names = self.names(type_id, index_name);
                sqlx::query(&build_truncate::<$db_type>(&names))
                    .execute(&mut *conn)
                    .await?;

                tracing::debug!(type_id, index = index_name, table = %names.table, "Truncated index");
                Ok(())
            }

            /// Run an index query.
            ///
            /// A fully bound lookup on a unique index reads inside its own
            /// transaction and fails with [`StoreError::ConsistencyViolation`]
            /// when more than one row matches.
            pub async fn query(
                &self,
                type_name: &str,
                schema: &Schema,
                index_name: &str,
                query: &super::IndexQuery,
            ) -> Result<super::IndexPage> {
                use sqlx::Row;

                use super::query::compile_index_query;

                let index = schema.require_index(type_name, index_name)?;
                let type_id = self.type_id(type_name, false).await?;
                let names = self.names(type_id, index_name);
                let indexed = IndexedType {
                    type_id,
                    type_name,
                    schema,
                };

                let compiled = compile_index_query::<$db_type>(
                    target(indexed, index, &names),
                    query,
                    self.unique_lookup_limit,
                )?;
                let stmt = &compiled.statement;

                let rows = if compiled.unique_lookup {
                    let mut tx = self.pool.begin().await?;
                    let rows = sqlx::query_with(&stmt.sql, stmt.binder())
                        .fetch_all(&mut *tx)
                        .await?;
                    tx.commit().await?;

                    if rows.len() > 1 {
                        tracing::error!(
                            type_name,
                            index = index_name,
                            rows = rows.len(),
                            "Unique index returned more than one row"
                        );
                        return Err(StoreError::ConsistencyViolation(format!(
                            "unique index {type_name}.{index_name} returned {} rows",
                            rows.len()
                        )));
                    }
                    rows
                } else {
                    sqlx::query_with(&stmt.sql, stmt.binder())
                        .fetch_all(&self.pool)
                        .await?
                };

                let ids = rows
                    .iter()
                    .map(|row| to_record_id(row.try_get(0)?, &names.table))
                    .collect::<Result<Vec<_>>>()?;

                tracing::debug!(
                    type_name,
                    index = index_name,
                    rows = ids.len(),
                    offset = compiled.offset,
                    "Index query"
                );
                Ok(super::IndexPage::from_ids(
                    type_name,
                    ids,
                    compiled.offset,
                    compiled.page_size,
                ))
            }

            /// Insert the index rows of a new record into every index of its type.
            pub async fn insert_rows_in(
                &self,
                conn: &mut $conn_type,
                indexed: IndexedType<'_>,
                id: u64,
                record: &serde_json::Map<String, serde_json::Value>,
            ) -> Result<()> {
                use super::hooks::build_insert;

                for index in indexed.schema.indexes() {
                    let names = self.names(indexed.type_id, &index.name);
                    let target = target(indexed, index, &names);
                    let stmt = build_insert::<$db_type>(target, id, record)?;
                    Self::execute_hook(conn, target, &stmt).await?;
                }
                tracing::debug!(type_name = indexed.type_name, id, "Inserted index rows");
                Ok(())
            }

            /// Rewrite the index rows of a record in every index of its type.
            pub async fn update_rows_in(
                &self,
                conn: &mut $conn_type,
                indexed: IndexedType<'_>,
                id: u64,
                record: &serde_json::Map<String, serde_json::Value>,
            ) -> Result<()> {
                use super::hooks::build_update;

                // An id-only index row never changes.
                for index in indexed
                    .schema
                    .indexes()
                    .iter()
                    .filter(|index| index.value_attributes().next().is_some())
                {
                    let names = self.names(indexed.type_id, &index.name);
                    let target = target(indexed, index, &names);
                    let stmt = build_update::<$db_type>(target, id, record)?;
                    Self::execute_hook(conn, target, &stmt).await?;
                }
                tracing::debug!(type_name = indexed.type_name, id, "Updated index rows");
                Ok(())
            }

            /// Delete the index rows of a record from every index of its type.
            pub async fn delete_rows_in(
                &self,
                conn: &mut $conn_type,
                indexed: IndexedType<'_>,
                id: u64,
            ) -> Result<()> {
                use super::hooks::build_delete;

                for index in indexed.schema.indexes() {
                    let names = self.names(indexed.type_id, &index.name);
                    let target = target(indexed, index, &names);
                    let stmt = build_delete::<$db_type>(target, id)?;
                    Self::execute_hook(conn, target, &stmt).await?;
                }
                tracing::debug!(type_name = indexed.type_name, id, "Deleted index rows");
                Ok(())
            }

            /// Set or clear the quarantine flag of a record in every index of its type.
            pub async fn quarantine_rows_in(
                &self,
                conn: &mut $conn_type,
                indexed: IndexedType<'_>,
                id: u64,
                quarantined: bool,
            ) -> Result<()> {
                use super::hooks::build_quarantine;

                for index in indexed.schema.indexes() {
                    let names = self.names(indexed.type_id, &index.name);
                    let target = target(indexed, index, &names);
                    let stmt = build_quarantine::<$db_type>(target, id, quarantined)?;
                    Self::execute_hook(conn, target, &stmt).await?;
                }
                tracing::debug!(type_name = indexed.type_name, id, quarantined, "Flagged index rows");
                Ok(())
            }

            /// Empty every index table of a type.
            pub async fn truncate_all_in(
                &self,
                conn: &mut $conn_type,
                indexed: IndexedType<'_>,
            ) -> Result<()> {
                for index in indexed.schema.indexes() {
                    self.truncate_index_table(conn, indexed.type_id, &index.name)
                        .await?;
                }
                Ok(())
            }

            async fn execute_hook(
                conn: &mut $conn_type,
                target: IndexTarget<'_>,
                stmt: &crate::storage::BoundStatement,
            ) -> Result<()> {
                use super::hooks::classify_write_error;

                sqlx::query_with(&stmt.sql, stmt.binder())
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| classify_write_error(target, e))?;
                Ok(())
            }

            /// Run a statement whose failure is an expected no-op (dropping an
            /// absent object). A savepoint keeps the enclosing transaction usable.
            async fn execute_best_effort(conn: &mut $conn_type, sql: &str) {
                use sqlx::Connection;

                let mut savepoint = match conn.begin().await {
                    Ok(savepoint) => savepoint,
                    Err(e) => {
                        tracing::debug!(error = %e, sql, "Skipped best-effort statement");
                        return;
                    }
                };

                match sqlx::query(sql).execute(&mut *savepoint).await {
                    Ok(_) => {
                        if let Err(e) = savepoint.commit().await {
                            tracing::debug!(error = %e, sql, "Best-effort statement not released");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, sql, "Tolerated best-effort failure");
                        if let Err(e) = savepoint.rollback().await {
                            tracing::debug!(error = %e, sql, "Best-effort rollback failed");
                        }
                    }
                }
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_index_store!(crate::storage::Sqlite, sqlx::SqliteConnection, "sqlite");
impl_index_store!(crate::storage::Postgres, sqlx::PgConnection, "postgres");
