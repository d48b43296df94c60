//! SQL-backed type authority.
//!
//! Uses a macro to generate implementations for each SQL backend, keeping
//! one statement set for SQLite and PostgreSQL.

use std::marker::PhantomData;

use sea_query::{
    ColumnDef, Expr, Func, InsertStatement, OnConflict, Query, Table, TableCreateStatement,
};

use crate::storage::schema::KeyTypes;
use crate::storage::SqlBackend;

/// Sequence service persisting type ids and record counters in `_key_types`.
pub struct SqlSequenceService<DB: SqlBackend> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlBackend> SqlSequenceService<DB> {
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }
}

fn create_table_statement() -> TableCreateStatement {
    Table::create()
        .table(KeyTypes::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(KeyTypes::TypeName)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(KeyTypes::TypeId)
                .big_integer()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(KeyTypes::NextId).big_integer().not_null())
        .to_owned()
}

/// Attempts at registering a type before a lost id race is reported.
const MAX_REGISTRATION_ATTEMPTS: u32 = 5;

/// Insert `type_name` with the next free type id, computed by the same
/// statement. A name registered concurrently is left untouched.
fn registration_statement(type_name: &str) -> crate::error::Result<InsertStatement> {
    let next_type_id = Expr::expr(Func::coalesce([
        Expr::col(KeyTypes::TypeId).max(),
        Expr::val(0i64).into(),
    ]))
    .add(1i64);

    let source = Query::select()
        .expr(Expr::val(type_name))
        .expr(next_type_id)
        .expr(Expr::val(1i64))
        .from(KeyTypes::Table)
        // SQLite only parses an upsert from a SELECT that has a WHERE clause.
        .and_where(Expr::cust("1 = 1"))
        .to_owned();

    Ok(Query::insert()
        .into_table(KeyTypes::Table)
        .columns([KeyTypes::TypeName, KeyTypes::TypeId, KeyTypes::NextId])
        .select_from(source)?
        .on_conflict(OnConflict::column(KeyTypes::TypeName).do_nothing().to_owned())
        .to_owned())
}

macro_rules! impl_sql_sequence {
    ($db_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlSequenceService<$db_type> {
            /// Create the `_key_types` table if it does not exist.
            pub async fn init(&self) -> crate::error::Result<()> {
                use crate::storage::SqlDatabase;

                let sql = <$db_type>::build_schema(&create_table_statement());
                sqlx::query(&sql).execute(&self.pool).await?;
                Ok(())
            }

            async fn lookup<'c, E>(executor: E, type_name: &str) -> crate::error::Result<Option<u32>>
            where
                E: sqlx::Executor<'c, Database = <$db_type as crate::storage::SqlBackend>::Database>,
            {
                use sqlx::Row;

                use crate::storage::SqlDatabase;

                let stmt = <$db_type>::build_query(
                    &Query::select()
                        .column(KeyTypes::TypeId)
                        .from(KeyTypes::Table)
                        .and_where(Expr::col(KeyTypes::TypeName).eq(type_name))
                        .to_owned(),
                );
                let row = sqlx::query_with(&stmt.sql, stmt.binder())
                    .fetch_optional(executor)
                    .await?;

                match row {
                    Some(row) => {
                        let type_id: i64 = row.try_get(0)?;
                        let type_id = u32::try_from(type_id).map_err(|_| {
                            crate::error::StoreError::UnknownType(format!(
                                "{type_name} has an invalid type id {type_id}"
                            ))
                        })?;
                        Ok(Some(type_id))
                    }
                    None => Ok(None),
                }
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl super::SequenceService for SqlSequenceService<$db_type> {
            async fn type_id(
                &self,
                type_name: &str,
                create: bool,
            ) -> crate::error::Result<Option<u32>> {
                use crate::index::hooks::is_unique_violation;
                use crate::storage::{SqlBackend, SqlDatabase};

                if let Some(type_id) = Self::lookup(&self.pool, type_name).await? {
                    return Ok(Some(type_id));
                }
                if !create {
                    return Ok(None);
                }

                let register = <$db_type>::build_query(&registration_statement(type_name)?);
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let mut tx = self
                        .pool
                        .begin_with(<$db_type as SqlBackend>::BEGIN_WRITE)
                        .await?;
                    let inserted = sqlx::query_with(&register.sql, register.binder())
                        .execute(&mut *tx)
                        .await;
                    match inserted {
                        Ok(_) => {
                            let type_id = Self::lookup(&mut *tx, type_name).await?;
                            tx.commit().await?;
                            tracing::info!(type_name, ?type_id, "Registered type");
                            return Ok(type_id);
                        }
                        // Another new type committed the same id first.
                        Err(err)
                            if attempt < MAX_REGISTRATION_ATTEMPTS && is_unique_violation(&err) =>
                        {
                            tracing::debug!(type_name, attempt, "Type id taken, retrying");
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }

            async fn next_id(&self, type_name: &str) -> crate::error::Result<u64> {
                use sqlx::Row;

                use crate::storage::{SqlBackend, SqlDatabase};

                let mut tx = self
                    .pool
                    .begin_with(<$db_type as SqlBackend>::BEGIN_WRITE)
                    .await?;

                let bump = <$db_type>::build_query(
                    &Query::update()
                        .table(KeyTypes::Table)
                        .value(KeyTypes::NextId, Expr::col(KeyTypes::NextId).add(1))
                        .and_where(Expr::col(KeyTypes::TypeName).eq(type_name))
                        .to_owned(),
                );
                let result = sqlx::query_with(&bump.sql, bump.binder())
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(crate::error::StoreError::UnknownType(type_name.to_string()));
                }

                let select = <$db_type>::build_query(
                    &Query::select()
                        .column(KeyTypes::NextId)
                        .from(KeyTypes::Table)
                        .and_where(Expr::col(KeyTypes::TypeName).eq(type_name))
                        .to_owned(),
                );
                let row = sqlx::query_with(&select.sql, select.binder())
                    .fetch_one(&mut *tx)
                    .await?;
                let next: i64 = row.try_get(0)?;

                tx.commit().await?;

                // The counter holds the id after the one just allocated.
                Ok(next.saturating_sub(1).max(0) as u64)
            }
        }
    };
}

impl_sql_sequence!(crate::storage::Sqlite, "sqlite");
impl_sql_sequence!(crate::storage::Postgres, "postgres");
