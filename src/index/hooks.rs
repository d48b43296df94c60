//! Index maintenance statements.
//!
//! Builders here only render statements. Callers execute them on the
//! connection of the transaction that writes the primary row, so a failed
//! index write rolls the whole mutation back.

use sea_query::{Alias, Expr, Query, SimpleExpr};
use serde_json::{Map, Value as JsonValue};

use super::binding::{bind_attribute_value, physical_id};
use super::naming::column_name;
use super::IndexTarget;
use crate::error::{Result, StoreError};
use crate::schema::FieldValue;
use crate::storage::schema::{FLAG_NO, FLAG_YES, INDEX_ID_COLUMN, QUARANTINED_COLUMN};
use crate::storage::{BoundStatement, SqlDatabase};

/// Insert the index row of a new record.
pub fn build_insert<DB: SqlDatabase>(
    target: IndexTarget<'_>,
    id: u64,
    record: &Map<String, JsonValue>,
) -> Result<BoundStatement> {
    let mut columns = vec![Alias::new(INDEX_ID_COLUMN)];
    let mut values: Vec<SimpleExpr> = vec![id_value(id)?.into()];

    for (column, value) in row_values(target, record)? {
        columns.push(column);
        values.push(value.into());
    }
    columns.push(Alias::new(QUARANTINED_COLUMN));
    values.push(FLAG_NO.into());

    let stmt = Query::insert()
        .into_table(Alias::new(&target.names.table))
        .columns(columns)
        .values(values)?
        .to_owned();

    Ok(DB::build_query(&stmt))
}

/// Rewrite every attribute column of a record's index row.
pub fn build_update<DB: SqlDatabase>(
    target: IndexTarget<'_>,
    id: u64,
    record: &Map<String, JsonValue>,
) -> Result<BoundStatement> {
    let values = row_values(target, record)?
        .into_iter()
        .map(|(column, value)| (column, SimpleExpr::from(value)));

    let stmt = Query::update()
        .table(Alias::new(&target.names.table))
        .values(values)
        .and_where(Expr::col(Alias::new(INDEX_ID_COLUMN)).eq(id_value(id)?))
        .to_owned();

    Ok(DB::build_query(&stmt))
}

pub fn build_delete<DB: SqlDatabase>(target: IndexTarget<'_>, id: u64) -> Result<BoundStatement> {
    let stmt = Query::delete()
        .from_table(Alias::new(&target.names.table))
        .and_where(Expr::col(Alias::new(INDEX_ID_COLUMN)).eq(id_value(id)?))
        .to_owned();

    Ok(DB::build_query(&stmt))
}

/// Set or clear the quarantine flag of a record's index row.
pub fn build_quarantine<DB: SqlDatabase>(
    target: IndexTarget<'_>,
    id: u64,
    quarantined: bool,
) -> Result<BoundStatement> {
    let flag = if quarantined { FLAG_YES } else { FLAG_NO };

    let stmt = Query::update()
        .table(Alias::new(&target.names.table))
        .value(Alias::new(QUARANTINED_COLUMN), flag)
        .and_where(Expr::col(Alias::new(INDEX_ID_COLUMN)).eq(id_value(id)?))
        .to_owned();

    Ok(DB::build_query(&stmt))
}

/// Whether a backend error reports a unique constraint violation.
///
/// Uses the driver's classification when there is one and falls back to the
/// message text of the known dialects.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || is_unique_violation_message(db_err.message())
        }
        other => is_unique_violation_message(&other.to_string()),
    }
}

/// Map an index write failure to [`StoreError::UniquenessConflict`] when it
/// is one.
pub fn classify_write_error(target: IndexTarget<'_>, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        tracing::warn!(
            type_name = target.type_name,
            index = %target.index.name,
            "Uniqueness conflict on index write"
        );
        StoreError::UniquenessConflict {
            type_name: target.type_name.to_string(),
            index: target.index.name.clone(),
        }
    } else {
        StoreError::Database(err)
    }
}

fn is_unique_violation_message(message: &str) -> bool {
    const PHRASES: [&str; 5] = [
        "unique constraint failed",
        "duplicate key value violates unique constraint",
        "duplicate entry",
        "unique index or primary key violation",
        "constraint violation",
    ];
    let message = message.to_lowercase();
    PHRASES.iter().any(|phrase| message.contains(phrase))
}

fn id_value(id: u64) -> Result<sea_query::Value> {
    physical_id(id).map_err(StoreError::InvalidKey)
}

fn row_values(
    target: IndexTarget<'_>,
    record: &Map<String, JsonValue>,
) -> Result<Vec<(Alias, sea_query::Value)>> {
    target
        .index
        .value_attributes()
        .map(|column| {
            let attribute = target.schema.require_attribute(&column.name)?;
            let value = match record.get(&column.name) {
                None => FieldValue::Null,
                Some(json) => FieldValue::from_json(json).ok_or_else(|| {
                    StoreError::SchemaMismatch(format!(
                        "{}.{} is not a scalar",
                        target.type_name, column.name
                    ))
                })?,
            };
            let bound = bind_attribute_value(attribute, column, &value).map_err(|msg| {
                StoreError::SchemaMismatch(format!("{}.{}: {msg}", target.type_name, column.name))
            })?;
            Ok((Alias::new(column_name(&column.name)), bound))
        })
        .collect()
}
