//! DDL for secondary index tables.
//!
//! An index table holds one row per record: the physical id as primary key,
//! one column per declared attribute (except the synthetic `id`), and a
//! single-character quarantine flag.

use sea_query::{Alias, ColumnDef, Index, IndexOrder, Table};

use super::naming::{column_name, IndexTableNames};
use crate::error::Result;
use crate::schema::{AttributeType, IndexDefinition, Schema, SortDirection};
use crate::storage::schema::{FLAG_NO, INDEX_ID_COLUMN, QUARANTINED_COLUMN};
use crate::storage::SqlDatabase;

/// `CREATE TABLE IF NOT EXISTS` for an index table.
pub fn build_create_table<DB: SqlDatabase>(
    names: &IndexTableNames,
    index: &IndexDefinition,
    schema: &Schema,
) -> Result<String> {
    let mut stmt = Table::create();
    stmt.table(Alias::new(&names.table))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new(INDEX_ID_COLUMN))
                .big_integer()
                .not_null()
                .primary_key(),
        );

    for column in index.value_attributes() {
        let attribute = schema.require_attribute(&column.name)?;
        stmt.col(&mut DB::column_def(
            &column_name(&column.name),
            attribute.attribute_type,
        ));
    }

    stmt.col(
        DB::column_def(QUARANTINED_COLUMN, AttributeType::CharOne)
            .not_null()
            .default(FLAG_NO),
    );

    DB::table_options(&mut stmt);

    Ok(DB::build_schema(&stmt))
}

/// `CREATE [UNIQUE] INDEX` over the attribute columns in declared order.
///
/// Non-unique indexes end with the id column; unique indexes enforce
/// uniqueness over the declared attributes only.
pub fn build_create_index<DB: SqlDatabase>(
    names: &IndexTableNames,
    index: &IndexDefinition,
    schema: &Schema,
) -> Result<String> {
    let mut stmt = Index::create();
    stmt.name(&names.index).table(Alias::new(&names.table));

    for column in index.value_attributes() {
        schema.require_attribute(&column.name)?;
        stmt.col((
            Alias::new(column_name(&column.name)),
            index_order(column.sort_direction),
        ));
    }

    if index.unique {
        stmt.unique();
    } else {
        let id_direction = index
            .attributes
            .iter()
            .find(|a| a.is_id())
            .map_or(SortDirection::Ascending, |a| a.sort_direction);
        stmt.col((Alias::new(INDEX_ID_COLUMN), index_order(id_direction)));
    }

    Ok(DB::build_schema(&stmt))
}

/// `DROP TABLE IF EXISTS`.
pub fn build_table_drop<DB: SqlDatabase>(names: &IndexTableNames) -> String {
    DB::build_schema(
        &Table::drop()
            .table(Alias::new(&names.table))
            .if_exists()
            .to_owned(),
    )
}

/// Best-effort drop of the index object.
pub fn build_index_drop<DB: SqlDatabase>(names: &IndexTableNames) -> String {
    DB::index_drop_sql(&names.index, &names.table)
}

/// Remove every row of an index table.
pub fn build_truncate<DB: SqlDatabase>(names: &IndexTableNames) -> String {
    DB::truncate_sql(&names.table)
}

fn index_order(direction: SortDirection) -> IndexOrder {
    match direction {
        SortDirection::Ascending => IndexOrder::Asc,
        SortDirection::Descending => IndexOrder::Desc,
    }
}
