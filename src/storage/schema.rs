//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers of the fixed tables for
//! type-safe query building. Index tables are named at runtime by
//! [`crate::index::naming`].

use sea_query::Iden;

/// Primary record table.
#[derive(Iden)]
pub enum KeyValues {
    #[iden = "_key_values"]
    Table,
    #[iden = "_key_type"]
    KeyType,
    #[iden = "_key_id"]
    KeyId,
    #[iden = "_is_deleted"]
    IsDeleted,
    #[iden = "_created_dt"]
    CreatedDt,
    #[iden = "_updated_dt"]
    UpdatedDt,
    #[iden = "_value"]
    Value,
}

/// Type authority table: one row per registered type.
#[derive(Iden)]
pub enum KeyTypes {
    #[iden = "_key_types"]
    Table,
    #[iden = "_type_name"]
    TypeName,
    #[iden = "_type_id"]
    TypeId,
    #[iden = "_next_id"]
    NextId,
}

/// Published schemas, stored as JSON.
#[derive(Iden)]
pub enum Schemas {
    #[iden = "_schemas"]
    Table,
    #[iden = "_type_name"]
    TypeName,
    #[iden = "_schema"]
    Schema,
}

/// Physical id column of an index table.
pub const INDEX_ID_COLUMN: &str = "_id";
/// Quarantine flag column of an index table.
pub const QUARANTINED_COLUMN: &str = "quarantined";

/// Flag values of the index `quarantined` column and the primary
/// `_is_deleted` column. A deleted primary row holds [`FLAG_YES`].
pub const FLAG_NO: &str = "N";
pub const FLAG_YES: &str = "Y";

/// `_is_deleted` value of a quarantined primary row.
pub const FLAG_QUARANTINED: &str = "Q";
