//! SQL substrate abstraction.
//!
//! Statements are built with sea-query and rendered by a dialect marker type
//! implementing [`SqlDatabase`]. Dialects that can also be executed through
//! sqlx implement [`SqlBackend`], which names their pool and connection types.

pub mod schema;

use sea_query::{
    Alias, ColumnDef, QueryStatementWriter, SchemaStatementBuilder, TableCreateStatement, Values,
};

use crate::schema::AttributeType;

/// A rendered statement plus the positional values it must be executed with.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Values,
}

impl BoundStatement {
    /// Binder to pass to `sqlx::query_with` along with [`BoundStatement::sql`].
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    pub fn binder(&self) -> sea_query_binder::SqlxValues {
        sea_query_binder::SqlxValues(self.values.clone())
    }
}

/// Trait for SQL dialects.
///
/// Abstracts over SQLite, PostgreSQL and MySQL by rendering sea-query
/// statements and supplying the few statements sea-query does not render
/// uniformly.
pub trait SqlDatabase: Send + Sync + 'static {
    /// Human-readable dialect name for logging.
    const NAME: &'static str;

    /// Identifier quote character.
    const QUOTE: char = '"';

    /// Render a DML/query statement with positional placeholders.
    fn build_query<T: QueryStatementWriter>(stmt: &T) -> BoundStatement;

    /// Render a DDL statement.
    fn build_schema<T: SchemaStatementBuilder>(stmt: &T) -> String;

    fn quote(ident: &str) -> String {
        format!("{q}{ident}{q}", q = Self::QUOTE)
    }

    /// Column definition for an attribute of the given type.
    fn column_def(name: &str, attribute_type: AttributeType) -> ColumnDef {
        let mut col = ColumnDef::new(Alias::new(name));
        match attribute_type {
            AttributeType::Boolean => col.boolean(),
            AttributeType::CharOne => col.char_len(1),
            AttributeType::Enum | AttributeType::Utf8Smallstring => col.string_len(255),
            AttributeType::Utf8Text
            | AttributeType::Any
            | AttributeType::Array
            | AttributeType::Map => col.text(),
            AttributeType::I8
            | AttributeType::I16
            | AttributeType::I32
            | AttributeType::I64
            | AttributeType::U8
            | AttributeType::U16
            | AttributeType::U32
            | AttributeType::U64
            | AttributeType::UtcDateSecs => col.big_integer(),
        };
        col
    }

    /// Append backend-specific table options.
    fn table_options(_stmt: &mut TableCreateStatement) {}

    /// Drop an index object. Errors are expected where the dialect has no
    /// `IF EXISTS` form and are tolerated by callers.
    fn index_drop_sql(index: &str, _table: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", Self::quote(index))
    }

    fn truncate_sql(table: &str) -> String {
        format!("TRUNCATE TABLE {}", Self::quote(table))
    }
}

/// A dialect that can be executed through sqlx.
pub trait SqlBackend: SqlDatabase {
    /// The sqlx driver.
    type Database: sqlx::Database;

    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// Statement opening a transaction that will write.
    const BEGIN_WRITE: &'static str;
}

pub mod sqlite {
    //! SQLite dialect.

    use sea_query::{QueryStatementWriter, SchemaStatementBuilder, SqliteQueryBuilder};

    use super::BoundStatement;

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        const NAME: &'static str = "sqlite";

        fn build_query<T: QueryStatementWriter>(stmt: &T) -> BoundStatement {
            let (sql, values) = stmt.build(SqliteQueryBuilder);
            BoundStatement { sql, values }
        }

        fn build_schema<T: SchemaStatementBuilder>(stmt: &T) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        // No TRUNCATE in SQLite.
        fn truncate_sql(table: &str) -> String {
            format!("DELETE FROM {}", <Self as super::SqlDatabase>::quote(table))
        }
    }

    #[cfg(feature = "sqlite")]
    impl super::SqlBackend for Sqlite {
        type Database = sqlx::Sqlite;
        type Pool = sqlx::SqlitePool;

        // Takes the write lock up front; a deferred transaction that reads
        // first fails with SQLITE_BUSY instead of waiting for the lock.
        const BEGIN_WRITE: &'static str = "BEGIN IMMEDIATE";
    }
}

pub mod postgres {
    //! PostgreSQL dialect.

    use sea_query::{PostgresQueryBuilder, QueryStatementWriter, SchemaStatementBuilder};

    use super::BoundStatement;

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        const NAME: &'static str = "postgres";

        fn build_query<T: QueryStatementWriter>(stmt: &T) -> BoundStatement {
            let (sql, values) = stmt.build(PostgresQueryBuilder);
            BoundStatement { sql, values }
        }

        fn build_schema<T: SchemaStatementBuilder>(stmt: &T) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }
    }

    #[cfg(feature = "postgres")]
    impl super::SqlBackend for Postgres {
        type Database = sqlx::Postgres;
        type Pool = sqlx::PgPool;

        const BEGIN_WRITE: &'static str = "BEGIN";
    }
}

pub mod mysql {
    //! MySQL dialect (statement rendering only).

    use sea_query::{
        MysqlQueryBuilder, QueryStatementWriter, SchemaStatementBuilder, TableCreateStatement,
    };

    use super::BoundStatement;

    /// MySQL database marker type.
    pub struct MySql;

    impl super::SqlDatabase for MySql {
        const NAME: &'static str = "mysql";
        const QUOTE: char = '`';

        fn build_query<T: QueryStatementWriter>(stmt: &T) -> BoundStatement {
            let (sql, values) = stmt.build(MysqlQueryBuilder);
            BoundStatement { sql, values }
        }

        fn build_schema<T: SchemaStatementBuilder>(stmt: &T) -> String {
            stmt.to_string(MysqlQueryBuilder)
        }

        fn table_options(stmt: &mut TableCreateStatement) {
            stmt.engine("InnoDB").character_set("utf8mb4").collate("utf8mb4_bin");
        }

        // No IF EXISTS form; a missing index raises an error the caller tolerates.
        fn index_drop_sql(index: &str, table: &str) -> String {
            format!("DROP INDEX {} ON {}", Self::quote(index), Self::quote(table))
        }
    }
}

pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
