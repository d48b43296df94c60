//! Shared utilities for integration tests.
//!
//! Stores run on a single-connection in-memory SQLite pool unless a file
//! path is given.

use kvdex::config::{Config, StorageConfig};
use kvdex::storage::Sqlite;
use kvdex::utils::bootstrap::connect_sqlite;
use kvdex::{AttributeTransform, AttributeType, IndexAttribute, KeyValueStore, Schema, SortDirection};

pub type Store = KeyValueStore<Sqlite>;

/// Open a fresh in-memory store.
pub async fn open_store() -> Store {
    open_store_with(StorageConfig::default()).await
}

/// Open a store on the given storage settings.
pub async fn open_store_with(storage: StorageConfig) -> Store {
    let config = Config {
        storage,
        ..Config::for_test()
    };
    let pool = connect_sqlite(&config.storage)
        .await
        .expect("Failed to connect to SQLite");
    Store::open(pool, &config)
        .await
        .expect("Failed to open store")
}

/// Devices with an enumerated power state, indexed by power.
pub fn device_schema() -> Schema {
    Schema::builder()
        .add_attribute("name", AttributeType::Utf8Smallstring, false)
        .add_enum_attribute("power", ["ON", "OFF"], false)
        .add_index("byPower", vec![IndexAttribute::ascending("power")], false)
        .build()
        .expect("device schema should be valid")
}

/// Users with a case-insensitive unique email.
pub fn user_schema() -> Schema {
    Schema::builder()
        .add_attribute("email", AttributeType::Utf8Smallstring, false)
        .add_attribute("age", AttributeType::U8, true)
        .add_index(
            "byEmail",
            vec![IndexAttribute::new(
                "email",
                SortDirection::Ascending,
                AttributeTransform::Lowercase,
            )],
            true,
        )
        .add_index(
            "byAge",
            vec![IndexAttribute::new(
                "age",
                SortDirection::Descending,
                AttributeTransform::None,
            )],
            false,
        )
        .build()
        .expect("user schema should be valid")
}

/// Items ranked by a small integer, with many duplicate ranks.
pub fn item_schema() -> Schema {
    Schema::builder()
        .add_attribute("rank", AttributeType::U32, false)
        .add_index("byRank", vec![IndexAttribute::ascending("rank")], false)
        .build()
        .expect("item schema should be valid")
}
