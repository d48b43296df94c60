//! PostgreSQL storage integration tests using testcontainers.
//!
//! Run with: cargo test --test storage_postgres --features postgres -- --nocapture
//!
//! These tests spin up PostgreSQL in a container and run the store against it.

use std::time::Duration;

use serde_json::json;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

use kvdex::config::{Config, PostgresConfig, StorageConfig, StorageType};
use kvdex::storage::Postgres;
use kvdex::utils::bootstrap::connect_postgres;
use kvdex::{
    AttributeTransform, AttributeType, IndexAttribute, IndexQuery, Key, KeyValueStore, QueryTerm,
    Schema, SortDirection, StoreError,
};

/// Start PostgreSQL container.
///
/// Returns (container, connection_string).
async fn start_postgres() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ));

    let container = image
        .with_env_var("POSTGRES_USER", "kvdex")
        .with_env_var("POSTGRES_PASSWORD", "kvdex")
        .with_env_var("POSTGRES_DB", "kvdex")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    // PostgreSQL logs readiness once during init and again when serving.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let host_port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let connection_string = format!("postgres://kvdex:kvdex@{}:{}/kvdex", host, host_port);
    println!("PostgreSQL available at: {}", connection_string);

    (container, connection_string)
}

async fn open_store(uri: String) -> KeyValueStore<Postgres> {
    let config = Config {
        storage: StorageConfig {
            storage_type: StorageType::Postgres,
            postgres: PostgresConfig { uri },
            ..StorageConfig::default()
        },
        ..Config::for_test()
    };
    let pool = connect_postgres(&config.storage)
        .await
        .expect("Failed to connect to PostgreSQL");
    KeyValueStore::<Postgres>::open(pool, &config)
        .await
        .expect("Failed to open store")
}

fn account_schema() -> Schema {
    Schema::builder()
        .add_attribute("handle", AttributeType::Utf8Smallstring, false)
        .add_enum_attribute("tier", ["FREE", "PAID"], false)
        .add_index(
            "byHandle",
            vec![IndexAttribute::new(
                "handle",
                SortDirection::Ascending,
                AttributeTransform::Lowercase,
            )],
            true,
        )
        .add_index("byTier", vec![IndexAttribute::ascending("tier")], false)
        .build()
        .expect("account schema should be valid")
}

async fn tier_ids(store: &KeyValueStore<Postgres>, query: IndexQuery) -> Vec<u64> {
    store
        .query("account", "byTier", query)
        .await
        .expect("tier query should succeed")
        .keys
        .iter()
        .map(Key::id)
        .collect()
}

#[tokio::test]
async fn test_postgres_store() {
    println!("=== PostgreSQL KeyValueStore Tests ===");
    let (_container, connection_string) = start_postgres().await;
    let store = open_store(connection_string).await;

    store
        .create_schema("account", account_schema())
        .await
        .expect("create_schema should succeed");

    for (handle, tier) in [("ann", "PAID"), ("bo", "FREE"), ("cy", "PAID"), ("di", "PAID")] {
        store
            .create("account", &json!({"handle": handle, "tier": tier}))
            .await
            .expect("create should succeed");
    }

    // Unique conflicts roll the primary row back.
    let err = store
        .create("account", &json!({"handle": "ANN", "tier": "FREE"}))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniquenessConflict { .. }), "{err}");

    let page = store
        .query(
            "account",
            "byHandle",
            IndexQuery::new(vec![QueryTerm::eq("handle", "Cy")]),
        )
        .await
        .unwrap();
    assert_eq!(page.keys, vec![Key::new("account", 3)]);

    let paid = IndexQuery::new(vec![QueryTerm::eq("tier", "PAID")]);
    assert_eq!(tier_ids(&store, paid.clone()).await, vec![1, 3, 4]);
    assert_eq!(
        tier_ids(&store, paid.clone().direction(SortDirection::Descending)).await,
        vec![4, 3, 1]
    );

    let first = store
        .query("account", "byTier", paid.clone().page_size(2))
        .await
        .unwrap();
    assert_eq!(first.keys.len(), 2);
    let token = first.next_token.expect("second page");
    assert_eq!(tier_ids(&store, paid.clone().page_size(2).token(token)).await, vec![4]);

    assert!(store.quarantine("account:3").await.unwrap());
    assert_eq!(tier_ids(&store, paid.clone()).await, vec![1, 4]);
    assert_eq!(
        tier_ids(&store, paid.clone().include_quarantined(true)).await,
        vec![1, 3, 4]
    );
    assert!(store.release("account:3").await.unwrap());

    assert!(store.delete("account:1").await.unwrap());
    assert_eq!(store.retrieve("account:1").await.unwrap(), None);
    assert_eq!(tier_ids(&store, paid).await, vec![3, 4]);

    assert_eq!(store.clear("account").await.unwrap(), 4);
    assert!(store.drop_schema("account").await.unwrap());

    println!("=== All PostgreSQL KeyValueStore tests PASSED ===");
}
