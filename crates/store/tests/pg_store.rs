use std::time::Duration;

use parcelgate_contracts::{FilterBounds, IdentityKey};
use parcelgate_store::{FilterMemory, PgFilterStore};

fn test_db_url() -> Option<String> {
    std::env::var("PARCELGATE_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pg_store_upserts_last_write_wins() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping postgres filter store test; set PARCELGATE_TEST_DB_URL to enable");
        return;
    };

    let store = PgFilterStore::connect(&db_url, Duration::from_secs(2))
        .await
        .expect("DB connect should succeed");
    store
        .ensure_schema()
        .await
        .expect("schema creation should succeed");
    store
        .ensure_schema()
        .await
        .expect("schema creation should be idempotent");

    let memory = FilterMemory::new(std::sync::Arc::new(store.clone()));
    let key = IdentityKey::new(format!("pg-test-{}", ulid::Ulid::new()));

    let first = FilterBounds {
        min_price: Some(100000.0),
        ..FilterBounds::default()
    };
    let second = FilterBounds {
        max_sqft: Some(3000.0),
        ..FilterBounds::default()
    };

    memory.save(&key, &first).await.expect("save should succeed");
    memory.save(&key, &second).await.expect("save should succeed");

    assert_eq!(
        memory.load(&key).await.expect("load should succeed"),
        Some(second)
    );
    assert_eq!(
        memory
            .load(&IdentityKey::new("pg-test-missing"))
            .await
            .expect("load should succeed"),
        None
    );

    store.close().await;
}
