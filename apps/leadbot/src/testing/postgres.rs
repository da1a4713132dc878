//! Shared Postgres container for the store tests.
//!
//! The container starts once per test binary and migrations run once; every
//! test gets its own pool. Without a container runtime `pool()` returns `None`
//! and the Postgres tests return early.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedPostgres {
    url: String,
    // Keeps the container alive for the whole test run
    _container: ContainerAsync<Postgres>,
}

static SHARED: OnceCell<Option<SharedPostgres>> = OnceCell::const_new();

async fn start() -> Option<SharedPostgres> {
    let container = match Postgres::default().with_tag("16").start().await {
        Ok(container) => container,
        Err(e) => {
            eprintln!("Postgres container unavailable, skipping store tests: {e}");
            return None;
        }
    };
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container port");
    let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

    let pool = PgPool::connect(&url)
        .await
        .expect("connect to test Postgres");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    pool.close().await;

    Some(SharedPostgres {
        url,
        _container: container,
    })
}

/// A fresh pool on the shared, migrated database.
pub async fn pool() -> Option<PgPool> {
    let shared = SHARED.get_or_init(start).await.as_ref()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&shared.url)
        .await
        .expect("connect to test Postgres");
    Some(pool)
}
