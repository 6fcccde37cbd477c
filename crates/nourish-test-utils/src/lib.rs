//! Shared PostgreSQL for nourish integration tests.
//!
//! One server is shared per test binary; every test gets its own freshly
//! migrated database on it. With `NOURISH_TEST_PG_URL` set the external
//! server is used as-is, otherwise a container is started through
//! testcontainers on first use.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use nourish_db::models::{ActivityLevel, DietType, Goal, Sex, UserProfile};
use nourish_db::pool;
use nourish_db::queries::profiles::{self, NewProfile};

struct SharedServer {
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED: OnceCell<SharedServer> = OnceCell::const_new();

async fn start_server() -> SharedServer {
    if let Ok(url) = std::env::var("NOURISH_TEST_PG_URL") {
        return SharedServer {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedServer {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL (no database name).
pub async fn server_url() -> &'static str {
    &SHARED.get_or_init(start_server).await.base_url
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", server_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely named database. Call [`TestDb::drop_db`] at the end
/// of the test.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    /// Create a fresh database and apply all migrations.
    pub async fn create() -> Self {
        let name = format!("nourish_test_{}", Uuid::new_v4().simple());
        let maint = maintenance_pool().await;
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create test database {name}: {e}"));
        maint.close().await;

        let url = format!("{}/{name}", server_url().await);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to test database {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should succeed");

        Self { pool, name }
    }

    /// Close the pool, terminate stray connections and drop the database.
    pub async fn drop_db(self) {
        self.pool.close().await;
        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let _ = maint
            .execute(format!("DROP DATABASE IF EXISTS {}", self.name).as_str())
            .await;
        maint.close().await;
    }
}

/// Insert a weight-loss profile with a peanut allergy and a 50.0 budget.
pub async fn seed_profile(pool: &PgPool, user_id: &str) -> UserProfile {
    let allergies = vec!["peanut".to_owned()];
    let dislikes: Vec<String> = Vec::new();
    profiles::upsert_profile(
        pool,
        &NewProfile {
            user_id,
            display_name: None,
            age: 34,
            sex: Sex::Female,
            height_cm: 165.0,
            weight_kg: 72.0,
            goal_weight_kg: Some(65.0),
            activity: ActivityLevel::Light,
            goal: Goal::WeightLoss,
            diet_type: DietType::Omnivore,
            allergies: &allergies,
            dislikes: &dislikes,
            cuisine: None,
            budget_ceiling: 50.0,
            meals_per_day: 3,
            plan_days: 3,
        },
    )
    .await
    .expect("seed profile")
}
