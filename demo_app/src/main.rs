//! Blog API on PostgreSQL.
//!
//! Run from repo root: `cargo run -p jsonapi-demo`
//! Environment: `DATABASE_URL`, `BIND_ADDR`, `POLICY_PATH`, `ADMIN_AUTHORS` (comma separated
//! author ids) and the `JSONAPI_*` settings.

mod blog;

use jsonapi_sdk::{
    common_routes, configure_exceptions, ensure_database_exists, load_policy_file, Engine, PgStore,
    Settings,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::net::TcpListener;

const MIGRATION: &str = include_str!("../migrations/0001_blog.sql");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jsonapi_sdk=info,jsonapi_demo=info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/blog".into());
    ensure_database_exists(&database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    sqlx::raw_sql(MIGRATION).execute(&pool).await?;

    let policy_path = std::env::var("POLICY_PATH").unwrap_or_else(|_| "demo_app/policy.json".into());
    let policy = load_policy_file(&policy_path)?;
    let admins: Arc<BTreeSet<String>> = Arc::new(
        std::env::var("ADMIN_AUTHORS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    );

    let settings = Settings::from_env()?;
    let exceptions = configure_exceptions(settings.exceptions.clone())
        .validation(jsonapi_sdk::ExceptionClass::of::<blog::Invalid>())
        .validation_formatter(blog::field_errors);
    let settings = Settings {
        progname: "blog".into(),
        ..settings
    }
    .with_exceptions(exceptions);

    let builder = Engine::builder(PgStore::new(pool))
        .settings(settings)
        .policy(policy)
        .role(move |ctx| blog::roles(ctx, admins.clone()));
    let engine = blog::declare(builder).build()?;

    let app = common_routes().merge(engine.router());
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("blog listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
