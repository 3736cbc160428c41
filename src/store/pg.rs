//! PostgreSQL adapter: sqlx transactions, join-table relationship sets and row decoding.

use crate::config::{ExceptionClass, Exceptions};
use crate::error::HelperError;
use crate::model::Identifier;
use crate::sql::{self, JoinTable, PgBindValue, QueryBuf};
use crate::store::{Persistence, RelatedSet};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Row};
use std::collections::BTreeSet;
use std::str::FromStr;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Persistence for PgStore {
    type Tx = sqlx::Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, HelperError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), HelperError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), HelperError> {
        Ok(tx.rollback().await?)
    }
}

fn bind_all<'q>(
    q: &'q QueryBuf,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    query
}

/// Runs a statement, returning the first row decoded as attributes.
pub async fn fetch_one_attributes(
    conn: &mut PgConnection,
    q: &QueryBuf,
) -> Result<Option<Map<String, Value>>, sqlx::Error> {
    let row = bind_all(q).fetch_optional(&mut *conn).await?;
    Ok(row.map(|r| row_to_attributes(&r)))
}

pub async fn fetch_all_attributes(
    conn: &mut PgConnection,
    q: &QueryBuf,
) -> Result<Vec<Map<String, Value>>, sqlx::Error> {
    let rows = bind_all(q).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(row_to_attributes).collect())
}

pub async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, sqlx::Error> {
    Ok(bind_all(q).execute(&mut *conn).await?.rows_affected())
}

/// One to-many relationship backed by a join table.
#[derive(Clone, Debug)]
pub struct PgJoinSet {
    join: JoinTable,
    parent_id: String,
    child_type: String,
}

impl PgJoinSet {
    pub fn new(join: JoinTable, parent_id: impl Into<String>, child_type: impl Into<String>) -> Self {
        PgJoinSet {
            join,
            parent_id: parent_id.into(),
            child_type: child_type.into(),
        }
    }
}

#[async_trait]
impl RelatedSet<sqlx::Transaction<'static, Postgres>> for PgJoinSet {
    async fn lock(&self, tx: &mut sqlx::Transaction<'static, Postgres>) -> Result<(), HelperError> {
        let q = sql::lock_parent(&self.join, &self.parent_id);
        bind_all(&q)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(())
    }

    async fn current(
        &self,
        tx: &mut sqlx::Transaction<'static, Postgres>,
    ) -> Result<BTreeSet<Identifier>, HelperError> {
        let q = sql::select_members(&self.join, &self.parent_id);
        let rows = bind_all(&q).fetch_all(&mut **tx).await?;
        rows.iter()
            .map(|r| -> Result<Identifier, HelperError> {
                let id: String = r.try_get(0)?;
                Ok(Identifier::new(self.child_type.clone(), id))
            })
            .collect()
    }

    async fn add(
        &self,
        tx: &mut sqlx::Transaction<'static, Postgres>,
        member: &Identifier,
    ) -> Result<(), HelperError> {
        let q = sql::child_exists(&self.join, &member.id);
        bind_all(&q)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        let q = sql::insert_member(&self.join, &self.parent_id, &member.id);
        execute(&mut **tx, &q).await?;
        Ok(())
    }

    async fn remove(
        &self,
        tx: &mut sqlx::Transaction<'static, Postgres>,
        member: &Identifier,
    ) -> Result<(), HelperError> {
        let q = sql::delete_member(&self.join, &self.parent_id, &member.id);
        execute(&mut **tx, &q).await?;
        Ok(())
    }
}

/// sqlx error classes: missing rows are 404, constraint violations are 409 (on
/// conflict-eligible actions), check violations are 422.
pub fn configure_exceptions(exceptions: Exceptions) -> Exceptions {
    exceptions
        .not_found(ExceptionClass::matching::<sqlx::Error, _>(|e| {
            matches!(e, sqlx::Error::RowNotFound)
        }))
        .conflict(ExceptionClass::matching::<sqlx::Error, _>(|e| {
            e.as_database_error().map_or(false, |db| {
                db.is_unique_violation() || db.is_foreign_key_violation()
            })
        }))
        .validation(ExceptionClass::matching::<sqlx::Error, _>(|e| {
            e.as_database_error().map_or(false, |db| {
                db.is_check_violation() || db.code().as_deref() == Some("23502")
            })
        }))
}

pub fn row_to_attributes(row: &sqlx::postgres::PgRow) -> Map<String, Value> {
    use sqlx::Column;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Creates the database named in `database_url` if it does not exist yet.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn: PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), sqlx::Error> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| sqlx::Error::Configuration("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
