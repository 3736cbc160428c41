//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value bound to a PostgreSQL statement. Ids always travel as text and are cast
/// in SQL (`$1::bigint`), so strings are never reinterpreted here.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Json(Value),
}

impl From<&Value> for PgBindValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => PgBindValue::I64(i),
                (None, Some(f)) => PgBindValue::F64(f),
                (None, None) => PgBindValue::Text(n.to_string()),
            },
            Value::String(s) => PgBindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<i32> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::Text(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::Text(_) => PgTypeInfo::with_name("TEXT"),
            PgBindValue::Bool(_) => PgTypeInfo::with_name("BOOL"),
            PgBindValue::I64(_) => PgTypeInfo::with_name("INT8"),
            PgBindValue::F64(_) => PgTypeInfo::with_name("FLOAT8"),
            PgBindValue::Json(_) => PgTypeInfo::with_name("JSONB"),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}
