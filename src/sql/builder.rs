//! Builds parameterized statements for resource rows and to-many join tables.

use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from declarations, never from requests).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name; unqualified when no schema is given.
fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(table)),
        None => quoted(table),
    }
}

/// A table with a single-column primary key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub pk: String,
    /// PostgreSQL type of the key, used for `$n::type` casts (ids travel as text).
    pub pk_type: String,
}

impl TableRef {
    pub fn new(name: &str, pk: &str, pk_type: &str) -> Self {
        TableRef {
            schema: None,
            name: name.to_string(),
            pk: pk.to_string(),
            pk_type: pk_type.to_string(),
        }
    }

    pub fn in_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    fn qualified(&self) -> String {
        qualified_table(self.schema.as_deref(), &self.name)
    }
}

/// Join table linking a parent table to a child table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinTable {
    pub schema: Option<String>,
    pub name: String,
    pub parent: TableRef,
    pub parent_column: String,
    pub child: TableRef,
    pub child_column: String,
}

impl JoinTable {
    fn qualified(&self) -> String {
        qualified_table(self.schema.as_deref(), &self.name)
    }
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// SELECT list with the key cast to text so every id reads back as a string.
fn select_column_list(table: &TableRef, columns: &[&str]) -> String {
    std::iter::once(format!("{}::text AS {}", quoted(&table.pk), quoted(&table.pk)))
        .chain(columns.iter().filter(|c| **c != table.pk).map(|c| quoted(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT ... FOR UPDATE` on the parent row; run before reading the member set.
pub fn lock_parent(join: &JoinTable, parent_id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::String(parent_id.to_string()));
    q.sql = format!(
        "SELECT 1 FROM {} WHERE {} = ${}::{} FOR UPDATE",
        join.parent.qualified(),
        quoted(&join.parent.pk),
        n,
        join.parent.pk_type
    );
    q
}

/// Current member ids of one parent, as text.
pub fn select_members(join: &JoinTable, parent_id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::String(parent_id.to_string()));
    q.sql = format!(
        "SELECT {}::text FROM {} WHERE {} = ${}::{} ORDER BY 1",
        quoted(&join.child_column),
        join.qualified(),
        quoted(&join.parent_column),
        n,
        join.parent.pk_type
    );
    q
}

/// Existence probe for a child row.
pub fn child_exists(join: &JoinTable, child_id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::String(child_id.to_string()));
    q.sql = format!(
        "SELECT 1 FROM {} WHERE {} = ${}::{}",
        join.child.qualified(),
        quoted(&join.child.pk),
        n,
        join.child.pk_type
    );
    q
}

pub fn insert_member(join: &JoinTable, parent_id: &str, child_id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let p = q.push_param(Value::String(parent_id.to_string()));
    let c = q.push_param(Value::String(child_id.to_string()));
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (${}::{}, ${}::{}) ON CONFLICT DO NOTHING",
        join.qualified(),
        quoted(&join.parent_column),
        quoted(&join.child_column),
        p,
        join.parent.pk_type,
        c,
        join.child.pk_type
    );
    q
}

pub fn delete_member(join: &JoinTable, parent_id: &str, child_id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let p = q.push_param(Value::String(parent_id.to_string()));
    let c = q.push_param(Value::String(child_id.to_string()));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}::{} AND {} = ${}::{}",
        join.qualified(),
        quoted(&join.parent_column),
        p,
        join.parent.pk_type,
        quoted(&join.child_column),
        c,
        join.child.pk_type
    );
    q
}

/// SELECT by primary key. Caller-provided columns; the key is always included.
pub fn select_by_id(table: &TableRef, columns: &[&str], id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::String(id.to_string()));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = ${}::{}",
        select_column_list(table, columns),
        table.qualified(),
        quoted(&table.pk),
        n,
        table.pk_type
    );
    q
}

/// SELECT rows with optional exact-match filters, ordered by key.
pub fn select_list(table: &TableRef, columns: &[&str], filters: &[(&str, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut where_parts = Vec::new();
    for (col, val) in filters {
        let n = q.push_param(val.clone());
        where_parts.push(format!("{} = ${}", quoted(col), n));
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        select_column_list(table, columns),
        table.qualified(),
        where_clause,
        quoted(&table.pk)
    );
    q
}

/// INSERT from a JSON object's keys. With `id`, the key is supplied by the caller.
pub fn insert(table: &TableRef, columns: &[&str], body: &serde_json::Map<String, Value>, id: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    if let Some(id) = id {
        let n = q.push_param(Value::String(id.to_string()));
        cols.push(quoted(&table.pk));
        placeholders.push(format!("${}::{}", n, table.pk_type));
    }
    for (k, v) in body {
        if *k == table.pk || !columns.contains(&k.as_str()) {
            continue;
        }
        let n = q.push_param(v.clone());
        cols.push(quoted(k));
        placeholders.push(format!("${}", n));
    }
    let returning = select_column_list(table, columns);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table.qualified(), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table.qualified(),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by primary key, setting only declared columns present in `body`.
pub fn update(table: &TableRef, columns: &[&str], body: &serde_json::Map<String, Value>, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (k, v) in body {
        if *k == table.pk || !columns.contains(&k.as_str()) {
            continue;
        }
        let n = q.push_param(v.clone());
        sets.push(format!("{} = ${}", quoted(k), n));
    }
    let n = q.push_param(Value::String(id.to_string()));
    let returning = select_column_list(table, columns);
    q.sql = if sets.is_empty() {
        // Nothing to change; still return the row so callers can serialize it.
        format!(
            "SELECT {} FROM {} WHERE {} = ${}::{}",
            returning,
            table.qualified(),
            quoted(&table.pk),
            n,
            table.pk_type
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = ${}::{} RETURNING {}",
            table.qualified(),
            sets.join(", "),
            quoted(&table.pk),
            n,
            table.pk_type,
            returning
        )
    };
    q
}

pub fn delete_by_id(table: &TableRef, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::String(id.to_string()));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}::{}",
        table.qualified(),
        quoted(&table.pk),
        n,
        table.pk_type
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn posts_tags() -> JoinTable {
        JoinTable {
            schema: None,
            name: "posts_tags".into(),
            parent: TableRef::new("posts", "slug", "text"),
            parent_column: "post_slug".into(),
            child: TableRef::new("tags", "id", "bigint").in_schema("blog"),
            child_column: "tag_id".into(),
        }
    }

    #[test]
    fn lock_parent_is_for_update() {
        let q = lock_parent(&posts_tags(), "hello");
        assert_eq!(q.sql, r#"SELECT 1 FROM "posts" WHERE "slug" = $1::text FOR UPDATE"#);
        assert_eq!(q.params, vec![json!("hello")]);
    }

    #[test]
    fn member_statements_cast_both_keys() {
        let q = insert_member(&posts_tags(), "hello", "3");
        assert_eq!(
            q.sql,
            r#"INSERT INTO "posts_tags" ("post_slug", "tag_id") VALUES ($1::text, $2::bigint) ON CONFLICT DO NOTHING"#
        );
        let q = select_members(&posts_tags(), "hello");
        assert!(q.sql.starts_with(r#"SELECT "tag_id"::text FROM "posts_tags""#));
        let q = child_exists(&posts_tags(), "3");
        assert!(q.sql.contains(r#""blog"."tags""#));
    }

    #[test]
    fn insert_skips_undeclared_columns() {
        let authors = TableRef::new("authors", "id", "bigint");
        let body = json!({"name": "Ann", "is_admin": true});
        let q = insert(&authors, &["name", "email"], body.as_object().unwrap(), None);
        assert_eq!(
            q.sql,
            r#"INSERT INTO "authors" ("name") VALUES ($1) RETURNING "id"::text AS "id", "name", "email""#
        );
        assert_eq!(q.params, vec![json!("Ann")]);
    }

    #[test]
    fn update_without_changes_reads_back() {
        let authors = TableRef::new("authors", "id", "bigint");
        let q = update(&authors, &["name"], &serde_json::Map::new(), "1");
        assert!(q.sql.starts_with("SELECT "));
        assert_eq!(q.params, vec![json!("1")]);
    }
}
