//! Blog resources over PostgreSQL: authors, posts (slug ids), tags and comments.
//!
//! Callers identify with `X-Author: <author id>`. Access rules live in `policy.json`.

use jsonapi_sdk::reconcile::{self, SetOp};
use jsonapi_sdk::sql::{self, JoinTable, TableRef};
use jsonapi_sdk::store::pg::{execute, fetch_all_attributes, fetch_one_attributes};
use jsonapi_sdk::store::PgJoinSet;
use jsonapi_sdk::{
    Ctx, EngineBuilder, FieldError, HelperError, Identifier, Linkage, Model, PgStore, RoleSet,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

type Blog = Ctx<PgStore>;

#[derive(Debug, thiserror::Error)]
#[error("{field} {message}")]
pub struct Invalid {
    pub field: &'static str,
    pub message: &'static str,
}

/// Field errors for the 422 document.
pub fn field_errors(err: &HelperError) -> Vec<FieldError> {
    err.downcast_ref::<Invalid>()
        .map(|i| vec![FieldError::new(Some(i.field), i.message)])
        .unwrap_or_default()
}

fn authors() -> TableRef {
    TableRef::new("authors", "id", "bigint")
}

fn posts() -> TableRef {
    TableRef::new("posts", "slug", "text")
}

fn tags() -> TableRef {
    TableRef::new("tags", "id", "bigint")
}

fn comments() -> TableRef {
    TableRef::new("comments", "id", "bigint")
}

fn posts_tags() -> JoinTable {
    JoinTable {
        schema: None,
        name: "posts_tags".into(),
        parent: posts(),
        parent_column: "post_slug".into(),
        child: tags(),
        child_column: "tag_id".into(),
    }
}

const AUTHOR_COLUMNS: &[&str] = &["name"];
const POST_COLUMNS: &[&str] = &["title", "body", "author_id"];
const TAG_COLUMNS: &[&str] = &["name"];
const COMMENT_COLUMNS: &[&str] = &["body", "post_slug", "author_id"];

fn key(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn row_model(kind: &str, pk: &str, mut attributes: Map<String, Value>) -> Model {
    let id = key(attributes.remove(pk)).unwrap_or_default();
    let mut model = Model::new(kind, id);
    model.attributes = attributes;
    model
}

/// Moves a foreign-key column out of the attributes into to-one linkage.
fn belongs_to(mut model: Model, rel: &str, column: &str, kind: &str) -> Model {
    let target = key(model.attributes.remove(column)).map(|id| Identifier::new(kind, id));
    model.has_one(rel, target)
}

fn author_of(post: &Model) -> Option<&Identifier> {
    match post.linkage("author") {
        Some(Linkage::One(Some(author))) => Some(author),
        _ => None,
    }
}

fn current(ctx: &Blog) -> Result<Arc<Model>, HelperError> {
    ctx.resource().ok_or_else(|| HelperError::msg("resource not resolved"))
}

fn caller(ctx: &Blog) -> Option<String> {
    ctx.headers()
        .get("x-author")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn load_post(ctx: &Blog, attributes: Map<String, Value>) -> Result<Model, HelperError> {
    let post = belongs_to(row_model("posts", "slug", attributes), "author", "author_id", "authors");
    let mut conn = ctx.store().pool().acquire().await?;
    let q = sql::select_members(&posts_tags(), &post.id);
    let tag_ids: Vec<Identifier> = fetch_all_attributes(&mut conn, &q)
        .await?
        .into_iter()
        .filter_map(|row| row.into_iter().next().and_then(|(_, v)| key(Some(v))))
        .map(|id| Identifier::new("tags", id))
        .collect();
    Ok(post.has_many("tags", tag_ids))
}

async fn find_author(ctx: Blog, id: String) -> Result<Option<Model>, HelperError> {
    let mut conn = ctx.store().pool().acquire().await?;
    let row = fetch_one_attributes(&mut conn, &sql::select_by_id(&authors(), AUTHOR_COLUMNS, &id)).await?;
    Ok(row.map(|r| row_model("authors", "id", r)))
}

async fn list_authors(ctx: Blog, _: ()) -> Result<Vec<Model>, HelperError> {
    let mut conn = ctx.store().pool().acquire().await?;
    let rows = fetch_all_attributes(&mut conn, &sql::select_list(&authors(), AUTHOR_COLUMNS, &[])).await?;
    Ok(rows.into_iter().map(|r| row_model("authors", "id", r)).collect())
}

async fn create_author(ctx: Blog, attributes: Map<String, Value>) -> Result<(String, Model), HelperError> {
    let mut tx = ctx.tx().await?;
    let q = sql::insert(&authors(), AUTHOR_COLUMNS, &attributes, None);
    let row = fetch_one_attributes(&mut tx, &q)
        .await?
        .ok_or_else(|| HelperError::msg("insert returned no row"))?;
    let author = row_model("authors", "id", row);
    Ok((author.id.clone(), author))
}

async fn update_author(ctx: Blog, attributes: Map<String, Value>) -> Result<Option<Model>, HelperError> {
    let author = current(&ctx)?;
    let mut tx = ctx.tx().await?;
    let q = sql::update(&authors(), AUTHOR_COLUMNS, &attributes, &author.id);
    let row = fetch_one_attributes(&mut tx, &q).await?;
    Ok(row.map(|r| row_model("authors", "id", r)))
}

async fn author_posts(ctx: Blog, _: ()) -> Result<Vec<Model>, HelperError> {
    let author = current(&ctx)?;
    let rows = {
        let mut conn = ctx.store().pool().acquire().await?;
        let q = sql::select_list(&posts(), POST_COLUMNS, &[("author_id", Value::from(author.id.parse::<i64>()?))]);
        fetch_all_attributes(&mut conn, &q).await?
    };
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(load_post(&ctx, row).await?);
    }
    Ok(out)
}

async fn find_post(ctx: Blog, slug: String) -> Result<Option<Model>, HelperError> {
    let row = {
        let mut conn = ctx.store().pool().acquire().await?;
        fetch_one_attributes(&mut conn, &sql::select_by_id(&posts(), POST_COLUMNS, &slug)).await?
    };
    match row {
        Some(row) => Ok(Some(load_post(&ctx, row).await?)),
        None => Ok(None),
    }
}

async fn list_posts(ctx: Blog, _: ()) -> Result<Vec<Model>, HelperError> {
    let rows = {
        let mut conn = ctx.store().pool().acquire().await?;
        fetch_all_attributes(&mut conn, &sql::select_list(&posts(), POST_COLUMNS, &[])).await?
    };
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(load_post(&ctx, row).await?);
    }
    Ok(out)
}

/// The author comes in through the `author` relationship, never as an attribute.
async fn create_post(
    ctx: Blog,
    (mut attributes, slug): (Map<String, Value>, String),
) -> Result<(String, Model), HelperError> {
    attributes.remove("author_id");
    let mut tx = ctx.tx().await?;
    let q = sql::insert(&posts(), POST_COLUMNS, &attributes, Some(&slug));
    let row = fetch_one_attributes(&mut tx, &q)
        .await?
        .ok_or_else(|| HelperError::msg("insert returned no row"))?;
    let post = belongs_to(row_model("posts", "slug", row), "author", "author_id", "authors");
    Ok((slug, post))
}

async fn update_post(ctx: Blog, mut attributes: Map<String, Value>) -> Result<bool, HelperError> {
    attributes.remove("author_id");
    let post = current(&ctx)?;
    let mut tx = ctx.tx().await?;
    let q = sql::update(&posts(), POST_COLUMNS, &attributes, &post.id);
    Ok(fetch_one_attributes(&mut tx, &q).await?.is_some())
}

async fn destroy_post(ctx: Blog, _: ()) -> Result<(), HelperError> {
    let post = current(&ctx)?;
    let mut tx = ctx.tx().await?;
    execute(&mut tx, &sql::delete_by_id(&posts(), &post.id)).await?;
    Ok(())
}

async fn validate_post(ctx: Blog) -> Result<(), HelperError> {
    let post = current(&ctx)?;
    let mut tx = ctx.tx().await?;
    let row = fetch_one_attributes(&mut tx, &sql::select_by_id(&posts(), POST_COLUMNS, &post.id))
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    let blank = row
        .get("title")
        .and_then(Value::as_str)
        .map_or(true, |t| t.trim().is_empty());
    if blank {
        return Err(Invalid { field: "title", message: "must not be blank" }.into());
    }
    if matches!(row.get("author_id"), None | Some(Value::Null)) {
        return Err(Invalid { field: "author", message: "must be present" }.into());
    }
    Ok(())
}

async fn post_author(ctx: Blog, _: ()) -> Result<Option<Model>, HelperError> {
    let post = current(&ctx)?;
    match author_of(&post) {
        Some(author) => find_author(ctx.clone(), author.id.clone()).await,
        None => Ok(None),
    }
}

async fn graft_author(ctx: Blog, author: Identifier) -> Result<bool, HelperError> {
    let post = current(&ctx)?;
    let mut attributes = Map::new();
    attributes.insert("author_id".into(), Value::from(author.id.parse::<i64>()?));
    let mut tx = ctx.tx().await?;
    let q = sql::update(&posts(), POST_COLUMNS, &attributes, &post.id);
    fetch_one_attributes(&mut tx, &q)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(author_of(&post) != Some(&author))
}

async fn post_tags(ctx: Blog, _: ()) -> Result<Vec<Model>, HelperError> {
    let post = current(&ctx)?;
    let ids = match post.linkage("tags") {
        Some(Linkage::Many(ids)) => ids.clone(),
        _ => Vec::new(),
    };
    let mut conn = ctx.store().pool().acquire().await?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let q = sql::select_by_id(&tags(), TAG_COLUMNS, &id.id);
        if let Some(row) = fetch_one_attributes(&mut conn, &q).await? {
            out.push(row_model("tags", "id", row));
        }
    }
    Ok(out)
}

/// Tags named `staff-*` are only attached or detached by superusers.
async fn reconcile_tags(ctx: Blog, op: SetOp, ids: Vec<Identifier>) -> Result<bool, HelperError> {
    let post = current(&ctx)?;
    let superuser = ctx.has_role("superuser").await?;
    let staff: BTreeSet<Identifier> = list_tags(ctx.clone(), ())
        .await?
        .into_iter()
        .filter(|t| t.attribute("name").and_then(Value::as_str).is_some_and(|n| n.starts_with("staff-")))
        .map(|t| t.identifier())
        .collect();
    let set = PgJoinSet::new(posts_tags(), post.id.clone(), "tags");
    let mut tx = ctx.tx().await?;
    let delta = reconcile::apply(&set, &mut *tx, op, &ids, |t| superuser || !staff.contains(t)).await?;
    Ok(!delta.is_empty())
}

async fn find_tag(ctx: Blog, id: String) -> Result<Option<Model>, HelperError> {
    let mut conn = ctx.store().pool().acquire().await?;
    let row = fetch_one_attributes(&mut conn, &sql::select_by_id(&tags(), TAG_COLUMNS, &id)).await?;
    Ok(row.map(|r| row_model("tags", "id", r)))
}

async fn list_tags(ctx: Blog, _: ()) -> Result<Vec<Model>, HelperError> {
    let mut conn = ctx.store().pool().acquire().await?;
    let rows = fetch_all_attributes(&mut conn, &sql::select_list(&tags(), TAG_COLUMNS, &[])).await?;
    Ok(rows.into_iter().map(|r| row_model("tags", "id", r)).collect())
}

async fn create_tag(ctx: Blog, attributes: Map<String, Value>) -> Result<(String, Model), HelperError> {
    let mut tx = ctx.tx().await?;
    let row = fetch_one_attributes(&mut tx, &sql::insert(&tags(), TAG_COLUMNS, &attributes, None))
        .await?
        .ok_or_else(|| HelperError::msg("insert returned no row"))?;
    let tag = row_model("tags", "id", row);
    Ok((tag.id.clone(), tag))
}

fn comment_model(row: Map<String, Value>) -> Model {
    let comment = row_model("comments", "id", row);
    let comment = belongs_to(comment, "post", "post_slug", "posts");
    belongs_to(comment, "author", "author_id", "authors")
}

async fn find_comment(ctx: Blog, id: String) -> Result<Option<Model>, HelperError> {
    let mut conn = ctx.store().pool().acquire().await?;
    let row = fetch_one_attributes(&mut conn, &sql::select_by_id(&comments(), COMMENT_COLUMNS, &id)).await?;
    Ok(row.map(comment_model))
}

async fn list_comments(ctx: Blog, _: ()) -> Result<Vec<Model>, HelperError> {
    let mut conn = ctx.store().pool().acquire().await?;
    let rows = fetch_all_attributes(&mut conn, &sql::select_list(&comments(), COMMENT_COLUMNS, &[])).await?;
    Ok(rows.into_iter().map(comment_model).collect())
}

/// Comments are signed by the caller.
async fn create_comment(ctx: Blog, mut attributes: Map<String, Value>) -> Result<(String, Model), HelperError> {
    attributes.remove("post_slug");
    let me = caller(&ctx).ok_or_else(|| HelperError::msg("anonymous comment"))?;
    attributes.insert("author_id".into(), Value::from(me.parse::<i64>()?));
    let mut tx = ctx.tx().await?;
    let row = fetch_one_attributes(&mut tx, &sql::insert(&comments(), COMMENT_COLUMNS, &attributes, None))
        .await?
        .ok_or_else(|| HelperError::msg("insert returned no row"))?;
    let comment = comment_model(row);
    Ok((comment.id.clone(), comment))
}

async fn graft_comment_post(ctx: Blog, post: Identifier) -> Result<bool, HelperError> {
    let comment = current(&ctx)?;
    let mut attributes = Map::new();
    attributes.insert("post_slug".into(), Value::String(post.id.clone()));
    let mut tx = ctx.tx().await?;
    let q = sql::update(&comments(), COMMENT_COLUMNS, &attributes, &comment.id);
    fetch_one_attributes(&mut tx, &q)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(true)
}

/// `logged_in` for any caller, `superuser` for ids in `admins`, `myself` on the caller's
/// own author record and `owner` on posts the caller wrote.
pub async fn roles(ctx: Blog, admins: Arc<BTreeSet<String>>) -> Result<RoleSet, HelperError> {
    let mut roles = RoleSet::new();
    let Some(me) = caller(&ctx) else {
        return Ok(roles);
    };
    roles.insert("logged_in");
    if admins.contains(&me) {
        roles.insert("superuser");
    }
    if let Some(resource) = ctx.resource() {
        match resource.kind.as_str() {
            "authors" if resource.id == me => {
                roles.insert("myself");
            }
            "posts" if author_of(&resource).is_some_and(|a| a.id == me) => {
                roles.insert("owner");
            }
            _ => {}
        }
    }
    Ok(roles)
}

pub fn declare(builder: EngineBuilder<PgStore>) -> EngineBuilder<PgStore> {
    builder
        .resource("authors", |r| {
            r.find(find_author);
            r.index(list_authors);
            r.create(create_author);
            r.update(update_author);
            r.has_many("posts", |rel| {
                rel.related("posts");
                rel.fetch(author_posts);
            });
        })
        .resource("posts", |r| {
            r.id_pattern("[a-z0-9-]+");
            r.find(find_post);
            r.index(list_posts);
            r.create(create_post);
            r.update(update_post);
            r.destroy(destroy_post);
            r.validate(validate_post);
            r.has_one("author", |rel| {
                rel.related("authors");
                rel.pluck(post_author);
                rel.graft(graft_author);
            });
            r.has_many("tags", |rel| {
                rel.related("tags");
                rel.fetch(post_tags);
                rel.replace(|ctx: Blog, ids| reconcile_tags(ctx, SetOp::Replace, ids));
                rel.merge(|ctx: Blog, ids| reconcile_tags(ctx, SetOp::Merge, ids));
                rel.subtract(|ctx: Blog, ids| reconcile_tags(ctx, SetOp::Subtract, ids));
            });
        })
        .resource("tags", |r| {
            r.find(find_tag);
            r.index(list_tags);
            r.create(create_tag);
        })
        .resource("comments", |r| {
            r.find(find_comment);
            r.index(list_comments);
            r.create(create_comment);
            r.has_one("post", |rel| {
                rel.related("posts");
                rel.graft(graft_comment_post);
            });
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn foreign_keys_become_linkage() {
        let row = json!({"slug": "hello", "title": "Hi", "author_id": 7});
        let Value::Object(row) = row else { unreachable!() };
        let post = belongs_to(row_model("posts", "slug", row), "author", "author_id", "authors");
        assert_eq!(post.id, "hello");
        assert!(post.attribute("author_id").is_none());
        assert_eq!(author_of(&post), Some(&Identifier::new("authors", "7")));
    }

    #[test]
    fn invalid_maps_to_field_error() {
        let err: HelperError = Invalid { field: "title", message: "must not be blank" }.into();
        let errors = field_errors(&err);
        assert_eq!(errors.len(), 1);
    }
}
