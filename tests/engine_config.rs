//! Boot-time declaration checks.

use jsonapi_sdk::{
    parse_policy, Action, ActionOptions, ConfigError, Engine, HelperError, MemoryStore, Model, Scope, Settings,
};

fn find(ctx: jsonapi_sdk::Ctx<MemoryStore>, id: String) -> impl std::future::Future<Output = Result<Option<Model>, HelperError>> {
    async move { Ok(ctx.store().get("posts", &id)) }
}

#[test]
fn duplicate_resources_are_rejected() {
    let err = Engine::builder(MemoryStore::new())
        .resource("posts", |r| {
            r.find(find);
        })
        .resource("posts", |r| {
            r.find(find);
        })
        .build()
        .err()
        .expect("duplicate resource");
    assert!(matches!(err, ConfigError::DuplicatePathSegment(p) if p == "posts"));
}

#[test]
fn member_actions_need_a_finder() {
    let err = Engine::builder(MemoryStore::new())
        .resource("posts", |r| {
            r.destroy(|_ctx, ()| async { Ok::<_, HelperError>(()) });
        })
        .build()
        .err()
        .expect("destroy without find");
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn policy_must_name_declared_relationships() {
    let policy = parse_policy(r#"{"resources": {"posts": {"has_many": {"tags": {"fetch": {}}}}}}"#).unwrap();
    let err = Engine::builder(MemoryStore::new())
        .policy(policy)
        .resource("posts", |r| {
            r.find(find);
        })
        .build()
        .err()
        .expect("undeclared relationship");
    assert!(matches!(err, ConfigError::UnknownRelationship { .. }));
}

#[test]
fn sideload_on_needs_a_helper() {
    let err = Engine::builder(MemoryStore::new())
        .resource("posts", |r| {
            r.find(find);
            r.has_one("author", |rel| {
                rel.configure(Action::Graft, ActionOptions::default().sideload_on([Action::Create]));
            });
        })
        .build()
        .err()
        .expect("sideload_on without graft");
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn defaults_apply_to_every_resource() {
    let engine = Engine::builder(MemoryStore::new())
        .default_action(Scope::Resource, Action::Destroy, ActionOptions::default().roles(["admin"]))
        .resource("posts", |r| {
            r.find(find);
        })
        .build()
        .unwrap();
    let cfg = engine
        .config()
        .lookup(jsonapi_sdk::config::Target::Resource("posts"), Action::Destroy)
        .unwrap();
    assert!(cfg.roles.contains("admin"));
}

#[test]
fn zero_page_sizes_are_rejected() {
    let build = |settings: Settings| {
        Engine::builder(MemoryStore::new())
            .settings(settings)
            .resource("posts", |r| {
                r.find(find);
            })
            .build()
    };

    let err = build(Settings::default().with_page_size(0)).err().expect("zero page size");
    assert!(matches!(err, ConfigError::Validation(_)));

    let err = build(Settings {
        max_page_size: 0,
        ..Settings::default()
    })
    .err()
    .expect("zero max page size");
    assert!(matches!(err, ConfigError::Validation(_)));

    let err = build(Settings {
        page_size: Some(50),
        max_page_size: 10,
        ..Settings::default()
    })
    .err()
    .expect("page size above max");
    assert!(matches!(err, ConfigError::Validation(_)));

    assert!(build(Settings::default().with_page_size(10)).is_ok());
}
