//! Shared fixtures: a small blog/library schema over seeded in-memory tables

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use elif_associations::{
    AssociationCallback, AssociationOptions, Condition, Includes, LoadStrategy, MemoryExecutor, ModelBuilder,
    OrderDirection, OrmError, OrmResult, Record, Schema, Scope, Session,
};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};

/// Records callback invocations on `Author#books`
#[derive(Default)]
pub struct CallbackLog {
    pub events: Mutex<Vec<String>>,
    pub veto_adds: AtomicBool,
}

impl CallbackLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: &str, record: &Record) {
        self.events.lock().push(format!("{}:{}", event, record.get("id")));
    }
}

impl AssociationCallback for CallbackLog {
    fn before_add(&self, _owner: &Record, record: &Record) -> OrmResult<()> {
        if self.veto_adds.load(Ordering::SeqCst) {
            return Err(OrmError::CallbackAborted("adds are vetoed".into()));
        }
        self.push("before_add", record);
        Ok(())
    }

    fn after_add(&self, _owner: &Record, record: &Record) -> OrmResult<()> {
        self.push("after_add", record);
        Ok(())
    }

    fn before_remove(&self, _owner: &Record, record: &Record) -> OrmResult<()> {
        self.push("before_remove", record);
        Ok(())
    }

    fn after_remove(&self, _owner: &Record, record: &Record) -> OrmResult<()> {
        self.push("after_remove", record);
        Ok(())
    }
}

pub struct Fixture {
    pub session: Session,
    pub executor: Arc<MemoryExecutor>,
    pub callbacks: Arc<CallbackLog>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_executor(MemoryExecutor::new())
    }

    pub fn with_executor(executor: MemoryExecutor) -> Self {
        init_tracing();
        let callbacks = Arc::new(CallbackLog::default());
        let executor = Arc::new(executor);
        seed(&executor);
        let session = Session::new(schema(callbacks.clone()), executor.clone());
        Self {
            session,
            executor,
            callbacks,
        }
    }

    /// Every record of `model`, without includes; the query log is reset afterwards
    pub async fn all(&self, model: &str) -> Vec<Record> {
        let records = self
            .session
            .find_all(model, Vec::new(), Includes::none(), LoadStrategy::Preload)
            .await
            .unwrap();
        self.executor.reset_log();
        records
    }

    /// The record of `model` with primary key `id`
    pub async fn find(&self, model: &str, id: i64) -> Record {
        self.all(model)
            .await
            .into_iter()
            .find(|record| record.get("id") == json!(id))
            .unwrap()
    }
}

/// Log to the test writer; filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ids(records: &[Record]) -> Vec<JsonValue> {
    records.iter().map(|record| record.get("id")).collect()
}

pub fn schema(callbacks: Arc<CallbackLog>) -> Schema {
    let schema = Schema::default();
    schema
        .define(
            ModelBuilder::new("Author")
                .columns(["id", "name"])
                .has_many("books", AssociationOptions::new().callback(callbacks))
                .has_one("profile", AssociationOptions::new())
                .has_many("posts", AssociationOptions::new())
                .has_many("comments", AssociationOptions::new().through("posts"))
                .has_many("pictures", AssociationOptions::new().as_("imageable"))
                .has_many(
                    "published_posts",
                    AssociationOptions::new()
                        .class_name("Post")
                        .scope(Scope::conditions(vec![Condition::eq("published", true)])),
                )
                .has_many(
                    "first_comments",
                    AssociationOptions::new()
                        .through("posts")
                        .source("comments")
                        .scope(Scope::conditions(vec![Condition::eq("body", "first")])),
                )
                .has_many("post_tags", AssociationOptions::new().through("posts").source("tags"))
                .has_many("bookmarks", AssociationOptions::new())
                .has_many(
                    "bookmarked_books",
                    AssociationOptions::new()
                        .through("bookmarks")
                        .source("bookmarkable")
                        .source_type("Book"),
                ),
        )
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Book")
                .columns(["id", "author_id", "title"])
                .belongs_to("author", AssociationOptions::new())
                .has_many("pictures", AssociationOptions::new().as_("imageable")),
        )
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Profile")
                .columns(["id", "author_id", "bio"])
                .belongs_to("author", AssociationOptions::new()),
        )
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Post")
                .columns(["id", "author_id", "title", "published"])
                .belongs_to("author", AssociationOptions::new())
                .has_many("comments", AssociationOptions::new().order("id", OrderDirection::Asc))
                .has_many("taggings", AssociationOptions::new())
                .has_many("tags", AssociationOptions::new().through("taggings"))
                .has_and_belongs_to_many("categories", AssociationOptions::new())
                .has_one("author_profile", AssociationOptions::new().through("author").source("profile")),
        )
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Comment")
                .columns(["id", "post_id", "body"])
                .belongs_to("post", AssociationOptions::new()),
        )
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Tagging")
                .columns(["id", "post_id", "tag_id"])
                .belongs_to("post", AssociationOptions::new())
                .belongs_to("tag", AssociationOptions::new()),
        )
        .unwrap();
    schema
        .define(ModelBuilder::new("Tag").columns(["id", "name"]))
        .unwrap();
    schema
        .define(ModelBuilder::new("Category").columns(["id", "name"]))
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Picture")
                .columns(["id", "imageable_id", "imageable_type"])
                .belongs_to("imageable", AssociationOptions::new().polymorphic()),
        )
        .unwrap();
    schema
        .define(
            ModelBuilder::new("Bookmark")
                .columns(["id", "author_id", "bookmarkable_id", "bookmarkable_type"])
                .belongs_to("author", AssociationOptions::new())
                .belongs_to("bookmarkable", AssociationOptions::new().polymorphic()),
        )
        .unwrap();
    // Single-table inheritance: admins and guests live in `members`
    schema
        .define(
            ModelBuilder::new("Member")
                .columns(["id", "type", "author_id", "name"])
                .belongs_to("author", AssociationOptions::new()),
        )
        .unwrap();
    schema
        .define(ModelBuilder::new("Admin").inherits("Member"))
        .unwrap();
    schema
        .define(ModelBuilder::new("Guest").inherits("Member"))
        .unwrap();
    schema
}

pub fn seed(executor: &MemoryExecutor) {
    executor.insert(
        "authors",
        vec![
            json!({"id": 1, "name": "Ann"}),
            json!({"id": 2, "name": "Bo"}),
            json!({"id": 3, "name": "Cy"}),
        ],
    );
    executor.insert(
        "books",
        vec![
            json!({"id": 10, "author_id": 1, "title": "Dune"}),
            json!({"id": 11, "author_id": 1, "title": "Emma"}),
            json!({"id": 12, "author_id": 2, "title": "Ulysses"}),
            json!({"id": 13, "author_id": null, "title": "Beowulf"}),
        ],
    );
    executor.insert("profiles", vec![json!({"id": 100, "author_id": 1, "bio": "Writes"})]);
    executor.insert(
        "posts",
        vec![
            json!({"id": 20, "author_id": 1, "title": "Hello", "published": true}),
            json!({"id": 21, "author_id": 2, "title": "World", "published": false}),
        ],
    );
    executor.insert(
        "comments",
        vec![
            json!({"id": 31, "post_id": 20, "body": "second"}),
            json!({"id": 30, "post_id": 20, "body": "first"}),
            json!({"id": 32, "post_id": 21, "body": "other"}),
        ],
    );
    executor.insert(
        "tags",
        vec![json!({"id": 40, "name": "rust"}), json!({"id": 41, "name": "orm"})],
    );
    executor.insert(
        "taggings",
        vec![
            json!({"id": 50, "post_id": 20, "tag_id": 40}),
            json!({"id": 51, "post_id": 20, "tag_id": 41}),
            json!({"id": 52, "post_id": 21, "tag_id": 40}),
        ],
    );
    executor.insert(
        "categories",
        vec![json!({"id": 60, "name": "news"}), json!({"id": 61, "name": "tech"})],
    );
    executor.insert(
        "categories_posts",
        vec![
            json!({"post_id": 20, "category_id": 60}),
            json!({"post_id": 20, "category_id": 61}),
            json!({"post_id": 21, "category_id": 61}),
        ],
    );
    executor.insert(
        "pictures",
        vec![
            json!({"id": 70, "imageable_id": 1, "imageable_type": "Author"}),
            json!({"id": 71, "imageable_id": 10, "imageable_type": "Book"}),
            json!({"id": 72, "imageable_id": 12, "imageable_type": "Book"}),
            json!({"id": 73, "imageable_id": null, "imageable_type": null}),
        ],
    );
    executor.insert(
        "bookmarks",
        vec![
            json!({"id": 80, "author_id": 1, "bookmarkable_id": 10, "bookmarkable_type": "Book"}),
            json!({"id": 81, "author_id": 1, "bookmarkable_id": 20, "bookmarkable_type": "Post"}),
            json!({"id": 82, "author_id": 2, "bookmarkable_id": 12, "bookmarkable_type": "Book"}),
            json!({"id": 83, "author_id": 1, "bookmarkable_id": 11, "bookmarkable_type": "Book"}),
            json!({"id": 84, "author_id": 1, "bookmarkable_id": 10, "bookmarkable_type": "Book"}),
        ],
    );
    executor.insert(
        "members",
        vec![
            json!({"id": 90, "type": "Admin", "author_id": 1, "name": "root"}),
            json!({"id": 91, "type": "Guest", "author_id": 2, "name": "visitor"}),
            json!({"id": 92, "type": "Member", "author_id": 1, "name": "regular"}),
            json!({"id": 93, "type": "Guest", "author_id": null, "name": "anonymous"}),
        ],
    );
}
