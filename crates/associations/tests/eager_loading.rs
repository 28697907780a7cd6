mod common;

use common::{ids, Fixture};
use elif_associations::{ColumnRef, Includes, JoinKind, LoadStrategy, OrmError, Predicate};
use serde_json::json;

#[tokio::test]
async fn test_eager_load_builds_graph_from_one_query() {
    let fixture = Fixture::new();

    let authors = fixture
        .session
        .eager_load("Author", Vec::new(), vec!["books", "profile"])
        .await
        .unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&authors), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(ids(&authors[0].cached_many("books")), vec![json!(10), json!(11)]);
    assert_eq!(authors[0].cached_one("profile").unwrap().get("id"), json!(100));
    assert!(authors[1].is_association_loaded("profile"));
    assert!(authors[1].cached_one("profile").is_none());
    assert!(authors[2].is_association_loaded("books"));
    assert!(authors[2].cached_many("books").is_empty());

    let plan = &fixture.executor.executed_plans()[0];
    assert!(plan.joins.iter().all(|join| join.kind == JoinKind::LeftOuter));
}

#[tokio::test]
async fn test_eager_load_keeps_one_instance_per_row_identity() {
    let fixture = Fixture::new();

    let books = fixture
        .session
        .eager_load("Book", Vec::new(), "author")
        .await
        .unwrap();

    let first = books[0].cached_one("author").unwrap();
    let second = books[1].cached_one("author").unwrap();
    assert!(first.ptr_eq(&second));
    assert!(books[3].is_association_loaded("author"));
    assert!(books[3].cached_one("author").is_none());
}

#[tokio::test]
async fn test_nested_eager_load_wires_inverses() {
    let fixture = Fixture::new();

    let authors = fixture
        .session
        .eager_load("Author", Vec::new(), "posts.comments")
        .await
        .unwrap();

    let posts = authors[0].cached_many("posts");
    assert_eq!(ids(&posts), vec![json!(20)]);
    let comments = posts[0].cached_many("comments");
    let mut comment_ids = ids(&comments);
    comment_ids.sort_by_key(|id| id.as_i64());
    assert_eq!(comment_ids, vec![json!(30), json!(31)]);
    for comment in &comments {
        assert!(comment.cached_one("post").unwrap().ptr_eq(&posts[0]));
    }
}

#[tokio::test]
async fn test_fan_out_rows_do_not_duplicate_members() {
    let fixture = Fixture::new();

    let posts = fixture
        .session
        .eager_load("Post", Vec::new(), vec!["comments", "categories"])
        .await
        .unwrap();

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].cached_many("comments").len(), 2);
    assert_eq!(ids(&posts[0].cached_many("categories")), vec![json!(60), json!(61)]);
    assert_eq!(ids(&posts[1].cached_many("categories")), vec![json!(61)]);
}

#[tokio::test]
async fn test_through_eager_load() {
    let fixture = Fixture::new();
    fixture
        .executor
        .insert("taggings", vec![json!({"id": 53, "post_id": 20, "tag_id": 40})]);

    let posts = fixture.session.eager_load("Post", Vec::new(), "tags").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&posts[0].cached_many("tags")), vec![json!(40), json!(41)]);
    assert_eq!(ids(&posts[1].cached_many("tags")), vec![json!(40)]);
}

#[tokio::test]
async fn test_auto_strategy_joins_for_filters_on_included_tables() {
    let fixture = Fixture::new();

    let authors = fixture
        .session
        .find_all(
            "Author",
            vec![Predicate::eq(ColumnRef::new("books", "title"), "Dune")],
            "books",
            LoadStrategy::Auto,
        )
        .await
        .unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&authors), vec![json!(1)]);
    assert_eq!(ids(&authors[0].cached_many("books")), vec![json!(10)]);
}

#[tokio::test]
async fn test_auto_strategy_preloads_for_root_filters() {
    let fixture = Fixture::new();

    let authors = fixture
        .session
        .find_all(
            "Author",
            vec![Predicate::eq(ColumnRef::new("authors", "name"), "Ann")],
            "books",
            LoadStrategy::Auto,
        )
        .await
        .unwrap();

    assert_eq!(fixture.executor.query_count(), 2);
    assert!(fixture.executor.executed_plans()[0].joins.is_empty());
    assert_eq!(ids(&authors[0].cached_many("books")), vec![json!(10), json!(11)]);
}

#[tokio::test]
async fn test_join_aliases_are_deterministic() {
    let fixture = Fixture::new();
    let includes = Includes::try_from(json!({"posts": ["comments", "author", "tags"]})).unwrap();

    let first = fixture.session.join_dependency("Author", includes.clone()).unwrap();
    let second = fixture.session.join_dependency("Author", includes).unwrap();

    assert_eq!(first.to_plan().unwrap(), second.to_plan().unwrap());
    let aliases: Vec<_> = first
        .join_associations()
        .iter()
        .map(|part| part.aliased_table_name().to_string())
        .collect();
    assert_eq!(aliases, vec!["posts", "comments", "authors_posts", "tags"]);
}

#[tokio::test]
async fn test_polymorphic_eager_load_is_rejected_before_querying() {
    let fixture = Fixture::new();

    let err = fixture
        .session
        .find_all("Picture", Vec::new(), "imageable", LoadStrategy::EagerLoad)
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::EagerLoadPolymorphic(_)));
    assert_eq!(fixture.executor.query_count(), 0);
}

#[tokio::test]
async fn test_unknown_nested_name_fails_before_querying() {
    let fixture = Fixture::new();

    let err = fixture
        .session
        .eager_load("Author", Vec::new(), "posts.coments")
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::AssociationNotFound { ref model, .. } if model == "Post"));
    assert_eq!(fixture.executor.query_count(), 0);
}

#[tokio::test]
async fn test_unmatched_belongs_to_is_settled_without_a_later_query() {
    let fixture = Fixture::new();
    fixture
        .executor
        .insert("books", vec![json!({"id": 14, "author_id": 99, "title": "Orphan"})]);

    let books = fixture
        .session
        .eager_load("Book", Vec::new(), "author")
        .await
        .unwrap();
    let orphan = books.iter().find(|book| book.get("id") == json!(14)).unwrap();
    assert!(orphan.is_association_loaded("author"));

    let author = fixture.session.association(orphan, "author").unwrap();
    assert!(author.load(false).await.unwrap().into_one().is_none());
    assert_eq!(fixture.executor.query_count(), 1);
}

#[tokio::test]
async fn test_source_type_eager_load_filters_through_rows_in_join() {
    let fixture = Fixture::new();

    let authors = fixture
        .session
        .eager_load("Author", Vec::new(), "bookmarked_books")
        .await
        .unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&authors[0].cached_many("bookmarked_books")), vec![json!(10), json!(11)]);
    assert_eq!(ids(&authors[1].cached_many("bookmarked_books")), vec![json!(12)]);
    assert!(authors[2].cached_many("bookmarked_books").is_empty());

    let plan = &fixture.executor.executed_plans()[0];
    let bookmarks = plan
        .joins
        .iter()
        .find(|join| join.table.reference() == "bookmarks")
        .unwrap();
    assert!(bookmarks
        .on
        .contains(&Predicate::eq(ColumnRef::new("bookmarks", "bookmarkable_type"), "Book")));
}

#[tokio::test]
async fn test_nested_through_eager_load() {
    let fixture = Fixture::new();

    let authors = fixture
        .session
        .eager_load("Author", Vec::new(), "post_tags")
        .await
        .unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    // posts, taggings, tags
    assert_eq!(fixture.executor.executed_plans()[0].joins.len(), 3);
    assert_eq!(ids(&authors[0].cached_many("post_tags")), vec![json!(40), json!(41)]);
    assert_eq!(ids(&authors[1].cached_many("post_tags")), vec![json!(40)]);
    assert!(authors[2].is_association_loaded("post_tags"));
    assert!(authors[2].cached_many("post_tags").is_empty());
    assert!(authors[0].cached_many("post_tags")[0].ptr_eq(&authors[1].cached_many("post_tags")[0]));
}

#[tokio::test]
async fn test_has_one_through_eager_load() {
    let fixture = Fixture::new();

    let posts = fixture
        .session
        .eager_load("Post", Vec::new(), "author_profile")
        .await
        .unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(posts[0].cached_one("author_profile").unwrap().get("id"), json!(100));
    assert!(posts[1].is_association_loaded("author_profile"));
    assert!(posts[1].cached_one("author_profile").is_none());
}
