mod common;

use common::{ids, Fixture};
use elif_associations::{Includes, MemoryExecutor, OrmError};
use serde_json::json;

#[tokio::test]
async fn test_has_many_preload_issues_one_query() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "books").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&authors[0].cached_many("books")), vec![json!(10), json!(11)]);
    assert_eq!(ids(&authors[1].cached_many("books")), vec![json!(12)]);
    // No rows still counts as loaded
    assert!(authors[2].is_association_loaded("books"));
    assert!(authors[2].cached_many("books").is_empty());
}

#[tokio::test]
async fn test_many_owners_share_one_query() {
    let fixture = Fixture::new();
    fixture
        .executor
        .insert("authors", (1000..1500).map(|id| json!({"id": id, "name": "bulk"})));
    fixture.executor.insert(
        "books",
        (1000..1500).map(|id| json!({"id": id + 10_000, "author_id": id, "title": "bulk"})),
    );
    let authors = fixture.all("Author").await;
    assert_eq!(authors.len(), 503);

    fixture.session.preload(&authors, "books").await.unwrap();
    assert_eq!(fixture.executor.query_count(), 1);
    assert!(authors.iter().all(|author| author.is_association_loaded("books")));
    assert_eq!(authors[502].cached_many("books").len(), 1);
}

#[tokio::test]
async fn test_key_lists_are_chunked_by_executor_limit() {
    let fixture = Fixture::with_executor(MemoryExecutor::new().with_max_ids_in_list(Some(100)));
    fixture
        .executor
        .insert("authors", (1000..1500).map(|id| json!({"id": id, "name": "bulk"})));
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "books").await.unwrap();
    assert_eq!(fixture.executor.query_count(), 6);
    assert_eq!(authors[0].cached_many("books").len(), 2);
}

#[tokio::test]
async fn test_belongs_to_preload_shares_target_instances() {
    let fixture = Fixture::new();
    let books = fixture.all("Book").await;

    fixture.session.preload(&books, "author").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    let first = books[0].cached_one("author").unwrap();
    let second = books[1].cached_one("author").unwrap();
    assert!(first.ptr_eq(&second));
    // A null foreign key loads nil
    assert!(books[3].is_association_loaded("author"));
    assert!(books[3].cached_one("author").is_none());
}

#[tokio::test]
async fn test_preload_wires_inverse_to_owner() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "books").await.unwrap();

    for book in authors[0].cached_many("books") {
        assert!(book.cached_one("author").unwrap().ptr_eq(&authors[0]));
    }
    assert_eq!(fixture.executor.query_count(), 1);
}

#[tokio::test]
async fn test_has_one_keeps_first_match() {
    let fixture = Fixture::new();
    fixture
        .executor
        .insert("profiles", vec![json!({"id": 101, "author_id": 1, "bio": "Again"})]);
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "profile").await.unwrap();

    assert_eq!(authors[0].cached_one("profile").unwrap().get("id"), json!(100));
    assert!(authors[1].is_association_loaded("profile"));
    assert!(authors[1].cached_one("profile").is_none());
}

#[tokio::test]
async fn test_through_preload_dedupes_targets() {
    let fixture = Fixture::new();
    fixture
        .executor
        .insert("taggings", vec![json!({"id": 53, "post_id": 20, "tag_id": 40})]);
    let posts = fixture.all("Post").await;

    fixture.session.preload(&posts, "tags").await.unwrap();

    assert_eq!(ids(&posts[0].cached_many("tags")), vec![json!(40), json!(41)]);
    assert_eq!(ids(&posts[1].cached_many("tags")), vec![json!(40)]);
    assert!(posts[0].cached_many("tags")[0].ptr_eq(&posts[1].cached_many("tags")[0]));
    // taggings, then tags
    assert_eq!(fixture.executor.query_count(), 2);
    assert!(posts[0].is_association_loaded("taggings"));
}

#[tokio::test]
async fn test_habtm_preload_shares_targets_across_owners() {
    let fixture = Fixture::new();
    let posts = fixture.all("Post").await;

    fixture.session.preload(&posts, "categories").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&posts[0].cached_many("categories")), vec![json!(60), json!(61)]);
    let tech = &posts[1].cached_many("categories")[0];
    assert!(tech.ptr_eq(&posts[0].cached_many("categories")[1]));
    assert!(tech.get("ar_association_key_name").is_null());
}

#[tokio::test]
async fn test_polymorphic_preload_queries_each_target_model() {
    let fixture = Fixture::new();
    let pictures = fixture.all("Picture").await;

    fixture.session.preload(&pictures, "imageable").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 2);
    assert_eq!(pictures[0].cached_one("imageable").unwrap().model_name(), "Author");
    assert_eq!(pictures[2].cached_one("imageable").unwrap().get("title"), json!("Ulysses"));
    assert!(pictures[3].is_association_loaded("imageable"));
    assert!(pictures[3].cached_one("imageable").is_none());
}

#[tokio::test]
async fn test_as_association_filters_by_owner_type() {
    let fixture = Fixture::new();
    let books = fixture.all("Book").await;

    fixture.session.preload(&books, "pictures").await.unwrap();

    assert_eq!(ids(&books[0].cached_many("pictures")), vec![json!(71)]);
    assert!(books[1].cached_many("pictures").is_empty());
}

#[tokio::test]
async fn test_nested_includes_from_json() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;
    let includes = Includes::try_from(json!({"posts": ["comments", "tags"]})).unwrap();

    fixture.session.preload(&authors, includes).await.unwrap();

    let post = &authors[0].cached_many("posts")[0];
    assert_eq!(ids(&post.cached_many("comments")), vec![json!(30), json!(31)]);
    assert_eq!(ids(&post.cached_many("tags")), vec![json!(40), json!(41)]);
    // posts, comments, taggings, tags
    assert_eq!(fixture.executor.query_count(), 4);
}

#[tokio::test]
async fn test_scoped_association_preload() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "published_posts").await.unwrap();

    assert_eq!(ids(&authors[0].cached_many("published_posts")), vec![json!(20)]);
    assert!(authors[1].cached_many("published_posts").is_empty());
}

#[tokio::test]
async fn test_unknown_association_fails_before_any_query() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    let err = fixture
        .session
        .preload(&authors, vec!["books", "boks"])
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::AssociationNotFound { ref name, .. } if name == "boks"));
    assert!(err.is_configuration());
    assert_eq!(fixture.executor.query_count(), 0);
    assert!(!authors[0].is_association_loaded("books"));
}

#[tokio::test]
async fn test_loaded_associations_are_not_fetched_again() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "books").await.unwrap();
    fixture.session.preload(&authors, "books").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
}

#[tokio::test]
async fn test_has_one_through_preload() {
    let fixture = Fixture::new();
    let posts = fixture.all("Post").await;

    fixture.session.preload(&posts, "author_profile").await.unwrap();

    // authors, then profiles
    assert_eq!(fixture.executor.query_count(), 2);
    assert_eq!(posts[0].cached_one("author_profile").unwrap().get("id"), json!(100));
    assert!(posts[1].is_association_loaded("author_profile"));
    assert!(posts[1].cached_one("author_profile").is_none());
    assert_eq!(posts[1].cached_one("author").unwrap().get("id"), json!(2));
}

#[tokio::test]
async fn test_scoped_through_preload_does_not_cache_subset_on_through_records() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "first_comments").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 2);
    assert_eq!(ids(&authors[0].cached_many("first_comments")), vec![json!(30)]);
    assert!(authors[1].cached_many("first_comments").is_empty());

    let post = authors[0].cached_many("posts")[0].clone();
    assert!(!post.is_association_loaded("comments"));
    let comments = fixture
        .session
        .association(&post, "comments")
        .unwrap()
        .load(false)
        .await
        .unwrap();
    assert_eq!(ids(&comments.into_many()), vec![json!(30), json!(31)]);
}

#[tokio::test]
async fn test_scoped_through_preload_applies_scope_over_loaded_source() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;
    fixture.session.preload(&authors, "posts.comments").await.unwrap();
    fixture.executor.reset_log();

    fixture.session.preload(&authors, "first_comments").await.unwrap();

    // Only the scoped comments query; posts are already loaded
    assert_eq!(fixture.executor.query_count(), 1);
    assert_eq!(ids(&authors[0].cached_many("first_comments")), vec![json!(30)]);
    let post = &authors[0].cached_many("posts")[0];
    assert_eq!(ids(&post.cached_many("comments")), vec![json!(30), json!(31)]);
}

#[tokio::test]
async fn test_nested_through_preload() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "post_tags").await.unwrap();

    // posts, taggings, tags
    assert_eq!(fixture.executor.query_count(), 3);
    assert_eq!(ids(&authors[0].cached_many("post_tags")), vec![json!(40), json!(41)]);
    assert_eq!(ids(&authors[1].cached_many("post_tags")), vec![json!(40)]);
    assert!(authors[2].cached_many("post_tags").is_empty());
    assert!(authors[0].cached_many("post_tags")[0].ptr_eq(&authors[1].cached_many("post_tags")[0]));
}

#[tokio::test]
async fn test_source_type_through_preload() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;

    fixture.session.preload(&authors, "bookmarked_books").await.unwrap();

    // bookmarks of type Book, then books
    assert_eq!(fixture.executor.query_count(), 2);
    assert_eq!(ids(&authors[0].cached_many("bookmarked_books")), vec![json!(10), json!(11)]);
    assert_eq!(ids(&authors[1].cached_many("bookmarked_books")), vec![json!(12)]);
    assert!(authors[2].cached_many("bookmarked_books").is_empty());
    // The typed subset is not the whole bookmarks association
    assert!(!authors[0].is_association_loaded("bookmarks"));
}

#[tokio::test]
async fn test_source_type_through_preload_keeps_loaded_through_records() {
    let fixture = Fixture::new();
    let authors = fixture.all("Author").await;
    fixture.session.preload(&authors, "bookmarks").await.unwrap();

    fixture.session.preload(&authors, "bookmarked_books").await.unwrap();

    assert_eq!(authors[0].cached_many("bookmarks").len(), 4);
    assert_eq!(ids(&authors[0].cached_many("bookmarked_books")), vec![json!(10), json!(11)]);
    assert!(authors[0]
        .cached_many("bookmarked_books")
        .iter()
        .all(|book| book.model_name() == "Book"));
}

#[tokio::test]
async fn test_sti_subclasses_share_one_batch() {
    let fixture = Fixture::new();
    let members = fixture.all("Member").await;
    let models: Vec<&str> = members.iter().map(|member| member.model_name()).collect();
    assert_eq!(models, vec!["Admin", "Guest", "Member", "Guest"]);

    fixture.session.preload(&members, "author").await.unwrap();

    assert_eq!(fixture.executor.query_count(), 1);
    let admin_author = members[0].cached_one("author").unwrap();
    assert!(admin_author.ptr_eq(&members[2].cached_one("author").unwrap()));
    assert_eq!(members[1].cached_one("author").unwrap().get("id"), json!(2));
    assert!(members[3].is_association_loaded("author"));
    assert!(members[3].cached_one("author").is_none());
}
