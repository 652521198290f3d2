use chrono::{TimeZone, Utc};
use blog_cms::models::{
    EXCERPT_CHARS, Post, PostChanges, PostRow, PostSummary, Role, User, excerpt, slugify,
};
use serde_json::json;
use uuid::Uuid;

// --- Test Utilities ---

fn sample_row(content: &str) -> PostRow {
    let created = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    PostRow {
        id: Uuid::new_v4(),
        title: "Hello World".to_string(),
        content: content.to_string(),
        category: "news".to_string(),
        image: String::new(),
        image_id: String::new(),
        author_id: Uuid::new_v4(),
        author_name: Some("Ada".to_string()),
        author_email: Some("ada@example.com".to_string()),
        slug: "hello-world".to_string(),
        published: true,
        created_at: created,
        updated_at: created,
    }
}

// --- Derived fields ---

#[test]
fn test_slugify() {
    assert_eq!(slugify("Hello World!"), "hello-world");
    assert_eq!(slugify("Rust  &  Go"), "rust-go");
    assert_eq!(slugify("snake_case Title 2"), "snake_case-title-2");
    assert_eq!(slugify("Café Olé"), "caf-ol");
    assert_eq!(slugify("!!!"), "");
}

#[test]
fn test_excerpt_short_content_is_unchanged() {
    assert_eq!(excerpt("short", EXCERPT_CHARS), "short");
    assert_eq!(excerpt(&"a".repeat(150), EXCERPT_CHARS), "a".repeat(150));
}

#[test]
fn test_excerpt_truncates_and_flattens_line_breaks() {
    let long = format!("line one\r\n\nline two{}", "x".repeat(200));
    let result = excerpt(&long, EXCERPT_CHARS);

    assert!(result.starts_with("line one line two"));
    assert!(result.ends_with("..."));
    assert_eq!(result.chars().count(), EXCERPT_CHARS + 3);
    assert!(!result.contains('\n') && !result.contains('\r'));
}

#[test]
fn test_excerpt_counts_characters_not_bytes() {
    let result = excerpt(&"é".repeat(151), EXCERPT_CHARS);
    assert_eq!(result.chars().count(), 153);
}

// --- Row mapping ---

#[test]
fn test_post_row_expands_author_and_tags() {
    let row = sample_row("Body");
    let author_id = row.author_id;
    let post = Post::from(row);

    assert_eq!(post.tags, vec!["news"]);
    assert_eq!(post.author.id, author_id);
    assert_eq!(post.author.name, "Ada");
}

#[test]
fn test_post_row_with_missing_author_degrades_to_empty_fields() {
    let mut row = sample_row("Body");
    row.author_name = None;
    row.author_email = None;
    let post = Post::from(row);

    assert_eq!(post.author.name, "");
    assert_eq!(post.author.email, "");
}

// --- Wire format ---

#[test]
fn test_post_serializes_with_wire_names() {
    let post = Post::from(sample_row("Body"));
    let value = serde_json::to_value(&post).unwrap();

    assert_eq!(value["_id"], json!(post.id));
    assert_eq!(value["imageId"], "");
    assert_eq!(value["createdAt"], "2025-01-02T03:04:05Z");
    assert!(value["updatedAt"].is_string());
    assert_eq!(value["author"]["_id"], json!(post.author.id));
    assert!(value.get("id").is_none());
    assert!(value.get("image_id").is_none());
}

#[test]
fn test_post_summary_flattens_post_and_adds_excerpt() {
    let summary = PostSummary::from(Post::from(sample_row(&"y".repeat(400))));
    let value = serde_json::to_value(&summary).unwrap();

    assert_eq!(value["title"], "Hello World");
    assert_eq!(value["content"].as_str().unwrap().len(), 400);
    assert_eq!(value["excerpt"].as_str().unwrap().chars().count(), 153);
    assert!(value.get("post").is_none());
}

#[test]
fn test_user_serialization_hides_nothing_secret() {
    let user = User {
        id: Uuid::new_v4(),
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        role: Role::Admin,
    };
    let value = serde_json::to_value(&user).unwrap();

    assert_eq!(value["role"], "admin");
    assert!(value["_id"].is_string());
    assert_eq!(value.as_object().unwrap().len(), 4);
}

#[test]
fn test_role_parse_degrades_unknown_values() {
    assert_eq!(Role::parse("admin"), Role::Admin);
    assert_eq!(Role::parse("user"), Role::User);
    assert_eq!(Role::parse("superuser"), Role::User);
    assert_eq!(Role::Admin.as_str(), "admin");
}

#[test]
fn test_post_changes_emptiness() {
    assert!(PostChanges::default().is_empty());
    let changes = PostChanges {
        published: Some(false),
        ..PostChanges::default()
    };
    assert!(!changes.is_empty());
}
