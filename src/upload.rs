//! Post body parsing.
//!
//! Mutating post routes accept `multipart/form-data` (with an optional `image`
//! file), a urlencoded form, or a JSON object. Both are reduced to a `PostForm`, which is then
//! validated into a store payload. The body is only read after authorization.

use std::{collections::HashMap, path::Path};

use axum::{
    body::Bytes,
    Form,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header},
};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{NewPost, PostChanges, TITLE_MAX_CHARS, slugify},
};

/// The only multipart field allowed to carry a file.
pub const IMAGE_FIELD: &str = "image";

/// UploadError
///
/// Rejections raised while reading an attached file. Reported to the client as
/// `400 File upload error: <message>`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Only image files are allowed (jpeg, jpg, png, gif, webp)")]
    UnsupportedType,
    #[error("File too large")]
    TooLarge,
    #[error("Unexpected field")]
    UnexpectedField(String),
    #[error("{0}")]
    Malformed(String),
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge
        } else {
            UploadError::Malformed(err.body_text())
        }
    }
}

/// ImageKind
///
/// The accepted image formats. A file is accepted only when its extension and its
/// declared MIME type resolve to the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            "webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        // Drop parameters such as `; charset=...`.
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/gif" => Some(ImageKind::Gif),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }
}

/// detect_kind
///
/// Resolves the image kind from the client filename and declared content type.
pub fn detect_kind(filename: &str, content_type: &str) -> Result<ImageKind, UploadError> {
    let by_extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageKind::from_extension)
        .ok_or(UploadError::UnsupportedType)?;
    let by_mime = ImageKind::from_mime_type(content_type).ok_or(UploadError::UnsupportedType)?;

    if by_extension != by_mime {
        return Err(UploadError::UnsupportedType);
    }
    Ok(by_extension)
}

/// ImageUpload
///
/// A validated, fully buffered image ready for the object store.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub kind: ImageKind,
    pub bytes: Bytes,
}

/// normalize_published
///
/// `true` and `"true"` are true; every other value, including absence, is false.
pub fn normalize_published(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

/// PostForm
///
/// The raw, unvalidated content of a post mutation body.
#[derive(Debug, Default)]
pub struct PostForm {
    pub fields: HashMap<String, Value>,
    pub image: Option<ImageUpload>,
}

impl PostForm {
    /// parse
    ///
    /// Reads the request body. Multipart bodies are streamed field by field and the
    /// image size ceiling is enforced per chunk, so an oversized file is rejected
    /// before it is fully buffered.
    pub async fn parse(request: Request, max_upload_bytes: usize) -> Result<Self, ApiError> {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(request, &())
                .await
                .map_err(|rejection| UploadError::Malformed(rejection.body_text()))?;
            return Ok(Self::from_multipart(multipart, max_upload_bytes).await?);
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
                .await
                .map_err(|rejection| ApiError::validation(rejection.body_text()))?;
            return Ok(Self {
                fields: fields
                    .into_iter()
                    .map(|(name, value)| (name, Value::String(value)))
                    .collect(),
                image: None,
            });
        }

        let body = Bytes::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::validation(rejection.body_text()))?;
        Self::from_json(&body)
    }

    /// Parses a JSON object body. An empty body is an empty form.
    pub fn from_json(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let object: serde_json::Map<String, Value> = serde_json::from_slice(body)
            .map_err(|e| ApiError::validation(format!("Invalid JSON body: {}", e)))?;

        Ok(Self {
            fields: object.into_iter().collect(),
            image: None,
        })
    }

    async fn from_multipart(
        mut multipart: Multipart,
        max_upload_bytes: usize,
    ) -> Result<Self, UploadError> {
        let mut form = PostForm::default();

        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            let Some(filename) = field.file_name().map(str::to_string) else {
                let text = field.text().await?;
                form.fields.insert(name, Value::String(text));
                continue;
            };

            if name != IMAGE_FIELD || form.image.is_some() {
                return Err(UploadError::UnexpectedField(name));
            }

            // Browsers submit an empty, unnamed part when no file was chosen.
            let kind = if filename.is_empty() {
                None
            } else {
                let content_type = field.content_type().unwrap_or_default().to_string();
                Some(detect_kind(&filename, &content_type)?)
            };

            let mut buffer = Vec::new();
            while let Some(chunk) = field.chunk().await? {
                if buffer.len() + chunk.len() > max_upload_bytes {
                    return Err(UploadError::TooLarge);
                }
                buffer.extend_from_slice(&chunk);
            }

            match kind {
                Some(kind) => {
                    form.image = Some(ImageUpload {
                        filename,
                        kind,
                        bytes: Bytes::from(buffer),
                    });
                }
                None if buffer.is_empty() => {}
                None => return Err(UploadError::UnsupportedType),
            }
        }

        Ok(form)
    }

    /// Text value of a field as sent, if present and non-null.
    fn text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Titles are stored trimmed; body text is stored verbatim.
    fn title(&self) -> Option<String> {
        self.text("title").map(|title| title.trim().to_string())
    }

    fn published(&self) -> Option<&Value> {
        self.fields.get("published").filter(|value| !value.is_null())
    }

    /// validate_create
    ///
    /// Requires title, content and category. The image is returned separately so
    /// the caller can upload it before writing the post.
    pub fn validate_create(self, author_id: Uuid) -> Result<(NewPost, Option<ImageUpload>), ApiError> {
        let title = self.title().unwrap_or_default();
        let content = self.text("content").unwrap_or_default();
        let category = self.text("category").unwrap_or_default();

        let mut errors = Vec::new();
        if title.is_empty() {
            errors.push("Please provide a title".to_string());
        }
        if is_blank(&content) {
            errors.push("Please provide content".to_string());
        }
        if is_blank(&category) {
            errors.push("Please provide a category".to_string());
        }
        if !errors.is_empty() {
            return Err(ApiError::validation_with_errors(
                "Please provide title, content, and category",
                errors,
            ));
        }
        check_title_length(&title)?;

        let post = NewPost {
            slug: slugify(&title),
            title,
            content,
            category,
            image: String::new(),
            image_id: String::new(),
            published: normalize_published(self.published()),
            author_id,
        };
        Ok((post, self.image))
    }

    /// validate_update
    ///
    /// Only `title`, `content`, `category` and `published` are updatable; other
    /// keys (including `author`) are ignored. A new title recomputes the slug.
    pub fn validate_update(self) -> Result<(PostChanges, Option<ImageUpload>), ApiError> {
        let mut changes = PostChanges::default();
        let mut errors = Vec::new();

        if let Some(title) = self.title() {
            if title.is_empty() {
                errors.push("Title cannot be empty".to_string());
            } else {
                check_title_length(&title)?;
                changes.slug = Some(slugify(&title));
                changes.title = Some(title);
            }
        }
        if let Some(content) = self.text("content") {
            if is_blank(&content) {
                errors.push("Content cannot be empty".to_string());
            } else {
                changes.content = Some(content);
            }
        }
        if let Some(category) = self.text("category") {
            if is_blank(&category) {
                errors.push("Category cannot be empty".to_string());
            } else {
                changes.category = Some(category);
            }
        }
        if let Some(published) = self.published() {
            changes.published = Some(normalize_published(Some(published)));
        }

        if !errors.is_empty() {
            return Err(ApiError::validation_with_errors("Validation Error", errors));
        }
        if changes.is_empty() && self.image.is_none() {
            return Err(ApiError::validation(
                "Please provide at least one field to update",
            ));
        }
        Ok((changes, self.image))
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn check_title_length(title: &str) -> Result<(), ApiError> {
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(ApiError::validation_with_errors(
            "Validation Error",
            vec![format!("Title cannot exceed {} characters", TITLE_MAX_CHARS)],
        ));
    }
    Ok(())
}
