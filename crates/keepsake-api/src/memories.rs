use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{error, info, warn};

use keepsake_db::models::{MemoryImageRow, MemoryRow};
use keepsake_types::api::{Claims, DeleteResponse, MemoryImageResponse, MemoryResponse};

use crate::auth::AppStateInner;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

/// Fields of the create/update multipart form. Everything is optional at
/// parse time; create enforces the title requirement afterwards.
#[derive(Default)]
struct MemoryForm {
    title: Option<String>,
    note: Option<String>,
    files: Vec<(String, Bytes)>,
    image_urls: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<MemoryForm, ApiError> {
    let mut form = MemoryForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = Some(field_text(field).await?),
            "note" => form.note = Some(field_text(field).await?),
            "image_urls" => form.image_urls = Some(field_text(field).await?),
            "images" => {
                // A file input left empty still submits a part, with no filename.
                let filename = field.file_name().unwrap_or_default().to_string();
                if filename.is_empty() {
                    continue;
                }
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unreadable file part: {e}")))?;
                form.files.push((filename, content));
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable form field: {e}")))
}

/// POST /memories — insert the row, then attach uploads and direct URLs.
pub async fn create_memory(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;

    let title = form
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingField("title"))?;

    let db = state.clone();
    let owner = claims.sub;
    let note = form.note.clone();
    let memory =
        tokio::task::spawn_blocking(move || db.db.insert_memory(owner, &title, note.as_deref()))
            .await
            .map_err(join_err)??;

    attach_images(&state, memory.id, form.files, form.image_urls.as_deref()).await?;

    memory_response(&state, memory).await.map(Json)
}

/// GET /memories?skip=&limit= — the caller's memories with images eagerly
/// batch-fetched (one query, not one per memory).
pub async fn list_memories(
    State(state): State<Arc<AppStateInner>>,
    Query(query): Query<ListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let owner = claims.sub;
    let skip = query.skip;
    let limit = query.limit.min(200);

    let (rows, image_rows) = tokio::task::spawn_blocking(move || {
        let rows = db.db.list_memories(owner, skip, limit)?;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let image_rows = db.db.get_images_for_memories(&ids)?;
        Ok::<_, anyhow::Error>((rows, image_rows))
    })
    .await
    .map_err(join_err)??;

    let mut by_memory: HashMap<i64, Vec<MemoryImageRow>> = HashMap::new();
    for image in image_rows {
        by_memory.entry(image.memory_id).or_default().push(image);
    }

    let memories: Vec<MemoryResponse> = rows
        .into_iter()
        .map(|row| {
            let images = by_memory.remove(&row.id).unwrap_or_default();
            to_response(row, images)
        })
        .collect();

    Ok(Json(memories))
}

/// PUT /memories/{id} — partial update: provided fields overwrite, absent
/// fields stay, new attachments append. Existing images are never removed.
pub async fn update_memory(
    State(state): State<Arc<AppStateInner>>,
    Path(memory_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;
    let owner = claims.sub;

    if let Some(title) = form.title.as_deref() {
        if title.trim().is_empty() {
            return Err(ApiError::MissingField("title"));
        }
    }

    // Ownership check before any write.
    let db = state.clone();
    if tokio::task::spawn_blocking(move || db.db.get_memory(owner, memory_id))
        .await
        .map_err(join_err)??
        .is_none()
    {
        return Err(ApiError::NotFound("Memory not found"));
    }

    if form.title.is_some() || form.note.is_some() {
        let db = state.clone();
        let title = form.title.clone();
        let note = form.note.clone();
        tokio::task::spawn_blocking(move || {
            db.db
                .update_memory_fields(owner, memory_id, title.as_deref(), note.as_deref())
        })
        .await
        .map_err(join_err)??;
    }

    attach_images(&state, memory_id, form.files, form.image_urls.as_deref()).await?;

    let db = state.clone();
    let row = tokio::task::spawn_blocking(move || db.db.get_memory(owner, memory_id))
        .await
        .map_err(join_err)??
        .ok_or(ApiError::NotFound("Memory not found"))?;

    memory_response(&state, row).await.map(Json)
}

/// DELETE /memories/{id} — removes the memory and all child images in one
/// transaction.
pub async fn delete_memory(
    State(state): State<Arc<AppStateInner>>,
    Path(memory_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let owner = claims.sub;
    let deleted = tokio::task::spawn_blocking(move || db.db.delete_memory(owner, memory_id))
        .await
        .map_err(join_err)??;

    if !deleted {
        return Err(ApiError::NotFound("Memory not found"));
    }

    Ok(Json(DeleteResponse {
        message: "Memory deleted".into(),
    }))
}

/// DELETE /memories/images/{id} — ownership checked via image → memory →
/// owner before the row is touched.
pub async fn delete_image(
    State(state): State<Arc<AppStateInner>>,
    Path(image_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let owner = tokio::task::spawn_blocking(move || db.db.image_owner(image_id))
        .await
        .map_err(join_err)??;

    if owner != Some(claims.sub) {
        return Err(ApiError::NotFound("Image not found or access denied"));
    }

    let db = state.clone();
    tokio::task::spawn_blocking(move || db.db.delete_image(image_id))
        .await
        .map_err(join_err)??;

    Ok(Json(DeleteResponse {
        message: "Image deleted successfully".into(),
    }))
}

/// Upload each file and record the returned URLs, plus any caller-supplied
/// URLs, as child image rows. A failed upload is logged and skipped: the
/// memory keeps whatever attachments succeeded. Applies to create and update
/// alike.
async fn attach_images(
    state: &Arc<AppStateInner>,
    memory_id: i64,
    files: Vec<(String, Bytes)>,
    image_urls: Option<&str>,
) -> Result<(), ApiError> {
    for (filename, content) in files {
        info!("Uploading image {} for memory {}", filename, memory_id);
        match state.images.upload(&filename, content).await {
            Ok(url) => insert_image_row(state, memory_id, &url).await?,
            Err(e) => {
                error!("Upload failed for {}: {}; attachment skipped", filename, e);
            }
        }
    }

    if let Some(raw) = image_urls {
        for url in parse_image_urls(raw) {
            insert_image_row(state, memory_id, &url).await?;
        }
    }

    Ok(())
}

fn parse_image_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

async fn insert_image_row(
    state: &Arc<AppStateInner>,
    memory_id: i64,
    url: &str,
) -> Result<(), ApiError> {
    let db = state.clone();
    let url = url.to_string();
    tokio::task::spawn_blocking(move || db.db.insert_image(memory_id, &url))
        .await
        .map_err(join_err)??;
    Ok(())
}

async fn memory_response(
    state: &Arc<AppStateInner>,
    row: MemoryRow,
) -> Result<MemoryResponse, ApiError> {
    let db = state.clone();
    let ids = vec![row.id];
    let images = tokio::task::spawn_blocking(move || db.db.get_images_for_memories(&ids))
        .await
        .map_err(join_err)??;
    Ok(to_response(row, images))
}

fn to_response(row: MemoryRow, images: Vec<MemoryImageRow>) -> MemoryResponse {
    MemoryResponse {
        id: row.id,
        title: row.title,
        note: row.note,
        images: images
            .into_iter()
            .map(|i| MemoryImageResponse { id: i.id, url: i.url })
            .collect(),
        created_at: parse_created_at(&row.created_at, row.id),
    }
}

fn parse_created_at(raw: &str, memory_id: i64) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on memory {}: {}", raw, memory_id, e);
            chrono::DateTime::default()
        })
}

fn join_err(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{ImageHost, UploadError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted upload gateway: fails on the listed call numbers (1-based),
    /// otherwise returns a URL derived from the filename.
    struct ScriptedHost {
        fail_on: Vec<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageHost for ScriptedHost {
        async fn upload(&self, filename: &str, _content: Bytes) -> Result<String, UploadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                Err(UploadError::Rejected(format!("scripted failure for {filename}")))
            } else {
                Ok(format!("https://cdn.example/{filename}"))
            }
        }
    }

    fn state_with(fail_on: Vec<usize>) -> Arc<AppStateInner> {
        Arc::new(AppStateInner {
            db: keepsake_db::Database::open_in_memory().unwrap(),
            jwt_secret: "dev-secret-change-me".into(),
            images: Arc::new(ScriptedHost {
                fail_on,
                calls: AtomicUsize::new(0),
            }),
        })
    }

    fn memory_for(state: &Arc<AppStateInner>) -> i64 {
        let owner = state.db.create_user("alice", "hash").unwrap();
        state.db.insert_memory(owner, "Trip", None).unwrap().id
    }

    #[tokio::test]
    async fn attach_records_files_plus_urls() {
        let state = state_with(vec![]);
        let memory_id = memory_for(&state);

        let files = vec![
            ("a.jpg".to_string(), Bytes::from_static(b"aa")),
            ("b.jpg".to_string(), Bytes::from_static(b"bb")),
        ];
        attach_images(&state, memory_id, files, Some("https://x.example/1.png, https://x.example/2.png"))
            .await
            .unwrap();

        let mut urls: Vec<String> = state
            .db
            .get_images_for_memories(&[memory_id])
            .unwrap()
            .into_iter()
            .map(|i| i.url)
            .collect();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/a.jpg",
                "https://cdn.example/b.jpg",
                "https://x.example/1.png",
                "https://x.example/2.png",
            ]
        );
    }

    #[tokio::test]
    async fn failed_upload_is_skipped_not_fatal() {
        let state = state_with(vec![2]);
        let memory_id = memory_for(&state);

        let files = vec![
            ("one.jpg".to_string(), Bytes::from_static(b"1")),
            ("two.jpg".to_string(), Bytes::from_static(b"2")),
            ("three.jpg".to_string(), Bytes::from_static(b"3")),
        ];
        attach_images(&state, memory_id, files, None).await.unwrap();

        let mut urls: Vec<String> = state
            .db
            .get_images_for_memories(&[memory_id])
            .unwrap()
            .into_iter()
            .map(|i| i.url)
            .collect();
        urls.sort();
        assert_eq!(
            urls,
            vec!["https://cdn.example/one.jpg", "https://cdn.example/three.jpg"]
        );
    }

    #[test]
    fn parse_image_urls_trims_and_drops_empties() {
        assert_eq!(
            parse_image_urls(" https://a.example/x.jpg , ,https://b.example/y.jpg,"),
            vec!["https://a.example/x.jpg", "https://b.example/y.jpg"]
        );
        assert!(parse_image_urls("").is_empty());
        assert!(parse_image_urls(" , ,").is_empty());
    }

    #[test]
    fn created_at_parses_sqlite_format() {
        let parsed = parse_created_at("2026-08-26 09:30:00", 1);
        assert_eq!(parsed.to_rfc3339(), "2026-08-26T09:30:00+00:00");
    }
}
