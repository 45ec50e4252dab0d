//! Read-only repository for the upload catalog.
//!
//! The `videos` collection is written by the upload subsystem; this side
//! only queries it for candidates that carry a source URL.

use tracing::warn;

use vhls_models::{SourceVideo, VideoId};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{
    CollectionSelector, FieldFilter, FieldReference, Filter, FromFirestoreValue, Order,
    StructuredQuery, ToFirestoreValue,
};

const VIDEOS_COLLECTION: &str = "videos";

/// Repository over the upload catalog's `videos` collection.
#[derive(Clone)]
pub struct VideoCatalogRepository {
    client: FirestoreClient,
}

impl VideoCatalogRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Fetch up to `limit` catalog entries that have a non-empty source URL.
    ///
    /// Entries that fail to parse are logged and skipped rather than
    /// failing the whole batch.
    pub async fn fetch_with_source_url(&self, limit: u32) -> FirestoreResult<Vec<SourceVideo>> {
        let effective_limit = limit.clamp(1, 100) as i32;

        let query = StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: VIDEOS_COLLECTION.to_string(),
                all_descendants: None,
            }],
            r#where: Some(Filter {
                field_filter: Some(FieldFilter {
                    field: FieldReference {
                        field_path: "url".to_string(),
                    },
                    op: "GREATER_THAN".to_string(),
                    value: "".to_firestore_value(),
                }),
            }),
            order_by: Some(vec![Order {
                field: FieldReference {
                    field_path: "url".to_string(),
                },
                direction: "ASCENDING".to_string(),
            }]),
            limit: Some(effective_limit),
        };

        let docs = self
            .client
            .with_retry("fetch_catalog", || {
                self.client.run_query("", query.clone())
            })
            .await?;

        let mut videos = Vec::new();
        let mut parse_errors = 0u32;

        for doc in docs {
            let doc_id = doc
                .name
                .as_deref()
                .and_then(|name| name.split('/').last())
                .unwrap_or("")
                .to_string();

            match document_to_source_video(&doc, &doc_id) {
                Ok(video) => videos.push(video),
                Err(e) => {
                    warn!(doc_id = %doc_id, error = %e, "Skipping unparseable catalog entry");
                    parse_errors += 1;
                }
            }
        }

        if parse_errors > 0 {
            warn!(parse_errors, "Some catalog entries could not be parsed");
        }

        Ok(videos)
    }
}

fn document_to_source_video(
    doc: &crate::types::Document,
    doc_id: &str,
) -> FirestoreResult<SourceVideo> {
    let fields = doc
        .fields
        .as_ref()
        .ok_or_else(|| FirestoreError::InvalidResponse("Document has no fields".to_string()))?;

    if doc_id.is_empty() {
        return Err(FirestoreError::invalid_response(
            "Catalog document has no name",
        ));
    }

    let get_string = |key: &str| -> String {
        fields
            .get(key)
            .and_then(|v| String::from_firestore_value(v))
            .unwrap_or_default()
    };

    let url = get_string("url");
    let file_name = match get_string("file_name") {
        name if name.is_empty() => file_name_from_url(&url),
        name => name,
    };

    Ok(SourceVideo {
        video_id: VideoId::from_string(doc_id),
        url,
        file_name,
        title: fields
            .get("title")
            .and_then(|v| String::from_firestore_value(v)),
        size_bytes: fields
            .get("size_bytes")
            .and_then(|v| u64::from_firestore_value(v)),
        duration_seconds: fields
            .get("duration_seconds")
            .and_then(|v| f64::from_firestore_value(v)),
        created_at: fields
            .get("created_at")
            .and_then(|v| chrono::DateTime::from_firestore_value(v))
            .unwrap_or_else(chrono::Utc::now),
    })
}

/// Last path segment of the URL, as a display fallback for `file_name`.
fn file_name_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("source")
        .split('?')
        .next()
        .unwrap_or("source")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, Value};
    use std::collections::HashMap;

    fn catalog_doc(url: &str) -> Document {
        let mut fields = HashMap::new();
        fields.insert("url".to_string(), Value::StringValue(url.to_string()));
        fields.insert(
            "title".to_string(),
            Value::StringValue("My upload".to_string()),
        );
        Document {
            name: Some(
                "projects/p/databases/(default)/documents/videos/vid-1".to_string(),
            ),
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    #[test]
    fn test_document_to_source_video() {
        let doc = catalog_doc("https://cdn.example.com/raw/a.mp4");
        let video = document_to_source_video(&doc, "vid-1").unwrap();

        assert_eq!(video.video_id.as_str(), "vid-1");
        assert_eq!(video.url, "https://cdn.example.com/raw/a.mp4");
        assert_eq!(video.file_name, "a.mp4");
        assert_eq!(video.title.as_deref(), Some("My upload"));
    }

    #[test]
    fn test_file_name_falls_back_to_url_segment() {
        assert_eq!(
            file_name_from_url("https://x/path/video.mp4?token=abc"),
            "video.mp4"
        );
        assert_eq!(file_name_from_url("https://x/"), "source");
    }
}
