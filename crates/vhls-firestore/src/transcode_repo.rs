//! Typed repository for transcode records.
//!
//! One document per source URL in the `transcodes` collection, keyed by the
//! SHA-256 of the URL so lookups are point reads and creates are naturally
//! unique. The document's Firestore `updateTime` doubles as the version
//! token for conditional takeovers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::info;

use vhls_models::{TranscodeOutput, TranscodeRecord, TranscodeStatus, VideoId};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{ArrayValue, FromFirestoreValue, ToFirestoreValue, Value};

const TRANSCODES_COLLECTION: &str = "transcodes";

/// A record read back from the store, with its Firestore version token.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: TranscodeRecord,
    /// Firestore updateTime of the document, used for CAS takeovers.
    pub update_time: Option<String>,
}

/// Repository for transcode record documents.
#[derive(Clone)]
pub struct TranscodeRepository {
    client: FirestoreClient,
}

impl TranscodeRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Stable document ID for a source URL.
    pub fn doc_id_for_url(url: &str) -> String {
        let digest = Sha256::digest(url.trim().as_bytes());
        format!("{:x}", digest)
    }

    /// Verify the backing collection is reachable. A missing probe
    /// document is fine; only transport and auth failures propagate.
    pub async fn check_connectivity(&self) -> FirestoreResult<()> {
        self.client
            .get_document(TRANSCODES_COLLECTION, "connectivity-probe")
            .await?;
        Ok(())
    }

    /// Remove the record for a URL. The pipeline never deletes records;
    /// this exists for operational tooling and test cleanup.
    pub async fn delete_by_url(&self, url: &str) -> FirestoreResult<()> {
        let doc_id = Self::doc_id_for_url(url);
        self.client
            .with_retry("delete_record", || {
                self.client.delete_document(TRANSCODES_COLLECTION, &doc_id)
            })
            .await
    }

    /// Look up the record for a source URL.
    pub async fn find_by_url(&self, url: &str) -> FirestoreResult<Option<StoredRecord>> {
        let doc_id = Self::doc_id_for_url(url);
        let doc = self
            .client
            .with_retry("find_record", || {
                self.client.get_document(TRANSCODES_COLLECTION, &doc_id)
            })
            .await?;

        match doc {
            Some(d) => {
                let record = document_to_record(&d)?;
                Ok(Some(StoredRecord {
                    record,
                    update_time: d.update_time.clone(),
                }))
            }
            None => Ok(None),
        }
    }

    /// Insert a fresh processing record.
    ///
    /// Fails with `AlreadyExists` when another worker created the document
    /// first; callers treat that as a lost claim race. Deliberately not
    /// retried, since a replayed create cannot tell its own earlier write
    /// from a competitor's.
    pub async fn insert_processing(&self, record: &TranscodeRecord) -> FirestoreResult<()> {
        let doc_id = Self::doc_id_for_url(&record.source_url);
        let fields = record_to_fields(record);
        self.client
            .create_document(TRANSCODES_COLLECTION, &doc_id, fields)
            .await?;
        info!(video_id = %record.video_id, attempts = record.attempts, "Claimed transcode record");
        Ok(())
    }

    /// Overwrite an existing record, conditional on its version token.
    ///
    /// Used to take over a failed record for retry or a stale processing
    /// record from a dead worker. Fails with `PreconditionFailed` when the
    /// document changed since it was read.
    pub async fn reclaim(
        &self,
        record: &TranscodeRecord,
        update_time: &str,
    ) -> FirestoreResult<()> {
        let doc_id = Self::doc_id_for_url(&record.source_url);
        let fields = record_to_fields(record);
        self.client
            .update_document_with_precondition(
                TRANSCODES_COLLECTION,
                &doc_id,
                fields,
                Some(record_field_paths()),
                Some(update_time),
            )
            .await?;
        info!(video_id = %record.video_id, attempts = record.attempts, "Reclaimed transcode record");
        Ok(())
    }

    /// Mark the record for a URL as processed with its uploaded artifacts.
    pub async fn mark_processed(
        &self,
        url: &str,
        output: &TranscodeOutput,
    ) -> FirestoreResult<()> {
        let doc_id = Self::doc_id_for_url(url);

        let build_fields = || {
            let mut fields = HashMap::new();
            fields.insert(
                "status".to_string(),
                TranscodeStatus::Processed.as_str().to_firestore_value(),
            );
            fields.insert(
                "master_url".to_string(),
                output.master_url.to_firestore_value(),
            );
            fields.insert(
                "variant_urls".to_string(),
                output.variant_urls.to_firestore_value(),
            );
            fields.insert("error_message".to_string(), Value::NullValue(()));
            fields.insert("next_retry_at".to_string(), Value::NullValue(()));
            fields.insert("completed_at".to_string(), Utc::now().to_firestore_value());
            fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());
            fields
        };

        self.client
            .with_retry("mark_processed", || {
                self.client.update_document(
                    TRANSCODES_COLLECTION,
                    &doc_id,
                    build_fields(),
                    Some(vec![
                        "status".to_string(),
                        "master_url".to_string(),
                        "variant_urls".to_string(),
                        "error_message".to_string(),
                        "next_retry_at".to_string(),
                        "completed_at".to_string(),
                        "updated_at".to_string(),
                    ]),
                )
            })
            .await?;
        Ok(())
    }

    /// Mark the record for a URL as failed with the attempt's error text.
    pub async fn mark_failed(
        &self,
        url: &str,
        error: &str,
        attempts: u32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> FirestoreResult<()> {
        let doc_id = Self::doc_id_for_url(url);

        let build_fields = || {
            let mut fields = HashMap::new();
            fields.insert(
                "status".to_string(),
                TranscodeStatus::Failed.as_str().to_firestore_value(),
            );
            fields.insert("error_message".to_string(), error.to_firestore_value());
            fields.insert("attempts".to_string(), attempts.to_firestore_value());
            fields.insert(
                "next_retry_at".to_string(),
                next_retry_at.to_firestore_value(),
            );
            fields.insert("failed_at".to_string(), Utc::now().to_firestore_value());
            fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());
            fields
        };

        self.client
            .with_retry("mark_failed", || {
                self.client.update_document(
                    TRANSCODES_COLLECTION,
                    &doc_id,
                    build_fields(),
                    Some(vec![
                        "status".to_string(),
                        "error_message".to_string(),
                        "attempts".to_string(),
                        "next_retry_at".to_string(),
                        "failed_at".to_string(),
                        "updated_at".to_string(),
                    ]),
                )
            })
            .await?;
        Ok(())
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn record_field_paths() -> Vec<String> {
    [
        "video_id",
        "source_url",
        "file_name",
        "status",
        "master_url",
        "variant_urls",
        "error_message",
        "attempts",
        "next_retry_at",
        "created_at",
        "updated_at",
        "completed_at",
        "failed_at",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn record_to_fields(record: &TranscodeRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert(
        "video_id".to_string(),
        record.video_id.as_str().to_firestore_value(),
    );
    fields.insert(
        "source_url".to_string(),
        record.source_url.to_firestore_value(),
    );
    fields.insert(
        "file_name".to_string(),
        record.file_name.to_firestore_value(),
    );
    fields.insert(
        "status".to_string(),
        record.status.as_str().to_firestore_value(),
    );
    fields.insert(
        "master_url".to_string(),
        record
            .output
            .as_ref()
            .map(|o| o.master_url.clone())
            .to_firestore_value(),
    );
    fields.insert(
        "variant_urls".to_string(),
        record
            .output
            .as_ref()
            .map(|o| o.variant_urls.clone())
            .unwrap_or_default()
            .to_firestore_value(),
    );
    fields.insert(
        "error_message".to_string(),
        record.error_message.to_firestore_value(),
    );
    fields.insert("attempts".to_string(), record.attempts.to_firestore_value());
    fields.insert(
        "next_retry_at".to_string(),
        record.next_retry_at.to_firestore_value(),
    );
    fields.insert(
        "created_at".to_string(),
        record.created_at.to_firestore_value(),
    );
    fields.insert(
        "updated_at".to_string(),
        record.updated_at.to_firestore_value(),
    );
    fields.insert(
        "completed_at".to_string(),
        record.completed_at.to_firestore_value(),
    );
    fields.insert(
        "failed_at".to_string(),
        record.failed_at.to_firestore_value(),
    );
    fields
}

fn document_to_record(doc: &crate::types::Document) -> FirestoreResult<TranscodeRecord> {
    let fields = doc
        .fields
        .as_ref()
        .ok_or_else(|| FirestoreError::InvalidResponse("Document has no fields".to_string()))?;

    let get_string = |key: &str| -> String {
        fields
            .get(key)
            .and_then(|v| String::from_firestore_value(v))
            .unwrap_or_default()
    };

    let get_opt_string = |key: &str| -> Option<String> {
        fields.get(key).and_then(|v| String::from_firestore_value(v))
    };

    let get_timestamp = |key: &str| -> Option<DateTime<Utc>> {
        fields
            .get(key)
            .and_then(|v| DateTime::from_firestore_value(v))
    };

    let master_url = get_string("master_url");
    let variant_urls: Vec<String> = fields
        .get("variant_urls")
        .and_then(|v| match v {
            Value::ArrayValue(ArrayValue { values }) => values.as_ref().map(|vals| {
                vals.iter()
                    .filter_map(|vv| String::from_firestore_value(vv))
                    .collect()
            }),
            _ => None,
        })
        .unwrap_or_default();

    let output = if master_url.is_empty() && variant_urls.is_empty() {
        None
    } else {
        Some(TranscodeOutput::new(master_url, variant_urls))
    };

    Ok(TranscodeRecord {
        video_id: VideoId::from_string(get_string("video_id")),
        source_url: get_string("source_url"),
        file_name: get_string("file_name"),
        status: TranscodeStatus::from_str_or_default(&get_string("status")),
        output,
        error_message: get_opt_string("error_message"),
        attempts: fields
            .get("attempts")
            .and_then(|v| u32::from_firestore_value(v))
            .unwrap_or(0),
        next_retry_at: get_timestamp("next_retry_at"),
        created_at: get_timestamp("created_at").unwrap_or_else(Utc::now),
        updated_at: get_timestamp("updated_at").unwrap_or_else(Utc::now),
        completed_at: get_timestamp("completed_at"),
        failed_at: get_timestamp("failed_at"),
    })
}
