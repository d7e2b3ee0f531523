//! Task record: the persisted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OwnerId, RecordId};
use super::status::RecordStatus;

/// Where the uploaded recording lives in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

impl BlobLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// How the agent judged the refined intent.
///
/// - accept: answer directly
/// - boundary: ask the speaker to confirm
/// - reject: could not understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Boundary,
    Reject,
}

/// Output of a finished analysis. Only present on completed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Raw speech recognition output.
    pub transcript: String,

    /// Intent after refinement.
    pub refined_text: String,

    /// 0.0 - 1.0
    pub confidence: f64,

    pub decision: Decision,

    /// User-facing reply generated from the decision.
    pub response_text: String,

    /// Location of the synthesized reply audio.
    pub tts_audio_url: Option<String>,
}

/// Metadata for a record.
///
/// Design:
/// - The store owns the single copy; everything else works on snapshots.
/// - Immutable fields are set once in `new`.
/// - Status moves only through the store's conditional operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub blob: BlobLocation,
    pub duration_seconds: u32,

    pub status: RecordStatus,

    /// Set iff `status == Completed`.
    pub analysis_result: Option<AnalysisResult>,

    /// Number of dispatch calls that exhausted their retries.
    pub failed_dispatches: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        id: RecordId,
        owner_id: OwnerId,
        blob: BlobLocation,
        duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            blob,
            duration_seconds,
            status: RecordStatus::Uploaded,
            analysis_result: None,
            failed_dispatches: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reclaim-eligible: still uploaded and strictly older than the cutoff.
    pub fn is_reclaimable(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == RecordStatus::Uploaded && self.created_at < cutoff
    }

    pub fn set_status(&mut self, status: RecordStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// Move to Completed and attach the result in one step.
    pub fn complete(&mut self, result: AnalysisResult, now: DateTime<Utc>) {
        self.status = RecordStatus::Completed;
        self.analysis_result = Some(result);
        self.updated_at = now;
    }
}
