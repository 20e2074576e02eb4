//! Feedback loop: approved output becomes retrievable source material.
//!
//! - [`FeedbackLoop::on_approved`] indexes one approved text under a fresh id.
//! - [`FeedbackLoop::on_approved_reply`] indexes a reply together with the
//!   post it answers, so the exchange is retrieved as a unit.
//! - [`FeedbackLoop::backfill`] takes approvals recorded elsewhere (each with
//!   a stable id) and indexes the ones not yet in the store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::IndexError;
use crate::indexer::{BulkReport, IndexOutcome, Indexer};
use crate::models::{Document, SourceKind};

/// Provenance tag of approved replies when the caller gives none.
pub const REPLY_TAG: &str = "approved_reply";

/// Outcome of [`FeedbackLoop::on_approved`].
#[derive(Debug, Clone, PartialEq)]
pub struct Approved {
    pub document_id: String,
    pub outcome: IndexOutcome,
}

/// An approval recorded by the approval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedItem {
    /// Stable id; the document id becomes `feedback:{id}`.
    pub id: String,
    pub text: String,
    /// Text of the post this item replies to, if it is a reply.
    #[serde(default)]
    pub parent_text: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

pub struct FeedbackLoop {
    indexer: Arc<Indexer>,
}

impl FeedbackLoop {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }

    /// Index approved text as a new `feedback` document.
    ///
    /// Each approval gets a fresh id, so approving the same text twice
    /// yields two documents.
    pub async fn on_approved(
        &self,
        text: &str,
        provenance_tag: &str,
    ) -> Result<Approved, IndexError> {
        check_text(text)?;
        self.index_approved(&Uuid::new_v4().to_string(), text.to_string(), provenance_tag)
            .await
    }

    /// Index an approved reply prefixed with its parent post.
    ///
    /// The document text is `{parent}\n\nReply: {reply}`, or just
    /// `Reply: {reply}` without a parent.
    pub async fn on_approved_reply(
        &self,
        reply: &str,
        parent: Option<&str>,
        provenance_tag: &str,
    ) -> Result<Approved, IndexError> {
        check_text(reply)?;
        self.index_approved(
            &Uuid::new_v4().to_string(),
            reply_text(reply, parent),
            provenance_tag,
        )
        .await
    }

    /// Index every item whose `feedback:{id}` document is not in the store
    /// yet. Items already present are reported as unchanged; invalid items
    /// are reported as failures without stopping the run.
    pub async fn backfill(&self, items: &[ApprovedItem]) -> Result<BulkReport, IndexError> {
        let store = &self.indexer.indexes().store;
        let mut report = BulkReport::default();

        for item in items {
            let document_id = feedback_id(&item.id);
            let existing = store
                .get_document(&document_id)
                .await
                .map_err(IndexError::Storage)?;
            if existing.is_some() {
                report.outcomes.push((document_id, IndexOutcome::Unchanged));
                continue;
            }

            let outcome = self.index_item(item).await.map(|a| a.outcome);
            report.record(document_id, outcome);
        }

        info!(
            items = items.len(),
            indexed = report.indexed(),
            failed = report.failures.len(),
            "approval backfill finished"
        );
        Ok(report)
    }

    async fn index_item(&self, item: &ApprovedItem) -> Result<Approved, IndexError> {
        if item.id.trim().is_empty() {
            return Err(IndexError::InvalidDocument(
                "approval id must not be empty".to_string(),
            ));
        }
        check_text(&item.text)?;
        let (text, default_tag) = match &item.parent_text {
            Some(parent) => (reply_text(&item.text, Some(parent)), REPLY_TAG),
            None => (item.text.clone(), "approved"),
        };
        let tag = item.tag.as_deref().unwrap_or(default_tag);
        self.index_approved(&item.id, text, tag).await
    }

    async fn index_approved(
        &self,
        origin_ref: &str,
        text: String,
        provenance_tag: &str,
    ) -> Result<Approved, IndexError> {
        let doc = Document {
            id: feedback_id(origin_ref),
            source_kind: SourceKind::Feedback,
            origin_ref: origin_ref.to_string(),
            text,
            updated_at: chrono::Utc::now().timestamp(),
            provenance: Some(provenance_tag.to_string()).filter(|t| !t.trim().is_empty()),
        };

        let outcome = self.indexer.index_document(&doc).await?;
        info!(document_id = %doc.id, provenance = provenance_tag, "indexed approved output");
        Ok(Approved {
            document_id: doc.id,
            outcome,
        })
    }
}

fn feedback_id(origin_ref: &str) -> String {
    format!("feedback:{}", origin_ref)
}

fn check_text(text: &str) -> Result<(), IndexError> {
    if text.trim().is_empty() {
        return Err(IndexError::InvalidDocument(
            "approved text must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn reply_text(reply: &str, parent: Option<&str>) -> String {
    match parent.map(str::trim).filter(|p| !p.is_empty()) {
        Some(parent) => format!("{}\n\nReply: {}", parent, reply.trim()),
        None => format!("Reply: {}", reply.trim()),
    }
}
