//! Media pipeline seam.
//!
//! Compression, storage and rendering live outside the sync engine. The
//! orchestrator only tells the pipeline when an entity's media should move.

use async_trait::async_trait;

use crate::api::UploadTarget;
use crate::models::{MediaRef, Message};

/// Collaborator that moves media bytes for synchronized messages.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Upload the media of a message, optionally to pre-issued targets.
    async fn upload_all(
        &self,
        message: &Message,
        targets: &[UploadTarget],
    ) -> Result<Vec<MediaRef>, String>;

    /// Fetch media referenced by a message materialized from the server.
    async fn download(&self, message: &Message, refs: &[MediaRef]) -> Result<(), String>;
}

/// Pipeline for clients without media support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMediaPipeline;

#[async_trait]
impl MediaPipeline for NoopMediaPipeline {
    async fn upload_all(
        &self,
        message: &Message,
        _targets: &[UploadTarget],
    ) -> Result<Vec<MediaRef>, String> {
        Ok(message.media.clone())
    }

    async fn download(&self, _message: &Message, _refs: &[MediaRef]) -> Result<(), String> {
        Ok(())
    }
}
