use futures::future::BoxFuture;

use crate::error::{InkflowError, Result};
use crate::types::*;

/// Generation capability for text, structured output and media.
///
/// Rate limiting and retries are the implementor's concern; callers issue
/// one request and wait for it.
pub trait Generator: Send + Sync + 'static {
    /// Generate text (and structured fields when `request.schema` is set).
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation>>;

    /// Generate an image or audio asset from a prompt.
    fn generate_media(&self, kind: MediaKind, prompt: String) -> BoxFuture<'_, Result<MediaAsset>> {
        let _ = prompt;
        Box::pin(async move {
            Err(InkflowError::Generation(format!(
                "{} generation is not supported by this provider",
                kind
            )))
        })
    }

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Resolves content card and scene ids to literal text.
pub trait CardLookup: Send + Sync + 'static {
    /// Returns `None` when the card does not exist.
    fn resolve(&self, card_id: &str) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Consumer of the progress event stream.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Project persistence: version history and current content.
pub trait ProjectStore: Send + Sync + 'static {
    /// Append a snapshot to the project's history and make its content current.
    fn append_version(
        &self,
        project_id: &str,
        snapshot: &VersionSnapshot,
    ) -> BoxFuture<'_, Result<()>>;

    /// All snapshots for a project, oldest first.
    fn history(&self, project_id: &str) -> BoxFuture<'_, Result<Vec<VersionSnapshot>>>;

    /// The project's current content, if any version was ever written.
    fn current_content(&self, project_id: &str) -> BoxFuture<'_, Result<Option<String>>>;
}

/// A card lookup with no cards. Every id resolves to `None`.
pub struct NoCards;

impl CardLookup for NoCards {
    fn resolve(&self, _card_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async { Ok(None) })
    }
}
