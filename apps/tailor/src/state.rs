use std::sync::Arc;

use crate::prompts::PromptResolver;
use crate::storage::ArtifactStore;

/// Shared application state injected into all route handlers via Axum extractors.
///
/// The HTTP surface is read-only: it needs the artifact store and the known
/// prompt labels, nothing from the queue or the generator.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArtifactStore>,
    pub prompts: Arc<PromptResolver>,
    /// Prefix for artifact URLs in status responses.
    pub public_base_url: String,
}
