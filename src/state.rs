use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::extract::Extractor;
use crate::integrations::IntegrationRegistry;
use crate::llm::LlmClient;
use crate::projector::TaskProjector;
use crate::session::SessionRegistry;
use crate::store::Store;
use crate::transcribe::Transcriber;

/// Status of an asynchronous extraction run, keyed by process id (the
/// meeting id). Entries exist only while the process is in flight or until
/// its terminal state has been observed; completed summaries are served
/// from the store.
#[derive(Debug, Clone)]
pub enum ProcessingState {
    Processing,
    Completed,
    Error(String),
}

/// Process-wide context, initialized once at startup and passed through to
/// every handler. No implicit globals.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub llm: Arc<LlmClient>,
    pub extractor: Extractor,
    /// Absent when the startup probe failed and STT is not required.
    pub transcriber: Option<Arc<Transcriber>>,
    pub integrations: Arc<IntegrationRegistry>,
    pub projector: TaskProjector,
    pub sessions: SessionRegistry,
    pub processing: RwLock<HashMap<String, ProcessingState>>,
}

impl AppState {
    pub async fn set_processing(&self, id: &str, state: ProcessingState) {
        self.processing
            .write()
            .await
            .insert(id.to_string(), state);
    }

    pub async fn processing_state(&self, id: &str) -> Option<ProcessingState> {
        self.processing.read().await.get(id).cloned()
    }

    /// State wired to an in-memory store, a fallback-mode LLM client, no
    /// transcriber, and no integrations.
    #[cfg(test)]
    pub async fn for_tests() -> Arc<Self> {
        use crate::config::{LlmConfig, LlmProvider};

        std::env::remove_var("DATABASE_TYPE");
        let store: Arc<dyn Store> =
            Arc::new(crate::store::sqlite::SqliteStore::in_memory().await.unwrap());
        let llm = Arc::new(LlmClient::new(LlmConfig {
            provider: LlmProvider::None,
            model: "none".into(),
            api_key: None,
            timeout_secs: 5,
            max_retries: 0,
            json_mode: true,
            base_url: None,
        }));
        let integrations = Arc::new(IntegrationRegistry::with_clients(vec![]));
        Arc::new(AppState {
            config: Config::load().unwrap(),
            store: store.clone(),
            llm: llm.clone(),
            extractor: Extractor::new(llm),
            transcriber: None,
            integrations: integrations.clone(),
            projector: TaskProjector::new(store, integrations),
            sessions: SessionRegistry::new(),
            processing: Default::default(),
        })
    }
}
