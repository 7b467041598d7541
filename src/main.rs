mod config;
mod error;
mod extract;
mod handlers;
mod integrations;
mod llm;
mod models;
mod pipeline;
mod projector;
mod session;
mod state;
mod store;
mod transcribe;
mod ws;

use std::process::ExitCode;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::extract::Extractor;
use crate::integrations::IntegrationRegistry;
use crate::llm::LlmClient;
use crate::projector::TaskProjector;
use crate::session::SessionRegistry;
use crate::state::AppState;
use crate::transcribe::Transcriber;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let default_filter = if config.debug_logging {
        "meetscribe_api=debug,tower_http=debug"
    } else {
        "meetscribe_api=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting meetscribe api server...");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("startup failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = store::open_store(&config.database).await?;
    tracing::info!("store ready ({:?})", config.database.db_type);

    let transcriber = match Transcriber::probe(&config.stt) {
        Ok(t) => Some(Arc::new(t)),
        Err(e) if config.stt.required => {
            anyhow::bail!("speech-to-text is required but unavailable: {}", e);
        }
        Err(e) => {
            tracing::warn!("transcription disabled: {}", e);
            None
        }
    };

    let llm = Arc::new(LlmClient::new(config.llm.clone()));
    if llm.fallback_mode() {
        tracing::warn!(
            "no LLM credential configured, extraction runs in fallback mode"
        );
    } else {
        tracing::info!("llm provider: {}", llm.provider().as_str());
    }

    let integrations = Arc::new(IntegrationRegistry::from_config(&config.integrations));

    let app = Arc::new(AppState {
        extractor: Extractor::new(llm.clone()),
        projector: TaskProjector::new(store.clone(), integrations.clone()),
        sessions: SessionRegistry::new(),
        processing: Default::default(),
        config,
        store,
        llm,
        transcriber,
        integrations,
    });

    tokio::spawn(pipeline::run_idle_reaper(app.clone()));

    let router = Router::new()
        // WebSocket ingress; the extension connects on any of the aliases
        .route("/ws/audio", get(ws::gateway::audio_websocket))
        .route("/ws", get(ws::gateway::audio_websocket))
        .route("/ws/audio-stream", get(ws::gateway::audio_websocket))
        // Dashboard read surface
        .route("/health", get(handlers::health))
        .route("/get-meetings", get(handlers::get_meetings))
        .route("/get-meeting/:id", get(handlers::get_meeting))
        .route("/get-summary/:meeting_id", get(handlers::get_summary))
        .route("/get-tasks", get(handlers::get_all_tasks))
        .route("/get-tasks/:meeting_id", get(handlers::get_meeting_tasks))
        .route("/delete-meeting/:id", delete(handlers::delete_meeting))
        // Transcript intake and processing
        .route("/save-transcript", post(handlers::save_transcript))
        .route("/process-transcript", post(handlers::process_transcript))
        .route(
            "/process-transcript-with-tools",
            post(handlers::process_transcript_with_tools),
        )
        // Synchronous extraction operations
        .route("/identify-speakers", post(handlers::identify_speakers))
        .route("/generate-summary", post(handlers::generate_summary))
        .route("/extract-tasks", post(handlers::extract_tasks))
        .route(
            "/extract-tasks-comprehensive",
            post(handlers::extract_tasks_comprehensive),
        )
        .route("/available-tools", get(handlers::available_tools))
        .with_state(app.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = app.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server running on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining");
        })
        .await?;

    Ok(())
}
