use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Which persistence backend to open at startup. Immutable for the process
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Embedded,
    Remote,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub db_type: DatabaseType,
    /// Embedded backend: path of the single-file store.
    pub path: PathBuf,
    /// Remote backend (MySQL-wire, e.g. TiDB).
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Groq,
    Ollama,
    None,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Groq => "groq",
            LlmProvider::Ollama => "ollama",
            LlmProvider::None => "none",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-haiku-latest",
            LlmProvider::Groq => "llama-3.1-8b-instant",
            LlmProvider::Ollama => "llama3.1:8b",
            LlmProvider::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub json_mode: bool,
    /// Base URL override, used by the Ollama provider and by tests.
    pub base_url: Option<String>,
}

impl LlmConfig {
    /// Fallback mode: no provider or no credential. Completions return
    /// deterministic schema-valid stubs with zero confidence.
    pub fn fallback_mode(&self) -> bool {
        match self.provider {
            LlmProvider::None => true,
            // Ollama is local and unauthenticated
            LlmProvider::Ollama => false,
            _ => self.api_key.is_none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub binary_path: Option<PathBuf>,
    pub model_path: PathBuf,
    pub required: bool,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone)]
pub struct IntegrationsConfig {
    pub notion_api_key: Option<String>,
    pub notion_database_id: Option<String>,
    pub clickup_api_token: Option<String>,
    pub clickup_list_id: Option<String>,
    pub slack_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub integrations: IntegrationsConfig,
    /// Seconds of inactivity before an open session is auto-finalized.
    pub ws_idle_timeout_secs: u64,
    pub debug_logging: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("PORT", 8000u16);

        let db_type = match env::var("DATABASE_TYPE").as_deref() {
            Ok("remote") => DatabaseType::Remote,
            Ok("embedded") | Err(_) => DatabaseType::Embedded,
            Ok(other) => {
                anyhow::bail!("DATABASE_TYPE must be 'embedded' or 'remote', got '{}'", other)
            }
        };

        let database = DatabaseConfig {
            db_type,
            path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./meetscribe.db")),
            host: env_opt("DATABASE_HOST"),
            port: env_or("DATABASE_PORT", 4000u16),
            user: env_opt("DATABASE_USER"),
            password: env_opt("DATABASE_PASSWORD"),
            database: env_opt("DATABASE_NAME"),
            ssl_required: matches!(env::var("DATABASE_SSL_MODE").as_deref(), Ok("required")),
        };

        if db_type == DatabaseType::Remote {
            if database.host.is_none() || database.user.is_none() || database.database.is_none() {
                anyhow::bail!(
                    "DATABASE_TYPE=remote requires DATABASE_HOST, DATABASE_USER and DATABASE_NAME"
                );
            }
        }

        let provider = match env::var("LLM_PROVIDER").as_deref() {
            Ok("openai") => LlmProvider::OpenAi,
            Ok("anthropic") => LlmProvider::Anthropic,
            Ok("groq") => LlmProvider::Groq,
            Ok("ollama") => LlmProvider::Ollama,
            Ok("none") | Err(_) => LlmProvider::None,
            Ok(other) => anyhow::bail!("unknown LLM_PROVIDER '{}'", other),
        };

        // Per-provider key variables take precedence over the generic one.
        let api_key = match provider {
            LlmProvider::OpenAi => env_opt("OPENAI_API_KEY").or_else(|| env_opt("LLM_API_KEY")),
            LlmProvider::Anthropic => {
                env_opt("ANTHROPIC_API_KEY").or_else(|| env_opt("LLM_API_KEY"))
            }
            LlmProvider::Groq => env_opt("GROQ_API_KEY").or_else(|| env_opt("LLM_API_KEY")),
            _ => env_opt("LLM_API_KEY"),
        };

        let llm = LlmConfig {
            model: env_opt("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            provider,
            api_key,
            timeout_secs: env_or("LLM_TIMEOUT_SECS", 60u64),
            max_retries: env_or("LLM_MAX_RETRIES", 2u32),
            json_mode: env_or("LLM_JSON_MODE", true),
            base_url: env_opt("OLLAMA_BASE_URL"),
        };

        let default_pool = (num_cpus::get() * 2).min(8).max(1);
        let stt = SttConfig {
            binary_path: env_opt("STT_BINARY_PATH").map(PathBuf::from),
            model_path: env::var("STT_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./models/ggml-base.en.bin")),
            required: env_or("STT_REQUIRED", false),
            timeout_secs: env_or("STT_TIMEOUT_SECS", 120u64),
            max_concurrent: env_or("MAX_CONCURRENT_TRANSCRIPTIONS", default_pool),
        };

        let integrations = IntegrationsConfig {
            notion_api_key: env_opt("NOTION_API_KEY"),
            notion_database_id: env_opt("NOTION_DATABASE_ID"),
            clickup_api_token: env_opt("CLICKUP_API_TOKEN"),
            clickup_list_id: env_opt("CLICKUP_LIST_ID"),
            slack_webhook_url: env_opt("SLACK_WEBHOOK_URL"),
        };

        let ws_idle_timeout_secs = env::var("WS_IDLE_TIMEOUT")
            .ok()
            .map(|v| v.parse::<u64>().context("WS_IDLE_TIMEOUT must be an integer"))
            .transpose()?
            .unwrap_or(7200);

        Ok(Config {
            host,
            port,
            database,
            llm,
            stt,
            integrations,
            ws_idle_timeout_secs,
            debug_logging: env_or("DEBUG_LOGGING", false),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
