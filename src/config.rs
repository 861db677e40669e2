//! Runtime settings.
//!
//! Values are resolved in this order: command-line flag, dotfile entry,
//! process environment, built-in default. The dotfile is parsed without
//! touching the process environment, so a missing or partial file only ever
//! narrows what the file contributes.
//!
//! # Keys
//!
//! - `GPT_TOKEN` (alias `OPENAI_API_KEY`) = API credential
//! - `OPENAI_BASE_URL` = API base, default `https://api.openai.com`
//! - `QABOT_CHAT_MODEL`, `QABOT_TEMPERATURE`, `QABOT_TOP_K`
//! - `QABOT_EMBEDDING_MODEL`, `QABOT_EMBED_BATCH`
//! - `QABOT_CHUNK_SIZE`, `QABOT_CHUNK_OVERLAP`
//! - `QABOT_PERSIST_DIR`, `QABOT_TIMEOUT_SECS`, `QABOT_MAX_RETRIES`
//! - `QABOT_HISTORY_TURNS`, `QABOT_EXIT_KEYWORD`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::{QaError, Result};
use crate::utils::expand_home;

pub const CREDENTIAL_KEY: &str = "GPT_TOKEN";
const CREDENTIAL_ALIAS: &str = "OPENAI_API_KEY";

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_TOP_K: usize = 7;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_PERSIST_DIR: &str = "./data";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_EXIT_KEYWORD: &str = "exit";

/// QA bot based on your PDF file data.
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the PDF file
    pub pdf_path: PathBuf,

    /// Dotfile holding the API credential and optional settings
    #[arg(long, env = "QABOT_ENV_FILE", default_value = ".env")]
    pub env_file: PathBuf,

    /// Chat completion model
    #[arg(long)]
    pub model: Option<String>,

    /// Number of chunks retrieved per question
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Maximum chunk length in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Directory holding the persisted vector index
    #[arg(long)]
    pub persist_dir: Option<PathBuf>,

    /// Re-embed the document even if a matching index exists
    #[arg(long)]
    pub rebuild: bool,

    /// Embed with the offline lexical embedder instead of the remote API
    #[arg(long)]
    pub local_embeddings: bool,

    /// Print the pages each answer was drawn from
    #[arg(long)]
    pub show_sources: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Key/value pairs from a dotfile, backed by an environment lookup.
pub struct ConfigSource {
    file: FxHashMap<String, String>,
    env: Box<dyn Fn(&str) -> Option<String>>,
}

impl ConfigSource {
    /// Reads `path` if it exists. A missing file falls back to `env` alone.
    pub fn load(
        path: impl AsRef<Path>,
        env: impl Fn(&str) -> Option<String> + 'static,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = FxHashMap::default();

        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|e| {
                        QaError::InvalidConfig(format!("{}: {e}", path.display()))
                    })?;
                    file.insert(key, value);
                }
                debug!(path = %path.display(), entries = file.len(), "loaded dotfile");
            }
            Err(e) if e.not_found() => {
                warn!(
                    path = %path.display(),
                    "env file not found, falling back to environment variables"
                );
            }
            Err(e) => {
                return Err(QaError::InvalidConfig(format!("{}: {e}", path.display())));
            }
        }

        Ok(Self {
            file,
            env: Box::new(env),
        })
    }

    /// Reads the real process environment.
    pub fn from_process(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path, |key| std::env::var(key).ok())
    }

    /// Dotfile value first, environment second. Blank values count as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.file
            .get(key)
            .cloned()
            .or_else(|| (self.env)(key))
            .filter(|v| !v.trim().is_empty())
    }

    pub fn credential(&self) -> Option<String> {
        self.get(CREDENTIAL_KEY)
            .or_else(|| self.get(CREDENTIAL_ALIAS))
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                QaError::InvalidConfig(format!("{key} = '{raw}' is not a valid value"))
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub pdf_path: PathBuf,
    pub api_key: Option<String>,
    pub api_base: String,
    pub chat_model: String,
    pub temperature: f32,
    pub embedding_model: String,
    pub embed_batch_size: usize,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub persist_dir: PathBuf,
    pub rebuild: bool,
    pub local_embeddings: bool,
    pub show_sources: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub history_turns: usize,
    pub exit_keyword: String,
}

impl Settings {
    pub fn resolve(cli: &Cli, source: &ConfigSource) -> Result<Self> {
        let settings = Settings {
            pdf_path: expand_home(&cli.pdf_path),
            api_key: source.credential(),
            api_base: source
                .get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            chat_model: cli
                .model
                .clone()
                .or_else(|| source.get("QABOT_CHAT_MODEL"))
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            temperature: source
                .parse("QABOT_TEMPERATURE")?
                .unwrap_or(DEFAULT_TEMPERATURE),
            embedding_model: source
                .get("QABOT_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embed_batch_size: source.parse("QABOT_EMBED_BATCH")?.unwrap_or(64),
            top_k: pick(cli.top_k, source.parse("QABOT_TOP_K")?, DEFAULT_TOP_K),
            chunk_size: pick(
                cli.chunk_size,
                source.parse("QABOT_CHUNK_SIZE")?,
                DEFAULT_CHUNK_SIZE,
            ),
            chunk_overlap: pick(
                cli.chunk_overlap,
                source.parse("QABOT_CHUNK_OVERLAP")?,
                DEFAULT_CHUNK_OVERLAP,
            ),
            persist_dir: expand_home(
                cli.persist_dir
                    .clone()
                    .or_else(|| source.get("QABOT_PERSIST_DIR").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PERSIST_DIR)),
            ),
            rebuild: cli.rebuild,
            local_embeddings: cli.local_embeddings,
            show_sources: cli.show_sources,
            timeout_secs: source.parse("QABOT_TIMEOUT_SECS")?.unwrap_or(60),
            max_retries: source.parse("QABOT_MAX_RETRIES")?.unwrap_or(2),
            history_turns: source.parse("QABOT_HISTORY_TURNS")?.unwrap_or(8),
            exit_keyword: source
                .get("QABOT_EXIT_KEYWORD")
                .unwrap_or_else(|| DEFAULT_EXIT_KEYWORD.to_string()),
        };

        if settings.top_k == 0 {
            return Err(QaError::InvalidConfig("top_k must be at least 1".into()));
        }
        if settings.embed_batch_size == 0 {
            return Err(QaError::InvalidConfig(
                "embedding batch size must be at least 1".into(),
            ));
        }
        if settings.timeout_secs == 0 {
            return Err(QaError::InvalidConfig(
                "request timeout must be at least 1 second".into(),
            ));
        }
        if settings.exit_keyword.trim().is_empty() {
            return Err(QaError::InvalidConfig("exit keyword cannot be blank".into()));
        }

        Ok(settings)
    }

    /// The credential, or `ConfigMissing` when neither source supplied it.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| QaError::ConfigMissing {
                key: CREDENTIAL_KEY.to_string(),
            })
    }
}

fn pick<T>(flag: Option<T>, configured: Option<T>, default: T) -> T {
    flag.or(configured).unwrap_or(default)
}
