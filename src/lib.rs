//! Desktop multi-model chat host.
//!
//! [`app::App`] owns the transcript and the per-model conversation state and
//! is driven from a single thread. [`runtime::RuntimeController`] fans each
//! user turn out to one worker thread per selected model and funnels their
//! `RunEvent`s back through a channel. Transport lives in the `chat_api`
//! crate behind the `chat_provider` contract.
//!
//! Configuration is read once at startup, see [`config::AppConfig`]:
//! - `DESKCHAT_CONFIG_PATH`: optional JSON file listing models and settings.
//! - `DEEPSEEK_API_KEY`, `ARK_API_KEY`: keys for entries that leave theirs empty.
//! - `DESKCHAT_PROVIDER=mock`: answer offline with the scripted provider.
//! - `DESKCHAT_LOG`, `DESKCHAT_LOG_FILE`: log filter and destination.

pub mod app;
pub mod commands;
pub mod config;
pub mod logging;
pub mod providers;
pub mod runtime;
pub mod transcript;

pub use app::{App, GenerationSettings, HostOps, Mode, Speaker, TranscriptEntry};
pub use config::{AppConfig, ConfigError, ModelEntry};
pub use runtime::RuntimeController;
