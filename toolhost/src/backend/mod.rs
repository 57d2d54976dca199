//! Local inference backend supervision (Ollama, llama.cpp, ComfyUI)

mod controller;
mod error;
mod exclusive;
mod launch;
mod ollama;
mod profile;

pub use controller::{
    BackendController, BackendState, ServerController, DEFAULT_POLL_INTERVAL, DEFAULT_STOP_TIMEOUT,
};
pub use error::{BackendError, BackendResult};
pub use exclusive::BackendSet;
pub use launch::{DetachedLauncher, LaunchCommand, Launcher};
pub use ollama::{has_model, ModelInfo, OllamaApi, DEFAULT_PULL_TIMEOUT};
pub use profile::{BackendConfig, BackendKind, BackendProfile, Endpoint, LaunchBlocker};
