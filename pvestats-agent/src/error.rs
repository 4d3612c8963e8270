//! Error taxonomy for one polling run
//!
//! Every variant is fatal for the run: the binary reports it and exits
//! non-zero. Missing numeric fields and zero denominators are not errors, they
//! are handled where the values are read (see `resources::RawFields` and
//! `units::guarded_percent`).

/// Errors surfaced by the agent pipeline
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Proxmox API request {path} failed: {message}")]
    Api { path: String, message: String },
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("Remote shell on {target} failed: {message}")]
    RemoteShell { target: String, message: String },
    #[error("Unexpected remote command output: {0:?}")]
    RemoteOutput(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn api(path: &str, message: impl std::fmt::Display) -> Self {
        AgentError::Api {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub fn mqtt(message: impl std::fmt::Display) -> Self {
        AgentError::Mqtt(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
