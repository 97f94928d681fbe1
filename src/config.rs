use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::background::BackgroundSettings;
use crate::constants::DEFAULT_PRINCIPAL;
use crate::types::{RelayError, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the chat provider; `/v1` is appended when missing.
    #[arg(long, env = "SIDESTREAM_ENDPOINT", global = true)]
    pub endpoint: Option<String>,
    #[arg(long, env = "SIDESTREAM_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,
    #[arg(long, default_value = DEFAULT_PRINCIPAL, global = true)]
    pub principal: String,
    #[arg(long, default_value_t = 10, global = true)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 300, global = true)]
    pub idle_timeout_secs: u64,
    /// Total timeout for blocking calls; streams are bounded by the idle timeout.
    #[arg(long, default_value_t = 120, global = true)]
    pub request_timeout_secs: u64,
    /// Also write daily-rotated logs into this directory.
    #[arg(long, env = "SIDESTREAM_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the background context over HTTP for remote viewers.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
    /// Stream one turn to the terminal; Ctrl-C cancels it.
    Chat { message: String },
    /// Stream a templated turn for a piece of text.
    Prompt {
        #[arg(value_enum)]
        kind: PromptKind,
        text: String,
        #[arg(long, default_value = "Chinese")]
        target_language: String,
    },
    /// Send one message in blocking mode.
    Ask { message: String },
    /// Check that the API key is accepted.
    Validate,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Summary,
    Chat,
    Translate,
}

impl Args {
    pub fn endpoint(&self) -> Result<&str> {
        match self.endpoint.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => Ok(e),
            _ => Err(RelayError::Config(
                "endpoint is missing; pass --endpoint or set SIDESTREAM_ENDPOINT".to_string(),
            )
            .into()),
        }
    }

    pub fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(k) if !k.is_empty() => Ok(k),
            _ => Err(RelayError::Config(
                "API key is missing; pass --api-key or set SIDESTREAM_API_KEY".to_string(),
            )
            .into()),
        }
    }

    /// Client for streaming calls: no total timeout, the body may take minutes.
    pub fn streaming_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()?;
        Ok(client)
    }

    pub fn blocking_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()?;
        Ok(client)
    }

    pub fn background_settings(&self) -> BackgroundSettings {
        BackgroundSettings {
            principal: self.principal.clone(),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}
