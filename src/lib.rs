#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod background;
pub mod blocking;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod driver;
pub mod endpoint;
pub mod logging;
pub mod prompts;
pub mod protocol;
pub mod redaction;
pub mod relay;
pub mod server;
pub mod session;
pub mod splitter;
pub mod sse;
pub mod str_utils;
pub mod terminal;
pub mod types;
pub mod viewer;

pub use types::*;

pub use background::BackgroundHandle;
pub use config::Args;
