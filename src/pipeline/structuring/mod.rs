pub mod types;
pub mod prompt;
pub mod parser;
pub mod gemini;

pub use types::*;
pub use prompt::*;
pub use parser::*;
pub use gemini::*;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Malformed model response ({reason}); response began: {excerpt}")]
    MalformedResponse { reason: String, excerpt: String },

    #[error("Model provider is rate limiting; gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Model provider returned error (status {status}): {body}")]
    ProviderError { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
