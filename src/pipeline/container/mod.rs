//! Mail-message containers: header, body and attachments out of one file.

pub mod msg;

pub use msg::MsgUnpacker;

use thiserror::Error;

use crate::pipeline::types::RawFile;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Not a compound file: {0}")]
    Cfb(String),

    #[error("Missing required stream: {0}")]
    MissingStream(String),

    #[error("I/O error while reading container: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the pipeline needs from a mail message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnpackedMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<RawFile>,
}

impl UnpackedMessage {
    /// Header and body as one text block.
    pub fn header_text(&self) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\nBody:\n{}",
            self.from, self.to, self.subject, self.body
        )
    }
}

/// Container parser abstraction (allows mocking for tests).
pub trait ContainerUnpacker {
    fn unpack(&self, bytes: &[u8]) -> Result<UnpackedMessage, ContainerError>;
}
