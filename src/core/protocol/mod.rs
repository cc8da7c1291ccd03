//! Application protocol on the data channel.
//!
//! Every message is one JSON text frame carrying a `type` tag:
//! chat text plus the four messages of the chunked file-transfer
//! sub-protocol (`file-start`, `chunk`, `chunk-ack`, `file-end`).

mod dispatcher;
mod wire;

pub use dispatcher::{Dispatcher, MessageHandler};
pub use wire::{WireMessage, decode, encode};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Identifier of one file transfer, chosen by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
