//! Reply generation: request types, prompt building, sanitizing, the offline
//! template engine and the pipeline that ties them together.

pub mod intent;
pub mod offline;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;

pub use pipeline::ReplyPipeline;
pub use prompt::PromptBuilder;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token the model (and the offline templates) use in place of a signature
/// when no sender name is known.
pub const SIGNATURE_PLACEHOLDER: &str = "[Your Name]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Please provide an email to respond to")]
    EmptyEmail,
}

/// Style directive for the generated reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Casual,
    Formal,
    Apologetic,
}

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::Professional,
        Tone::Friendly,
        Tone::Casual,
        Tone::Formal,
        Tone::Apologetic,
    ];

    /// Parse a user-supplied tone. Blank or unknown values become `Professional`.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        Self::ALL
            .into_iter()
            .find(|tone| tone.as_str().eq_ignore_ascii_case(input))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Friendly => "friendly",
            Tone::Casual => "casual",
            Tone::Formal => "formal",
            Tone::Apologetic => "apologetic",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reply request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    email_text: String,
    tone: Tone,
    sender_name: Option<String>,
}

impl ReplyRequest {
    pub fn new(
        email_text: impl Into<String>,
        tone: Tone,
        sender_name: Option<&str>,
    ) -> Result<Self, RequestError> {
        let email_text = email_text.into();
        if email_text.trim().is_empty() {
            return Err(RequestError::EmptyEmail);
        }

        let sender_name = sender_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(Self {
            email_text,
            tone,
            sender_name,
        })
    }

    pub fn email_text(&self) -> &str {
        &self.email_text
    }

    pub fn tone(&self) -> Tone {
        self.tone
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.sender_name.as_deref()
    }
}

/// Where the final reply text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Remote,
    OfflineFallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Remote => f.write_str("remote"),
            Provenance::OfflineFallback => f.write_str("offline_fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyResult {
    pub text: String,
    pub provenance: Provenance,
    /// Why the remote path was skipped or abandoned, phrased for the user
    pub notice: Option<String>,
}

impl ReplyResult {
    pub fn remote(text: String) -> Self {
        Self {
            text,
            provenance: Provenance::Remote,
            notice: None,
        }
    }

    pub fn offline(text: String, notice: Option<String>) -> Self {
        Self {
            text,
            provenance: Provenance::OfflineFallback,
            notice,
        }
    }
}
