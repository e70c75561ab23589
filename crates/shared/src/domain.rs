use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which backend the orchestrator consults first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModeState {
    #[default]
    Remote,
    Simulated,
}

impl ModeState {
    pub fn from_simulated(simulated: bool) -> Self {
        if simulated {
            ModeState::Simulated
        } else {
            ModeState::Remote
        }
    }

    pub fn is_simulated(self) -> bool {
        matches!(self, ModeState::Simulated)
    }

    pub fn flipped(self) -> Self {
        match self {
            ModeState::Remote => ModeState::Simulated,
            ModeState::Simulated => ModeState::Remote,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ModeState::Remote => "Backend Mode",
            ModeState::Simulated => "Demo Mode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub text: String,
    pub confidence: f64,
    pub latency_seconds: f64,
}

impl CaptionRecord {
    /// Clamps `confidence` into `[0, 1]` and `latency_seconds` to be non-negative.
    pub fn new(text: impl Into<String>, confidence: f64, latency_seconds: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let latency_seconds = if latency_seconds.is_finite() {
            latency_seconds.max(0.0)
        } else {
            0.0
        };
        Self {
            text: text.into(),
            confidence,
            latency_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
    /// Identifier for a case that never reached the backend.
    pub fn local() -> Self {
        Self(format!("LOCAL-{}", Uuid::new_v4().simple()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("LOCAL-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Form fields collected by the UI. Forwarded as-is; nothing here is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    #[serde(
        rename = "aiCaption",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ai_caption: Option<String>,
}

impl CaseMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.ai_caption = Some(caption.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult<T> {
    Success(T),
    Failure { reason: String },
}

impl<T> OperationResult<T> {
    pub fn failure(reason: impl Into<String>) -> Self {
        OperationResult::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            OperationResult::Success(payload) => Some(payload),
            OperationResult::Failure { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        match self {
            OperationResult::Success(payload) => OperationResult::Success(f(payload)),
            OperationResult::Failure { reason } => OperationResult::Failure { reason },
        }
    }
}
