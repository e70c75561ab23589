//! Wire shapes exchanged with the inference/report backend.

use serde::{Deserialize, Serialize};

use crate::domain::{CaseId, CaseMetadata};

/// Response of `POST /generate-caption`.
///
/// Older backends answer with `success: true`, newer ones with
/// `status: "success"`; either marks the call as successful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl CaptionResponse {
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(false) || self.status.as_deref() == Some("success")
    }

}

/// Body of `POST /save-case`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveCaseRequest {
    #[serde(flatten)]
    pub case: CaseMetadata,
}

/// Response of `POST /save-case`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveCaseResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<CaseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

/// JSON body returned alongside a non-success status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_success_accepts_either_marker() {
        let legacy: CaptionResponse =
            serde_json::from_str(r#"{"success": true, "caption": "x"}"#).expect("legacy");
        assert!(legacy.is_success());

        let status: CaptionResponse = serde_json::from_str(
            r#"{"caption": "x", "status": "success", "confidence": 0.9, "processing_time": 2.1}"#,
        )
        .expect("status");
        assert!(status.is_success());
        assert_eq!(status.confidence, Some(0.9));

        let failed: CaptionResponse =
            serde_json::from_str(r#"{"success": false, "error": "Model not loaded"}"#)
                .expect("failed");
        assert!(!failed.is_success());
        assert_eq!(failed.error.as_deref(), Some("Model not loaded"));
    }

    #[test]
    fn save_case_request_flattens_metadata() {
        let request = SaveCaseRequest {
            case: CaseMetadata::new()
                .with_field("caseDiagnosis", "Normal study")
                .with_caption("No acute findings."),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["caseDiagnosis"], "Normal study");
        assert_eq!(value["aiCaption"], "No acute findings.");
    }

    #[test]
    fn health_defaults_to_model_not_loaded() {
        let health: HealthResponse = serde_json::from_str(r#"{"status":"healthy"}"#).expect("health");
        assert!(!health.model_loaded);
    }
}
