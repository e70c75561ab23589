//! Offline backend producing canned results behind artificial latency.

use std::sync::Arc;

use chrono::Utc;
use shared::domain::{CaptionRecord, CaseId, CaseMetadata, ImageUpload};
use tracing::debug;

use crate::{
    latency::{LatencyRange, RandomSource, Sleeper, ThreadRandom, TokioSleeper},
    report::{render_report, ReportArtifact},
    HealthReport,
};

pub const SIMULATED_FINDINGS: &[&str] = &[
    "The chest X-ray demonstrates clear lung fields bilaterally with no evidence of acute \
     cardiopulmonary process. The cardiac silhouette appears normal in size and configuration. \
     No pleural effusions or pneumothorax identified. Bone structures appear intact without \
     obvious fractures.",
    "Frontal chest radiograph shows normal lung expansion with clear lung fields. The heart size \
     is within normal limits. No focal consolidation, pleural effusion, or pneumothorax is seen. \
     The mediastinal contours are unremarkable. Osseous structures appear normal.",
    "The lungs are well-expanded and clear without focal consolidation. Cardiac size and \
     mediastinal contours are within normal limits. No pleural effusion or pneumothorax \
     identified. The visualized osseous structures show no acute abnormalities.",
    "Clear lung fields bilaterally with no evidence of infiltrates or masses. Normal cardiac size \
     and configuration. No pleural effusion or pneumothorax present. The diaphragm is \
     appropriately positioned and the costophrenic angles are sharp.",
    "Normal appearing chest X-ray with clear lung fields. The heart appears normal in size. No \
     acute findings such as consolidation, effusion, or pneumothorax are identified. Bone \
     structures within the field of view appear unremarkable.",
];

pub const CAPTION_CONFIDENCE: (f64, f64) = (0.8, 1.0);
pub const CAPTION_REPORTED_LATENCY_SECONDS: (f64, f64) = (1.0, 4.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedLatency {
    pub caption: LatencyRange,
    pub report: LatencyRange,
    pub save_case: LatencyRange,
}

impl Default for SimulatedLatency {
    fn default() -> Self {
        Self {
            caption: LatencyRange::from_millis(2000, 4000),
            report: LatencyRange::from_millis(1000, 2000),
            save_case: LatencyRange::from_millis(300, 800),
        }
    }
}

pub struct SimulatedBackend {
    latency: SimulatedLatency,
    random: Arc<dyn RandomSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatedLatency::default())
    }
}

impl SimulatedBackend {
    pub fn new(latency: SimulatedLatency) -> Self {
        Self::with_dependencies(latency, Arc::new(ThreadRandom), Arc::new(TokioSleeper))
    }

    pub fn with_dependencies(
        latency: SimulatedLatency,
        random: Arc<dyn RandomSource>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            latency,
            random,
            sleeper,
        }
    }

    pub fn latency(&self) -> SimulatedLatency {
        self.latency
    }

    async fn pause(&self, range: LatencyRange, operation: &'static str) {
        let delay = range.sample(self.random.as_ref());
        debug!(
            operation,
            delay_ms = delay.as_millis() as u64,
            "simulated: delaying response"
        );
        self.sleeper.sleep(delay).await;
    }

    /// The image is never inspected.
    pub async fn caption(&self, _image: &ImageUpload) -> CaptionRecord {
        self.pause(self.latency.caption, "caption").await;

        let text = SIMULATED_FINDINGS[self.random.index(SIMULATED_FINDINGS.len())];
        let confidence = self
            .random
            .uniform(CAPTION_CONFIDENCE.0, CAPTION_CONFIDENCE.1);
        let latency_seconds = self.random.uniform(
            CAPTION_REPORTED_LATENCY_SECONDS.0,
            CAPTION_REPORTED_LATENCY_SECONDS.1,
        );
        CaptionRecord::new(text, confidence, latency_seconds)
    }

    pub async fn report(&self, case: &CaseMetadata) -> ReportArtifact {
        self.pause(self.latency.report, "report").await;
        render_report(case, Utc::now())
    }

    pub async fn save_case(&self, _case: &CaseMetadata) -> CaseId {
        self.pause(self.latency.save_case, "save_case").await;
        CaseId::local()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::Simulated
    }
}

#[cfg(test)]
#[path = "tests/simulated_tests.rs"]
mod tests;
