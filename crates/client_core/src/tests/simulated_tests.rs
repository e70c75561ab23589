use super::*;

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    latency::SeededRandom,
    report::{ReportFormat, REPORT_BANNER},
};

#[derive(Default)]
struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().expect("sleeper lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("sleeper lock").push(duration);
    }
}

struct ScriptedRandom {
    values: Mutex<Vec<f64>>,
}

impl ScriptedRandom {
    fn new(mut values: Vec<f64>) -> Self {
        values.reverse();
        Self {
            values: Mutex::new(values),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn next_unit(&self) -> f64 {
        self.values
            .lock()
            .expect("random lock")
            .pop()
            .expect("scripted value")
    }
}

fn backend_with(random: Arc<dyn RandomSource>) -> (SimulatedBackend, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let backend =
        SimulatedBackend::with_dependencies(SimulatedLatency::default(), random, sleeper.clone());
    (backend, sleeper)
}

fn image() -> ImageUpload {
    ImageUpload::new("chest.png", vec![0x89, b'P', b'N', b'G']).with_mime_type("image/png")
}

#[tokio::test]
async fn captions_stay_within_pool_and_bounds() {
    let (backend, sleeper) = backend_with(Arc::new(SeededRandom::new(0xC0FFEE)));

    for _ in 0..200 {
        let record = backend.caption(&image()).await;
        assert!(SIMULATED_FINDINGS.contains(&record.text.as_str()));
        assert!((0.8..=1.0).contains(&record.confidence), "{}", record.confidence);
        assert!(
            (1.0..=4.0).contains(&record.latency_seconds),
            "{}",
            record.latency_seconds
        );
    }

    let delays = sleeper.recorded();
    assert_eq!(delays.len(), 200);
    let range = SimulatedLatency::default().caption;
    assert!(delays.iter().all(|d| range.contains(*d)));
}

#[tokio::test]
async fn caption_uses_random_source_for_every_draw() {
    // delay, pool index, confidence, reported latency
    let (backend, sleeper) = backend_with(Arc::new(ScriptedRandom::new(vec![
        0.5, 0.99, 0.0, 0.5,
    ])));

    let record = backend.caption(&image()).await;
    assert_eq!(record.text, SIMULATED_FINDINGS[4]);
    assert_eq!(record.confidence, 0.8);
    assert_eq!(record.latency_seconds, 2.5);
    assert_eq!(sleeper.recorded(), vec![Duration::from_millis(3000)]);
}

#[tokio::test]
async fn caption_ignores_image_content() {
    let (backend, _) = backend_with(Arc::new(ScriptedRandom::new(vec![
        0.1, 0.3, 0.2, 0.2, 0.1, 0.3, 0.2, 0.2,
    ])));

    let a = backend.caption(&image()).await;
    let b = backend
        .caption(&ImageUpload::new("empty.bin", Vec::new()))
        .await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn report_delay_is_within_range_and_artifact_is_pdf() {
    let (backend, sleeper) = backend_with(Arc::new(SeededRandom::new(3)));

    let artifact = backend.report(&CaseMetadata::new()).await;
    assert_eq!(artifact.format, ReportFormat::Pdf);
    assert!(artifact.bytes.starts_with(b"%PDF-"));
    assert!(String::from_utf8_lossy(&artifact.bytes).contains(REPORT_BANNER));

    let delays = sleeper.recorded();
    assert_eq!(delays.len(), 1);
    assert!(SimulatedLatency::default().report.contains(delays[0]));
}

#[tokio::test]
async fn report_never_fails_on_unencodable_metadata() {
    let (backend, _) = backend_with(Arc::new(SeededRandom::new(4)));
    let case = CaseMetadata::new().with_field("patientName", "李雷");

    let artifact = backend.report(&case).await;
    assert_eq!(artifact.format, ReportFormat::PlainText);
    assert!(!artifact.bytes.is_empty());
}

#[tokio::test]
async fn save_case_fabricates_distinct_local_ids() {
    let (backend, sleeper) = backend_with(Arc::new(SeededRandom::new(5)));

    let first = backend.save_case(&CaseMetadata::new()).await;
    let second = backend.save_case(&CaseMetadata::new()).await;
    assert!(first.is_local());
    assert!(second.is_local());
    assert_ne!(first, second);
    assert!(sleeper
        .recorded()
        .iter()
        .all(|d| SimulatedLatency::default().save_case.contains(*d)));
}

#[tokio::test]
async fn default_backend_really_waits() {
    let backend = SimulatedBackend::with_dependencies(
        SimulatedLatency {
            caption: LatencyRange::from_millis(20, 40),
            ..SimulatedLatency::default()
        },
        Arc::new(ThreadRandom),
        Arc::new(TokioSleeper),
    );

    let started = Instant::now();
    backend.caption(&image()).await;
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn health_always_reports_simulated() {
    assert_eq!(SimulatedBackend::default().health(), HealthReport::Simulated);
}
