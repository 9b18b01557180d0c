mod common;

use async_trait::async_trait;
use common::{Behaviour, fake_endpoints, fake_transports};
use conn_check::{
    FeedbackCollector, FinalReport, ProbeAggregator, Screenshot,
    config::Feedback,
    feedback::{FileScreenshot, FinalCallback, ScreenshotSource},
    probe::{ProbeKind, ProbeResult},
    report::{DESCRIPTION_KEY, SCREENSHOT_BYTES_KEY},
    sanitize::DescriptionSanitizer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Delivered = Arc<Mutex<Vec<Arc<FinalReport>>>>;

fn recorder() -> (Delivered, FinalCallback) {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    (
        delivered,
        Box::new(move |report| sink.lock().unwrap().push(report)),
    )
}

fn collector(http: Behaviour, https: Behaviour) -> FeedbackCollector {
    FeedbackCollector::new(ProbeAggregator::new(fake_transports(http, https), fake_endpoints()))
}

fn shot() -> Screenshot {
    Screenshot::new(vec![0x89, b'P', b'N', b'G'], "image/png")
}

/// Produces a screenshot after a delay, counting captures.
struct SlowCamera {
    delay: Duration,
    captures: AtomicUsize,
}

#[async_trait]
impl ScreenshotSource for SlowCamera {
    async fn capture(&self, _target: &str) -> Option<Screenshot> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Some(shot())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connectivity_alone_never_delivers() {
    let (delivered, on_final) = recorder();
    let join = collector(Behaviour::Status(204), Behaviour::Status(204)).begin(
        "tab",
        Duration::from_millis(100),
        Some(on_final),
    );

    let run = join.connectivity_run().unwrap();
    assert!(run.wait().await.all_connected());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!join.is_done());
    assert!(join.try_get().is_none());
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn screenshot_alone_never_delivers() {
    let (delivered, on_final) = recorder();
    let join = collector(Behaviour::Hang, Behaviour::Hang).begin(
        "tab",
        Duration::from_secs(30),
        Some(on_final),
    );

    join.set_screenshot(shot());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!join.is_done());
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn screenshot_first_then_connectivity_delivers_once() {
    let (delivered, on_final) = recorder();
    let join = collector(
        Behaviour::After(Duration::from_millis(150), 204),
        Behaviour::After(Duration::from_millis(150), 204),
    )
    .begin("tab", Duration::from_secs(5), Some(on_final));

    join.set_screenshot(shot());
    assert!(!join.is_done());

    let report = join.wait().await.unwrap();
    assert!(report.connectivity.all_connected());
    assert_eq!(delivered.lock().unwrap().len(), 1);

    // A second supply of either input is ignored.
    join.set_screenshot(Screenshot::new(vec![1u8; 64], "image/png"));
    join.connectivity_run().unwrap().finalize_now();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(delivered.lock().unwrap().len(), 1);
    assert_eq!(join.try_get().unwrap().screenshot, shot());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connectivity_first_then_screenshot_delivers_once() {
    let (delivered, on_final) = recorder();
    let join = collector(Behaviour::Status(204), Behaviour::Status(404)).begin(
        "tab",
        Duration::from_secs(5),
        Some(on_final),
    );

    join.connectivity_run().unwrap().wait().await;
    assert!(!join.is_done());

    join.set_screenshot(shot());
    let report = join.try_get().expect("delivered synchronously");
    assert_eq!(
        report.connectivity.result(ProbeKind::HostHttps),
        ProbeResult::NotConnected
    );

    join.set_screenshot(shot());
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_connectivity_is_released_by_the_join_deadline() {
    let (delivered, on_final) = recorder();
    let aggregator = ProbeAggregator::new(
        fake_transports(Behaviour::Hang, Behaviour::Hang),
        fake_endpoints(),
    )
    .with_settle(Duration::from_millis(10));
    let join = FeedbackCollector::new(aggregator).begin(
        "tab",
        Duration::from_millis(100),
        Some(on_final),
    );
    join.set_screenshot(shot());

    let report = join.wait().await.unwrap();
    assert_eq!(report.connectivity.results.len(), 4);
    assert!(
        report
            .connectivity
            .results
            .values()
            .all(|r| *r == ProbeResult::Unknown)
    );
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn screenshot_source_is_asked_once_and_awaited() {
    let camera = Arc::new(SlowCamera {
        delay: Duration::from_millis(200),
        captures: AtomicUsize::new(0),
    });
    let (delivered, on_final) = recorder();
    let join = collector(Behaviour::Status(204), Behaviour::Status(204))
        .with_screenshot_source(camera.clone())
        .begin("tab", Duration::from_millis(50), Some(on_final));

    let report = join.wait().await.unwrap();
    assert_eq!(report.screenshot, shot());
    assert_eq!(camera.captures.load(Ordering::SeqCst), 1);
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn text_fields_land_in_the_report_and_freeze_after() {
    let sanitizer = DescriptionSanitizer::new(&Feedback::default()).unwrap();
    let join = collector(Behaviour::Status(204), Behaviour::Status(204))
        .with_sanitizer(sanitizer)
        .begin("settings page", Duration::from_secs(5), None);

    join.add_field("channel", "beta");
    join.add_field("locale", "en-GB");
    join.add_field("channel", "stable");
    join.set_description("Page froze\u{0007}; mail me at someone@example.com  ");
    join.set_screenshot(shot());

    let report = join.wait().await.unwrap();
    assert_eq!(report.target, "settings page");
    assert_eq!(
        report.fields,
        vec![
            ("channel".to_string(), "stable".to_string()),
            ("locale".to_string(), "en-GB".to_string()),
        ]
    );
    assert_eq!(report.description, "Page froze; mail me at [redacted]");

    join.add_field("late", "value");
    join.set_description("changed");
    let again = join.try_get().unwrap();
    assert_eq!(again.fields.len(), 2);
    assert_eq!(again.description, "Page froze; mail me at [redacted]");

    let flat = again.flatten();
    assert_eq!(flat.get("channel").map(String::as_str), Some("stable"));
    assert_eq!(flat.get("HOST_HTTP").map(String::as_str), Some("CONNECTED"));
    assert_eq!(flat.get(SCREENSHOT_BYTES_KEY).map(String::as_str), Some("4"));
    assert_eq!(
        flat.get(DESCRIPTION_KEY).map(String::as_str),
        Some("Page froze; mail me at [redacted]")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_screenshot_reads_image_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.PNG");
    std::fs::write(&path, [1u8, 2, 3, 4, 5]).unwrap();

    let shot = FileScreenshot::new(&path).capture("tab").await.unwrap();
    assert_eq!(shot.mime(), "image/png");
    assert_eq!(shot.bytes(), &[1, 2, 3, 4, 5]);

    let missing = FileScreenshot::new(dir.path().join("missing.png"))
        .capture("tab")
        .await;
    assert!(missing.is_none());
}
