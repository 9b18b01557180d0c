use crate::{
    aggregator::{ProbeAggregator, ProbeRun},
    config::Config,
    report::{FinalReport, ReportData, Screenshot},
    sanitize::DescriptionSanitizer,
    util::{lock, now_rfc3339},
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub type FinalCallback = Box<dyn FnOnce(Arc<FinalReport>) + Send + 'static>;

/// Produces the screenshot for a report. No deadline is imposed on it;
/// returning `None` leaves the report pending for good.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn capture(&self, target: &str) -> Option<Screenshot>;
}

/// Reads a previously captured image from disk.
#[derive(Debug, Clone)]
pub struct FileScreenshot {
    path: PathBuf,
}

impl FileScreenshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn mime(&self) -> &'static str {
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
impl ScreenshotSource for FileScreenshot {
    async fn capture(&self, target: &str) -> Option<Screenshot> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Some(Screenshot::new(bytes, self.mime())),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    context = target,
                    "screenshot read failed: {err}"
                );
                None
            }
        }
    }
}

/// Starts feedback joins: one connectivity run plus one screenshot each.
pub struct FeedbackCollector {
    aggregator: ProbeAggregator,
    screenshots: Option<Arc<dyn ScreenshotSource>>,
    sanitizer: DescriptionSanitizer,
}

impl FeedbackCollector {
    pub fn new(aggregator: ProbeAggregator) -> Self {
        Self {
            aggregator,
            screenshots: None,
            sanitizer: DescriptionSanitizer::passthrough(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(ProbeAggregator::from_config(cfg)?)
            .with_sanitizer(DescriptionSanitizer::new(&cfg.feedback)?))
    }

    /// Without a source the caller supplies the image through
    /// [`FeedbackJoin::set_screenshot`].
    pub fn with_screenshot_source(mut self, source: Arc<dyn ScreenshotSource>) -> Self {
        self.screenshots = Some(source);
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: DescriptionSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Must be called from within a Tokio runtime.
    pub fn begin(
        &self,
        target: impl Into<String>,
        timeout: Duration,
        on_final: Option<FinalCallback>,
    ) -> FeedbackJoin {
        let (done, _) = watch::channel(false);
        let shared = Arc::new(JoinShared {
            target: target.into(),
            sanitizer: self.sanitizer.clone(),
            state: Mutex::new(JoinState {
                fields: Vec::new(),
                description: String::new(),
                screenshot: None,
                connectivity: None,
                run: None,
                report: None,
                on_final,
            }),
            done,
        });

        let weak = Arc::downgrade(&shared);
        let run = self.aggregator.start(
            timeout,
            Some(Box::new(move |data| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_connectivity(data);
                }
            })),
        );
        lock(&shared.state).run = Some(run.clone());

        // The join keeps its own clock so a stalled run cannot hold the
        // report back; forcing the run hands over whatever it has.
        tokio::spawn(async move {
            tokio::time::sleep(run.window()).await;
            if !run.is_done() {
                debug!("feedback deadline reached before connectivity run finished");
                run.finalize_now();
            }
        });

        if let Some(source) = &self.screenshots {
            let source = Arc::clone(source);
            let weak: Weak<JoinShared> = Arc::downgrade(&shared);
            let target = shared.target.clone();
            tokio::spawn(async move {
                match source.capture(&target).await {
                    Some(shot) => {
                        if let Some(shared) = weak.upgrade() {
                            shared.on_screenshot(shot);
                        }
                    }
                    None => warn!(
                        context = %target,
                        "screenshot source produced nothing; report stays pending"
                    ),
                }
            });
        }

        FeedbackJoin { shared }
    }
}

/// Handle to one pending or delivered feedback report.
#[derive(Clone)]
pub struct FeedbackJoin {
    shared: Arc<JoinShared>,
}

impl FeedbackJoin {
    /// Adds a key/value pair. Re-adding a key replaces its value in place.
    pub fn add_field(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        let mut state = lock(&self.shared.state);
        if state.report.is_some() {
            warn!(key, "ignoring field added after the report was delivered");
            return;
        }
        match state.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => state.fields.push((key, value)),
        }
    }

    pub fn set_description(&self, text: &str) {
        let description = self.shared.sanitizer.apply(text);
        let mut state = lock(&self.shared.state);
        if state.report.is_some() {
            warn!("ignoring description set after the report was delivered");
            return;
        }
        state.description = description;
    }

    pub fn set_screenshot(&self, screenshot: Screenshot) {
        self.shared.on_screenshot(screenshot);
    }

    pub fn is_done(&self) -> bool {
        lock(&self.shared.state).report.is_some()
    }

    pub fn try_get(&self) -> Option<Arc<FinalReport>> {
        lock(&self.shared.state).report.clone()
    }

    /// Resolves once the report is delivered. Never resolves if no
    /// screenshot ever arrives.
    pub async fn wait(&self) -> Option<Arc<FinalReport>> {
        let mut rx = self.shared.done.subscribe();
        rx.wait_for(|done| *done).await.ok()?;
        self.try_get()
    }

    pub fn connectivity_run(&self) -> Option<ProbeRun> {
        lock(&self.shared.state).run.clone()
    }
}

struct JoinShared {
    target: String,
    sanitizer: DescriptionSanitizer,
    state: Mutex<JoinState>,
    done: watch::Sender<bool>,
}

struct JoinState {
    fields: Vec<(String, String)>,
    description: String,
    screenshot: Option<Screenshot>,
    connectivity: Option<ReportData>,
    run: Option<ProbeRun>,
    report: Option<Arc<FinalReport>>,
    on_final: Option<FinalCallback>,
}

impl JoinShared {
    fn on_connectivity(&self, data: ReportData) {
        let mut state = lock(&self.state);
        if state.report.is_some() || state.connectivity.is_some() {
            return;
        }
        debug!(elapsed_ms = data.elapsed_ms, "feedback received connectivity data");
        state.connectivity = Some(data);
        self.try_complete(state);
    }

    fn on_screenshot(&self, screenshot: Screenshot) {
        let mut state = lock(&self.state);
        if state.report.is_some() {
            warn!("ignoring screenshot supplied after the report was delivered");
            return;
        }
        debug!(bytes = screenshot.len(), "feedback received screenshot");
        state.screenshot = Some(screenshot);
        self.try_complete(state);
    }

    // Delivery needs both inputs; the callback runs after the lock drops.
    fn try_complete(&self, mut state: MutexGuard<'_, JoinState>) {
        if state.report.is_some() {
            return;
        }
        let (Some(connectivity), Some(screenshot)) = (&state.connectivity, &state.screenshot)
        else {
            return;
        };

        let report = Arc::new(FinalReport {
            target: self.target.clone(),
            created_at: now_rfc3339(),
            connectivity: connectivity.clone(),
            screenshot: screenshot.clone(),
            description: state.description.clone(),
            fields: state.fields.clone(),
        });
        state.report = Some(Arc::clone(&report));
        let callback = state.on_final.take();
        drop(state);

        info!(
            context = %self.target,
            fields = report.fields.len(),
            screenshot_bytes = report.screenshot.len(),
            "feedback report finalized"
        );

        if let Some(callback) = callback {
            callback(report);
        }
        self.done.send_replace(true);
    }
}
