use crate::{
    config::Config,
    connection::{ConnectionType, ConnectionTypeSource, FixedConnectionType},
    probe::{self, Endpoints, Method, ProbeKind, ProbeRequest, ProbeResult},
    report::ReportData,
    transport::Transports,
    util::lock,
};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

pub type ResultCallback = Box<dyn FnOnce(ReportData) + Send + 'static>;

/// What closed a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    AllAnswered,
    Deadline,
    Forced,
}

/// Launches the four connectivity probes and joins their answers.
pub struct ProbeAggregator {
    transports: Transports,
    endpoints: Endpoints,
    method: Method,
    settle: Duration,
    connection: Arc<dyn ConnectionTypeSource>,
}

impl ProbeAggregator {
    pub fn new(transports: Transports, endpoints: Endpoints) -> Self {
        Self {
            transports,
            endpoints,
            method: Method::Get,
            settle: Duration::from_millis(100),
            connection: Arc::new(FixedConnectionType::default()),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let connection: ConnectionType = cfg.report.connection_type.parse()?;
        Ok(Self::new(
            Transports::from_config(cfg),
            Endpoints::new(&cfg.probe.http_url, &cfg.probe.https_url),
        )
        .with_method(cfg.probe.method)
        .with_settle(cfg.probe.settle())
        .with_connection_source(Arc::new(FixedConnectionType(connection))))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_connection_source(mut self, source: Arc<dyn ConnectionTypeSource>) -> Self {
        self.connection = source;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Starts one run. Each probe gets `timeout`; the aggregate timer closes
    /// the run after `timeout` plus the settle window if any probe is still
    /// out. Must be called from within a Tokio runtime.
    pub fn start(&self, timeout: Duration, on_result: Option<ResultCallback>) -> ProbeRun {
        let (done, _) = watch::channel(false);
        let shared = Arc::new(RunShared {
            started: Instant::now(),
            timeout,
            window: timeout + self.settle,
            connection: Arc::clone(&self.connection),
            state: Mutex::new(RunState {
                slots: BTreeMap::new(),
                report: None,
                on_result,
                timer: None,
            }),
            ready: Condvar::new(),
            done,
        });

        debug!(
            http = %self.endpoints.http,
            https = %self.endpoints.https,
            timeout_ms = millis(timeout),
            "starting connectivity run"
        );

        for kind in ProbeKind::ALL {
            let transport = self.transports.get(kind.transport());
            let request = ProbeRequest {
                url: self.endpoints.url(kind.scheme()).to_string(),
                method: self.method,
                timeout,
            };
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let result = probe::run(transport.as_ref(), &request).await;
                shared.record(kind, result);
            });
        }

        let timer = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep(shared.window).await;
                shared.finalize(Trigger::Deadline);
            })
        };
        shared.arm_timer(timer.abort_handle());

        ProbeRun { shared }
    }
}

/// Handle to one run. Clones observe the same run.
#[derive(Clone)]
pub struct ProbeRun {
    shared: Arc<RunShared>,
}

impl ProbeRun {
    pub fn is_done(&self) -> bool {
        lock(&self.shared.state).report.is_some()
    }

    /// `None` until the run has finalized.
    pub fn try_get(&self) -> Option<ReportData> {
        lock(&self.shared.state).report.clone()
    }

    /// Parks the calling thread until the run finalizes. Do not call from a
    /// Tokio worker thread; use [`ProbeRun::wait`] there.
    pub fn blocking_get(&self) -> ReportData {
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(report) = &state.report {
                return report.clone();
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub async fn wait(&self) -> ReportData {
        let mut rx = self.shared.done.subscribe();
        // The sender lives in `shared`, so this only errs if that invariant breaks.
        if rx.wait_for(|done| *done).await.is_err() {
            return self.finalize_now();
        }
        self.try_get().unwrap_or_else(|| self.finalize_now())
    }

    /// Closes the run now, marking unanswered slots `UNKNOWN`. Returns the
    /// final data, which is the earlier one if the run had already finalized.
    pub fn finalize_now(&self) -> ReportData {
        self.shared.finalize(Trigger::Forced)
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Time after start at which the aggregate timer closes the run.
    pub fn window(&self) -> Duration {
        self.shared.window
    }
}

struct RunShared {
    started: Instant,
    timeout: Duration,
    window: Duration,
    connection: Arc<dyn ConnectionTypeSource>,
    state: Mutex<RunState>,
    ready: Condvar,
    done: watch::Sender<bool>,
}

struct RunState {
    slots: BTreeMap<ProbeKind, ProbeResult>,
    report: Option<ReportData>,
    on_result: Option<ResultCallback>,
    timer: Option<AbortHandle>,
}

impl RunShared {
    fn record(&self, kind: ProbeKind, result: ProbeResult) {
        let mut state = lock(&self.state);
        if state.report.is_some() {
            warn!(%kind, %result, "discarding probe answer that arrived after finalization");
            return;
        }
        state.slots.insert(kind, result);
        if state.slots.len() == ProbeKind::ALL.len() {
            self.complete(state, Trigger::AllAnswered);
        }
    }

    fn arm_timer(&self, timer: AbortHandle) {
        let mut state = lock(&self.state);
        if state.report.is_some() {
            timer.abort();
        } else {
            state.timer = Some(timer);
        }
    }

    fn finalize(&self, trigger: Trigger) -> ReportData {
        let state = lock(&self.state);
        self.complete(state, trigger)
    }

    // The latch is `state.report`: only the first caller to see it empty
    // builds the report. The callback and waiters run after the lock drops.
    fn complete(&self, mut state: MutexGuard<'_, RunState>, trigger: Trigger) -> ReportData {
        if let Some(report) = &state.report {
            return report.clone();
        }

        let results: BTreeMap<ProbeKind, ProbeResult> = ProbeKind::ALL
            .iter()
            .map(|kind| {
                let result = state.slots.get(kind).copied().unwrap_or(ProbeResult::Unknown);
                (*kind, result)
            })
            .collect();
        let report = ReportData {
            results,
            timeout_ms: millis(self.timeout),
            elapsed_ms: millis(self.started.elapsed()),
            connection_type: self.connection.current(),
        };
        state.report = Some(report.clone());
        let callback = state.on_result.take();
        let timer = state.timer.take();
        drop(state);

        if trigger != Trigger::Deadline {
            if let Some(timer) = timer {
                timer.abort();
            }
        }

        let unknown = report
            .results
            .values()
            .filter(|r| **r == ProbeResult::Unknown)
            .count();
        info!(
            ?trigger,
            elapsed_ms = report.elapsed_ms,
            unknown,
            connection = %report.connection_type,
            "connectivity run finalized"
        );

        // The push consumer sees the data before any waiter wakes.
        if let Some(callback) = callback {
            callback(report.clone());
        }
        self.ready.notify_all();
        self.done.send_replace(true);
        report
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
