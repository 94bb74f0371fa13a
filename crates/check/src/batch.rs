//! Concurrent batch runner
//!
//! Runs many independent test units under a concurrency cap. A failing unit
//! is recorded in the report's [`ErrorTable`] and never affects its siblings;
//! failures outside any unit (cleanup errors, escaped panics, detached tasks
//! registered with a [`RejectionTracker`]) land in the
//! [`UNHANDLED_REJECTIONS`] bucket.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snapgrid_common::{Error, Result, RunnerOptions, TestResults};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::results::{results_channel, ResultsSender};

/// Error-table bucket for failures outside any unit
pub const UNHANDLED_REJECTIONS: &str = "Unhandled Rejections";

/// Mode key used for tests that do not declare an execution mode
pub const DEFAULT_MODE_KEY: &str = "default";

/// How a test captures its screenshots; only affects naming and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModeKind {
    VisualGrid,
    CssStitching,
    ScrollStitching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionMode {
    pub kind: ExecutionModeKind,
    /// Use the bare test name as baseline name
    #[serde(default)]
    pub use_strict_name: bool,
}

impl ExecutionMode {
    pub fn new(kind: ExecutionModeKind) -> Self {
        Self {
            kind,
            use_strict_name: false,
        }
    }

    pub fn visual_grid() -> Self {
        Self::new(ExecutionModeKind::VisualGrid)
    }

    pub fn css_stitching() -> Self {
        Self::new(ExecutionModeKind::CssStitching)
    }

    pub fn scroll_stitching() -> Self {
        Self::new(ExecutionModeKind::ScrollStitching)
    }

    pub fn strict_name(mut self) -> Self {
        self.use_strict_name = true;
        self
    }

    /// Key under which failures of this mode are recorded
    pub fn key(&self) -> &'static str {
        match self.kind {
            ExecutionModeKind::VisualGrid => "visual_grid",
            ExecutionModeKind::CssStitching => "css_stitching",
            ExecutionModeKind::ScrollStitching => "scroll_stitching",
        }
    }

    pub fn baseline_suffix(&self) -> &'static str {
        if self.use_strict_name {
            return "";
        }
        match self.kind {
            ExecutionModeKind::VisualGrid => "_VG",
            ExecutionModeKind::ScrollStitching => "_Scroll",
            ExecutionModeKind::CssStitching => "",
        }
    }
}

/// One unit of work for the batch runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_mode: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn mode_key(&self) -> &'static str {
        self.execution_mode
            .as_ref()
            .map_or(DEFAULT_MODE_KEY, ExecutionMode::key)
    }

    /// Baseline name handed to setup: test name plus the mode's suffix
    pub fn baseline_test_name(&self) -> String {
        let suffix = self
            .execution_mode
            .as_ref()
            .map_or("", ExecutionMode::baseline_suffix);
        format!("{}{}", self.name, suffix)
    }
}

/// Identifying metadata passed to a unit's setup hook
#[derive(Clone)]
pub struct SetupInfo {
    pub baseline_test_name: String,
    pub branch_name: String,
    pub host: Option<String>,
    pub test: TestCase,
    /// Register detached work whose failures would otherwise go unobserved
    pub rejections: RejectionTracker,
    /// Hand to the unit's lifecycle so its results land in the report
    pub results: ResultsSender,
}

/// Per-unit test implementation, created fresh for every unit
#[async_trait]
pub trait TestHarness: Send + 'static {
    async fn setup(&mut self, _info: SetupInfo) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(&mut self, test_name: &str) -> anyhow::Result<()>;

    /// Always runs after `run`, even when setup or the body failed
    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Collects failures of work running outside any unit
#[derive(Clone, Default)]
pub struct RejectionTracker {
    failures: Arc<Mutex<Vec<String>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RejectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` detached; its error or panic is recorded
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let failures = self.failures.clone();
        let task = tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.lock().push(format!("{:#}", e)),
                Err(panic) => failures.lock().push(panic_message(panic.as_ref())),
            }
        });
        self.tasks.lock().push(task);
    }

    pub fn report(&self, failure: impl Into<String>) {
        self.failures.lock().push(failure.into());
    }

    /// Wait for every spawned task (including ones spawned meanwhile) and
    /// drain the recorded failures
    pub async fn settle(&self) -> Vec<String> {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    self.report(e.to_string());
                }
            }
        }
        std::mem::take(&mut *self.failures.lock())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Failures keyed by test name, then execution-mode key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorTable(BTreeMap<String, BTreeMap<String, String>>);

impl ErrorTable {
    pub fn record(&mut self, test_name: &str, mode_key: &str, message: impl Into<String>) {
        self.0
            .entry(test_name.to_string())
            .or_default()
            .insert(mode_key.to_string(), message.into());
    }

    /// Record a failure that happened outside any unit
    pub fn record_unhandled(&mut self, message: impl Into<String>) {
        let bucket = self.0.entry(UNHANDLED_REJECTIONS.to_string()).or_default();
        let key = format!("{:04}", bucket.len());
        bucket.insert(key, message.into());
    }

    pub fn get(&self, test_name: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(test_name)
    }

    pub fn failed(&self, test_name: &str, mode_key: &str) -> bool {
        self.0
            .get(test_name)
            .map_or(false, |modes| modes.contains_key(mode_key))
    }

    pub fn unhandled(&self) -> Vec<&str> {
        self.0
            .get(UNHANDLED_REJECTIONS)
            .map(|bucket| bucket.values().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Counts derived from the error table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub duration_ms: u64,
    pub tests: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub executions: usize,
    pub executions_passed: usize,
    pub executions_failed: usize,
}

/// Report entry for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub test_name: String,
    pub parameters: SendParameters,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendParameters {
    pub mode: String,
}

/// Payload consumed by downstream reporting tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub sdk: String,
    pub results: Vec<SendResult>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub sdk_name: String,
    pub started_at: DateTime<Utc>,
    pub stats: BatchStats,
    pub errors: ErrorTable,
    pub tests_ran: Vec<TestCase>,
    /// Results published by every unit's lifecycle
    pub results: Vec<TestResults>,
}

impl BatchReport {
    /// True when no unit failed and nothing was rejected outside a unit
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_send_report(&self) -> SendReport {
        SendReport {
            sdk: self.sdk_name.clone(),
            results: self
                .tests_ran
                .iter()
                .map(|test| SendResult {
                    test_name: test.name.clone(),
                    parameters: SendParameters {
                        mode: test.mode_key().to_string(),
                    },
                    passed: !self.errors.failed(&test.name, test.mode_key()),
                })
                .collect(),
        }
    }

    fn new(
        sdk_name: String,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        errors: ErrorTable,
        tests_ran: Vec<TestCase>,
        results: Vec<TestResults>,
    ) -> Self {
        let mut names: Vec<&str> = tests_ran.iter().map(|test| test.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let tests_failed = names
            .iter()
            .filter(|name| errors.get(name).is_some())
            .count();
        let executions_failed = tests_ran
            .iter()
            .filter(|test| errors.failed(&test.name, test.mode_key()))
            .count();

        let stats = BatchStats {
            duration_ms,
            tests: names.len(),
            tests_passed: names.len() - tests_failed,
            tests_failed,
            executions: tests_ran.len(),
            executions_passed: tests_ran.len() - executions_failed,
            executions_failed,
        };

        Self {
            sdk_name,
            started_at,
            stats,
            errors,
            tests_ran,
            results,
        }
    }
}

struct UnitOutcome {
    failure: Option<String>,
    cleanup_failure: Option<String>,
}

async fn run_unit<H: TestHarness>(mut harness: H, test: TestCase, info: SetupInfo) -> UnitOutcome {
    let body = AssertUnwindSafe(async {
        harness.setup(info).await?;
        harness.run(&test.name).await
    })
    .catch_unwind()
    .await;

    let failure = match body {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    let cleanup_failure = match AssertUnwindSafe(harness.cleanup()).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    UnitOutcome {
        failure,
        cleanup_failure,
    }
}

/// Runs test units under a concurrency cap
pub struct BatchRunner<F> {
    sdk_name: String,
    factory: F,
}

impl<F, H> BatchRunner<F>
where
    F: Fn() -> H,
    H: TestHarness,
{
    /// `factory` creates a fresh harness for every unit
    pub fn new(sdk_name: impl Into<String>, factory: F) -> Self {
        Self {
            sdk_name: sdk_name.into(),
            factory,
        }
    }

    /// Run every test and wait for all of them to settle.
    ///
    /// Only invalid options fail the run; unit failures end up in the report.
    pub async fn run(&self, tests: &[TestCase], options: &RunnerOptions) -> Result<BatchReport> {
        options.validate()?;
        let mut seen = HashSet::with_capacity(tests.len());
        for test in tests {
            if !seen.insert((test.name.as_str(), test.mode_key())) {
                return Err(Error::IllegalArgument(format!(
                    "duplicate test {} [{}]",
                    test.name,
                    test.mode_key()
                )));
            }
        }

        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Running {} test(s) with concurrency {}",
            tests.len(),
            options.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        let rejections = RejectionTracker::new();
        let (results, mut collector) = results_channel();
        let mut tasks = Vec::with_capacity(tests.len());

        for test in tests {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::IllegalState(e.to_string()))?;

            let info = SetupInfo {
                baseline_test_name: test.baseline_test_name(),
                branch_name: options.branch_name.clone(),
                host: options.host.clone(),
                test: test.clone(),
                rejections: rejections.clone(),
                results: results.clone(),
            };
            let harness = (self.factory)();
            let unit = test.clone();

            let task = tokio::spawn(async move {
                let outcome = run_unit(harness, unit, info).await;
                drop(permit);
                outcome
            });
            tasks.push((test, task));
        }

        let mut errors = ErrorTable::default();
        for (test, task) in tasks {
            let mode = test.mode_key();
            match task.await {
                Ok(outcome) => {
                    match outcome.failure {
                        None => info!("✓ {} [{}]", test.name, mode),
                        Some(message) => {
                            error!("✗ {} [{}] - {}", test.name, mode, message);
                            errors.record(&test.name, mode, message);
                        }
                    }
                    if let Some(message) = outcome.cleanup_failure {
                        warn!("Cleanup of {} [{}] failed: {}", test.name, mode, message);
                        rejections.report(format!("{} [{}] cleanup: {}", test.name, mode, message));
                    }
                }
                Err(e) => {
                    error!("✗ {} [{}] - unit task failed: {}", test.name, mode, e);
                    rejections.report(format!("{} [{}]: {}", test.name, mode, e));
                }
            }
        }

        for message in rejections.settle().await {
            warn!("Unhandled rejection: {}", message);
            errors.record_unhandled(message);
        }
        drop(results);
        let results = collector.drain();

        let report = BatchReport::new(
            self.sdk_name.clone(),
            started_at,
            start.elapsed().as_millis() as u64,
            errors,
            tests.to_vec(),
            results,
        );
        info!(
            "Batch results: {} passed, {} failed ({} executions, {} ms)",
            report.stats.tests_passed,
            report.stats.tests_failed,
            report.stats.executions,
            report.stats.duration_ms
        );
        Ok(report)
    }
}
