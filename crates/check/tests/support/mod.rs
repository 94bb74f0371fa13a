//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use snapgrid_check::driver::{ContextHandle, ContextTree, FrameReference};
use snapgrid_check::service::RemoteResult;
use snapgrid_check::snapshot::SnapshotOptions;
use snapgrid_check::{
    Agent, CheckRequest, DomSnapshot, Driver, ElementMark, OpenRequest, RenderService,
    RenderSession, SelectorRef, SelectorResolution, SelectorResolver, SnapshotTaker,
};
use snapgrid_common::{
    BrowserKind, DeviceCatalog, Error, MatchResult, Result, TestResults, TestStatus, ViewportSize,
};

/// Ordered log of every collaborator call
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls.lock().iter().position(|call| call.starts_with(prefix))
    }
}

pub struct FakeDriver {
    pub log: CallLog,
    pub viewport: Mutex<ViewportSize>,
    pub contexts: ContextTree,
    pub fail_marking: bool,
}

impl FakeDriver {
    pub fn new(log: CallLog, viewport: ViewportSize) -> Self {
        Self {
            log,
            viewport: Mutex::new(viewport),
            contexts: ContextTree {
                main: ContextHandle::main("main"),
                current: ContextHandle::main("main"),
            },
            fail_marking: false,
        }
    }

    pub fn current_viewport(&self) -> ViewportSize {
        *self.viewport.lock()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn browser(&self) -> BrowserKind {
        BrowserKind::Chrome
    }

    async fn refresh_contexts(&self) -> Result<ContextTree> {
        self.log.record("driver.refresh_contexts");
        Ok(self.contexts.clone())
    }

    async fn enter_context(
        &self,
        parent: &ContextHandle,
        frame: &FrameReference,
    ) -> Result<ContextHandle> {
        self.log.record(format!("driver.enter_context {}", parent.id));
        let id = match frame {
            FrameReference::Index(index) => format!("{}/{}", parent.id, index),
            FrameReference::Name(name) => format!("{}/{}", parent.id, name),
            FrameReference::Selector(selector) => format!("{}/{}", parent.id, selector),
        };
        Ok(ContextHandle::frame(id))
    }

    async fn focus(&self, context: &ContextHandle) -> Result<()> {
        self.log.record(format!("driver.focus {}", context.id));
        Ok(())
    }

    async fn set_scroll_root_element(
        &self,
        context: &ContextHandle,
        element: Option<&SelectorRef>,
    ) -> Result<()> {
        self.log.record(format!(
            "driver.scroll_root {} {}",
            context.id,
            element.map(|e| e.selector.as_str()).unwrap_or("-")
        ));
        Ok(())
    }

    async fn viewport_size(&self) -> Result<ViewportSize> {
        Ok(self.current_viewport())
    }

    async fn set_viewport_size(&self, size: ViewportSize) -> Result<()> {
        self.log.record(format!("driver.set_viewport {}", size));
        *self.viewport.lock() = size;
        Ok(())
    }

    async fn mark_elements(&self, marks: &[ElementMark]) -> Result<()> {
        self.log.record(format!("driver.mark {}", marks.len()));
        if self.fail_marking {
            return Err(Error::Driver("element went stale".to_string()));
        }
        Ok(())
    }

    async fn unmark_elements(&self, marks: &[ElementMark]) -> Result<()> {
        self.log.record(format!("driver.unmark {}", marks.len()));
        Ok(())
    }
}

/// Serializes a template document, stamping the current viewport width
pub struct FakeSnapshots {
    pub log: CallLog,
    pub template: Mutex<DomSnapshot>,
    pub fail: bool,
}

impl FakeSnapshots {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            template: Mutex::new(DomSnapshot::default()),
            fail: false,
        }
    }
}

#[async_trait]
impl SnapshotTaker for FakeSnapshots {
    async fn take_snapshot(
        &self,
        driver: &dyn Driver,
        _browser: BrowserKind,
        _options: &SnapshotOptions,
    ) -> Result<DomSnapshot> {
        let viewport = driver.viewport_size().await?;
        self.log.record(format!("snapshot {}", viewport.width));
        if self.fail {
            return Err(Error::Snapshot("page crashed".to_string()));
        }
        let mut snapshot = self.template.lock().clone();
        snapshot.url = format!("https://app.test/?w={}", viewport.width);
        Ok(snapshot)
    }
}

#[derive(Default)]
pub struct FakeSelectors {
    pub log: CallLog,
    pub resolution: Mutex<SelectorResolution>,
}

#[async_trait]
impl SelectorResolver for FakeSelectors {
    async fn resolve(
        &self,
        _driver: &dyn Driver,
        marks: &[ElementMark],
        target: Option<&ElementMark>,
    ) -> Result<SelectorResolution> {
        self.log.record(format!(
            "selectors.resolve {} target={}",
            marks.len(),
            target.is_some()
        ));
        Ok(self.resolution.lock().clone())
    }
}

pub struct FakeSession {
    pub log: CallLog,
    pub checks: Mutex<Vec<CheckRequest>>,
    pub close_outcome: Mutex<RemoteResult<Vec<TestResults>>>,
    pub close_delay: Duration,
}

impl FakeSession {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            checks: Mutex::new(Vec::new()),
            close_outcome: Mutex::new(Ok(vec![TestResults::new("test", TestStatus::Passed)])),
            close_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn check_window(&self, request: CheckRequest) -> RemoteResult<MatchResult> {
        self.log.record("session.check_window");
        self.checks.lock().push(request);
        Ok(MatchResult {
            as_expected: true,
            window_id: Some(1),
        })
    }

    async fn close(&self, throw_on_mismatch: bool) -> RemoteResult<Vec<TestResults>> {
        self.log
            .record(format!("session.close throw={}", throw_on_mismatch));
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.close_outcome.lock().clone()
    }

    async fn abort(&self) -> RemoteResult<TestResults> {
        self.log.record("session.abort");
        Ok(TestResults::new("test", TestStatus::Aborted))
    }
}

pub struct FakeService {
    pub log: CallLog,
    pub session: Arc<FakeSession>,
    pub opened: Mutex<Vec<OpenRequest>>,
    pub emulated: Mutex<DeviceCatalog>,
    pub open_delay: Mutex<Duration>,
}

#[async_trait]
impl RenderService for FakeService {
    async fn open_session(&self, request: OpenRequest) -> Result<Arc<dyn RenderSession>> {
        self.log.record("service.open_session");
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.opened.lock().push(request);
        Ok(self.session.clone())
    }

    async fn emulated_device_sizes(&self) -> Result<DeviceCatalog> {
        self.log.record("service.emulated_device_sizes");
        Ok(self.emulated.lock().clone())
    }

    async fn ios_device_sizes(&self) -> Result<DeviceCatalog> {
        self.log.record("service.ios_device_sizes");
        Ok(DeviceCatalog::new())
    }
}

/// Collaborators sharing one call log
pub struct Fixture {
    pub log: CallLog,
    pub driver: Arc<FakeDriver>,
    pub snapshots: Arc<FakeSnapshots>,
    pub selectors: Arc<FakeSelectors>,
    pub session: Arc<FakeSession>,
    pub service: Arc<FakeService>,
}

impl Fixture {
    pub fn new(viewport: ViewportSize) -> Self {
        Self::build(viewport, |_| {}, |_| {}, |_| {})
    }

    /// Build a fixture, adjusting collaborators before they are shared
    pub fn build(
        viewport: ViewportSize,
        driver: impl FnOnce(&mut FakeDriver),
        snapshots: impl FnOnce(&mut FakeSnapshots),
        session: impl FnOnce(&mut FakeSession),
    ) -> Self {
        let log = CallLog::default();

        let mut fake_driver = FakeDriver::new(log.clone(), viewport);
        driver(&mut fake_driver);
        let mut fake_snapshots = FakeSnapshots::new(log.clone());
        snapshots(&mut fake_snapshots);
        let mut fake_session = FakeSession::new(log.clone());
        session(&mut fake_session);

        let session = Arc::new(fake_session);
        let service = Arc::new(FakeService {
            log: log.clone(),
            session: session.clone(),
            opened: Mutex::new(Vec::new()),
            emulated: Mutex::new(DeviceCatalog::new()),
            open_delay: Mutex::new(Duration::ZERO),
        });

        Self {
            log: log.clone(),
            driver: Arc::new(fake_driver),
            snapshots: Arc::new(fake_snapshots),
            selectors: Arc::new(FakeSelectors {
                log,
                resolution: Mutex::new(SelectorResolution::default()),
            }),
            session,
            service,
        }
    }

    pub fn agent(&self) -> Agent {
        Agent::new(
            self.snapshots.clone(),
            self.selectors.clone(),
            self.service.clone(),
        )
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }
}
