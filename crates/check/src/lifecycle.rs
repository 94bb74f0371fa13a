//! Lifecycle of a single visual test: open, check, close or abort
//!
//! A [`CheckLifecycle`] owns one remote session. All operations take `&self`
//! so a lifecycle can be shared behind an `Arc`; `close` is settled once and
//! every caller observes the same outcome.

use std::sync::Arc;

use parking_lot::Mutex;
use snapgrid_common::{
    guard, BrowserKind, Configuration, CorsIframeHandling, Error, LayoutBreakpoints, MatchLevel,
    MatchResult, RenderTarget, Result, TestResults, ViewportSize,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::driver::{ContextHandle, Driver, ElementMark, FrameReference, SelectorRef};
use crate::regions::{self, CategorizedRegions, RegionCategory, RegionSpec};
use crate::results::ResultsSender;
use crate::selectors::{SelectorResolution, SelectorResolver};
use crate::service::{CheckRequest, OpenRequest, RemoteResult, RenderService, RenderSession};
use crate::snapshot::{SnapshotCapturer, SnapshotOptions, SnapshotTaker};

/// Collaborators a lifecycle is built with, one set per automation tool
#[derive(Clone)]
pub struct Agent {
    /// Reported to the render service on open
    pub agent_id: String,
    pub snapshotter: Arc<dyn SnapshotTaker>,
    pub selectors: Arc<dyn SelectorResolver>,
    pub service: Arc<dyn RenderService>,
}

impl Agent {
    pub fn new(
        snapshotter: Arc<dyn SnapshotTaker>,
        selectors: Arc<dyn SelectorResolver>,
        service: Arc<dyn RenderService>,
    ) -> Self {
        Self {
            agent_id: snapgrid_common::default_agent_id(),
            snapshotter,
            selectors,
            service,
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }
}

/// Per-open overrides of the configuration
#[derive(Debug, Clone, Default)]
pub struct OpenParams {
    pub app_name: Option<String>,
    pub test_name: Option<String>,
    pub viewport_size: Option<ViewportSize>,
}

impl OpenParams {
    pub fn new(app_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            app_name: Some(app_name.into()),
            test_name: Some(test_name.into()),
            viewport_size: None,
        }
    }

    pub fn viewport_size(mut self, size: ViewportSize) -> Self {
        self.viewport_size = Some(size);
        self
    }
}

/// Settings of one check
#[derive(Debug, Clone, Default)]
pub struct CheckSettings {
    pub name: Option<String>,
    pub regions: CategorizedRegions<RegionSpec>,
    /// Frame chain to switch into before capturing, outermost first
    pub frames: Vec<FrameReference>,
    pub scroll_root_element: Option<SelectorRef>,
    /// Element the check is cropped to
    pub target_region: Option<SelectorRef>,
    pub layout_breakpoints: Option<LayoutBreakpoints>,
    pub disable_browser_fetching: Option<bool>,
    pub match_level: Option<MatchLevel>,
    pub fully: bool,
}

impl CheckSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn region(mut self, category: RegionCategory, region: RegionSpec) -> Self {
        self.regions.push(category, region);
        self
    }

    pub fn ignore(self, region: RegionSpec) -> Self {
        self.region(RegionCategory::Ignore, region)
    }

    pub fn floating(self, region: RegionSpec) -> Self {
        self.region(RegionCategory::Floating, region)
    }

    pub fn frame(mut self, frame: FrameReference) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn scroll_root_element(mut self, selector: impl Into<String>) -> Self {
        self.scroll_root_element = Some(SelectorRef::new(selector));
        self
    }

    pub fn target_region(mut self, selector: impl Into<String>) -> Self {
        self.target_region = Some(SelectorRef::new(selector));
        self
    }

    pub fn layout_breakpoints(mut self, breakpoints: LayoutBreakpoints) -> Self {
        self.layout_breakpoints = Some(breakpoints);
        self
    }

    pub fn disable_browser_fetching(mut self, disable: bool) -> Self {
        self.disable_browser_fetching = Some(disable);
        self
    }

    pub fn match_level(mut self, level: MatchLevel) -> Self {
        self.match_level = Some(level);
        self
    }

    pub fn fully(mut self, fully: bool) -> Self {
        self.fully = fully;
        self
    }
}

/// Where a lifecycle is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotOpened,
    Opening,
    Open,
    Checking,
    Closed,
    Aborted,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::NotOpened => write!(f, "not opened"),
            LifecycleState::Opening => write!(f, "opening"),
            LifecycleState::Open => write!(f, "open"),
            LifecycleState::Checking => write!(f, "checking"),
            LifecycleState::Closed => write!(f, "closed"),
            LifecycleState::Aborted => write!(f, "aborted"),
        }
    }
}

/// One visual test against the render service
pub struct CheckLifecycle {
    agent: Agent,
    config: Mutex<Configuration>,
    capturer: SnapshotCapturer,
    results: ResultsSender,
    state: Mutex<LifecycleState>,
    driver: Mutex<Option<Arc<dyn Driver>>>,
    session: Mutex<Option<Arc<dyn RenderSession>>>,
    close_outcome: OnceCell<RemoteResult<Vec<TestResults>>>,
}

impl CheckLifecycle {
    /// Create a lifecycle publishing its final results to `results`
    pub fn new(agent: Agent, config: Configuration, results: ResultsSender) -> Self {
        let capturer = SnapshotCapturer::new(agent.snapshotter.clone(), agent.service.clone());
        Self {
            agent,
            config: Mutex::new(config),
            capturer,
            results,
            state: Mutex::new(LifecycleState::NotOpened),
            driver: Mutex::new(None),
            session: Mutex::new(None),
            close_outcome: OnceCell::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Effective configuration (after open, includes synthesized targets)
    pub fn configuration(&self) -> Configuration {
        self.config.lock().clone()
    }

    /// Driver bound by `open`
    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.lock().clone()
    }

    pub fn is_disabled(&self) -> bool {
        self.config.lock().is_disabled
    }

    /// Open the test and bind `driver` to this lifecycle
    pub async fn open(&self, driver: Arc<dyn Driver>, params: OpenParams) -> Result<Arc<dyn Driver>> {
        {
            let mut state = self.state.lock();
            guard::valid_state(
                *state == LifecycleState::NotOpened,
                &format!("open() called on a lifecycle that is {}", *state),
            )?;
            *state = LifecycleState::Opening;
        }

        match self.open_session(driver.clone(), params).await {
            Ok(()) => {
                let aborted = {
                    let mut state = self.state.lock();
                    if *state == LifecycleState::Opening {
                        *state = LifecycleState::Open;
                    }
                    *state == LifecycleState::Aborted
                };
                if aborted {
                    self.abort_late_session().await?;
                    return Err(Error::IllegalState("aborted during open()".to_string()));
                }
                Ok(driver)
            }
            Err(e) => {
                let mut state = self.state.lock();
                if *state == LifecycleState::Opening {
                    *state = LifecycleState::NotOpened;
                }
                Err(e)
            }
        }
    }

    async fn open_session(&self, driver: Arc<dyn Driver>, params: OpenParams) -> Result<()> {
        let config = {
            let mut config = self.config.lock();
            if params.app_name.is_some() {
                config.app_name = params.app_name;
            }
            if params.test_name.is_some() {
                config.test_name = params.test_name;
            }
            if params.viewport_size.is_some() {
                config.viewport_size = params.viewport_size;
            }
            config.clone()
        };

        let app_name = guard::not_empty(config.app_name.as_deref(), "appName")?.to_string();
        let test_name = guard::not_empty(config.test_name.as_deref(), "testName")?.to_string();

        *self.driver.lock() = Some(driver.clone());

        if config.is_disabled {
            info!("Lifecycle for '{}' is disabled, skipping open", test_name);
            return Ok(());
        }

        let explicit = config
            .viewport_size
            .or_else(|| config.browsers.iter().find_map(RenderTarget::explicit_size));
        let viewport = match explicit {
            Some(size) => {
                debug!("Setting viewport to {}", size);
                driver.set_viewport_size(size).await?;
                size
            }
            None => driver.viewport_size().await?,
        };

        let browsers = if config.browsers.is_empty() {
            let target = RenderTarget::desktop(viewport.width, viewport.height, BrowserKind::default());
            debug!("No render targets configured, using {:?}", target);
            let browsers = vec![target];
            self.config.lock().browsers = browsers.clone();
            browsers
        } else {
            config.browsers.clone()
        };

        let request = OpenRequest {
            agent_id: self.agent.agent_id.clone(),
            app_name: app_name.clone(),
            test_name: test_name.clone(),
            viewport_size: viewport,
            browsers,
            batch: config.batch.clone(),
            branch_name: config.branch_name.clone(),
            match_level: config.match_level,
        };

        info!(
            "Opening test '{}' of '{}' at {} ({} target(s))",
            test_name,
            app_name,
            viewport,
            request.browsers.len()
        );
        let session = self.agent.service.open_session(request).await?;
        *self.session.lock() = Some(session);
        Ok(())
    }

    /// Capture the page and submit one check
    pub async fn check(&self, settings: CheckSettings) -> Result<MatchResult> {
        if self.is_disabled() {
            debug!("Lifecycle is disabled, skipping check");
            return Ok(MatchResult::default());
        }

        let (driver, session) = {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Open => {}
                LifecycleState::Checking => {
                    return Err(Error::IllegalState(
                        "check() called while another check is in flight".to_string(),
                    ))
                }
                other => {
                    return Err(Error::IllegalState(format!(
                        "check() called on a lifecycle that is {}",
                        other
                    )))
                }
            }
            let driver = self.driver.lock().clone();
            let session = self.session.lock().clone();
            let (Some(driver), Some(session)) = (driver, session) else {
                return Err(Error::IllegalState("lifecycle has no open session".to_string()));
            };
            *state = LifecycleState::Checking;
            (driver, session)
        };

        let config = self.configuration();
        let outcome = self
            .run_check(driver.as_ref(), session.as_ref(), &config, &settings)
            .await;

        let mut state = self.state.lock();
        if *state == LifecycleState::Checking {
            *state = LifecycleState::Open;
        }
        outcome
    }

    async fn run_check(
        &self,
        driver: &dyn Driver,
        session: &dyn RenderSession,
        config: &Configuration,
        settings: &CheckSettings,
    ) -> Result<MatchResult> {
        let contexts = driver.refresh_contexts().await?;
        let scroll_root = settings.scroll_root_element.as_ref();
        driver.set_scroll_root_element(&contexts.main, scroll_root).await?;
        if contexts.current != contexts.main {
            driver
                .set_scroll_root_element(&contexts.current, scroll_root)
                .await?;
        }

        let marks: Vec<ElementMark> = regions::selectors(&settings.regions)
            .into_iter()
            .cloned()
            .map(ElementMark::new)
            .collect();
        let target = settings.target_region.clone().map(ElementMark::new);
        let mut marked = Vec::new();

        let outcome = self
            .capture_and_submit(
                driver,
                session,
                config,
                settings,
                &contexts.current,
                &marks,
                target.as_ref(),
                &mut marked,
            )
            .await;

        let mut cleanup = Ok(());
        if !marked.is_empty() {
            if let Err(e) = driver.unmark_elements(&marked).await {
                warn!("Failed to unmark {} element(s): {}", marked.len(), e);
                cleanup = Err(e);
            }
        }
        if let Err(e) = driver.focus(&contexts.current).await {
            warn!("Failed to restore context '{}': {}", contexts.current.id, e);
            if cleanup.is_ok() {
                cleanup = Err(e);
            }
        }

        let result = outcome?;
        cleanup?;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture_and_submit(
        &self,
        driver: &dyn Driver,
        session: &dyn RenderSession,
        config: &Configuration,
        settings: &CheckSettings,
        origin: &ContextHandle,
        marks: &[ElementMark],
        target: Option<&ElementMark>,
        marked: &mut Vec<ElementMark>,
    ) -> Result<MatchResult> {
        if !settings.frames.is_empty() {
            let mut context = origin.clone();
            for frame in &settings.frames {
                context = driver.enter_context(&context, frame).await?;
            }
            debug!("Switching into frame context '{}'", context.id);
            driver.focus(&context).await?;
        }

        let mut to_mark = marks.to_vec();
        to_mark.extend(target.cloned());
        if !to_mark.is_empty() {
            driver.mark_elements(&to_mark).await?;
            *marked = to_mark;
        }

        let breakpoints = settings
            .layout_breakpoints
            .as_ref()
            .or(config.layout_breakpoints.as_ref());
        let options = SnapshotOptions {
            disable_browser_fetching: settings
                .disable_browser_fetching
                .unwrap_or(config.disable_browser_fetching),
        };
        let mut snapshots = self
            .capturer
            .capture(driver, &config.browsers, breakpoints, &options)
            .await?;
        if config.cors_iframe_handling == CorsIframeHandling::Blank {
            snapshots.scrub_cross_origin_iframes();
        }

        let resolution = if marked.is_empty() {
            SelectorResolution::default()
        } else {
            self.agent.selectors.resolve(driver, marks, target).await?
        };
        let regions = regions::resolve(&settings.regions, &resolution.table, resolution.crop_offset);

        let url = snapshots.url().unwrap_or_default().to_string();
        let request = CheckRequest {
            name: settings.name.clone(),
            url,
            snapshots: snapshots.per_target(),
            browsers: config.browsers.clone(),
            regions,
            marked_selectors: marked.iter().map(ElementMark::attribute_selector).collect(),
            match_level: settings.match_level.unwrap_or(config.match_level),
            fully: settings.fully,
        };

        debug!(
            "Submitting check '{}' for {}",
            request.name.as_deref().unwrap_or("<unnamed>"),
            request.url
        );
        Ok(session.check_window(request).await?)
    }

    /// Close the test.
    ///
    /// The remote close runs at most once; concurrent and repeated callers all
    /// observe its outcome. With `throw_on_mismatch` false, a failure that
    /// embeds results yields those results instead of an error.
    pub async fn close(&self, throw_on_mismatch: bool) -> Result<Vec<TestResults>> {
        if self.is_disabled() {
            return Ok(Vec::new());
        }

        let session = {
            let state = self.state.lock();
            match *state {
                LifecycleState::NotOpened | LifecycleState::Opening => {
                    return Err(Error::IllegalState("close() called before open()".to_string()))
                }
                LifecycleState::Aborted => {
                    return Err(Error::IllegalState("close() called after abort()".to_string()))
                }
                _ => {}
            }
            self.session.lock().clone()
        };
        let Some(session) = session else {
            return Err(Error::IllegalState("lifecycle has no open session".to_string()));
        };

        let outcome = self
            .close_outcome
            .get_or_init(|| async {
                info!("Closing test");
                let outcome = session.close(true).await;
                *self.state.lock() = LifecycleState::Closed;
                match &outcome {
                    Ok(results) => self.publish(results),
                    Err(failure) => {
                        warn!("Close failed: {}", failure);
                        if let Some(results) = &failure.results {
                            self.publish(results);
                        }
                    }
                }
                outcome
            })
            .await;

        match outcome {
            Ok(results) => Ok(results.clone()),
            Err(failure) if !throw_on_mismatch && failure.is_recoverable() => {
                Ok(failure.results.clone().unwrap_or_default())
            }
            Err(failure) => Err(Error::Remote(failure.clone())),
        }
    }

    /// Abort the test. Returns `None` when there was nothing to abort.
    ///
    /// Aborting while `open()` is in flight returns `None` and leaves the
    /// remote abort to `open()`, which fails once its session is ready.
    pub async fn abort(&self) -> Result<Option<TestResults>> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Closed | LifecycleState::Aborted => return Ok(None),
                LifecycleState::Opening => {
                    *state = LifecycleState::Aborted;
                    debug!("Abort while opening, deferring remote abort to open()");
                    return Ok(None);
                }
                _ => *state = LifecycleState::Aborted,
            }
        }

        let session = self.session.lock().clone();
        let Some(session) = session else {
            debug!("Abort before a session was opened, nothing to abort");
            return Ok(None);
        };

        info!("Aborting test");
        let results = session.abort().await?;
        self.publish(std::slice::from_ref(&results));
        Ok(Some(results))
    }

    async fn abort_late_session(&self) -> Result<()> {
        let session = self.session.lock().clone();
        let Some(session) = session else {
            return Ok(());
        };
        info!("Session opened after abort(), aborting it");
        let results = session.abort().await?;
        self.publish(std::slice::from_ref(&results));
        Ok(())
    }

    fn publish(&self, results: &[TestResults]) {
        for result in results {
            if self.results.send(result.clone()).is_err() {
                debug!("Results receiver dropped, discarding '{}'", result.name);
            }
        }
    }
}
