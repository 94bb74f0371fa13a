//! snapgrid check engine
//!
//! Drives visual-grid checks against a remote render service:
//! - Resolves declared match regions (literal and selector-derived) into
//!   concrete rectangles, per category, in a fixed order
//! - Captures DOM snapshots at one or more viewport widths
//! - Runs the open → check → close/abort lifecycle of a single test
//! - Executes many tests under a concurrency cap and aggregates failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  BatchRunner                                                │
//! │    └── TestHarness (one per test unit)                      │
//! │          └── CheckLifecycle                                 │
//! │                ├── open()  -> RenderService::open_session   │
//! │                ├── check() -> SnapshotCapturer              │
//! │                │              SelectorResolver              │
//! │                │              regions::resolve              │
//! │                │              RenderSession::check_window   │
//! │                ├── close() -> RenderSession::close (once)   │
//! │                └── abort() -> RenderSession::abort          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Browser automation, DOM serialization, selector geometry and the render
//! service itself are collaborators behind the traits in [`driver`],
//! [`snapshot`], [`selectors`] and [`service`].

pub mod batch;
pub mod driver;
pub mod lifecycle;
pub mod regions;
pub mod results;
pub mod selectors;
pub mod service;
pub mod snapshot;

pub use batch::{
    BatchReport, BatchRunner, ErrorTable, ExecutionMode, RejectionTracker, SetupInfo, TestCase,
    TestHarness, UNHANDLED_REJECTIONS,
};
pub use driver::{Driver, ElementMark, SelectorRef};
pub use lifecycle::{Agent, CheckLifecycle, CheckSettings, LifecycleState, OpenParams};
pub use regions::{CategorizedRegions, MatchRegion, RegionCategory, RegionSpec, ResolvedValue};
pub use results::{results_channel, ResultsCollector, ResultsSender};
pub use selectors::{SelectorResolution, SelectorResolver};
pub use service::{CheckRequest, OpenRequest, RenderService, RenderSession};
pub use snapshot::{DomSnapshot, SnapshotCapturer, SnapshotOptions, SnapshotSet, SnapshotTaker};
