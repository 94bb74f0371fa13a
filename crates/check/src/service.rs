//! Remote render/check service interface

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use snapgrid_common::{
    BatchInfo, DeviceCatalog, MatchLevel, MatchResult, RemoteFailure, RenderTarget, Result,
    TestResults, ViewportSize,
};

use crate::regions::{CategorizedRegions, MatchRegion};
use crate::snapshot::DomSnapshot;

/// Result of a remote command
pub type RemoteResult<T> = std::result::Result<T, RemoteFailure>;

/// Session parameters sent when a test is opened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenRequest {
    pub agent_id: String,
    pub app_name: String,
    pub test_name: String,
    pub viewport_size: ViewportSize,
    pub browsers: Vec<RenderTarget>,
    pub batch: BatchInfo,
    pub branch_name: Option<String>,
    pub match_level: MatchLevel,
}

/// Everything the service needs to render and compare one check
#[derive(Debug, Clone, Serialize)]
pub struct CheckRequest {
    pub name: Option<String>,
    pub url: String,
    /// One snapshot per render target, in target order
    pub snapshots: Vec<Arc<DomSnapshot>>,
    pub browsers: Vec<RenderTarget>,
    pub regions: CategorizedRegions<MatchRegion>,
    /// Attribute selectors of the marked elements, in resolution order
    pub marked_selectors: Vec<String>,
    pub match_level: MatchLevel,
    pub fully: bool,
}

/// Commands bound to one open test
#[async_trait]
pub trait RenderSession: Send + Sync {
    async fn check_window(&self, request: CheckRequest) -> RemoteResult<MatchResult>;

    async fn close(&self, throw_on_mismatch: bool) -> RemoteResult<Vec<TestResults>>;

    async fn abort(&self) -> RemoteResult<TestResults>;
}

/// Render service client
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Open a test and return its command handles
    async fn open_session(&self, request: OpenRequest) -> Result<Arc<dyn RenderSession>>;

    /// Sizes of Chrome-emulated devices
    async fn emulated_device_sizes(&self) -> Result<DeviceCatalog>;

    /// Sizes of iOS simulator devices
    async fn ios_device_sizes(&self) -> Result<DeviceCatalog>;
}
