//! Browser driver capability interface
//!
//! One adapter per automation tool implements [`Driver`]; the check engine
//! only calls these methods and never talks to a browser directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snapgrid_common::{BrowserKind, Result, ViewportSize};
use uuid::Uuid;

/// Opaque element selector, interpreted by the driver adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorRef {
    pub selector: String,
}

impl SelectorRef {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

impl std::fmt::Display for SelectorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.selector)
    }
}

/// Handle to a browsing context (top-level document or iframe)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    pub id: String,
    pub is_main: bool,
}

impl ContextHandle {
    pub fn main(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_main: true,
        }
    }

    pub fn frame(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_main: false,
        }
    }
}

/// Root and active contexts after a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTree {
    pub main: ContextHandle,
    pub current: ContextHandle,
}

/// How to find a child frame inside a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameReference {
    Index(u32),
    Name(String),
    Selector(SelectorRef),
}

/// A selector-declared element tagged in the live DOM so it can be found
/// again after capture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementMark {
    pub id: String,
    pub selector: SelectorRef,
}

impl ElementMark {
    /// DOM attribute carrying the mark ids
    pub const ATTRIBUTE: &'static str = "data-snapgrid-selector";

    pub fn new(selector: SelectorRef) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            selector,
        }
    }

    /// CSS selector matching the marked element
    pub fn attribute_selector(&self) -> String {
        format!("[{}~=\"{}\"]", Self::ATTRIBUTE, self.id)
    }
}

/// Browser automation adapter
#[async_trait]
pub trait Driver: Send + Sync {
    /// Browser engine the page runs in
    fn browser(&self) -> BrowserKind;

    /// Re-read the frame tree and report the root and active contexts
    async fn refresh_contexts(&self) -> Result<ContextTree>;

    /// Resolve a child frame of `parent`
    async fn enter_context(
        &self,
        parent: &ContextHandle,
        frame: &FrameReference,
    ) -> Result<ContextHandle>;

    /// Make `context` the active one
    async fn focus(&self, context: &ContextHandle) -> Result<()>;

    /// Set (or clear) the element used for scrolling within `context`
    async fn set_scroll_root_element(
        &self,
        context: &ContextHandle,
        element: Option<&SelectorRef>,
    ) -> Result<()>;

    async fn viewport_size(&self) -> Result<ViewportSize>;

    async fn set_viewport_size(&self, size: ViewportSize) -> Result<()>;

    /// Tag every element matched by each mark's selector with the mark id
    async fn mark_elements(&self, marks: &[ElementMark]) -> Result<()>;

    /// Remove tags previously added by `mark_elements`
    async fn unmark_elements(&self, marks: &[ElementMark]) -> Result<()>;
}
