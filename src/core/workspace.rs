//! Automation export/import
//!
//! Saves and restores macros and auto-reply rules as one JSON document:
//! `{"macros": [...], "autoReplies": [...]}`. The format is unversioned.

use super::macros::{Macro, MacroScheduler};
use super::trigger::{AutoReplyRule, TriggerManager};
use crate::config::store::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Workspace errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document is not a valid bundle
    #[error("Invalid automation file: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisting the imported sets failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Exportable automation state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationBundle {
    /// Macros
    #[serde(default)]
    pub macros: Vec<Macro>,
    /// Auto-reply rules
    #[serde(rename = "autoReplies", default)]
    pub auto_replies: Vec<AutoReplyRule>,
}

impl AutomationBundle {
    /// Capture the current macros and auto-replies
    pub fn capture(macros: &MacroScheduler, rules: &TriggerManager) -> Self {
        Self {
            macros: macros.list(),
            auto_replies: rules.auto_replies(),
        }
    }

    /// Replace both sets; running macro timers are stopped
    pub fn apply(&self, macros: &MacroScheduler, rules: &TriggerManager) -> Result<(), WorkspaceError> {
        macros.replace_all(self.macros.clone())?;
        rules.replace_auto_replies(self.auto_replies.clone())?;
        tracing::info!(
            macros = self.macros.len(),
            auto_replies = self.auto_replies.len(),
            "automation imported"
        );
        Ok(())
    }

    /// Pretty-printed JSON document
    pub fn to_json(&self) -> Result<String, WorkspaceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, WorkspaceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), WorkspaceError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load from file
    pub fn load(path: &Path) -> Result<Self, WorkspaceError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
