//! Pattern engine: auto-reply and highlight rules
//!
//! Both rule kinds are plain substring triggers evaluated against decoded RX
//! text. Auto-replies are matched once per decoded unit; highlights are
//! matched case-insensitively against a log entry's full accumulated text.

use crate::config::store::{self, ConfigStore, StoreError, KEY_AUTO_REPLIES, KEY_HIGHLIGHTS};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Substring trigger that sends a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReplyRule {
    /// Text that must appear in the received unit
    #[serde(rename = "match")]
    pub match_text: String,
    /// Text written back to the device
    pub reply: String,
}

impl AutoReplyRule {
    /// Reply with `reply` when `match_text` is seen
    pub fn new(match_text: &str, reply: &str) -> Self {
        Self {
            match_text: match_text.to_string(),
            reply: reply.to_string(),
        }
    }

    /// Case-sensitive substring match. Empty patterns never fire.
    pub fn matches(&self, text: &str) -> bool {
        !self.match_text.is_empty() && text.contains(&self.match_text)
    }
}

/// Substring trigger that tags a log entry with a style class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRule {
    /// Keyword, matched case-insensitively
    pub word: String,
    /// Style class added to matching entries
    pub class: String,
}

impl HighlightRule {
    /// Tag entries containing `word` with `class`
    pub fn new(word: &str, class: &str) -> Self {
        Self {
            word: word.to_string(),
            class: class.to_string(),
        }
    }

    /// Case-insensitive containment
    pub fn matches(&self, text: &str) -> bool {
        !self.word.is_empty() && text.to_lowercase().contains(&self.word.to_lowercase())
    }
}

/// Immutable view of the active rules
#[derive(Debug, Clone, Default)]
pub struct PatternEngine {
    auto_replies: Vec<AutoReplyRule>,
    highlights: Vec<HighlightRule>,
}

impl PatternEngine {
    /// Build from rule lists
    pub fn new(auto_replies: Vec<AutoReplyRule>, highlights: Vec<HighlightRule>) -> Self {
        Self {
            auto_replies,
            highlights,
        }
    }

    /// Replies for one decoded unit, one per matching rule, in rule order
    pub fn replies_for(&self, text: &str) -> Vec<String> {
        self.auto_replies
            .iter()
            .filter(|rule| rule.matches(text))
            .map(|rule| rule.reply.clone())
            .collect()
    }

    /// Classes of every highlight rule matching `text`
    pub fn highlight_classes(&self, text: &str) -> BTreeSet<String> {
        let lower = text.to_lowercase();
        self.highlights
            .iter()
            .filter(|rule| !rule.word.is_empty() && lower.contains(&rule.word.to_lowercase()))
            .map(|rule| rule.class.clone())
            .collect()
    }

    /// Auto-reply rules
    pub fn auto_replies(&self) -> &[AutoReplyRule] {
        &self.auto_replies
    }

    /// Highlight rules
    pub fn highlights(&self) -> &[HighlightRule] {
        &self.highlights
    }
}

/// Owns the rule sets and writes them through to the store on every change
pub struct TriggerManager {
    engine: RwLock<PatternEngine>,
    store: Arc<dyn ConfigStore>,
}

impl TriggerManager {
    /// Load both rule sets from the store
    pub fn load(store: Arc<dyn ConfigStore>) -> Result<Self, StoreError> {
        let auto_replies = store::load_items(store.as_ref(), KEY_AUTO_REPLIES)?;
        let highlights = store::load_items(store.as_ref(), KEY_HIGHLIGHTS)?;
        tracing::debug!(
            auto_replies = auto_replies.len(),
            highlights = highlights.len(),
            "rules loaded"
        );
        Ok(Self {
            engine: RwLock::new(PatternEngine::new(auto_replies, highlights)),
            store,
        })
    }

    /// Current rules
    pub fn snapshot(&self) -> PatternEngine {
        self.engine.read().clone()
    }

    /// Borrow the rules for the duration of one chunk
    pub fn engine(&self) -> RwLockReadGuard<'_, PatternEngine> {
        self.engine.read()
    }

    /// Replies for one text unit, one per matching rule
    pub fn replies_for(&self, text: &str) -> Vec<String> {
        self.engine.read().replies_for(text)
    }

    /// Classes of every rule matching `text`
    pub fn highlight_classes(&self, text: &str) -> BTreeSet<String> {
        self.engine.read().highlight_classes(text)
    }

    /// Copy of the auto-reply rules
    pub fn auto_replies(&self) -> Vec<AutoReplyRule> {
        self.engine.read().auto_replies.clone()
    }

    /// Copy of the highlight rules
    pub fn highlights(&self) -> Vec<HighlightRule> {
        self.engine.read().highlights.clone()
    }

    /// Add an auto-reply rule
    pub fn add_auto_reply(&self, rule: AutoReplyRule) -> Result<(), StoreError> {
        let mut engine = self.engine.write();
        engine.auto_replies.push(rule);
        store::save_items(self.store.as_ref(), KEY_AUTO_REPLIES, &engine.auto_replies)
    }

    /// Remove an auto-reply rule by index
    pub fn remove_auto_reply(&self, index: usize) -> Result<Option<AutoReplyRule>, StoreError> {
        let mut engine = self.engine.write();
        if index >= engine.auto_replies.len() {
            return Ok(None);
        }
        let removed = engine.auto_replies.remove(index);
        store::save_items(self.store.as_ref(), KEY_AUTO_REPLIES, &engine.auto_replies)?;
        Ok(Some(removed))
    }

    /// Replace every auto-reply rule
    pub fn replace_auto_replies(&self, rules: Vec<AutoReplyRule>) -> Result<(), StoreError> {
        let mut engine = self.engine.write();
        engine.auto_replies = rules;
        store::save_items(self.store.as_ref(), KEY_AUTO_REPLIES, &engine.auto_replies)
    }

    /// Add a highlight rule
    pub fn add_highlight(&self, rule: HighlightRule) -> Result<(), StoreError> {
        let mut engine = self.engine.write();
        engine.highlights.push(rule);
        store::save_items(self.store.as_ref(), KEY_HIGHLIGHTS, &engine.highlights)
    }

    /// Remove a highlight rule by index
    pub fn remove_highlight(&self, index: usize) -> Result<Option<HighlightRule>, StoreError> {
        let mut engine = self.engine.write();
        if index >= engine.highlights.len() {
            return Ok(None);
        }
        let removed = engine.highlights.remove(index);
        store::save_items(self.store.as_ref(), KEY_HIGHLIGHTS, &engine.highlights)?;
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::{MemoryStore, MockConfigStore};

    #[test]
    fn test_reply_per_matching_rule() {
        let engine = PatternEngine::new(
            vec![
                AutoReplyRule::new("PING", "PONG\n"),
                AutoReplyRule::new("PI", "pi\n"),
                AutoReplyRule::new("nope", "x"),
            ],
            Vec::new(),
        );
        assert_eq!(engine.replies_for("PING PING"), vec!["PONG\n", "pi\n"]);
        assert!(engine.replies_for("ping").is_empty());
    }

    #[test]
    fn test_highlight_case_insensitive_set() {
        let engine = PatternEngine::new(
            Vec::new(),
            vec![
                HighlightRule::new("ERROR", "hl-red"),
                HighlightRule::new("fail", "hl-red"),
                HighlightRule::new("ok", "hl-green"),
            ],
        );
        let classes = engine.highlight_classes("Boot error: FAIL");
        assert_eq!(classes.len(), 1);
        assert!(classes.contains("hl-red"));
    }

    #[test]
    fn test_empty_rules_never_fire() {
        assert!(!AutoReplyRule::new("", "x").matches("anything"));
        assert!(!HighlightRule::new("", "c").matches("anything"));
    }

    #[test]
    fn test_rule_json_shape() {
        let json = serde_json::to_value(AutoReplyRule::new("PING", "PONG")).unwrap();
        assert_eq!(json, serde_json::json!({"match": "PING", "reply": "PONG"}));
    }

    #[test]
    fn test_manager_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let manager = TriggerManager::load(store.clone()).unwrap();
        manager.add_auto_reply(AutoReplyRule::new("PING", "PONG")).unwrap();
        manager.add_highlight(HighlightRule::new("err", "red")).unwrap();

        let reloaded = TriggerManager::load(store).unwrap();
        assert_eq!(reloaded.auto_replies(), vec![AutoReplyRule::new("PING", "PONG")]);
        assert_eq!(reloaded.highlights(), vec![HighlightRule::new("err", "red")]);
    }

    #[test]
    fn test_manager_saves_on_every_mutation() {
        let mut store = MockConfigStore::new();
        store.expect_load().returning(|_| Ok(Vec::new()));
        store
            .expect_save()
            .withf(|key, _| key == KEY_HIGHLIGHTS)
            .times(2)
            .returning(|_, _| Ok(()));

        let manager = TriggerManager::load(Arc::new(store)).unwrap();
        manager.add_highlight(HighlightRule::new("warn", "amber")).unwrap();
        assert!(manager.remove_highlight(0).unwrap().is_some());
        assert!(manager.remove_highlight(5).unwrap().is_none());
    }
}
