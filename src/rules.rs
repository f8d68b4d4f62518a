//! Trigger rules and their persistent store
//!
//! Rules are kept in insertion order on disk. Matching order is priority
//! descending with ties broken by that insertion order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::storage;
use crate::persistence::KeyValueStore;

/// Opaque rule identifier, unique within a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A trigger → output mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "RuleId::generate")]
    pub id: RuleId,
    pub trigger: String,
    #[serde(default)]
    pub output: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(trigger: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: RuleId::generate(),
            trigger: trigger.into(),
            output: output.into(),
            enabled: true,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Sort rules into matching order: priority descending, insertion order on ties
pub fn in_priority_order<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Vec<&'a Rule> {
    let mut ordered: Vec<&Rule> = rules.into_iter().collect();
    // sort_by is stable, so equal priorities keep their relative order
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered
}

/// Partial update applied by [`RuleStore::update`]
#[derive(Debug, Clone, Default)]
pub struct RuleEdit {
    pub trigger: Option<String>,
    pub output: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Rule trigger must not be empty")]
    EmptyTrigger,

    #[error("No rule with id '{0}'")]
    UnknownRule(String),

    #[error("Rule id prefix '{0}' matches more than one rule")]
    AmbiguousId(String),

    #[error("Reorder must list every rule exactly once")]
    IncompleteOrder,

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Ordered rule collection backed by a key-value store
///
/// Reads are served from memory; every mutation writes the whole list back
/// under a single key before it becomes visible.
pub struct RuleStore {
    kv: Arc<dyn KeyValueStore>,
    rules: Vec<Rule>,
}

impl RuleStore {
    /// Load rules from the backing store; unreadable data yields an empty store
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let mut store = Self { kv, rules: Vec::new() };
        store.reload();
        store
    }

    /// Re-read the backing store, dropping in-memory state
    ///
    /// Ids minted for stored rules that had none are written back so they
    /// stay valid across processes.
    pub fn reload(&mut self) {
        let (rules, minted) = load_rules(self.kv.as_ref());
        if minted == 0 {
            self.rules = rules;
            return;
        }
        info!(minted = minted, "Assigned ids to stored rules");
        if let Err(e) = self.commit(rules.clone()) {
            warn!(error = %e, "Failed to persist assigned rule ids");
            self.rules = rules;
        }
    }

    /// All rules in matching order
    pub fn list(&self) -> Vec<Rule> {
        in_priority_order(&self.rules).into_iter().cloned().collect()
    }

    /// Rules in insertion order
    pub fn all(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| &r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve a full id or a unique id prefix
    pub fn resolve(&self, id_or_prefix: &str) -> Result<RuleId, RuleError> {
        if let Some(rule) = self.rules.iter().find(|r| r.id.as_str() == id_or_prefix) {
            return Ok(rule.id.clone());
        }
        let mut candidates = self
            .rules
            .iter()
            .filter(|r| !id_or_prefix.is_empty() && r.id.as_str().starts_with(id_or_prefix));
        match (candidates.next(), candidates.next()) {
            (Some(rule), None) => Ok(rule.id.clone()),
            (Some(_), Some(_)) => Err(RuleError::AmbiguousId(id_or_prefix.to_string())),
            _ => Err(RuleError::UnknownRule(id_or_prefix.to_string())),
        }
    }

    pub fn add(
        &mut self,
        trigger: &str,
        output: &str,
        enabled: bool,
        priority: i32,
    ) -> Result<Rule, RuleError> {
        let trigger = validate_trigger(trigger)?;
        let rule = Rule {
            id: RuleId::generate(),
            trigger,
            output: output.to_string(),
            enabled,
            priority,
        };
        let mut rules = self.rules.clone();
        rules.push(rule.clone());
        self.commit(rules)?;
        info!(rule = %rule.id, trigger = %rule.trigger, priority = rule.priority, "Added rule");
        Ok(rule)
    }

    pub fn update(&mut self, id: &RuleId, edit: RuleEdit) -> Result<Rule, RuleError> {
        let trigger = edit.trigger.as_deref().map(validate_trigger).transpose()?;
        let updated = self.modify(id, |rule| {
            if let Some(trigger) = trigger {
                rule.trigger = trigger;
            }
            if let Some(output) = edit.output {
                rule.output = output;
            }
            if let Some(enabled) = edit.enabled {
                rule.enabled = enabled;
            }
            if let Some(priority) = edit.priority {
                rule.priority = priority;
            }
        })?;
        info!(rule = %updated.id, "Updated rule");
        Ok(updated)
    }

    /// Delete a rule; returns false if it did not exist
    pub fn remove(&mut self, id: &RuleId) -> Result<bool, RuleError> {
        if self.get(id).is_none() {
            return Ok(false);
        }
        let rules = self.rules.iter().filter(|r| &r.id != id).cloned().collect();
        self.commit(rules)?;
        info!(rule = %id, "Removed rule");
        Ok(true)
    }

    pub fn set_enabled(&mut self, id: &RuleId, enabled: bool) -> Result<Rule, RuleError> {
        self.modify(id, |rule| rule.enabled = enabled)
    }

    pub fn set_priority(&mut self, id: &RuleId, priority: i32) -> Result<Rule, RuleError> {
        self.modify(id, |rule| rule.priority = priority)
    }

    /// Assign priorities from an explicit order: first gets `count`, last gets 1
    pub fn reorder(&mut self, order: &[RuleId]) -> Result<(), RuleError> {
        let unique: HashSet<&RuleId> = order.iter().collect();
        if order.len() != self.rules.len()
            || unique.len() != order.len()
            || self.rules.iter().any(|r| !unique.contains(&r.id))
        {
            return Err(RuleError::IncompleteOrder);
        }

        let count = order.len();
        let mut rules = self.rules.clone();
        for rule in &mut rules {
            if let Some(index) = order.iter().position(|id| id == &rule.id) {
                rule.priority = (count - index) as i32;
            }
        }
        self.commit(rules)?;
        info!(count = count, "Reordered rules");
        Ok(())
    }

    /// Move one rule to `position` in matching order and renumber priorities
    pub fn move_to(&mut self, id: &RuleId, position: usize) -> Result<(), RuleError> {
        let mut order: Vec<RuleId> = self.list().into_iter().map(|r| r.id).collect();
        let current = order
            .iter()
            .position(|r| r == id)
            .ok_or_else(|| RuleError::UnknownRule(id.to_string()))?;
        let moved = order.remove(current);
        order.insert(position.min(order.len()), moved);
        self.reorder(&order)
    }

    fn modify(&mut self, id: &RuleId, apply: impl FnOnce(&mut Rule)) -> Result<Rule, RuleError> {
        let mut rules = self.rules.clone();
        let rule = rules
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| RuleError::UnknownRule(id.to_string()))?;
        apply(rule);
        let updated = rule.clone();
        self.commit(rules)?;
        Ok(updated)
    }

    fn commit(&mut self, rules: Vec<Rule>) -> Result<(), RuleError> {
        let json = serde_json::to_string_pretty(&rules)
            .map_err(|e| anyhow::Error::new(e).context("Failed to serialize rules"))?;
        self.kv.set(storage::RULES_KEY, &json)?;
        self.rules = rules;
        Ok(())
    }
}

fn validate_trigger(trigger: &str) -> Result<String, RuleError> {
    let trimmed = trigger.trim();
    if trimmed.is_empty() {
        return Err(RuleError::EmptyTrigger);
    }
    Ok(trimmed.to_string())
}

/// Returns the readable rules and how many of them were given a fresh id
fn load_rules(kv: &dyn KeyValueStore) -> (Vec<Rule>, usize) {
    let raw = match kv.get(storage::RULES_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return (Vec::new(), 0),
        Err(e) => {
            warn!(error = ?e, "Failed to read rules, starting with none");
            return (Vec::new(), 0);
        }
    };

    let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Stored rules are not a JSON list, starting with none");
            return (Vec::new(), 0);
        }
    };

    let mut seen = HashSet::new();
    let mut minted = 0;
    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let has_id = entry.get("id").is_some();
        match serde_json::from_value::<Rule>(entry) {
            Ok(rule) if rule.trigger.trim().is_empty() => {
                warn!(index = index, "Skipping stored rule with empty trigger");
            }
            Ok(rule) if !seen.insert(rule.id.clone()) => {
                warn!(index = index, rule = %rule.id, "Skipping stored rule with duplicate id");
            }
            Ok(rule) => {
                if !has_id {
                    minted += 1;
                }
                rules.push(rule);
            }
            Err(e) => warn!(index = index, error = %e, "Skipping unreadable stored rule"),
        }
    }
    (rules, minted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn empty_store() -> RuleStore {
        RuleStore::open(Arc::new(MemoryStore::new()))
    }

    fn store_with(raw: &str) -> RuleStore {
        RuleStore::open(Arc::new(MemoryStore::with_value(storage::RULES_KEY, raw)))
    }

    #[test]
    fn test_list_corrupt_value_is_empty() {
        let store = store_with("{not json");
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_list_wrong_shape_is_empty() {
        let store = store_with(r#"{"trigger":"a"}"#);
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let store = store_with(r#"[{"trigger":"OK","output":"yes"}]"#);
        let rules = store.list();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].enabled);
        assert_eq!(rules[0].priority, 0);
        assert!(!rules[0].id.as_str().is_empty());
    }

    #[test]
    fn test_bad_entries_skipped_individually() {
        let store = store_with(
            r#"[
                {"id":"1","trigger":"a","output":"x"},
                {"id":"2","trigger":"","output":"y"},
                {"id":"3","trigger":42},
                {"id":"1","trigger":"dup","output":"z"},
                {"id":"4","trigger":"b","output":"w","enabled":false,"priority":3}
            ]"#,
        );
        let rules = store.list();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "1"]);
        assert!(!rules[0].enabled);
    }

    #[test]
    fn test_assigned_ids_survive_reopen() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_value(
            storage::RULES_KEY,
            r#"[{"trigger":"OK","output":"yes"},{"id":"kept","trigger":"GO"}]"#,
        ));
        let first = RuleStore::open(kv.clone());
        let minted = first.list().iter().find(|r| r.trigger == "OK").unwrap().id.clone();

        let second = RuleStore::open(kv.clone());
        assert_eq!(second.resolve(minted.as_str()).unwrap(), minted);
        assert_eq!(second.resolve(&minted.as_str()[..8]).unwrap(), minted);
        assert_eq!(second.resolve("kept").unwrap(), RuleId::from("kept"));
        assert!(kv.get(storage::RULES_KEY).unwrap().unwrap().contains(minted.as_str()));
    }

    #[test]
    fn test_add_persists_and_reloads() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut store = RuleStore::open(kv.clone());
        let rule = store.add("  OK ", "yes", true, 2).unwrap();
        assert_eq!(rule.trigger, "OK");

        let reopened = RuleStore::open(kv);
        assert_eq!(reopened.list(), vec![rule]);
    }

    #[test]
    fn test_add_rejects_empty_trigger() {
        let mut store = empty_store();
        assert!(matches!(store.add("   ", "x", true, 0), Err(RuleError::EmptyTrigger)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_orders_by_priority_then_insertion() {
        let mut store = empty_store();
        let a = store.add("a", "1", true, 0).unwrap();
        let b = store.add("b", "2", true, 5).unwrap();
        let c = store.add("c", "3", true, 0).unwrap();

        let ids: Vec<RuleId> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);
    }

    #[test]
    fn test_update_and_toggle() {
        let mut store = empty_store();
        let rule = store.add("a", "1", true, 0).unwrap();

        let updated = store
            .update(
                &rule.id,
                RuleEdit {
                    output: Some("new".to_string()),
                    priority: Some(9),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.output, "new");
        assert_eq!(updated.priority, 9);
        assert_eq!(updated.trigger, "a");

        let disabled = store.set_enabled(&rule.id, false).unwrap();
        assert!(!disabled.enabled);
        assert_eq!(store.set_priority(&rule.id, -1).unwrap().priority, -1);
    }

    #[test]
    fn test_update_rejects_empty_trigger_without_change() {
        let mut store = empty_store();
        let rule = store.add("a", "1", true, 0).unwrap();
        let result = store.update(
            &rule.id,
            RuleEdit {
                trigger: Some(String::new()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(RuleError::EmptyTrigger)));
        assert_eq!(store.get(&rule.id).unwrap().trigger, "a");
    }

    #[test]
    fn test_unknown_rule_errors() {
        let mut store = empty_store();
        let missing = RuleId::from("nope");
        assert!(matches!(store.set_enabled(&missing, true), Err(RuleError::UnknownRule(_))));
        assert!(!store.remove(&missing).unwrap());
    }

    #[test]
    fn test_remove() {
        let mut store = empty_store();
        let a = store.add("a", "1", true, 0).unwrap();
        let b = store.add("b", "2", true, 0).unwrap();
        assert!(store.remove(&a.id).unwrap());
        assert_eq!(store.list(), vec![b]);
    }

    #[test]
    fn test_reorder_assigns_distinct_descending_priorities() {
        let mut store = empty_store();
        let a = store.add("a", "1", true, 0).unwrap();
        let b = store.add("b", "2", true, 0).unwrap();
        let c = store.add("c", "3", true, 0).unwrap();

        store.reorder(&[c.id.clone(), a.id.clone(), b.id.clone()]).unwrap();
        let listed = store.list();
        let priorities: Vec<(String, i32)> =
            listed.iter().map(|r| (r.trigger.clone(), r.priority)).collect();
        assert_eq!(
            priorities,
            vec![("c".to_string(), 3), ("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn test_reorder_requires_every_rule_once() {
        let mut store = empty_store();
        let a = store.add("a", "1", true, 0).unwrap();
        let _b = store.add("b", "2", true, 0).unwrap();

        assert!(matches!(store.reorder(&[a.id.clone()]), Err(RuleError::IncompleteOrder)));
        assert!(matches!(
            store.reorder(&[a.id.clone(), a.id.clone()]),
            Err(RuleError::IncompleteOrder)
        ));
    }

    #[test]
    fn test_move_to_front() {
        let mut store = empty_store();
        let a = store.add("a", "1", true, 3).unwrap();
        let b = store.add("b", "2", true, 2).unwrap();
        let c = store.add("c", "3", true, 1).unwrap();

        store.move_to(&c.id, 0).unwrap();
        let ids: Vec<RuleId> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);

        // Position past the end clamps to last
        store.move_to(&ids[0], 99).unwrap();
        assert_eq!(store.list().last().unwrap().trigger, "c");
    }

    #[test]
    fn test_resolve_prefix() {
        let mut store = store_with(
            r#"[{"id":"abc-1","trigger":"a"},{"id":"abd-2","trigger":"b"}]"#,
        );
        assert_eq!(store.resolve("abc").unwrap().as_str(), "abc-1");
        assert_eq!(store.resolve("abd-2").unwrap().as_str(), "abd-2");
        assert!(matches!(store.resolve("ab"), Err(RuleError::AmbiguousId(_))));
        assert!(matches!(store.resolve("zz"), Err(RuleError::UnknownRule(_))));
        assert!(matches!(store.resolve(""), Err(RuleError::UnknownRule(_))));

        store.reload();
        assert_eq!(store.len(), 2);
    }
}
