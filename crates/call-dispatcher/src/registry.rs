//! # Tool Registry
//!
//! Explicit name → handler table. Lookup goes through one deterministic
//! normalization, then an alias table, and only then (if a threshold is
//! configured) through fuzzy scoring.

use crate::domain::DispatchError;
use crate::ports::tool::{FnTool, ToolError, ToolHandler};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// A resolved handler and the canonical name it was registered under.
#[derive(Clone)]
pub struct ResolvedTool {
    pub name: String,
    pub handler: Arc<dyn ToolHandler>,
}

/// Registered tools, keyed by normalized name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
    aliases: HashMap<String, String>,
    fuzzy_threshold: Option<f64>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept near-miss names scoring at least `threshold` (0.0..=1.0).
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    /// Register `handler` under `name`. Returns the handler it replaced.
    pub fn register(
        &mut self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
    ) -> Option<Arc<dyn ToolHandler>> {
        let key = normalize_tool_name(name);
        let replaced = self.handlers.insert(key.clone(), handler);
        if replaced.is_some() {
            warn!(tool = %key, "Tool handler replaced");
        } else {
            debug!(tool = %key, "Tool registered");
        }
        replaced
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnTool::new(f)));
    }

    /// Make `alias` resolve to the tool registered as `target`.
    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases
            .insert(normalize_tool_name(alias), normalize_tool_name(target));
    }

    /// Find the handler for `name`.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTool, DispatchError> {
        let key = normalize_tool_name(name);

        if let Some(resolved) = self.exact(&key) {
            return Ok(resolved);
        }
        if let Some(resolved) = self.aliases.get(&key).and_then(|target| self.exact(target)) {
            debug!(requested = %name, tool = %resolved.name, "Tool resolved by alias");
            return Ok(resolved);
        }
        if let Some(resolved) = self.fuzzy(&key) {
            debug!(requested = %name, tool = %resolved.name, "Tool resolved by fuzzy match");
            return Ok(resolved);
        }
        Err(DispatchError::HandlerNotFound(name.to_string()))
    }

    fn exact(&self, key: &str) -> Option<ResolvedTool> {
        self.handlers.get(key).map(|handler| ResolvedTool {
            name: key.to_string(),
            handler: Arc::clone(handler),
        })
    }

    fn fuzzy(&self, key: &str) -> Option<ResolvedTool> {
        let threshold = self.fuzzy_threshold?;
        let mut best: Option<(&String, f64)> = None;
        // BTreeMap order makes ties resolve to the lexically first name.
        for name in self.handlers.keys() {
            let score = fuzzy_score(key, name);
            if score >= threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((name, score));
            }
        }
        best.and_then(|(name, _)| self.exact(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&normalize_tool_name(name))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn describe(&self) -> Vec<(String, String)> {
        self.handlers
            .iter()
            .map(|(name, handler)| (name.clone(), handler.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Canonical form of a tool name.
///
/// Lowercase; every run of non-alphanumeric characters becomes one `_`;
/// leading and trailing `_` trimmed; a `tool_` prefix and a `_tool` suffix
/// dropped when something remains.
pub fn normalize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let mut trimmed = out.trim_matches('_');

    while let Some(rest) = trimmed.strip_prefix("tool_") {
        trimmed = rest;
    }
    while let Some(rest) = trimmed.strip_suffix("_tool") {
        trimmed = rest;
    }
    trimmed.to_string()
}

/// Similarity of two names in `0.0..=1.0`: one minus the Levenshtein
/// distance of their normalized forms over the longer length.
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize_tool_name(a).chars().collect();
    let b: Vec<char> = normalize_tool_name(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", |args| async move { Ok(args) });
        registry.register_fn("create_sticky_note", |_| async { Ok(json!("note")) });
        registry
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_tool_name("Echo"), "echo");
        assert_eq!(normalize_tool_name("  Create Sticky-Note!! "), "create_sticky_note");
        assert_eq!(normalize_tool_name("tool_echo"), "echo");
        assert_eq!(normalize_tool_name("echo_tool"), "echo");
        assert_eq!(normalize_tool_name("tool"), "tool");
        assert_eq!(normalize_tool_name("__do__nothing__"), "do_nothing");
    }

    #[test]
    fn test_resolve_exact_and_normalized() {
        let registry = registry();
        assert_eq!(registry.resolve("echo").unwrap().name, "echo");
        assert_eq!(registry.resolve("Create Sticky Note").unwrap().name, "create_sticky_note");
    }

    #[test]
    fn test_resolve_alias() {
        let mut registry = registry();
        registry.alias("sticky", "create_sticky_note");
        assert_eq!(registry.resolve("Sticky").unwrap().name, "create_sticky_note");
    }

    #[test]
    fn test_not_found_without_threshold() {
        let registry = registry();
        assert_eq!(
            registry.resolve("ech").err(),
            Some(DispatchError::HandlerNotFound("ech".into()))
        );
    }

    #[test]
    fn test_fuzzy_only_above_threshold() {
        let registry = registry().with_fuzzy_threshold(0.7);
        assert_eq!(registry.resolve("create_stiky_note").unwrap().name, "create_sticky_note");
        assert!(registry.resolve("paint").is_err());
    }

    #[test]
    fn test_fuzzy_score_bounds() {
        assert_eq!(fuzzy_score("echo", "ECHO"), 1.0);
        assert_eq!(fuzzy_score("", ""), 1.0);
        assert_eq!(fuzzy_score("abc", "xyz"), 0.0);
        assert!((fuzzy_score("echo", "ech") - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut registry = registry();
        let previous = registry.register("ECHO", Arc::new(FnTool::new(|_| async { Ok(Value::Null) })));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["create_sticky_note", "echo"]);
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(name in "[ -~]{0,40}") {
            let once = normalize_tool_name(&name);
            prop_assert_eq!(normalize_tool_name(&once), once);
        }

        #[test]
        fn prop_score_is_symmetric(a in "[a-z_]{0,12}", b in "[a-z_]{0,12}") {
            let ab = fuzzy_score(&a, &b);
            prop_assert!((ab - fuzzy_score(&b, &a)).abs() < 1e-12);
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
