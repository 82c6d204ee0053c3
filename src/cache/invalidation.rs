//! Invalidation Engine
//!
//! Turns declared invalidation intent into concrete patterns and purges the
//! matching keys from a backend.
//!
//! Patterns come in two shapes:
//! - generic: a namespace path followed by `:*` (e.g. `entities:*`). These are
//!   expanded to every registered sub-namespace (`entities:state:*`, ...).
//! - specific: anything carrying a concrete identifier (e.g.
//!   `entities:state:id=light.kitchen*`). These are used as-is.
//!
//! Chains are named lists of pattern templates whose `{placeholder}` tokens
//! are filled from call-site variables.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::backends::CacheBackend;
use crate::cache::pattern::{self, SEPARATOR, WILDCARD};
use crate::error::Result;

/// Marks a concrete `name=value` segment.
const IDENTIFIER_MARK: char = '=';

// == Report ==
/// Outcome of one invalidation call.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InvalidationReport {
    /// Patterns that were resolved against the backend, after expansion
    pub patterns: Vec<String>,
    /// Distinct keys removed
    pub keys_removed: usize,
}

// == Invalidation Engine ==
#[derive(Debug, Clone)]
pub struct InvalidationEngine {
    hierarchy: HashMap<String, Vec<String>>,
    chains: HashMap<String, Vec<String>>,
}

impl Default for InvalidationEngine {
    /// Engine preloaded with the standard namespaces and chains.
    fn default() -> Self {
        let mut engine = Self::empty();
        engine
            .register_namespace("entities", ["state", "list", "domain", "search", "history"])
            .register_namespace("automations", ["list", "config", "trace"])
            .register_namespace("devices", ["list", "registry"])
            .register_namespace("services", ["list", "domain"])
            .register_chain(
                "entity_update",
                [
                    "entities:state:id={entity_id}*",
                    "entities:list:*",
                    "entities:domain:*",
                    "entities:search:*",
                ],
            )
            .register_chain(
                "automation_update",
                [
                    "automations:config:id={automation_id}*",
                    "automations:trace:id={automation_id}*",
                    "automations:list:*",
                ],
            )
            .register_chain(
                "device_update",
                [
                    "devices:registry:id={device_id}*",
                    "devices:list:*",
                    "entities:list:*",
                ],
            );
        engine
    }
}

impl InvalidationEngine {
    /// Engine with no namespaces or chains registered.
    pub fn empty() -> Self {
        Self {
            hierarchy: HashMap::new(),
            chains: HashMap::new(),
        }
    }

    /// Registers the sub-namespaces a generic `{namespace}:*` expands to.
    /// `namespace` may itself be a path such as `entities:state`.
    pub fn register_namespace<I, S>(&mut self, namespace: impl Into<String>, subs: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.hierarchy.entry(namespace.into()).or_default();
        for sub in subs {
            let sub = sub.into();
            if !entry.contains(&sub) {
                entry.push(sub);
            }
        }
        self
    }

    /// Registers (or replaces) a named chain of pattern templates.
    pub fn register_chain<I, S>(&mut self, name: impl Into<String>, templates: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chains
            .insert(name.into(), templates.into_iter().map(Into::into).collect());
        self
    }

    pub fn chain(&self, name: &str) -> Option<&[String]> {
        self.chains.get(name).map(Vec::as_slice)
    }

    /// True for `{namespace path}:*` with no concrete identifier segment.
    pub fn is_generic(key_pattern: &str) -> bool {
        generic_base(key_pattern).is_some()
    }

    // == Expand ==
    /// Expands generic patterns through the registered hierarchy.
    ///
    /// The result is de-duplicated and keeps the input patterns. Patterns with
    /// a wildcard anywhere but the end are dropped with a warning.
    pub fn expand<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<String> {
        let mut expanded = BTreeSet::new();
        let mut pending: Vec<String> = Vec::new();

        for p in patterns {
            let p = p.as_ref();
            if !pattern::is_valid(p) {
                warn!(pattern = %p, "Ignoring malformed invalidation pattern");
                continue;
            }
            pending.push(p.to_string());
        }

        while let Some(current) = pending.pop() {
            if !expanded.insert(current.clone()) {
                continue;
            }
            let Some(base) = generic_base(&current) else {
                continue;
            };
            if let Some(subs) = self.hierarchy.get(base) {
                for sub in subs {
                    pending.push(format!("{}{}{}{}{}", base, SEPARATOR, sub, SEPARATOR, WILDCARD));
                }
            }
        }

        expanded.into_iter().collect()
    }

    // == Chains ==
    /// Renders a chain's templates with `vars`.
    ///
    /// Templates referencing a missing variable are skipped; an unknown chain
    /// yields no patterns. Both cases are logged, never raised.
    pub fn resolve_chain(&self, name: &str, vars: &HashMap<String, String>) -> Vec<String> {
        let Some(templates) = self.chains.get(name) else {
            warn!(chain = %name, "Unknown invalidation chain");
            return Vec::new();
        };

        templates
            .iter()
            .filter_map(|template| match render_template(template, vars) {
                Some(rendered) => Some(rendered),
                None => {
                    warn!(chain = %name, template = %template, "Missing template variable, skipping pattern");
                    None
                }
            })
            .collect()
    }

    // == Execute ==
    /// Expands `patterns`, collects the union of matching keys, then deletes
    /// them.
    ///
    /// The delete set comes from a single `keys()` snapshot taken over the
    /// longest literal prefix the expanded patterns share, filtered in memory.
    /// It is fixed before the first delete is issued.
    pub async fn execute<S: AsRef<str> + Sync>(
        &self,
        backend: &dyn CacheBackend,
        patterns: &[S],
    ) -> Result<InvalidationReport> {
        let expanded = self.expand(patterns);
        if expanded.is_empty() {
            return Ok(InvalidationReport::default());
        }

        let scan = format!("{}{}", shared_literal_prefix(&expanded), WILDCARD);
        let doomed: BTreeSet<String> = backend
            .keys(&scan)
            .await?
            .into_iter()
            .filter(|key| expanded.iter().any(|p| pattern::matches(p, key)))
            .collect();

        let mut removed = 0;
        for key in &doomed {
            match backend.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to delete key during invalidation"),
            }
        }

        debug!(patterns = ?expanded, removed, "Invalidation executed");
        Ok(InvalidationReport {
            patterns: expanded,
            keys_removed: removed,
        })
    }
}

// == Helpers ==
/// The namespace path of a generic pattern (`entities` for `entities:*`).
fn generic_base(key_pattern: &str) -> Option<&str> {
    let base = key_pattern.strip_suffix(WILDCARD)?.strip_suffix(SEPARATOR)?;
    let concrete = base.is_empty()
        || base.contains(IDENTIFIER_MARK)
        || base.contains(WILDCARD)
        || base.split(SEPARATOR).any(str::is_empty);
    (!concrete).then_some(base)
}

/// Longest literal prefix shared by every pattern, cut on a char boundary.
fn shared_literal_prefix(patterns: &[String]) -> &str {
    let mut literals = patterns.iter().map(|p| pattern::literal_prefix(p));
    let Some(first) = literals.next() else {
        return "";
    };
    literals.fold(first, |shared, literal| {
        let mut len = shared
            .bytes()
            .zip(literal.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        while !shared.is_char_boundary(len) {
            len -= 1;
        }
        &shared[..len]
    })
}

/// Substitutes `{name}` tokens. Returns `None` if a token has no value or a
/// brace is left unclosed.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        out.push_str(vars.get(&after[..close])?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records every scan it serves.
    #[derive(Default)]
    struct ScanLog {
        inner: MemoryBackend,
        scans: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheBackend for ScanLog {
        fn name(&self) -> &'static str {
            "scan-log"
        }
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Value, ttl: u64) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn keys(&self, key_pattern: &str) -> Result<Vec<String>> {
            self.scans.lock().unwrap().push(key_pattern.to_string());
            self.inner.keys(key_pattern).await
        }
        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
        async fn size(&self) -> Result<usize> {
            self.inner.size().await
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::default();
        for key in [
            "entities:state:id=a",
            "entities:state:id=b",
            "entities:state:id=light.kitchen",
            "entities:list:all",
            "entities:list:domain=light",
            "automations:list:all",
        ] {
            backend.set(key, json!(key), 60).await.unwrap();
        }
        backend
    }

    #[test]
    fn test_generic_vs_specific() {
        assert!(InvalidationEngine::is_generic("entities:*"));
        assert!(InvalidationEngine::is_generic("entities:state:*"));
        assert!(!InvalidationEngine::is_generic("entities:state:id=a*"));
        assert!(!InvalidationEngine::is_generic("entities:state:id=a"));
        assert!(!InvalidationEngine::is_generic("entities*"));
        assert!(!InvalidationEngine::is_generic(":*"));
        assert!(!InvalidationEngine::is_generic("*"));
    }

    #[test]
    fn test_expand_generic_pattern() {
        let engine = InvalidationEngine::default();
        let expanded = engine.expand(&["entities:*"]);

        assert!(expanded.contains(&"entities:*".to_string()));
        assert!(expanded.contains(&"entities:state:*".to_string()));
        assert!(expanded.contains(&"entities:list:*".to_string()));
        assert!(expanded.contains(&"entities:domain:*".to_string()));
        assert!(!expanded.iter().any(|p| p.starts_with("automations")));
    }

    #[test]
    fn test_expand_leaves_specific_patterns_alone() {
        let engine = InvalidationEngine::default();
        assert_eq!(
            engine.expand(&["entities:state:id=a*"]),
            vec!["entities:state:id=a*".to_string()]
        );
    }

    #[test]
    fn test_expand_is_transitive() {
        let mut engine = InvalidationEngine::empty();
        engine
            .register_namespace("entities", ["state"])
            .register_namespace("entities:state", ["attributes"]);

        let expanded = engine.expand(&["entities:*"]);
        assert_eq!(
            expanded,
            vec![
                "entities:*".to_string(),
                "entities:state:*".to_string(),
                "entities:state:attributes:*".to_string(),
            ]
        );
    }

    #[test]
    fn test_expand_deduplicates_and_drops_malformed() {
        let engine = InvalidationEngine::default();
        let expanded = engine.expand(&["entities:list:*", "entities:list:*", "bad:*:pattern"]);
        assert_eq!(expanded, vec!["entities:list:*".to_string()]);
    }

    #[test]
    fn test_render_template() {
        let v = vars(&[("entity_id", "light.kitchen")]);
        assert_eq!(
            render_template("entities:state:id={entity_id}*", &v).as_deref(),
            Some("entities:state:id=light.kitchen*")
        );
        assert_eq!(render_template("entities:list:*", &v).as_deref(), Some("entities:list:*"));
        assert_eq!(render_template("x:{missing}*", &v), None);
        assert_eq!(render_template("x:{entity_id*", &v), None);
    }

    #[test]
    fn test_resolve_chain_skips_unbound_templates() {
        let mut engine = InvalidationEngine::empty();
        engine.register_chain("c", ["a:id={id}*", "a:list:*", "b:id={other}*"]);

        let resolved = engine.resolve_chain("c", &vars(&[("id", "7")]));
        assert_eq!(resolved, vec!["a:id=7*".to_string(), "a:list:*".to_string()]);
        assert!(engine.resolve_chain("nope", &vars(&[])).is_empty());
    }

    #[tokio::test]
    async fn test_execute_generic_removes_everything_in_namespace() {
        let backend = seeded().await;
        let engine = InvalidationEngine::default();

        let report = engine.execute(&backend, &["entities:*"]).await.unwrap();

        assert_eq!(report.keys_removed, 5);
        assert_eq!(backend.keys("*").await.unwrap(), vec!["automations:list:all"]);
    }

    #[tokio::test]
    async fn test_execute_specific_removes_only_matching() {
        let backend = seeded().await;
        let engine = InvalidationEngine::default();

        let report = engine.execute(&backend, &["entities:state:id=a*"]).await.unwrap();

        assert_eq!(report.keys_removed, 1);
        assert!(backend.get("entities:state:id=a").await.unwrap().is_none());
        assert!(backend.get("entities:state:id=b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_execute_chain() {
        let backend = seeded().await;
        let mut engine = InvalidationEngine::empty();
        engine.register_chain(
            "entity_update",
            ["entities:state:id={entity_id}*", "entities:list:*"],
        );

        let patterns =
            engine.resolve_chain("entity_update", &vars(&[("entity_id", "light.kitchen")]));
        let report = engine.execute(&backend, &patterns).await.unwrap();

        assert_eq!(report.keys_removed, 3);
        let mut left = backend.keys("*").await.unwrap();
        left.sort();
        assert_eq!(
            left,
            vec![
                "automations:list:all",
                "entities:state:id=a",
                "entities:state:id=b",
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_overlapping_patterns_counts_each_key_once() {
        let backend = seeded().await;
        let engine = InvalidationEngine::default();

        let report = engine
            .execute(&backend, &["entities:list:*", "entities:list:all"])
            .await
            .unwrap();
        assert_eq!(report.keys_removed, 2);
    }

    #[test]
    fn test_shared_literal_prefix() {
        let patterns = |ps: &[&str]| ps.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        assert_eq!(
            shared_literal_prefix(&patterns(&["entities:state:*", "entities:list:all"])),
            "entities:"
        );
        assert_eq!(shared_literal_prefix(&patterns(&["entities:*", "devices:*"])), "");
        assert_eq!(shared_literal_prefix(&patterns(&["a:é*", "a:è*"])), "a:");
    }

    #[tokio::test]
    async fn test_execute_takes_one_snapshot() {
        let backend = ScanLog::default();
        for key in ["entities:state:id=a", "entities:list:all", "devices:list:all"] {
            backend.set(key, json!(1), 60).await.unwrap();
        }
        let engine = InvalidationEngine::default();

        let report = engine.execute(&backend, &["entities:*"]).await.unwrap();

        assert_eq!(report.keys_removed, 2);
        assert_eq!(*backend.scans.lock().unwrap(), vec!["entities:*".to_string()]);
        assert!(backend.get("devices:list:all").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_execute_no_match_is_not_an_error() {
        let backend = seeded().await;
        let engine = InvalidationEngine::default();

        let report = engine.execute(&backend, &["devices:*"]).await.unwrap();
        assert_eq!(report.keys_removed, 0);
        assert!(!report.patterns.is_empty());
    }
}
