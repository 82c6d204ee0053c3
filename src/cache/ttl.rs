//! TTL Module
//!
//! Static, preset, dynamic and conditional TTL specs, plus the resolver that
//! layers configured per-operation overrides over them.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::CallArgs;
use crate::error::CacheError;

// == Strategies ==
/// Computes a TTL in seconds from a finished call.
pub trait ResolveTtl: Send + Sync {
    fn resolve(&self, args: &CallArgs, result: &Value) -> u64;
}

impl<F> ResolveTtl for F
where
    F: Fn(&CallArgs, &Value) -> u64 + Send + Sync,
{
    fn resolve(&self, args: &CallArgs, result: &Value) -> u64 {
        self(args, result)
    }
}

/// Yes/no decision over a finished call.
///
/// Used as the cache condition of reads, the gate of write invalidation, and
/// the rule selector of conditional TTLs.
pub trait CallPredicate: Send + Sync {
    fn test(&self, args: &CallArgs, result: &Value) -> bool;
}

impl<F> CallPredicate for F
where
    F: Fn(&CallArgs, &Value) -> bool + Send + Sync,
{
    fn test(&self, args: &CallArgs, result: &Value) -> bool {
        self(args, result)
    }
}

// == Presets ==
/// Named TTLs shared by call sites and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPreset {
    VeryLong,
    Long,
    Medium,
    Short,
    Disabled,
}

impl TtlPreset {
    pub fn seconds(self) -> u64 {
        match self {
            TtlPreset::VeryLong => 3600,
            TtlPreset::Long => 1800,
            TtlPreset::Medium => 300,
            TtlPreset::Short => 60,
            TtlPreset::Disabled => 0,
        }
    }
}

impl FromStr for TtlPreset {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "very_long" => Ok(TtlPreset::VeryLong),
            "long" => Ok(TtlPreset::Long),
            "medium" => Ok(TtlPreset::Medium),
            "short" => Ok(TtlPreset::Short),
            "disabled" => Ok(TtlPreset::Disabled),
            other => Err(CacheError::Configuration(format!(
                "Unknown TTL preset '{}'",
                other
            ))),
        }
    }
}

/// Parses a configured TTL: either whole seconds or a preset name.
pub fn parse_ttl_setting(raw: &str) -> crate::error::Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(seconds) => Ok(seconds),
        Err(_) => raw.parse::<TtlPreset>().map(TtlPreset::seconds),
    }
}

// == TTL Spec ==
/// A first-matching rule of a conditional TTL.
#[derive(Clone)]
pub struct TtlRule {
    when: Arc<dyn CallPredicate>,
    ttl: u64,
}

/// How long a call's result may be cached. Zero means "do not store".
#[derive(Clone)]
pub enum TtlSpec {
    Fixed(u64),
    Preset(TtlPreset),
    Dynamic(Arc<dyn ResolveTtl>),
    Conditional { rules: Vec<TtlRule>, fallback: u64 },
}

impl TtlSpec {
    pub fn fixed(seconds: u64) -> Self {
        TtlSpec::Fixed(seconds)
    }

    pub fn preset(preset: TtlPreset) -> Self {
        TtlSpec::Preset(preset)
    }

    pub fn dynamic<F>(resolver: F) -> Self
    where
        F: Fn(&CallArgs, &Value) -> u64 + Send + Sync + 'static,
    {
        TtlSpec::Dynamic(Arc::new(resolver))
    }

    /// Starts a conditional spec; add rules with [`TtlSpec::when`].
    pub fn conditional(fallback: u64) -> Self {
        TtlSpec::Conditional {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Appends a rule to a conditional spec. No effect on other variants.
    pub fn when<P>(mut self, predicate: P, ttl: u64) -> Self
    where
        P: Fn(&CallArgs, &Value) -> bool + Send + Sync + 'static,
    {
        if let TtlSpec::Conditional { rules, .. } = &mut self {
            rules.push(TtlRule {
                when: Arc::new(predicate),
                ttl,
            });
        }
        self
    }

    /// Resolves the spec against a finished call.
    pub fn resolve(&self, args: &CallArgs, result: &Value) -> u64 {
        match self {
            TtlSpec::Fixed(seconds) => *seconds,
            TtlSpec::Preset(preset) => preset.seconds(),
            TtlSpec::Dynamic(resolver) => resolver.resolve(args, result),
            TtlSpec::Conditional { rules, fallback } => rules
                .iter()
                .find(|rule| rule.when.test(args, result))
                .map(|rule| rule.ttl)
                .unwrap_or(*fallback),
        }
    }
}

impl fmt::Debug for TtlSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlSpec::Fixed(seconds) => write!(f, "Fixed({})", seconds),
            TtlSpec::Preset(preset) => write!(f, "Preset({:?})", preset),
            TtlSpec::Dynamic(_) => write!(f, "Dynamic(..)"),
            TtlSpec::Conditional { rules, fallback } => {
                write!(f, "Conditional({} rules, fallback {})", rules.len(), fallback)
            }
        }
    }
}

impl From<u64> for TtlSpec {
    fn from(seconds: u64) -> Self {
        TtlSpec::Fixed(seconds)
    }
}

impl From<TtlPreset> for TtlSpec {
    fn from(preset: TtlPreset) -> Self {
        TtlSpec::Preset(preset)
    }
}

// == TTL Resolver ==
/// Picks the TTL for a call.
///
/// Precedence: configured override for `{prefix}.{operation}`, then the call
/// site's spec, then the default TTL.
#[derive(Debug, Clone, Default)]
pub struct TtlResolver {
    default_ttl: u64,
    overrides: HashMap<String, u64>,
}

impl TtlResolver {
    pub fn new(default_ttl: u64, overrides: HashMap<String, u64>) -> Self {
        Self {
            default_ttl,
            overrides,
        }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub fn resolve(
        &self,
        operation: &str,
        spec: Option<&TtlSpec>,
        args: &CallArgs,
        result: &Value,
    ) -> u64 {
        if let Some(seconds) = self.overrides.get(operation) {
            return *seconds;
        }
        match spec {
            Some(spec) => spec.resolve(args, result),
            None => self.default_ttl,
        }
    }
}
