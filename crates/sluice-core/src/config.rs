//! Flow configuration that stages and gates read at initialize time.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::comparator::{self, FieldComparator, DEFAULT_COMPARATOR_PROPERTY};
use crate::error::{Error, Result};

/// Which assertions run. An assertion declared at `Strict` only runs when
/// the flow is configured `Strict`; `Valid` assertions run under both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssertionLevel {
    #[default]
    Strict,
    Valid,
    None,
}

impl AssertionLevel {
    /// Whether an assertion declared at `self` runs under `configured`.
    pub fn runs_under(self, configured: AssertionLevel) -> bool {
        match configured {
            AssertionLevel::Strict => self != AssertionLevel::None,
            AssertionLevel::Valid => self == AssertionLevel::Valid,
            AssertionLevel::None => false,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "valid" => Ok(Self::Valid),
            "none" => Ok(Self::None),
            other => Err(Error::Config(format!("unknown assertion level: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Assertions declared above this level are skipped.
    pub assertion_level: AssertionLevel,

    /// Comparator for grouping columns without one attached.
    pub default_comparator: Option<String>,

    /// Characters of a trapped record included in the warning log.
    pub trap_preview_chars: usize,

    /// Free-form properties exposed through `FlowProcess::property`.
    pub properties: BTreeMap<String, String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            assertion_level: AssertionLevel::Strict,
            default_comparator: None,
            trap_preview_chars: 128,
            properties: BTreeMap::new(),
        }
    }
}

impl FlowConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SLUICE_ASSERTION_LEVEL`: `strict`, `valid` or `none`
    /// - `SLUICE_DEFAULT_COMPARATOR`: `natural`, `reverse` or `case-insensitive`
    /// - `SLUICE_TRAP_PREVIEW_CHARS`: preview length for trapped records
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SLUICE_ASSERTION_LEVEL") {
            if let Ok(v) = AssertionLevel::parse(&s) {
                cfg.assertion_level = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_DEFAULT_COMPARATOR") {
            cfg.default_comparator = Some(s);
        }

        if let Ok(s) = std::env::var("SLUICE_TRAP_PREVIEW_CHARS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.trap_preview_chars = v;
            }
        }

        cfg
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        self.default_comparator().map(|_| ())
    }

    /// The explicit setting wins over the property.
    pub fn default_comparator(&self) -> Result<Option<Arc<dyn FieldComparator>>> {
        let name = self
            .default_comparator
            .as_deref()
            .or_else(|| self.property(DEFAULT_COMPARATOR_PROPERTY));
        name.map(comparator::by_name).transpose()
    }
}
