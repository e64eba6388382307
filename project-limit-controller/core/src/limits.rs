use project_limit_controller_k8s_api::{Labels, Selector};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// The `kind` that identifies a project request limit document.
pub const KIND: &str = "ProjectRequestLimitConfig";

/// An ordered list of limit tiers.
///
/// Tiers are evaluated in the order they were declared and the first tier that selects a user
/// determines that user's limit. The list is never reordered or deduplicated: overlapping
/// selectors are legal and are resolved by position alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectLimits(Arc<[Tier]>);

/// A selector paired with the maximum number of projects its users may own.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tier {
    pub selector: Selector,

    /// When unset, users selected by this tier are not limited.
    pub max_projects: Option<u64>,
}

/// The limit that applies to a user.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolvedLimit {
    /// No tier selects the user. Unselected users are not limited.
    Unmatched,

    /// The first tier to select the user sets no maximum.
    Unlimited { tier: usize },

    Limited { tier: usize, max_projects: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse project request limits: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("unexpected kind {0:?}, expected {KIND}")]
    Kind(String),

    #[error("invalid limit at index {index}: {source}")]
    InvalidTier {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid limit at index {index}: maxProjects must be a non-negative integer, not {value}")]
    InvalidMaxProjects { index: usize, value: i64 },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    // Identification headers only; they carry no policy.
    #[serde(default)]
    #[allow(dead_code)]
    api_version: Option<String>,

    #[serde(default)]
    kind: Option<String>,

    #[serde(default)]
    limits: Option<Vec<serde_yaml::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTier {
    #[serde(default)]
    selector: Selector,

    #[serde(default)]
    max_projects: Option<i64>,
}

// === impl ProjectLimits ===

impl ProjectLimits {
    pub fn new(tiers: impl IntoIterator<Item = Tier>) -> Self {
        Self(tiers.into_iter().collect())
    }

    /// Parses a limits document.
    ///
    /// Either every tier is valid and the full document is returned or an error identifies the
    /// first malformed tier. An empty document, or one without `limits`, has no tiers.
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        if doc.trim().is_empty() {
            return Ok(Self::default());
        }

        let RawDocument { kind, limits, .. } =
            serde_yaml::from_str::<Option<RawDocument>>(doc)
                .map_err(ConfigError::Parse)?
                .unwrap_or_default();

        if let Some(kind) = kind {
            if kind != KIND {
                return Err(ConfigError::Kind(kind));
            }
        }

        limits
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, value)| Tier::from_value(index, value))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tier> {
        self.0.iter()
    }

    pub fn get(&self, tier: usize) -> Option<&Tier> {
        self.0.get(tier)
    }

    /// Indicates whether some tier selects every user, so that no user falls through to the
    /// unlimited default.
    pub fn has_catch_all(&self) -> bool {
        self.0.iter().any(|t| t.selector.is_empty())
    }

    /// Finds the limit for a user with the given labels.
    pub fn resolve(&self, labels: &Labels) -> ResolvedLimit {
        for (tier, Tier { selector, max_projects }) in self.0.iter().enumerate() {
            if !selector.matches(labels) {
                continue;
            }
            return match *max_projects {
                Some(max_projects) => ResolvedLimit::Limited { tier, max_projects },
                None => ResolvedLimit::Unlimited { tier },
            };
        }

        ResolvedLimit::Unmatched
    }
}

// === impl Tier ===

impl Tier {
    fn from_value(index: usize, value: serde_yaml::Value) -> Result<Self, ConfigError> {
        let RawTier {
            selector,
            max_projects,
        } = serde_yaml::from_value(value)
            .map_err(|source| ConfigError::InvalidTier { index, source })?;

        let max_projects = match max_projects {
            None => None,
            Some(value) => Some(
                u64::try_from(value)
                    .map_err(|_| ConfigError::InvalidMaxProjects { index, value })?,
            ),
        };

        Ok(Self {
            selector,
            max_projects,
        })
    }
}

// === impl ResolvedLimit ===

impl ResolvedLimit {
    pub fn max_projects(&self) -> Option<u64> {
        match self {
            Self::Limited { max_projects, .. } => Some(*max_projects),
            Self::Unmatched | Self::Unlimited { .. } => None,
        }
    }

    pub fn tier(&self) -> Option<usize> {
        match self {
            Self::Limited { tier, .. } | Self::Unlimited { tier } => Some(*tier),
            Self::Unmatched => None,
        }
    }
}
