//! Keyword-based image suggestions.
//!
//! When extraction finds no citation at all, callers may still want an
//! illustrative image. This is a product policy, not extraction: it
//! lives in its own engine with its own confidence tier and can be
//! switched off entirely so tests stay deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::ImageReference;

/// Confidence attached to the default asset when no keyword matched.
const CONF_DEFAULT_ASSET: f32 = 0.5;

/// One keyword→asset association.
///
/// Keywords are matched case-insensitively by containment against the
/// combined query and answer text; bilingual products list both
/// spellings (e.g. "battery" and "배터리").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    /// Asset filename under the configured base URL.
    pub asset: String,
    /// Suggestion confidence, below any directive-match tier.
    pub score: f32,
}

impl KeywordRule {
    pub fn new(
        keywords: impl IntoIterator<Item = impl Into<String>>,
        asset: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.into()).collect(),
            asset: asset.into(),
            score,
        }
    }
}

/// Configuration for the suggestion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionConfig {
    /// Master switch; a disabled engine suggests nothing.
    pub enabled: bool,

    /// Base URL assets are served from.
    pub base_url: String,

    #[serde(default)]
    pub rules: Vec<KeywordRule>,

    /// Asset returned when no keyword matches. `None` means no-match
    /// yields an empty suggestion list.
    #[serde(default)]
    pub default_asset: Option<String>,

    /// Cap on suggestions per call.
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

fn default_max_suggestions() -> usize {
    2
}

impl SuggestionConfig {
    /// Enabled config with no rules yet.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            base_url: base_url.into(),
            rules: Vec::new(),
            default_asset: None,
            max_suggestions: default_max_suggestions(),
        }
    }

    /// Config that suggests nothing, for deterministic tests.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            rules: Vec::new(),
            default_asset: None,
            max_suggestions: 0,
        }
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = KeywordRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_default_asset(mut self, asset: impl Into<String>) -> Self {
        self.default_asset = Some(asset.into());
        self
    }

    pub fn with_max_suggestions(mut self, max: usize) -> Self {
        self.max_suggestions = max;
        self
    }
}

/// Matches keyword rules against conversation text and produces
/// suggested image references.
#[derive(Debug, Clone)]
pub struct SuggestionEngine {
    config: SuggestionConfig,
}

impl SuggestionEngine {
    pub fn new(config: SuggestionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SuggestionConfig {
        &self.config
    }

    /// True when at least one rule keyword occurs in the text.
    pub fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.config
            .rules
            .iter()
            .any(|rule| rule.keywords.iter().any(|k| lowered.contains(&k.to_lowercase())))
    }

    /// Suggest images for a query/answer pair with no extracted
    /// citations. Highest-scoring rules win, capped at
    /// `max_suggestions`; falls back to the default asset when
    /// configured and nothing matched.
    pub fn suggest(&self, query: &str, answer: &str) -> Vec<ImageReference> {
        if !self.config.enabled {
            return Vec::new();
        }

        let haystack = format!("{} {}", query, answer).to_lowercase();

        let mut matched: Vec<&KeywordRule> = self
            .config
            .rules
            .iter()
            .filter(|rule| {
                rule.keywords
                    .iter()
                    .any(|k| haystack.contains(&k.to_lowercase()))
            })
            .collect();

        matched.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
        });

        let suggestions: Vec<ImageReference> = matched
            .iter()
            .take(self.config.max_suggestions)
            .enumerate()
            .map(|(idx, rule)| {
                ImageReference::new(self.asset_url(&rule.asset), (idx + 1).to_string(), rule.score)
            })
            .collect();

        if suggestions.is_empty() {
            if let Some(asset) = &self.config.default_asset {
                tracing::debug!(asset = %asset, "no keyword matched, using default asset");
                return vec![ImageReference::new(
                    self.asset_url(asset),
                    "1",
                    CONF_DEFAULT_ASSET,
                )];
            }
        }

        suggestions
    }

    fn asset_url(&self, asset: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), asset)
    }
}
