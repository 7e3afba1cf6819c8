//! Extractor configuration and validation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default bound on how far past a marker the extractor searches for
/// its URL. Prevents pathological matches on long intervening text.
pub const DEFAULT_MAX_LOOKAHEAD_CHARS: usize = 200;

/// Default marker token. The deployed product prompts the model in
/// Korean; other locales override this.
pub const DEFAULT_MARKER_TOKEN: &str = "이미지";

/// Invalid configuration supplied by calling code.
///
/// The extractor never raises for malformed input text (model output
/// is untrusted by definition), but a missing or unusable URL prefix
/// would silently accept every URL in the response, so it is rejected
/// at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("allowed URL prefix must not be empty")]
    EmptyPrefix,

    #[error("allowed URL prefix is not a valid http(s) URL: {0}")]
    InvalidPrefix(#[from] url::ParseError),

    #[error("allowed URL prefix must use http or https, got: {0}")]
    DisallowedScheme(String),

    #[error("marker token must not be empty")]
    EmptyMarker,

    #[error("pattern construction failed: {0}")]
    Pattern(#[from] regex::Error),
}

/// Configuration for the image reference extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Required URL prefix a match must carry to be accepted.
    ///
    /// Typically the storage bucket's public base path, e.g.
    /// `https://cdn.example.com/storage/v1/object/public/images/`.
    /// Anything outside it is silently dropped.
    pub allowed_url_prefix: String,

    /// Category tokens the asset inventory actually contains.
    ///
    /// An asset filename with an unrecognized category segment is
    /// rewritten to `fallback_category` before the URL is recorded.
    #[serde(default = "default_known_categories")]
    pub known_categories: BTreeSet<String>,

    /// Category substituted for unrecognized ones.
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,

    /// The bracketed marker token, `[<marker_token> <n>]`.
    #[serde(default = "default_marker_token")]
    pub marker_token: String,

    /// Max characters searched past a marker line for its URL.
    #[serde(default = "default_max_lookahead")]
    pub max_lookahead_chars: usize,

    /// Produce `cleaned_text` with directive spans removed.
    #[serde(default = "default_strip_directives")]
    pub strip_directives: bool,
}

fn default_known_categories() -> BTreeSet<String> {
    ["figure", "chart"].iter().map(|s| s.to_string()).collect()
}

fn default_fallback_category() -> String {
    "figure".to_string()
}

fn default_marker_token() -> String {
    DEFAULT_MARKER_TOKEN.to_string()
}

fn default_max_lookahead() -> usize {
    DEFAULT_MAX_LOOKAHEAD_CHARS
}

fn default_strip_directives() -> bool {
    true
}

impl ExtractorConfig {
    /// Create a config for the given storage prefix with defaults for
    /// everything else.
    pub fn new(allowed_url_prefix: impl Into<String>) -> Self {
        Self {
            allowed_url_prefix: allowed_url_prefix.into(),
            known_categories: default_known_categories(),
            fallback_category: default_fallback_category(),
            marker_token: default_marker_token(),
            max_lookahead_chars: default_max_lookahead(),
            strip_directives: default_strip_directives(),
        }
    }

    /// Set the accepted category tokens.
    pub fn with_known_categories(
        mut self,
        categories: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.known_categories = categories.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Set the fallback category.
    pub fn with_fallback_category(mut self, category: impl Into<String>) -> Self {
        self.fallback_category = category.into();
        self
    }

    /// Set the marker token (localization).
    pub fn with_marker_token(mut self, token: impl Into<String>) -> Self {
        self.marker_token = token.into();
        self
    }

    /// Set the lookahead bound.
    pub fn with_max_lookahead_chars(mut self, chars: usize) -> Self {
        self.max_lookahead_chars = chars;
        self
    }

    /// Keep directive spans in the output text.
    pub fn keep_directives(mut self) -> Self {
        self.strip_directives = false;
        self
    }

    /// Validate the config. Called by `Extractor::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_url_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        let parsed = Url::parse(&self.allowed_url_prefix)?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::DisallowedScheme(other.to_string())),
        }
        if self.marker_token.trim().is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        Ok(())
    }
}
