//! Reference and outcome types.

use serde::{Deserialize, Serialize};

/// One recognized image citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Absolute HTTP(S) URL, normalized.
    pub url: String,

    /// Position/number as given by the source text (e.g. "1", "2").
    ///
    /// Not guaranteed unique or numeric; a bare-URL match gets a
    /// sequential label, a filename match gets its page number.
    pub label: String,

    /// How directly the match came from a well-formed directive.
    ///
    /// 0.9 for a marker with the URL on the following line, down to
    /// 0.5 for a bare allow-listed URL. Used only for dedup
    /// tie-breaking, never for filtering.
    pub confidence: f32,
}

impl ImageReference {
    pub fn new(url: impl Into<String>, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            confidence,
        }
    }
}

/// The extractor's output.
///
/// `references` preserves first-seen order across the pattern passes.
/// No two entries share the same normalized URL (query strings are
/// ignored for that comparison).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub references: Vec<ImageReference>,

    /// Original text with recognized directive spans removed, when the
    /// extractor is configured to strip them. `None` otherwise.
    pub cleaned_text: Option<String>,
}

impl ExtractionOutcome {
    /// Outcome with no references and no cleaning applied.
    pub fn empty() -> Self {
        Self {
            references: Vec::new(),
            cleaned_text: None,
        }
    }
}

/// Parsed fields of an asset filename.
///
/// The storage bucket uses a fixed naming scheme:
/// `<product>_<category>_p<page>_<position>_<hash>.<ext>`, e.g.
/// `galaxy_s25_chart_p43_mid_0fb137a8.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetName {
    pub product: String,
    pub category: String,
    pub page: String,
    pub position: String,
    pub hash: String,
    pub extension: String,
}

impl AssetName {
    /// Reassemble the filename, e.g. after a category rewrite.
    pub fn filename(&self) -> String {
        format!(
            "{}_{}_p{}_{}_{}.{}",
            self.product, self.category, self.page, self.position, self.hash, self.extension
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_name_round_trips() {
        let name = AssetName {
            product: "galaxy_s25".to_string(),
            category: "chart".to_string(),
            page: "43".to_string(),
            position: "mid".to_string(),
            hash: "0fb137a8".to_string(),
            extension: "jpg".to_string(),
        };
        assert_eq!(name.filename(), "galaxy_s25_chart_p43_mid_0fb137a8.jpg");
    }
}
