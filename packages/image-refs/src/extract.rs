//! The pattern passes.
//!
//! Ordered highest-precision first; every pass runs to exhaustion and
//! newly found URLs join the result only if no earlier pass already
//! recorded the same normalized URL. When two passes hit the same URL
//! the stored reference keeps its first-seen position and label but
//! takes the higher confidence.

use std::ops::Range;

use indexmap::map::Entry;
use indexmap::IndexMap;
use regex::Regex;

use crate::config::{ConfigError, ExtractorConfig};
use crate::normalize::{dedup_key, normalize_url, parse_asset_name};
use crate::types::{ExtractionOutcome, ImageReference};

/// Marker with its URL on a following line within the lookahead bound.
const CONF_DIRECTIVE: f32 = 0.9;
/// Marker and URL on one line, or a URL carrying a stray `@` prefix.
const CONF_LOOSE_DIRECTIVE: f32 = 0.8;
/// Asset filename with no accompanying URL; the URL is inferred.
const CONF_FILENAME: f32 = 0.6;
/// Bare allow-listed URL with no marker at all.
const CONF_BARE_URL: f32 = 0.5;

/// Best-effort recognizer for image citations in LLM output.
///
/// Construction compiles the pattern set once and validates the
/// config; extraction itself is infallible and side-effect free.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
    next_line: Regex,
    same_line: Regex,
    bare_url: Regex,
    filename: Regex,
}

impl Extractor {
    /// Compile the pattern passes for the given config.
    ///
    /// Fails fast on invalid configuration; silently matching every
    /// URL would be the worse failure mode.
    pub fn new(config: ExtractorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let marker = regex::escape(&config.marker_token);
        let lookahead = config.max_lookahead_chars;

        // Marker line, newline, then up to `lookahead` chars of
        // intervening text before the URL. Lazy gap so the nearest URL
        // wins; the optional `@` capture downgrades confidence.
        let next_line = Regex::new(&format!(
            r"(?s)\[{marker}\s*([0-9]+)\][^\n]*\n.{{0,{lookahead}}}?(@?)(https?://[^\s\n]+)"
        ))?;

        let same_line = Regex::new(&format!(
            r"\[{marker}\s*([0-9]+)\][^\S\n]+[^\n]*?(@?)(https?://[^\s\n]+)"
        ))?;

        let bare_url = Regex::new(&slash_tolerant_prefix_pattern(&config.allowed_url_prefix))?;

        let filename = Regex::new(
            r"\b[a-z0-9]+(?:_[a-z0-9]+)*_p[0-9]+_[a-z]+_[0-9a-fA-F]{4,}\.(?:jpe?g|png|gif|webp)\b",
        )?;

        Ok(Self {
            config,
            next_line,
            same_line,
            bare_url,
            filename,
        })
    }

    /// The config this extractor was built from.
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract image references from complete assistant output text.
    ///
    /// Never fails: text with no recognizable citation yields an empty
    /// reference list, which is an ordinary outcome, not an error.
    /// Idempotent: the same text and config always produce the same
    /// outcome.
    pub fn extract(&self, text: &str) -> ExtractionOutcome {
        self.run(text, false)
    }

    /// Extract from a growing stream buffer.
    ///
    /// Identical to [`extract`](Self::extract) except that a token
    /// ending flush with the buffer may be a URL or filename cut mid
    /// stream, so it is dropped; a later call on the longer buffer
    /// reports it once it is terminated. Guarantees that no reference
    /// reported here carries a URL the complete text would contradict.
    pub fn extract_prefix(&self, text: &str) -> ExtractionOutcome {
        self.run(text, true)
    }

    fn run(&self, text: &str, partial: bool) -> ExtractionOutcome {
        let mut refs: IndexMap<String, ImageReference> = IndexMap::new();
        let mut spans: Vec<Range<usize>> = Vec::new();
        let open_ended = |end: usize| partial && end == text.len();

        // Pass 1 + 3: marker with the URL on a later line.
        for caps in self.next_line.captures_iter(text) {
            let Some(url_match) = caps.get(3) else { continue };
            if open_ended(url_match.end()) {
                continue;
            }
            let confidence = if caps[2].is_empty() {
                CONF_DIRECTIVE
            } else {
                CONF_LOOSE_DIRECTIVE
            };
            if let Some(url) = normalize_url(url_match.as_str(), &self.config) {
                record(&mut refs, url, caps[1].to_string(), confidence);
                if let Some(m) = caps.get(0) {
                    spans.push(m.range());
                }
            }
        }

        // Pass 2: marker and URL on one line.
        for caps in self.same_line.captures_iter(text) {
            let Some(url_match) = caps.get(3) else { continue };
            if open_ended(url_match.end()) {
                continue;
            }
            if let Some(url) = normalize_url(url_match.as_str(), &self.config) {
                record(&mut refs, url, caps[1].to_string(), CONF_LOOSE_DIRECTIVE);
                if let Some(m) = caps.get(0) {
                    spans.push(m.range());
                }
            }
        }

        // Pass 4: bare allow-listed URLs. Labels number only the URLs
        // this pass introduces; duplicates of earlier passes keep their
        // existing label.
        let mut sequence = 0usize;
        for found in self.bare_url.find_iter(text) {
            if open_ended(found.end()) {
                continue;
            }
            if let Some(url) = normalize_url(found.as_str(), &self.config) {
                let label = if refs.contains_key(dedup_key(&url)) {
                    String::new()
                } else {
                    sequence += 1;
                    sequence.to_string()
                };
                record(&mut refs, url, label, CONF_BARE_URL);
            }
        }

        // Pass 5: asset filename with no URL around it; infer the URL
        // from the configured storage prefix.
        let base = self.config.allowed_url_prefix.trim_end_matches('/');
        for found in self.filename.find_iter(text) {
            if open_ended(found.end()) {
                continue;
            }
            if is_inside_path(text, found.start()) {
                continue;
            }
            let Some(name) = parse_asset_name(found.as_str()) else {
                continue;
            };
            let candidate = format!("{}/{}", base, found.as_str());
            if let Some(url) = normalize_url(&candidate, &self.config) {
                record(&mut refs, url, name.page, CONF_FILENAME);
            }
        }

        tracing::debug!(
            references = refs.len(),
            directive_spans = spans.len(),
            "image reference extraction finished"
        );

        let cleaned_text = if self.config.strip_directives {
            Some(remove_spans(text, spans))
        } else {
            None
        };

        ExtractionOutcome {
            references: refs.into_values().collect(),
            cleaned_text,
        }
    }
}

/// Insert or upgrade a reference, keyed by normalized URL without its
/// query string. First-seen position and label win; confidence takes
/// the maximum observed.
fn record(refs: &mut IndexMap<String, ImageReference>, url: String, label: String, confidence: f32) {
    let key = dedup_key(&url).to_string();
    match refs.entry(key) {
        Entry::Occupied(mut entry) => {
            if confidence > entry.get().confidence {
                entry.get_mut().confidence = confidence;
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(ImageReference::new(url, label, confidence));
        }
    }
}

/// A filename preceded by `/` or `:` is part of a URL or path and is
/// covered by the URL passes.
fn is_inside_path(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| c == '/' || c == ':')
}

/// Build a bare-URL pattern from the allow-listed prefix that tolerates
/// doubled slashes in the path (they are collapsed during
/// normalization, so the raw text may still carry them).
fn slash_tolerant_prefix_pattern(prefix: &str) -> String {
    let (scheme, rest) = match prefix.find("://") {
        Some(idx) => prefix.split_at(idx + 3),
        None => ("", prefix),
    };
    let segments: Vec<String> = rest
        .trim_end_matches('/')
        .split('/')
        .map(regex::escape)
        .collect();
    format!("{}{}/+[^\\s\\n]+", regex::escape(scheme), segments.join("/+"))
}

/// Remove matched directive spans and collapse the blank lines left
/// behind. Returns the input unchanged when nothing matched.
fn remove_spans(text: &str, mut spans: Vec<Range<usize>>) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    spans.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in merged {
        out.push_str(&text[cursor..span.start]);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);

    collapse_blank_lines(&out)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(ch);
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;

    fn extractor() -> Extractor {
        Extractor::new(ExtractorConfig::new("https://cdn.example.com/images/")).unwrap()
    }

    #[test]
    fn directive_on_next_line() {
        let outcome = extractor().extract(
            "내용 설명\n[이미지 1]\nhttps://cdn.example.com/images/photo.jpg\n더 설명",
        );
        assert_eq!(outcome.references.len(), 1);
        let reference = &outcome.references[0];
        assert_eq!(reference.url, "https://cdn.example.com/images/photo.jpg");
        assert_eq!(reference.label, "1");
        assert_eq!(reference.confidence, 0.9);
    }

    #[test]
    fn directive_with_intervening_text() {
        let outcome = extractor().extract(
            "[이미지 2]\n아래 그림을 참고하세요.\nhttps://cdn.example.com/images/a.jpg",
        );
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].label, "2");
        assert_eq!(outcome.references[0].confidence, 0.9);
    }

    #[test]
    fn lookahead_is_bounded() {
        let filler = "가".repeat(800);
        let text = format!("[이미지 1]\n{}\nhttps://cdn.example.com/images/a.jpg", filler);
        let outcome = extractor().extract(&text);
        // Marker match fails past the bound, but the bare-URL pass
        // still finds the allow-listed URL at low confidence.
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].confidence, 0.5);
    }

    #[test]
    fn same_line_directive() {
        let outcome =
            extractor().extract("[이미지 3] https://cdn.example.com/images/b.jpg 입니다");
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].label, "3");
        assert_eq!(outcome.references[0].confidence, 0.8);
    }

    #[test]
    fn at_prefixed_url() {
        let outcome = extractor().extract("[이미지 2]\n@https://cdn.example.com/images/chart.jpg?");
        assert_eq!(outcome.references.len(), 1);
        let reference = &outcome.references[0];
        assert_eq!(reference.url, "https://cdn.example.com/images/chart.jpg");
        assert_eq!(reference.label, "2");
        assert_eq!(reference.confidence, 0.8);
    }

    #[test]
    fn bare_urls_get_sequential_labels() {
        let outcome = extractor().extract(
            "참고: https://cdn.example.com/images/a.jpg 그리고 https://cdn.example.com/images/b.jpg",
        );
        assert_eq!(outcome.references.len(), 2);
        assert_eq!(outcome.references[0].label, "1");
        assert_eq!(outcome.references[1].label, "2");
        assert!(outcome
            .references
            .iter()
            .all(|r| r.confidence == CONF_BARE_URL));
    }

    #[test]
    fn bare_url_tolerates_doubled_slashes() {
        let outcome = extractor().extract("https://cdn.example.com//images//photo.jpg");
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(
            outcome.references[0].url,
            "https://cdn.example.com/images/photo.jpg"
        );
    }

    #[test]
    fn filename_reconstruction() {
        let outcome =
            extractor().extract("매뉴얼의 product_chart_p12_mid_abc123.jpg 그림을 보세요.");
        assert_eq!(outcome.references.len(), 1);
        let reference = &outcome.references[0];
        assert_eq!(
            reference.url,
            "https://cdn.example.com/images/product_chart_p12_mid_abc123.jpg"
        );
        assert_eq!(reference.label, "12");
        assert_eq!(reference.confidence, 0.6);
    }

    #[test]
    fn filename_inside_url_not_double_counted() {
        let outcome = extractor()
            .extract("[이미지 1]\nhttps://cdn.example.com/images/galaxy_s25_chart_p43_mid_0fb137a8.jpg");
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].confidence, 0.9);
        assert_eq!(outcome.references[0].label, "1");
    }

    #[test]
    fn rejects_directive_outside_prefix() {
        let outcome =
            extractor().extract("[이미지 1]\nhttps://evil.example.com/images/x.jpg");
        assert!(outcome.references.is_empty());
    }

    #[test]
    fn plain_prose_untouched() {
        let text = "The battery lasts 20 hours.";
        let outcome = extractor().extract(text);
        assert!(outcome.references.is_empty());
        assert_eq!(outcome.cleaned_text.as_deref(), Some(text));
    }

    #[test]
    fn higher_confidence_wins_on_duplicate() {
        // Same URL reachable via directive (0.9) and bare pass (0.5).
        let outcome = extractor().extract(
            "[이미지 1]\nhttps://cdn.example.com/images/a.jpg\n추가로 https://cdn.example.com/images/a.jpg",
        );
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].confidence, 0.9);
    }

    #[test]
    fn cache_busting_query_does_not_defeat_dedup() {
        let outcome = extractor().extract(
            "https://cdn.example.com/images/a.jpg 그리고 https://cdn.example.com/images/a.jpg?t=999",
        );
        assert_eq!(outcome.references.len(), 1);
    }

    #[test]
    fn cleaned_text_drops_directive_spans() {
        let outcome = extractor().extract(
            "설명입니다.\n[이미지 1]\nhttps://cdn.example.com/images/a.jpg\n끝.",
        );
        let cleaned = outcome.cleaned_text.unwrap();
        assert!(!cleaned.contains("[이미지"));
        assert!(!cleaned.contains("https://"));
        assert!(cleaned.contains("설명입니다."));
        assert!(cleaned.contains("끝."));
    }

    #[test]
    fn keep_directives_config_skips_cleaning() {
        let config =
            ExtractorConfig::new("https://cdn.example.com/images/").keep_directives();
        let extractor = Extractor::new(config).unwrap();
        let outcome =
            extractor.extract("[이미지 1]\nhttps://cdn.example.com/images/a.jpg");
        assert_eq!(outcome.references.len(), 1);
        assert!(outcome.cleaned_text.is_none());
    }

    #[test]
    fn partial_buffer_under_reports_without_contradiction() {
        let full = "[이미지 1]\nhttps://cdn.example.com/images/photo.jpg\n끝.";
        let extractor = extractor();
        let complete = extractor.extract(full);
        assert_eq!(complete.references.len(), 1);
        // A prefix cut anywhere, including mid-URL, may yield nothing,
        // but every URL it does yield must be one the complete text
        // also produces, byte for byte.
        for cut in 0..=full.len() {
            if !full.is_char_boundary(cut) {
                continue;
            }
            let outcome = extractor.extract_prefix(&full[..cut]);
            for reference in &outcome.references {
                assert!(
                    complete.references.iter().any(|r| r.url == reference.url),
                    "prefix cut at {cut} reported {}",
                    reference.url
                );
            }
        }
    }

    #[test]
    fn prefix_extraction_reports_terminated_urls() {
        let extractor = extractor();
        // Flush with the buffer end: could still be growing, so the
        // prefix call holds it back while the complete call reports it.
        let flush = "[이미지 1]\nhttps://cdn.example.com/images/photo.jpg";
        assert!(extractor.extract_prefix(flush).references.is_empty());
        assert_eq!(extractor.extract(flush).references.len(), 1);
        // A newline terminates the token; both calls now agree.
        let terminated = "[이미지 1]\nhttps://cdn.example.com/images/photo.jpg\n";
        assert_eq!(extractor.extract_prefix(terminated).references.len(), 1);
    }

    #[test]
    fn bare_sequence_numbers_only_new_urls() {
        // a.jpg is already held by the directive pass; the first URL
        // the bare pass actually introduces is b.jpg, labelled "1".
        let outcome = extractor().extract(
            "[이미지 1]\nhttps://cdn.example.com/images/a.jpg\n추가로 https://cdn.example.com/images/a.jpg 그리고 https://cdn.example.com/images/b.jpg 참고.",
        );
        assert_eq!(outcome.references.len(), 2);
        let b = outcome
            .references
            .iter()
            .find(|r| r.url.ends_with("/b.jpg"))
            .unwrap();
        assert_eq!(b.label, "1");
        assert_eq!(b.confidence, CONF_BARE_URL);
    }

    #[test]
    fn custom_marker_token() {
        let config = ExtractorConfig::new("https://cdn.example.com/images/")
            .with_marker_token("image");
        let extractor = Extractor::new(config).unwrap();
        let outcome = extractor.extract("[image 4]\nhttps://cdn.example.com/images/c.jpg");
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].label, "4");
    }
}
