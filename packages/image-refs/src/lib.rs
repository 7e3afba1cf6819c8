//! Image Reference Extraction Library
//!
//! Recovers the set of image URLs an LLM intended to cite in free-text
//! output, tolerating the malformed formatting models actually produce.
//!
//! The assistant is prompted to emit directives of the form
//!
//! ```text
//! [이미지 1]
//! https://cdn.example.com/images/photo.jpg
//! ```
//!
//! but real output varies: URL on the same line, a stray `@` prefix, a
//! trailing `?`, doubled path slashes, or a bare filename with no URL at
//! all. This crate runs a fixed sequence of pattern passes from highest
//! to lowest precision, normalizes every captured URL once, rejects
//! anything outside the configured storage prefix, and deduplicates by
//! normalized URL keeping the highest confidence seen.
//!
//! # Usage
//!
//! ```rust
//! use image_refs::{Extractor, ExtractorConfig};
//!
//! let config = ExtractorConfig::new("https://cdn.example.com/images/");
//! let extractor = Extractor::new(config).unwrap();
//!
//! let outcome = extractor.extract(
//!     "설정 방법입니다.\n[이미지 1]\nhttps://cdn.example.com/images/photo.jpg",
//! );
//! assert_eq!(outcome.references.len(), 1);
//! assert_eq!(outcome.references[0].label, "1");
//! ```
//!
//! Extraction is a pure text transform: no I/O, no failure mode other
//! than an empty reference list. For text still arriving from a stream,
//! [`Extractor::extract_prefix`] holds back any token flush with the
//! buffer end (it may be cut mid-URL), so repeated calls on growing
//! prefixes may under-report references but never invent ones a later
//! call would contradict. Use [`Extractor::extract`] on complete text.
//!
//! # Modules
//!
//! - [`config`] - Extractor configuration and validation
//! - [`types`] - Reference and outcome types
//! - [`normalize`] - URL repair rules
//! - [`extract`] - The pattern passes
//! - [`suggest`] - Keyword-based image suggestions (fallback tier)

pub mod config;
pub mod extract;
pub mod normalize;
pub mod suggest;
pub mod types;

pub use config::{ConfigError, ExtractorConfig};
pub use extract::Extractor;
pub use normalize::{dedup_key, normalize_url};
pub use suggest::{KeywordRule, SuggestionConfig, SuggestionEngine};
pub use types::{AssetName, ExtractionOutcome, ImageReference};
