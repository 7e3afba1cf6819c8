//! URL repair rules.
//!
//! Every captured URL goes through [`normalize_url`] exactly once
//! before dedup and storage. The rules mirror the malformations the
//! model is known to produce: a stray `@` prefix, a dangling `?`, a
//! closing parenthesis swallowed from surrounding prose, and doubled
//! path slashes.

use crate::config::ExtractorConfig;
use crate::types::AssetName;

/// Normalize a captured URL and check it against the allow-listed
/// prefix. Returns `None` for URLs outside the prefix, a relevance
/// filter, not an error.
pub fn normalize_url(raw: &str, config: &ExtractorConfig) -> Option<String> {
    let trimmed = raw.trim();
    let mut url = trimmed.strip_prefix('@').unwrap_or(trimmed).to_string();

    // Dangling '?' with no query content behind it.
    while url.ends_with('?') {
        url.pop();
    }

    // A single ')' picked up from parenthetical prose.
    if url.ends_with(')') {
        url.pop();
    }

    let collapsed = collapse_slashes(&url);

    let prefix = collapse_slashes(config.allowed_url_prefix.trim());
    if !collapsed.starts_with(&prefix) {
        tracing::debug!(url = %collapsed, "dropping URL outside allowed prefix");
        return None;
    }

    Some(rewrite_category(collapsed, config))
}

/// Key for duplicate detection: the normalized URL without its query
/// string, so cache-busting parameters don't defeat comparison.
pub fn dedup_key(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Collapse runs of `/` that are not part of the scheme separator.
///
/// `https://cdn.example.com//images//a.jpg` becomes
/// `https://cdn.example.com/images/a.jpg`; the `https://` is preserved.
pub fn collapse_slashes(url: &str) -> String {
    let (scheme, rest) = match url.find("://") {
        Some(idx) => url.split_at(idx + 3),
        None => ("", url),
    };

    let mut out = String::with_capacity(url.len());
    out.push_str(scheme);
    let mut prev_slash = false;
    for ch in rest.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Parse the bucket's fixed filename scheme:
/// `<product>_<category>_p<page>_<position>_<hash>.<ext>`.
///
/// The product portion may itself contain underscores; the category is
/// the single token directly before the `p<page>` segment.
pub fn parse_asset_name(filename: &str) -> Option<AssetName> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if !extension.chars().all(|c| c.is_ascii_alphanumeric()) || extension.is_empty() {
        return None;
    }

    let mut parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 5 {
        return None;
    }

    let hash = parts.pop()?;
    let position = parts.pop()?;
    let page_part = parts.pop()?;
    let category = parts.pop()?;
    let product = parts.join("_");

    let page = page_part.strip_prefix('p')?;
    if page.is_empty() || !page.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if product.is_empty()
        || category.is_empty()
        || position.is_empty()
        || hash.len() < 4
        || !hash.chars().all(|c| c.is_ascii_hexdigit())
        || !position.chars().all(|c| c.is_ascii_lowercase())
    {
        return None;
    }

    Some(AssetName {
        product,
        category: category.to_string(),
        page: page.to_string(),
        position: position.to_string(),
        hash: hash.to_string(),
        extension: extension.to_string(),
    })
}

/// Rewrite an unrecognized category segment in the URL's filename to
/// the configured fallback. URLs whose last segment does not follow
/// the asset naming scheme pass through unchanged.
fn rewrite_category(url: String, config: &ExtractorConfig) -> String {
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (url.as_str(), None),
    };

    let Some((dir, filename)) = path.rsplit_once('/') else {
        return url;
    };
    let Some(mut name) = parse_asset_name(filename) else {
        return url;
    };

    if config.known_categories.contains(&name.category) {
        return url;
    }

    tracing::debug!(
        category = %name.category,
        fallback = %config.fallback_category,
        "rewriting unknown asset category"
    );
    name.category = config.fallback_category.clone();

    let mut rewritten = format!("{}/{}", dir, name.filename());
    if let Some(q) = query {
        rewritten.push('?');
        rewritten.push_str(q);
    }
    rewritten
}
