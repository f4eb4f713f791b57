use crate::types::Item;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::{debug, info};
use url::Url;

const PLACEHOLDER_MARK: &str = "#item-";
const DIGEST_BYTES: usize = 16;

/// Canonical form of a link: scheme and host lowercased, trailing slashes trimmed.
/// Returns `None` for empty links.
pub fn normalize_link(link: &str) -> Option<String> {
    let trimmed = link.trim();
    if trimmed.is_empty() {
        return None;
    }

    let canonical = match Url::parse(trimmed) {
        Ok(url) => url.to_string(),
        Err(_) => trimmed.to_string(),
    };

    let mut s = canonical;
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    Some(s)
}

/// Removes a trailing `[!]`, `[*]` or `[~]` marker (inner spaces allowed).
pub fn strip_priority_marker(title: &str) -> &str {
    let trimmed = title.trim_end();
    if !trimmed.ends_with(']') {
        return trimmed;
    }
    let Some(open) = trimmed.rfind('[') else {
        return trimmed;
    };
    let inner: String = trimmed[open + 1..trimmed.len() - 1]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if matches!(inner.as_str(), "!" | "*" | "~") {
        trimmed[..open].trim_end()
    } else {
        trimmed
    }
}

fn normalized_title(title: &str) -> String {
    strip_priority_marker(title)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic digest over the normalized title and the owning target key.
pub fn content_digest(title: &str, source_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_title(title).as_bytes());
    hasher.update(b"|");
    hasher.update(source_key.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(DIGEST_BYTES * 2);
    for b in digest.iter().take(DIGEST_BYTES) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Stable stand-in link for records without one.
pub fn placeholder_link(base: &str, title: &str, source_key: &str) -> String {
    let base = base.split('#').next().unwrap_or(base).trim();
    format!("{}{}{}", base, PLACEHOLDER_MARK, content_digest(title, source_key))
}

pub fn is_placeholder_link(link: &str) -> bool {
    match link.rfind(PLACEHOLDER_MARK) {
        Some(pos) => {
            let tail = &link[pos + PLACEHOLDER_MARK.len()..];
            tail.len() == DIGEST_BYTES * 2 && tail.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Identity key of an item: the normalized link when a real one exists, otherwise
/// the content digest.
pub fn identity(link: Option<&str>, title: &str, source_key: &str) -> String {
    link.filter(|l| !is_placeholder_link(l))
        .and_then(normalize_link)
        .unwrap_or_else(|| content_digest(title, source_key))
}

/// Tracks identities seen so far in one batch or collection.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashSet<String>,
    duplicates: usize,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        let mut index = Self::new();
        for item in items {
            index.seen.insert(item.id.clone());
        }
        index
    }

    /// Returns true the first time an id is offered.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.insert(id.to_string()) {
            true
        } else {
            self.duplicates += 1;
            false
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// Collapses items sharing an id. The first observation wins outright.
pub fn deduplicate(items: Vec<Item>) -> Vec<Item> {
    let total = items.len();
    let mut index = DedupIndex::new();
    let unique: Vec<Item> = items
        .into_iter()
        .filter(|item| {
            let fresh = index.insert(&item.id);
            if !fresh {
                debug!("Removing duplicate item: {} ({})", item.title, item.id);
            }
            fresh
        })
        .collect();

    if index.duplicates() > 0 {
        info!("Removed {} duplicate items out of {}", index.duplicates(), total);
    }
    unique
}
