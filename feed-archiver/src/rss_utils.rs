/// Text and URL helpers shared by the normalizer and the assembler

/// URL utilities for feed items and sources
pub mod url {
    use url::Url;

    /// Extract domain from URL
    pub fn extract_domain(url_str: &str) -> Option<String> {
        Url::parse(url_str.trim())
            .ok()
            .and_then(|url| url.domain().map(|d| d.to_ascii_lowercase()))
    }

    /// True when the link's domain is one of `domains` or a subdomain of one.
    pub fn is_excluded_domain(url_str: &str, domains: &[String]) -> bool {
        match extract_domain(url_str) {
            Some(domain) => domains
                .iter()
                .any(|d| domain == *d || domain.ends_with(&format!(".{}", d))),
            None => false,
        }
    }

    /// Resolve a possibly relative link against the document it came from.
    pub fn resolve_link(base: &str, link: &str) -> String {
        let link = link.trim();
        if Url::parse(link).is_ok() {
            return link.to_string();
        }
        Url::parse(base)
            .and_then(|base| base.join(link))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| link.to_string())
    }

    /// Validate upstream feed URL format
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
            Err(_) => false,
        }
    }
}

/// Text cleanup for titles and descriptions
pub mod text {
    /// Extract clean text content from HTML
    pub fn extract_text_from_html(html: &str) -> String {
        html.chars()
            .fold((String::new(), false), |(mut text, in_tag), c| match c {
                '<' => (text, true),
                '>' => {
                    if in_tag {
                        text.push(' ');
                    }
                    (text, false)
                }
                _ if !in_tag => {
                    text.push(c);
                    (text, in_tag)
                }
                _ => (text, in_tag),
            })
            .0
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Truncate text to at most `max_chars` characters, trying to break at sentence boundaries
    pub fn smart_truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }

        let cut = text
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        let truncated = &text[..cut];

        if let Some(last_sentence) = truncated.rfind(". ") {
            truncated[..last_sentence + 1].to_string()
        } else if let Some(last_space) = truncated.rfind(' ') {
            format!("{}...", truncated[..last_space].trim_end())
        } else {
            format!("{}...", truncated)
        }
    }

    /// Drops characters that are not allowed in XML 1.0 documents.
    pub fn strip_xml_invalid(text: &str) -> String {
        text.chars()
            .filter(|&c| matches!(c, '\t' | '\n' | '\r') || c >= '\u{20}')
            .filter(|&c| c != '\u{FFFE}' && c != '\u{FFFF}')
            .collect()
    }
}

/// Timestamps as they appear in scraped cells and RSS documents
pub mod time {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

    /// Parse a loosely formatted date. Calendar dates are taken as midnight UTC.
    pub fn parse_loose_date(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
            }
        }
        None
    }
}
