//! URL detection across the different shapes a message can carry a link in.
//!
//! Each strategy is a pure function from a message to positioned candidates.
//! Results are unioned, ordered by where they first appear in the text and
//! deduplicated on the normalised URL string.

use std::collections::HashSet;

use tracing::debug;
use url::Url;

use crate::platform::{ChannelMessage, EntityKind};

/// Characters that end a URL candidate inside a token.
const STOP_CHARS: &[char] = &[
    '<', '>', '(', ')', '[', ']', '{', '}', '"', '\'', '`', '、', '。', '」', '』', '】', '］',
];

/// Trailing punctuation stripped from a candidate.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '、', '。', '」', '』', '】', '］', '>', ')'];

/// Suffixes accepted for scheme-less domains.
const KNOWN_TLDS: &[&str] = &[
    "com", "net", "org", "io", "dev", "app", "co", "me", "info", "biz", "xyz", "ai", "gg", "tv",
    "ly", "to", "fm", "gl", "jp", "uk", "de", "fr", "us", "ca", "au", "cn", "kr", "ru", "br",
    "es", "it", "nl", "eu", "ch", "se", "no", "fi", "pl", "cz", "tw", "hk", "sg",
];

/// Position given to candidates that do not come from the message text.
const OUTSIDE_TEXT: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    position: usize,
    url: String,
}

type Strategy = fn(&ChannelMessage) -> Vec<Candidate>;

/// Strategy order matters only for ties: candidates outside the text keep this order.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("text", text_urls),
    ("entities", entity_urls),
    ("buttons", button_urls),
    ("preview", preview_urls),
    ("bare_domain", bare_domain_urls),
];

/// A message that carries at least one URL.
#[derive(Debug, Clone)]
pub struct UrlMatch<'a> {
    pub message: &'a ChannelMessage,
    /// Normalised URLs, non-empty, in order of first occurrence
    pub urls: Vec<String>,
}

impl UrlMatch<'_> {
    pub fn id(&self) -> i64 {
        self.message.id
    }
}

/// All URLs found in `message`, deduplicated. Empty when there are none.
pub fn extract(message: &ChannelMessage) -> Vec<String> {
    let mut candidates = Vec::new();
    for (name, strategy) in STRATEGIES {
        let found = strategy(message);
        if !found.is_empty() {
            debug!(
                message_id = message.id,
                strategy = name,
                count = found.len(),
                "url strategy fired"
            );
        }
        candidates.extend(found);
    }

    // Stable: equal positions keep strategy order.
    candidates.sort_by_key(|c| c.position);

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .map(|c| c.url)
        .collect()
}

/// Wrap `message` into a match if it carries any URL.
pub fn find_match(message: &ChannelMessage) -> Option<UrlMatch<'_>> {
    let urls = extract(message);
    if urls.is_empty() {
        None
    } else {
        Some(UrlMatch { message, urls })
    }
}

/// Canonical form of a raw URL string, or `None` if it is not an http(s) URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches(TRAILING_PUNCTUATION);
    if trimmed.is_empty() {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme).ok()?;
    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    let host = url.host_str()?;
    if !host.contains('.') && host != "localhost" {
        return None;
    }
    Some(url.to_string())
}

/// Whitespace-separated tokens of `text` with their byte offsets.
fn tokens(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push((s, &text[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &text[s..]));
    }
    out
}

/// Strategy 1: explicit `http(s)://` URLs in the raw text.
fn text_urls(message: &ChannelMessage) -> Vec<Candidate> {
    let mut found = Vec::new();
    for (offset, token) in tokens(&message.text) {
        let lower = token.to_ascii_lowercase();
        let mut from = 0;
        while let Some(rel) = lower[from..].find("http") {
            let start = from + rel;
            let rest = &token[start..];
            let lower_rest = &lower[start..];
            if !(lower_rest.starts_with("http://") || lower_rest.starts_with("https://")) {
                from = start + 4;
                continue;
            }
            let end = rest.find(STOP_CHARS).unwrap_or(rest.len());
            if let Some(url) = normalize_url(&rest[..end]) {
                found.push(Candidate {
                    position: offset + start,
                    url,
                });
            }
            from = start + end.max(4);
            if from >= token.len() {
                break;
            }
        }
    }
    found
}

/// Strategy 2: platform link annotations, independent of the literal text.
fn entity_urls(message: &ChannelMessage) -> Vec<Candidate> {
    let mut found = Vec::new();
    for entity in &message.entities {
        let range = utf16_range_to_bytes(&message.text, entity.offset, entity.length);
        let position = range.map(|(start, _)| start).unwrap_or(OUTSIDE_TEXT);

        let raw = match &entity.kind {
            EntityKind::TextUrl { url } => url.as_str(),
            EntityKind::Url => match range {
                Some((start, end)) => &message.text[start..end],
                None => {
                    debug!(
                        message_id = message.id,
                        offset = entity.offset,
                        length = entity.length,
                        "url entity outside message text"
                    );
                    continue;
                }
            },
            EntityKind::Other => continue,
        };

        if let Some(url) = normalize_url(raw) {
            found.push(Candidate { position, url });
        }
    }
    found
}

/// Inline keyboard buttons that open a link.
fn button_urls(message: &ChannelMessage) -> Vec<Candidate> {
    message
        .buttons
        .iter()
        .filter_map(|button| normalize_url(&button.url))
        .map(|url| Candidate {
            position: OUTSIDE_TEXT,
            url,
        })
        .collect()
}

/// Strategy 3: canonical link of an attached preview.
fn preview_urls(message: &ChannelMessage) -> Vec<Candidate> {
    message
        .preview
        .as_ref()
        .and_then(|p| p.url.as_deref())
        .and_then(normalize_url)
        .map(|url| Candidate {
            position: OUTSIDE_TEXT,
            url,
        })
        .into_iter()
        .collect()
}

/// Strategy 4: scheme-less `domain.tld/...` tokens with a known suffix.
fn bare_domain_urls(message: &ChannelMessage) -> Vec<Candidate> {
    let mut found = Vec::new();
    for (offset, token) in tokens(&message.text) {
        if token.contains("://") || token.contains('@') {
            continue;
        }
        let skipped = token.len() - token.trim_start_matches(|c: char| !c.is_ascii_alphanumeric()).len();
        let rest = &token[skipped..];
        let end = rest.find(STOP_CHARS).unwrap_or(rest.len());
        let candidate = rest[..end].trim_end_matches(TRAILING_PUNCTUATION);

        if !looks_like_domain(candidate) {
            continue;
        }
        if let Some(url) = normalize_url(candidate) {
            found.push(Candidate {
                position: offset + skipped,
                url,
            });
        }
    }
    found
}

fn looks_like_domain(candidate: &str) -> bool {
    let host_end = candidate.find(['/', '?', '#']).unwrap_or(candidate.len());
    let host_port = &candidate[..host_end];
    let host = match host_port.split_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return false;
            }
            host
        }
        None => host_port,
    };

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|l| valid_label(l)) {
        return false;
    }

    let lower = host.to_ascii_lowercase();
    if lower.starts_with("www.") {
        return true;
    }
    labels
        .last()
        .map(|tld| KNOWN_TLDS.contains(&tld.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Convert a UTF-16 `(offset, length)` span into a byte range of `text`.
fn utf16_range_to_bytes(text: &str, offset: usize, length: usize) -> Option<(usize, usize)> {
    let end_units = offset.checked_add(length)?;
    let mut units = 0;
    let mut start = None;

    for (byte_idx, ch) in text.char_indices() {
        if units == offset {
            start = Some(byte_idx);
        }
        if units == end_units {
            return start.map(|s| (s, byte_idx));
        }
        units += ch.len_utf16();
    }

    if units == offset && start.is_none() {
        start = Some(text.len());
    }
    if units == end_units {
        return start.map(|s| (s, text.len()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{LinkButton, LinkPreview, MessageEntity};
    use chrono::Utc;

    fn msg(text: &str) -> ChannelMessage {
        ChannelMessage::plain(1, "ann", text, Utc::now())
    }

    #[test]
    fn test_file_names_are_not_domains() {
        let urls = extract(&msg("run install.sh first, then load lib.so and config.in"));
        assert!(urls.is_empty());
    }

    #[test]
    fn test_token_offsets_are_byte_offsets() {
        assert_eq!(
            tokens("é ab  cd"),
            vec![(0, "é"), (3, "ab"), (7, "cd")]
        );
        assert_eq!(tokens("  lead\ttrail\n"), vec![(2, "lead"), (7, "trail")]);
        assert!(tokens(" \u{3000} ").is_empty());
    }

    #[test]
    fn test_plain_text_url() {
        let urls = extract(&msg("check https://ex.com/a out"));
        assert_eq!(urls, vec!["https://ex.com/a"]);
    }

    #[test]
    fn test_no_urls_anywhere() {
        let m = msg("nothing to see here, e.g. file.txt or node.js v1.2.3");
        assert!(extract(&m).is_empty());
        assert!(find_match(&m).is_none());
    }

    #[test]
    fn test_trailing_punctuation_and_brackets() {
        let urls = extract(&msg("see (https://ex.com/a), and https://ex.com/b."));
        assert_eq!(urls, vec!["https://ex.com/a", "https://ex.com/b"]);
    }

    #[test]
    fn test_cjk_text_without_spaces() {
        let urls = extract(&msg("記事はこちらhttps://ex.com/jp。よろしく"));
        assert_eq!(urls, vec!["https://ex.com/jp"]);
    }

    #[test]
    fn test_markdown_link_target() {
        let urls = extract(&msg("[docs](https://docs.rs/url)"));
        assert_eq!(urls, vec!["https://docs.rs/url"]);
    }

    #[test]
    fn test_non_http_schemes_ignored() {
        assert!(extract(&msg("ftp://ex.com/file mailto:me@ex.com")).is_empty());
    }

    #[test]
    fn test_hidden_entity_url_without_literal_text() {
        let mut m = msg("read this");
        m.entities.push(MessageEntity {
            kind: EntityKind::TextUrl {
                url: "https://hidden.example.org/post".to_string(),
            },
            offset: 0,
            length: 4,
        });
        assert_eq!(extract(&m), vec!["https://hidden.example.org/post"]);
    }

    #[test]
    fn test_url_entity_uses_utf16_offsets() {
        // "😀" is two UTF-16 units
        let mut m = msg("😀 ex.com/x");
        m.entities.push(MessageEntity {
            kind: EntityKind::Url,
            offset: 3,
            length: 8,
        });
        assert_eq!(extract(&m), vec!["https://ex.com/x"]);
    }

    #[test]
    fn test_entity_out_of_range_is_skipped() {
        let mut m = msg("short");
        m.entities.push(MessageEntity {
            kind: EntityKind::Url,
            offset: 10,
            length: 4,
        });
        assert!(extract(&m).is_empty());
    }

    #[test]
    fn test_preview_only() {
        let mut m = msg("look at this");
        m.preview = Some(LinkPreview {
            url: Some("https://news.example.com/story".to_string()),
            title: Some("Story".to_string()),
        });
        assert_eq!(extract(&m), vec!["https://news.example.com/story"]);
    }

    #[test]
    fn test_button_urls() {
        let mut m = msg("tap below");
        m.buttons.push(LinkButton {
            text: "Open".to_string(),
            url: "https://shop.example.com/item".to_string(),
        });
        assert_eq!(extract(&m), vec!["https://shop.example.com/item"]);
    }

    #[test]
    fn test_bare_domain_with_known_tld() {
        let urls = extract(&msg("try example.com/path or www.rust-lang.org"));
        assert_eq!(
            urls,
            vec!["https://example.com/path", "https://www.rust-lang.org/"]
        );
    }

    #[test]
    fn test_bare_domain_rejects_emails_and_unknown_suffixes() {
        assert!(extract(&msg("mail me@example.com or hello.world")).is_empty());
    }

    #[test]
    fn test_dedup_across_strategies_keeps_text_order() {
        let mut m = msg("first example.com/a then https://ex.com/b");
        m.preview = Some(LinkPreview {
            url: Some("https://ex.com/b".to_string()),
            title: None,
        });
        m.entities.push(MessageEntity {
            kind: EntityKind::Url,
            offset: 25,
            length: 16,
        });
        assert_eq!(
            extract(&m),
            vec!["https://example.com/a", "https://ex.com/b"]
        );
    }

    #[test]
    fn test_find_match_reports_message_id() {
        let m = ChannelMessage::plain(100, "ann", "check https://ex.com/a out", Utc::now());
        let found = find_match(&m).unwrap();
        assert_eq!(found.id(), 100);
        assert_eq!(found.urls, vec!["https://ex.com/a"]);
    }

    #[test]
    fn test_normalize_url_www_prefix() {
        assert_eq!(
            normalize_url("www.example.com/a"),
            Some("https://www.example.com/a".to_string())
        );
        assert_eq!(normalize_url("  "), None);
        assert_eq!(normalize_url("https://nodot"), None);
    }

    #[test]
    fn test_utf16_range_to_bytes() {
        assert_eq!(utf16_range_to_bytes("abc", 1, 2), Some((1, 3)));
        assert_eq!(utf16_range_to_bytes("😀a", 2, 1), Some((4, 5)));
        assert_eq!(utf16_range_to_bytes("abc", 3, 0), Some((3, 3)));
        assert_eq!(utf16_range_to_bytes("abc", 2, 5), None);
    }
}
