//! Rendering of one matched message plus its context into a single payload.

use std::collections::VecDeque;

use chrono::FixedOffset;
use tracing::warn;

use crate::context::ContextWindow;
use crate::extract::UrlMatch;
use crate::platform::{ChannelMessage, Markup};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const SEPARATOR_MARK: &str = "━━━";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";
const BEFORE_HEADER: &str = "📜 Before:";
const AFTER_HEADER: &str = "📝 After:";
const ELLIPSIS: char = '…';

/// Rendered payload for one anchor message.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub message_id: i64,
    pub text: String,
    /// Context lines removed to fit the payload limit
    pub dropped_lines: usize,
}

#[derive(Debug, Clone)]
pub struct DigestFormatter {
    offset: FixedOffset,
    context_text_max_chars: usize,
    max_chars: usize,
    markup: Markup,
}

impl DigestFormatter {
    pub fn new(
        offset: FixedOffset,
        context_text_max_chars: usize,
        max_chars: usize,
        markup: Markup,
    ) -> Self {
        Self {
            offset,
            context_text_max_chars,
            max_chars,
            markup,
        }
    }

    /// Render `url_match` with its window, trimming context from the outer
    /// edges (oldest before, then newest after, alternating) until it fits.
    pub fn render(&self, url_match: &UrlMatch<'_>, window: &ContextWindow) -> Digest {
        let mut before: VecDeque<String> =
            window.before.iter().map(|m| self.context_line(m)).collect();
        let mut after: VecDeque<String> =
            window.after.iter().map(|m| self.context_line(m)).collect();
        let anchor = url_match.message;
        let mut dropped_lines = 0;
        let mut drop_before_next = true;

        loop {
            let text = self.compose(&before, anchor, &anchor.text, &url_match.urls, &after);
            let length = text.chars().count();
            if length <= self.max_chars {
                return Digest {
                    message_id: anchor.id,
                    text,
                    dropped_lines,
                };
            }

            if before.is_empty() && after.is_empty() {
                let text = self.shorten_anchor(anchor, &url_match.urls, length);
                return Digest {
                    message_id: anchor.id,
                    text,
                    dropped_lines,
                };
            }

            if (drop_before_next && !before.is_empty()) || after.is_empty() {
                before.pop_front();
            } else {
                after.pop_back();
            }
            drop_before_next = !drop_before_next;
            dropped_lines += 1;
        }
    }

    /// Last resort once every context line is gone: cut the anchor's text,
    /// never its author or URLs.
    fn shorten_anchor(&self, anchor: &ChannelMessage, urls: &[String], length: usize) -> String {
        let overflow = length - self.max_chars;
        let anchor_chars = anchor.text.chars().count();
        let keep = anchor_chars.saturating_sub(overflow + 1);
        let mut shortened: String = anchor.text.chars().take(keep).collect();
        shortened.push(ELLIPSIS);

        let empty = VecDeque::new();
        let text = self.compose(&empty, anchor, &shortened, urls, &empty);
        if text.chars().count() > self.max_chars {
            warn!(
                message_id = anchor.id,
                limit = self.max_chars,
                "digest exceeds payload limit even without context"
            );
        }
        text
    }

    fn compose(
        &self,
        before: &VecDeque<String>,
        anchor: &ChannelMessage,
        anchor_text: &str,
        urls: &[String],
        after: &VecDeque<String>,
    ) -> String {
        let mut out = String::new();
        out.push_str(RULE);
        out.push('\n');

        self.push_block(&mut out, BEFORE_HEADER, before);

        let stamp = anchor
            .date
            .with_timezone(&self.offset)
            .format(TIMESTAMP_FORMAT);
        match self.markup {
            Markup::Markdown => {
                out.push_str(&format!("## 🐾{SEPARATOR_MARK} {stamp} {SEPARATOR_MARK}\n"));
                let author = escape_markdown(&anchor.author);
                if anchor_text.is_empty() {
                    out.push_str(&format!("**{author}**\n"));
                } else {
                    out.push_str(&format!("**{author}**: {anchor_text}\n"));
                }
            }
            Markup::Plain => {
                out.push_str(&format!("{SEPARATOR_MARK} {stamp} {SEPARATOR_MARK}\n"));
                if anchor_text.is_empty() {
                    out.push_str(&format!("{}\n", anchor.author));
                } else {
                    out.push_str(&format!("{}: {}\n", anchor.author, anchor_text));
                }
            }
        }
        for url in urls {
            out.push_str(&format!("🔗 {url}\n"));
        }

        self.push_block(&mut out, AFTER_HEADER, after);

        out.push_str(RULE);
        out
    }

    fn push_block(&self, out: &mut String, header: &str, lines: &VecDeque<String>) {
        let fenced = self.markup == Markup::Markdown;
        if fenced {
            out.push_str("```\n");
        }
        out.push_str(header);
        out.push('\n');
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        if fenced {
            out.push_str("```\n");
        }
    }

    /// `[HH:MM] author: text`, flattened to one line and shortened.
    fn context_line(&self, message: &ChannelMessage) -> String {
        let time = message.date.with_timezone(&self.offset).format("%H:%M");
        let flat = message.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut text: String = flat.chars().take(self.context_text_max_chars).collect();
        if flat.chars().count() > self.context_text_max_chars {
            text.push(ELLIPSIS);
        }
        let mut author = message.author.clone();
        if self.markup == Markup::Markdown {
            text = text.replace("```", "'''");
            author = author.replace("```", "'''");
        }
        format!("[{}] {}: {}", time, author, text)
    }
}

/// Backslash-escape Markdown emphasis characters.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '~' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
