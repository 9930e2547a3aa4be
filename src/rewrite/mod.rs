//! URL rewriter — maps internal upstream URLs to proxy URLs
//!
//! Response bodies leaving the gateway must not leak internal upstream
//! addresses. XML bodies (OData feeds and the like) are rewritten
//! element-by-element; anything else falls back to a case-insensitive
//! textual replacement. The rewriter is idempotent: applying it twice
//! yields the same body, and already-proxied prefixes are never touched.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

/// Rewrites one (upstream base, proxy base) pair over response bodies
pub struct UrlRewriter {
    /// Upstream base: host + path, no trailing slash
    original: String,
    /// Proxy base: host + path, no trailing slash
    proxy: String,
    proxy_host: String,
    proxy_path: String,
    fallback: Regex,
}

impl UrlRewriter {
    /// Build a rewriter for one base-URL pair
    pub fn new(
        original_host: &str,
        original_path: &str,
        proxy_host: &str,
        proxy_path: &str,
    ) -> Self {
        let original = trim_trailing_slash(&format!("{}{}", original_host, original_path));
        let proxy_path = trim_trailing_slash(proxy_path);
        let proxy = trim_trailing_slash(&format!("{}{}", proxy_host, proxy_path));
        let pattern = format!("(?i){}(/[^\"'\\s]*)?", regex::escape(&original));
        let fallback = Regex::new(&pattern).expect("escaped literal pattern");
        Self {
            original,
            proxy,
            proxy_host: proxy_host.to_string(),
            proxy_path,
            fallback,
        }
    }

    /// Rewrite a response body
    pub fn rewrite(&self, body: &str) -> String {
        if self.original.is_empty() || self.original == self.proxy {
            return body.to_string();
        }
        if body.trim_start().starts_with('<') {
            if let Some(rewritten) = self.rewrite_xml(body) {
                return rewritten;
            }
        }
        self.rewrite_text(body)
    }

    /// XML path: walk every element, rewrite attribute values and leaf
    /// text. Returns None when the body is not well-formed XML.
    fn rewrite_xml(&self, body: &str) -> Option<String> {
        let mut reader = Reader::from_str(body);
        let mut events: Vec<Event<'static>> = Vec::new();
        let mut saw_element = false;
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(event) => {
                    if matches!(event, Event::Start(_) | Event::Empty(_)) {
                        saw_element = true;
                    }
                    events.push(event.into_owned());
                }
                Err(_) => return None,
            }
        }
        if !saw_element {
            return None;
        }

        let mut writer = Writer::new(Vec::new());
        for (i, event) in events.iter().enumerate() {
            let rewritten = match event {
                Event::Start(e) => self.rewrite_element(e).map(Event::Start),
                Event::Empty(e) => self.rewrite_element(e).map(Event::Empty),
                Event::Text(t) if is_leaf_text(&events, i) => {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                    self.rewrite_leaf_text(&text)
                        .map(|s| Event::Text(BytesText::new(&s).into_owned()))
                }
                _ => None,
            };
            let out = rewritten.unwrap_or_else(|| event.clone());
            writer.write_event(out).ok()?;
        }
        String::from_utf8(writer.into_inner()).ok()
    }

    /// Rebuild an element if any attribute changes; None keeps the
    /// original event (and its exact serialization) intact.
    fn rewrite_element(&self, elem: &BytesStart<'_>) -> Option<BytesStart<'static>> {
        let mut changed = false;
        let mut attrs: Vec<(String, String)> = Vec::new();
        for attr in elem.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            let rewritten = self.rewrite_attribute(&key, &value);
            if rewritten != value {
                changed = true;
            }
            attrs.push((key, rewritten));
        }
        if !changed {
            return None;
        }

        let name = String::from_utf8_lossy(elem.name().as_ref()).into_owned();
        let mut rebuilt = BytesStart::new(name);
        for (key, value) in &attrs {
            rebuilt.push_attribute((key.as_str(), value.as_str()));
        }
        Some(rebuilt)
    }

    fn rewrite_attribute(&self, key: &str, value: &str) -> String {
        // Namespace declarations are never URLs we own
        if key == "xmlns" || key.starts_with("xmlns:") {
            return value.to_string();
        }
        // Already proxied; checked first so a second pass is a no-op
        if value.starts_with(&self.proxy) {
            return value.to_string();
        }
        if let Some(rest) = value.strip_prefix(&self.original) {
            return format!("{}{}", self.proxy, rest);
        }
        let local = key.rsplit(':').next().unwrap_or(key);
        if local == "href" && !value.starts_with("http") && !value.starts_with('/') {
            let prefixed = format!("{}/{}", self.proxy_path, value);
            return trim_trailing_slash(&prefixed);
        }
        value.to_string()
    }

    /// Leaf text beginning with the upstream base is rewritten; any bare
    /// proxy-host occurrence left in the tail is grafted onto the proxy
    /// base as well (OData `<id>` values echo the host without a path).
    fn rewrite_leaf_text(&self, text: &str) -> Option<String> {
        if text.starts_with(&self.proxy) {
            return None;
        }
        let rest = text.strip_prefix(&self.original)?;
        Some(format!("{}{}", self.proxy, self.graft_proxy_host(rest)))
    }

    fn graft_proxy_host(&self, s: &str) -> String {
        if self.proxy_host.is_empty() {
            return s.to_string();
        }
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(idx) = rest.find(&self.proxy_host) {
            out.push_str(&rest[..idx]);
            let after = &rest[idx + self.proxy_host.len()..];
            if after.starts_with(&self.proxy_path) {
                // Already a full proxy base, leave it
                out.push_str(&self.proxy_host);
            } else {
                out.push_str(&self.proxy);
            }
            rest = after;
        }
        out.push_str(rest);
        out
    }

    /// Fallback path: case-insensitive replacement of the upstream base
    /// plus an optional path suffix, skipping already-proxied matches.
    fn rewrite_text(&self, body: &str) -> String {
        let mut out = String::with_capacity(body.len());
        let mut last = 0;
        for m in self.fallback.find_iter(body) {
            out.push_str(&body[last..m.start()]);
            if starts_with_ignore_ascii_case(&body[m.start()..], &self.proxy) {
                out.push_str(m.as_str());
            } else {
                out.push_str(&self.proxy);
                out.push_str(&m.as_str()[self.original.len()..]);
            }
            last = m.end();
        }
        out.push_str(&body[last..]);
        out
    }
}

/// Whether the text event at `i` is the sole content of its element
fn is_leaf_text(events: &[Event<'_>], i: usize) -> bool {
    i > 0
        && i + 1 < events.len()
        && matches!(events[i - 1], Event::Start(_))
        && matches!(events[i + 1], Event::End(_))
}

fn trim_trailing_slash(s: &str) -> String {
    s.trim_end_matches('/').to_string()
}

fn starts_with_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}
