// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured-header parsing shared by request files and `.md` registry
//! entries.
//!
//! A document is an optional `#` heading, a contiguous block of
//! `key: value` lines, and an opaque remainder. Keys are `snake_case`
//! identifiers; everything after the first `:` (trimmed) is the value.

/// A parsed structured-header document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderDoc {
    /// Text of the first `#` heading, without the marker.
    pub title: Option<String>,
    /// Header fields in file order.
    pub fields: Vec<(String, String)>,
    /// Everything after the header block, verbatim.
    pub body: String,
}

impl HeaderDoc {
    /// First value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove and return the first value for `key`.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }
}

/// Split `text` into heading, header fields, and body.
///
/// The header block is the first contiguous run of `key: value` lines; it
/// ends at the first line that is blank or does not look like a field.
/// There is no error case: a document with no recognizable header yields
/// empty `fields` and the full text as `body`.
#[must_use]
pub fn parse(text: &str) -> HeaderDoc {
    let mut title = None;
    let mut fields = Vec::new();

    let mut rest = text;
    let mut in_header = false;

    loop {
        if rest.is_empty() {
            break;
        }
        let (line, remainder) = match rest.split_once('\n') {
            Some((l, r)) => (l, r),
            None => (rest, ""),
        };
        let trimmed = line.trim_end_matches('\r');

        if !in_header {
            if trimmed.is_empty() {
                rest = remainder;
                continue;
            }
            if title.is_none() && trimmed.starts_with('#') {
                title = Some(trimmed.trim_start_matches('#').trim().to_string());
                rest = remainder;
                continue;
            }
            if field_line(trimmed).is_some() {
                in_header = true;
                // Fall through to the header arm below without consuming.
            } else {
                break;
            }
        }

        match field_line(trimmed) {
            Some((key, value)) => {
                fields.push((key.to_string(), value.to_string()));
                rest = remainder;
            }
            None => break,
        }
    }

    HeaderDoc {
        title,
        fields,
        body: rest.to_string(),
    }
}

/// Render a document back into its file form.
#[must_use]
pub fn render(doc: &HeaderDoc) -> String {
    let mut out = String::new();
    if let Some(title) = &doc.title {
        out.push_str("# ");
        out.push_str(title);
        out.push_str("\n\n");
    }
    for (key, value) in &doc.fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    if !doc.body.is_empty() {
        out.push_str(&doc.body);
    }
    out
}

/// Interpret a line as `key: value` if the key looks like an identifier.
fn field_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_fields_and_body() {
        let doc = parse("# Request: add invoices\n\nid: req-1\nstatus: pending\n\n## Body\nhi\n");
        assert_eq!(doc.title.as_deref(), Some("Request: add invoices"));
        assert_eq!(doc.get("id"), Some("req-1"));
        assert_eq!(doc.get("status"), Some("pending"));
        assert!(doc.body.contains("## Body"));
    }

    #[test]
    fn header_ends_at_blank_line() {
        let doc = parse("a: 1\n\nb: 2\n");
        assert_eq!(doc.fields.len(), 1);
        assert!(doc.body.contains("b: 2"));
    }

    #[test]
    fn no_header_means_everything_is_body() {
        let doc = parse("just some prose\nwith lines\n");
        assert!(doc.fields.is_empty());
        assert!(doc.body.contains("just some prose"));
    }

    #[test]
    fn render_round_trips_unknown_fields_in_order() {
        let text = "# T\n\nid: x\nx_custom: keep me\nanother: 2\n\nbody\n";
        let doc = parse(text);
        let rendered = render(&doc);
        let again = parse(&rendered);
        assert_eq!(doc.fields, again.fields);
        assert_eq!(doc.body, again.body);
    }

    #[test]
    fn colon_in_value_is_preserved() {
        let doc = parse("url: https://example.com/x\n");
        assert_eq!(doc.get("url"), Some("https://example.com/x"));
    }

    #[test]
    fn prose_with_colon_space_inside_body_not_a_field() {
        let doc = parse("id: req-1\n\nNote that: this is body text\n");
        assert_eq!(doc.fields.len(), 1);
        assert!(doc.body.contains("Note that"));
    }
}
