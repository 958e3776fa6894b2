use quick_xml::encoding::Decoder;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use thiserror::Error;

use super::item::FeedItem;

/// SEC-003: Maximum element nesting depth accepted from a feed document.
/// Prevents runaway memory use from maliciously nested markup.
const MAX_DEPTH: usize = 64;

/// Longest `&...;` sequence treated as a reference candidate.
const MAX_REFERENCE_LEN: usize = 40;

/// Errors that make a feed document unusable as a whole.
///
/// A parse error is fatal for the sync pass: no partial item list is returned.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML
    #[error("XML parse error: {0}")]
    Xml(String),
    /// The document contains no elements at all
    #[error("Feed document is empty")]
    Empty,
    /// The document has no `<channel>` container
    #[error("Feed document has no <channel> element")]
    MissingChannel,
    /// SEC-003: Element nesting exceeds the safety limit
    #[error("Feed nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// Result of parsing one feed document.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    /// `<title>` of the channel, empty when absent
    pub channel_title: String,
    /// Items in document order
    pub items: Vec<FeedItem>,
    /// Number of items dropped because they had no identifier
    pub dropped: usize,
}

/// Normalizes an element or attribute name for matching: trims, collapses
/// internal whitespace and lowercases. Producers disagree on casing
/// (`pubDate`, `PubDate`, `PUBDATE`).
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parses an RSS document into normalized feed items.
///
/// Accepts RSS 2.0 (`<rss><channel><item>`) and RSS 1.0/RDF, where items are
/// siblings of the channel. A single item and a list of items produce the same
/// shape; a channel without items yields an empty list.
///
/// Items without a `<guid>` (or `rdf:about` attribute) are dropped and counted
/// in [`ParsedFeed::dropped`]. Missing `title`, `description`, `link` and
/// `pubDate` default to the empty string.
///
/// # Errors
///
/// - [`ParseError::Xml`] for malformed markup or mismatched tags
/// - [`ParseError::Empty`] when there is no root element
/// - [`ParseError::MissingChannel`] when no `<channel>` element exists
/// - [`ParseError::MaxDepthExceeded`] for pathological nesting
///
/// # Security
///
/// SEC-002: quick-xml (0.37) never expands `<!ENTITY>` declarations, so XXE
/// payloads cannot reach the filesystem or network.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    // Tag names are compared after normalization, so `<Title>..</TITLE>` is
    // accepted; the stack below does the end-name check instead.
    reader.config_mut().check_end_names = false;

    let mut builder = FeedBuilder::default();
    let mut stack: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                check_open(&stack, &mut seen_root)?;
                let about = item_about(&name, &e, &reader)?;
                builder.open(&name, stack.len(), about);
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e);
                check_open(&stack, &mut seen_root)?;
                let about = item_about(&name, &e, &reader)?;
                builder.open(&name, stack.len(), about);
                builder.close(stack.len());
            }
            Ok(Event::End(e)) => {
                let name = normalize_name(&String::from_utf8_lossy(e.name().as_ref()));
                match stack.pop() {
                    Some(open) if open == name => builder.close(stack.len()),
                    Some(open) => {
                        return Err(ParseError::Xml(format!(
                            "expected </{}>, found </{}>",
                            open, name
                        )))
                    }
                    None => {
                        return Err(ParseError::Xml(format!(
                            "unexpected closing tag </{}>",
                            name
                        )))
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if builder.is_capturing() {
                    let text = decode_text(reader.decoder(), &e);
                    builder.text(&unescape_text(&text));
                }
            }
            Ok(Event::CData(e)) => {
                if builder.is_capturing() {
                    builder.text(&decode_text(reader.decoder(), &e));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "{} at byte {}",
                    e,
                    reader.error_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Xml(format!(
            "unexpected end of document, <{}> is not closed",
            open
        )));
    }
    if !seen_root {
        return Err(ParseError::Empty);
    }

    builder.finish()
}

/// Decodes text with the encoding declared by the document (UTF-8 when
/// undeclared). Undecodable bytes become U+FFFD instead of failing the feed.
fn decode_text<'b>(decoder: Decoder, bytes: &'b [u8]) -> Cow<'b, str> {
    match decoder.decode(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable bytes in feed text, replacing");
            String::from_utf8_lossy(bytes)
        }
    }
}

/// Resolves character references and HTML5 named entities one reference at a
/// time. A reference that cannot be resolved (unknown name, bad code point,
/// bare `&`) is kept as written and does not affect its neighbours.
fn unescape_text(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let candidate = tail
            .find(';')
            .map(|semi| &tail[..=semi])
            .filter(|r| r.len() <= MAX_REFERENCE_LEN)
            .filter(|r| !r[1..].contains(|c: char| c == '&' || c.is_whitespace()));

        match candidate.map(|r| (r, unescape_with(r, resolve_html5_entity))) {
            Some((reference, Ok(resolved))) => {
                out.push_str(&resolved);
                rest = &tail[reference.len()..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn element_name(e: &BytesStart<'_>) -> String {
    normalize_name(&String::from_utf8_lossy(e.name().as_ref()))
}

fn check_open(stack: &[String], seen_root: &mut bool) -> Result<(), ParseError> {
    if stack.is_empty() {
        if *seen_root {
            return Err(ParseError::Xml(
                "document has more than one root element".to_string(),
            ));
        }
        *seen_root = true;
    }
    if stack.len() >= MAX_DEPTH {
        return Err(ParseError::MaxDepthExceeded(MAX_DEPTH));
    }
    Ok(())
}

/// Reads the `rdf:about` attribute of an `<item>`, the RSS 1.0 identifier.
fn item_about(
    name: &str,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<String>, ParseError> {
    if name != "item" {
        return Ok(None);
    }

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed item attribute");
                continue;
            }
        };
        if normalize_name(&String::from_utf8_lossy(attr.key.as_ref())) == "rdf:about" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| ParseError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

// ============================================================================
// Builder
// ============================================================================

/// Text being collected for one direct child of an item (or the channel title).
struct Capture {
    name: String,
    depth: usize,
    text: String,
}

#[derive(Default)]
struct ItemFields {
    guid: Option<String>,
    about: Option<String>,
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    pub_date: Option<String>,
    dc_date: Option<String>,
}

impl ItemFields {
    /// First occurrence of a field wins; unknown fields are ignored.
    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "guid" => &mut self.guid,
            "title" => &mut self.title,
            "description" => &mut self.description,
            "link" => &mut self.link,
            "pubdate" => &mut self.pub_date,
            "dc:date" => &mut self.dc_date,
            _ => return,
        };
        slot.get_or_insert(value);
    }

    fn into_item(self) -> Option<FeedItem> {
        let identifier = self
            .guid
            .filter(|g| !g.is_empty())
            .or_else(|| self.about.map(|a| a.trim().to_string()))
            .filter(|id| !id.is_empty())?;

        Some(FeedItem {
            identifier,
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            published_at: self.pub_date.or(self.dc_date).unwrap_or_default(),
        })
    }
}

#[derive(Default)]
struct FeedBuilder {
    channel_depth: Option<usize>,
    item: Option<(usize, ItemFields)>,
    capture: Option<Capture>,
    feed: ParsedFeed,
}

impl FeedBuilder {
    fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    /// Handles an opening tag at `depth` (root is depth 0).
    fn open(&mut self, name: &str, depth: usize, about: Option<String>) {
        if self.capture.is_some() {
            // Nested markup inside a field only contributes its text
            return;
        }

        if let Some((item_depth, _)) = &self.item {
            if depth == item_depth + 1 {
                self.capture = Some(Capture {
                    name: name.to_string(),
                    depth,
                    text: String::new(),
                });
            }
            return;
        }

        match name {
            "channel" if self.channel_depth.is_none() => {
                self.channel_depth = Some(depth);
            }
            "item" if depth == 1 || self.is_channel_child(depth) => {
                let fields = ItemFields {
                    about,
                    ..ItemFields::default()
                };
                self.item = Some((depth, fields));
            }
            "title" if self.is_channel_child(depth) && self.feed.channel_title.is_empty() => {
                self.capture = Some(Capture {
                    name: name.to_string(),
                    depth,
                    text: String::new(),
                });
            }
            _ => {}
        }
    }

    /// Handles the closing tag of the element at `depth`.
    fn close(&mut self, depth: usize) {
        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            if let Some(capture) = self.capture.take() {
                let value = capture.text.trim().to_string();
                match self.item.as_mut() {
                    Some((_, fields)) => fields.set(&capture.name, value),
                    None => self.feed.channel_title = value,
                }
            }
            return;
        }

        if self.item.as_ref().is_some_and(|(d, _)| *d == depth) {
            if let Some((_, fields)) = self.item.take() {
                match fields.into_item() {
                    Some(item) => self.feed.items.push(item),
                    None => self.feed.dropped += 1,
                }
            }
        }
    }

    fn is_channel_child(&self, depth: usize) -> bool {
        self.channel_depth.is_some_and(|d| d + 1 == depth)
    }

    fn finish(self) -> Result<ParsedFeed, ParseError> {
        if self.channel_depth.is_none() {
            return Err(ParseError::MissingChannel);
        }
        Ok(self.feed)
    }
}
