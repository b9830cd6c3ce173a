use std::collections::{HashMap, VecDeque};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::diagnostics::{FileDiagnostics, Issue, Severity};
use crate::error::{BridgeError, Result};
use crate::stream::event::StreamEvent;

/// Printed by `rc` when `rdm` is not running.
pub const CONNECTION_FAILURE_MARKER: &str = "Can't seem to connect to server";

const DEFAULT_MAX_ELEMENT_BYTES: usize = 16 * 1024 * 1024;

/// Elements `rc -m` emits at the top level. They never nest.
const ROOT_ELEMENTS: [&str; 2] = ["checkstyle", "progress"];

/// Incremental decoder for the `rc -m` monitor feed.
///
/// Lines are buffered until the top-level element opened by the first
/// `<name` seen since the buffer was last empty is closed, then the whole
/// element is parsed. A malformed element yields [`BridgeError::Protocol`]
/// and resets the decoder, so the next element decodes normally.
///
/// An element that never closes (for example a misspelled end tag) is
/// dropped as soon as a line opens a new top-level element, and that line
/// is decoded in its place.
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: String,
    open_tag: Option<String>,
    max_element_bytes: usize,
    finished: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::with_max_element_bytes(DEFAULT_MAX_ELEMENT_BYTES)
    }

    pub fn with_max_element_bytes(max_element_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            open_tag: None,
            max_element_bytes,
            finished: false,
        }
    }

    /// True once a connection failure was seen. A finished decoder ignores
    /// all further input.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push_bytes(&mut self, line: &[u8]) -> Result<Vec<StreamEvent>> {
        self.push_line(&String::from_utf8_lossy(line))
    }

    /// Feed one line (with or without its trailing newline).
    pub fn push_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }

        if line.contains(CONNECTION_FAILURE_MARKER) {
            tracing::error!(line = line.trim_end(), "Indexer daemon unreachable");
            self.finished = true;
            self.reset();
            return Ok(vec![StreamEvent::ConnectionError {
                message: format!(
                    "{} Make sure `rdm` is running, then retry.",
                    line.trim()
                ),
            }]);
        }

        if let (Some(stale), Some(next)) = (self.open_tag.as_deref(), root_element_at_start(line)) {
            tracing::warn!(
                tag = %stale,
                next = %next,
                dropped_bytes = self.buffer.len(),
                "Dropping unterminated monitor element"
            );
            self.reset();
        }

        if self.open_tag.is_none() {
            self.open_tag = first_tag_name(line);
            if self.open_tag.is_none() && !line.trim_start().starts_with("<?") {
                if !line.trim().is_empty() {
                    tracing::debug!(line = line.trim_end(), "Ignoring text outside of an element");
                }
                return Ok(Vec::new());
            }
        }

        self.buffer.push_str(line);
        if !line.ends_with('\n') {
            self.buffer.push('\n');
        }

        let complete = match self.open_tag.as_deref() {
            Some(tag) => line.contains(&format!("</{}>", tag)) || is_self_closed(&self.buffer, tag),
            None => false,
        };

        if complete {
            let element = std::mem::take(&mut self.buffer);
            self.open_tag = None;
            return parse_element(&element).map_err(|msg| {
                tracing::warn!(error = %msg, "Dropping malformed monitor element");
                BridgeError::Protocol(msg)
            });
        }

        if self.buffer.len() > self.max_element_bytes {
            let tag = self.open_tag.clone().unwrap_or_default();
            self.reset();
            tracing::warn!(tag = %tag, limit = self.max_element_bytes, "Monitor element too large");
            return Err(BridgeError::Protocol(format!(
                "<{}> exceeded {} bytes without closing",
                tag, self.max_element_bytes
            )));
        }

        Ok(Vec::new())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.open_tag = None;
    }
}

/// Pull-based event sequence over any line source.
///
/// Ends when the source reaches EOF or a connection failure is decoded.
/// Malformed elements are logged and skipped.
pub struct MonitorEvents<R> {
    reader: R,
    decoder: StreamDecoder,
    pending: VecDeque<StreamEvent>,
}

impl<R: AsyncBufRead + Unpin> MonitorEvents<R> {
    pub fn new(reader: R, decoder: StreamDecoder) -> Self {
        Self {
            reader,
            decoder,
            pending: VecDeque::new(),
        }
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.decoder.is_finished() {
                return None;
            }

            let mut line = Vec::new();
            match self.reader.read_until(b'\n', &mut line).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Monitor source read failed");
                    return None;
                }
            }

            match self.decoder.push_bytes(&line) {
                Ok(events) => self.pending.extend(events),
                Err(e) => tracing::debug!(error = %e, "Skipped monitor element"),
            }
        }
    }
}

/// Name of the first `<name` in `line`, skipping `<?`, `<!` and `</`.
fn first_tag_name(line: &str) -> Option<String> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            let name: String = line[i + 1..]
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                return Some(name);
            }
        }
        i += 1;
    }
    None
}

/// The top-level element a line opens, if the line starts with one.
fn root_element_at_start(line: &str) -> Option<&'static str> {
    let rest = line.trim_start().strip_prefix('<')?;
    ROOT_ELEMENTS.into_iter().find(|name| {
        rest.strip_prefix(name)
            .is_some_and(|after| !after.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
    })
}

/// True if the opening `<tag ...>` in `buffer` ends with `/>`.
fn is_self_closed(buffer: &str, tag: &str) -> bool {
    let open = format!("<{}", tag);
    let Some(start) = buffer.find(&open) else {
        return false;
    };

    let mut quote: Option<char> = None;
    let mut previous = '\0';
    for c in buffer[start + open.len()..].chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '>' => return previous == '/',
                _ => {}
            },
        }
        previous = c;
    }
    false
}

fn parse_element(xml: &str) -> std::result::Result<Vec<StreamEvent>, String> {
    let mut reader = Reader::from_str(xml);
    let mut events = Vec::new();
    let mut in_checkstyle = false;
    let mut current_file: Option<FileDiagnostics> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"progress" => {
                    if let Some(event) = progress_event(&e)? {
                        events.push(event);
                    }
                }
                b"checkstyle" => in_checkstyle = true,
                b"file" if in_checkstyle => {
                    current_file = Some(FileDiagnostics::new(required(&attributes(&e)?, "name")?));
                }
                b"error" => {
                    if let Some(file) = current_file.as_mut() {
                        if let Some(issue) = issue_from(&e)? {
                            file.push(issue);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"progress" => {
                    if let Some(event) = progress_event(&e)? {
                        events.push(event);
                    }
                }
                b"file" if in_checkstyle => {
                    let name = required(&attributes(&e)?, "name")?;
                    events.push(StreamEvent::DiagnosticBatch(FileDiagnostics::new(name)));
                }
                b"error" => {
                    if let Some(file) = current_file.as_mut() {
                        if let Some(issue) = issue_from(&e)? {
                            file.push(issue);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"file" => {
                    if let Some(file) = current_file.take() {
                        events.push(StreamEvent::DiagnosticBatch(file));
                    }
                }
                b"checkstyle" => in_checkstyle = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
    }

    Ok(events)
}

fn progress_event(e: &BytesStart<'_>) -> std::result::Result<Option<StreamEvent>, String> {
    let attrs = attributes(e)?;
    let index = parse_number(&attrs, "index")?;
    let total = parse_number(&attrs, "total")?;
    if index == total {
        Ok(Some(StreamEvent::ProgressUpdate { index, total }))
    } else {
        Ok(None)
    }
}

fn issue_from(e: &BytesStart<'_>) -> std::result::Result<Option<Issue>, String> {
    let attrs = attributes(e)?;
    let Some(severity) = Severity::from_monitor(&required(&attrs, "severity")?) else {
        return Ok(None);
    };
    let length = match attrs.get("length") {
        Some(raw) => Some(parse_signed(raw, "length")?),
        None => None,
    };
    Ok(Some(Issue::new(
        severity,
        parse_signed(&required(&attrs, "line")?, "line")?,
        parse_signed(&required(&attrs, "column")?, "column")?,
        length,
        required(&attrs, "message")?,
    )))
}

fn attributes(e: &BytesStart<'_>) -> std::result::Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|err| err.to_string())?;
        map.insert(key, value.into_owned());
    }
    Ok(map)
}

fn required(attrs: &HashMap<String, String>, key: &str) -> std::result::Result<String, String> {
    attrs
        .get(key)
        .cloned()
        .ok_or_else(|| format!("missing attribute `{}`", key))
}

fn parse_number(attrs: &HashMap<String, String>, key: &str) -> std::result::Result<u64, String> {
    let raw = required(attrs, key)?;
    raw.trim()
        .parse()
        .map_err(|_| format!("attribute `{}` is not a number: {:?}", key, raw))
}

fn parse_signed(raw: &str, key: &str) -> std::result::Result<i64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("attribute `{}` is not a number: {:?}", key, raw))
}
