//! Format-preserving edits of Helm values files.
//!
//! Values files are hand-maintained and carry comments, quoting choices and
//! key ordering that reviewers care about. Reads go through `serde_yaml`, but
//! writes are applied to the text line by line so that everything except the
//! edited scalars stays byte-identical. Documents using constructs the line
//! editor does not understand are rewritten through `serde_yaml` instead.

use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};

const DEFAULT_INDENT: usize = 2;

// A block mapping entry: indentation, a plain or quoted key, the colon and
// whatever follows it on the same line.
const KEY_LINE: &str = r#"^(?P<indent> *)(?P<key>"(?:[^"\\]|\\.)*"|'(?:[^']|'')*'|[^\s#'"?\-{\[][^#]*?)[ \t]*:(?:[ \t]+(?P<rest>.*))?$"#;

/// A path of mapping keys, e.g. `.global.appImageTag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments.into_iter().map(Into::into).collect::<Vec<_>>();
        ensure!(!segments.is_empty(), "key path must not be empty");
        ensure!(
            segments.iter().all(|segment| !segment.is_empty()),
            "key path {:?} contains an empty segment",
            segments
        );
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn prefix(&self, len: usize) -> KeyPath {
        KeyPath(self.0[..len].to_vec())
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = anyhow::Error;

    /// Parses yq-style dot notation. Every segment needs a leading `.`.
    fn try_from(value: &str) -> Result<Self> {
        let dotted = Regex::new(r"^(\.[^.]+)+$")?;
        ensure!(dotted.is_match(value), "'{}' is not a valid key path", value);
        KeyPath::new(value.split('.').skip(1))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// A values file held as lines, edited in place and written back on demand.
pub struct ValuesFile {
    path: PathBuf,
    lines: Vec<String>,
    newline: &'static str,
    trailing_newline: bool,
    key_line: Regex,
    assigned: Vec<(KeyPath, String)>,
}

impl ValuesFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                bail!("Values file '{}' does not exist.", path.display())
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        Self::from_text(path, &text)
    }

    /// Builds a values file from text already in memory. `path` is where
    /// [`ValuesFile::save`] writes.
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        serde_yaml::from_str::<Value>(text)
            .with_context(|| format!("{} is not valid YAML", path.display()))?;

        Ok(Self {
            path,
            lines: text.lines().map(str::to_string).collect(),
            newline: if text.contains("\r\n") { "\r\n" } else { "\n" },
            trailing_newline: text.is_empty() || text.ends_with('\n'),
            key_line: Regex::new(KEY_LINE)?,
            assigned: vec![],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_modified(&self) -> bool {
        !self.assigned.is_empty()
    }

    pub fn text(&self) -> String {
        let mut text = self.lines.join(self.newline);
        if self.trailing_newline && !self.lines.is_empty() {
            text.push_str(self.newline);
        }
        text
    }

    /// Current value at `path`, if every key along it exists.
    pub fn get(&self, path: &KeyPath) -> Result<Option<Value>> {
        Ok(lookup(&self.document()?, path).cloned())
    }

    /// Makes `path` hold the string `value`, creating missing mappings along
    /// the way. Returns whether the document changed.
    pub fn set_string(&mut self, path: &KeyPath, value: &str) -> Result<bool> {
        let mut document = self.document()?;
        if lookup(&document, path).and_then(Value::as_str) == Some(value) {
            log::debug!("{path} already set to {value}");
            return Ok(false);
        }
        ensure_mapping_path(&document, path)?;

        match self.plan(path, value) {
            Plan::Replace { line, text } => self.lines[line] = text,
            Plan::Insert { clear, at, lines } => {
                if let Some((line, text)) = clear {
                    self.lines[line] = text;
                }
                self.lines.splice(at..at, lines);
            }
            Plan::Unsupported(reason) => {
                log::warn!(
                    "Cannot edit {} in place ({}); rewriting {} without its comments and quoting",
                    path,
                    reason,
                    self.path.display()
                );
                set_structured(&mut document, path, value)?;
                let text = serde_yaml::to_string(&document)?;
                self.lines = text.lines().map(str::to_string).collect();
                self.trailing_newline = true;
            }
        }

        self.assigned.push((path.clone(), value.to_string()));
        Ok(true)
    }

    /// Writes the document back if anything was set.
    pub fn save(&self) -> Result<()> {
        if !self.is_modified() {
            return Ok(());
        }

        let text = self.text();
        let document = serde_yaml::from_str::<Value>(&text)
            .with_context(|| format!("edited {} is not valid YAML", self.path.display()))?;
        for (path, value) in &self.assigned {
            ensure!(
                lookup(&document, path).and_then(Value::as_str) == Some(value.as_str()),
                "edited {} does not hold {} at {}",
                self.path.display(),
                value,
                path
            );
        }

        fs::write(&self.path, text).with_context(|| format!("writing {}", self.path.display()))
    }

    fn document(&self) -> Result<Value> {
        let document = serde_yaml::from_str::<Value>(&self.text())
            .with_context(|| format!("{} is not valid YAML", self.path.display()))?;
        Ok(match document {
            Value::Null => Value::Mapping(Mapping::new()),
            document => document,
        })
    }

    fn plan(&self, path: &KeyPath, value: &str) -> Plan {
        let step = self.indent_step();
        let segments = path.segments();

        let mut start = 0;
        let mut end = self.lines.len();
        let mut parent_indent: Option<usize> = None;
        let mut clear = None;

        for (depth, segment) in segments.iter().enumerate() {
            let child_indent = self.first_content_indent(start, end);
            let found = match child_indent {
                Some(indent) => match self.find_key(start, end, indent, segment) {
                    Ok(found) => found,
                    Err(reason) => return Plan::Unsupported(reason),
                },
                None => None,
            };

            let Some((index, key)) = found else {
                let indent = child_indent
                    .unwrap_or_else(|| parent_indent.map_or(0, |indent| indent + step));
                let fallback = if parent_indent.is_some() { start } else { end };
                let at = self.last_content_line(start, end).map_or(fallback, |line| line + 1);
                let lines = segments[depth..]
                    .iter()
                    .enumerate()
                    .map(|(level, segment)| {
                        let pad = " ".repeat(indent + level * step);
                        let key = render_key(segment);
                        if depth + level + 1 == segments.len() {
                            format!("{pad}{key}: {}", render_scalar(value, QuoteStyle::Plain))
                        } else {
                            format!("{pad}{key}:")
                        }
                    })
                    .collect();
                return Plan::Insert { clear, at, lines };
            };

            let line = &self.lines[index];
            let block_end = self.block_end(index, key.indent, end);
            let inline = key.inline(line);

            if depth + 1 == segments.len() {
                if self.last_content_line(index + 1, block_end).is_some() {
                    return Plan::Unsupported("the key holds a nested block".to_string());
                }
                let text = match inline {
                    Inline::Empty { comment } => format!(
                        "{} {}{}",
                        &line[..key.colon_end],
                        render_scalar(value, QuoteStyle::Plain),
                        comment_suffix(comment)
                    ),
                    Inline::Scalar { start: from, end: to, style } => format!(
                        "{}{}{}",
                        &line[..from],
                        render_scalar(value, style),
                        &line[to..]
                    ),
                    Inline::EmptyFlow { .. } => {
                        return Plan::Unsupported("the key holds a flow mapping".to_string())
                    }
                    Inline::Unsupported(reason) => return Plan::Unsupported(reason.to_string()),
                };
                return Plan::Replace { line: index, text };
            }

            match inline {
                Inline::Empty { .. } => {}
                Inline::Scalar { start: from, end: to, .. } if is_null(&line[from..to]) => {
                    let comment = line[to..].trim_start();
                    let comment = comment.starts_with('#').then_some(comment);
                    clear = Some((
                        index,
                        format!("{}{}", &line[..key.colon_end], comment_suffix(comment)),
                    ));
                }
                Inline::EmptyFlow { comment } => {
                    clear = Some((
                        index,
                        format!("{}{}", &line[..key.colon_end], comment_suffix(comment)),
                    ));
                }
                Inline::Scalar { .. } => {
                    return Plan::Unsupported(format!("{segment} holds a scalar"))
                }
                Inline::Unsupported(reason) => return Plan::Unsupported(reason.to_string()),
            }

            start = index + 1;
            end = block_end;
            parent_indent = Some(key.indent);
        }

        Plan::Unsupported("empty key path".to_string())
    }

    fn parse_key(&self, line: &str) -> Option<KeyLine> {
        let captures = self.key_line.captures(line)?;
        let raw = captures.name("key")?;
        let key = if raw.as_str().starts_with(['"', '\'']) {
            serde_yaml::from_str::<String>(raw.as_str()).ok()?
        } else {
            raw.as_str().trim_end().to_string()
        };
        let colon_end = raw.end() + line[raw.end()..].find(':')? + 1;

        Some(KeyLine {
            indent: captures.name("indent")?.as_str().len(),
            key,
            colon_end,
            rest_start: captures.name("rest").map(|rest| rest.start()),
        })
    }

    fn find_key(
        &self,
        start: usize,
        end: usize,
        indent: usize,
        segment: &str,
    ) -> Result<Option<(usize, KeyLine)>, String> {
        for index in start..end {
            let line = &self.lines[index];
            // Sequence items at this indentation belong to a sibling key.
            if content_indent(line) != Some(indent) || is_sequence_item(line) {
                continue;
            }
            match self.parse_key(line) {
                Some(key) if key.key == segment => return Ok(Some((index, key))),
                Some(_) => {}
                None => return Err(format!("line {} is not a block mapping entry", index + 1)),
            }
        }
        Ok(None)
    }

    fn first_content_indent(&self, start: usize, end: usize) -> Option<usize> {
        self.lines[start..end].iter().find_map(|line| content_indent(line))
    }

    fn last_content_line(&self, start: usize, end: usize) -> Option<usize> {
        (start..end)
            .rev()
            .find(|index| content_indent(&self.lines[*index]).is_some())
    }

    /// First line after `index` that no longer belongs to the entry.
    fn block_end(&self, index: usize, indent: usize, end: usize) -> usize {
        (index + 1..end)
            .find(|line| match content_indent(&self.lines[*line]) {
                Some(other) if other < indent => true,
                // A sequence may sit at the same indentation as its key.
                Some(other) if other == indent => !is_sequence_item(&self.lines[*line]),
                _ => false,
            })
            .unwrap_or(end)
    }

    fn indent_step(&self) -> usize {
        for (index, line) in self.lines.iter().enumerate() {
            let Some(key) = self.parse_key(line) else {
                continue;
            };
            if !matches!(key.inline(line), Inline::Empty { .. }) {
                continue;
            }
            let next = self.lines[index + 1..].iter().find_map(|line| content_indent(line));
            if let Some(child) = next.filter(|child| *child > key.indent) {
                return child - key.indent;
            }
        }
        DEFAULT_INDENT
    }
}

enum Plan {
    Replace {
        line: usize,
        text: String,
    },
    Insert {
        clear: Option<(usize, String)>,
        at: usize,
        lines: Vec<String>,
    },
    Unsupported(String),
}

struct KeyLine {
    indent: usize,
    key: String,
    colon_end: usize,
    rest_start: Option<usize>,
}

impl KeyLine {
    fn inline<'a>(&self, line: &'a str) -> Inline<'a> {
        let Some(rest_start) = self.rest_start else {
            return Inline::Empty { comment: None };
        };
        classify(line, rest_start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteStyle {
    Plain,
    Single,
    Double,
}

/// What follows a key's colon on the same line. Offsets index the line.
#[derive(Debug, PartialEq, Eq)]
enum Inline<'a> {
    Empty {
        comment: Option<&'a str>,
    },
    EmptyFlow {
        comment: Option<&'a str>,
    },
    Scalar {
        start: usize,
        end: usize,
        style: QuoteStyle,
    },
    Unsupported(&'static str),
}

fn classify(line: &str, start: usize) -> Inline<'_> {
    let rest = &line[start..];
    if rest.trim().is_empty() {
        return Inline::Empty { comment: None };
    }
    if rest.starts_with('#') {
        return Inline::Empty {
            comment: Some(rest.trim_end()),
        };
    }

    let (len, style) = match rest.as_bytes()[0] {
        b'"' => match closing_double_quote(rest) {
            Some(len) => (len, QuoteStyle::Double),
            None => return Inline::Unsupported("multi-line double-quoted scalar"),
        },
        b'\'' => match closing_single_quote(rest) {
            Some(len) => (len, QuoteStyle::Single),
            None => return Inline::Unsupported("multi-line single-quoted scalar"),
        },
        b'{' => {
            let Some(close) = rest.find('}') else {
                return Inline::Unsupported("multi-line flow mapping");
            };
            if !rest[1..close].trim().is_empty() {
                return Inline::Unsupported("flow mapping");
            }
            return match trailing_comment(&rest[close + 1..]) {
                Ok(comment) => Inline::EmptyFlow { comment },
                Err(()) => Inline::Unsupported("text after flow mapping"),
            };
        }
        b'[' => return Inline::Unsupported("flow sequence"),
        b'|' | b'>' => return Inline::Unsupported("block scalar"),
        b'&' | b'*' | b'!' => return Inline::Unsupported("anchor, alias or tag"),
        _ => {
            let len = [" #", "\t#"]
                .iter()
                .filter_map(|marker| rest.find(marker))
                .min()
                .unwrap_or(rest.len());
            (rest[..len].trim_end().len(), QuoteStyle::Plain)
        }
    };

    match trailing_comment(&rest[len..]) {
        Ok(_) => Inline::Scalar {
            start,
            end: start + len,
            style,
        },
        Err(()) => Inline::Unsupported("text after quoted scalar"),
    }
}

/// Length of a double-quoted scalar including both quotes.
fn closing_double_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (offset, c) in text.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(offset + 1),
            _ => {}
        }
    }
    None
}

/// Length of a single-quoted scalar including both quotes.
fn closing_single_quote(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut offset = 1;
    while offset < bytes.len() {
        if bytes[offset] == b'\'' {
            if bytes.get(offset + 1) == Some(&b'\'') {
                offset += 2;
                continue;
            }
            return Some(offset + 1);
        }
        offset += 1;
    }
    None
}

fn trailing_comment(text: &str) -> Result<Option<&str>, ()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else if trimmed.starts_with('#') && text.starts_with([' ', '\t']) {
        Ok(Some(trimmed))
    } else {
        Err(())
    }
}

fn comment_suffix(comment: Option<&str>) -> String {
    comment.map(|comment| format!(" {comment}")).unwrap_or_default()
}

fn render_scalar(value: &str, style: QuoteStyle) -> String {
    if value.chars().any(char::is_control) {
        return render_double(value);
    }
    match style {
        QuoteStyle::Plain if reads_back_as_string(value) => value.to_string(),
        QuoteStyle::Plain | QuoteStyle::Single => format!("'{}'", value.replace('\'', "''")),
        QuoteStyle::Double => render_double(value),
    }
}

fn render_double(value: &str) -> String {
    let mut rendered = String::with_capacity(value.len() + 2);
    rendered.push('"');
    for c in value.chars() {
        match c {
            '"' => rendered.push_str("\\\""),
            '\\' => rendered.push_str("\\\\"),
            '\n' => rendered.push_str("\\n"),
            '\t' => rendered.push_str("\\t"),
            c if c.is_control() => rendered.push_str(&format!("\\u{:04x}", c as u32)),
            c => rendered.push(c),
        }
    }
    rendered.push('"');
    rendered
}

fn render_key(key: &str) -> String {
    if reads_back_as_string(key) && !key.contains(':') {
        key.to_string()
    } else {
        render_double(key)
    }
}

/// Whether `plain` written without quotes parses back to the same string.
fn reads_back_as_string(plain: &str) -> bool {
    matches!(serde_yaml::from_str::<Value>(plain), Ok(Value::String(parsed)) if parsed == plain)
}

fn is_null(token: &str) -> bool {
    matches!(token, "~" | "null" | "Null" | "NULL")
}

/// Indentation of a line that carries content; `None` for blank lines,
/// comments and document markers.
fn content_indent(line: &str) -> Option<usize> {
    let trimmed = line.trim_start_matches(' ');
    if trimmed.trim().is_empty()
        || trimmed.starts_with('#')
        || line.starts_with("---")
        || line.starts_with("...")
    {
        return None;
    }
    Some(line.len() - trimmed.len())
}

fn is_sequence_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed == "-" || trimmed.starts_with("- ")
}

fn lookup<'a>(document: &'a Value, path: &KeyPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(document, |node, segment| node.get(segment.as_str()))
}

fn ensure_mapping_path(document: &Value, path: &KeyPath) -> Result<()> {
    ensure!(document.is_mapping(), "values document is not a mapping");

    let mut node = document;
    let parents = path.segments().len() - 1;
    for (depth, segment) in path.segments()[..parents].iter().enumerate() {
        match node.get(segment.as_str()) {
            None | Some(Value::Null) => return Ok(()),
            Some(child @ Value::Mapping(_)) => node = child,
            Some(_) => bail!("'{}' is not a mapping", path.prefix(depth + 1)),
        }
    }
    Ok(())
}

fn set_structured(document: &mut Value, path: &KeyPath, value: &str) -> Result<()> {
    let (leaf, parents) = path
        .segments()
        .split_last()
        .context("key path must not be empty")?;

    let mut node = document;
    for segment in parents {
        let child = node
            .as_mapping_mut()
            .with_context(|| format!("cannot descend into {segment} of {path}"))?
            .entry(Value::String(segment.clone()))
            .or_insert(Value::Null);
        if child.is_null() {
            *child = Value::Mapping(Mapping::new());
        }
        node = child;
    }

    node.as_mapping_mut()
        .with_context(|| format!("parent of {path} is not a mapping"))?
        .insert(Value::String(leaf.clone()), Value::String(value.to_string()));
    Ok(())
}
