//! Response header reconstruction.
//!
//! Header lines arrive one at a time from the transport. A line with a colon
//! starts a new entry, a line beginning with `HTTP/1` is a status line stored
//! under the synthetic name `HTTP`, and any other non-empty line continues
//! the most recently started entry. Names compare case-insensitively and the
//! last write for a name wins.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Synthetic header name under which the status line is stored.
pub const STATUS_LINE: &str = "HTTP";

/// Ordered, case-insensitive header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or overwrite. An overwrite keeps the entry's position but takes
    /// the new spelling of the name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some(entry) => *entry = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    fn append(&mut self, name: &str, extra: &str) {
        if let Some((_, value)) = self.entries.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            value.push_str(extra);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serialises as a `name: value` object, in insertion order.
impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Builds a [`Headers`] map from raw header lines.
#[derive(Debug, Default)]
pub struct HeaderAccumulator {
    headers: Headers,
    current: Option<String>,
}

impl HeaderAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if trimmed.starts_with("HTTP/1") {
            self.start(STATUS_LINE, trimmed);
            return;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                self.start(name, value.trim());
                return;
            }
        }

        // Continuation: glued on without a separator. Lines before any
        // header has started have nothing to continue and are dropped.
        if let Some(current) = &self.current {
            self.headers.append(current, trimmed);
        }
    }

    fn start(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
        self.current = Some(name.to_string());
    }

    pub fn finish(self) -> Headers {
        self.headers
    }
}

impl<S: AsRef<str>> FromIterator<S> for Headers {
    fn from_iter<I: IntoIterator<Item = S>>(lines: I) -> Self {
        let mut acc = HeaderAccumulator::new();
        for line in lines {
            acc.push_line(line.as_ref());
        }
        acc.finish()
    }
}
