//! Search transactions, pagination and row cursors.
//!
//! # Design
//! [`SearchPager::search`] allocates a fresh [`SearchCursor`] and drives the
//! paging loop: request, interpret, ingest rows, and follow `MAXROWS` with a
//! higher `Offset` while cross-request paging is enabled. Rows are buffered
//! raw inside a [`RowBuffer`] that owns its column schema and delimiter; it
//! is a consuming iterator, so a cursor can be read exactly once.
//!
//! A request counter per cursor guards against servers that ignore
//! `Offset` and keep answering with the same page forever.

use std::collections::{BTreeMap, VecDeque};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::Options;
use crate::error::{Result, RetsError};
use crate::transaction::TransactionEngine;
use crate::transport::Transport;
use crate::xml::{self, Envelope};

/// Number of the sub-request at which a paging search is aborted.
pub const ABUSE_GUARD_LIMIT: u32 = 300;

const ABUSE_GUARD_WARNING: u32 = 250;

/// Field separator assumed until the server declares one.
const DEFAULT_DELIMITER: char = '\t';

pub type CursorId = u32;

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// Wrap a DMQL fragment in parentheses unless it is `*` or already wrapped.
pub fn wrap_query(query: &str) -> String {
    if query == "*" || (query.starts_with('(') && query.ends_with(')')) {
        query.to_string()
    } else {
        format!("({query})")
    }
}

/// Build `(field=value),(field=value)` from pairs, in iteration order.
pub fn prepare_query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|(field, value)| format!("({}={})", field.as_ref(), value.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Arguments of a search, with the protocol defaults pre-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    args: Vec<(String, Option<String>)>,
    query: String,
    offset: Option<String>,
    single_page: bool,
}

impl SearchRequest {
    pub fn new(resource: &str, class: &str, query: &str) -> Self {
        let args = [
            ("QueryType", Some("DMQL2")),
            ("SearchType", Some(resource)),
            ("Class", Some(class)),
            ("Count", Some("1")),
            ("Format", Some("COMPACT-DECODED")),
            ("Limit", Some("99999999")),
            ("StandardNames", Some("0")),
            ("Select", None),
            ("RestrictedIndicator", Some("*************")),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
        .collect();
        Self {
            args,
            query: wrap_query(query),
            offset: None,
            single_page: false,
        }
    }

    /// Set or add an argument. `Query` and `Offset` are routed to their
    /// dedicated slots.
    pub fn param(mut self, name: &str, value: &str) -> Self {
        match name {
            "Query" => self.query = wrap_query(value),
            "Offset" => self.offset = Some(value.to_string()),
            _ => match self.args.iter_mut().find(|(key, _)| key == name) {
                Some((_, slot)) => *slot = Some(value.to_string()),
                None => self.args.push((name.to_string(), Some(value.to_string()))),
            },
        }
        self
    }

    pub fn limit(self, limit: u32) -> Self {
        self.param("Limit", &limit.to_string())
    }

    /// Comma-separated list of fields to return.
    pub fn select(self, fields: &str) -> Self {
        self.param("Select", fields)
    }

    pub fn offset(self, offset: u32) -> Self {
        self.param("Offset", &offset.to_string())
    }

    pub fn format(self, format: &str) -> Self {
        self.param("Format", format)
    }

    pub fn query_type(self, query_type: &str) -> Self {
        self.param("QueryType", query_type)
    }

    pub fn standard_names(self, standard_names: bool) -> Self {
        self.param("StandardNames", if standard_names { "1" } else { "0" })
    }

    /// Issue one request only, even when offset paging is enabled.
    pub fn single_page(mut self) -> Self {
        self.single_page = true;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    fn params(&self, offset: Option<&str>) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .args
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.clone(), v.clone())))
            .collect();
        params.push(("Query".to_string(), self.query.clone()));
        if let Some(offset) = offset {
            params.push(("Offset".to_string(), offset.to_string()));
        }
        params
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One decoded row: column names paired with values, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Buffered raw rows plus the schema needed to decode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBuffer {
    columns: Vec<String>,
    delimiter: char,
    raw: VecDeque<String>,
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_DELIMITER)
    }
}

impl RowBuffer {
    pub fn new(columns: Vec<String>, delimiter: char) -> Self {
        Self {
            columns,
            delimiter,
            raw: VecDeque::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Rows not yet read.
    pub fn remaining(&self) -> usize {
        self.raw.len()
    }

    fn set_schema(&mut self, delimiter: char, columns_line: &str) {
        self.delimiter = delimiter;
        self.columns = strip_delimiter(columns_line, delimiter)
            .split(delimiter)
            .map(str::to_string)
            .collect();
    }

    /// Buffer one `DATA` row, minus its framing delimiters. An empty row
    /// carries no values and is dropped.
    pub fn push(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        self.raw.push_back(strip_delimiter(raw, self.delimiter).to_string());
    }

    fn decode(&self, raw: &str) -> Row {
        let mut values = raw.split(self.delimiter);
        let fields = self
            .columns
            .iter()
            .map(|name| (name.clone(), values.next().unwrap_or_default().to_string()))
            .collect();
        Row { fields }
    }
}

impl Iterator for RowBuffer {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let raw = self.raw.pop_front()?;
        Some(self.decode(&raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.len(), Some(self.raw.len()))
    }
}

/// Remove one leading and one trailing delimiter.
fn strip_delimiter(line: &str, delimiter: char) -> &str {
    let line = line.strip_prefix(delimiter).unwrap_or(line);
    line.strip_suffix(delimiter).unwrap_or(line)
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// State of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCursor {
    pub id: CursorId,
    /// `COUNT Records` as reported by the server.
    pub total_records: u64,
    /// Rows received across every page.
    pub returned: usize,
    pub maxrows_reached: bool,
    pub requests: u32,
    /// Released by [`SearchPager::free`]; the counters above survive.
    rows: Option<RowBuffer>,
}

impl SearchCursor {
    fn new(id: CursorId) -> Self {
        Self {
            id,
            total_records: 0,
            returned: 0,
            maxrows_reached: false,
            requests: 0,
            rows: Some(RowBuffer::default()),
        }
    }

    pub fn rows(&self) -> Option<&RowBuffer> {
        self.rows.as_ref()
    }

    /// Hand the row iterator to the caller, leaving the cursor freed.
    pub fn take_rows(&mut self) -> Option<RowBuffer> {
        self.rows.take()
    }

    fn ingest(&mut self, envelope: &Envelope) -> Result<()> {
        let root = &envelope.root;
        let Some(rows) = self.rows.as_mut() else {
            return Ok(());
        };

        if let Some(delimiter) = root.child("DELIMITER") {
            let value = delimiter.attr("value").unwrap_or_default().trim();
            let delimiter = value
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| RetsError::XmlParse(format!("invalid DELIMITER value {value:?}")))?;
            let columns = root.child("COLUMNS").map(|c| c.text.as_str()).unwrap_or_default();
            rows.set_schema(delimiter, columns);
        }

        for data in root.children("DATA") {
            rows.push(&data.text);
            self.returned += 1;
        }

        if root.child("MAXROWS").is_some() {
            self.maxrows_reached = true;
        }

        if let Some(records) = root.child("COUNT").and_then(|c| c.attr("Records")) {
            self.total_records = records.trim().parse().unwrap_or(self.total_records);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pager
// ---------------------------------------------------------------------------

/// Owns every cursor of a session.
#[derive(Debug)]
pub struct SearchPager {
    next_id: CursorId,
    cursors: BTreeMap<CursorId, SearchCursor>,
    last_id: Option<CursorId>,
}

impl Default for SearchPager {
    fn default() -> Self {
        Self {
            next_id: 1,
            cursors: BTreeMap::new(),
            last_id: None,
        }
    }
}

impl SearchPager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a search to completion and return its cursor id.
    ///
    /// The cursor is registered before the first request, so counters of a
    /// failed search stay inspectable.
    pub fn search<T: Transport>(
        &mut self,
        engine: &mut TransactionEngine<T>,
        endpoint: &str,
        request: &SearchRequest,
        options: &Options,
    ) -> Result<CursorId> {
        let id = self.next_id;
        self.next_id += 1;
        self.last_id = Some(id);
        let cursor = self.cursors.entry(id).or_insert_with(|| SearchCursor::new(id));

        let paging = options.offset_support && !request.single_page;
        let mut offset = request
            .offset
            .clone()
            .or_else(|| options.offset_support.then(|| "1".to_string()));

        loop {
            cursor.maxrows_reached = false;
            cursor.requests += 1;
            if !options.override_offset_protection {
                if cursor.requests >= ABUSE_GUARD_LIMIT {
                    return Err(RetsError::AbuseGuard {
                        requests: cursor.requests,
                    });
                }
                if cursor.requests == ABUSE_GUARD_WARNING {
                    tracing::warn!(cursor = id, requests = cursor.requests, "search is approaching the request limit");
                }
            }

            let result = engine.execute(endpoint, &request.params(offset.as_deref()))?;
            let body = if options.disable_encoding_fix {
                result.body
            } else {
                repair_encoding(&result.body)
            };
            let envelope = xml::parse(&body)?;
            cursor.ingest(&envelope)?;
            tracing::debug!(
                cursor = id,
                page = cursor.requests,
                returned = cursor.returned,
                maxrows = cursor.maxrows_reached,
                "search page"
            );

            if cursor.maxrows_reached && paging {
                offset = Some((cursor.returned + 1).to_string());
            } else {
                break;
            }
        }
        Ok(id)
    }

    /// Next row of a cursor; `None` when exhausted, freed or unknown.
    pub fn fetch_row(&mut self, id: CursorId) -> Option<Row> {
        self.cursors.get_mut(&id)?.rows.as_mut()?.next()
    }

    /// Release a cursor's buffered rows. Returns whether the cursor exists.
    pub fn free(&mut self, id: CursorId) -> bool {
        match self.cursors.get_mut(&id) {
            Some(cursor) => {
                cursor.rows = None;
                true
            }
            None => false,
        }
    }

    pub fn cursor(&self, id: CursorId) -> Option<&SearchCursor> {
        self.cursors.get(&id)
    }

    pub fn cursor_mut(&mut self, id: CursorId) -> Option<&mut SearchCursor> {
        self.cursors.get_mut(&id)
    }

    pub fn num_rows(&self, id: CursorId) -> Option<usize> {
        self.cursor(id).map(|c| c.returned)
    }

    pub fn total_records_found(&self, id: CursorId) -> Option<u64> {
        self.cursor(id).map(|c| c.total_records)
    }

    pub fn is_maxrows_reached(&self, id: CursorId) -> Option<bool> {
        self.cursor(id).map(|c| c.maxrows_reached)
    }

    /// Column names of a cursor that has not been freed.
    pub fn fields(&self, id: CursorId) -> Option<&[String]> {
        self.cursor(id)?.rows().map(RowBuffer::columns)
    }

    pub fn last_id(&self) -> Option<CursorId> {
        self.last_id
    }
}

// ---------------------------------------------------------------------------
// Encoding repair
// ---------------------------------------------------------------------------

/// Escape stray `& ` sequences and transcode ISO-8859-1 bodies to UTF-8.
pub fn repair_encoding(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'&' && bytes.peek().is_some_and(u8::is_ascii_whitespace) {
            bytes.next();
            out.extend_from_slice(b"&amp; ");
        } else {
            out.push(b);
        }
    }
    match String::from_utf8(out) {
        Ok(text) => text.into_bytes(),
        Err(e) => xml::decode_text(e.as_bytes()).into_owned().into_bytes(),
    }
}
