//! Object (photo/document) retrieval.
//!
//! # Design
//! A `GetObject` reply is either one object described by the top-level
//! response headers, or a multipart body packing several objects. Each
//! part is decoded independently: a part whose payload is an XML envelope
//! with a nonzero reply code becomes a failed [`ObjectRecord`] carrying that
//! code, while its siblings still succeed. Payloads are handled as bytes
//! throughout so binary images survive untouched.

use serde::Serialize;

use crate::error::{Result, RetsError};
use crate::header::Headers;
use crate::transaction::TransactionEngine;
use crate::transport::Transport;
use crate::xml;

const CRLF: &[u8] = b"\r\n";

/// Top-level response headers copied onto a single-object record.
const OBJECT_HEADERS: [&str; 7] = [
    "Content-ID",
    "Object-ID",
    "Content-Type",
    "MIME-Version",
    "Location",
    "Preferred",
    "Content-Description",
];

/// Failure reported by the server for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectError {
    pub code: u32,
    pub text: String,
}

/// One retrieved object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub content_id: Option<String>,
    pub object_id: Option<String>,
    pub content_type: Option<String>,
    pub mime_version: Option<String>,
    pub location: Option<String>,
    pub preferred: Option<String>,
    pub content_description: Option<String>,
    /// Every header of this object, with `Description` and `Content-type`
    /// already renamed to their canonical forms.
    pub headers: Headers,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub length: usize,
    pub success: bool,
    pub error: Option<ObjectError>,
}

impl ObjectRecord {
    fn from_parts(headers: Headers, data: Vec<u8>) -> Self {
        let field = |name: &str| headers.get(name).map(str::to_string);
        let mut record = ObjectRecord {
            content_id: field("Content-ID"),
            object_id: field("Object-ID"),
            content_type: field("Content-Type"),
            mime_version: field("MIME-Version"),
            location: field("Location"),
            preferred: field("Preferred"),
            content_description: field("Content-Description"),
            length: data.len(),
            success: true,
            error: None,
            headers,
            data,
        };
        record.check_embedded_error();
        record
    }

    /// An XML payload may be a RETS error for just this object.
    fn check_embedded_error(&mut self) {
        let is_xml = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("xml"));
        if !is_xml || self.data.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        if let Err(RetsError::Protocol { code, text }) = xml::parse(&self.data) {
            self.success = false;
            self.error = Some(ObjectError { code, text });
        }
    }

    /// The payload as text, for location-only requests and XML errors.
    pub fn data_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Arguments of a `GetObject` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRequest {
    pub resource: String,
    pub object_type: String,
    /// Record ids; each entry may itself be a comma-separated list.
    pub ids: Vec<String>,
    /// A single index, a `:` or `,` separated list, or `*`.
    pub indices: String,
    /// Ask for URLs instead of object payloads.
    pub location: bool,
}

impl ObjectRequest {
    pub fn new(resource: &str, object_type: &str, ids: &[&str], indices: &str) -> Self {
        Self {
            resource: resource.to_string(),
            object_type: object_type.to_string(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
            indices: indices.to_string(),
            location: false,
        }
    }

    pub fn location(mut self, location: bool) -> Self {
        self.location = location;
        self
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("Resource".to_string(), self.resource.clone()),
            ("Type".to_string(), self.object_type.clone()),
            ("ID".to_string(), build_object_id(&self.ids, &self.indices)),
            ("Location".to_string(), if self.location { "1" } else { "0" }.to_string()),
        ]
    }
}

/// Composite `ID` argument: `id:i1:i2` per record id, groups joined by `,`.
pub fn build_object_id<S: AsRef<str>>(ids: &[S], indices: &str) -> String {
    let indices = indices
        .split(|c| c == ',' || c == ':')
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .collect::<Vec<_>>()
        .join(":");
    let indices = if indices.is_empty() { "*".to_string() } else { indices };

    ids.iter()
        .flat_map(|id| id.as_ref().split(','))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| format!("{id}:{indices}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn fetch_objects<T: Transport>(
    engine: &mut TransactionEngine<T>,
    endpoint: &str,
    request: &ObjectRequest,
) -> Result<Vec<ObjectRecord>> {
    let result = engine.execute(endpoint, &request.params())?;
    let records = decode(&result.headers, result.body);
    tracing::debug!(
        resource = %request.resource,
        objects = records.len(),
        failed = records.iter().filter(|r| !r.success).count(),
        "GetObject decoded"
    );
    Ok(records)
}

/// Decode a `GetObject` response into records, in wire order.
pub fn decode(headers: &Headers, body: Vec<u8>) -> Vec<ObjectRecord> {
    let content_type = headers.get("Content-Type").unwrap_or_default();
    if content_type.to_ascii_lowercase().contains("multipart") {
        match boundary(content_type) {
            Some(boundary) => return decode_multipart(&boundary, &body),
            None => tracing::warn!(content_type, "multipart response without a boundary"),
        }
    }
    vec![single_record(headers, body)]
}

fn single_record(headers: &Headers, body: Vec<u8>) -> ObjectRecord {
    let mut object_headers = Headers::new();
    if let Some(description) = headers.get("Description").filter(|d| !d.is_empty()) {
        object_headers.insert("Content-Description", description);
    }
    for name in OBJECT_HEADERS {
        if let Some(value) = headers.get(name) {
            object_headers.insert(name, value);
        }
    }
    ObjectRecord::from_parts(object_headers, body)
}

/// The boundary parameter of a multipart `Content-Type`, quotes removed.
pub fn boundary(content_type: &str) -> Option<String> {
    let start = content_type.to_ascii_lowercase().find("boundary=")? + "boundary=".len();
    let rest = &content_type[start..];
    let token = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => {
            let end = rest
                .find(|c: char| c == ';' || c.is_whitespace())
                .unwrap_or(rest.len());
            rest[..end].trim_matches('"')
        }
    };
    (!token.is_empty()).then(|| token.to_string())
}

fn decode_multipart(boundary: &str, body: &[u8]) -> Vec<ObjectRecord> {
    let delimiter = format!("\r\n--{boundary}\r\n").into_bytes();
    let close = format!("\r\n--{boundary}--").into_bytes();

    // Canonical framing: CRLF before the first delimiter, every part
    // followed by a delimiter.
    let mut framed = Vec::with_capacity(body.len() + 2 * delimiter.len());
    framed.extend_from_slice(CRLF);
    framed.extend_from_slice(body);
    match find(&framed, &close) {
        Some(end) => framed.truncate(end),
        None if framed.ends_with(CRLF) => framed.truncate(framed.len() - CRLF.len()),
        None => {}
    }
    framed.extend_from_slice(&delimiter);

    let segments = split(&framed, &delimiter);
    let parts = match segments.len() {
        0..=2 => &[][..],
        n => &segments[1..n - 1],
    };
    parts.iter().map(|part| decode_part(part)).collect()
}

/// Header block up to the first blank line, then the payload.
fn decode_part(part: &[u8]) -> ObjectRecord {
    let (head, data) = if let Some(rest) = part.strip_prefix(CRLF) {
        (&[][..], rest)
    } else {
        match find(part, b"\r\n\r\n") {
            Some(i) => (&part[..i], &part[i + 4..]),
            None => (part, &[][..]),
        }
    };

    let mut headers = Headers::new();
    for line in String::from_utf8_lossy(head).split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = match name.trim() {
            "" => continue,
            "Description" => "Content-Description",
            other if other.eq_ignore_ascii_case("Content-Type") => "Content-Type",
            other => other,
        };
        headers.insert(name, value.trim());
    }
    ObjectRecord::from_parts(headers, data.to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split<'a>(mut haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    while let Some(i) = find(haystack, needle) {
        out.push(&haystack[..i]);
        haystack = &haystack[i + needle.len()..];
    }
    out.push(haystack);
    out
}
