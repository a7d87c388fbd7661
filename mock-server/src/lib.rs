//! In-memory RETS server for integration tests.
//!
//! Serves a fixed set of seven listings behind HTTP authentication (Basic by
//! default, Digest with [`AuthMode::Digest`]) and a `RETS-Session-ID`
//! cookie. Search pages at most [`PAGE_SIZE`] rows per reply and marks
//! truncated pages with `MAXROWS`; objects come back as a multipart body
//! unless exactly one is requested.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const USERNAME: &str = "agent";
pub const PASSWORD: &str = "secret";
pub const REALM: &str = "mock-rets";

/// Rows returned per search reply before `MAXROWS` is set.
pub const PAGE_SIZE: usize = 3;
pub const PHOTOS_PER_LISTING: u32 = 2;
pub const BOUNDARY: &str = "mock-rets-boundary";

pub const NO_RECORDS: u32 = 20201;
pub const NO_OBJECT: u32 = 20403;
pub const INVALID_TYPE: u32 = 20501;
pub const NOT_LOGGED_IN: u32 = 20701;

const RETS_VERSION: HeaderName = HeaderName::from_static("rets-version");
const SERVER_SOFTWARE: &str = concat!("MockRETS/", env!("CARGO_PKG_VERSION"));
const TEXT_XML: &str = "text/xml";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listing {
    pub id: &'static str,
    pub price: u32,
    pub city: &'static str,
}

pub fn listings() -> Vec<Listing> {
    [
        ("L1", 250_000, "Springfield"),
        ("L2", 315_000, "Shelbyville"),
        ("L3", 189_900, "Springfield"),
        ("L4", 420_000, "Ogdenville"),
        ("L5", 275_500, "Springfield"),
        ("L6", 199_000, "North Haverbrook"),
        ("L7", 510_000, "Capital City"),
    ]
    .into_iter()
    .map(|(id, price, city)| Listing { id, price, city })
    .collect()
}

/// Open session ids.
pub type Sessions = Arc<RwLock<HashSet<String>>>;

/// HTTP authentication scheme the server challenges with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    Basic,
    /// RFC 2617 Digest with `qop=auth`. Each nonce only accepts increasing
    /// nonce counts.
    Digest,
}

/// Shared server state. Clones share sessions and nonces, so a test can keep
/// one to inspect what the server saw.
#[derive(Clone, Default)]
pub struct MockState {
    sessions: Sessions,
    auth: AuthMode,
    /// Highest accepted nonce count per issued Digest nonce.
    nonces: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockState {
    pub fn new(auth: AuthMode) -> Self {
        Self {
            auth,
            ..Self::default()
        }
    }

    /// Highest accepted nonce count of every Digest nonce issued so far.
    pub fn nonce_counts(&self) -> Vec<u32> {
        let nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
        nonces.values().copied().collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SearchParams {
    pub class: Option<String>,
    pub query: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ObjectParams {
    pub resource: Option<String>,
    #[serde(rename = "Type")]
    pub object_type: Option<String>,
    #[serde(rename = "ID")]
    pub id: String,
    pub location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MetadataParams {
    #[serde(rename = "Type")]
    pub metadata_type: Option<String>,
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

pub fn app() -> Router {
    router(MockState::default())
}

pub fn router(state: MockState) -> Router {
    Router::new()
        .route("/rets/login", get(login))
        .route("/rets/action", get(action))
        .route("/rets/search", get(search))
        .route("/rets/getobject", get(get_object))
        .route("/rets/getmetadata", get(get_metadata))
        .route("/rets/logout", get(logout))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, MockState::default()).await
}

pub async fn serve(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

// --- responses ---

fn reply(code: u32, text: &str) -> String {
    format!("<RETS ReplyCode=\"{code}\" ReplyText=\"{text}\"/>")
}

fn xml(body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, TEXT_XML),
            (RETS_VERSION, "RETS/1.7.2"),
            (header::SERVER, SERVER_SOFTWARE),
        ],
        body,
    )
        .into_response()
}

fn challenge(state: &MockState) -> Response {
    let value = match state.auth {
        AuthMode::Basic => format!("Basic realm=\"{REALM}\""),
        AuthMode::Digest => {
            let nonce = Uuid::new_v4().simple().to_string();
            state
                .nonces
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(nonce.clone(), 0);
            format!("Digest realm=\"{REALM}\", nonce=\"{nonce}\", opaque=\"mock\", qop=\"auth\"")
        }
    };
    let mut response = (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

// --- request checks ---

enum Credentials {
    Missing,
    Invalid,
    Valid,
}

fn credentials(state: &MockState, uri: &Uri, headers: &HeaderMap) -> Credentials {
    let Some(authorization) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Credentials::Missing;
    };
    match state.auth {
        AuthMode::Basic => match authorization.strip_prefix("Basic ") {
            Some(encoded) => basic_credentials(encoded),
            None => Credentials::Missing,
        },
        AuthMode::Digest => match authorization.strip_prefix("Digest ") {
            Some(params) => digest_credentials(state, uri, &digest_params(params)),
            None => Credentials::Missing,
        },
    }
}

fn basic_credentials(encoded: &str) -> Credentials {
    let decoded = STANDARD.decode(encoded.trim()).ok().and_then(|b| String::from_utf8(b).ok());
    match decoded.as_deref().and_then(|d| d.split_once(':')) {
        Some((user, pass)) if user == USERNAME && pass == PASSWORD => Credentials::Valid,
        _ => Credentials::Invalid,
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// `key=value` pairs of a Digest `Authorization` header; quotes stripped,
/// keys lowercased.
fn digest_params(value: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = value.trim();
    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, tail) = match after.strip_prefix('"') {
            Some(quoted) => quoted.split_once('"').unwrap_or((quoted, "")),
            None => after.split_once(',').unwrap_or((after, "")),
        };
        params.insert(key, value.trim().to_string());
        rest = tail.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

/// Check a Digest answer. An unknown nonce or a nonce count that does not
/// increase is treated as missing, so the client gets a fresh challenge.
fn digest_credentials(state: &MockState, uri: &Uri, params: &HashMap<String, String>) -> Credentials {
    let get = |key: &str| params.get(key).map(String::as_str).unwrap_or_default();
    let request_uri = uri.path_and_query().map_or("/", |pq| pq.as_str());
    if get("username") != USERNAME || get("uri") != request_uri || get("qop") != "auth" {
        return Credentials::Invalid;
    }
    let Ok(nc) = u32::from_str_radix(get("nc"), 16) else {
        return Credentials::Invalid;
    };

    let mut nonces = state.nonces.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(last) = nonces.get_mut(get("nonce")) else {
        return Credentials::Missing;
    };
    if nc <= *last {
        return Credentials::Missing;
    }

    let ha1 = md5_hex(&format!("{USERNAME}:{REALM}:{PASSWORD}"));
    let ha2 = md5_hex(&format!("GET:{request_uri}"));
    let expected = md5_hex(&format!(
        "{ha1}:{}:{}:{}:auth:{ha2}",
        get("nonce"),
        get("nc"),
        get("cnonce")
    ));
    if get("response") != expected {
        return Credentials::Invalid;
    }
    *last = nc;
    Credentials::Valid
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| pair.trim().strip_prefix("RETS-Session-ID="))
        .map(str::to_string)
}

/// Authenticated request carrying a live session, or the response to send
/// instead.
async fn authorize(state: &MockState, uri: &Uri, headers: &HeaderMap) -> Result<String, Response> {
    match credentials(state, uri, headers) {
        Credentials::Missing => return Err(challenge(state)),
        Credentials::Invalid => return Err(xml(reply(401, "Invalid username or password"))),
        Credentials::Valid => {}
    }
    let id = session_id(headers).unwrap_or_default();
    if state.sessions.read().await.contains(&id) {
        Ok(id)
    } else {
        Err(xml(reply(NOT_LOGGED_IN, "Not logged in")))
    }
}

// --- handlers ---

async fn login(State(state): State<MockState>, uri: Uri, headers: HeaderMap) -> Response {
    match credentials(&state, &uri, &headers) {
        Credentials::Missing => return challenge(&state),
        Credentials::Invalid => return xml(reply(401, "Invalid username or password")),
        Credentials::Valid => {}
    }

    let id = Uuid::new_v4().simple().to_string();
    state.sessions.write().await.insert(id.clone());
    tracing::info!(session = %id, "login");

    let body = [
        "<RETS ReplyCode=\"0\" ReplyText=\"Operation Successful\">",
        "<RETS-RESPONSE>",
        "MemberName=Jane Doe",
        "User=agent,1,AGENT,agent",
        "Broker=MOCK",
        "MetadataVersion=1.00.000",
        "MinMetadataVersion=1.00.000",
        "TimeoutSeconds=1800",
        "Action=/rets/action",
        "Search=/rets/search",
        "GetObject=/rets/getobject",
        "GetMetadata=/rets/getmetadata",
        "Logout=/rets/logout",
        "</RETS-RESPONSE>",
        "</RETS>",
    ]
    .join("\r\n");

    let mut response = xml(body);
    if let Ok(cookie) = format!("RETS-Session-ID={id}; path=/").parse() {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

async fn action(State(state): State<MockState>, uri: Uri, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &uri, &headers).await {
        return response;
    }
    ([(header::CONTENT_TYPE, "text/plain")], "Welcome to the mock MLS").into_response()
}

async fn search(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    if let Err(response) = authorize(&state, &uri, &headers).await {
        return response;
    }
    if params.class.as_deref() != Some("RES") {
        return xml(reply(NO_RECORDS, "No Records Found"));
    }

    let all = listings();
    let offset = params.offset.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(usize::MAX).min(PAGE_SIZE);
    let page: Vec<&Listing> = all.iter().skip(offset - 1).take(limit).collect();
    if page.is_empty() {
        return xml(reply(NO_RECORDS, "No Records Found"));
    }
    tracing::debug!(query = ?params.query, offset, rows = page.len(), "search");

    let mut body = format!(
        "<RETS ReplyCode=\"0\" ReplyText=\"Operation Successful\">\n\
<COUNT Records=\"{}\"/>\n<DELIMITER value=\"09\"/>\n<COLUMNS>\tListingID\tListPrice\tCity\t</COLUMNS>\n",
        all.len()
    );
    for listing in &page {
        body.push_str(&format!(
            "<DATA>\t{}\t{}\t{}\t</DATA>\n",
            listing.id, listing.price, listing.city
        ));
    }
    if offset - 1 + page.len() < all.len() {
        body.push_str("<MAXROWS/>\n");
    }
    body.push_str("</RETS>\n");
    xml(body)
}

/// `ID=L1:1:2,L2:*` as (listing, index) pairs.
fn requested_objects(id: &str) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    for group in id.split(',').filter(|g| !g.is_empty()) {
        let mut parts = group.split(':');
        let listing = parts.next().unwrap_or_default().to_string();
        let indices: Vec<&str> = parts.collect();
        if indices.is_empty() || indices.contains(&"*") {
            out.extend((1..=PHOTOS_PER_LISTING).map(|i| (listing.clone(), i)));
        } else {
            out.extend(indices.iter().filter_map(|i| i.parse().ok()).map(|i| (listing.clone(), i)));
        }
    }
    out
}

fn photo(listing: &str, index: u32) -> Vec<u8> {
    let mut data = vec![0xff, 0xd8, 0xff, 0xe0];
    data.extend_from_slice(format!("photo {listing}-{index}").as_bytes());
    data
}

async fn get_object(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<ObjectParams>,
) -> Response {
    if let Err(response) = authorize(&state, &uri, &headers).await {
        return response;
    }
    let location = params.location.as_deref() == Some("1");
    let requested = requested_objects(&params.id);
    let known: HashSet<&str> = listings().iter().map(|l| l.id).collect();

    if let [(listing, index)] = requested.as_slice() {
        if known.contains(listing.as_str()) && *index <= PHOTOS_PER_LISTING {
            return (
                [
                    (header::CONTENT_TYPE, "image/jpeg".to_string()),
                    (HeaderName::from_static("content-id"), listing.clone()),
                    (HeaderName::from_static("object-id"), index.to_string()),
                ],
                photo(listing, *index),
            )
                .into_response();
        }
    }

    let mut body = Vec::new();
    for (listing, index) in &requested {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        if !known.contains(listing.as_str()) || *index > PHOTOS_PER_LISTING {
            body.extend_from_slice(
                format!(
                    "Content-ID: {listing}\r\nObject-ID: {index}\r\nContent-Type: text/xml\r\n\r\n{}\r\n",
                    reply(NO_OBJECT, "No Object Found")
                )
                .as_bytes(),
            );
            continue;
        }
        body.extend_from_slice(
            format!("Content-ID: {listing}\r\nObject-ID: {index}\r\nDescription: Photo {index}\r\n").as_bytes(),
        );
        if location {
            body.extend_from_slice(
                format!("Content-Type: image/jpeg\r\nLocation: http://cdn.mock-rets.test/{listing}/{index}.jpg\r\n\r\n\r\n")
                    .as_bytes(),
            );
        } else {
            body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&photo(listing, *index));
            body.extend_from_slice(b"\r\n");
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    tracing::debug!(
        resource = ?params.resource,
        object_type = ?params.object_type,
        objects = requested.len(),
        "getobject"
    );

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/parallel; boundary=\"{BOUNDARY}\""),
        )],
        body,
    )
        .into_response()
}

async fn get_metadata(
    State(state): State<MockState>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<MetadataParams>,
) -> Response {
    if let Err(response) = authorize(&state, &uri, &headers).await {
        return response;
    }
    tracing::debug!(metadata_type = ?params.metadata_type, id = ?params.id, "getmetadata");
    match params.metadata_type.as_deref() {
        Some("METADATA-SYSTEM") => xml(
            "<RETS ReplyCode=\"0\" ReplyText=\"Operation Successful\">\n\
<METADATA>\n<METADATA-SYSTEM Version=\"1.00.000\" Date=\"2024-01-01T00:00:00Z\">\n\
<SYSTEM SystemID=\"MOCK\" SystemDescription=\"Mock RETS Server\" TimeZoneOffset=\"-05:00\">\n\
<Comments>Integration test fixture</Comments>\n</SYSTEM>\n\
</METADATA-SYSTEM>\n</METADATA>\n</RETS>\n"
                .to_string(),
        ),
        Some("METADATA-RESOURCE") => xml(
            "<RETS ReplyCode=\"0\" ReplyText=\"Operation Successful\">\n\
<METADATA>\n<METADATA-RESOURCE Version=\"1.00.000\" Date=\"2024-01-01T00:00:00Z\">\n\
<Resource><ResourceID>Property</ResourceID><StandardName>Property</StandardName>\
<KeyField>ListingID</KeyField><ClassCount>1</ClassCount></Resource>\n\
</METADATA-RESOURCE>\n</METADATA>\n</RETS>\n"
                .to_string(),
        ),
        _ => xml(reply(INVALID_TYPE, "Unknown Metadata Type")),
    }
}

async fn logout(State(state): State<MockState>, uri: Uri, headers: HeaderMap) -> Response {
    let id = match authorize(&state, &uri, &headers).await {
        Ok(id) => id,
        Err(response) => return response,
    };
    state.sessions.write().await.remove(&id);
    tracing::info!(session = %id, "logout");
    xml(
        "<RETS ReplyCode=\"0\" ReplyText=\"Logging out\">\n<RETS-RESPONSE>\nConnectTime=1\n</RETS-RESPONSE>\n</RETS>\n"
            .to_string(),
    )
}
