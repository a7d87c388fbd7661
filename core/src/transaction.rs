//! Execution of a single RETS transaction.
//!
//! # Design
//! [`TransactionEngine::execute`] resolves an endpoint against the server
//! address, appends the encoded arguments, attaches the static protocol
//! headers (and the UA digest when enabled), sends the request through the
//! transport and folds the response headers back into [`SessionState`].
//! Every call returns a fresh [`TransactionResult`]; nothing about the
//! previous response is kept besides the session state.

use std::borrow::Cow;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::auth::ua_digest;
use crate::config::Options;
use crate::error::{Result, RetsError};
use crate::header::Headers;
use crate::http::{HttpRequest, HttpResponse};
use crate::session::{ServerAddress, SessionState};
use crate::transport::Transport;
use crate::xml;

/// Query-string component set: everything but unreserved characters.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

const SESSION_COOKIE: &str = "RETS-Session-ID=";

/// The outcome of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// The URL actually requested, query string included.
    pub url: String,
}

impl TransactionResult {
    pub fn body_text(&self) -> Cow<'_, str> {
        xml::decode_text(&self.body)
    }
}

/// Runs transactions against one server and owns the session state they
/// update.
pub struct TransactionEngine<T> {
    transport: T,
    address: ServerAddress,
    static_headers: Vec<(String, String)>,
    ua_password: Option<String>,
    ua_request_id: String,
    legacy_ua_auth: bool,
    state: SessionState,
}

impl<T: Transport> TransactionEngine<T> {
    /// UA authentication is on when a UA password is given or the options
    /// force it.
    pub fn new(transport: T, address: ServerAddress, options: &Options, ua_password: Option<String>) -> Self {
        let mut static_headers = vec![
            ("RETS-Version".to_string(), options.rets_version.clone()),
            ("User-Agent".to_string(), options.user_agent.clone()),
        ];
        if options.rets_version == "RETS/1.5" {
            static_headers.push(("Accept".to_string(), "*/*".to_string()));
        }
        let ua_password = match ua_password {
            Some(password) => Some(password),
            None if options.force_ua_authentication => Some(String::new()),
            None => None,
        };
        Self {
            transport,
            address,
            static_headers,
            ua_password,
            ua_request_id: options.ua_request_id.clone(),
            legacy_ua_auth: options.use_interealty_ua_auth,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Absolute URL for `endpoint`: used as-is when it names a host,
    /// otherwise joined onto the server origin.
    pub fn resolve(&self, endpoint: &str) -> String {
        if endpoint.contains("://") {
            return endpoint.to_string();
        }
        if endpoint.starts_with('/') {
            format!("{}{}", self.address.origin(), endpoint)
        } else {
            format!("{}/{}", self.address.origin(), endpoint)
        }
    }

    pub fn execute(&mut self, endpoint: &str, params: &[(String, String)]) -> Result<TransactionResult> {
        if endpoint.trim().is_empty() {
            return Err(RetsError::Configuration(
                "transaction requested with an empty endpoint (failed login?)".to_string(),
            ));
        }

        let mut url = self.resolve(endpoint);
        let query = encode_query(params);
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }

        let mut headers = self.static_headers.clone();
        if let Some(ua_password) = &self.ua_password {
            let session_id = if self.legacy_ua_auth {
                ""
            } else {
                self.state.session_id.as_deref().unwrap_or_default()
            };
            let digest = ua_digest(
                self.header("User-Agent"),
                ua_password,
                &self.ua_request_id,
                session_id,
                self.header("RETS-Version"),
            );
            headers.push(("RETS-UA-Authorization".to_string(), format!("Digest {digest}")));
        }

        let request = HttpRequest { url, headers };
        let HttpResponse {
            status,
            header_lines,
            body,
        } = self.transport.send(&request)?;
        let headers: Headers = header_lines.iter().collect();
        tracing::debug!(url = %request.url, status, bytes = body.len(), "RETS transaction");

        if !(200..300).contains(&status) {
            return Err(RetsError::Transport {
                status,
                body: xml::decode_text(&body).into_owned(),
            });
        }

        self.observe(&headers);
        Ok(TransactionResult {
            status,
            headers,
            body,
            url: request.url,
        })
    }

    fn header(&self, name: &str) -> &str {
        self.static_headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }

    fn observe(&mut self, headers: &Headers) {
        if let Some(challenge) = headers.get("WWW-Authenticate") {
            if challenge.contains("Basic") {
                self.state.supports_basic = true;
            }
            if challenge.contains("Digest") {
                self.state.supports_digest = true;
            }
        }
        if let Some(version) = headers.get("RETS-Version") {
            self.state.server_version = Some(version.to_string());
        }
        if let Some(server) = headers.get("Server") {
            self.state.server_software = Some(server.to_string());
        }
        if let Some(session_id) = headers.get("Set-Cookie").and_then(session_cookie) {
            self.state.session_id = Some(session_id.to_string());
        }
    }
}

/// Serialise ordered arguments as `name=value&...`.
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(name, QUERY_COMPONENT),
                utf8_percent_encode(value, QUERY_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// The `RETS-Session-ID` value in a `Set-Cookie` header, up to the next `;`
/// or whitespace.
fn session_cookie(set_cookie: &str) -> Option<&str> {
    let start = set_cookie.find(SESSION_COOKIE)? + SESSION_COOKIE.len();
    let rest = &set_cookie[start..];
    let end = rest.find(|c: char| c == ';' || c.is_whitespace()).unwrap_or(rest.len());
    Some(&rest[..end])
}
