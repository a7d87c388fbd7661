//! Session-level RETS client.
//!
//! # Design
//! `RetsClient` composes the protocol pieces: a [`TransactionEngine`] over a
//! [`Transport`], the [`Session`] produced by login, and a [`SearchPager`]
//! holding the session's cursors. It carries no protocol logic of its own;
//! every method resolves a capability URL and delegates. A client only
//! exists after a successful login, and every transaction after
//! [`RetsClient::disconnect`] fails with a configuration error.

use std::collections::BTreeMap;

use crate::config::Options;
use crate::error::{Result, RetsError};
use crate::login::{self, LoginUrl};
use crate::metadata::{self, ServerInformation};
use crate::object::{self, ObjectRecord, ObjectRequest};
use crate::search::{CursorId, Row, SearchPager, SearchRequest};
use crate::session::{AuthScheme, Capability, Credentials, Session};
use crate::transaction::{TransactionEngine, TransactionResult};
use crate::transport::{Transport, UreqTransport};
use crate::xml::Envelope;

/// A logged-in RETS session.
pub struct RetsClient<T = UreqTransport> {
    engine: TransactionEngine<T>,
    session: Session,
    pager: SearchPager,
    options: Options,
}

impl RetsClient<UreqTransport> {
    /// Log in over HTTP.
    pub fn connect(login_url: &str, credentials: &Credentials, options: Options) -> Result<Self> {
        let transport = UreqTransport::new(credentials, &options);
        Self::connect_with(transport, login_url, credentials.ua_password.clone(), options)
    }
}

impl<T: Transport> RetsClient<T> {
    /// Log in through a caller-supplied transport.
    pub fn connect_with(transport: T, login_url: &str, ua_password: Option<String>, options: Options) -> Result<Self> {
        let url = LoginUrl::parse(login_url)?;
        let mut engine = TransactionEngine::new(transport, url.address, &options, ua_password);
        let session = login::negotiate(&mut engine, &url.path)?;
        Ok(Self {
            engine,
            session,
            pager: SearchPager::new(),
            options,
        })
    }

    /// Request `Logout` when advertised and mark the session closed.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.session.connected {
            return Ok(());
        }
        let result = match self.session.capabilities.get(Capability::Logout.name()) {
            Some(url) => self.engine.execute(url, &[]).map(|_| ()),
            None => Ok(()),
        };
        self.session.connected = false;
        tracing::info!(host = %self.engine.address().hostname, "logged out");
        result
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Endpoint of a connected session's capability, or a configuration error.
    fn endpoint(&self, capability: Capability) -> Result<String> {
        if !self.session.connected {
            return Err(RetsError::Configuration("not connected".to_string()));
        }
        self.session.capabilities.require(capability).map(str::to_string)
    }

    /// Run a raw transaction against any advertised capability, including
    /// `X-` extensions.
    pub fn transaction(&mut self, capability: &str, params: &[(String, String)]) -> Result<TransactionResult> {
        if !self.session.connected {
            return Err(RetsError::Configuration("not connected".to_string()));
        }
        let url = self
            .session
            .capabilities
            .get(capability)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| RetsError::Configuration(format!("server did not advertise the {capability} capability")))?
            .to_string();
        self.engine.execute(&url, params)
    }

    // --- search ---

    /// Run a search and return its cursor.
    pub fn search_query(&mut self, request: &SearchRequest) -> Result<CursorId> {
        let url = self.endpoint(Capability::Search)?;
        self.pager.search(&mut self.engine, &url, request, &self.options)
    }

    /// Run a search and collect every row. The cursor is left drained.
    pub fn search(&mut self, request: &SearchRequest) -> Result<Vec<Row>> {
        let id = self.search_query(request)?;
        Ok(self
            .pager
            .cursor_mut(id)
            .and_then(|cursor| cursor.take_rows())
            .map(|rows| rows.collect())
            .unwrap_or_default())
    }

    pub fn fetch_row(&mut self, cursor: CursorId) -> Option<Row> {
        self.pager.fetch_row(cursor)
    }

    pub fn free_result(&mut self, cursor: CursorId) -> bool {
        self.pager.free(cursor)
    }

    pub fn num_rows(&self, cursor: CursorId) -> Option<usize> {
        self.pager.num_rows(cursor)
    }

    pub fn total_records_found(&self, cursor: CursorId) -> Option<u64> {
        self.pager.total_records_found(cursor)
    }

    pub fn is_maxrows_reached(&self, cursor: CursorId) -> Option<bool> {
        self.pager.is_maxrows_reached(cursor)
    }

    pub fn search_fields(&self, cursor: CursorId) -> Option<&[String]> {
        self.pager.fields(cursor)
    }

    pub fn last_search_id(&self) -> Option<CursorId> {
        self.pager.last_id()
    }

    // --- objects and metadata ---

    pub fn get_object(&mut self, request: &ObjectRequest) -> Result<Vec<ObjectRecord>> {
        let url = self.endpoint(Capability::GetObject)?;
        object::fetch_objects(&mut self.engine, &url, request)
    }

    pub fn get_metadata(&mut self, metadata_type: &str, id: &str) -> Result<Envelope> {
        let url = self.endpoint(Capability::GetMetadata)?;
        metadata::fetch_metadata(&mut self.engine, &url, metadata_type, id)
    }

    pub fn server_information(&mut self) -> Result<ServerInformation> {
        let url = self.endpoint(Capability::GetMetadata)?;
        metadata::server_information(&mut self.engine, &url)
    }

    // --- session facts ---

    /// `RETS-Version` reported by the server.
    pub fn server_version(&self) -> Option<&str> {
        self.engine.state().server_version.as_deref()
    }

    pub fn server_software(&self) -> Option<&str> {
        self.engine.state().server_software.as_deref()
    }

    /// Session id taken from the server's `RETS-Session-ID` cookie.
    pub fn session_id(&self) -> Option<&str> {
        self.engine.state().session_id.as_deref()
    }

    /// Whether the server advertised `scheme` (`basic` or `digest`).
    pub fn is_auth_type_supported(&self, scheme: &str) -> Result<bool> {
        let scheme: AuthScheme = scheme.parse()?;
        Ok(self.engine.state().supports(scheme))
    }

    pub fn capability_url(&self, name: &str) -> Option<&str> {
        self.session.capabilities.get(name)
    }

    /// Login-response entries that are not capabilities.
    pub fn server_info(&self) -> &BTreeMap<String, String> {
        &self.session.server_info
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn transport(&self) -> &T {
        self.engine.transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::transport::scripted::{with_headers, xml, ScriptedTransport};

    const LOGIN: &str = "<RETS ReplyCode=\"0\"><RETS-RESPONSE>\r\n\
MemberName=Jane Doe\r\n\
Search=/rets/search\r\n\
GetObject=/rets/getobject\r\n\
GetMetadata=/rets/getmetadata\r\n\
Logout=/rets/logout\r\n\
</RETS-RESPONSE></RETS>";

    const SEARCH: &str = "<RETS ReplyCode=\"0\"><COUNT Records=\"1\"/><DELIMITER value=\"9\"/>\
<COLUMNS>\tListingID\t</COLUMNS><DATA>\tL1\t</DATA></RETS>";

    fn login() -> HttpResponse {
        with_headers(
            LOGIN.as_bytes(),
            &[
                "RETS-Version: RETS/1.7.2",
                "Server: MockRETS/1.0",
                "WWW-Authenticate: Basic realm=\"rets\"",
            ],
        )
    }

    fn client(responses: Vec<HttpResponse>) -> RetsClient<ScriptedTransport> {
        RetsClient::connect_with(
            ScriptedTransport::new(responses),
            "http://rets.example.com/rets/login",
            None,
            Options::default(),
        )
        .unwrap()
    }

    #[test]
    fn connect_exposes_session_facts() {
        let c = client(vec![login()]);
        assert!(c.is_connected());
        assert_eq!(c.server_version(), Some("RETS/1.7.2"));
        assert_eq!(c.server_software(), Some("MockRETS/1.0"));
        assert!(c.is_auth_type_supported("basic").unwrap());
        assert!(!c.is_auth_type_supported("Digest").unwrap());
        assert!(matches!(c.is_auth_type_supported("ntlm"), Err(RetsError::Configuration(_))));
        assert_eq!(c.capability_url("Search"), Some("/rets/search"));
        assert_eq!(c.server_info().get("MemberName").map(String::as_str), Some("Jane Doe"));
    }

    #[test]
    fn search_drains_rows() {
        let mut c = client(vec![login(), xml(SEARCH)]);
        let rows = c.search(&SearchRequest::new("Property", "RES", "*")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ListingID"), Some("L1"));
        let id = c.last_search_id().unwrap();
        assert_eq!(c.num_rows(id), Some(1));
        assert!(c.fetch_row(id).is_none());
    }

    #[test]
    fn missing_capability_is_configuration_error() {
        let body = "<RETS ReplyCode=\"0\"><RETS-RESPONSE>\nSearch=/s\n</RETS-RESPONSE></RETS>";
        let mut c = client(vec![xml(body)]);
        let err = c.get_object(&ObjectRequest::new("Property", "Photo", &["1"], "*")).unwrap_err();
        assert!(matches!(err, RetsError::Configuration(_)));
        assert!(matches!(c.transaction("X-Unknown", &[]), Err(RetsError::Configuration(_))));
    }

    #[test]
    fn disconnect_requests_logout_once() {
        let mut c = client(vec![login(), xml("<RETS ReplyCode=\"0\"/>")]);
        c.disconnect().unwrap();
        assert!(!c.is_connected());
        c.disconnect().unwrap();
        assert_eq!(c.transport().requests.len(), 2);
        assert!(c.transport().requests[1].url.ends_with("/rets/logout"));

        let err = c.search_query(&SearchRequest::new("Property", "RES", "*")).unwrap_err();
        assert!(matches!(err, RetsError::Configuration(msg) if msg == "not connected"));
    }

    #[test]
    fn failed_login_yields_no_client() {
        let result = RetsClient::connect_with(
            ScriptedTransport::new([xml(r#"<RETS ReplyCode="401" ReplyText="Not authorized"/>"#)]),
            "http://rets.example.com/rets/login",
            None,
            Options::default(),
        );
        assert_eq!(result.err().and_then(|e| e.reply_code()), Some(401));
    }
}
