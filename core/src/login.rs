//! Login and capability negotiation.
//!
//! # Design
//! [`LoginUrl::parse`] splits the caller's login URL into the server address
//! every later transaction resolves against plus the login path.
//! [`negotiate`] then runs the login transaction, routes each `name=value`
//! line of the reply into either the capability table or the server
//! information map, and performs the mandatory `Action` follow-up. The
//! returned [`Session`] is only ever built from a fully successful login.

use std::collections::BTreeMap;

use crate::error::{Result, RetsError};
use crate::session::{Capability, CapabilityTable, ServerAddress, Session};
use crate::transaction::TransactionEngine;
use crate::transport::Transport;
use crate::version::VersionStrategy;
use crate::xml;

/// Minimum number of lines a conforming CRLF-separated login body yields.
const MIN_LOGIN_LINES: usize = 4;

/// A login URL split into the server address and the login path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUrl {
    pub address: ServerAddress,
    /// Path plus `?query` when the URL carried one.
    pub path: String,
}

impl LoginUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| RetsError::Configuration(format!("invalid login URL {url:?}: {reason}"));

        let (scheme, rest) = url.trim().split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            _ => return Err(invalid("scheme must be http or https")),
        };

        let authority_end = rest.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        // Credentials embedded in the authority are not used.
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

        let (hostname, port) = match host_port.rsplit_once(':') {
            Some((host, port)) if !host_port.ends_with(']') => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            _ => (host_port, default_port),
        };
        if hostname.is_empty() {
            return Err(invalid("missing host"));
        }

        let tail = tail.split('#').next().unwrap_or_default();
        let (path, query) = tail.split_once('?').unwrap_or((tail, ""));
        let mut path = if path.is_empty() { "/".to_string() } else { path.to_string() };
        if !query.is_empty() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            address: ServerAddress {
                scheme,
                hostname: hostname.to_string(),
                port,
            },
            path,
        })
    }
}

/// Split a login payload into lines: CRLF first, bare LF for servers that
/// do not send CRLF.
pub fn split_login_payload(payload: &str) -> Vec<&str> {
    let lines: Vec<&str> = payload.split("\r\n").collect();
    if lines.iter().filter(|l| !l.trim().is_empty()).count() >= MIN_LOGIN_LINES {
        return lines;
    }
    let relaxed: Vec<&str> = payload.lines().collect();
    if relaxed.len() > lines.len() {
        tracing::warn!("login response is not CRLF separated; splitting on LF");
    }
    relaxed
}

/// Route login lines into the capability table and server information.
fn route_lines<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    capabilities: &mut Vec<(String, String)>,
    server_info: &mut BTreeMap<String, String>,
) {
    for line in lines {
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            continue;
        }
        if Capability::is_capability_name(name) {
            capabilities.push((name.to_string(), value.to_string()));
        } else {
            server_info.insert(name.to_string(), value.to_string());
        }
    }
}

/// Run the login sequence and build the session.
///
/// A nonzero login reply code surfaces as [`RetsError::Protocol`]; a
/// nonzero reply to the `Action` follow-up as [`RetsError::Authentication`].
pub fn negotiate<T: Transport>(engine: &mut TransactionEngine<T>, login_path: &str) -> Result<Session> {
    let response = engine.execute(login_path, &[])?;
    let envelope = xml::parse(&response.body)?;

    let strategy = VersionStrategy::from_version(engine.state().server_version.as_deref());
    let mut capabilities = vec![(Capability::Login.name().to_string(), login_path.to_string())];
    let mut server_info = BTreeMap::new();
    route_lines(
        split_login_payload(strategy.login_payload(&envelope)),
        &mut capabilities,
        &mut server_info,
    );
    let capabilities = CapabilityTable::new(capabilities);

    if let Some(action) = capabilities.get(Capability::Action.name()) {
        let response = engine.execute(action, &[])?;
        match xml::parse(&response.body) {
            Ok(_) => {}
            Err(RetsError::Protocol { code, text }) => return Err(RetsError::Authentication { code, text }),
            // Many servers answer Action with a plain-text or HTML banner.
            Err(RetsError::XmlParse(reason)) => {
                tracing::debug!(%reason, "Action response is not a RETS envelope");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        host = %engine.address().hostname,
        capabilities = capabilities.len(),
        version = engine.state().server_version.as_deref().unwrap_or("unknown"),
        "logged in"
    );
    Ok(Session {
        capabilities,
        server_info,
        connected: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::http::HttpResponse;
    use crate::transport::scripted::{with_headers, xml, ScriptedTransport};

    const LOGIN: &str = "<RETS ReplyCode=\"0\" ReplyText=\"Success\"><RETS-RESPONSE>\r\n\
MemberName=Jane Doe\r\n\
User=jdoe,1,AGENT,jdoe\r\n\
Broker=ACME\r\n\
MetadataVersion=1.00.000\r\n\
Search=/rets/search\r\n\
GetObject=/rets/getobject\r\n\
Logout=/rets/logout\r\n\
X-SampleLinks=/rets/links\r\n\
Empty=\r\n\
</RETS-RESPONSE></RETS>";

    fn engine(responses: Vec<HttpResponse>) -> TransactionEngine<ScriptedTransport> {
        let url = LoginUrl::parse("http://rets.example.com:6103/rets/login").unwrap();
        TransactionEngine::new(ScriptedTransport::new(responses), url.address, &Options::default(), None)
    }

    #[test]
    fn parse_login_url() {
        let url = LoginUrl::parse("http://rets.example.com:6103/rets/login?agent=7").unwrap();
        assert_eq!(url.address.scheme, "http");
        assert_eq!(url.address.hostname, "rets.example.com");
        assert_eq!(url.address.port, 6103);
        assert_eq!(url.path, "/rets/login?agent=7");
    }

    #[test]
    fn login_url_default_ports() {
        assert_eq!(LoginUrl::parse("http://rets.example.com/login").unwrap().address.port, 80);
        assert_eq!(LoginUrl::parse("https://rets.example.com/login").unwrap().address.port, 443);
        assert_eq!(LoginUrl::parse("http://rets.example.com").unwrap().path, "/");
    }

    #[test]
    fn login_url_rejects_garbage() {
        for bad in ["rets.example.com/login", "ftp://host/login", "http:///login", "http://host:abc/"] {
            assert!(
                matches!(LoginUrl::parse(bad), Err(RetsError::Configuration(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn login_routes_capabilities_and_server_info() {
        let mut e = engine(vec![xml(LOGIN)]);
        let session = negotiate(&mut e, "/rets/login").unwrap();
        assert!(session.connected);

        let caps = &session.capabilities;
        assert_eq!(caps.get("Search"), Some("/rets/search"));
        assert_eq!(caps.get("X-SampleLinks"), Some("/rets/links"));
        assert_eq!(caps.get("Login"), Some("/rets/login"));
        assert_eq!(caps.get("MemberName"), None);

        assert_eq!(session.server_info.get("MemberName").map(String::as_str), Some("Jane Doe"));
        assert_eq!(session.server_info.get("User").map(String::as_str), Some("jdoe,1,AGENT,jdoe"));
        assert!(!session.server_info.contains_key("Empty"));
        assert_eq!(e.transport().requests.len(), 1);
    }

    #[test]
    fn login_error_reply_is_protocol_error() {
        let mut e = engine(vec![xml(r#"<RETS ReplyCode="401" ReplyText="Invalid credentials"/>"#)]);
        match negotiate(&mut e, "/rets/login").unwrap_err() {
            RetsError::Protocol { code, text } => {
                assert_eq!(code, 401);
                assert_eq!(text, "Invalid credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lf_only_login_body() {
        let body = "<RETS ReplyCode=\"0\"><RETS-RESPONSE>\nSearch=/s\nGetObject=/o\nBroker=B\n</RETS-RESPONSE></RETS>";
        let mut e = engine(vec![xml(body)]);
        let session = negotiate(&mut e, "/rets/login").unwrap();
        assert_eq!(session.capabilities.get("Search"), Some("/s"));
        assert_eq!(session.capabilities.get("GetObject"), Some("/o"));
        assert_eq!(session.server_info.get("Broker").map(String::as_str), Some("B"));
    }

    #[test]
    fn legacy_login_payload_is_root_text() {
        let body = "<RETS ReplyCode=\"0\">\r\nSearch=/s\r\nLogout=/l\r\n</RETS>";
        let mut e = engine(vec![with_headers(body.as_bytes(), &["RETS-Version: RETS/1.0"])]);
        let session = negotiate(&mut e, "/rets/login").unwrap();
        assert_eq!(session.capabilities.get("Logout"), Some("/l"));
    }

    #[test]
    fn action_is_requested_after_login() {
        let body = "<RETS ReplyCode=\"0\"><RETS-RESPONSE>\nAction=/rets/action\nSearch=/s\n</RETS-RESPONSE></RETS>";
        let action = with_headers(b"Welcome to the MLS", &["Content-Type: text/plain"]);
        let mut e = engine(vec![xml(body), action]);
        let session = negotiate(&mut e, "/rets/login").unwrap();
        assert!(session.connected);
        let requests = &e.transport().requests;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, "http://rets.example.com:6103/rets/action");
    }

    #[test]
    fn failed_action_is_authentication_error() {
        let body = "<RETS ReplyCode=\"0\"><RETS-RESPONSE>\nAction=/rets/action\n</RETS-RESPONSE></RETS>";
        let action = xml(r#"<RETS ReplyCode="20036" ReplyText="Account suspended"/>"#);
        let mut e = engine(vec![xml(body), action]);
        let err = negotiate(&mut e, "/rets/login").unwrap_err();
        assert!(matches!(err, RetsError::Authentication { code: 20036, .. }));
    }

    #[test]
    fn split_prefers_crlf() {
        let payload = "A=1\r\nB=2\r\nC=3\r\nD=4\r\n";
        assert_eq!(split_login_payload(payload).len(), 5);
        let payload = "A=1\nB=2\r\nC=3";
        assert_eq!(split_login_payload(payload), vec!["A=1", "B=2", "C=3"]);
    }
}
