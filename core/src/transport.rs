//! The I/O seam between the protocol engine and the network.
//!
//! # Design
//! [`Transport`] is the only place a request leaves the process. The engine
//! builds an [`HttpRequest`] and interprets the [`HttpResponse`]; everything
//! in between (cookies, compression, redirects, HTTP authentication) belongs
//! to the transport.
//!
//! [`UreqTransport`] answers `401` challenges itself: it prefers Digest when
//! offered (unless Basic is forced), retries once, and keeps answering later
//! requests with the same challenge and an increasing nonce count. The
//! header lines of the challenge hop are returned along with the final
//! response so the engine can record which schemes the server advertised.

use uuid::Uuid;

use crate::auth::{basic_authorization, parse_challenges, Challenge, DigestChallenge};
use crate::config::Options;
use crate::error::{Result, RetsError};
use crate::http::{HttpRequest, HttpResponse};
use crate::session::Credentials;

/// Upper bound on a single response body; object responses can be large.
const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

/// Sends one request and returns the server's answer, whatever its status.
pub trait Transport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse>;
}

#[derive(Debug, Clone)]
enum AuthState {
    Basic,
    Digest { challenge: DigestChallenge, nonce_count: u32 },
}

/// Blocking HTTP(S) transport backed by a `ureq` agent. The agent's cookie
/// jar lives as long as the transport, i.e. for the whole session.
pub struct UreqTransport {
    agent: ureq::Agent,
    username: String,
    password: String,
    force_basic: bool,
    compression: bool,
    auth: Option<AuthState>,
}

impl UreqTransport {
    pub fn new(credentials: &Credentials, options: &Options) -> Self {
        let mut config = ureq::Agent::config_builder().http_status_as_error(false);
        if options.disable_follow_location {
            config = config.max_redirects(0);
        }
        Self {
            agent: config.build().new_agent(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            force_basic: options.force_basic_authentication,
            compression: options.compression_enabled,
            auth: None,
        }
    }

    fn authorization(&mut self, url: &str) -> Option<String> {
        match &mut self.auth {
            None if self.force_basic => Some(basic_authorization(&self.username, &self.password)),
            None => None,
            Some(AuthState::Basic) => Some(basic_authorization(&self.username, &self.password)),
            Some(AuthState::Digest { challenge, nonce_count }) => {
                *nonce_count += 1;
                let cnonce = Uuid::new_v4().simple().to_string();
                Some(challenge.authorization(
                    "GET",
                    request_uri(url),
                    &self.username,
                    &self.password,
                    &cnonce,
                    *nonce_count,
                ))
            }
        }
    }

    fn negotiate(&self, header_lines: &[String]) -> Option<AuthState> {
        let challenges: Vec<Challenge> = header_lines
            .iter()
            .filter_map(|line| line.split_once(':'))
            .filter(|(name, _)| name.trim().eq_ignore_ascii_case("WWW-Authenticate"))
            .flat_map(|(_, value)| parse_challenges(value))
            .collect();

        if self.force_basic {
            return Some(AuthState::Basic);
        }
        let digest = challenges.iter().find_map(|c| match c {
            Challenge::Digest(d) => Some(d.clone()),
            _ => None,
        });
        match digest {
            Some(challenge) => Some(AuthState::Digest { challenge, nonce_count: 0 }),
            None if challenges.contains(&Challenge::Basic) => Some(AuthState::Basic),
            None => None,
        }
    }

    fn call(&self, request: &HttpRequest, authorization: Option<&str>) -> Result<HttpResponse> {
        let mut builder = self.agent.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(authorization) = authorization {
            builder = builder.header("Authorization", authorization);
        }
        if !self.compression {
            builder = builder.header("Accept-Encoding", "identity");
        }

        let mut response = builder.call().map_err(|e| RetsError::Network(e.to_string()))?;

        let mut header_lines = Vec::with_capacity(response.headers().len() + 1);
        header_lines.push(format!("{:?} {}", response.version(), response.status()));
        for (name, value) in response.headers() {
            header_lines.push(format!("{}: {}", name.as_str(), String::from_utf8_lossy(value.as_bytes())));
        }
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| RetsError::Network(e.to_string()))?;

        Ok(HttpResponse { status, header_lines, body })
    }
}

impl Transport for UreqTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        let authorization = self.authorization(&request.url);
        let mut first = self.call(request, authorization.as_deref())?;
        if first.status != 401 {
            return Ok(first);
        }
        let Some(state) = self.negotiate(&first.header_lines) else {
            return Ok(first);
        };

        tracing::debug!(url = %request.url, "answering HTTP authentication challenge");
        self.auth = Some(state);
        let authorization = self.authorization(&request.url);
        let retry = self.call(request, authorization.as_deref())?;

        let mut header_lines = std::mem::take(&mut first.header_lines);
        header_lines.extend(retry.header_lines);
        Ok(HttpResponse {
            status: retry.status,
            header_lines,
            body: retry.body,
        })
    }
}

/// The request-URI (path and query) of an absolute URL, as Digest signs it.
fn request_uri(url: &str) -> &str {
    let after_scheme = url.find("://").map_or(url, |i| &url[i + 3..]);
    after_scheme.find('/').map_or("/", |i| &after_scheme[i..])
}


#[cfg(test)]
mod tests {
    use super::*;

    fn transport(options: &Options) -> UreqTransport {
        UreqTransport::new(&Credentials::new("agent", "secret"), options)
    }

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn request_uri_keeps_path_and_query() {
        assert_eq!(request_uri("http://rets.example.com:6103/rets/search?Class=RES"), "/rets/search?Class=RES");
        assert_eq!(request_uri("http://rets.example.com"), "/");
    }

    #[test]
    fn negotiate_prefers_digest() {
        let t = transport(&Options::default());
        let state = t.negotiate(&lines(&[
            "HTTP/1.1 401 Unauthorized",
            "www-authenticate: Basic realm=\"rets\"",
            "www-authenticate: Digest realm=\"rets\", nonce=\"n1\", qop=\"auth\"",
        ]));
        assert!(matches!(state, Some(AuthState::Digest { nonce_count: 0, .. })));
    }

    #[test]
    fn negotiate_forced_basic_ignores_digest() {
        let options = Options {
            force_basic_authentication: true,
            ..Options::default()
        };
        let t = transport(&options);
        let state = t.negotiate(&lines(&["WWW-Authenticate: Digest realm=\"rets\", nonce=\"n1\""]));
        assert!(matches!(state, Some(AuthState::Basic)));
    }

    #[test]
    fn negotiate_without_challenge_gives_up() {
        let t = transport(&Options::default());
        assert!(t.negotiate(&lines(&["HTTP/1.1 401 Unauthorized"])).is_none());
    }

    #[test]
    fn forced_basic_is_sent_pre_emptively() {
        let options = Options {
            force_basic_authentication: true,
            ..Options::default()
        };
        let mut t = transport(&options);
        assert_eq!(
            t.authorization("http://h/rets/login").as_deref(),
            Some("Basic YWdlbnQ6c2VjcmV0")
        );
    }

    #[test]
    fn digest_nonce_count_increments_per_request() {
        let mut t = transport(&Options::default());
        t.auth = t.negotiate(&lines(&["WWW-Authenticate: Digest realm=\"rets\", nonce=\"n1\", qop=\"auth\""]));
        let first = t.authorization("http://h/rets/login").unwrap();
        let second = t.authorization("http://h/rets/search?Class=RES").unwrap();
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
        assert!(second.contains("uri=\"/rets/search?Class=RES\""));
    }
}
