//! HTTP and RETS authentication helpers.
//!
//! # Design
//! Three independent digests live here: HTTP Basic, HTTP Digest (RFC 2617,
//! MD5 and MD5-sess, `qop=auth` when the server offers it) and the RETS
//! user-agent digest carried in `RETS-UA-Authorization`. All of them are
//! pure functions of their inputs; the transport decides when to send them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

/// Lowercase hex MD5 of `input`.
pub fn md5_hex(input: &str) -> String {
    bytes_to_hex(&Md5::digest(input.as_bytes()))
}

fn bytes_to_hex(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}

/// Value for an `Authorization` header using HTTP Basic.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// The RETS user-agent digest:
/// `MD5(MD5(ua ":" ua_password) ":" request_id ":" session_id ":" version)`.
pub fn ua_digest(user_agent: &str, ua_password: &str, request_id: &str, session_id: &str, rets_version: &str) -> String {
    let a1 = md5_hex(&format!("{user_agent}:{ua_password}"));
    md5_hex(&format!(
        "{}:{}:{}:{}",
        a1.trim(),
        request_id.trim(),
        session_id.trim(),
        rets_version.trim()
    ))
}

/// One scheme offered in a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Digest(DigestChallenge),
    Other(String),
}

/// Parameters of a Digest challenge that matter for building a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// `Some("auth")` when the server offered `qop=auth`.
    pub qop: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    fn from_params(params: &[(String, String)]) -> Option<Self> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };
        let qop = get("qop").and_then(|offered| {
            offered
                .split(',')
                .map(str::trim)
                .any(|q| q.eq_ignore_ascii_case("auth"))
                .then(|| "auth".to_string())
        });
        Some(Self {
            realm: get("realm").unwrap_or_default(),
            nonce: get("nonce")?,
            opaque: get("opaque"),
            qop,
            algorithm: get("algorithm"),
        })
    }

    /// Value for an `Authorization` header answering this challenge.
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
        nonce_count: u32,
    ) -> String {
        let nc = format!("{nonce_count:08x}");
        let mut ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        if self
            .algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
        {
            ha1 = md5_hex(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = match &self.qop {
            Some(qop) => md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}", self.nonce)),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"",
            self.realm, self.nonce
        );
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        if let Some(qop) = &self.qop {
            header.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{cnonce}\""));
        }
        header
    }
}

/// Parse every challenge in a `WWW-Authenticate` value. A single value may
/// carry several schemes, e.g. `Digest realm="r", nonce="n", Basic realm="r"`.
pub fn parse_challenges(header: &str) -> Vec<Challenge> {
    let mut schemes: Vec<(String, Vec<(String, String)>)> = Vec::new();
    let chars: Vec<char> = header.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '=' && chars[i] != ',' {
            i += 1;
        }
        let token: String = chars[start..i].iter().collect();
        if token.is_empty() {
            i += 1;
            continue;
        }

        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j < chars.len() && chars[j] == '=' {
            i = j + 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            let mut value = String::new();
            if i < chars.len() && chars[i] == '"' {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                i += 1;
            } else {
                while i < chars.len() && chars[i] != ',' && !chars[i].is_whitespace() {
                    value.push(chars[i]);
                    i += 1;
                }
            }
            if let Some((_, params)) = schemes.last_mut() {
                params.push((token, value));
            }
        } else {
            schemes.push((token, Vec::new()));
        }
    }

    schemes
        .into_iter()
        .filter_map(|(scheme, params)| {
            if scheme.eq_ignore_ascii_case("basic") {
                Some(Challenge::Basic)
            } else if scheme.eq_ignore_ascii_case("digest") {
                DigestChallenge::from_params(&params).map(Challenge::Digest)
            } else {
                Some(Challenge::Other(scheme))
            }
        })
        .collect()
}
