//! Error types for the RETS client.
//!
//! # Design
//! A single enum covers every failure a caller can observe. Transport-level
//! failures keep the HTTP status and body for debugging; server-level
//! failures keep the RETS reply code and text verbatim, since callers
//! routinely branch on specific codes (401 bad credentials, 20201 no
//! matching records). Nothing here is retried: every variant surfaces
//! directly from the operation that produced it.

/// Reply code a server sends when a search matched no records.
pub const NO_RECORDS_FOUND: u32 = 20201;

/// Errors returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum RetsError {
    /// Invalid setup: unknown option name, bad option value, malformed login
    /// URL, or a capability the server never advertised.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    /// The request never produced an HTTP response (connect, TLS or I/O failure).
    #[error("network error: {0}")]
    Network(String),

    /// The response body was empty or not well-formed XML.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// The envelope carried a nonzero `ReplyCode`.
    #[error("RETS error {code}: {text}")]
    Protocol { code: u32, text: String },

    /// Login (including the mandatory `Action` follow-up) did not end with
    /// reply code zero.
    #[error("authentication failed ({code}): {text}")]
    Authentication { code: u32, text: String },

    /// A search issued too many paging requests without the override set.
    #[error("search issued {requests} requests to the server; stopping to prevent abuse")]
    AbuseGuard { requests: u32 },
}

impl RetsError {
    /// The server's reply code, for errors that carry one.
    pub fn reply_code(&self) -> Option<u32> {
        match self {
            RetsError::Protocol { code, .. } | RetsError::Authentication { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when a search failed only because nothing matched.
    pub fn is_no_records(&self) -> bool {
        self.reply_code() == Some(NO_RECORDS_FOUND)
    }
}

/// Convenience alias for `Result<T, RetsError>`.
pub type Result<T> = std::result::Result<T, RetsError>;
