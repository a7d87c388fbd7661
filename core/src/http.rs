//! HTTP request and response values exchanged with a [`Transport`](crate::transport::Transport).
//!
//! # Design
//! Requests and responses are plain data. The transaction engine builds an
//! `HttpRequest`, hands it to whatever transport the client was built with,
//! and receives an `HttpResponse` back. Keeping the I/O behind that seam lets
//! the protocol logic run deterministically against scripted responses.
//!
//! Response headers are kept as the raw lines the wire delivered (status
//! line first, one entry per `name: value` line, continuation lines as-is),
//! because RETS header handling has to see exactly what the server sent
//! before any normalisation happens.

/// A RETS request described as plain data. RETS transactions are all `GET`
/// requests carrying their arguments in the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL including the encoded query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// First value of a request header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw header lines of every hop that led to this response, in arrival
    /// order, including status lines.
    pub header_lines: Vec<String>,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_lookup_ignores_case() {
        let req = HttpRequest {
            url: "http://rets.example.com:6103/rets/login".to_string(),
            headers: vec![("RETS-Version".to_string(), "RETS/1.5".to_string())],
        };
        assert_eq!(req.header("rets-version"), Some("RETS/1.5"));
        assert_eq!(req.header("User-Agent"), None);
    }
}
