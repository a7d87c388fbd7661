//! Client core for the RETS (Real Estate Transaction Standard) protocol.
//!
//! # Overview
//! Logs in to a RETS server, discovers its capability URLs, and runs search,
//! object and metadata transactions over a single synchronous session.
//! Network I/O sits behind the [`Transport`] trait, so every protocol rule
//! can be exercised against scripted responses.
//!
//! # Design
//! - `header` rebuilds response headers from raw transport lines.
//! - `transaction` executes one request and returns a fresh
//!   [`TransactionResult`]; it alone writes session state.
//! - `xml` interprets the RETS envelope and its reply code.
//! - `login` negotiates capabilities; `object` decodes single and multipart
//!   object replies; `search` pages through results into cursors.
//! - `version` picks where version-dependent data lives in the XML.
//! - [`RetsClient`] composes the above for callers and the C ABI.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod header;
pub mod http;
pub mod login;
pub mod metadata;
pub mod object;
pub mod search;
pub mod session;
pub mod transaction;
pub mod transport;
pub mod version;
pub mod xml;

pub use client::RetsClient;
pub use config::Options;
pub use error::{Result, RetsError};
pub use header::{HeaderAccumulator, Headers};
pub use http::{HttpRequest, HttpResponse};
pub use metadata::ServerInformation;
pub use object::{ObjectError, ObjectRecord, ObjectRequest};
pub use search::{prepare_query, CursorId, Row, RowBuffer, SearchCursor, SearchPager, SearchRequest};
pub use session::{AuthScheme, Capability, CapabilityTable, Credentials, ServerAddress, Session, SessionState};
pub use transaction::{TransactionEngine, TransactionResult};
pub use transport::{Transport, UreqTransport};
pub use version::VersionStrategy;
pub use xml::{Element, Envelope};
