//! Session data: who we are, where the server is, and what login told us.
//!
//! # Design
//! State is split by owner. [`SessionState`] (session id, advertised auth
//! schemes, server identity) is written only by the transaction engine as
//! responses arrive. [`Session`] (capability URLs, server information,
//! connected flag) is produced once by login; its [`CapabilityTable`] is
//! never mutated afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RetsError};

/// Login credentials. A UA password switches on RETS user-agent
/// authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub ua_password: Option<String>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            ua_password: None,
        }
    }

    pub fn with_ua_password(mut self, ua_password: &str) -> Self {
        self.ua_password = Some(ua_password.to_string()).filter(|p| !p.is_empty());
        self
    }
}

/// Scheme, host and port that relative capability paths resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.hostname, self.port)
    }
}

/// HTTP authentication schemes a server can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
}

impl FromStr for AuthScheme {
    type Err = RetsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthScheme::Basic),
            "digest" => Ok(AuthScheme::Digest),
            _ => Err(RetsError::Configuration(format!("unknown authentication type: {s}"))),
        }
    }
}

/// Mutable per-session state maintained by the transaction engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub supports_basic: bool,
    pub supports_digest: bool,
    pub server_version: Option<String>,
    pub server_software: Option<String>,
}

impl SessionState {
    pub fn supports(&self, scheme: AuthScheme) -> bool {
        match scheme {
            AuthScheme::Basic => self.supports_basic,
            AuthScheme::Digest => self.supports_digest,
        }
    }
}

/// Transactions a login response may advertise a URL for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Action,
    ChangePassword,
    GetObject,
    Login,
    LoginComplete,
    Logout,
    Search,
    GetMetadata,
    ServerInformation,
    Update,
    PostObject,
    GetPayloadList,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::Action,
        Capability::ChangePassword,
        Capability::GetObject,
        Capability::Login,
        Capability::LoginComplete,
        Capability::Logout,
        Capability::Search,
        Capability::GetMetadata,
        Capability::ServerInformation,
        Capability::Update,
        Capability::PostObject,
        Capability::GetPayloadList,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Action => "Action",
            Capability::ChangePassword => "ChangePassword",
            Capability::GetObject => "GetObject",
            Capability::Login => "Login",
            Capability::LoginComplete => "LoginComplete",
            Capability::Logout => "Logout",
            Capability::Search => "Search",
            Capability::GetMetadata => "GetMetadata",
            Capability::ServerInformation => "ServerInformation",
            Capability::Update => "Update",
            Capability::PostObject => "PostObject",
            Capability::GetPayloadList => "GetPayloadList",
        }
    }

    /// Whether a login-response key names a capability URL rather than a
    /// piece of server information: a known capability, or any `X-` name.
    pub fn is_capability_name(name: &str) -> bool {
        name.starts_with("X-") || Capability::ALL.iter().any(|c| c.name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability name to endpoint, fixed at login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    urls: HashMap<String, String>,
}

impl CapabilityTable {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            urls: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    /// The endpoint for `capability`, or a configuration error when the
    /// server never advertised it.
    pub fn require(&self, capability: Capability) -> Result<&str> {
        self.get(capability.name())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| RetsError::Configuration(format!("server did not advertise the {capability} capability")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.urls.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// The outcome of a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub capabilities: CapabilityTable,
    /// Login-response entries that are not capability URLs.
    pub server_info: BTreeMap<String, String>,
    pub connected: bool,
}
