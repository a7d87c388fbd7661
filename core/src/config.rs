//! Named client options.
//!
//! # Design
//! `Options` can be built in code, deserialised from JSON, or changed one
//! name at a time through [`Options::set`]. Both string paths go through an
//! explicit allow-list: an unrecognised name is a configuration error rather
//! than a silently ignored typo.

use serde::Deserialize;

use crate::error::{Result, RetsError};

/// Protocol version announced when the caller does not choose one.
pub const DEFAULT_RETS_VERSION: &str = "RETS/1.5";

/// User agent announced when the caller does not choose one.
pub const DEFAULT_USER_AGENT: &str = concat!("rets-rs/", env!("CARGO_PKG_VERSION"));

/// Every name accepted by [`Options::set`].
pub const OPTION_NAMES: &[&str] = &[
    "rets_version",
    "user_agent",
    "compression_enabled",
    "force_ua_authentication",
    "use_interealty_ua_auth",
    "ua_request_id",
    "force_basic_authentication",
    "disable_follow_location",
    "disable_encoding_fix",
    "offset_support",
    "override_offset_protection",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Sent as the `RETS-Version` header.
    pub rets_version: String,
    /// Sent as the `User-Agent` header and used in the UA digest.
    pub user_agent: String,
    /// Ask the server for gzip-compressed bodies.
    pub compression_enabled: bool,
    /// Send `RETS-UA-Authorization` even when no UA password was given.
    pub force_ua_authentication: bool,
    /// Compute the UA digest with an empty session id (Interealty servers).
    pub use_interealty_ua_auth: bool,
    /// Request id folded into the UA digest.
    pub ua_request_id: String,
    /// Send Basic credentials up front and never answer a Digest challenge.
    pub force_basic_authentication: bool,
    pub disable_follow_location: bool,
    /// Skip the `& ` escaping and ISO-8859-1 transcoding of search bodies.
    pub disable_encoding_fix: bool,
    /// Follow `MAXROWS` with further requests at increasing `Offset`.
    pub offset_support: bool,
    /// Lift the 300-request ceiling on a single search.
    pub override_offset_protection: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rets_version: DEFAULT_RETS_VERSION.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            compression_enabled: false,
            force_ua_authentication: false,
            use_interealty_ua_auth: false,
            ua_request_id: String::new(),
            force_basic_authentication: false,
            disable_follow_location: false,
            disable_encoding_fix: false,
            offset_support: false,
            override_offset_protection: false,
        }
    }
}

impl Options {
    /// Parse options from a JSON object. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RetsError::Configuration(e.to_string()))
    }

    /// Set one option by name. Flags accept `1`/`0`, `true`/`false`,
    /// `yes`/`no`, `on`/`off`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "rets_version" => self.rets_version = value.trim().to_string(),
            "user_agent" => self.user_agent = value.trim().to_string(),
            "ua_request_id" => self.ua_request_id = value.trim().to_string(),
            "compression_enabled" => self.compression_enabled = parse_flag(name, value)?,
            "force_ua_authentication" => self.force_ua_authentication = parse_flag(name, value)?,
            "use_interealty_ua_auth" => self.use_interealty_ua_auth = parse_flag(name, value)?,
            "force_basic_authentication" => self.force_basic_authentication = parse_flag(name, value)?,
            "disable_follow_location" => self.disable_follow_location = parse_flag(name, value)?,
            "disable_encoding_fix" => self.disable_encoding_fix = parse_flag(name, value)?,
            "offset_support" => self.offset_support = parse_flag(name, value)?,
            "override_offset_protection" => self.override_offset_protection = parse_flag(name, value)?,
            _ => return Err(RetsError::Configuration(format!("unknown option name: {name}"))),
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(RetsError::Configuration(format!("option {name}: not a boolean: {other}"))),
    }
}
