//! Per-version XML shape selection.
//!
//! Servers speaking different RETS versions put the same information in
//! different places. A [`VersionStrategy`] is picked once from the negotiated
//! `RETS-Version` and answers every shape question from then on.

use crate::metadata::ServerInformation;
use crate::xml::{Element, Envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionStrategy {
    /// RETS/1.0: login key/value lines are the envelope's own text.
    Legacy10,
    /// RETS/1.5: lines live in `RETS-RESPONSE`, system metadata in child
    /// elements of `System`.
    Standard15,
    /// RETS/1.7 and later, or an unknown version.
    Modern17,
}

impl VersionStrategy {
    pub fn from_version(version: Option<&str>) -> Self {
        match version.map(str::trim) {
            Some("RETS/1.0") => VersionStrategy::Legacy10,
            Some("RETS/1.5") => VersionStrategy::Standard15,
            _ => VersionStrategy::Modern17,
        }
    }

    /// The raw `name=value` block of a login (or action) response.
    pub fn login_payload<'a>(&self, envelope: &'a Envelope) -> &'a str {
        match self {
            VersionStrategy::Legacy10 => &envelope.root.text,
            VersionStrategy::Standard15 | VersionStrategy::Modern17 => envelope
                .root
                .child("RETS-RESPONSE")
                .map_or(envelope.root.text.as_str(), |el| el.text.as_str()),
        }
    }

    /// Extract system identification from a `METADATA-SYSTEM` envelope.
    pub fn server_information(&self, envelope: &Envelope) -> ServerInformation {
        let system = envelope.root.path(&["METADATA", "METADATA-SYSTEM"]);
        let upper = system.and_then(|s| s.child("SYSTEM"));

        let mut info = match self {
            VersionStrategy::Legacy10 | VersionStrategy::Standard15 => {
                let lower = system.and_then(|s| s.child("System"));
                ServerInformation {
                    system_id: child_text(lower, "SystemID"),
                    system_description: child_text(lower, "SystemDescription"),
                    ..ServerInformation::default()
                }
            }
            VersionStrategy::Modern17 => ServerInformation {
                system_id: attr(upper, "SystemID"),
                system_description: attr(upper, "SystemDescription"),
                timezone_offset: attr(upper, "TimeZoneOffset"),
                ..ServerInformation::default()
            },
        };
        info.comments = child_text(upper, "Comments");
        info
    }
}

fn child_text(el: Option<&Element>, name: &str) -> String {
    el.and_then(|e| e.child(name))
        .map(|c| c.text.trim().to_string())
        .unwrap_or_default()
}

fn attr(el: Option<&Element>, name: &str) -> String {
    el.and_then(|e| e.attr(name)).unwrap_or_default().to_string()
}
