//! Metadata transactions.

use serde::Serialize;

use crate::error::Result;
use crate::transaction::TransactionEngine;
use crate::transport::Transport;
use crate::version::VersionStrategy;
use crate::xml::{self, Envelope};

/// Identification block of `METADATA-SYSTEM`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInformation {
    #[serde(rename = "SystemID")]
    pub system_id: String,
    pub system_description: String,
    pub timezone_offset: String,
    pub comments: String,
}

/// Fetch one metadata document as standard XML.
pub fn fetch_metadata<T: Transport>(
    engine: &mut TransactionEngine<T>,
    endpoint: &str,
    metadata_type: &str,
    id: &str,
) -> Result<Envelope> {
    let params = [
        ("Type".to_string(), metadata_type.to_string()),
        ("ID".to_string(), id.to_string()),
        ("Format".to_string(), "STANDARD-XML".to_string()),
    ];
    let result = engine.execute(endpoint, &params)?;
    xml::parse(&result.body)
}

pub fn server_information<T: Transport>(
    engine: &mut TransactionEngine<T>,
    endpoint: &str,
) -> Result<ServerInformation> {
    let envelope = fetch_metadata(engine, endpoint, "METADATA-SYSTEM", "0")?;
    let strategy = VersionStrategy::from_version(engine.state().server_version.as_deref());
    Ok(strategy.server_information(&envelope))
}
