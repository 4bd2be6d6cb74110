//! Parsers for the persisted provider records
//!
//! The location record uses the same layout as a sendtargets discovery line,
//! so the same parser handles both.

use super::{AuthInfo, AuthMethod, ConnectionPropertyError, Geometry};

/// One parsed location / discovery record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecord {
    /// `host:port`, with the portal group tag stripped
    pub address: String,
    pub identifier: String,
    /// `None` when the field is missing or not a number
    pub lun: Option<u32>,
}

/// Parse `"<ip>:<port>,<portal> <target-identifier> [<lun>]"`
pub fn parse_location(record: &str) -> Result<LocationRecord, ConnectionPropertyError> {
    let mut fields = record.split_whitespace();

    let (portal, identifier) = match (fields.next(), fields.next()) {
        (Some(portal), Some(identifier)) => (portal, identifier),
        _ => return Err(ConnectionPropertyError::MalformedLocation(record.to_string())),
    };

    let address = portal.split(',').next().unwrap_or(portal);
    if address.is_empty() {
        return Err(ConnectionPropertyError::MalformedLocation(record.to_string()));
    }

    // Trailing fields beyond the LUN are ignored
    let lun = fields.next().and_then(|lun| lun.parse().ok());

    Ok(LocationRecord {
        address: address.to_string(),
        identifier: identifier.to_string(),
        lun,
    })
}

/// Parse `"<method> <username> <secret>"`
pub fn parse_auth(record: &str) -> Result<AuthInfo, ConnectionPropertyError> {
    let fields: Vec<&str> = record.split_whitespace().collect();
    let &[method, username, secret] = fields.as_slice() else {
        return Err(ConnectionPropertyError::MalformedAuth);
    };

    let method = match method.to_ascii_uppercase().as_str() {
        "CHAP" => AuthMethod::Chap,
        _ => return Err(ConnectionPropertyError::UnsupportedAuthMethod(method.to_string())),
    };

    Ok(AuthInfo {
        method,
        username: username.to_string(),
        secret: secret.to_string(),
    })
}

/// Parse `"<physical-block-size> <logical-block-size>"`
pub fn parse_geometry(record: &str) -> Result<Geometry, ConnectionPropertyError> {
    let malformed = || ConnectionPropertyError::MalformedGeometry(record.to_string());

    let fields: Vec<&str> = record.split_whitespace().collect();
    let &[physical, logical] = fields.as_slice() else {
        return Err(malformed());
    };

    Ok(Geometry {
        physical_block_size: physical.parse().map_err(|_| malformed())?,
        logical_block_size: logical.parse().map_err(|_| malformed())?,
    })
}
