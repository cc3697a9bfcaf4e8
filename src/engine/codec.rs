//! Record Codecs
//!
//! Byte layouts of the records that need one. Keys, deployment data and the
//! artifact name are stored raw and have no codec.
//!
//! Update state, plain layout:
//! ```text
//! | state u32 LE | artifact type bytes (length = record length - 4) |
//! ```
//! Update state, checked layout:
//! ```text
//! | "OTS1" | payload len u32 LE | sha256(payload)[..8] | plain layout |
//! ```
//! The magic read as a little-endian u32 is not a valid state value, so a
//! reader can always tell the layouts apart.

use sha2::{Digest, Sha256};

use super::config::{DuplicatePolicy, RecordFormat};
use super::error::{Result, StoreError};
use super::items;
use super::record::{ProvidesMap, UpdateState, UpdateStateRecord};

/// Size of the persisted state value
pub const STATE_VALUE_LEN: usize = 4;

/// Shortest non-empty artifact type accepted in a record
pub const MIN_ARTIFACT_TYPE_LEN: usize = 2;

const ENVELOPE_MAGIC: &[u8; 4] = b"OTS1";
const ENVELOPE_HEADER_LEN: usize = 4 + 4 + 8;

fn checksum(payload: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(payload);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    prefix
}

pub fn encode_update_state(record: &UpdateStateRecord, format: RecordFormat) -> Result<Vec<u8>> {
    let type_len = record.artifact_type.len();
    if type_len > 0 && type_len < MIN_ARTIFACT_TYPE_LEN {
        return Err(StoreError::InvalidInput(format!(
            "artifact type '{}' is shorter than {} bytes",
            record.artifact_type, MIN_ARTIFACT_TYPE_LEN
        )));
    }

    let mut plain = Vec::with_capacity(STATE_VALUE_LEN + type_len);
    plain.extend_from_slice(&record.state.value().to_le_bytes());
    plain.extend_from_slice(record.artifact_type.as_bytes());

    match format {
        RecordFormat::Plain => Ok(plain),
        RecordFormat::Checked => {
            let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + plain.len());
            out.extend_from_slice(ENVELOPE_MAGIC);
            out.extend_from_slice(&(plain.len() as u32).to_le_bytes());
            out.extend_from_slice(&checksum(&plain));
            out.extend_from_slice(&plain);
            Ok(out)
        }
    }
}

/// Decode an update-state record in either layout.
///
/// Anything that cannot be fully decoded is `Corrupt`; no partial record is
/// ever returned.
pub fn decode_update_state(bytes: &[u8]) -> Result<UpdateStateRecord> {
    if bytes.starts_with(ENVELOPE_MAGIC) {
        if bytes.len() < ENVELOPE_HEADER_LEN {
            return Err(StoreError::corrupt(items::UPDATE_STATE, "truncated envelope header"));
        }
        let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let payload = &bytes[ENVELOPE_HEADER_LEN..];
        if payload.len() != declared {
            return Err(StoreError::corrupt(
                items::UPDATE_STATE,
                format!("envelope declares {} bytes, found {}", declared, payload.len()),
            ));
        }
        if bytes[8..ENVELOPE_HEADER_LEN] != checksum(payload) {
            return Err(StoreError::corrupt(items::UPDATE_STATE, "checksum mismatch"));
        }
        return decode_plain(payload);
    }
    decode_plain(bytes)
}

fn decode_plain(bytes: &[u8]) -> Result<UpdateStateRecord> {
    if bytes.len() < STATE_VALUE_LEN {
        return Err(StoreError::corrupt(
            items::UPDATE_STATE,
            format!("{} bytes is shorter than a state value", bytes.len()),
        ));
    }
    let (value, artifact_type) = bytes.split_at(STATE_VALUE_LEN);
    let value = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    let state = UpdateState::from_value(value).ok_or_else(|| {
        StoreError::corrupt(items::UPDATE_STATE, format!("unknown state value {}", value))
    })?;

    if !artifact_type.is_empty() && artifact_type.len() < MIN_ARTIFACT_TYPE_LEN {
        return Err(StoreError::corrupt(items::UPDATE_STATE, "artifact type too short"));
    }
    let artifact_type = String::from_utf8(artifact_type.to_vec())
        .map_err(|_| StoreError::corrupt(items::UPDATE_STATE, "artifact type is not UTF-8"))?;

    Ok(UpdateStateRecord {
        state,
        artifact_type,
    })
}

/// Encode provides as newline-separated `key=value` lines.
pub fn encode_provides(provides: &ProvidesMap) -> Result<String> {
    let mut lines = Vec::with_capacity(provides.len());
    for (key, value) in provides {
        if key.is_empty() || key.contains(['=', '\n', '\r']) {
            return Err(StoreError::Codec(format!("invalid provides key '{}'", key)));
        }
        if value.contains(['\n', '\r']) {
            return Err(StoreError::Codec(format!(
                "provides value for '{}' contains a line break",
                key
            )));
        }
        lines.push(format!("{}={}", key, value));
    }
    Ok(lines.join("\n"))
}

/// Decode `key=value` lines.
///
/// Blank lines are ignored and malformed lines are skipped with a warning,
/// but text with no valid line at all is an error. Repeated keys follow
/// `policy`.
pub fn decode_provides(text: &str, policy: DuplicatePolicy) -> Result<ProvidesMap> {
    let mut provides = ProvidesMap::new();
    let mut entries = 0usize;
    let mut malformed = 0usize;

    for (index, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() {
            continue;
        }
        entries += 1;

        match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                if provides.contains_key(key) {
                    match policy {
                        DuplicatePolicy::Reject => {
                            return Err(StoreError::Codec(format!(
                                "duplicate provides key '{}' on line {}",
                                key,
                                index + 1
                            )));
                        }
                        DuplicatePolicy::LastWins => {
                            tracing::debug!("Provides key '{}' repeated, keeping last value", key);
                        }
                    }
                }
                provides.insert(key, value);
            }
            _ => {
                tracing::warn!("Skipping malformed provides line {}", index + 1);
                malformed += 1;
            }
        }
    }

    if entries > 0 && malformed == entries {
        return Err(StoreError::Codec("no valid provides entry".to_string()));
    }
    Ok(provides)
}
