//! On-disk record format: `{log_id, event_type, serialized payload, crc}`
//! (spec §4.7).

use crate::event::EventPayload;
use crc32fast::Hasher;
use dedupfs_core::LogId;

/// A single decoded operation-log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Monotonic position of this record in the log.
    pub log_id: LogId,
    /// The event this record carries.
    pub payload: EventPayload,
}

impl LogRecord {
    /// Build a record for the next log id.
    pub fn new(log_id: LogId, payload: EventPayload) -> Self {
        Self { log_id, payload }
    }

    /// Encode as `[len:u32][log_id:u64][event_type:u16][crc:u32][msgpack payload]`.
    ///
    /// The CRC covers `log_id`, `event_type`, and the payload bytes, so a
    /// corrupted record is detected before it is ever deserialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        let event_type = self.payload.event_type();
        let payload_bytes = rmp_serde::to_vec(&self.payload)?;

        let mut crc_input = Vec::with_capacity(8 + 2 + payload_bytes.len());
        crc_input.extend_from_slice(&self.log_id.0.to_le_bytes());
        crc_input.extend_from_slice(&(event_type as u16).to_le_bytes());
        crc_input.extend_from_slice(&payload_bytes);

        let mut hasher = Hasher::new();
        hasher.update(&crc_input);
        let crc = hasher.finalize();

        let body_len = (8 + 2 + 4 + payload_bytes.len()) as u32;
        let mut out = Vec::with_capacity(4 + body_len as usize);
        out.extend_from_slice(&body_len.to_le_bytes());
        out.extend_from_slice(&self.log_id.0.to_le_bytes());
        out.extend_from_slice(&(event_type as u16).to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&payload_bytes);
        Ok(out)
    }

    /// Decode a record body (without the leading length prefix, which the
    /// segment reader strips off to know how much to read).
    pub fn from_body(body: &[u8]) -> Result<Self, RecordDecodeError> {
        if body.len() < 14 {
            return Err(RecordDecodeError::Truncated);
        }
        let log_id = u64::from_le_bytes(body[0..8].try_into().unwrap());
        let _event_type = u16::from_le_bytes(body[8..10].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(body[10..14].try_into().unwrap());
        let payload_bytes = &body[14..];

        let mut crc_input = Vec::with_capacity(10 + payload_bytes.len());
        crc_input.extend_from_slice(&body[0..10]);
        crc_input.extend_from_slice(payload_bytes);
        let mut hasher = Hasher::new();
        hasher.update(&crc_input);
        if hasher.finalize() != stored_crc {
            return Err(RecordDecodeError::ChecksumMismatch);
        }

        let payload: EventPayload = rmp_serde::from_slice(payload_bytes)
            .map_err(|e| RecordDecodeError::Deserialize(e.to_string()))?;

        Ok(LogRecord {
            log_id: LogId(log_id),
            payload,
        })
    }
}

/// Failure modes while decoding a record body.
#[derive(Debug, thiserror::Error)]
pub enum RecordDecodeError {
    /// Fewer bytes than the fixed header requires.
    #[error("record body truncated")]
    Truncated,
    /// Stored CRC does not match recomputed CRC.
    #[error("record checksum mismatch")]
    ChecksumMismatch,
    /// MessagePack payload failed to parse.
    #[error("record payload deserialize failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_core::VolumeId;

    #[test]
    fn record_round_trips() {
        let record = LogRecord::new(
            LogId(5),
            EventPayload::VolumeAttach {
                volume: VolumeId(1),
            },
        );
        let bytes = record.to_bytes().unwrap();
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let body = &bytes[4..4 + len];
        let decoded = LogRecord::from_body(body).unwrap();
        assert_eq!(decoded.log_id, record.log_id);
    }

    #[test]
    fn corrupted_record_is_detected() {
        let record = LogRecord::new(LogId(1), EventPayload::LogEmpty);
        let bytes = record.to_bytes().unwrap();
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut body = bytes[4..4 + len].to_vec();
        let last = body.len() - 1;
        body[last] ^= 0xFF;
        assert!(matches!(
            LogRecord::from_body(&body),
            Err(RecordDecodeError::ChecksumMismatch) | Err(RecordDecodeError::Deserialize(_))
        ));
    }
}
