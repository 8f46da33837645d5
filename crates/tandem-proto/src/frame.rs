//! Length-prefixed CBOR framing for [`ClientActionMessage`].
//!
//! ```text
//! ┌──────────────────┬───────────────────────────┐
//! │ length (u32, BE) │ CBOR(ClientActionMessage) │
//! └──────────────────┴───────────────────────────┘
//! ```
//!
//! The length covers only the CBOR body. Readers check it against a maximum
//! before allocating.

use crate::{
    errors::{ProtocolError, Result},
    message::ClientActionMessage,
};

/// Size of the length prefix.
pub const PREFIX_SIZE: usize = 4;

/// Default upper bound on a frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Serialize a message to CBOR.
pub fn to_cbor(message: &ClientActionMessage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(message, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a message from CBOR.
pub fn from_cbor(bytes: &[u8]) -> Result<ClientActionMessage> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Encode a message as a length-prefixed frame.
pub fn encode_frame(message: &ClientActionMessage, max_size: usize) -> Result<Vec<u8>> {
    let body = to_cbor(message)?;
    if body.len() > max_size {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: max_size });
    }

    let mut out = Vec::with_capacity(PREFIX_SIZE + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse a length prefix, rejecting bodies larger than `max_size`.
pub fn body_length(prefix: [u8; PREFIX_SIZE], max_size: usize) -> Result<usize> {
    let size = u32::from_be_bytes(prefix) as usize;
    if size > max_size {
        return Err(ProtocolError::FrameTooLarge { size, max: max_size });
    }
    Ok(size)
}

/// Decode one complete frame from `bytes`.
///
/// Returns the message and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8], max_size: usize) -> Result<(ClientActionMessage, usize)> {
    let Some(prefix) = bytes.get(..PREFIX_SIZE) else {
        return Err(ProtocolError::Truncated { expected: PREFIX_SIZE, actual: bytes.len() });
    };
    let mut raw = [0u8; PREFIX_SIZE];
    raw.copy_from_slice(prefix);

    let size = body_length(raw, max_size)?;
    let end = PREFIX_SIZE + size;
    let Some(body) = bytes.get(PREFIX_SIZE..end) else {
        return Err(ProtocolError::Truncated { expected: end, actual: bytes.len() });
    };

    Ok((from_cbor(body)?, end))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        address::{Address, ChannelId, Digest},
        message::ProtocolName,
        payloads::{Payload, UpdateData},
    };

    fn update_message(state: Vec<u8>) -> ClientActionMessage {
        ClientActionMessage::new(
            ProtocolName::Update,
            Address([1; 20]),
            Address([2; 20]),
            ChannelId([3; 20]),
            Payload::Update(UpdateData {
                app_state_hash: Some(Digest::of(&state)),
                encoded_app_state: state,
                local_nonce: Some(4),
            }),
        )
    }

    #[test]
    fn decode_reports_consumed_length() {
        let msg = update_message(vec![0xab; 16]);
        let mut bytes = encode_frame(&msg, DEFAULT_MAX_FRAME_SIZE).unwrap();
        let frame_len = bytes.len();
        bytes.extend_from_slice(&[0xff; 8]);

        let (decoded, consumed) = decode_frame(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(consumed, frame_len);
    }

    #[test]
    fn oversized_body_rejected_on_encode() {
        let msg = update_message(vec![0; 256]);
        let err = encode_frame(&msg, 64).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 64, .. }));
    }

    #[test]
    fn oversized_prefix_rejected_before_allocation() {
        let err = body_length(u32::MAX.to_be_bytes(), DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn truncated_body_rejected() {
        let msg = update_message(vec![1, 2, 3]);
        let bytes = encode_frame(&msg, DEFAULT_MAX_FRAME_SIZE).unwrap();
        let err = decode_frame(&bytes[..bytes.len() - 1], DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_frame(&bytes, DEFAULT_MAX_FRAME_SIZE);
        }
    }
}
