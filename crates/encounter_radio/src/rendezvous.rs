//! Rendezvous parameter codec.
//!
//! Phase one of the handshake reads a small characteristic from the remote
//! peer: the channel number its listener accepts on, as a 4-byte big-endian
//! integer. Phase two opens that channel.

use thiserror::Error;

/// Encoded size of a rendezvous parameter.
pub const RENDEZVOUS_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RendezvousError {
    #[error("Expected 4 bytes, got {0}")]
    Length(usize),

    #[error("Peer is not listening (channel number 0)")]
    NotListening,
}

pub fn encode(channel_number: u32) -> [u8; RENDEZVOUS_LEN] {
    channel_number.to_be_bytes()
}

pub fn decode(bytes: &[u8]) -> Result<u32, RendezvousError> {
    let raw: [u8; RENDEZVOUS_LEN] = bytes
        .try_into()
        .map_err(|_| RendezvousError::Length(bytes.len()))?;
    match u32::from_be_bytes(raw) {
        0 => Err(RendezvousError::NotListening),
        number => Ok(number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        assert_eq!(encode(0x0080), [0x00, 0x00, 0x00, 0x80]);
        assert_eq!(decode(&[0x00, 0x00, 0x10, 0x01]).unwrap(), 0x1001);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(decode(&[0x00, 0x80]), Err(RendezvousError::Length(2)));
        assert_eq!(decode(&[]), Err(RendezvousError::Length(0)));
        assert_eq!(decode(&[0, 0, 0, 0x80, 0]), Err(RendezvousError::Length(5)));
    }

    #[test]
    fn test_zero_means_not_listening() {
        assert_eq!(decode(&encode(0)), Err(RendezvousError::NotListening));
    }
}
