//! RCON wire codec: frame building, frame classification and multi-packet
//! reassembly.
//!
//! Every frame on the wire looks like this:
//!
//! | Offset | Size | Meaning                                   |
//! |--------|------|-------------------------------------------|
//! | 0–1    | 2    | Magic bytes `'B' 'E'`                     |
//! | 2–5    | 4    | CRC32 over `0xFF + payload`, little-endian |
//! | 6      | 1    | Literal `0xFF`                            |
//! | 7      | 1    | Message type                              |
//! | 8+     | var  | Type-specific payload                     |
//!
//! The "payload" passed to [`build_packet`] starts with the type byte, so the
//! same framing serves login, command and acknowledgment frames.

use log::warn;
use thiserror::Error;

pub const MAGIC: [u8; 2] = *b"BE";
pub const MARKER: u8 = 0xFF;
/// Magic + checksum + marker + type byte.
pub const HEADER_LEN: usize = 8;

pub const TYPE_LOGIN: u8 = 0x00;
pub const TYPE_COMMAND: u8 = 0x01;
pub const TYPE_MESSAGE: u8 = 0x02;

/// Largest datagram either side is expected to send.
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: {len} bytes (minimum {HEADER_LEN})")]
    TooShort { len: usize },
    #[error("bad magic bytes {0:02x?}")]
    BadMagic([u8; 2]),
    #[error("missing 0xFF marker, found {0:#04x}")]
    BadMarker(u8),
    #[error("checksum mismatch: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    #[error("invalid login response byte {0:?}")]
    BadLoginResponse(Option<u8>),
    #[error("{kind} frame is missing its sequence byte")]
    MissingSequence { kind: &'static str },
    #[error("truncated multi-packet header")]
    TruncatedFragment,
}

/// A frame sent by the game server, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    LoginResponse {
        success: bool,
    },
    CommandResponse {
        sequence: u8,
        data: Vec<u8>,
    },
    CommandFragment {
        sequence: u8,
        total: u8,
        index: u8,
        data: Vec<u8>,
    },
    ServerMessage {
        sequence: u8,
        data: Vec<u8>,
    },
}

/// A frame sent by the client, as seen by the game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Login { password: String },
    Command { sequence: u8, command: String },
    Ack { sequence: u8 },
}

/// CRC32 over the marker byte followed by `payload`.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[MARKER]);
    hasher.update(payload);
    hasher.finalize()
}

/// Frames `payload` (type byte first) for the wire.
pub fn build_packet(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN - 1 + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&checksum(payload).to_le_bytes());
    frame.push(MARKER);
    frame.extend_from_slice(payload);
    frame
}

pub fn login_packet(password: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + password.len());
    payload.push(TYPE_LOGIN);
    payload.extend_from_slice(password.as_bytes());
    build_packet(&payload)
}

pub fn command_packet(sequence: u8, command: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + command.len());
    payload.push(TYPE_COMMAND);
    payload.push(sequence);
    payload.extend_from_slice(command.as_bytes());
    build_packet(&payload)
}

pub fn ack_packet(sequence: u8) -> Vec<u8> {
    build_packet(&[TYPE_MESSAGE, sequence])
}

pub fn login_response_packet(success: bool) -> Vec<u8> {
    build_packet(&[TYPE_LOGIN, u8::from(success)])
}

pub fn command_response_packet(sequence: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.push(TYPE_COMMAND);
    payload.push(sequence);
    payload.extend_from_slice(data);
    build_packet(&payload)
}

pub fn fragment_packet(sequence: u8, total: u8, index: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5 + data.len());
    payload.extend_from_slice(&[TYPE_COMMAND, sequence, 0x00, total, index]);
    payload.extend_from_slice(data);
    build_packet(&payload)
}

pub fn server_message_packet(sequence: u8, text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + text.len());
    payload.push(TYPE_MESSAGE);
    payload.push(sequence);
    payload.extend_from_slice(text.as_bytes());
    build_packet(&payload)
}

/// Validates the header and checksum, returning the payload (type byte first).
pub fn frame_payload(bytes: &[u8]) -> Result<&[u8], CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TooShort { len: bytes.len() });
    }
    let magic = [bytes[0], bytes[1]];
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    if bytes[6] != MARKER {
        return Err(CodecError::BadMarker(bytes[6]));
    }

    let expected = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let payload = &bytes[7..];
    let actual = checksum(payload);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    Ok(payload)
}

/// Classifies a frame received from the game server.
pub fn parse_frame(bytes: &[u8]) -> Result<Packet, CodecError> {
    let payload = frame_payload(bytes)?;
    let body = &payload[1..];

    match payload[0] {
        TYPE_LOGIN => match body.first() {
            Some(0x01) => Ok(Packet::LoginResponse { success: true }),
            Some(0x00) => Ok(Packet::LoginResponse { success: false }),
            other => Err(CodecError::BadLoginResponse(other.copied())),
        },
        TYPE_COMMAND => {
            let (&sequence, rest) = body
                .split_first()
                .ok_or(CodecError::MissingSequence { kind: "command" })?;

            if rest.first() == Some(&0x00) {
                if rest.len() < 3 {
                    return Err(CodecError::TruncatedFragment);
                }
                Ok(Packet::CommandFragment {
                    sequence,
                    total: rest[1],
                    index: rest[2],
                    data: rest[3..].to_vec(),
                })
            } else {
                Ok(Packet::CommandResponse {
                    sequence,
                    data: rest.to_vec(),
                })
            }
        }
        TYPE_MESSAGE => {
            let (&sequence, rest) = body
                .split_first()
                .ok_or(CodecError::MissingSequence { kind: "message" })?;
            Ok(Packet::ServerMessage {
                sequence,
                data: rest.to_vec(),
            })
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

/// Classifies a frame received from a client. Used by the mock server.
pub fn parse_client_frame(bytes: &[u8]) -> Result<ClientPacket, CodecError> {
    let payload = frame_payload(bytes)?;
    let body = &payload[1..];

    match payload[0] {
        TYPE_LOGIN => Ok(ClientPacket::Login {
            password: String::from_utf8_lossy(body).into_owned(),
        }),
        TYPE_COMMAND => {
            let (&sequence, rest) = body
                .split_first()
                .ok_or(CodecError::MissingSequence { kind: "command" })?;
            Ok(ClientPacket::Command {
                sequence,
                command: String::from_utf8_lossy(rest).into_owned(),
            })
        }
        TYPE_MESSAGE => {
            let &sequence = body
                .first()
                .ok_or(CodecError::MissingSequence { kind: "ack" })?;
            Ok(ClientPacket::Ack { sequence })
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

/// Splits `data` into fragment frames of at most `chunk` data bytes each.
///
/// Returns a single plain response frame when the data fits in one chunk.
pub fn split_response(sequence: u8, data: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let chunk = chunk.max(1);
    if data.len() <= chunk {
        return vec![command_response_packet(sequence, data)];
    }

    let parts: Vec<&[u8]> = data.chunks(chunk).collect();
    let total = parts.len().min(u8::MAX as usize) as u8;
    parts
        .iter()
        .take(total as usize)
        .enumerate()
        .map(|(index, part)| fragment_packet(sequence, total, index as u8, part))
        .collect()
}

#[derive(Debug)]
struct PendingMultipacket {
    sequence: u8,
    parts: Vec<Option<Vec<u8>>>,
}

impl PendingMultipacket {
    fn new(sequence: u8, total: u8) -> Self {
        Self {
            sequence,
            parts: vec![None; total as usize],
        }
    }

    fn is_complete(&self) -> bool {
        self.parts.iter().all(Option::is_some)
    }

    fn concat(self) -> Vec<u8> {
        self.parts.into_iter().flatten().flatten().collect()
    }
}

/// Index-addressed reassembly of multi-packet command responses.
///
/// Fragments may arrive in any order; the joined response is only released
/// once every index has been filled.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<PendingMultipacket>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one fragment. Returns the full response once it is complete.
    pub fn push(&mut self, sequence: u8, total: u8, index: u8, data: Vec<u8>) -> Option<Vec<u8>> {
        if total == 0 || index >= total {
            warn!(
                "Dropping fragment {}/{} for sequence {}: index out of range",
                index, total, sequence
            );
            return None;
        }

        if let Some(stale) = self.pending.take_if(|p| p.sequence != sequence) {
            warn!(
                "Discarding incomplete multi-packet response for sequence {} ({} of {} parts)",
                stale.sequence,
                stale.parts.iter().filter(|p| p.is_some()).count(),
                stale.parts.len()
            );
        }

        let pending = self
            .pending
            .get_or_insert_with(|| PendingMultipacket::new(sequence, total));

        if pending.parts.len() != total as usize {
            warn!(
                "Dropping fragment {} for sequence {}: declares {} parts, expected {}",
                index,
                sequence,
                total,
                pending.parts.len()
            );
            return None;
        }

        let slot = &mut pending.parts[index as usize];
        if slot.is_some() {
            warn!(
                "Dropping duplicate fragment {} for sequence {}",
                index, sequence
            );
            return None;
        }
        *slot = Some(data);

        if pending.is_complete() {
            self.pending.take().map(PendingMultipacket::concat)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise CRC-32 (IEEE 802.3, reflected, poly 0xEDB88320).
    fn reference_crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= byte as u32;
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    #[test]
    fn test_checksum_matches_reference() {
        for len in [0usize, 1, 600] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let mut covered = vec![MARKER];
            covered.extend_from_slice(&payload);
            assert_eq!(checksum(&payload), reference_crc32(&covered));
        }
    }

    #[test]
    fn test_reference_crc32_known_vector() {
        assert_eq!(reference_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_frame_layout() {
        let frame = login_packet("secret");

        assert_eq!(&frame[0..2], b"BE");
        assert_eq!(frame[6], 0xFF);
        assert_eq!(frame[7], TYPE_LOGIN);
        assert_eq!(&frame[8..], b"secret");

        let crc = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        assert_eq!(crc, reference_crc32(&frame[6..]));
    }

    #[test]
    fn test_command_roundtrip_various_lengths() {
        for len in [0usize, 1, 513, 1024] {
            let text: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
            let frame = command_packet(9, &text);

            let parsed = parse_client_frame(&frame).unwrap();
            assert_eq!(
                parsed,
                ClientPacket::Command {
                    sequence: 9,
                    command: text.clone(),
                }
            );
        }
    }

    #[test]
    fn test_frame_payload_roundtrip() {
        for len in [1usize, 2, 700] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let frame = build_packet(&payload);
            assert_eq!(frame_payload(&frame).unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn test_login_response_parsing() {
        assert_eq!(
            parse_frame(&login_response_packet(true)).unwrap(),
            Packet::LoginResponse { success: true }
        );
        assert_eq!(
            parse_frame(&login_response_packet(false)).unwrap(),
            Packet::LoginResponse { success: false }
        );

        let odd = build_packet(&[TYPE_LOGIN, 0x07]);
        assert_eq!(
            parse_frame(&odd),
            Err(CodecError::BadLoginResponse(Some(0x07)))
        );

        let missing = build_packet(&[TYPE_LOGIN]);
        assert_eq!(parse_frame(&missing), Err(CodecError::BadLoginResponse(None)));
    }

    #[test]
    fn test_single_command_response() {
        let frame = command_response_packet(3, b"Players on server:");
        assert_eq!(
            parse_frame(&frame).unwrap(),
            Packet::CommandResponse {
                sequence: 3,
                data: b"Players on server:".to_vec(),
            }
        );
    }

    #[test]
    fn test_empty_command_response() {
        let frame = command_response_packet(4, b"");
        assert_eq!(
            parse_frame(&frame).unwrap(),
            Packet::CommandResponse {
                sequence: 4,
                data: Vec::new(),
            }
        );
    }

    #[test]
    fn test_fragment_parsing() {
        let frame = fragment_packet(5, 3, 1, b"middle");
        assert_eq!(
            parse_frame(&frame).unwrap(),
            Packet::CommandFragment {
                sequence: 5,
                total: 3,
                index: 1,
                data: b"middle".to_vec(),
            }
        );

        let truncated = build_packet(&[TYPE_COMMAND, 5, 0x00, 3]);
        assert_eq!(parse_frame(&truncated), Err(CodecError::TruncatedFragment));
    }

    #[test]
    fn test_server_message_parsing() {
        let frame = server_message_packet(200, "Player #1 Alice connected");
        assert_eq!(
            parse_frame(&frame).unwrap(),
            Packet::ServerMessage {
                sequence: 200,
                data: b"Player #1 Alice connected".to_vec(),
            }
        );

        assert_eq!(
            parse_client_frame(&ack_packet(200)).unwrap(),
            ClientPacket::Ack { sequence: 200 }
        );
    }

    #[test]
    fn test_short_frames_are_rejected() {
        for len in 0..HEADER_LEN {
            let bytes = vec![0u8; len];
            assert_eq!(parse_frame(&bytes), Err(CodecError::TooShort { len }));
        }
    }

    #[test]
    fn test_corrupted_frames_are_rejected() {
        let mut frame = command_response_packet(1, b"hello");
        frame[10] ^= 0x20;
        assert!(matches!(
            parse_frame(&frame),
            Err(CodecError::ChecksumMismatch { .. })
        ));

        let mut frame = command_response_packet(1, b"hello");
        frame[0] = b'X';
        assert!(matches!(parse_frame(&frame), Err(CodecError::BadMagic(_))));

        let mut frame = command_response_packet(1, b"hello");
        frame[6] = 0x00;
        assert!(matches!(parse_frame(&frame), Err(CodecError::BadMarker(0x00))));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let frame = build_packet(&[0x09, 1, 2, 3]);
        assert_eq!(parse_frame(&frame), Err(CodecError::UnknownType(0x09)));
    }

    #[test]
    fn test_reassembly_in_order() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(1, 3, 0, b"aa".to_vec()), None);
        assert_eq!(reassembler.push(1, 3, 1, b"bb".to_vec()), None);
        assert_eq!(reassembler.push(1, 3, 2, b"cc".to_vec()), Some(b"aabbcc".to_vec()));
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(1, 3, 2, b"cc".to_vec()), None);
        assert_eq!(reassembler.push(1, 3, 0, b"aa".to_vec()), None);
        assert!(reassembler.is_pending());
        assert_eq!(reassembler.push(1, 3, 1, b"bb".to_vec()), Some(b"aabbcc".to_vec()));
    }

    #[test]
    fn test_last_index_does_not_release_partial_buffer() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(1, 3, 0, b"aa".to_vec()), None);
        assert_eq!(reassembler.push(1, 3, 2, b"cc".to_vec()), None);
        assert!(reassembler.is_pending());
    }

    #[test]
    fn test_reassembly_drops_inconsistent_fragments() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(1, 2, 0, b"aa".to_vec()), None);

        // Wrong declared count and out-of-range index.
        assert_eq!(reassembler.push(1, 4, 1, b"xx".to_vec()), None);
        assert_eq!(reassembler.push(1, 2, 5, b"xx".to_vec()), None);
        // Duplicate.
        assert_eq!(reassembler.push(1, 2, 0, b"zz".to_vec()), None);

        assert_eq!(reassembler.push(1, 2, 1, b"bb".to_vec()), Some(b"aabb".to_vec()));
    }

    #[test]
    fn test_reassembly_discards_stale_sequence() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(1, 2, 0, b"old".to_vec()), None);
        assert_eq!(reassembler.push(2, 2, 1, b"new-b".to_vec()), None);
        assert_eq!(
            reassembler.push(2, 2, 0, b"new-a".to_vec()),
            Some(b"new-anew-b".to_vec())
        );
    }

    #[test]
    fn test_split_response_fragments() {
        let data = b"0123456789";
        let frames = split_response(7, data, 4);
        assert_eq!(frames.len(), 3);

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for frame in frames.iter().rev() {
            if let Packet::CommandFragment {
                sequence,
                total,
                index,
                data,
            } = parse_frame(frame).unwrap()
            {
                result = reassembler.push(sequence, total, index, data);
            } else {
                panic!("Expected fragment");
            }
        }
        assert_eq!(result, Some(data.to_vec()));

        let single = split_response(7, b"abc", 4);
        assert_eq!(single.len(), 1);
    }
}
