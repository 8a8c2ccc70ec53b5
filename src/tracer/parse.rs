//! Wire record codec for process lifecycle events.
//!
//! Every record is [`RECORD_SIZE`] bytes, little endian:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 8    | timestamp_ns   |
//! | 8      | 4    | pid            |
//! | 12     | 4    | uid            |
//! | 16     | 1    | event_type     |
//! | 17     | 7    | padding        |
//! | 24     | 16   | comm (NUL pad) |
//!
//! Exit records carry uid and comm bytes but they are ignored on decode.

use thiserror::Error;

use super::event::{Comm, EventType, ExitEvent, ForkEvent, ProcessEvent, COMM_LEN};

/// Record header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Full record size in bytes.
pub const RECORD_SIZE: usize = HEADER_SIZE + COMM_LEN;

/// Errors that can occur during record parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("event too short: {size} bytes")]
    Truncated { size: usize },

    #[error("reading {event_name}: unexpected end of data")]
    PayloadTruncated { event_name: &'static str },
}

/// Parse a raw record into a [`ProcessEvent`].
///
/// An unrecognized type byte is not an error: it decodes to
/// [`ProcessEvent::Unknown`] so the dispatcher can count it.
pub fn parse_event(data: &[u8]) -> Result<ProcessEvent, ParseError> {
    if data.len() < HEADER_SIZE {
        return Err(ParseError::Truncated { size: data.len() });
    }

    let timestamp_ns = read_u64_le(data, 0);
    let pid = read_u32_le(data, 8);
    let uid = read_u32_le(data, 12);
    let event_type_raw = read_u8(data, 16);

    let Some(event_type) = EventType::from_u8(event_type_raw) else {
        return Ok(ProcessEvent::Unknown {
            event_type: event_type_raw,
        });
    };

    let payload = data.get(HEADER_SIZE..).unwrap_or_default();

    match event_type {
        EventType::Fork => {
            ensure_payload(payload, COMM_LEN, "fork event")?;
            Ok(ProcessEvent::Fork(ForkEvent {
                timestamp_ns,
                pid,
                uid,
                comm: Comm::from_raw(&payload[..COMM_LEN]),
            }))
        }
        EventType::Exit => Ok(ProcessEvent::Exit(ExitEvent { timestamp_ns, pid })),
    }
}

/// Encode an event into a fixed-size record.
pub fn encode_event(event: &ProcessEvent) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];

    match event {
        ProcessEvent::Fork(e) => {
            write_header(&mut buf, e.timestamp_ns, e.pid, e.uid, EventType::Fork as u8);
            buf[HEADER_SIZE..].copy_from_slice(&e.comm.to_raw());
        }
        ProcessEvent::Exit(e) => {
            write_header(&mut buf, e.timestamp_ns, e.pid, 0, EventType::Exit as u8);
        }
        ProcessEvent::Unknown { event_type } => {
            write_header(&mut buf, 0, 0, 0, *event_type);
        }
    }

    buf
}

fn write_header(buf: &mut [u8; RECORD_SIZE], timestamp_ns: u64, pid: u32, uid: u32, kind: u8) {
    buf[0..8].copy_from_slice(&timestamp_ns.to_le_bytes());
    buf[8..12].copy_from_slice(&pid.to_le_bytes());
    buf[12..16].copy_from_slice(&uid.to_le_bytes());
    buf[16] = kind;
}

// ---------------------------------------------------------------------------
// Byte-reading helpers (no panics; callers check lengths up front)
// ---------------------------------------------------------------------------

fn read_u8(data: &[u8], offset: usize) -> u8 {
    data.get(offset).copied().unwrap_or_default()
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_fixed::<4>(data, offset))
}

fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_fixed::<8>(data, offset))
}

fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(src) = data.get(offset..offset + N) {
        out.copy_from_slice(src);
    }
    out
}

fn ensure_payload(data: &[u8], need: usize, name: &'static str) -> Result<(), ParseError> {
    if data.len() < need {
        Err(ParseError::PayloadTruncated { event_name: name })
    } else {
        Ok(())
    }
}
