use std::fmt;

use serde::{Serialize, Serializer};

/// EventType identifies the kind of process lifecycle event.
/// Values are the `event_type` byte of the wire record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Fork = 1,
    Exit = 2,
}

/// Maximum EventType value, used for array sizing.
pub const MAX_EVENT_TYPE: usize = 2;

impl EventType {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fork => "fork",
            Self::Exit => "exit",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Fork),
            2 => Some(Self::Exit),
            _ => None,
        }
    }

    /// Return all event types in numeric order.
    pub fn all() -> &'static [Self] {
        &[Self::Fork, Self::Exit]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size of the command name buffer, including the terminating NUL.
pub const COMM_LEN: usize = 16;

/// Usable bytes of a command name.
pub const COMM_CAPACITY: usize = COMM_LEN - 1;

/// Fixed-capacity command name.
///
/// Holds at most [`COMM_CAPACITY`] bytes of valid UTF-8. Longer names are
/// truncated on a character boundary; a NUL byte ends the name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Comm {
    bytes: [u8; COMM_LEN],
    len: u8,
}

impl Comm {
    /// Build a command name from text, truncating if needed.
    pub fn new(name: &str) -> Self {
        let name = name.split('\0').next().unwrap_or_default();

        let mut end = name.len().min(COMM_CAPACITY);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut bytes = [0u8; COMM_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);

        Self {
            bytes,
            len: end as u8,
        }
    }

    /// Build a command name from a raw NUL-padded buffer.
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn from_raw(raw: &[u8]) -> Self {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Self::new(&String::from_utf8_lossy(&raw[..end]))
    }

    /// Returns the name as text.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    /// Returns the name bytes without padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Returns the full NUL-padded buffer.
    pub fn to_raw(&self) -> [u8; COMM_LEN] {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<&str> for Comm {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl Serialize for Comm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Process creation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkEvent {
    /// Monotonic timestamp of the fork in nanoseconds.
    pub timestamp_ns: u64,
    pub pid: u32,
    pub uid: u32,
    pub comm: Comm,
}

/// Process termination event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    /// Monotonic timestamp of the exit in nanoseconds.
    pub timestamp_ns: u64,
    pub pid: u32,
}

/// A lifecycle event as delivered by an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    Fork(ForkEvent),
    Exit(ExitEvent),
    /// Event with a type byte this build does not recognize.
    Unknown { event_type: u8 },
}

impl ProcessEvent {
    /// Convenience constructor for a fork event.
    pub fn fork(timestamp_ns: u64, pid: u32, uid: u32, comm: &str) -> Self {
        Self::Fork(ForkEvent {
            timestamp_ns,
            pid,
            uid,
            comm: Comm::new(comm),
        })
    }

    /// Convenience constructor for an exit event.
    pub fn exit(timestamp_ns: u64, pid: u32) -> Self {
        Self::Exit(ExitEvent { timestamp_ns, pid })
    }

    /// Returns the recognized event type, if any.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Self::Fork(_) => Some(EventType::Fork),
            Self::Exit(_) => Some(EventType::Exit),
            Self::Unknown { .. } => None,
        }
    }

    /// Returns the process id carried by a recognized event.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Fork(e) => Some(e.pid),
            Self::Exit(e) => Some(e.pid),
            Self::Unknown { .. } => None,
        }
    }
}
