use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use super::event::ProcessEvent;
use super::parse::{parse_event, ParseError, RECORD_SIZE};
use super::EventSource;

/// Event source replaying a file of fixed-size wire records.
pub struct ReplaySource {
    path: Option<PathBuf>,
    data: Vec<u8>,
    offset: usize,
}

impl ReplaySource {
    /// Replay the records stored at `path`. The file is read on `start`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            data: Vec::new(),
            offset: 0,
        }
    }

    /// Replay records already held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            path: None,
            data,
            offset: 0,
        }
    }

    /// Number of records left, counting a trailing partial record.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset).div_ceil(RECORD_SIZE)
    }
}

impl EventSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            self.data = std::fs::read(path)
                .with_context(|| format!("reading replay file {}", path.display()))?;
            self.offset = 0;
        }

        info!(records = self.remaining(), "replay source started");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ProcessEvent>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.data.len() - start;

        // Exit records decode from the header alone, so a cut record must be
        // rejected here rather than by the parser.
        if remaining < RECORD_SIZE {
            self.offset = self.data.len();
            return Err(ParseError::Truncated { size: remaining })
                .with_context(|| format!("decoding record at byte {start}"));
        }

        let end = start + RECORD_SIZE;
        self.offset = end;

        parse_event(&self.data[start..end])
            .map(Some)
            .with_context(|| format!("decoding record at byte {start}"))
    }

    async fn stop(&mut self) -> Result<()> {
        self.offset = self.data.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::tracer::parse::encode_event;

    fn records(events: &[ProcessEvent]) -> Vec<u8> {
        events.iter().flat_map(encode_event).collect()
    }

    #[tokio::test]
    async fn test_replays_in_order() {
        let events = [
            ProcessEvent::fork(10, 1, 0, "a"),
            ProcessEvent::Unknown { event_type: 40 },
            ProcessEvent::exit(20, 1),
        ];
        let mut source = ReplaySource::from_bytes(records(&events));
        source.start().await.expect("start");
        assert_eq!(source.remaining(), 3);

        for expected in events {
            assert_eq!(source.next_event().await.expect("decode"), Some(expected));
        }
        assert_eq!(source.next_event().await.expect("end"), None);
    }

    #[tokio::test]
    async fn test_truncated_tail_is_an_error() {
        let mut data = records(&[ProcessEvent::exit(1, 1)]);
        data.extend_from_slice(&[0u8; 7]);

        let mut source = ReplaySource::from_bytes(data);
        source.start().await.expect("start");
        assert!(source.next_event().await.expect("first").is_some());

        let err = source.next_event().await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("byte 40"), "{msg}");
        assert!(msg.contains("too short"), "{msg}");
        assert_eq!(source.next_event().await.expect("end"), None);
    }

    #[tokio::test]
    async fn test_cut_exit_record_is_an_error() {
        let mut data = records(&[ProcessEvent::fork(0, 1, 0, "a")]);
        data.extend_from_slice(&encode_event(&ProcessEvent::exit(10, 1))[..30]);

        let mut source = ReplaySource::from_bytes(data);
        source.start().await.expect("start");
        assert_eq!(source.remaining(), 2);
        assert!(source.next_event().await.expect("fork").is_some());

        let err = source.next_event().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::Truncated { size: 30 })
        );
        assert!(format!("{err:#}").contains("byte 40"));
        assert_eq!(source.next_event().await.expect("end"), None);
    }

    #[tokio::test]
    async fn test_cut_unknown_record_is_an_error() {
        let mut data = encode_event(&ProcessEvent::Unknown { event_type: 9 }).to_vec();
        data.truncate(RECORD_SIZE - 1);

        let mut source = ReplaySource::from_bytes(data);
        source.start().await.expect("start");
        assert!(source.next_event().await.is_err());
        assert_eq!(source.next_event().await.expect("end"), None);
    }

    #[tokio::test]
    async fn test_open_reads_file_on_start() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(&records(&[ProcessEvent::fork(5, 9, 9, "x")]))
            .expect("write");

        let mut source = ReplaySource::open(file.path());
        source.start().await.expect("start");
        assert_eq!(
            source.next_event().await.expect("decode"),
            Some(ProcessEvent::fork(5, 9, 9, "x"))
        );
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let mut source = ReplaySource::open("/nonexistent/proctel.bin");
        let err = source.start().await.unwrap_err();
        assert!(err.to_string().contains("reading replay file"));
    }
}
