//! The RISE chunk multiplexer: frames arbitrary per-substream byte payloads
//! into a single byte-stream, grounded on `dash/InterleaveResource.cpp`.
//!
//! Chunk header byte: `stream_index` in the low 5 bits (31 is reserved for
//! control chunks), a has-timestamp bit, and a 2-bit length-class
//! selecting a 1/2/4/8-byte little-endian length field. An optional 8-byte
//! little-endian UTC-microsecond timestamp follows the length field when
//! the has-timestamp bit is set, then the payload. A zero-length data
//! chunk marks end-of-stream for its substream.

use crate::error::{Error, Result};
use crate::util::Event;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

pub const CONTROL_STREAM_INDEX: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlChunkType {
    UserJsonObject = 48,
    UserBinaryData = 49,
    UserString = 50,
    Discard = 255,
}

/// Disabled sentinel for `timestamp_interval_ms` (all-ones, per spec).
pub const TIMESTAMP_INTERVAL_DISABLED: u64 = u64::MAX;

fn length_class(len: usize) -> (u8, usize) {
    if len <= u8::MAX as usize {
        (0, 1)
    } else if len <= u16::MAX as usize {
        (1, 2)
    } else if len <= u32::MAX as usize {
        (2, 4)
    } else {
        (3, 8)
    }
}

fn encode_chunk(stream_index: u8, payload: &[u8], timestamp_us: Option<u64>) -> Bytes {
    let (class, width) = length_class(payload.len());
    let has_ts = timestamp_us.is_some();
    let header = (stream_index & 0x1F) | ((has_ts as u8) << 5) | (class << 6);

    let mut buf = BytesMut::with_capacity(1 + width + if has_ts { 8 } else { 0 } + payload.len());
    buf.put_u8(header);
    match width {
        1 => buf.put_u8(payload.len() as u8),
        2 => buf.put_u16_le(payload.len() as u16),
        4 => buf.put_u32_le(payload.len() as u32),
        8 => buf.put_u64_le(payload.len() as u64),
        _ => unreachable!(),
    }
    if let Some(ts) = timestamp_us {
        buf.put_u64_le(ts);
    }
    buf.put_slice(payload);
    buf.freeze()
}

fn now_utc_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

pub struct Interleave {
    num_remaining_streams: AtomicUsize,
    timestamp_interval_ms: u64,
    last_timestamp_at: Mutex<Option<Instant>>,
    chunks: Mutex<Vec<Bytes>>,
    event: Event,
    terminal: AtomicBool,
    reader_active: AtomicBool,
}

impl Interleave {
    pub fn new(num_streams: usize, timestamp_interval_ms: u64) -> Self {
        Interleave {
            num_remaining_streams: AtomicUsize::new(num_streams),
            timestamp_interval_ms,
            last_timestamp_at: Mutex::new(None),
            chunks: Mutex::new(Vec::new()),
            event: Event::new(),
            terminal: AtomicBool::new(num_streams == 0),
            reader_active: AtomicBool::new(false),
        }
    }

    async fn maybe_timestamp(&self) -> Option<u64> {
        if self.timestamp_interval_ms == TIMESTAMP_INTERVAL_DISABLED {
            return None;
        }
        let mut last = self.last_timestamp_at.lock().await;
        let now = Instant::now();
        let due = match *last {
            None => true,
            Some(prev) => now.duration_since(prev).as_millis() as u64 >= self.timestamp_interval_ms,
        };
        if due {
            *last = Some(now);
            Some(now_utc_micros())
        } else {
            None
        }
    }

    pub async fn add_stream_data(&self, stream_index: u8, data: &[u8]) -> Result<()> {
        if stream_index >= CONTROL_STREAM_INDEX {
            return Err(Error::BadRequest("stream index out of range".into()));
        }
        if self.terminal.load(Ordering::SeqCst) {
            return Err(Error::Conflict("interleave already terminal".into()));
        }
        let ts = self.maybe_timestamp().await;
        let chunk = encode_chunk(stream_index, data, ts);
        let mut chunks = self.chunks.lock().await;
        chunks.push(chunk);
        drop(chunks);
        if data.is_empty() {
            let remaining = self.num_remaining_streams.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining == 0 {
                self.terminal.store(true, Ordering::SeqCst);
            }
        }
        self.event.notify_all();
        Ok(())
    }

    pub async fn add_control_chunk(&self, ctype: ControlChunkType, payload: &[u8]) -> Result<()> {
        let mut full = Vec::with_capacity(1 + payload.len());
        full.push(ctype as u8);
        full.extend_from_slice(payload);
        let ts = self.maybe_timestamp().await;
        let chunk = encode_chunk(CONTROL_STREAM_INDEX, &full, ts);
        let mut chunks = self.chunks.lock().await;
        chunks.push(chunk);
        drop(chunks);
        self.event.notify_all();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Registers this call as the sole reader; fails `Conflict` if one is
    /// already active.
    pub fn acquire_reader(&self) -> Result<()> {
        if self.reader_active.swap(true, Ordering::SeqCst) {
            return Err(Error::Conflict("interleave already has a reader".into()));
        }
        Ok(())
    }

    pub fn release_reader(&self) {
        self.reader_active.store(false, Ordering::SeqCst);
    }

    /// Chunks emitted since index `from`, plus the new high-water mark.
    pub async fn chunks_since(&self, from: usize) -> (Vec<Bytes>, usize) {
        let chunks = self.chunks.lock().await;
        (chunks[from.min(chunks.len())..].to_vec(), chunks.len())
    }

    /// Subscribes to the next change without suspending; see
    /// [`Event::notified`] for why callers that re-check a condition must
    /// obtain this before checking rather than after.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.event.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_substream_length_class_one() {
        let il = Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED);
        il.add_stream_data(0, &[0x5A, 0xA5, 0x55, 0xAA, 0x33, 0xCC]).await.unwrap();
        il.add_stream_data(0, &[]).await.unwrap();
        let (chunks, _) = il.chunks_since(0).await;
        let mut out = BytesMut::new();
        for c in &chunks {
            out.put_slice(c);
        }
        assert_eq!(
            &out[..],
            &[0x00, 0x06, 0x5A, 0xA5, 0x55, 0xAA, 0x33, 0xCC, 0x00, 0x00][..]
        );
        assert!(il.is_terminal());
    }

    #[tokio::test]
    async fn control_chunk_framing() {
        let il = Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED);
        il.add_stream_data(0, &[0x5A, 0xA5, 0x55, 0xAA, 0x33, 0xCC]).await.unwrap();
        il.add_control_chunk(ControlChunkType::Discard, &[0x5A, 0xA5, 0x55, 0xAA, 0x33, 0xCC])
            .await
            .unwrap();
        il.add_stream_data(0, &[]).await.unwrap();
        let (chunks, _) = il.chunks_since(0).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            &chunks[1][..],
            &[0x1F, 0x07, 0xFF, 0x5A, 0xA5, 0x55, 0xAA, 0x33, 0xCC][..]
        );
    }

    #[tokio::test]
    async fn length_class_selection() {
        let il = Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED);
        let data = vec![0u8; 300];
        il.add_stream_data(0, &data).await.unwrap();
        let (chunks, _) = il.chunks_since(0).await;
        // class 1 => header low bits 6-7 == 01
        assert_eq!(chunks[0][0] >> 6, 1);
    }

    #[tokio::test]
    async fn second_reader_conflicts() {
        let il = Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED);
        il.acquire_reader().unwrap();
        assert!(il.acquire_reader().is_err());
        il.release_reader();
        il.acquire_reader().unwrap();
    }

    #[tokio::test]
    async fn num_remaining_streams_decrements_on_each_eos() {
        let il = Interleave::new(2, TIMESTAMP_INTERVAL_DISABLED);
        il.add_stream_data(0, &[1]).await.unwrap();
        il.add_stream_data(0, &[]).await.unwrap();
        assert!(!il.is_terminal());
        il.add_stream_data(1, &[]).await.unwrap();
        assert!(il.is_terminal());
    }

    #[tokio::test]
    async fn writes_after_terminal_fail() {
        let il = Interleave::new(1, TIMESTAMP_INTERVAL_DISABLED);
        il.add_stream_data(0, &[]).await.unwrap();
        assert!(il.add_stream_data(0, &[1]).await.is_err());
    }
}
