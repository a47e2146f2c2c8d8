//! Streaming transfer layer.
//!
//! Presents the sample store as a pull-based virtual file in two encodings:
//! raw little-endian words and standard base64 text. Each reader holds one
//! slot from a fixed pool; slot lengths are frozen from the sample count at
//! open time.
//!
//! Base64 output is correct for any sequence of read sizes, including reads
//! shorter than one 4-character group. The partially delivered group is kept
//! in the slot's own lookahead, so interleaved readers never share encoder
//! state.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::capture::{SampleStore, WORD_SIZE, XSAMP_DEFAULT};
use crate::error::StreamError;

/// Number of transfer slots.
pub const MAX_CONNS: usize = 8;
/// Slots untouched for longer than this are reclaimed by the idle sweep.
pub const IDLE_TIMEOUT_MS: u64 = 30_000;
/// Raw bytes encoded per base64 read.
pub const BASE64_SEGMENT: usize = 720;
/// Capture cursor advance per completed transfer.
const CURSOR_STEP: u32 = (XSAMP_DEFAULT / 100) as u32;

/// Encoded length of `n` raw bytes: every started 3-byte group costs 4
/// characters.
pub const fn base64_length(n: usize) -> usize {
    n / 3 * 4 + if n % 3 != 0 { 4 } else { 0 }
}

/// Upper bound on the raw bytes behind `m` encoded characters.
pub const fn base64_decoded_length(m: usize) -> usize {
    m / 4 * 3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Base64,
}

impl Encoding {
    /// Output size for `raw_len` bytes of sample data.
    pub const fn output_length(self, raw_len: usize) -> usize {
        match self {
            Encoding::Raw => raw_len,
            Encoding::Base64 => base64_length(raw_len),
        }
    }
}

/// Result of [`TransferPool::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: usize,
    /// Monotonic counter, not wall-clock time.
    pub mtime: u64,
}

/// Handle to an open slot. Stale handles are rejected once the slot is
/// closed or reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: usize,
    generation: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// One encoded group held back for a short read.
#[derive(Debug, Clone, Copy, Default)]
struct Lookahead {
    chars: [u8; 4],
    len: usize,
    pos: usize,
}

impl Lookahead {
    fn pending(&self) -> &[u8] {
        &self.chars[self.pos..self.len]
    }

    fn clear(&mut self) {
        *self = Lookahead::default();
    }
}

#[derive(Debug)]
struct TransferSlot {
    encoding: Encoding,
    output_position: usize,
    output_length: usize,
    input_position: usize,
    input_length: usize,
    opened_ms: u64,
    last_activity_ms: u64,
    lookahead: Lookahead,
}

impl TransferSlot {
    fn remaining_output(&self) -> usize {
        self.output_length - self.output_position
    }

    /// Encode the group starting at `input_position` into the lookahead.
    fn fill_lookahead(&mut self, store: &SampleStore) -> Result<(), StreamError> {
        let mut raw = [0u8; 3];
        let n = (self.input_length - self.input_position).min(3);
        let n = store.read_bytes(self.input_position, &mut raw[..n]);
        let mut chars = [0u8; 4];
        let len = STANDARD
            .encode_slice(&raw[..n], &mut chars)
            .map_err(|e| StreamError::Encode(e.to_string()))?;
        self.lookahead = Lookahead {
            chars,
            len,
            pos: 0,
        };
        self.input_position += n;
        Ok(())
    }

    fn read_raw(&mut self, store: &SampleStore, buf: &mut [u8]) -> usize {
        let want = self.remaining_output().min(buf.len());
        let n = store.read_bytes(self.input_position, &mut buf[..want]);
        self.input_position += n;
        self.output_position += n;
        n
    }

    fn read_base64(&mut self, store: &SampleStore, buf: &mut [u8]) -> Result<usize, StreamError> {
        let limit = self.remaining_output().min(buf.len());
        let mut out = 0;

        let pending = self.lookahead.pending();
        if !pending.is_empty() {
            let n = pending.len().min(limit);
            buf[..n].copy_from_slice(&pending[..n]);
            self.lookahead.pos += n;
            out += n;
        }

        // Whole groups straight into the caller's buffer
        let groups = ((limit - out) / 4).min(BASE64_SEGMENT / 3);
        if groups > 0 {
            let mut segment = [0u8; BASE64_SEGMENT];
            let take = (groups * 3).min(self.input_length - self.input_position);
            let take = store.read_bytes(self.input_position, &mut segment[..take]);
            let written = STANDARD
                .encode_slice(&segment[..take], &mut buf[out..])
                .map_err(|e| StreamError::Encode(e.to_string()))?;
            self.input_position += take;
            out += written;
        }

        // A tail shorter than one group goes through the lookahead
        if out < limit && self.lookahead.pending().is_empty() && groups < BASE64_SEGMENT / 3 {
            self.fill_lookahead(store)?;
            let pending = self.lookahead.pending();
            let n = pending.len().min(limit - out);
            buf[out..out + n].copy_from_slice(&pending[..n]);
            self.lookahead.pos += n;
            out += n;
        }

        self.output_position += out;
        Ok(out)
    }

    fn seek(&mut self, store: &SampleStore, offset: usize) -> Result<usize, StreamError> {
        let offset = offset.min(self.output_length);
        match self.encoding {
            Encoding::Raw => {
                self.input_position = offset;
            }
            Encoding::Base64 => {
                self.lookahead.clear();
                self.input_position = (offset / 4 * 3).min(self.input_length);
                if offset % 4 != 0 {
                    self.fill_lookahead(store)?;
                    self.lookahead.pos = offset % 4;
                }
            }
        }
        self.output_position = offset;
        Ok(offset)
    }
}

#[derive(Debug, Default)]
struct SlotEntry {
    generation: u32,
    transfer: Option<TransferSlot>,
}

/// Fixed pool of transfer slots over one sample store.
#[derive(Debug)]
pub struct TransferPool {
    slots: Vec<SlotEntry>,
    mtime: u64,
    capture_cursor: u32,
}

impl Default for TransferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferPool {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CONNS).map(|_| SlotEntry::default()).collect(),
            mtime: 0,
            capture_cursor: 0,
        }
    }

    /// Size of the virtual file for `sample_count` samples.
    pub fn stat(&mut self, encoding: Encoding, path: &str, sample_count: usize) -> FileStat {
        let size = encoding.output_length(sample_count * WORD_SIZE);
        let mtime = self.mtime;
        self.mtime += 1;
        tracing::debug!("Stat  file {} size {}", path, size);
        FileStat { size, mtime }
    }

    /// Claim the first free slot. Lengths are frozen from `sample_count`.
    pub fn open(
        &mut self,
        encoding: Encoding,
        path: &str,
        sample_count: usize,
        now_ms: u64,
    ) -> Result<SlotId, StreamError> {
        if path.contains(".gz") {
            return Err(StreamError::UnsupportedVariant(path.to_string()));
        }
        let index = self
            .slots
            .iter()
            .position(|entry| entry.transfer.is_none())
            .ok_or(StreamError::PoolExhausted)?;

        let input_length = sample_count * WORD_SIZE;
        let entry = &mut self.slots[index];
        entry.generation = entry.generation.wrapping_add(1);
        entry.transfer = Some(TransferSlot {
            encoding,
            output_position: 0,
            output_length: encoding.output_length(input_length),
            input_position: 0,
            input_length,
            opened_ms: now_ms,
            last_activity_ms: now_ms,
            lookahead: Lookahead::default(),
        });
        tracing::info!("Open  file {} {}", index, path);
        Ok(SlotId {
            index,
            generation: entry.generation,
        })
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut TransferSlot, StreamError> {
        match self.slots.get_mut(id.index) {
            Some(entry) if entry.generation == id.generation => {
                entry.transfer.as_mut().ok_or(StreamError::SlotClosed(id.index))
            }
            _ => Err(StreamError::SlotClosed(id.index)),
        }
    }

    fn slot(&self, id: SlotId) -> Result<&TransferSlot, StreamError> {
        match self.slots.get(id.index) {
            Some(entry) if entry.generation == id.generation => {
                entry.transfer.as_ref().ok_or(StreamError::SlotClosed(id.index))
            }
            _ => Err(StreamError::SlotClosed(id.index)),
        }
    }

    /// Fill `buf` with the next bytes of the transfer. Returns 0 at the end.
    pub fn read(
        &mut self,
        id: SlotId,
        store: &SampleStore,
        buf: &mut [u8],
        now_ms: u64,
    ) -> Result<usize, StreamError> {
        let slot = self.slot_mut(id)?;
        slot.last_activity_ms = now_ms;
        let n = match slot.encoding {
            Encoding::Raw => slot.read_raw(store, buf),
            Encoding::Base64 => slot.read_base64(store, buf)?,
        };
        tracing::trace!(
            "Read  file {} req {} dlen {} pos {} len {}",
            id.index,
            buf.len(),
            n,
            slot.output_position,
            slot.output_length
        );
        Ok(n)
    }

    /// Move the output position, clamped to the transfer length.
    pub fn seek(
        &mut self,
        id: SlotId,
        store: &SampleStore,
        offset: usize,
        now_ms: u64,
    ) -> Result<usize, StreamError> {
        let slot = self.slot_mut(id)?;
        slot.last_activity_ms = now_ms;
        tracing::debug!("Seek  file {} offset {}", id.index, offset);
        slot.seek(store, offset)
    }

    /// Release the slot and log its throughput.
    pub fn close(&mut self, id: SlotId, now_ms: u64) -> Result<(), StreamError> {
        let slot = self.slot(id)?;
        let dt = now_ms.saturating_sub(slot.opened_ms);
        let speed = if dt > 0 {
            slot.output_length as u64 * 1000 / dt
        } else {
            0
        };
        tracing::info!(
            "Close file {}, {} msec, {} of {} bytes, {} bytes/sec",
            id.index,
            dt,
            slot.output_position,
            slot.output_length,
            speed
        );
        self.slots[id.index].transfer = None;
        self.capture_cursor = self.capture_cursor.wrapping_add(CURSOR_STEP);
        Ok(())
    }

    /// Close every slot idle for longer than [`IDLE_TIMEOUT_MS`]. Returns the
    /// number of slots reclaimed.
    pub fn reclaim_idle(&mut self, now_ms: u64) -> usize {
        let mut reclaimed = 0;
        for entry in &mut self.slots {
            let idle = entry
                .transfer
                .as_ref()
                .is_some_and(|slot| now_ms.saturating_sub(slot.last_activity_ms) > IDLE_TIMEOUT_MS);
            if idle {
                entry.transfer = None;
                reclaimed += 1;
                tracing::info!("Closing unused file transfer");
            }
        }
        reclaimed
    }

    /// Total output length of an open transfer.
    pub fn output_length(&self, id: SlotId) -> Result<usize, StreamError> {
        self.slot(id).map(|slot| slot.output_length)
    }

    /// Current output position of an open transfer.
    pub fn position(&self, id: SlotId) -> Result<usize, StreamError> {
        self.slot(id).map(|slot| slot.output_position)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|e| e.transfer.is_some()).count()
    }

    /// Counter advanced by every completed transfer.
    pub fn capture_cursor(&self) -> u32 {
        self.capture_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::FakeCapture;
    use crate::capture::CaptureEngine;
    use pretty_assertions::assert_eq;

    /// Capture engine holding `samples` visible words counting up from 20.
    fn engine_with(samples: usize) -> CaptureEngine {
        let mut hw = FakeCapture::with_step(usize::MAX);
        let mut engine = CaptureEngine::new();
        engine.start(samples, 1000, &mut hw);
        engine.poll_progress(&mut hw);
        engine
    }

    fn raw_bytes(store: &SampleStore, len: usize) -> Vec<u8> {
        let mut raw = vec![0u8; len];
        store.read_bytes(0, &mut raw);
        raw
    }

    fn drain(pool: &mut TransferPool, id: SlotId, store: &SampleStore, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = pool.read(id, store, &mut buf, 0).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_base64_length() {
        assert_eq!(base64_length(0), 0);
        assert_eq!(base64_length(1), 4);
        assert_eq!(base64_length(2), 4);
        assert_eq!(base64_length(3), 4);
        assert_eq!(base64_length(10), 16);
        for k in 0..50 {
            assert_eq!(base64_length(3 * k), 4 * k);
        }
        for n in 0..100 {
            let back = base64_decoded_length(base64_length(n));
            assert!(back >= n && back <= n + 2, "n={} back={}", n, back);
        }
    }

    #[test]
    fn test_raw_stream() {
        let engine = engine_with(100);
        let store = engine.store();
        let mut pool = TransferPool::new();
        let id = pool.open(Encoding::Raw, "/data.bin", 100, 0).unwrap();

        let out = drain(&mut pool, id, store, 33);
        assert_eq!(out.len(), 200);
        assert_eq!(out, raw_bytes(store, 200));
    }

    #[test]
    fn test_base64_any_chunking() {
        let engine = engine_with(500);
        let store = engine.store();
        let expected = STANDARD.encode(raw_bytes(store, 1000));

        for chunk in [1, 2, 3, 5, 7, 24, 100, 961, 4096] {
            let mut pool = TransferPool::new();
            let id = pool.open(Encoding::Base64, "/data.txt", 500, 0).unwrap();
            let out = drain(&mut pool, id, store, chunk);
            assert_eq!(String::from_utf8(out).unwrap(), expected, "chunk {}", chunk);
        }
    }

    #[test]
    fn test_base64_padding() {
        let engine = engine_with(5);
        let store = engine.store();
        let mut pool = TransferPool::new();

        let mut id = pool.open(Encoding::Base64, "/data.txt", 5, 0).unwrap();
        pool.close(id, 0).unwrap();
        // 10 raw bytes from 5 samples
        assert_eq!(pool.stat(Encoding::Base64, "/data.txt", 5).size, 16);

        id = pool.open(Encoding::Base64, "/data.txt", 5, 0).unwrap();
        let out = drain(&mut pool, id, store, 5);
        assert_eq!(out.len(), 16);
        assert!(out.ends_with(b"=="));
        assert!(!out[..14].contains(&b'='));
    }

    #[test]
    fn test_base64_nine_bytes() {
        let engine = engine_with(5);
        let store = engine.store();
        let mut slot = TransferSlot {
            encoding: Encoding::Base64,
            output_position: 0,
            output_length: base64_length(9),
            input_position: 0,
            input_length: 9,
            opened_ms: 0,
            last_activity_ms: 0,
            lookahead: Lookahead::default(),
        };
        assert_eq!(slot.output_length, 12);

        let mut buf = [0u8; 12];
        let mut out = Vec::new();
        for _ in 0..12 {
            let n = slot.read_base64(store, &mut buf[..1]).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out.len(), 12);
        assert!(!out.contains(&b'='));
        assert_eq!(out, STANDARD.encode(raw_bytes(store, 9)).into_bytes());
    }

    #[test]
    fn test_interleaved_readers_independent() {
        let engine = engine_with(50);
        let store = engine.store();
        let expected = STANDARD.encode(raw_bytes(store, 100)).into_bytes();
        let mut pool = TransferPool::new();
        let a = pool.open(Encoding::Base64, "/data.txt", 50, 0).unwrap();
        let b = pool.open(Encoding::Base64, "/data.txt", 50, 0).unwrap();

        let (mut out_a, mut out_b) = (Vec::new(), Vec::new());
        let mut buf = [0u8; 3];
        loop {
            let na = pool.read(a, store, &mut buf[..3], 0).unwrap();
            out_a.extend_from_slice(&buf[..na]);
            let nb = pool.read(b, store, &mut buf[..2], 0).unwrap();
            out_b.extend_from_slice(&buf[..nb]);
            if na == 0 && nb == 0 {
                break;
            }
        }
        assert_eq!(out_a, expected);
        assert_eq!(out_b, expected);
    }

    #[test]
    fn test_seek_resumes_mid_group() {
        let engine = engine_with(50);
        let store = engine.store();
        let expected = STANDARD.encode(raw_bytes(store, 100)).into_bytes();
        let mut pool = TransferPool::new();
        let id = pool.open(Encoding::Base64, "/data.txt", 50, 0).unwrap();

        assert_eq!(pool.seek(id, store, 7, 0).unwrap(), 7);
        let out = drain(&mut pool, id, store, 10);
        assert_eq!(out, expected[7..].to_vec());

        assert_eq!(pool.seek(id, store, 10_000, 0).unwrap(), expected.len());
        assert_eq!(pool.read(id, store, &mut [0u8; 8], 0).unwrap(), 0);
    }

    #[test]
    fn test_raw_seek() {
        let engine = engine_with(10);
        let store = engine.store();
        let mut pool = TransferPool::new();
        let id = pool.open(Encoding::Raw, "/data.bin", 10, 0).unwrap();
        pool.seek(id, store, 15, 0).unwrap();
        let out = drain(&mut pool, id, store, 64);
        assert_eq!(out, raw_bytes(store, 20)[15..].to_vec());
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = TransferPool::new();
        let ids: Vec<_> = (0..MAX_CONNS)
            .map(|_| pool.open(Encoding::Raw, "/data.bin", 10, 0).unwrap())
            .collect();
        assert_eq!(
            pool.open(Encoding::Raw, "/data.bin", 10, 0),
            Err(StreamError::PoolExhausted)
        );

        pool.close(ids[3], 10).unwrap();
        assert!(pool.open(Encoding::Raw, "/data.bin", 10, 0).is_ok());
        assert!(pool.open(Encoding::Raw, "/data.bin", 10, 0).is_err());
    }

    #[test]
    fn test_compressed_variant_rejected() {
        let mut pool = TransferPool::new();
        assert!(matches!(
            pool.open(Encoding::Raw, "/data.bin.gz", 10, 0),
            Err(StreamError::UnsupportedVariant(_))
        ));
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn test_lengths_frozen_at_open() {
        let mut pool = TransferPool::new();
        let id = pool.open(Encoding::Base64, "/data.txt", 3, 0).unwrap();
        assert_eq!(pool.output_length(id).unwrap(), 8);
        // A later stat sees a different count; the open slot does not
        assert_eq!(pool.stat(Encoding::Base64, "/data.txt", 30).size, 80);
        assert_eq!(pool.output_length(id).unwrap(), 8);
    }

    #[test]
    fn test_idle_reclaim_and_stale_handle() {
        let engine = engine_with(10);
        let store = engine.store();
        let mut pool = TransferPool::new();
        let old = pool.open(Encoding::Raw, "/data.bin", 10, 0).unwrap();
        let busy = pool.open(Encoding::Raw, "/data.bin", 10, 0).unwrap();

        pool.read(busy, store, &mut [0u8; 2], 20_000).unwrap();
        assert_eq!(pool.reclaim_idle(IDLE_TIMEOUT_MS + 1), 1);
        assert_eq!(pool.open_count(), 1);

        let reused = pool.open(Encoding::Raw, "/data.bin", 10, 31_000).unwrap();
        assert_eq!(reused.index(), old.index());
        assert_eq!(
            pool.read(old, store, &mut [0u8; 2], 31_000),
            Err(StreamError::SlotClosed(old.index()))
        );
        assert!(pool.read(reused, store, &mut [0u8; 2], 31_000).is_ok());
    }

    #[test]
    fn test_close_advances_cursor() {
        let mut pool = TransferPool::new();
        let id = pool.open(Encoding::Raw, "/data.bin", 10, 0).unwrap();
        pool.close(id, 100).unwrap();
        assert_eq!(pool.capture_cursor(), 10);
        assert!(pool.close(id, 100).is_err());
        assert_eq!(pool.capture_cursor(), 10);
    }

    #[test]
    fn test_stat_mtime_increases() {
        let mut pool = TransferPool::new();
        let a = pool.stat(Encoding::Raw, "/data.bin", 10);
        let b = pool.stat(Encoding::Raw, "/data.bin", 10);
        assert_eq!(a.size, 20);
        assert!(b.mtime > a.mtime);
    }
}
