//! Capture engine and the fixed sample store.
//!
//! A capture is one hardware-timed burst of 16-bit words. The first
//! [`XSAMP_PRE`] words of every burst are startup transients and are never
//! shown to readers; everything reader-facing is relative to the end of that
//! margin.

use std::fmt;

use crate::hal::CaptureHardware;

/// Maximum number of reader-visible samples in one capture.
pub const XSAMP_MAX: usize = 100_000;
/// Words discarded at the start of every capture.
pub const XSAMP_PRE: usize = 20;
pub const XSAMP_DEFAULT: usize = 1000;
pub const XRATE_DEFAULT: u32 = 10_000;
/// Bytes per sample word.
pub const WORD_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Ready,
    Capturing,
    Error,
}

impl CaptureState {
    /// Numeric value reported in status output.
    pub const fn code(self) -> i64 {
        match self {
            CaptureState::Idle => 0,
            CaptureState::Ready => 1,
            CaptureState::Capturing => 2,
            CaptureState::Error => 3,
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaptureState::Idle => "Idle",
            CaptureState::Ready => "Ready",
            CaptureState::Capturing => "Capturing",
            CaptureState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Sample memory: the discard margin followed by the reader-visible window.
pub struct SampleStore {
    words: Box<[u16]>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self {
            words: vec![0u16; XSAMP_MAX + XSAMP_PRE].into_boxed_slice(),
        }
    }

    /// Total words including the discard margin.
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    /// The reader-visible words.
    pub fn visible(&self) -> &[u16] {
        &self.words[XSAMP_PRE..]
    }

    /// Copy visible bytes (little-endian words) starting at `offset` into
    /// `dst`. Returns the number of bytes copied.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize {
        let visible = self.visible();
        let total = visible.len() * WORD_SIZE;
        if offset >= total {
            return 0;
        }
        let n = dst.len().min(total - offset);
        for (i, out) in dst[..n].iter_mut().enumerate() {
            let pos = offset + i;
            let word = visible[pos / WORD_SIZE].to_le_bytes();
            *out = word[pos % WORD_SIZE];
        }
        n
    }

    fn words_mut(&mut self) -> &mut [u16] {
        &mut self.words
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleStore")
            .field("capacity", &self.words.len())
            .finish()
    }
}

/// Drives one capture at a time into its [`SampleStore`].
///
/// The engine does not guard against a restart while `Capturing`; callers
/// check [`state`](Self::state) before calling [`start`](Self::start).
#[derive(Debug, Default)]
pub struct CaptureEngine {
    state: CaptureState,
    store: SampleStore,
    requested: usize,
    padded: usize,
    remaining: usize,
    completed: usize,
    written: usize,
    sequence: u32,
}

impl CaptureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Reader-visible samples captured so far.
    pub fn sample_count(&self) -> usize {
        self.completed
    }

    /// Padded word count of the current or last capture.
    pub fn padded_count(&self) -> usize {
        self.padded
    }

    /// Label for the next capture, used in diagnostics.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    /// Arm a capture of `sample_count` visible samples at `rate_hz`.
    pub fn start<H: CaptureHardware + ?Sized>(
        &mut self,
        sample_count: usize,
        rate_hz: u32,
        hw: &mut H,
    ) {
        let requested = sample_count.min(XSAMP_MAX);
        let padded = requested + XSAMP_PRE;
        debug_assert!(padded <= self.store.capacity());

        tracing::debug!(
            "Capture {}: {} samples at {} Hz",
            self.sequence,
            requested,
            rate_hz
        );
        hw.set_rate(rate_hz);
        hw.abort_transfer();
        hw.arm_transfer(padded);

        self.requested = requested;
        self.padded = padded;
        self.remaining = padded;
        self.completed = 0;
        self.written = 0;
        self.set_state(CaptureState::Capturing);
    }

    /// Collect words moved by the hardware and update the visible count.
    /// Returns true while the transfer is still active. The store is only
    /// written while `Capturing`.
    pub fn poll_progress<H: CaptureHardware + ?Sized>(&mut self, hw: &mut H) -> bool {
        if self.state == CaptureState::Capturing && self.written < self.padded {
            let dest = &mut self.store.words_mut()[self.written..self.padded];
            self.written += hw.drain_into(dest).min(dest.len());
        }
        self.remaining = hw.remaining_count().min(self.padded);
        self.completed = (self.padded - self.remaining).saturating_sub(XSAMP_PRE);
        self.remaining > 0
    }

    /// Abort the transfer and stop the timing source. Safe in any state.
    pub fn stop<H: CaptureHardware + ?Sized>(&mut self, hw: &mut H) {
        hw.abort_transfer();
    }

    pub fn set_state(&mut self, state: CaptureState) {
        self.state = state;
        tracing::info!("State: {}", state);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Transfer engine that moves a scripted number of words per poll.
    #[derive(Default)]
    pub(crate) struct FakeCapture {
        pub rate: u32,
        pub remaining: usize,
        pub step: usize,
        pub armed: bool,
        pub aborts: usize,
        produced: u16,
    }

    impl FakeCapture {
        pub fn with_step(step: usize) -> Self {
            Self {
                step,
                ..Default::default()
            }
        }
    }

    impl CaptureHardware for FakeCapture {
        fn set_rate(&mut self, hz: u32) {
            self.rate = hz;
        }

        fn arm_transfer(&mut self, count: usize) {
            self.remaining = count;
            self.armed = true;
            self.produced = 0;
        }

        fn abort_transfer(&mut self) {
            self.armed = false;
            self.aborts += 1;
        }

        fn remaining_count(&mut self) -> usize {
            self.remaining
        }

        fn drain_into(&mut self, dest: &mut [u16]) -> usize {
            if !self.armed {
                return 0;
            }
            let n = self.step.min(self.remaining).min(dest.len());
            for word in &mut dest[..n] {
                *word = self.produced;
                self.produced = self.produced.wrapping_add(1);
            }
            self.remaining -= n;
            n
        }
    }

    #[test]
    fn test_capture_to_ready() {
        let mut hw = FakeCapture::with_step(300);
        let mut engine = CaptureEngine::new();

        engine.start(1000, 10_000, &mut hw);
        assert_eq!(engine.state(), CaptureState::Capturing);
        assert_eq!(hw.rate, 10_000);
        assert_eq!(hw.remaining, 1020);

        let mut polls = 0;
        while engine.poll_progress(&mut hw) {
            polls += 1;
            assert!(engine.sample_count() <= 1000);
        }
        assert_eq!(polls, 3);
        assert_eq!(engine.sample_count(), 1000);

        engine.stop(&mut hw);
        engine.set_state(CaptureState::Ready);
        assert_eq!(engine.state(), CaptureState::Ready);
    }

    #[test]
    fn test_presamples_hidden() {
        let mut hw = FakeCapture::with_step(10);
        let mut engine = CaptureEngine::new();
        engine.start(5, 1000, &mut hw);

        engine.poll_progress(&mut hw);
        assert_eq!(engine.sample_count(), 0);
        engine.poll_progress(&mut hw);
        assert_eq!(engine.sample_count(), 0);
        assert!(!engine.poll_progress(&mut hw));
        assert_eq!(engine.sample_count(), 5);

        // First visible word is the 21st produced
        assert_eq!(engine.store().visible()[0], 20);
        let mut bytes = [0u8; 4];
        assert_eq!(engine.store().read_bytes(0, &mut bytes), 4);
        assert_eq!(bytes, [20, 0, 21, 0]);
    }

    #[test]
    fn test_request_bounded() {
        let mut hw = FakeCapture::with_step(0);
        let mut engine = CaptureEngine::new();
        engine.start(XSAMP_MAX * 2, 1000, &mut hw);
        assert_eq!(engine.padded_count(), XSAMP_MAX + XSAMP_PRE);
        assert!(engine.padded_count() <= engine.store().capacity());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut hw = FakeCapture::with_step(100);
        let mut engine = CaptureEngine::new();
        engine.start(1000, 1000, &mut hw);
        engine.poll_progress(&mut hw);

        engine.stop(&mut hw);
        let once = (engine.state(), engine.sample_count(), hw.armed);
        engine.stop(&mut hw);
        assert_eq!((engine.state(), engine.sample_count(), hw.armed), once);
    }

    #[test]
    fn test_no_store_writes_after_stop() {
        let mut hw = crate::sim::SimCapture::new();
        let mut engine = CaptureEngine::new();
        engine.start(100, 1_000_000, &mut hw);
        std::thread::sleep(std::time::Duration::from_millis(5));

        engine.set_state(CaptureState::Error);
        engine.stop(&mut hw);
        assert!(engine.poll_progress(&mut hw));
        assert!(engine.poll_progress(&mut hw));
        assert_eq!(engine.sample_count(), 0);
        assert!(engine.store().visible()[..100].iter().all(|&w| w == 0));
    }

    #[test]
    fn test_read_bytes_bounds() {
        let store = SampleStore::new();
        let end = XSAMP_MAX * WORD_SIZE;
        let mut buf = [0u8; 8];
        assert_eq!(store.read_bytes(end - 3, &mut buf), 3);
        assert_eq!(store.read_bytes(end, &mut buf), 0);
    }
}
