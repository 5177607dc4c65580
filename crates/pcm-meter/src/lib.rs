//! PCM loudness metering shared between pipeline components.
//!
//! Provides RMS level computation for interleaved 16-bit stereo PCM and a
//! lock-free sample slot that meter tasks overwrite and status readers poll.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Full-scale divisor for signed 16-bit samples.
const I16_FULL_SCALE: f32 = 32768.0;

/// Instantaneous per-channel loudness, normalized to `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LevelSample {
    /// Left channel RMS level.
    pub left: f32,
    /// Right channel RMS level.
    pub right: f32,
}

impl LevelSample {
    /// Silence on both channels.
    pub const ZERO: LevelSample = LevelSample {
        left: 0.0,
        right: 0.0,
    };
}

/// Compute per-channel RMS levels from an interleaved little-endian
/// 16-bit stereo chunk.
///
/// Even sample indices are the left channel, odd indices the right.
/// A trailing odd byte or lone sample is ignored. Output is normalized by
/// the i16 full scale and clamped to `[0, 1]`.
pub fn rms_stereo(chunk: &[u8]) -> LevelSample {
    let mut left_acc = 0.0f64;
    let mut right_acc = 0.0f64;
    let mut pairs = 0usize;

    let mut samples = chunk.chunks_exact(4);
    for frame in &mut samples {
        let l = i16::from_le_bytes([frame[0], frame[1]]) as f64;
        let r = i16::from_le_bytes([frame[2], frame[3]]) as f64;
        left_acc += l * l;
        right_acc += r * r;
        pairs += 1;
    }

    if pairs == 0 {
        return LevelSample::ZERO;
    }

    let left = (left_acc / pairs as f64).sqrt() as f32 / I16_FULL_SCALE;
    let right = (right_acc / pairs as f64).sqrt() as f32 / I16_FULL_SCALE;
    LevelSample {
        left: left.clamp(0.0, 1.0),
        right: right.clamp(0.0, 1.0),
    }
}

/// Shared level slot overwritten by the active meter task.
///
/// Readers get whichever sample was stored last; a read racing a store may
/// pair a new left with an old right, which is acceptable for a UI meter
/// refreshed ~10x/second.
#[derive(Debug, Default)]
pub struct LevelTap {
    left_bits: AtomicU32,
    right_bits: AtomicU32,
}

impl LevelTap {
    /// New tap reporting silence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current sample.
    pub fn store(&self, sample: LevelSample) {
        self.left_bits.store(sample.left.to_bits(), Ordering::Relaxed);
        self.right_bits
            .store(sample.right.to_bits(), Ordering::Relaxed);
    }

    /// Reset to silence.
    pub fn clear(&self) {
        self.store(LevelSample::ZERO);
    }

    /// Snapshot the most recent sample.
    pub fn load(&self) -> LevelSample {
        LevelSample {
            left: f32::from_bits(self.left_bits.load(Ordering::Relaxed)),
            right: f32::from_bits(self.right_bits.load(Ordering::Relaxed)),
        }
    }
}
