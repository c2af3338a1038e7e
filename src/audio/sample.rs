//! Sample codecs for the two negotiated stream formats.
//!
//! The frame ring stores every sample as a 32-bit word so one buffer type
//! serves both PCM16 and FLOAT32 streams. Silence encodes to the all-zero
//! word in both formats.

use super::stream_config::SampleFormat;

/// A PCM sample type the engine can move between streams.
pub trait Sample: Copy + Send + 'static {
    /// Stream format this sample type corresponds to
    const FORMAT: SampleFormat;

    /// Value written for missing frames
    const SILENCE: Self;

    /// Encode into a ring storage word
    fn to_word(self) -> u32;

    /// Decode from a ring storage word
    fn from_word(word: u32) -> Self;
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::Float32;
    const SILENCE: Self = 0.0;

    #[inline]
    fn to_word(self) -> u32 {
        self.to_bits()
    }

    #[inline]
    fn from_word(word: u32) -> Self {
        f32::from_bits(word)
    }
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::Pcm16;
    const SILENCE: Self = 0;

    #[inline]
    fn to_word(self) -> u32 {
        self as u16 as u32
    }

    #[inline]
    fn from_word(word: u32) -> Self {
        word as u16 as i16
    }
}

/// Overwrite `samples` with silence.
#[inline]
pub fn fill_silence<S: Sample>(samples: &mut [S]) {
    for sample in samples.iter_mut() {
        *sample = S::SILENCE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_word_round_trip_preserves_bits() {
        for value in [0.0_f32, -0.0, 1.0, -1.0, 0.123_456, f32::MIN_POSITIVE] {
            assert_eq!(f32::from_word(value.to_word()).to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_i16_word_round_trip_handles_negative_extremes() {
        for value in [0_i16, 1, -1, i16::MIN, i16::MAX] {
            assert_eq!(i16::from_word(value.to_word()), value);
        }
    }

    #[test]
    fn test_silence_is_zero_word() {
        assert_eq!(f32::SILENCE.to_word(), 0);
        assert_eq!(i16::SILENCE.to_word(), 0);
    }

    #[test]
    fn test_fill_silence() {
        let mut buf = [0.5_f32; 8];
        fill_silence(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
    }
}
