//! # PCM Audio Format
//!
//! Describes the raw audio clients stream (16-bit little-endian mono PCM) and
//! provides the two byte-level helpers the pipeline needs:
//! - a RIFF/WAV header announcing the format to the recognition engine
//! - a cheap peak-amplitude probe used for periodic audio diagnostics

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Format of the audio a session streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_mono(16000)
    }
}

impl AudioFormat {
    /// 16-bit mono PCM at the given sample rate.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// Bytes per sample frame (all channels).
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Duration in milliseconds of `len` bytes of audio in this format.
    pub fn duration_ms(&self, len: usize) -> u64 {
        let byte_rate = self.byte_rate() as u64;
        if byte_rate == 0 {
            return 0;
        }
        len as u64 * 1000 / byte_rate
    }

    /// Streaming WAV header (RIFF/WAVE, `fmt ` + open-ended `data` chunk).
    ///
    /// Chunk sizes are left at zero because the stream length is unknown;
    /// streaming recognizers only read the `fmt ` chunk.
    pub fn wav_header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(b"RIFF");
        // The writes target a Vec and cannot fail
        let _ = header.write_u32::<LittleEndian>(0);
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        let _ = header.write_u32::<LittleEndian>(16);
        let _ = header.write_u16::<LittleEndian>(1); // PCM
        let _ = header.write_u16::<LittleEndian>(self.channels);
        let _ = header.write_u32::<LittleEndian>(self.sample_rate);
        let _ = header.write_u32::<LittleEndian>(self.byte_rate());
        let _ = header.write_u16::<LittleEndian>(self.block_align());
        let _ = header.write_u16::<LittleEndian>(self.bits_per_sample);
        header.extend_from_slice(b"data");
        let _ = header.write_u32::<LittleEndian>(0);
        header
    }
}

/// Largest absolute 16-bit sample in a chunk, or `None` if it holds no full sample.
///
/// Used only for diagnostics (is the microphone actually producing signal?).
/// A trailing odd byte is ignored.
pub fn peak_amplitude(data: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(data);
    let mut peak: Option<u16> = None;

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        let magnitude = sample.unsigned_abs();
        peak = Some(peak.map_or(magnitude, |p| p.max(magnitude)));
    }

    peak
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_layout() {
        let format = AudioFormat::pcm16_mono(16000);
        let header = format.wav_header();

        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[36..40], b"data");

        let mut cursor = Cursor::new(&header[20..36]);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 1);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 1);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 16000);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 32000);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 2);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 16);
    }

    #[test]
    fn test_duration() {
        let format = AudioFormat::default();
        // 32000 bytes = 1 second of 16kHz 16-bit mono
        assert_eq!(format.duration_ms(32000), 1000);
        assert_eq!(format.duration_ms(3200), 100);
    }

    #[test]
    fn test_peak_amplitude() {
        let mut data = Vec::new();
        for sample in [0i16, 120, -4000, 300] {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        assert_eq!(peak_amplitude(&data), Some(4000));

        // i16::MIN has no positive counterpart but must not overflow
        assert_eq!(peak_amplitude(&i16::MIN.to_le_bytes()), Some(32768));

        assert_eq!(peak_amplitude(&[]), None);
        assert_eq!(peak_amplitude(&[7]), None);
    }
}
