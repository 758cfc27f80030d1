//! Decoded PCM blocks handed from the decoder to the audio bridge.
//! Samples are interleaved (L, R, L, R, ...) in the stream's native format.

/// PCM sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    I16,
    I32,
    F32,
}

impl SampleFormat {
    /// Bytes per single-channel sample
    pub const fn byte_count(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }
}

/// Channel / sample-rate descriptor of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioInfo {
    pub channel_count: u16,
    pub format: SampleFormat,
    pub sample_rate: u32,
}

impl AudioInfo {
    pub fn new(channel_count: u16, format: SampleFormat, sample_rate: u32) -> Self {
        Self {
            channel_count,
            format,
            sample_rate,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.channel_count > 0 && self.sample_rate > 0
    }

    /// Bytes per sample frame (one sample for every channel)
    pub fn frame_byte_count(&self) -> usize {
        self.channel_count as usize * self.format.byte_count()
    }
}

/// Block of interleaved PCM samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    info: AudioInfo,
    data: Vec<u8>,
}

impl AudioBuffer {
    /// Create a silent buffer holding `sample_count` sample frames
    pub fn new(info: AudioInfo, sample_count: usize) -> Self {
        Self {
            info,
            data: vec![0; sample_count * info.frame_byte_count()],
        }
    }

    /// Wrap raw interleaved bytes; a trailing partial sample frame is dropped
    pub fn from_bytes(info: AudioInfo, mut data: Vec<u8>) -> Self {
        let frame_bytes = info.frame_byte_count().max(1);
        data.truncate(data.len() / frame_bytes * frame_bytes);
        Self { info, data }
    }

    /// Build an F32 buffer from interleaved samples
    pub fn from_f32(channel_count: u16, sample_rate: u32, samples: &[f32]) -> Self {
        let info = AudioInfo::new(channel_count, SampleFormat::F32, sample_rate);
        let data = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::from_bytes(info, data)
    }

    /// Build an I16 buffer from interleaved samples
    pub fn from_i16(channel_count: u16, sample_rate: u32, samples: &[i16]) -> Self {
        let info = AudioInfo::new(channel_count, SampleFormat::I16, sample_rate);
        let data = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::from_bytes(info, data)
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// Number of sample frames
    pub fn sample_count(&self) -> usize {
        match self.info.frame_byte_count() {
            0 => 0,
            n => self.data.len() / n,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Scale interleaved samples in place. Integer formats saturate.
pub fn apply_gain(bytes: &mut [u8], format: SampleFormat, gain: f32) {
    if gain == 1.0 {
        return;
    }
    if gain <= 0.0 {
        bytes.fill(0);
        return;
    }
    match format {
        SampleFormat::I16 => {
            for chunk in bytes.chunks_exact_mut(2) {
                let sample = i16::from_ne_bytes([chunk[0], chunk[1]]);
                let scaled = (sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                chunk.copy_from_slice(&scaled.to_ne_bytes());
            }
        }
        SampleFormat::I32 => {
            for chunk in bytes.chunks_exact_mut(4) {
                let sample = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let scaled = (sample as f64 * gain as f64).clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                chunk.copy_from_slice(&scaled.to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for chunk in bytes.chunks_exact_mut(4) {
                let sample = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                chunk.copy_from_slice(&(sample * gain).to_ne_bytes());
            }
        }
    }
}
