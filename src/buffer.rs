/// Fixed-width interleaved S16 sample format of an audio block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

    /// Size in bytes of one sample for every channel.
    pub fn frame_size(&self) -> usize {
        Self::BYTES_PER_SAMPLE * usize::from(self.channels)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }
}

/// One decoded and converted block of interleaved S16 audio, as handed to
/// the output device.
#[derive(Debug)]
pub struct AudioBuffer {
    spec: AudioSpec,
    data: Vec<u8>,
}

impl AudioBuffer {
    pub fn new(spec: AudioSpec) -> Self {
        AudioBuffer { spec, data: Vec::new() }
    }

    pub fn from_samples(spec: AudioSpec, samples: &[i16]) -> Self {
        let buffer = AudioBuffer { spec, data: bytemuck::cast_slice(samples).to_vec() };
        assert!(buffer.is_frame_aligned(), "sample count not divisible by channel count");
        buffer
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn samples(&self) -> Vec<i16> {
        bytemuck::allocation::pod_collect_to_vec(&self.data)
    }

    pub fn is_frame_aligned(&self) -> bool {
        self.data.len() % self.spec.frame_size() == 0
    }

    /// Drops trailing bytes so the block is `len` bytes long.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Grows the block to `len` bytes by repeating the final sample frame
    /// across every channel.
    pub fn pad_with_last_frame(&mut self, len: usize) {
        let frame_size = self.spec.frame_size();

        if len <= self.data.len() || self.data.len() < frame_size {
            return;
        }

        let last_start = self.data.len() - self.data.len() % frame_size - frame_size;
        let last = last_start..last_start + frame_size;

        self.data.truncate(last.end);
        while self.data.len() + frame_size <= len {
            self.data.extend_from_within(last.clone());
        }
    }
}
