//! PCM16 / WAV conversion for speech output and visualizer input.

use thiserror::Error;

pub const WAV_HEADER_LEN: usize = 44;
pub const DEFAULT_SPEECH_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("invalid audio layout: {0}")]
    InvalidLayout(String),
    #[error("invalid WAV header")]
    InvalidHeader,
    #[error("{0} chunk not found")]
    MissingChunk(&'static str),
    #[error("fmt chunk too small")]
    FmtTooSmall,
    #[error("unsupported WAV encoding (format {format}, {bits} bits)")]
    Unsupported { format: u16, bits: u16 },
    #[error("WAV format mismatch across parts")]
    FormatMismatch,
    #[error("{0} bytes of sample data do not fit in a WAV file")]
    TooLarge(usize),
}

/// Decoded multi-channel audio. Samples are conceptually in [-1, 1] and
/// every channel has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidLayout("sample rate must be positive".into()));
        }
        if channels.is_empty() {
            return Err(AudioError::InvalidLayout("at least one channel required".into()));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(AudioError::InvalidLayout("channels differ in length".into()));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average of all channels for frames `[start, end)`, clipped to the buffer.
    pub fn mono_range(&self, start: usize, end: usize) -> Vec<f32> {
        let end = end.min(self.frames());
        let start = start.min(end);
        let scale = 1.0 / self.channels.len() as f32;
        (start..end)
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }

    /// Interleaved copy of frames `[start, end)`, clipped to the buffer.
    pub fn interleaved_range(&self, start: usize, end: usize) -> Vec<f32> {
        let end = end.min(self.frames());
        let start = start.min(end);
        let mut out = Vec::with_capacity((end - start) * self.channels.len());
        for i in start..end {
            for c in &self.channels {
                out.push(c[i]);
            }
        }
        out
    }
}

fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encodes a buffer as a canonical 16-bit PCM WAV file.
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>, AudioError> {
    let channels = buffer.channel_count();
    let data_len = buffer.frames() * channels * 2;
    let fmt = WavFmt::pcm16(buffer.sample_rate, channels as u16);

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len);
    write_wav_header(&mut out, &fmt, 16, data_len)?;
    for i in 0..buffer.frames() {
        for c in &buffer.channels {
            out.extend_from_slice(&quantize(c[i]).to_le_bytes());
        }
    }
    Ok(out)
}

/// Reinterprets raw little-endian 16-bit PCM as an [`AudioBuffer`].
///
/// Bytes that do not make up a whole frame at the end of the stream are
/// dropped.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channel_count: usize) -> Result<AudioBuffer, AudioError> {
    if channel_count == 0 {
        return Err(AudioError::InvalidLayout("channel count must be positive".into()));
    }
    let frame_bytes = channel_count * 2;
    let frames = bytes.len() / frame_bytes;
    let trailing = bytes.len() % frame_bytes;
    if trailing != 0 {
        tracing::debug!(trailing, frame_bytes, "dropping partial trailing PCM frame");
    }

    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (c, channel) in channels.iter_mut().enumerate() {
            let sample = i16::from_le_bytes([frame[c * 2], frame[c * 2 + 1]]);
            channel.push(sample as f32 / 32768.0);
        }
    }
    AudioBuffer::new(sample_rate, channels)
}

/// Parses a PCM16 WAV file (any chunk order) into an [`AudioBuffer`].
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, AudioError> {
    let (fmt, _) = parse_wav_fmt(bytes)?;
    if fmt.audio_format != 1 || fmt.bits_per_sample != 16 {
        return Err(AudioError::Unsupported {
            format: fmt.audio_format,
            bits: fmt.bits_per_sample,
        });
    }
    let data = parse_wav_data(bytes)?;
    decode_pcm16(data, fmt.sample_rate, fmt.num_channels as usize)
}

/// Joins several WAV files of identical format into one, rewriting the header.
pub fn try_merge_wav(parts: &[&[u8]]) -> Result<Vec<u8>, AudioError> {
    let Some((first, rest)) = parts.split_first() else {
        return Ok(Vec::new());
    };

    let (fmt, fmt_size) = parse_wav_fmt(first)?;
    let mut data_blobs = vec![parse_wav_data(first)?];
    for wav in rest {
        let (other, _) = parse_wav_fmt(wav)?;
        if other != fmt {
            return Err(AudioError::FormatMismatch);
        }
        data_blobs.push(parse_wav_data(wav)?);
    }

    let total_data_len: usize = data_blobs.iter().map(|d| d.len()).sum();
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + total_data_len);
    write_wav_header(&mut out, &fmt, fmt_size, total_data_len)?;
    for blob in data_blobs {
        out.extend_from_slice(blob);
    }
    Ok(out)
}

/// Puts a WAV header in front of raw PCM bytes without touching the samples.
pub fn wrap_pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, AudioError> {
    let fmt = WavFmt::pcm16(sample_rate, channels);
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    write_wav_header(&mut out, &fmt, 16, pcm.len())?;
    out.extend_from_slice(pcm);
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WavFmt {
    audio_format: u16, // 1 = PCM
    num_channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

impl WavFmt {
    fn pcm16(sample_rate: u32, num_channels: u16) -> Self {
        let block_align = num_channels * 2;
        Self {
            audio_format: 1,
            num_channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample: 16,
        }
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Walks the RIFF chunk list and returns the body of the first chunk with `wanted` id.
fn find_chunk<'a>(bytes: &'a [u8], wanted: &[u8; 4]) -> Result<Option<&'a [u8]>, AudioError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AudioError::InvalidHeader);
    }
    let mut off = 12usize;
    while off + 8 <= bytes.len() {
        let id = &bytes[off..off + 4];
        let size = read_u32(bytes, off + 4) as usize;
        let start = off + 8;
        let end = start + size;
        if end > bytes.len() {
            break;
        }
        if id == wanted {
            return Ok(Some(&bytes[start..end]));
        }
        off = end + (size % 2); // word-aligned
    }
    Ok(None)
}

fn parse_wav_fmt(bytes: &[u8]) -> Result<(WavFmt, u32), AudioError> {
    let body = find_chunk(bytes, b"fmt ")?.ok_or(AudioError::MissingChunk("fmt"))?;
    if body.len() < 16 {
        return Err(AudioError::FmtTooSmall);
    }
    let fmt = WavFmt {
        audio_format: read_u16(body, 0),
        num_channels: read_u16(body, 2),
        sample_rate: read_u32(body, 4),
        byte_rate: read_u32(body, 8),
        block_align: read_u16(body, 12),
        bits_per_sample: read_u16(body, 14),
    };
    Ok((fmt, body.len() as u32))
}

fn parse_wav_data(bytes: &[u8]) -> Result<&[u8], AudioError> {
    find_chunk(bytes, b"data")?.ok_or(AudioError::MissingChunk("data"))
}

/// RIFF and `data` chunk sizes for a payload of `data_len` bytes.
fn chunk_sizes(fmt_size: u32, data_len: usize) -> Result<(u32, u32), AudioError> {
    let data_size = u32::try_from(data_len).map_err(|_| AudioError::TooLarge(data_len))?;
    let riff_size = data_size
        .checked_add(4 + 8 + fmt_size + 8)
        .ok_or(AudioError::TooLarge(data_len))?;
    Ok((riff_size, data_size))
}

fn write_wav_header(out: &mut Vec<u8>, fmt: &WavFmt, fmt_size: u32, data_len: usize) -> Result<(), AudioError> {
    let fmt_size = fmt_size.max(16);
    let (riff_chunk_size, data_size) = chunk_sizes(fmt_size, data_len)?;

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_chunk_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&fmt_size.to_le_bytes());
    out.extend_from_slice(&fmt.audio_format.to_le_bytes());
    out.extend_from_slice(&fmt.num_channels.to_le_bytes());
    out.extend_from_slice(&fmt.sample_rate.to_le_bytes());
    out.extend_from_slice(&fmt.byte_rate.to_le_bytes());
    out.extend_from_slice(&fmt.block_align.to_le_bytes());
    out.extend_from_slice(&fmt.bits_per_sample.to_le_bytes());
    if fmt_size > 16 {
        out.resize(out.len() + (fmt_size as usize - 16), 0);
    }

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    Ok(())
}

/// True for headerless linear PCM mime types such as `audio/L16;rate=24000`.
pub fn is_raw_linear_pcm(mime: &str) -> bool {
    let m = mime.to_ascii_lowercase();
    (m.contains("l16") || m.contains("linear16") || m.contains("pcm")) && !m.contains("wav")
}

/// Extracts the sample rate from mime parameters like `rate=24000`.
pub fn parse_sample_rate(mime: &str) -> Option<u32> {
    let lower = mime.to_ascii_lowercase();
    for key in ["sample_rate=", "samplerate=", "rate="] {
        if let Some(pos) = lower.find(key) {
            let digits: String = lower[pos + key.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(v) = digits.parse::<u32>() {
                return Some(v);
            }
        }
    }
    None
}
