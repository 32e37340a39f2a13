//! Captures rendered frames and played audio on one media clock.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::surface::{CapturedFrame, DrawCommand, SurfaceError, encode_pixmap};
use crate::audio::{AudioBuffer, AudioError, encode_wav};

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct RecordedFrame {
    /// Media time, in seconds since the recording started.
    pub at: f64,
    pub frame: CapturedFrame,
}

pub struct Recording {
    pub fps: u32,
    pub frames: Vec<RecordedFrame>,
    pub audio: AudioBuffer,
}

#[derive(Debug, Clone)]
pub struct RecordingFiles {
    pub dir: PathBuf,
    pub frames: usize,
    pub audio: PathBuf,
}

#[derive(Serialize)]
struct FrameEntry<'a> {
    index: usize,
    at: f64,
    file: Option<String>,
    commands: Option<&'a [DrawCommand]>,
}

impl Recording {
    pub fn duration_secs(&self) -> f64 {
        self.audio.duration_secs()
    }

    /// Writes `frame_NNNNN.png` files, `audio.wav` and a `frames.json`
    /// timeline into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<RecordingFiles, RecordingError> {
        fs::create_dir_all(dir)?;

        let mut timeline = Vec::with_capacity(self.frames.len());
        for (index, rec) in self.frames.iter().enumerate() {
            let entry = match &rec.frame {
                CapturedFrame::Pixels(pixmap) => {
                    let name = format!("frame_{index:05}.png");
                    fs::write(dir.join(&name), encode_pixmap(pixmap)?)?;
                    FrameEntry { index, at: rec.at, file: Some(name), commands: None }
                }
                CapturedFrame::Commands(cmds) => FrameEntry {
                    index,
                    at: rec.at,
                    file: None,
                    commands: Some(cmds.as_slice()),
                },
            };
            timeline.push(entry);
        }
        fs::write(dir.join("frames.json"), serde_json::to_vec_pretty(&timeline)?)?;

        let audio = dir.join("audio.wav");
        fs::write(&audio, encode_wav(&self.audio)?)?;

        info!(dir = %dir.display(), frames = self.frames.len(), fps = self.fps, "recording written");
        Ok(RecordingFiles {
            dir: dir.to_path_buf(),
            frames: self.frames.len(),
            audio,
        })
    }
}

pub struct MediaRecorder {
    fps: u32,
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
    frames: Vec<RecordedFrame>,
    next_frame_at: f64,
}

impl MediaRecorder {
    pub fn new(fps: u32, sample_rate: u32, channel_count: usize) -> Self {
        Self {
            fps: fps.max(1),
            sample_rate,
            channels: vec![Vec::new(); channel_count.max(1)],
            frames: Vec::new(),
            next_frame_at: 0.0,
        }
    }

    /// Media time so far, driven by the amount of audio captured.
    pub fn clock(&self) -> f64 {
        self.channels[0].len() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn push_audio(&mut self, interleaved: &[f32]) {
        let n = self.channels.len();
        for frame in interleaved.chunks_exact(n) {
            for (ch, &s) in self.channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
    }

    pub fn wants_frame(&self) -> bool {
        self.clock() >= self.next_frame_at
    }

    pub fn push_frame(&mut self, frame: CapturedFrame) {
        let at = self.clock();
        self.frames.push(RecordedFrame { at, frame });
        self.next_frame_at += 1.0 / self.fps as f64;
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn finish(self) -> Result<Recording, AudioError> {
        Ok(Recording {
            fps: self.fps,
            frames: self.frames,
            audio: AudioBuffer::new(self.sample_rate, self.channels)?,
        })
    }
}
