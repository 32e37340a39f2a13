//! Core of a generative video studio.
//!
//! Scripts, structured plans, images, narration and video clips come from
//! the Gemini family of APIs through [`GeminiClient`]. Every call is wrapped
//! in [`with_retry`], and video jobs are driven to completion by
//! [`VideoPoller`]. Narration audio is decoded to [`AudioBuffer`]s that the
//! [`visualizer`] can render and record as audio-reactive frames.

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod sanitize;
pub mod script;
pub mod store;
pub mod util;
pub mod video;
pub mod visualizer;

pub use audio::{AudioBuffer, AudioError, decode_pcm16, decode_wav, encode_wav, try_merge_wav};
pub use client::{GeminiClient, GeneratedImage, GenerationOutput, GenerationRequest};
pub use config::{ModelSet, PollSettings, StudioConfig};
pub use error::{ApiFailure, ErrorKind, StudioError, StudioResult};
pub use retry::{RetryPolicy, with_retry};
pub use sanitize::{extract_json_candidate, parse_structured};
pub use store::{JsonDirStore, ProjectRecord, ProjectStore, RecordKind, StoreError};
pub use video::{
    ProgressReporter, ReferenceImage, Resolution, VideoBackend, VideoOperation, VideoPoller, VideoProgress,
    VideoRequest, VideoResult,
};
