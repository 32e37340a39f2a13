//! Long-running video generation: request planning, operation snapshots
//! and the submit/poll loop.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::{ModelSet, PollSettings};
use crate::error::{ApiFailure, ErrorKind, StudioError, StudioResult};
use crate::retry::{RetryPolicy, with_retry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "bytesBase64Encoded": base64::engine::general_purpose::STANDARD.encode(&self.bytes),
            "mimeType": self.mime_type,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    P720,
    P1080,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
        }
    }
}

/// What the caller asks for. Immutable once handed to the poller.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    pub reference_images: Vec<ReferenceImage>,
    pub resolution: Resolution,
    pub aspect_ratio: String,
    pub fps: Option<u32>,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_images: Vec::new(),
            resolution: Resolution::default(),
            aspect_ratio: "9:16".to_string(),
            fps: None,
        }
    }

    /// Chooses model and body shape from the number of reference images.
    /// Pure; nothing is sent.
    pub fn plan(&self, models: &ModelSet) -> VideoSubmission {
        let mut instance = json!({ "prompt": self.prompt });
        let (shape, model, resolution, aspect_ratio) = match self.reference_images.as_slice() {
            [] => (
                SubmissionShape::TextOnly,
                &models.video_fast,
                self.resolution,
                self.aspect_ratio.as_str(),
            ),
            [single] => {
                instance["image"] = single.to_json();
                (
                    SubmissionShape::SingleImage,
                    &models.video_fast,
                    self.resolution,
                    self.aspect_ratio.as_str(),
                )
            }
            many => {
                instance["referenceImages"] = many
                    .iter()
                    .map(|img| json!({ "image": img.to_json(), "referenceType": "asset" }))
                    .collect();
                // reference-asset jobs only render 720p landscape
                (
                    SubmissionShape::ReferenceAssets,
                    &models.video_reference,
                    Resolution::P720,
                    "16:9",
                )
            }
        };

        let mut parameters = json!({
            "numberOfVideos": 1,
            "resolution": resolution.as_str(),
            "aspectRatio": aspect_ratio,
        });
        if let Some(fps) = self.fps {
            parameters["fps"] = json!(fps);
        }

        VideoSubmission {
            model: model.clone(),
            shape,
            body: json!({ "instances": [instance], "parameters": parameters }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionShape {
    TextOnly,
    SingleImage,
    ReferenceAssets,
}

/// A fully planned request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSubmission {
    pub model: String,
    pub shape: SubmissionShape,
    pub body: Value,
}

/// Server-side snapshot of a long-running operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: Option<String>,
    pub done: bool,
    pub error: Option<String>,
    pub error_code: Option<i64>,
    pub result_uri: Option<String>,
}

impl VideoOperation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn finished(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            done: true,
            result_uri: Some(uri.into()),
            ..Default::default()
        }
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Parses an operation resource as returned by `predictLongRunning` and
    /// `GET operations/*`.
    pub fn from_json(v: &Value) -> Self {
        let mut op = VideoOperation {
            name: v.get("name").and_then(Value::as_str).map(str::to_string),
            done: v.get("done").and_then(Value::as_bool).unwrap_or(false),
            ..Default::default()
        };

        if let Some(err) = v.get("error") {
            let failure = ApiFailure::from_error_object(err);
            op.error_code = failure.code;
            op.error = Some(if failure.message.is_empty() {
                "video generation failed".to_string()
            } else {
                failure.message
            });
        }

        let response = v.get("response");
        let sample = response
            .and_then(|r| r.get("generateVideoResponse"))
            .and_then(|r| r.get("generatedSamples"))
            .or_else(|| response.and_then(|r| r.get("generatedVideos")))
            .and_then(Value::as_array)
            .and_then(|a| a.first());
        op.result_uri = sample
            .and_then(|s| s.get("video"))
            .and_then(|video| video.get("uri"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if op.done && op.error.is_none() && op.result_uri.is_none() {
            let reasons: Vec<&str> = response
                .and_then(|r| r.get("generateVideoResponse"))
                .and_then(|r| r.get("raiMediaFilteredReasons"))
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if !reasons.is_empty() {
                op.error = Some(format!("blocked by safety filters: {}", reasons.join("; ")));
            }
        }
        op
    }
}

/// The poller's view of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling,
    Done,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoProgress {
    Init,
    Rendering { operation: String },
    StillRendering { poll: u32 },
}

/// One-way progress channel. Sending never blocks and a dropped receiver
/// is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<VideoProgress>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<VideoProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, event: VideoProgress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoResult {
    /// Download URI, credential suffix already applied.
    pub uri: String,
    pub operation: String,
    pub polls: u32,
}

/// Remote side of a video job.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn submit(&self, submission: &VideoSubmission) -> StudioResult<VideoOperation>;

    async fn poll(&self, operation: &VideoOperation) -> StudioResult<VideoOperation>;

    /// Makes a result URI fetchable, e.g. by appending an access key.
    fn resolve_media_uri(&self, uri: &str) -> String {
        uri.to_string()
    }
}

/// Drives one video job from submission to a terminal state.
#[derive(Debug, Clone, Copy)]
pub struct VideoPoller {
    pub submit_retry: RetryPolicy,
    pub settings: PollSettings,
}

impl VideoPoller {
    pub fn new(submit_retry: RetryPolicy, settings: PollSettings) -> Self {
        Self {
            submit_retry,
            settings,
        }
    }

    pub async fn run<B>(
        &self,
        backend: &B,
        submission: &VideoSubmission,
        progress: &ProgressReporter,
    ) -> StudioResult<VideoResult>
    where
        B: VideoBackend + ?Sized,
    {
        progress.report(VideoProgress::Init);
        tracing::info!(model = %submission.model, shape = ?submission.shape, state = ?JobState::Submitted, "submitting video job");

        let mut op = with_retry(self.submit_retry, "video.submit", || backend.submit(submission)).await?;
        let Some(name) = op.name.clone().filter(|n| !n.is_empty()) else {
            return Err(StudioError::malformed("video submission returned no operation name"));
        };
        progress.report(VideoProgress::Rendering {
            operation: name.clone(),
        });
        tracing::info!(operation = %name, state = ?JobState::Polling, "video job accepted");

        let mut polls: u32 = 0;
        while !op.done {
            if polls >= self.settings.max_polls {
                tracing::warn!(operation = %name, polls, state = ?JobState::TimedOut, "giving up on video job");
                return Err(StudioError::timed_out(polls));
            }
            sleep(self.settings.interval).await;
            polls += 1;

            let polled = with_retry(self.settings.retry, "video.poll", || backend.poll(&op)).await;
            match polled {
                Ok(next) if next.has_name() || next.done => {
                    op = next;
                    progress.report(VideoProgress::StillRendering { poll: polls });
                }
                Ok(_) => {
                    tracing::warn!(operation = %name, poll = polls, "discarding poll snapshot without name");
                    progress.report(VideoProgress::StillRendering { poll: polls });
                }
                Err(err) => {
                    if !op.has_name() && !op.done {
                        tracing::error!(poll = polls, error = %err, state = ?JobState::Failed, "lost the operation handle");
                        return Err(err);
                    }
                    tracing::warn!(operation = %name, poll = polls, error = %err, "poll failed, will try again next cycle");
                }
            }
        }

        if let Some(message) = op.error.take() {
            let failure = ApiFailure {
                code: op.error_code,
                message,
                ..Default::default()
            };
            let err = failure.into_error();
            tracing::warn!(operation = %name, error = %err, state = ?JobState::Failed, "video job failed");
            return Err(err);
        }

        match op.result_uri {
            Some(uri) => {
                tracing::info!(operation = %name, polls, state = ?JobState::Done, "video ready");
                Ok(VideoResult {
                    uri: backend.resolve_media_uri(&uri),
                    operation: name,
                    polls,
                })
            }
            None => {
                tracing::warn!(operation = %name, state = ?JobState::Failed, "video job finished without a result");
                Err(StudioError::new(
                    ErrorKind::MalformedResponse,
                    "video job finished without a downloadable result",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Duration;

    struct Scripted {
        submit: StudioResult<VideoOperation>,
        polls: Mutex<VecDeque<StudioResult<VideoOperation>>>,
        fallback: VideoOperation,
        poll_calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<StudioResult<VideoOperation>>) -> Self {
            Self {
                submit: Ok(VideoOperation::pending("operations/abc")),
                polls: Mutex::new(script.into()),
                fallback: VideoOperation::pending("operations/abc"),
                poll_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VideoBackend for Scripted {
        async fn submit(&self, _submission: &VideoSubmission) -> StudioResult<VideoOperation> {
            self.submit.clone()
        }

        async fn poll(&self, _operation: &VideoOperation) -> StudioResult<VideoOperation> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }

        fn resolve_media_uri(&self, uri: &str) -> String {
            format!("{uri}&key=test")
        }
    }

    fn poller(max_polls: u32) -> VideoPoller {
        VideoPoller::new(
            RetryPolicy::new(0, Duration::from_millis(1)),
            PollSettings {
                interval: Duration::from_secs(10),
                max_polls,
                retry: RetryPolicy::new(3, Duration::from_millis(500)),
            },
        )
    }

    fn submission() -> VideoSubmission {
        VideoRequest::new("a cat surfing").plan(&ModelSet::default())
    }

    fn network_err() -> StudioResult<VideoOperation> {
        Err(StudioError::new(ErrorKind::NetworkUnreachable, "network error: reset"))
    }

    #[tokio::test(start_paused = true)]
    async fn finishes_after_fourth_poll() {
        let pending = VideoOperation::pending("operations/abc");
        let backend = Scripted::new(vec![
            Ok(pending.clone()),
            Ok(pending.clone()),
            Ok(pending),
            Ok(VideoOperation::finished("operations/abc", "X")),
        ]);
        let (reporter, mut rx) = ProgressReporter::channel();

        let result = poller(120).run(&backend, &submission(), &reporter).await.unwrap();
        assert_eq!(result.uri, "X&key=test");
        assert_eq!(result.polls, 4);
        assert_eq!(backend.poll_calls.load(Ordering::SeqCst), 4);

        drop(reporter);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events[0], VideoProgress::Init);
        assert_eq!(
            events[1],
            VideoProgress::Rendering {
                operation: "operations/abc".into()
            }
        );
        assert_eq!(events.len(), 2 + 4);
        assert_eq!(events[5], VideoProgress::StillRendering { poll: 4 });
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_done() {
        let backend = Scripted::new(Vec::new());
        let err = poller(7)
            .run(&backend, &submission(), &ProgressReporter::silent())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperationTimedOut);
        assert_eq!(backend.poll_calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failures_do_not_abort() {
        let backend = Scripted::new(vec![
            Ok(VideoOperation::pending("operations/abc")),
            network_err(),
            network_err(),
            Ok(VideoOperation::finished("operations/abc", "X")),
        ]);
        let result = poller(120)
            .run(&backend, &submission(), &ProgressReporter::silent())
            .await
            .unwrap();
        assert_eq!(result.polls, 4);
        assert_eq!(backend.poll_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn nameless_snapshot_is_discarded() {
        let backend = Scripted::new(vec![
            Ok(VideoOperation::default()),
            Ok(VideoOperation::finished("operations/abc", "X")),
        ]);
        let result = poller(10)
            .run(&backend, &submission(), &ProgressReporter::silent())
            .await
            .unwrap();
        assert_eq!(result.operation, "operations/abc");
        assert_eq!(result.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_without_name_fails() {
        let mut backend = Scripted::new(Vec::new());
        backend.submit = Ok(VideoOperation::default());
        let err = poller(10)
            .run(&backend, &submission(), &ProgressReporter::silent())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert_eq!(backend.poll_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn done_with_error_fails_with_classified_kind() {
        let done_err = VideoOperation::from_json(&json!({
            "name": "operations/abc",
            "done": true,
            "error": { "code": 400, "message": "The prompt was blocked by our safety filters." }
        }));
        let backend = Scripted::new(vec![Ok(done_err)]);
        let err = poller(10)
            .run(&backend, &submission(), &ProgressReporter::silent())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentPolicyRejected);
    }

    #[tokio::test(start_paused = true)]
    async fn done_without_uri_fails() {
        let done = VideoOperation {
            name: Some("operations/abc".into()),
            done: true,
            ..Default::default()
        };
        let backend = Scripted::new(vec![Ok(done)]);
        let err = poller(10)
            .run(&backend, &submission(), &ProgressReporter::silent())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn parses_operation_payload() {
        let op = VideoOperation::from_json(&json!({
            "name": "models/veo/operations/xyz",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [ { "video": { "uri": "https://files/v1?alt=media" } } ]
                }
            }
        }));
        assert!(op.done);
        assert_eq!(op.result_uri.as_deref(), Some("https://files/v1?alt=media"));

        let filtered = VideoOperation::from_json(&json!({
            "name": "n", "done": true,
            "response": { "generateVideoResponse": { "raiMediaFilteredReasons": ["person generation"] } }
        }));
        assert!(filtered.error.unwrap().contains("safety"));
    }

    #[test]
    fn planning_depends_only_on_reference_count() {
        let models = ModelSet::default();
        let mut req = VideoRequest::new("city at night");
        req.fps = Some(24);

        let text = req.plan(&models);
        assert_eq!(text.shape, SubmissionShape::TextOnly);
        assert_eq!(text.model, models.video_fast);
        assert_eq!(text.body["parameters"]["aspectRatio"], "9:16");
        assert_eq!(text.body["parameters"]["fps"], 24);

        req.reference_images.push(ReferenceImage::new(vec![1, 2, 3], "image/png"));
        let single = req.plan(&models);
        assert_eq!(single.shape, SubmissionShape::SingleImage);
        assert_eq!(single.body["instances"][0]["image"]["mimeType"], "image/png");
        assert_eq!(single.body["instances"][0]["image"]["bytesBase64Encoded"], "AQID");

        req.reference_images.push(ReferenceImage::new(vec![4], "image/jpeg"));
        let multi = req.plan(&models);
        assert_eq!(multi.shape, SubmissionShape::ReferenceAssets);
        assert_eq!(multi.model, models.video_reference);
        let refs = multi.body["instances"][0]["referenceImages"].as_array().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1]["referenceType"], "asset");
        assert_eq!(multi.body["parameters"]["resolution"], "720p");
        assert_eq!(multi.body["parameters"]["aspectRatio"], "16:9");
        assert!(multi.body["instances"][0].get("image").is_none());

        assert_eq!(req.plan(&models), multi);
    }
}
