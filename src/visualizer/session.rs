//! Playback session: one long-lived processing context, a per-play
//! source → analyser → destination graph, and the render loop that draws
//! from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::analyser::{FrequencyAnalyser, FrequencyFrame, FrequencySource};
use super::playback::{ClipWindow, PlaybackCursor};
use super::recorder::{MediaRecorder, Recording};
use super::surface::Surface;
use super::Visualizer;
use crate::audio::{AudioBuffer, AudioError};

static CONTEXT_IDS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no audio is loaded")]
    NothingLoaded,
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// The audio processing context. Creating one is expensive on real
/// hardware, so a session keeps a single instance alive until disposal.
#[derive(Debug)]
pub struct AudioContext {
    id: u64,
    graphs_built: u64,
    closed: bool,
}

impl AudioContext {
    fn open() -> Self {
        let id = CONTEXT_IDS.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, "audio context opened");
        Self {
            id,
            graphs_built: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn graphs_built(&self) -> u64 {
        self.graphs_built
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn build_graph(&mut self, buffer: Arc<AudioBuffer>, clip: Option<ClipWindow>, smoothing: f32) -> PlaybackGraph {
        self.graphs_built += 1;
        let mut cursor = PlaybackCursor::new(buffer.duration_secs());
        if let Some(clip) = clip {
            cursor = cursor.with_clip(clip);
        }
        PlaybackGraph {
            buffer,
            cursor,
            analyser: FrequencyAnalyser::default().with_smoothing(smoothing),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(context = self.id, "audio context closed");
        }
    }
}

/// Buffer source wired through an analyser to the output.
pub struct PlaybackGraph {
    pub buffer: Arc<AudioBuffer>,
    pub cursor: PlaybackCursor,
    pub analyser: FrequencyAnalyser,
}

impl PlaybackGraph {
    fn sample_index(&self, t: f64) -> usize {
        (t * self.buffer.sample_rate() as f64) as usize
    }
}

impl FrequencySource for PlaybackGraph {
    fn frequency_frame(&mut self) -> FrequencyFrame {
        if !self.cursor.is_playing() {
            return self.analyser.analyse(&[]);
        }
        let end = self.sample_index(self.cursor.position());
        let start = end.saturating_sub(self.analyser.fft_size());
        let window = self.buffer.mono_range(start, end);
        self.analyser.analyse(&window)
    }
}

struct Stage<S> {
    surface: S,
    visualizer: Visualizer,
    graph: Option<PlaybackGraph>,
    recorder: Option<MediaRecorder>,
    frames_rendered: u64,
}

impl<S: Surface> Stage<S> {
    fn step(&mut self, dt: f64) {
        let frame = match self.graph.as_mut() {
            Some(graph) => {
                let span = graph.cursor.advance(dt);
                if let Some(rec) = self.recorder.as_mut() {
                    let (a, b) = (graph.sample_index(span.from), graph.sample_index(span.to));
                    rec.push_audio(&graph.buffer.interleaved_range(a, b));
                }
                graph.frequency_frame()
            }
            None => vec![0; FrequencyAnalyser::DEFAULT_FFT_SIZE / 2],
        };

        self.visualizer.render_frame(&mut self.surface, &frame);
        self.frames_rendered += 1;

        if let Some(rec) = self.recorder.as_mut() {
            if rec.wants_frame() {
                rec.push_frame(self.surface.capture());
            }
        }
    }
}

fn lock<S>(stage: &Mutex<Stage<S>>) -> MutexGuard<'_, Stage<S>> {
    stage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Redraws the stage on a fixed cadence until cancelled.
pub struct RenderLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RenderLoop {
    pub const DEFAULT_CADENCE: Duration = Duration::from_micros(16_667);

    fn spawn<S: Surface + Send + 'static>(stage: Arc<Mutex<Stage<S>>>, cadence: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        lock(&stage).step((now - last).as_secs_f64());
                        last = now;
                    }
                }
            }
            debug!("render loop stopped");
        });
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Plays buffers through a reused [`AudioContext`] and draws them.
///
/// Dropping the session disposes it.
pub struct AudioSession<S: Surface + Send + 'static> {
    context: Option<AudioContext>,
    contexts_created: u64,
    stage: Arc<Mutex<Stage<S>>>,
    render: Option<RenderLoop>,
}

impl<S: Surface + Send + 'static> AudioSession<S> {
    pub fn new(surface: S, visualizer: Visualizer) -> Self {
        Self {
            context: None,
            contexts_created: 0,
            stage: Arc::new(Mutex::new(Stage {
                surface,
                visualizer,
                graph: None,
                recorder: None,
                frames_rendered: 0,
            })),
            render: None,
        }
    }

    /// The live context, created on first use.
    pub fn context(&mut self) -> &mut AudioContext {
        let contexts_created = &mut self.contexts_created;
        self.context.get_or_insert_with(|| {
            *contexts_created += 1;
            AudioContext::open()
        })
    }

    pub fn contexts_created(&self) -> u64 {
        self.contexts_created
    }

    /// Disconnects any previous graph, builds a fresh one for `buffer` and
    /// starts playing.
    pub fn play(&mut self, buffer: Arc<AudioBuffer>, clip: Option<ClipWindow>) {
        let smoothing = lock(&self.stage).visualizer.smoothing;
        let graph = self.context().build_graph(buffer, clip, smoothing);
        let mut stage = lock(&self.stage);
        if stage.graph.take().is_some() {
            debug!("previous playback graph disconnected");
        }
        let mut graph = graph;
        graph.cursor.play();
        info!(
            duration = graph.buffer.duration_secs(),
            clip = ?graph.cursor.clip(),
            "playback started"
        );
        stage.graph = Some(graph);
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let mut stage = lock(&self.stage);
        let graph = stage.graph.as_mut().ok_or(SessionError::NothingLoaded)?;
        graph.cursor.play();
        Ok(())
    }

    pub fn pause(&self) {
        if let Some(graph) = lock(&self.stage).graph.as_mut() {
            graph.cursor.pause();
        }
    }

    /// Jumps to `t` and drops the analyser's history from before the jump.
    pub fn seek(&self, t: f64) {
        if let Some(graph) = lock(&self.stage).graph.as_mut() {
            graph.cursor.seek(t);
            graph.analyser.reset();
        }
    }

    /// Stops playback and drops the graph; the context stays open.
    pub fn stop(&self) {
        let mut stage = lock(&self.stage);
        if stage.graph.take().is_some() {
            debug!("playback stopped");
        }
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.stage).graph.as_ref().is_some_and(|g| g.cursor.is_playing())
    }

    pub fn position(&self) -> Option<f64> {
        lock(&self.stage).graph.as_ref().map(|g| g.cursor.position())
    }

    pub fn frames_rendered(&self) -> u64 {
        lock(&self.stage).frames_rendered
    }

    pub fn set_visualizer(&self, visualizer: Visualizer) {
        lock(&self.stage).visualizer = visualizer;
    }

    /// Runs one render tick of `dt` seconds. Offline renders drive the
    /// session through this instead of the loop.
    pub fn step(&self, dt: f64) {
        lock(&self.stage).step(dt);
    }

    /// Reads the surface under the stage lock.
    pub fn with_surface<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.stage).surface)
    }

    /// Starts the periodic render loop. Does nothing if one is running.
    pub fn start_render_loop(&mut self, cadence: Duration) {
        if self.render.as_ref().is_some_and(RenderLoop::is_running) {
            return;
        }
        self.render = Some(RenderLoop::spawn(Arc::clone(&self.stage), cadence));
    }

    pub fn render_loop_running(&self) -> bool {
        self.render.as_ref().is_some_and(RenderLoop::is_running)
    }

    pub fn stop_render_loop(&mut self) {
        if let Some(render) = self.render.take() {
            render.cancel();
        }
    }

    /// Starts capturing frames and audio. Forces playback on.
    pub fn start_recording(&self, fps: u32) -> Result<(), SessionError> {
        let mut stage = lock(&self.stage);
        let graph = stage.graph.as_mut().ok_or(SessionError::NothingLoaded)?;
        graph.cursor.play();
        let recorder = MediaRecorder::new(fps, graph.buffer.sample_rate(), graph.buffer.channel_count());
        stage.recorder = Some(recorder);
        info!(fps, "recording started");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.stage).recorder.is_some()
    }

    /// Finishes the capture and pauses playback. `None` if not recording.
    pub fn stop_recording(&self) -> Result<Option<Recording>, SessionError> {
        let mut stage = lock(&self.stage);
        let Some(recorder) = stage.recorder.take() else {
            return Ok(None);
        };
        if let Some(graph) = stage.graph.as_mut() {
            graph.cursor.pause();
        }
        let recording = recorder.finish()?;
        info!(
            frames = recording.frames.len(),
            seconds = recording.duration_secs(),
            "recording stopped"
        );
        Ok(Some(recording))
    }

    /// Stops playback, cancels rendering and closes the context. Safe to
    /// call more than once.
    pub fn dispose(&mut self) {
        self.stop_render_loop();
        {
            let mut stage = lock(&self.stage);
            stage.recorder = None;
            stage.graph = None;
        }
        if let Some(mut context) = self.context.take() {
            context.close();
            info!(context = context.id(), "audio session disposed");
        }
    }
}

impl<S: Surface + Send + 'static> Drop for AudioSession<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
