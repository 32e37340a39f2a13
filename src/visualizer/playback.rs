//! Media clock for the loaded audio, with optional clip looping.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
}

/// A `[start, start + duration)` window that playback loops within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub start: f64,
    pub duration: f64,
}

impl ClipWindow {
    pub fn new(start: f64, duration: f64) -> Self {
        Self {
            start: start.max(0.0),
            duration: duration.max(0.0),
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end()
    }
}

/// The stretch of media time consumed by one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayedSpan {
    pub from: f64,
    pub to: f64,
    pub wrapped: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    position: f64,
    media_duration: f64,
    state: PlayState,
    clip: Option<ClipWindow>,
}

impl PlaybackCursor {
    pub fn new(media_duration: f64) -> Self {
        Self {
            position: 0.0,
            media_duration: media_duration.max(0.0),
            state: PlayState::Paused,
            clip: None,
        }
    }

    /// Restricts playback to `clip`, clamped to the media length.
    pub fn with_clip(mut self, clip: ClipWindow) -> Self {
        let start = clip.start.min(self.media_duration);
        let duration = clip.duration.min(self.media_duration - start);
        let clip = ClipWindow::new(start, duration);
        self.position = clip.start;
        self.clip = Some(clip);
        self
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn clip(&self) -> Option<ClipWindow> {
        self.clip
    }

    fn end(&self) -> f64 {
        self.clip.map_or(self.media_duration, |c| c.end())
    }

    pub fn play(&mut self) {
        match self.clip {
            Some(clip) if !clip.contains(self.position) => self.position = clip.start,
            None if self.position >= self.media_duration => self.position = 0.0,
            _ => {}
        }
        self.state = PlayState::Playing;
    }

    pub fn pause(&mut self) {
        self.state = PlayState::Paused;
    }

    /// Jumps to `t`. Reaching the clip end snaps back to the clip start and
    /// keeps the current play state.
    pub fn seek(&mut self, t: f64) {
        self.position = t.clamp(0.0, self.media_duration);
        match self.clip {
            Some(clip) if self.position >= clip.end() => self.position = clip.start,
            _ => {}
        }
    }

    /// Moves the clock forward by `dt` seconds while playing.
    pub fn advance(&mut self, dt: f64) -> PlayedSpan {
        let from = self.position;
        if !self.is_playing() || dt <= 0.0 {
            return PlayedSpan { from, to: from, wrapped: false };
        }

        let end = self.end();
        let target = from + dt;
        if target < end {
            self.position = target;
            return PlayedSpan { from, to: target, wrapped: false };
        }

        match self.clip {
            Some(clip) => {
                self.position = clip.start;
                PlayedSpan { from, to: end, wrapped: true }
            }
            None => {
                self.position = end;
                self.state = PlayState::Paused;
                PlayedSpan { from, to: end, wrapped: false }
            }
        }
    }
}
