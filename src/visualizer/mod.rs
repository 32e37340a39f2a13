//! Audio-reactive spectrum rendering.
//!
//! An [`AudioSession`] owns one processing context for its lifetime, wires
//! the loaded buffer through a [`FrequencyAnalyser`] and redraws a
//! [`Visualizer`] frame on every render tick. A [`MediaRecorder`] can
//! capture those frames together with the played audio.

mod analyser;
mod playback;
mod recorder;
mod session;
mod surface;

use std::f32::consts::{FRAC_PI_2, TAU};

pub use analyser::{FrequencyAnalyser, FrequencyFrame, FrequencySource};
pub use playback::{ClipWindow, PlayState, PlaybackCursor, PlayedSpan};
pub use recorder::{MediaRecorder, RecordedFrame, Recording, RecordingError, RecordingFiles};
pub use session::{AudioContext, AudioSession, PlaybackGraph, RenderLoop, SessionError};
pub use surface::{
    Background, CapturedFrame, CommandSurface, DrawCommand, PixmapSurface, Rgba, Surface, SurfaceError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Rainbow,
    Fire,
    Ocean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectrumStyle {
    #[default]
    Bars,
    Radial,
}

/// Colour of `bin` (out of `bins`) at `magnitude`. Pure, so the same input
/// always paints the same pixel.
pub fn color_for(mode: ColorMode, bin: usize, bins: usize, magnitude: u8) -> Rgba {
    let m = magnitude as f32 / 255.0;
    match mode {
        ColorMode::Rainbow => {
            let hue = bin as f32 / bins.max(1) as f32 * 360.0;
            hsl_to_rgb(hue, 1.0, 0.3 + 0.4 * m)
        }
        ColorMode::Fire => Rgba::rgb(255, (m * 200.0) as u8, (m * 60.0) as u8),
        ColorMode::Ocean => Rgba::rgb((m * 40.0) as u8, (100.0 + m * 155.0) as u8, 255),
    }
}

fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> Rgba {
    let c = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let h = (hue % 360.0) / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = lightness - c / 2.0;
    let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba::rgb(to_byte(r), to_byte(g), to_byte(b))
}

#[derive(Debug, Clone)]
pub struct Visualizer {
    pub style: SpectrumStyle,
    pub mode: ColorMode,
    pub caption: Option<String>,
    pub background: Option<Background>,
    pub backdrop: Rgba,
    /// Analyser smoothing between ticks, 0 (none) to 1.
    pub smoothing: f32,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self {
            style: SpectrumStyle::Bars,
            mode: ColorMode::Rainbow,
            caption: None,
            background: None,
            backdrop: Rgba::rgb(10, 10, 18),
            smoothing: 0.8,
        }
    }
}

impl Visualizer {
    pub fn new(style: SpectrumStyle, mode: ColorMode) -> Self {
        Self {
            style,
            mode,
            ..Self::default()
        }
    }

    /// Clears `surface` and draws one frame for `frame`.
    pub fn render_frame<S: Surface + ?Sized>(&self, surface: &mut S, frame: &[u8]) {
        surface.clear(self.backdrop);
        if let Some(bg) = &self.background {
            surface.draw_background(bg);
        }

        match self.style {
            SpectrumStyle::Bars => self.draw_bars(surface, frame),
            SpectrumStyle::Radial => self.draw_radial(surface, frame),
        }

        if let Some(text) = self.caption.as_deref().filter(|t| !t.is_empty()) {
            let (w, h) = surface.size();
            surface.draw_caption(text, w as f32 / 2.0, h as f32 * 0.88, Rgba::WHITE);
        }
    }

    fn draw_bars<S: Surface + ?Sized>(&self, surface: &mut S, frame: &[u8]) {
        let (w, h) = surface.size();
        let (w, h) = (w as f32, h as f32);
        let bins = frame.len();
        if bins == 0 {
            return;
        }
        // only the lower ~40% of bins fit; the rest run off the edge
        let bar_width = w / bins as f32 * 2.5;
        let mut x = 0.0;
        for (i, &m) in frame.iter().enumerate() {
            if x >= w {
                break;
            }
            if m > 0 {
                let bar_height = m as f32 / 255.0 * h * 0.6;
                surface.fill_rect(x, h - bar_height, bar_width, bar_height, color_for(self.mode, i, bins, m));
            }
            x += bar_width + 1.0;
        }
    }

    fn draw_radial<S: Surface + ?Sized>(&self, surface: &mut S, frame: &[u8]) {
        let (w, h) = surface.size();
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        let radius = w.min(h) as f32 * 0.2;
        let bins = frame.len();
        if bins == 0 {
            return;
        }
        let stroke = (TAU * radius / bins as f32 * 0.6).max(2.0);
        for (i, &m) in frame.iter().enumerate() {
            if m == 0 {
                continue;
            }
            let angle = i as f32 / bins as f32 * TAU - FRAC_PI_2;
            let (sin, cos) = angle.sin_cos();
            let len = m as f32 / 255.0 * radius * 1.5;
            surface.stroke_line(
                (cx + cos * radius, cy + sin * radius),
                (cx + cos * (radius + len), cy + sin * (radius + len)),
                stroke,
                color_for(self.mode, i, bins, m),
            );
        }
    }
}
