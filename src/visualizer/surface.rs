//! Drawing targets for the visualizer.
//!
//! [`CommandSurface`] records what would be drawn, which is all the tests
//! need. [`PixmapSurface`] rasterizes with tiny-skia and can be exported as
//! PNG frames. Caption glyphs are left to the host compositor; the pixmap
//! surface only lays down the caption band.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_skia::{
    Color, LineCap, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke, Transform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    fn paint(self) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(self.r, self.g, self.b, self.a);
        paint.anti_alias = true;
        paint
    }
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("surface size {0}x{1} is not drawable")]
    InvalidSize(u32, u32),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("png encode failed: {0}")]
    Encode(String),
}

/// A still image drawn behind the spectrum, scaled to fill the surface.
#[derive(Clone)]
pub struct Background {
    pixmap: Pixmap,
}

impl Background {
    pub fn from_png(bytes: &[u8]) -> Result<Self, SurfaceError> {
        let pixmap = Pixmap::decode_png(bytes).map_err(|e| SurfaceError::Decode(e.to_string()))?;
        Ok(Self { pixmap })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }
}

impl std::fmt::Debug for Background {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.size();
        write!(f, "Background({w}x{h})")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    Clear { color: Rgba },
    Background { width: u32, height: u32 },
    Rect { x: f32, y: f32, w: f32, h: f32, color: Rgba },
    Line { from: (f32, f32), to: (f32, f32), width: f32, color: Rgba },
    Caption { text: String, x: f32, y: f32, color: Rgba },
}

/// A snapshot of a surface taken for recording.
#[derive(Clone)]
pub enum CapturedFrame {
    Pixels(Pixmap),
    Commands(Vec<DrawCommand>),
}

pub trait Surface {
    fn size(&self) -> (u32, u32);
    fn clear(&mut self, color: Rgba);
    fn draw_background(&mut self, background: &Background);
    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba);
    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: Rgba);
    fn draw_caption(&mut self, text: &str, x: f32, y: f32, color: Rgba);
    fn capture(&self) -> CapturedFrame;
}

#[derive(Debug, Clone, Default)]
pub struct CommandSurface {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
}

impl CommandSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }
}

impl Surface for CommandSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self, color: Rgba) {
        self.commands.clear();
        self.commands.push(DrawCommand::Clear { color });
    }

    fn draw_background(&mut self, background: &Background) {
        let (width, height) = background.size();
        self.commands.push(DrawCommand::Background { width, height });
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba) {
        self.commands.push(DrawCommand::Rect { x, y, w, h, color });
    }

    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: Rgba) {
        self.commands.push(DrawCommand::Line { from, to, width, color });
    }

    fn draw_caption(&mut self, text: &str, x: f32, y: f32, color: Rgba) {
        self.commands.push(DrawCommand::Caption {
            text: text.to_string(),
            x,
            y,
            color,
        });
    }

    fn capture(&self) -> CapturedFrame {
        CapturedFrame::Commands(self.commands.clone())
    }
}

pub struct PixmapSurface {
    pixmap: Pixmap,
    caption: Option<String>,
}

impl PixmapSurface {
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        let pixmap = Pixmap::new(width, height).ok_or(SurfaceError::InvalidSize(width, height))?;
        Ok(Self { pixmap, caption: None })
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Caption text of the last frame, for hosts that render glyphs.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, SurfaceError> {
        encode_pixmap(&self.pixmap)
    }
}

pub(crate) fn encode_pixmap(pixmap: &Pixmap) -> Result<Vec<u8>, SurfaceError> {
    pixmap.encode_png().map_err(|e| SurfaceError::Encode(e.to_string()))
}

impl Surface for PixmapSurface {
    fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    fn clear(&mut self, color: Rgba) {
        self.pixmap.fill(Color::from_rgba8(color.r, color.g, color.b, color.a));
        self.caption = None;
    }

    fn draw_background(&mut self, background: &Background) {
        let (bw, bh) = background.size();
        let (w, h) = self.size();
        let transform = Transform::from_scale(w as f32 / bw as f32, h as f32 / bh as f32);
        self.pixmap.draw_pixmap(
            0,
            0,
            background.pixmap.as_ref(),
            &PixmapPaint::default(),
            transform,
            None,
        );
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgba) {
        if let Some(rect) = Rect::from_xywh(x, y, w, h) {
            self.pixmap.fill_rect(rect, &color.paint(), Transform::identity(), None);
        }
    }

    fn stroke_line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: Rgba) {
        let mut pb = PathBuilder::new();
        pb.move_to(from.0, from.1);
        pb.line_to(to.0, to.1);
        let Some(path) = pb.finish() else {
            return;
        };
        let stroke = Stroke {
            width,
            line_cap: LineCap::Round,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(&path, &color.paint(), &stroke, Transform::identity(), None);
    }

    fn draw_caption(&mut self, text: &str, _x: f32, y: f32, color: Rgba) {
        let (w, _) = self.size();
        let band = 56.0;
        let backing = Rgba::BLACK.with_alpha(color.a / 2);
        self.fill_rect(0.0, y - band / 2.0, w as f32, band, backing);
        self.caption = Some(text.to_string());
    }

    fn capture(&self) -> CapturedFrame {
        CapturedFrame::Pixels(self.pixmap.clone())
    }
}
