//! Redaction policy: classification, box clipping, blur and labels.
//!
//! `classify` and `clip_to_frame` are pure. `redact_region` and `draw_label`
//! only ever receive a `ClippedBox`, so they cannot touch pixels outside the
//! frame.

use std::fmt;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::filter::separable_filter_equal;
use imageproc::rect::Rect;
use tracing::debug;
use vblur_models::{AllowList, BoundingBox, Detection, RedactionDecision};

use crate::error::{MediaError, MediaResult};

/// Decide what happens to a detection: allow-listed classes are annotated,
/// everything else is redacted.
pub fn classify(detection: &Detection, allow_list: &AllowList) -> RedactionDecision {
    if allow_list.contains(&detection.class_name) {
        RedactionDecision::Annotate
    } else {
        RedactionDecision::Redact
    }
}

/// A box proven to lie inside a frame with positive area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClippedBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ClippedBox {
    /// Back to corner form.
    pub fn to_bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.x as i32,
            self.y as i32,
            (self.x + self.width) as i32,
            (self.y + self.height) as i32,
        )
    }
}

/// Clamp a box to `[0, width] x [0, height]`.
///
/// Returns `None` when nothing of positive area remains, which covers boxes
/// entirely outside the frame as well as degenerate ones.
pub fn clip_to_frame(bbox: &BoundingBox, width: u32, height: u32) -> Option<ClippedBox> {
    let clamp = |v: i32, max: u32| (v as i64).clamp(0, max as i64) as u32;

    let x1 = clamp(bbox.x1, width);
    let y1 = clamp(bbox.y1, height);
    let x2 = clamp(bbox.x2, width);
    let y2 = clamp(bbox.y2, height);

    (x2 > x1 && y2 > y1).then(|| ClippedBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

/// Blur parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurSettings {
    /// Kernel size in taps (odd)
    pub kernel_size: usize,
    /// Standard deviation in pixels
    pub sigma: f32,
}

impl Default for BlurSettings {
    fn default() -> Self {
        Self {
            kernel_size: 99,
            sigma: 30.0,
        }
    }
}

/// Normalized 1-D Gaussian kernel applied separably.
///
/// Borders are padded by repeating the edge pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    weights: Vec<f32>,
}

impl GaussianKernel {
    /// Build a kernel; even sizes are bumped to the next odd size.
    pub fn new(settings: BlurSettings) -> Self {
        let size = settings.kernel_size.max(1) | 1;
        let radius = (size / 2) as f32;
        let sigma = if settings.sigma > 0.0 {
            settings.sigma
        } else {
            // Same fallback OpenCV uses for a non-positive sigma
            0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
        };

        let mut weights: Vec<f32> = (0..size)
            .map(|i| {
                let d = i as f32 - radius;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let sum: f32 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= sum);

        Self { weights }
    }

    /// Number of taps.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Blur a whole image.
    pub fn blur(&self, src: &RgbImage) -> RgbImage {
        if src.width() == 0 || src.height() == 0 {
            return src.clone();
        }
        separable_filter_equal(src, &self.weights)
    }
}

impl Default for GaussianKernel {
    fn default() -> Self {
        Self::new(BlurSettings::default())
    }
}

/// Blur the region in place. Pixels outside the region are untouched.
pub fn redact_region(frame: &mut RgbImage, region: ClippedBox, kernel: &GaussianKernel) {
    let roi = imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
    let blurred = kernel.blur(&roi);
    imageops::replace(frame, &blurred, region.x as i64, region.y as i64);
}

/// Font used for label text unless another one is configured.
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// The bundled label font.
pub fn bundled_font() -> Option<FontArc> {
    FontArc::try_from_slice(BUNDLED_FONT).ok()
}

/// Label drawing style.
#[derive(Clone)]
pub struct LabelStyle {
    /// Font for label text; without one only the outline and tab are drawn
    pub font: Option<FontArc>,
    /// Text size in pixels
    pub font_size: f32,
    /// Outline thickness in pixels
    pub thickness: u32,
    /// Colour for redacted detections
    pub redact_color: Rgb<u8>,
    /// Colour for detections left intact
    pub annotate_color: Rgb<u8>,
    /// Label text colour
    pub text_color: Rgb<u8>,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            font: bundled_font(),
            font_size: 20.0,
            thickness: 2,
            redact_color: Rgb([255, 0, 0]),
            annotate_color: Rgb([0, 255, 0]),
            text_color: Rgb([255, 255, 255]),
        }
    }
}

impl fmt::Debug for LabelStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelStyle")
            .field("font", &self.font.is_some())
            .field("font_size", &self.font_size)
            .field("thickness", &self.thickness)
            .finish()
    }
}

impl LabelStyle {
    /// Style with text rendered in the given TrueType/OpenType font.
    pub fn with_font_file(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            MediaError::invalid_input(format!("Could not read font {}: {}", path.display(), e))
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| {
            MediaError::invalid_input(format!("Invalid font {}: {}", path.display(), e))
        })?;

        Ok(Self {
            font: Some(font),
            ..Default::default()
        })
    }

    /// Colour for a decision.
    pub fn color_for(&self, decision: RedactionDecision) -> Rgb<u8> {
        match decision {
            RedactionDecision::Redact => self.redact_color,
            RedactionDecision::Annotate => self.annotate_color,
        }
    }

    fn tab_size(&self, text: &str) -> (u32, u32) {
        let scale = PxScale::from(self.font_size);
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(scale, font, text);
                (w + 4, h.max(1) + 4)
            }
            // Rough width estimate when no glyph metrics are available
            None => (
                (text.chars().count() as f32 * self.font_size * 0.55) as u32 + 4,
                self.font_size as u32 + 4,
            ),
        }
    }
}

/// Draw the box outline and a filled label tab above it, kept inside the frame.
pub fn draw_label(
    frame: &mut RgbImage,
    region: ClippedBox,
    text: &str,
    decision: RedactionDecision,
    style: &LabelStyle,
) {
    let color = style.color_for(decision);

    for t in 0..style.thickness {
        let (w, h) = (
            region.width.saturating_sub(2 * t),
            region.height.saturating_sub(2 * t),
        );
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((region.x + t) as i32, (region.y + t) as i32).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, color);
    }

    if text.is_empty() {
        return;
    }

    let (tab_w, tab_h) = style.tab_size(text);
    let tab_x = region.x;
    let tab_y = region.y.saturating_sub(tab_h);
    let tab_w = tab_w.min(frame.width() - tab_x);
    let tab_h = tab_h.min(frame.height() - tab_y);
    if tab_w == 0 || tab_h == 0 {
        return;
    }

    draw_filled_rect_mut(frame, Rect::at(tab_x as i32, tab_y as i32).of_size(tab_w, tab_h), color);

    if let Some(font) = &style.font {
        draw_text_mut(
            frame,
            style.text_color,
            tab_x as i32 + 2,
            tab_y as i32 + 2,
            PxScale::from(style.font_size),
            font,
            text,
        );
    }
}

/// Blur and label settings applied to every detection of a frame.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    kernel: GaussianKernel,
    label: LabelStyle,
}

impl RedactionPolicy {
    pub fn new(blur: BlurSettings, label: LabelStyle) -> Self {
        Self {
            kernel: GaussianKernel::new(blur),
            label,
        }
    }

    /// Apply the policy to one detection.
    ///
    /// Returns `None` when the box does not overlap the frame; the frame is
    /// left untouched in that case.
    pub fn apply(
        &self,
        frame: &mut RgbImage,
        detection: &Detection,
        allow_list: &AllowList,
    ) -> Option<RedactionDecision> {
        let Some(region) = clip_to_frame(&detection.bbox, frame.width(), frame.height()) else {
            debug!(
                class = %detection.class_name,
                bbox = ?detection.bbox,
                "Skipping detection outside frame"
            );
            return None;
        };

        let decision = classify(detection, allow_list);
        if decision == RedactionDecision::Redact {
            redact_region(frame, region, &self.kernel);
        }
        draw_label(frame, region, &detection.display_name(), decision, &self.label);

        Some(decision)
    }
}
