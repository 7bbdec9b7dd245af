use crate::assets::AssetStore;
use crate::core::{Color, Face, GarmentConfiguration, StudioTuning};
use crate::surface::{DesignElement, DrawingSurface, ElementId, ElementKind};
use crate::{Result, StudioError};
use ab_glyph::{FontArc, PxScale};
use error_stack::ResultExt;
use image::{Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use imageproc::rect::Rect;
use std::collections::HashMap;
use tracing::warn;

/// Border color of the on-canvas selection indicator.
pub const SELECTION_COLOR: Rgba<u8> = Rgba([0, 162, 255, 255]);

/// Fallback typeface so text elements render out of the box.
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Where an element last landed on the composite, in pixels.
#[derive(Clone, Copy, Debug)]
pub struct ElementRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Converts a surface snapshot plus the garment color into an opaque bitmap
/// at the fixed working resolution.
///
/// The compositing order is the correctness contract: the output buffer is
/// filled with the garment base color first and the (transparent) snapshot
/// is alpha-blended on top, so user-authored transparency lands on the true
/// garment color instead of washing out to white. Reentrancy is prevented by
/// the scheduler, not here.
pub struct Compositor {
    resolution: u32,
    font: Option<FontArc>,
    last_face: Option<Face>,
    last_bitmap: Option<RgbaImage>,
    last_regions: HashMap<ElementId, ElementRegion>,
}

impl Compositor {
    pub fn new(tuning: &StudioTuning) -> Self {
        Self {
            resolution: tuning.working_resolution,
            font: None,
            last_face: None,
            last_bitmap: None,
            last_regions: HashMap::new(),
        }
    }

    /// Compositor carrying the bundled typeface. Sessions use this; `new`
    /// stays fontless for callers that supply their own via `with_font`.
    pub fn with_bundled_font(tuning: &StudioTuning) -> Self {
        let mut comp = Self::new(tuning);
        comp.font = FontArc::try_from_slice(BUNDLED_FONT).ok();
        if comp.font.is_none() {
            warn!("bundled font failed to parse, text elements will not render");
        }
        comp
    }

    /// Load the font used for text elements. Without one, text elements are
    /// skipped at draw time with a warning.
    pub fn with_font(mut self, bytes: Vec<u8>) -> Result<Self> {
        let font = FontArc::try_from_vec(bytes)
            .change_context(StudioError::ResourceUnavailable)
            .attach("font bytes could not be parsed")?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Produce the texture for the surface's active face.
    ///
    /// Strict order: capture and silently clear the selection, snapshot the
    /// surface, park the selection for the next paint cycle, then blend the
    /// snapshot over an opaque base-color fill.
    pub fn composite(
        &mut self,
        surface: &mut DrawingSurface,
        store: &AssetStore,
        config: &GarmentConfiguration,
    ) -> RgbaImage {
        let face = surface.active_face();
        let captured = surface.take_selection_silently();
        let snapshot = self.render_face(surface, store, face, None);
        surface.defer_selection_restore(captured);

        let mut out = opaque_fill(self.resolution, config.base_color);
        imageops::overlay(&mut out, &snapshot, 0, 0);

        self.last_face = Some(face);
        self.last_bitmap = Some(out.clone());
        out
    }

    /// Rasterize one face at working resolution over a transparent
    /// background. `selection` draws the indicator border; composites always
    /// pass `None`.
    pub fn render_face(
        &mut self,
        surface: &DrawingSurface,
        store: &AssetStore,
        face: Face,
        selection: Option<ElementId>,
    ) -> RgbaImage {
        let mut canvas = RgbaImage::new(self.resolution, self.resolution);
        self.last_regions.clear();
        for el in surface.elements(face) {
            if !el.visible {
                continue;
            }
            let Some(sprite) = self.rasterize_element(el, store) else {
                continue;
            };
            let (x, y) = (el.x.round() as i64, el.y.round() as i64);
            imageops::overlay(&mut canvas, &sprite, x, y);
            self.last_regions.insert(
                el.id,
                clip_region(x, y, sprite.width(), sprite.height(), self.resolution),
            );
            if selection == Some(el.id) {
                let rect = Rect::at(x as i32 - 2, y as i32 - 2)
                    .of_size(sprite.width() + 4, sprite.height() + 4);
                draw_hollow_rect_mut(&mut canvas, rect, SELECTION_COLOR);
            }
        }
        canvas
    }

    /// Draw a single element into its own buffer, scaled and rotated.
    /// Undrawable elements degrade to `None`; the composite never fails.
    fn rasterize_element(&self, el: &DesignElement, store: &AssetStore) -> Option<RgbaImage> {
        let flat = match &el.kind {
            ElementKind::Image { src } => match store.load(src) {
                Ok(img) => {
                    let w = ((img.width() as f32 * el.scale).round() as u32).max(1);
                    let h = ((img.height() as f32 * el.scale).round() as u32).max(1);
                    if (w, h) == img.dimensions() {
                        img
                    } else {
                        imageops::resize(&img, w, h, imageops::FilterType::Triangle)
                    }
                }
                Err(err) => {
                    warn!(reference = src.as_str(), ?err, "skipping undrawable image element");
                    return None;
                }
            },
            ElementKind::Text {
                content,
                size,
                color,
                outline,
                ..
            } => {
                let Some(font) = &self.font else {
                    warn!("no font loaded, skipping text element");
                    return None;
                };
                draw_text_sprite(font, content, size * el.scale, *color, *outline)?
            }
        };
        let turns = el.rotation.rem_euclid(360.0);
        if turns.abs() < f32::EPSILON {
            Some(flat)
        } else {
            Some(rotate_padded(&flat, turns.to_radians()))
        }
    }

    /// Fallback source for archive embedding: the element's region of the
    /// last composited bitmap.
    pub fn crop_last_region(&self, id: ElementId) -> Option<RgbaImage> {
        let bitmap = self.last_bitmap.as_ref()?;
        let r = self.last_regions.get(&id)?;
        if r.w == 0 || r.h == 0 {
            return None;
        }
        Some(imageops::crop_imm(bitmap, r.x, r.y, r.w, r.h).to_image())
    }

    /// Last composite produced, if any (used for the remote preview image).
    pub fn last_composite(&self) -> Option<(&RgbaImage, Face)> {
        Some((self.last_bitmap.as_ref()?, self.last_face?))
    }
}

/// Rotate a sprite on a canvas grown to its rotated bounding box.
/// `rotate_about_center` keeps the input dimensions, which clips the corners
/// of anything not rotated by a multiple of 90 degrees.
fn rotate_padded(sprite: &RgbaImage, radians: f32) -> RgbaImage {
    let (w, h) = (sprite.width() as f32, sprite.height() as f32);
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let bw = ((w * cos + h * sin).ceil() as u32).max(1);
    let bh = ((w * sin + h * cos).ceil() as u32).max(1);
    let mut padded = RgbaImage::new(bw, bh);
    imageops::overlay(
        &mut padded,
        sprite,
        ((bw - sprite.width()) / 2) as i64,
        ((bh - sprite.height()) / 2) as i64,
    );
    rotate_about_center(&padded, radians, Interpolation::Bilinear, Rgba([0, 0, 0, 0]))
}

fn opaque_fill(resolution: u32, color: Color) -> RgbaImage {
    RgbaImage::from_pixel(resolution, resolution, Rgba([color.r, color.g, color.b, 255]))
}

fn clip_region(x: i64, y: i64, w: u32, h: u32, resolution: u32) -> ElementRegion {
    let max = resolution as i64;
    let x0 = x.clamp(0, max);
    let y0 = y.clamp(0, max);
    let x1 = (x + w as i64).clamp(0, max);
    let y1 = (y + h as i64).clamp(0, max);
    ElementRegion {
        x: x0 as u32,
        y: y0 as u32,
        w: (x1 - x0) as u32,
        h: (y1 - y0) as u32,
    }
}

fn draw_text_sprite(
    font: &FontArc,
    content: &str,
    px: f32,
    color: Color,
    outline: f32,
) -> Option<RgbaImage> {
    if content.is_empty() || px <= 0.0 {
        return None;
    }
    let scale = PxScale::from(px);
    let (tw, th) = text_size(scale, font, content);
    if tw == 0 || th == 0 {
        return None;
    }
    let pad = outline.ceil().max(0.0) as u32;
    let mut sprite = RgbaImage::new(tw + 2 * pad, th + 2 * pad);
    let center = pad as i32;
    if pad > 0 {
        // Stroke approximation: stamp the glyphs at eight offsets.
        let o = pad as i32;
        let stroke = Rgba([0, 0, 0, 255]);
        for (dx, dy) in [
            (-o, -o),
            (0, -o),
            (o, -o),
            (-o, 0),
            (o, 0),
            (-o, o),
            (0, o),
            (o, o),
        ] {
            draw_text_mut(&mut sprite, stroke, center + dx, center + dy, scale, font, content);
        }
    }
    let fill = Rgba([color.r, color.g, color.b, color.a]);
    draw_text_mut(&mut sprite, fill, center, center, scale, font, content);
    Some(sprite)
}
