//! Rendering surface consumed by the tile cache.
//!
//! The cache never talks to a GPU API directly. A host UI implements
//! [`Graphics`] on top of whatever it draws with; [`crate::display_list`]
//! provides a recording implementation.

use serde::Serialize;

/// Axis-aligned rectangle in texture or world pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Packed 0xRRGGBB color with an opacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Paint {
    pub color: u32,
    pub alpha: f32,
}

impl Paint {
    pub fn new(color: u32, alpha: f32) -> Self {
        Self { color, alpha }
    }
}

/// Off-screen textures plus on-screen sprites.
///
/// Textures are exclusively owned by the caller once created and must be given
/// back through [`Graphics::destroy_texture`] exactly once. Sprites display a
/// texture at a world-space position; the stage transform maps world space to
/// the screen.
pub trait Graphics {
    type Texture;
    type Sprite;

    fn create_texture(&mut self, width: u32, height: u32) -> Self::Texture;

    /// Wipe a texture before it is redrawn.
    fn clear(&mut self, texture: &mut Self::Texture);

    fn fill_rect(&mut self, texture: &mut Self::Texture, rect: Rect, paint: Paint);

    fn stroke_rect(&mut self, texture: &mut Self::Texture, rect: Rect, width: f32, paint: Paint);

    /// Draw `text` centered on (x, y).
    fn draw_text(
        &mut self,
        texture: &mut Self::Texture,
        text: &str,
        x: f32,
        y: f32,
        size: f32,
        paint: Paint,
    );

    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Show a texture on screen with its top-left corner at world (x, y).
    fn attach_sprite(&mut self, texture: &Self::Texture, x: f32, y: f32) -> Self::Sprite;

    fn remove_sprite(&mut self, sprite: Self::Sprite);

    /// Screen = world * scale + pan.
    fn set_transform(&mut self, pan_x: f32, pan_y: f32, scale: f32);

    /// Replace the single highlight overlay, in world pixels. `None` hides it.
    fn set_highlight(&mut self, rect: Option<Rect>);
}
