//! Recording [`Graphics`] backend.
//!
//! Every texture keeps the list of draw operations issued since its last
//! clear, and the stage keeps the placed sprites. A host that cannot link a
//! graphics API (a browser bridge, a headless runner) replays or ships the
//! serialized [`Frame`].

use std::collections::HashMap;

use serde::Serialize;

use crate::graphics::{Graphics, Paint, Rect};

/// Handle to a recorded texture. Deliberately not `Clone`: whoever holds it
/// owns the texture.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TextureId(u32);

impl TextureId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SpriteId(u32);

impl SpriteId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Fill {
        rect: Rect,
        paint: Paint,
    },
    Stroke {
        rect: Rect,
        width: f32,
        paint: Paint,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        paint: Paint,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TextureRecord {
    pub width: u32,
    pub height: u32,
    pub ops: Vec<DrawOp>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpriteRecord {
    pub texture: u32,
    pub x: f32,
    pub y: f32,
}

/// Counters for everything the backend has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisplayStats {
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub clears: u64,
    pub sprites_attached: u64,
    pub sprites_removed: u64,
}

/// What is on screen right now.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub pan_x: f32,
    pub pan_y: f32,
    pub scale: f32,
    pub sprites: Vec<SpriteRecord>,
    pub highlight: Option<Rect>,
    pub live_textures: usize,
    pub stats: DisplayStats,
}

#[derive(Debug, Default)]
pub struct DisplayList {
    next_id: u32,
    textures: HashMap<u32, TextureRecord>,
    sprites: HashMap<u32, SpriteRecord>,
    transform: (f32, f32, f32),
    highlight: Option<Rect>,
    stats: DisplayStats,
}

impl DisplayList {
    pub fn new() -> Self {
        Self {
            transform: (0.0, 0.0, 1.0),
            ..Default::default()
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn stats(&self) -> DisplayStats {
        self.stats
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn sprite_count(&self) -> usize {
        self.sprites.len()
    }

    pub fn texture(&self, id: u32) -> Option<&TextureRecord> {
        self.textures.get(&id)
    }

    pub fn ops(&self, id: &TextureId) -> &[DrawOp] {
        self.textures
            .get(&id.0)
            .map(|t| t.ops.as_slice())
            .unwrap_or_default()
    }

    pub fn highlight(&self) -> Option<Rect> {
        self.highlight
    }

    pub fn transform(&self) -> (f32, f32, f32) {
        self.transform
    }

    pub fn frame(&self) -> Frame {
        let mut sprites: Vec<SpriteRecord> = self.sprites.values().copied().collect();
        sprites.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
        Frame {
            pan_x: self.transform.0,
            pan_y: self.transform.1,
            scale: self.transform.2,
            sprites,
            highlight: self.highlight,
            live_textures: self.textures.len(),
            stats: self.stats,
        }
    }

    fn record(&mut self, texture: &TextureId, op: DrawOp) {
        match self.textures.get_mut(&texture.0) {
            Some(record) => record.ops.push(op),
            None => tracing::warn!("Draw on destroyed texture {}", texture.0),
        }
    }
}

impl Graphics for DisplayList {
    type Texture = TextureId;
    type Sprite = SpriteId;

    fn create_texture(&mut self, width: u32, height: u32) -> TextureId {
        let id = self.next_id();
        self.textures.insert(
            id,
            TextureRecord {
                width,
                height,
                ops: Vec::new(),
            },
        );
        self.stats.textures_created += 1;
        TextureId(id)
    }

    fn clear(&mut self, texture: &mut TextureId) {
        if let Some(record) = self.textures.get_mut(&texture.0) {
            record.ops.clear();
        }
        self.stats.clears += 1;
    }

    fn fill_rect(&mut self, texture: &mut TextureId, rect: Rect, paint: Paint) {
        self.record(texture, DrawOp::Fill { rect, paint });
    }

    fn stroke_rect(&mut self, texture: &mut TextureId, rect: Rect, width: f32, paint: Paint) {
        self.record(texture, DrawOp::Stroke { rect, width, paint });
    }

    fn draw_text(
        &mut self,
        texture: &mut TextureId,
        text: &str,
        x: f32,
        y: f32,
        size: f32,
        paint: Paint,
    ) {
        self.record(
            texture,
            DrawOp::Text {
                text: text.to_string(),
                x,
                y,
                size,
                paint,
            },
        );
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture.0).is_none() {
            tracing::warn!("Destroying unknown texture {}", texture.0);
        }
        self.stats.textures_destroyed += 1;
    }

    fn attach_sprite(&mut self, texture: &TextureId, x: f32, y: f32) -> SpriteId {
        let id = self.next_id();
        self.sprites.insert(
            id,
            SpriteRecord {
                texture: texture.0,
                x,
                y,
            },
        );
        self.stats.sprites_attached += 1;
        SpriteId(id)
    }

    fn remove_sprite(&mut self, sprite: SpriteId) {
        self.sprites.remove(&sprite.0);
        self.stats.sprites_removed += 1;
    }

    fn set_transform(&mut self, pan_x: f32, pan_y: f32, scale: f32) {
        self.transform = (pan_x, pan_y, scale);
    }

    fn set_highlight(&mut self, rect: Option<Rect>) {
        self.highlight = rect;
    }
}
