use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    dispatch::{Point, Viewport},
    presenter::PresenterConfig,
};

pub const DEFAULT_COLOR: &str = "black";
const FALLBACK_HEX: &str = "#000000";

pub const PALETTE: &[(&str, &str)] = &[
    ("red", "#FF0000"),
    ("blue", "#0000FF"),
    ("yellow", "#FFFF00"),
    ("purple", "#800080"),
    ("black", "#000000"),
    ("white", "#FFFFFF"),
];

pub fn color_hex(name: &str) -> &'static str {
    let name = name.trim();
    PALETTE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, hex)| *hex)
        .unwrap_or(FALLBACK_HEX)
}

pub fn is_palette_color(name: &str) -> bool {
    PALETTE
        .iter()
        .any(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Side,
    Top,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmbientComment {
    pub text: String,
    pub offset: u32,
    pub lane: Lane,
    pub color: String,
    pub arrived_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentInstruction {
    pub text: String,
    pub lane: Lane,
    pub anchor: Point,
    pub opacity: f32,
    pub font_family: String,
    pub color: &'static str,
    pub age: Duration,
}

#[derive(Debug, Default)]
pub struct AmbientRenderer {
    entries: Vec<AmbientComment>,
}

impl AmbientRenderer {
    pub fn push(&mut self, entry: AmbientComment) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AmbientComment] {
        &self.entries
    }

    pub fn render(
        &self,
        config: &PresenterConfig,
        viewport: Viewport,
        now: Instant,
    ) -> Vec<CommentInstruction> {
        if !config.overlay_visible {
            return Vec::new();
        }
        let opacity = config.opacity_factor();
        self.entries
            .iter()
            .map(|entry| CommentInstruction {
                text: entry.text.clone(),
                lane: entry.lane,
                anchor: match entry.lane {
                    Lane::Side => Point::new(viewport.width, entry.offset as f32),
                    Lane::Top => Point::new(entry.offset as f32, 0.0),
                },
                opacity,
                font_family: config.font_family.clone(),
                color: color_hex(&entry.color),
                age: now.saturating_duration_since(entry.arrived_at),
            })
            .collect()
    }
}
