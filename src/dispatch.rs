use std::time::Instant;

use chrono::Utc;
use rand::{seq::SliceRandom, Rng};

use crate::{
    ambient::{AmbientComment, Lane, DEFAULT_COLOR},
    animation::{SpecialAnimation, SpecialKind, ANIMATION_EXTENT},
    presenter::PresenterConfig,
    protocol::InboundMessage,
};

pub const FIREWORKS_TOKEN: &str = "fireworks";

const AMBIENT_SPREAD: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Special(SpecialKind),
    Ambient,
}

pub fn classify(word: &str) -> Classification {
    if !word.is_empty() && word.chars().all(|ch| ch == '8') {
        return Classification::Special(SpecialKind::Eights);
    }
    if word == FIREWORKS_TOKEN {
        return Classification::Special(SpecialKind::Fireworks);
    }
    Classification::Ambient
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Ambient(AmbientComment),
    Special(SpecialAnimation),
}

#[derive(Debug)]
pub struct Dispatcher<R: Rng> {
    rng: R,
    next_key: u64,
}

impl<R: Rng> Dispatcher<R> {
    pub fn new(rng: R) -> Self {
        Self { rng, next_key: 1 }
    }

    pub fn dispatch(
        &mut self,
        message: &InboundMessage,
        config: &PresenterConfig,
        viewport: Viewport,
        now: Instant,
    ) -> Dispatched {
        match classify(&message.word) {
            Classification::Special(kind) => Dispatched::Special(self.special(message, kind, viewport, now)),
            Classification::Ambient => Dispatched::Ambient(self.ambient(message, config, viewport, now)),
        }
    }

    fn ambient(
        &mut self,
        message: &InboundMessage,
        config: &PresenterConfig,
        viewport: Viewport,
        now: Instant,
    ) -> AmbientComment {
        let lane = if self.rng.gen_bool(0.5) {
            Lane::Side
        } else {
            Lane::Top
        };
        let extent = match lane {
            Lane::Side => viewport.height,
            Lane::Top => viewport.width,
        };
        let offset = self.below((extent * AMBIENT_SPREAD).floor());
        let color = config
            .allowed_colors
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_COLOR.to_owned());
        AmbientComment {
            text: message.word.clone(),
            offset,
            lane,
            color,
            arrived_at: now,
        }
    }

    fn special(
        &mut self,
        message: &InboundMessage,
        kind: SpecialKind,
        viewport: Viewport,
        now: Instant,
    ) -> SpecialAnimation {
        let x = self.below(viewport.width - ANIMATION_EXTENT);
        let y = self.below(viewport.height - ANIMATION_EXTENT);
        let key = self.next_key;
        self.next_key += 1;
        SpecialAnimation {
            key,
            payload: message.word.clone(),
            kind,
            active: true,
            created_at: Utc::now(),
            position: Point::new(x as f32, y as f32),
            born: now,
        }
    }

    fn below(&mut self, bound: f32) -> u32 {
        if !bound.is_finite() || bound < 1.0 {
            return 0;
        }
        let bound = bound.min(u32::MAX as f32) as u32;
        self.rng.gen_range(0..bound)
    }
}
