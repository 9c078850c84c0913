use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::{
    ambient::{AmbientRenderer, CommentInstruction},
    animation::{AnimationInstruction, AnimationScheduler},
    dispatch::Viewport,
    events::OverlayUpdate,
    presenter::PresenterConfig,
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OverlayFrame {
    pub comments: Vec<CommentInstruction>,
    pub animations: Vec<AnimationInstruction>,
}

#[derive(Debug, Default)]
pub struct OverlayView {
    ambient: AmbientRenderer,
    animations: AnimationScheduler,
    config: PresenterConfig,
}

impl OverlayView {
    pub fn new(config: PresenterConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn ambient(&self) -> &AmbientRenderer {
        &self.ambient
    }

    #[cfg(test)]
    pub(crate) fn animations(&self) -> &AnimationScheduler {
        &self.animations
    }

    pub fn apply(&mut self, update: OverlayUpdate) {
        match update {
            OverlayUpdate::Ambient(entry) => self.ambient.push(entry),
            OverlayUpdate::Special(entry) => self.animations.push(entry),
            OverlayUpdate::Deactivate(key) => {
                if !self.animations.deactivate(key) {
                    debug!(key, "deactivation for unknown or inactive animation");
                }
            }
            OverlayUpdate::Config(config) => self.config = config,
        }
    }

    /// Applies everything currently queued, in receipt order.
    pub fn drain(&mut self, rx: &Receiver<OverlayUpdate>) -> usize {
        let mut applied = 0;
        while let Ok(update) = rx.try_recv() {
            self.apply(update);
            applied += 1;
        }
        applied
    }

    /// A hidden overlay draws nothing; entries keep accumulating meanwhile.
    pub fn frame(&self, viewport: Viewport, now: Instant) -> OverlayFrame {
        if !self.config.overlay_visible {
            return OverlayFrame::default();
        }
        OverlayFrame {
            comments: self.ambient.render(&self.config, viewport, now),
            animations: self.animations.render(now),
        }
    }
}
