use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use tokio::{task::JoinHandle, time::sleep_until};
use tracing::debug;

use crate::{dispatch::Point, events::OverlayUpdate};

pub const ANIMATION_EXTENT: f32 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Eights,
    Fireworks,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialAnimation {
    pub key: u64,
    pub payload: String,
    pub kind: SpecialKind,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub position: Point,
    pub born: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnimationContent {
    Glyphs(Vec<String>),
    Fireworks,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationInstruction {
    pub key: u64,
    pub position: Point,
    pub content: AnimationContent,
    pub visible: bool,
    pub age: Duration,
}

#[derive(Debug, Default)]
pub struct AnimationScheduler {
    entries: Vec<SpecialAnimation>,
}

impl AnimationScheduler {
    pub fn push(&mut self, entry: SpecialAnimation) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SpecialAnimation] {
        &self.entries
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.active).count()
    }

    pub fn deactivate(&mut self, key: u64) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.key == key && entry.active)
        {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }

    pub fn render(&self, now: Instant) -> Vec<AnimationInstruction> {
        self.entries
            .iter()
            .map(|entry| AnimationInstruction {
                key: entry.key,
                position: entry.position,
                content: match entry.kind {
                    SpecialKind::Eights => AnimationContent::Glyphs(
                        entry.payload.chars().map(|ch| ch.to_string()).collect(),
                    ),
                    SpecialKind::Fireworks => AnimationContent::Fireworks,
                },
                visible: entry.active,
                age: now.saturating_duration_since(entry.born),
            })
            .collect()
    }
}

/// Emits `OverlayUpdate::Deactivate(key)` once `deadline` passes. The task
/// is detached: closing the stream does not cancel it.
pub fn schedule_deactivation(
    key: u64,
    deadline: tokio::time::Instant,
    updates: Sender<OverlayUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep_until(deadline).await;
        if updates.send(OverlayUpdate::Deactivate(key)).is_err() {
            debug!(key, "overlay view gone before animation deactivated");
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use crossbeam_channel::unbounded;

    use super::{
        schedule_deactivation, AnimationContent, AnimationScheduler, SpecialAnimation, SpecialKind,
    };
    use crate::{dispatch::Point, events::OverlayUpdate};

    fn special(key: u64, payload: &str, kind: SpecialKind) -> SpecialAnimation {
        SpecialAnimation {
            key,
            payload: payload.to_owned(),
            kind,
            active: true,
            created_at: Utc::now(),
            position: Point::new(10.0, 20.0),
            born: Instant::now(),
        }
    }

    #[test]
    fn eights_render_one_glyph_per_character() {
        let mut scheduler = AnimationScheduler::default();
        scheduler.push(special(1, "888", SpecialKind::Eights));
        let out = scheduler.render(Instant::now());
        assert_eq!(
            out[0].content,
            AnimationContent::Glyphs(vec!["8".to_owned(), "8".to_owned(), "8".to_owned()])
        );
        assert!(out[0].visible);
    }

    #[test]
    fn deactivated_entries_are_retained_but_invisible() {
        let mut scheduler = AnimationScheduler::default();
        scheduler.push(special(1, "fireworks", SpecialKind::Fireworks));
        scheduler.push(special(2, "8", SpecialKind::Eights));

        assert!(scheduler.deactivate(1));
        assert!(!scheduler.deactivate(1));
        assert!(!scheduler.deactivate(99));

        let out = scheduler.render(Instant::now());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, AnimationContent::Fireworks);
        assert!(!out[0].visible);
        assert!(out[1].visible);
        assert_eq!(scheduler.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivation_waits_for_the_deadline() {
        let (tx, rx) = unbounded();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(3000);
        let handle = schedule_deactivation(7, deadline, tx);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(rx.try_recv().is_err());

        handle.await.expect("timer task");
        assert!(tokio::time::Instant::now() >= deadline);
        assert!(matches!(rx.try_recv(), Ok(OverlayUpdate::Deactivate(7))));
    }
}
