use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    animation::schedule_deactivation,
    dispatch::{Dispatched, Dispatcher, Viewport},
    events::OverlayUpdate,
    presenter::PresenterConfig,
    protocol::{parse_inbound, ConfigEvent},
    stream::{RawMessage, Subscription},
};

pub struct OverlayPipeline {
    dispatcher: Dispatcher<StdRng>,
    config: PresenterConfig,
    viewport: watch::Receiver<Viewport>,
    updates: Sender<OverlayUpdate>,
    dwell: Duration,
}

impl OverlayPipeline {
    pub fn new(
        rng: StdRng,
        config: PresenterConfig,
        viewport: watch::Receiver<Viewport>,
        updates: Sender<OverlayUpdate>,
        dwell: Duration,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(rng),
            config,
            viewport,
            updates,
            dwell,
        }
    }

    /// Returns `false` once the overlay view is gone.
    pub fn handle_raw(&mut self, raw: &str) -> bool {
        let message = match parse_inbound(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(?err, payload = %raw, "dropped malformed audience message");
                return true;
            }
        };
        let viewport = *self.viewport.borrow();
        match self
            .dispatcher
            .dispatch(&message, &self.config, viewport, Instant::now())
        {
            Dispatched::Ambient(entry) => self.emit(OverlayUpdate::Ambient(entry)),
            Dispatched::Special(entry) => {
                let key = entry.key;
                debug!(key, payload = %entry.payload, "special animation started");
                if !self.emit(OverlayUpdate::Special(entry)) {
                    return false;
                }
                let deadline = tokio::time::Instant::now() + self.dwell;
                schedule_deactivation(key, deadline, self.updates.clone());
                true
            }
        }
    }

    pub fn handle_config_event(&mut self, event: ConfigEvent) -> bool {
        let changed = match event {
            ConfigEvent::Snapshot(config) => {
                let changed = config != self.config;
                self.config = config;
                changed
            }
            ConfigEvent::Changed(change) => self.config.apply_change(&change),
        };
        if !changed {
            return true;
        }
        info!(
            opacity = self.config.opacity,
            font = %self.config.font_family,
            colors = ?self.config.allowed_colors,
            visible = self.config.overlay_visible,
            "presenter config applied"
        );
        self.emit(OverlayUpdate::Config(self.config.clone()))
    }

    fn handle_config_frame(&mut self, raw: &str) -> bool {
        match serde_json::from_str::<ConfigEvent>(raw) {
            Ok(event) => self.handle_config_event(event),
            Err(err) => {
                warn!(?err, payload = %raw, "ignored unknown config event");
                true
            }
        }
    }

    // Config frames already received apply before the next message is placed.
    fn apply_pending_config(&mut self, config_events: &mut Option<Subscription>) -> bool {
        let Some(events) = config_events.as_mut() else {
            return true;
        };
        while let Some(raw) = events.try_recv() {
            if !self.handle_config_frame(&raw) {
                return false;
            }
        }
        true
    }

    fn emit(&self, update: OverlayUpdate) -> bool {
        if self.updates.send(update).is_err() {
            warn!("overlay view dropped; stopping pipeline");
            return false;
        }
        true
    }

    pub async fn run(
        mut self,
        mut messages: Subscription,
        mut config_events: Option<Subscription>,
        shutdown: CancellationToken,
    ) {
        info!("overlay pipeline started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                raw = messages.recv() => match raw {
                    Some(raw) => {
                        if !self.apply_pending_config(&mut config_events) || !self.handle_raw(&raw) {
                            break;
                        }
                    }
                    None => break,
                },
                raw = next_config_frame(&mut config_events) => match raw {
                    Some(raw) => {
                        if !self.handle_config_frame(&raw) {
                            break;
                        }
                    }
                    None => config_events = None,
                },
            }
        }
        messages.close();
        if let Some(events) = config_events.as_mut() {
            events.close();
        }
        info!("overlay pipeline stopped");
    }
}

async fn next_config_frame(events: &mut Option<Subscription>) -> Option<RawMessage> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;
    use tokio::sync::{mpsc, watch};
    use tokio_util::sync::CancellationToken;

    use super::OverlayPipeline;
    use crate::{
        dispatch::Viewport,
        events::OverlayUpdate,
        presenter::PresenterConfig,
        protocol::ConfigEvent,
        store::{Namespace, StoreChange},
        stream::Subscription,
    };

    fn pipeline(viewport: Viewport) -> (OverlayPipeline, Receiver<OverlayUpdate>, watch::Sender<Viewport>) {
        let (tx, rx) = unbounded();
        let (viewport_tx, viewport_rx) = watch::channel(viewport);
        let pipeline = OverlayPipeline::new(
            StdRng::seed_from_u64(11),
            PresenterConfig {
                allowed_colors: vec!["red".to_owned()],
                ..PresenterConfig::default()
            },
            viewport_rx,
            tx,
            Duration::from_millis(3000),
        );
        (pipeline, rx, viewport_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn special_entry_deactivates_after_dwell() {
        let (mut pipeline, rx, _viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        assert!(pipeline.handle_raw(r#"{"word":"888","timestamp":"t"}"#));

        let key = match rx.try_recv() {
            Ok(OverlayUpdate::Special(entry)) => {
                assert!(entry.active);
                entry.key
            }
            other => panic!("expected special, got {other:?}"),
        };

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(matches!(rx.try_recv(), Ok(OverlayUpdate::Deactivate(k)) if k == key));
    }

    #[tokio::test]
    async fn malformed_messages_create_no_entries() {
        let (mut pipeline, rx, _viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        assert!(pipeline.handle_raw("not json"));
        assert!(pipeline.handle_raw(r#"{"timestamp":"t"}"#));
        assert!(rx.try_recv().is_err());

        assert!(pipeline.handle_raw(r#"{"word":"hello"}"#));
        match rx.try_recv() {
            Ok(OverlayUpdate::Ambient(entry)) => assert_eq!(entry.color, "red"),
            other => panic!("expected ambient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_uses_latest_viewport() {
        let (mut pipeline, rx, viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        viewport
            .send(Viewport::new(120.0, 80.0))
            .expect("viewport receiver alive");
        assert!(pipeline.handle_raw(r#"{"word":"fireworks"}"#));
        match rx.try_recv() {
            Ok(OverlayUpdate::Special(entry)) => {
                assert_eq!((entry.position.x, entry.position.y), (0.0, 0.0));
            }
            other => panic!("expected special, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn config_events_update_projection_once() {
        let (mut pipeline, rx, _viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        let change = StoreChange {
            namespace: Namespace::Local,
            key: "selectedColors".to_owned(),
            value: json!([]),
        };
        assert!(pipeline.handle_config_event(ConfigEvent::Changed(change.clone())));
        assert!(matches!(rx.try_recv(), Ok(OverlayUpdate::Config(config)) if config.allowed_colors.is_empty()));

        assert!(pipeline.handle_config_event(ConfigEvent::Changed(change)));
        assert!(pipeline.handle_config_event(ConfigEvent::Snapshot(PresenterConfig::default())));
        assert!(rx.try_recv().is_err());

        assert!(pipeline.handle_raw(r#"{"word":"hi"}"#));
        match rx.try_recv() {
            Ok(OverlayUpdate::Ambient(entry)) => assert_eq!(entry.color, "black"),
            other => panic!("expected ambient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_forwards_in_order_and_stops_on_shutdown() {
        let (pipeline, rx, _viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(
            Subscription::from_receiver(message_rx),
            Some(Subscription::from_receiver(config_rx)),
            shutdown.clone(),
        ));

        message_tx.send(r#"{"word":"first"}"#.to_owned()).expect("send");
        message_tx.send(r#"{"word":"8"}"#.to_owned()).expect("send");
        config_tx
            .send(r#"{"type":"changed","data":{"namespace":"local","key":"opacity","value":30}}"#.to_owned())
            .expect("send");

        let mut seen = Vec::new();
        while seen.len() < 3 {
            tokio::task::yield_now().await;
            seen.extend(rx.try_iter());
        }
        assert!(matches!(&seen[0], OverlayUpdate::Ambient(entry) if entry.text == "first"));
        assert!(seen.iter().any(|update| matches!(update, OverlayUpdate::Special(_))));
        assert!(seen.iter().any(|update| matches!(update, OverlayUpdate::Config(config) if config.opacity == 30)));

        shutdown.cancel();
        task.await.expect("pipeline task");
        assert!(message_tx.send(r#"{"word":"late"}"#.to_owned()).is_err());
    }

    #[tokio::test]
    async fn queued_color_change_applies_before_message_backlog() {
        let (pipeline, rx, _viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();
        config_tx
            .send(r#"{"type":"changed","data":{"namespace":"local","key":"selectedColors","value":["blue"]}}"#.to_owned())
            .expect("send");
        for n in 0..200 {
            message_tx.send(format!(r#"{{"word":"comment {n}"}}"#)).expect("send");
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(
            Subscription::from_receiver(message_rx),
            Some(Subscription::from_receiver(config_rx)),
            shutdown.clone(),
        ));

        let mut seen = Vec::new();
        while seen.len() < 201 {
            tokio::task::yield_now().await;
            seen.extend(rx.try_iter());
        }
        assert!(matches!(&seen[0], OverlayUpdate::Config(config) if config.allowed_colors == ["blue"]));
        let colors: Vec<&str> = seen[1..]
            .iter()
            .map(|update| match update {
                OverlayUpdate::Ambient(entry) => entry.color.as_str(),
                other => panic!("expected ambient, got {other:?}"),
            })
            .collect();
        assert_eq!(colors.len(), 200);
        assert!(colors.iter().all(|color| *color == "blue"));

        shutdown.cancel();
        task.await.expect("pipeline task");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_deactivation_outlives_shutdown() {
        let (pipeline, rx, _viewport) = pipeline(Viewport::new(1920.0, 1080.0));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(
            Subscription::from_receiver(message_rx),
            None,
            shutdown.clone(),
        ));

        message_tx.send(r#"{"word":"8"}"#.to_owned()).expect("send");
        let key = loop {
            tokio::task::yield_now().await;
            if let Ok(update) = rx.try_recv() {
                match update {
                    OverlayUpdate::Special(entry) => break entry.key,
                    other => panic!("expected special, got {other:?}"),
                }
            }
        };

        shutdown.cancel();
        task.await.expect("pipeline task");
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert!(matches!(rx.try_recv(), Ok(OverlayUpdate::Deactivate(k)) if k == key));
    }
}
