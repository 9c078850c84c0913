use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    coordinator::CoordinatorClient,
    store::{KvStore, Namespace, StoreChange},
};

pub const KEY_OPACITY: &str = "opacity";
pub const KEY_FONT: &str = "selectedFont";
pub const KEY_COLORS: &str = "selectedColors";
pub const KEY_HIDE_CONTENTS: &str = "hideContents";

pub const DEFAULT_OPACITY: u8 = 100;
pub const DEFAULT_FONT: &str = "'Noto Sans JP', sans-serif";

pub const FONT_OPTIONS: &[(&str, &str)] = &[
    ("Rampart One", "'Rampart One', sans-serif"),
    ("Open Sans", "'Open Sans', sans-serif"),
    ("Noto Sans JP", "'Noto Sans JP', sans-serif"),
    ("M PLUS 1p", "'M PLUS 1p', sans-serif"),
    ("Kosugi Maru", "'Kosugi Maru', sans-serif"),
    ("Sawarabi Gothic", "'Sawarabi Gothic', sans-serif"),
    ("Sawarabi Mincho", "'Sawarabi Mincho', serif"),
    ("Poppins", "'Poppins', sans-serif"),
    ("Lato", "'Lato', sans-serif"),
    ("Montserrat", "'Montserrat', sans-serif"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    pub opacity: u8,
    pub font_family: String,
    pub allowed_colors: Vec<String>,
    pub overlay_visible: bool,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            opacity: DEFAULT_OPACITY,
            font_family: DEFAULT_FONT.to_owned(),
            allowed_colors: Vec::new(),
            overlay_visible: true,
        }
    }
}

impl PresenterConfig {
    pub fn load(store: &KvStore) -> Result<Self> {
        let defaults = Self::default();
        let opacity: u8 = store.get_or(Namespace::Local, KEY_OPACITY, defaults.opacity)?;
        let font_family: String = store.get_or(Namespace::Local, KEY_FONT, defaults.font_family)?;
        let colors: Vec<String> = store.get_or(Namespace::Local, KEY_COLORS, Vec::new())?;
        let hide_contents: bool = store.get_or(Namespace::Local, KEY_HIDE_CONTENTS, false)?;
        Ok(Self {
            opacity: opacity.min(100),
            font_family,
            allowed_colors: normalize_colors(colors),
            overlay_visible: !hide_contents,
        })
    }

    pub fn apply_change(&mut self, change: &StoreChange) -> bool {
        if change.namespace != Namespace::Local {
            return false;
        }
        let before = self.clone();
        let defaults = Self::default();
        match change.key.as_str() {
            KEY_OPACITY => {
                self.opacity = if change.value.is_null() {
                    defaults.opacity
                } else {
                    match change.value.as_u64() {
                        Some(value) => value.min(100) as u8,
                        None => return false,
                    }
                };
            }
            KEY_FONT => {
                self.font_family = match &change.value {
                    Value::Null => defaults.font_family,
                    Value::String(font) => font.clone(),
                    _ => return false,
                };
            }
            KEY_COLORS => {
                self.allowed_colors = match &change.value {
                    Value::Null => Vec::new(),
                    value => match serde_json::from_value::<Vec<String>>(value.clone()) {
                        Ok(colors) => normalize_colors(colors),
                        Err(_) => return false,
                    },
                };
            }
            KEY_HIDE_CONTENTS => {
                self.overlay_visible = match change.value {
                    Value::Null => true,
                    Value::Bool(hide) => !hide,
                    _ => return false,
                };
            }
            _ => return false,
        }
        *self != before
    }

    pub fn opacity_factor(&self) -> f32 {
        f32::from(self.opacity.min(100)) / 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenterSetting {
    Opacity(u8),
    Font(String),
    AllowedColors(Vec<String>),
    OverlayVisible(bool),
}

impl PresenterSetting {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Opacity(_) => KEY_OPACITY,
            Self::Font(_) => KEY_FONT,
            Self::AllowedColors(_) => KEY_COLORS,
            Self::OverlayVisible(_) => KEY_HIDE_CONTENTS,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Self::Opacity(opacity) => json!((*opacity).min(100)),
            Self::Font(font) => json!(font),
            Self::AllowedColors(colors) => json!(normalize_colors(colors.clone())),
            Self::OverlayVisible(visible) => json!(!visible),
        }
    }
}

pub struct PresenterConfigStore {
    store: KvStore,
    relay: Option<CoordinatorClient>,
}

impl PresenterConfigStore {
    pub fn new(store: KvStore, relay: Option<CoordinatorClient>) -> Self {
        Self { store, relay }
    }

    pub fn get(&self) -> Result<PresenterConfig> {
        PresenterConfig::load(&self.store)
    }

    pub async fn set(&self, setting: PresenterSetting) -> Result<StoreChange> {
        let change = self
            .store
            .set(Namespace::Local, setting.key(), &setting.value())?;
        info!(key = %change.key, value = %change.value, "presenter setting committed");
        if let Some(relay) = &self.relay {
            if let Err(err) = relay.notify_change(&change).await {
                warn!(?err, key = %change.key, "coordinator unreachable; change stays persisted");
            }
        }
        Ok(change)
    }
}

fn normalize_colors(colors: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(colors.len());
    for color in colors {
        let color = color.trim().to_ascii_lowercase();
        if !color.is_empty() && !out.contains(&color) {
            out.push(color);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{PresenterConfig, PresenterConfigStore, PresenterSetting, KEY_COLORS, KEY_OPACITY};
    use crate::store::{KvStore, Namespace, StoreChange};

    fn local_change(key: &str, value: serde_json::Value) -> StoreChange {
        StoreChange {
            namespace: Namespace::Local,
            key: key.to_owned(),
            value,
        }
    }

    #[test]
    fn load_uses_defaults_for_empty_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = KvStore::open(dir.path().join("store.db")).expect("store");
        let config = PresenterConfig::load(&store).expect("load");
        assert_eq!(config, PresenterConfig::default());
        assert!(config.allowed_colors.is_empty());
        assert!(config.overlay_visible);
    }

    #[test]
    fn load_reads_original_key_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = KvStore::open(dir.path().join("store.db")).expect("store");
        store.set(Namespace::Local, "opacity", &json!(35)).expect("write");
        store
            .set(Namespace::Local, "selectedColors", &json!(["Red", "blue", "red"]))
            .expect("write");
        store.set(Namespace::Local, "hideContents", &json!(true)).expect("write");
        let config = PresenterConfig::load(&store).expect("load");
        assert_eq!(config.opacity, 35);
        assert_eq!(config.allowed_colors, vec!["red".to_owned(), "blue".to_owned()]);
        assert!(!config.overlay_visible);
    }

    #[test]
    fn apply_change_reports_only_effective_updates() {
        let mut config = PresenterConfig::default();
        assert!(config.apply_change(&local_change(KEY_OPACITY, json!(50))));
        assert_eq!(config.opacity, 50);
        assert!(!config.apply_change(&local_change(KEY_OPACITY, json!(50))));
        assert!(!config.apply_change(&local_change(KEY_OPACITY, json!("half"))));
        assert!(!config.apply_change(&local_change("unrelated", json!(1))));
        assert!(config.apply_change(&local_change(KEY_OPACITY, json!(250))));
        assert_eq!(config.opacity, 100);
    }

    #[test]
    fn apply_change_ignores_session_namespace() {
        let mut config = PresenterConfig::default();
        let change = StoreChange {
            namespace: Namespace::Session,
            key: KEY_COLORS.to_owned(),
            value: json!(["red"]),
        };
        assert!(!config.apply_change(&change));
        assert!(config.allowed_colors.is_empty());
    }

    #[test]
    fn overlay_visibility_is_stored_inverted() {
        assert_eq!(PresenterSetting::OverlayVisible(false).value(), json!(true));
        let mut config = PresenterConfig::default();
        config.apply_change(&local_change("hideContents", json!(true)));
        assert!(!config.overlay_visible);
        config.apply_change(&local_change("hideContents", serde_json::Value::Null));
        assert!(config.overlay_visible);
    }

    #[test]
    fn opacity_factor_scales_to_unit_range() {
        let config = PresenterConfig {
            opacity: 40,
            ..PresenterConfig::default()
        };
        assert!((config.opacity_factor() - 0.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn set_without_relay_persists_and_notifies_locally() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = KvStore::open(dir.path().join("store.db")).expect("store");
        let mut changes = store.subscribe();
        let config_store = PresenterConfigStore::new(store, None);

        config_store
            .set(PresenterSetting::AllowedColors(vec!["Purple".to_owned()]))
            .await
            .expect("set");

        let change = changes.recv().await.expect("change");
        assert_eq!(change.key, "selectedColors");
        assert_eq!(change.value, json!(["purple"]));
        assert_eq!(
            config_store.get().expect("get").allowed_colors,
            vec!["purple".to_owned()]
        );
    }
}
