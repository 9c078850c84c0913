use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{dispatch::Viewport, stream::BackoffPolicy};

const CONFIG_DIR_NAME: &str = "presenter-overlay";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportSize {
    pub width: f32,
    pub height: f32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

impl From<ViewportSize> for Viewport {
    fn from(size: ViewportSize) -> Self {
        Viewport::new(size.width.max(0.0), size.height.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream_scheme: String,
    pub stream_host: String,
    pub api_base_url: String,
    pub form_base_url: String,
    pub coordinator_bind: String,
    pub store_path: Option<PathBuf>,
    pub fonts_dir: PathBuf,
    pub special_dwell_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub comment_scroll_secs: f32,
    pub fallback_viewport: ViewportSize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream_scheme: "wss".to_owned(),
            stream_host: "presentation.noonyuu.com".to_owned(),
            api_base_url: "https://presentation.noonyuu.com/app".to_owned(),
            form_base_url: "https://presentation.noonyuu.com/app/comment/form".to_owned(),
            coordinator_bind: "127.0.0.1:38472".to_owned(),
            store_path: None,
            fonts_dir: PathBuf::from("assets/fonts"),
            special_dwell_ms: 3000,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 15_000,
            comment_scroll_secs: 8.0,
            fallback_viewport: ViewportSize::default(),
        }
    }
}

impl AppConfig {
    /// Reads `path` (or the OS config location), writing defaults first if the
    /// file does not exist yet.
    pub fn load_or_create(path: Option<PathBuf>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(path) => path,
            None => default_config_dir()?.join("config.json"),
        };
        if let Some(parent) = config_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating config dir at {}", parent.display()))?;
        }

        if !config_path.exists() {
            let default = Self::default();
            default.save(&config_path)?;
            return Ok((default, config_path));
        }

        let text = fs::read_to_string(&config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("invalid json in {}", config_path.display()))?;
        Ok((config, config_path))
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, payload).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_millis(self.reconnect_initial_ms, self.reconnect_max_ms)
    }

    pub fn special_dwell(&self) -> Duration {
        Duration::from_millis(self.special_dwell_ms)
    }

    pub fn comment_scroll(&self) -> Duration {
        Duration::from_secs_f32(self.comment_scroll_secs.clamp(0.5, 120.0))
    }
}

fn default_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("unable to locate OS config directory")?
        .join(CONFIG_DIR_NAME))
}
