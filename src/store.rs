use std::{fmt, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const BUSY_TIMEOUT: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Local,
    Session,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub namespace: Namespace,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct KvStore {
    path: PathBuf,
    changes: broadcast::Sender<StoreChange>,
}

impl KvStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Self { path, changes };
        store.init_db()?;
        Ok(store)
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_store_path()?)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed opening sqlite store at {}", self.path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed setting sqlite busy timeout")?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);
"#,
        )
        .context("failed creating kv table")?;
        Ok(())
    }

    pub fn set(&self, namespace: Namespace, key: &str, value: &Value) -> Result<StoreChange> {
        let payload = serde_json::to_string(value)
            .with_context(|| format!("failed serializing {namespace}/{key}"))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![namespace.as_str(), key, payload, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("failed writing {namespace}/{key}"))?;
        Ok(self.announce(namespace, key, value.clone()))
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed reading {namespace}/{key}"))?;
        raw.map(|text| {
            serde_json::from_str(&text)
                .with_context(|| format!("invalid json stored at {namespace}/{key}"))
        })
        .transpose()
    }

    pub fn get_or<T: DeserializeOwned>(&self, namespace: Namespace, key: &str, default: T) -> Result<T> {
        let Some(value) = self.get(namespace, key)? else {
            return Ok(default);
        };
        match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(err) => {
                debug!(?err, %namespace, key, "stored value has unexpected shape; using default");
                Ok(default)
            }
        }
    }

    pub fn remove(&self, namespace: Namespace, key: &str) -> Result<StoreChange> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace.as_str(), key],
        )
        .with_context(|| format!("failed deleting {namespace}/{key}"))?;
        Ok(self.announce(namespace, key, Value::Null))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn publish(&self, change: StoreChange) {
        // No subscribers is the normal case for one-shot control commands.
        let _ = self.changes.send(change);
    }

    fn announce(&self, namespace: Namespace, key: &str, value: Value) -> StoreChange {
        let change = StoreChange {
            namespace,
            key: key.to_owned(),
            value,
        };
        self.publish(change.clone());
        change
    }
}

pub fn default_store_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .context("unable to locate OS config directory for store")?
        .join("presenter-overlay");
    std::fs::create_dir_all(&base)
        .with_context(|| format!("failed creating store dir at {}", base.display()))?;
    Ok(base.join("store.db"))
}
