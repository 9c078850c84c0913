use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::store::{KvStore, Namespace};

pub const KEY_SESSION_ID: &str = "sessionId";
pub const KEY_FORM_URL: &str = "qrCode";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session identifier read before it was created")]
    NotInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub hostname: String,
    pub path: String,
}

impl PageLocation {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim()).with_context(|| format!("invalid page url: {raw}"))?;
        let hostname = url
            .host_str()
            .filter(|host| !host.is_empty())
            .with_context(|| format!("page url has no host: {raw}"))?
            .to_owned();
        Ok(Self {
            hostname,
            path: url.path().to_owned(),
        })
    }
}

pub fn derive_identifier(location: &PageLocation) -> SessionId {
    SessionId(format!("{}{}", location.hostname, location.path.replace('/', "")))
}

pub struct SessionIdentityProvider {
    store: KvStore,
    form_base_url: String,
    current: Option<SessionId>,
}

impl SessionIdentityProvider {
    pub fn new(store: KvStore, form_base_url: impl Into<String>) -> Self {
        Self {
            store,
            form_base_url: form_base_url.into(),
            current: None,
        }
    }

    pub fn create(&mut self, location: &PageLocation) -> Result<SessionId> {
        if let Some(existing) = &self.current {
            return Ok(existing.clone());
        }
        let id = derive_identifier(location);
        self.store
            .set(Namespace::Session, KEY_SESSION_ID, &json!(id.as_str()))
            .context("failed persisting session id")?;
        self.store
            .set(Namespace::Session, KEY_FORM_URL, &json!(self.form_url(&id)))
            .context("failed persisting comment form url")?;
        info!(session = %id, "session identifier created");
        self.current = Some(id.clone());
        Ok(id)
    }

    pub fn get(&self) -> Result<SessionId, SessionError> {
        self.current.clone().ok_or(SessionError::NotInitialized)
    }

    pub fn form_url(&self, id: &SessionId) -> String {
        comment_form_url(&self.form_base_url, id)
    }

    pub fn remove(&mut self) -> Result<()> {
        if self.current.take().is_none() {
            return Ok(());
        }
        self.store
            .remove(Namespace::Session, KEY_SESSION_ID)
            .context("failed removing session id")?;
        self.store
            .remove(Namespace::Session, KEY_FORM_URL)
            .context("failed removing comment form url")?;
        Ok(())
    }
}

pub fn comment_form_url(base: &str, id: &SessionId) -> String {
    format!("{}/{}", base.trim_end_matches('/'), id)
}

pub fn read_persisted(store: &KvStore) -> Result<Option<SessionId>> {
    let value: Option<String> = store.get_or(Namespace::Session, KEY_SESSION_ID, None)?;
    Ok(value.filter(|id| !id.is_empty()).map(SessionId))
}
