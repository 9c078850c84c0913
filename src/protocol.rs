use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{presenter::PresenterConfig, store::StoreChange};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub word: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Parses a frame that is either a JSON object or a JSON string holding
/// the serialized object.
pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let value: Value = serde_json::from_str(text).context("payload is not json")?;
    let value = match value {
        Value::String(inner) => {
            serde_json::from_str(&inner).context("string payload does not hold json")?
        }
        other => other,
    };
    if !value.is_object() {
        return Err(anyhow!("payload is not a json object"));
    }
    serde_json::from_value(value).context("payload is missing a string `word` field")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ConfigEvent {
    Snapshot(PresenterConfig),
    Changed(StoreChange),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum CoordinatorRequest {
    #[serde(rename = "saveData")]
    SaveData { data: String },
    #[serde(rename = "getData")]
    GetData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDataReply {
    #[serde(default)]
    pub data: String,
}
