use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    presenter::PresenterConfig,
    protocol::{ConfigEvent, CoordinatorRequest, SessionDataReply},
    store::{KvStore, StoreChange},
};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
pub struct SessionMailbox {
    slot: Mutex<Option<String>>,
}

impl SessionMailbox {
    pub fn save(&self, data: String) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }

    pub fn get(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorState {
    mailbox: Arc<SessionMailbox>,
    kv: KvStore,
}

impl CoordinatorState {
    pub fn new(kv: KvStore) -> Self {
        Self {
            mailbox: Arc::new(SessionMailbox::default()),
            kv,
        }
    }
}

pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/message", post(handle_message))
        .route("/config/changed", post(handle_config_changed))
        .route("/config/events", get(handle_config_events))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn run_coordinator(bind: &str, kv: KvStore) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid coordinator bind address: {bind}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed binding coordinator listener on {addr}"))?;

    info!("coordinator listening on http://{addr}");
    info!("config events available at ws://{addr}/config/events");
    axum::serve(listener, router(CoordinatorState::new(kv)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("coordinator shutting down");
        })
        .await
        .context("axum serve failed")?;
    Ok(())
}

async fn handle_message(
    State(state): State<CoordinatorState>,
    Json(request): Json<CoordinatorRequest>,
) -> (StatusCode, Json<Value>) {
    match request {
        CoordinatorRequest::SaveData { data } => {
            debug!(data = %data, "session data saved");
            state.mailbox.save(data);
            (StatusCode::ACCEPTED, Json(json!({})))
        }
        CoordinatorRequest::GetData => {
            let reply = SessionDataReply {
                data: state.mailbox.get().unwrap_or_default(),
            };
            (StatusCode::OK, Json(json!(reply)))
        }
    }
}

async fn handle_config_changed(
    State(state): State<CoordinatorState>,
    Json(change): Json<StoreChange>,
) -> StatusCode {
    debug!(key = %change.key, namespace = %change.namespace, "relaying config change");
    state.kv.publish(change);
    StatusCode::ACCEPTED
}

async fn handle_config_events(
    State(state): State<CoordinatorState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_config_events(socket, state))
}

async fn stream_config_events(mut socket: WebSocket, state: CoordinatorState) {
    let mut changes = state.kv.subscribe();
    if send_snapshot(&mut socket, &state.kv).await.is_err() {
        return;
    }
    info!("config observer connected");
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    if send_event(&mut socket, &ConfigEvent::Changed(change)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "config observer lagged; resending snapshot");
                    if send_snapshot(&mut socket, &state.kv).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(?err, "config observer receive error");
                    break;
                }
            },
        }
    }
    info!("config observer disconnected");
}

async fn send_snapshot(socket: &mut WebSocket, kv: &KvStore) -> Result<()> {
    match PresenterConfig::load(kv) {
        Ok(config) => send_event(socket, &ConfigEvent::Snapshot(config)).await,
        Err(err) => {
            warn!(?err, "failed loading presenter config for snapshot");
            Ok(())
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ConfigEvent) -> Result<()> {
    let text = serde_json::to_string(event).context("failed encoding config event")?;
    socket
        .send(Message::Text(text))
        .await
        .context("config observer went away")
}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid coordinator url: {base_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .context("failed building coordinator http client")?;
        Ok(Self { http, base_url })
    }

    pub fn for_bind(bind: &str) -> Result<Self> {
        Self::new(&format!("http://{bind}"))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid coordinator path: {path}"))
    }

    async fn post_message(&self, request: &CoordinatorRequest) -> Result<reqwest::Response> {
        self.http
            .post(self.endpoint("message")?)
            .json(request)
            .send()
            .await
            .context("coordinator request failed")?
            .error_for_status()
            .context("coordinator rejected request")
    }

    pub async fn save_session_data(&self, data: &str) -> Result<()> {
        self.post_message(&CoordinatorRequest::SaveData {
            data: data.to_owned(),
        })
        .await?;
        Ok(())
    }

    /// `None` when nothing has been saved since the coordinator started.
    pub async fn get_session_data(&self) -> Result<Option<String>> {
        let reply: SessionDataReply = self
            .post_message(&CoordinatorRequest::GetData)
            .await?
            .json()
            .await
            .context("invalid coordinator reply")?;
        Ok(Some(reply.data).filter(|data| !data.is_empty()))
    }

    pub async fn notify_change(&self, change: &StoreChange) -> Result<()> {
        self.http
            .post(self.endpoint("config/changed")?)
            .json(change)
            .send()
            .await
            .context("coordinator change relay failed")?
            .error_for_status()
            .context("coordinator rejected change")?;
        Ok(())
    }

    pub fn config_events_url(&self) -> Result<Url> {
        let mut url = self.endpoint("config/events")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot derive websocket url from {}", self.base_url))?;
        Ok(url)
    }
}
