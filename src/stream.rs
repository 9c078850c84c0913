use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::session::SessionId;

pub type RawMessage = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms.max(1));
        Self {
            initial,
            max: Duration::from_millis(max_ms).max(initial),
        }
    }
}

#[derive(Debug)]
struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            next: policy.initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.policy.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.policy.initial;
    }
}

pub fn session_endpoint(scheme: &str, host: &str, id: &SessionId) -> Result<Url> {
    let raw = format!("{scheme}://{}/ws", host.trim_end_matches('/'));
    let mut url = Url::parse(&raw).with_context(|| format!("invalid stream endpoint: {raw}"))?;
    url.query_pairs_mut().append_pair("sessionId", id.as_str());
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct StreamingClient {
    policy: BackoffPolicy,
}

impl StreamingClient {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    pub fn open(&self, endpoint: Url) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_connection(endpoint, self.policy, tx, cancel.clone()));
        Subscription { rx, cancel }
    }
}

pub struct Subscription {
    rx: UnboundedReceiver<RawMessage>,
    cancel: CancellationToken,
}

impl Subscription {
    #[cfg(test)]
    pub(crate) fn from_receiver(rx: UnboundedReceiver<RawMessage>) -> Self {
        Self {
            rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Next message in receipt order, or `None` once closed.
    pub async fn recv(&mut self) -> Option<RawMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }

    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// Next already-received message without waiting.
    pub fn try_recv(&mut self) -> Option<RawMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_connection(
    endpoint: Url,
    policy: BackoffPolicy,
    tx: UnboundedSender<RawMessage>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(policy);
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(endpoint.as_str()) => result,
        };
        match connected {
            Ok((mut socket, _response)) => {
                info!(endpoint = %endpoint, "stream connected");
                backoff.reset();
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = socket.close(None).await;
                            debug!(endpoint = %endpoint, "stream closed by subscriber");
                            return;
                        }
                        next = socket.next() => next,
                    };
                    match next {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(text).is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if tx.send(text).is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(?err, endpoint = %endpoint, "dropped non utf-8 binary frame");
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(?err, endpoint = %endpoint, "stream read error");
                            break;
                        }
                    }
                }
                warn!(endpoint = %endpoint, "stream disconnected, reconnecting");
            }
            Err(err) => {
                warn!(?err, endpoint = %endpoint, "failed to connect stream, retrying");
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "stream reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use futures_util::SinkExt;
    use tokio::{net::TcpListener, time::timeout};
    use tokio_tungstenite::{accept_async, tungstenite::Message};
    use url::Url;

    use super::{session_endpoint, Backoff, BackoffPolicy, StreamingClient, Subscription};
    use crate::session::{derive_identifier, PageLocation};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy::from_millis(10, 40)
    }

    async fn next(sub: &mut Subscription) -> String {
        timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("message within timeout")
            .expect("subscription open")
    }

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut backoff = Backoff::new(BackoffPolicy::from_millis(1000, 15_000));
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15_000, 15_000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn endpoint_carries_encoded_session_id() {
        let id = derive_identifier(&PageLocation::parse("https://slides.test/a b/c").expect("parse"));
        let url = session_endpoint("wss", "api.example.test", &id).expect("endpoint");
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws");
        let (key, value) = url.query_pairs().next().expect("query pair");
        assert_eq!(key, "sessionId");
        assert_eq!(value, id.as_str());
    }

    #[tokio::test]
    async fn reconnects_without_duplicating_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            for batch in [vec!["one", "two"], vec!["three"]] {
                let (tcp, _) = listener.accept().await.expect("accept");
                let mut ws = accept_async(tcp).await.expect("handshake");
                for text in batch {
                    ws.send(Message::Text(text.to_owned())).await.expect("send");
                }
                ws.close(None).await.ok();
            }
        });

        let client = StreamingClient::new(fast_policy());
        let mut sub = client.open(Url::parse(&format!("ws://{addr}/ws")).expect("url"));
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(next(&mut sub).await);
        }
        assert_eq!(got, vec!["one", "two", "three"]);
        server.await.expect("server task");

        sub.close();
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn surfaces_utf8_binary_and_skips_control_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(tcp).await.expect("handshake");
            ws.send(Message::Binary(vec![0xff, 0xfe])).await.expect("send");
            ws.send(Message::Ping(Vec::new())).await.expect("send");
            ws.send(Message::Binary(b"hi".to_vec())).await.expect("send");
            ws.send(Message::Text("after".to_owned())).await.expect("send");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut sub = StreamingClient::new(fast_policy())
            .open(Url::parse(&format!("ws://{addr}/ws")).expect("url"));
        assert_eq!(next(&mut sub).await, "hi");
        assert_eq!(next(&mut sub).await, "after");
    }

    #[tokio::test]
    async fn close_stops_reconnect_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let server_accepted = accepted.clone();
        let server = tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                server_accepted.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut ws) = accept_async(tcp).await {
                    ws.send(Message::Text("hello".to_owned())).await.ok();
                    ws.close(None).await.ok();
                }
            }
        });

        let mut sub = StreamingClient::new(BackoffPolicy::from_millis(200, 200))
            .open(Url::parse(&format!("ws://{addr}/ws")).expect("url"));
        assert_eq!(next(&mut sub).await, "hello");
        sub.close();
        assert_eq!(sub.try_recv(), None);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(sub.recv().await, None);
        server.abort();
    }
}
