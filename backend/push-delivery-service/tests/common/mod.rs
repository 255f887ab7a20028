//! Scripted in-memory gateway shared by the integration tests.
//!
//! Frames written by the code under test travel through the real codec and
//! session code over a `tokio::io::duplex` pipe; a spawned task plays the
//! gateway side.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use apns_gateway::{
    Credential, GatewayConnector, GatewayEndpoint, GatewayError, GatewayResult, GatewaySession,
};
use apns_wire::{DeviceToken, ErrorCode, ErrorResponse, FeedbackEntry, PushPayload};
use async_trait::async_trait;
use chrono::Utc;
use push_delivery_service::{DeliveryConfig, Device, DeviceId, InMemoryDeliveryStore, Notification};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

/// One frame as the gateway saw it.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub connection: usize,
    pub command: u8,
    pub notification_id: Option<u32>,
    pub token: Vec<u8>,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct GatewayState {
    connections: usize,
    feedback_connections: usize,
    refuse: bool,
    frames: Vec<ReceivedFrame>,
    rejections: HashMap<u32, ErrorCode>,
    poisoned: Vec<Vec<u8>>,
    feedback: Vec<FeedbackEntry>,
}

#[derive(Clone)]
pub struct FakeGateway {
    feedback_endpoint: GatewayEndpoint,
    state: Arc<Mutex<GatewayState>>,
}

impl FakeGateway {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            feedback_endpoint: config.feedback.clone(),
            state: Arc::default(),
        }
    }

    /// Answer the enhanced frame with `id` with an error response, then hang up.
    pub fn reject(&self, id: u32, code: ErrorCode) {
        self.state.lock().unwrap().rejections.insert(id, code);
    }

    /// Fail every write that carries `token`.
    pub fn poison(&self, token: &DeviceToken) {
        self.state
            .lock()
            .unwrap()
            .poisoned
            .push(token.as_bytes().to_vec());
    }

    pub fn refuse_connections(&self) {
        self.state.lock().unwrap().refuse = true;
    }

    pub fn serve_feedback(&self, entries: Vec<FeedbackEntry>) {
        self.state.lock().unwrap().feedback = entries;
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn feedback_connections(&self) -> usize {
        self.state.lock().unwrap().feedback_connections
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn received_ids(&self) -> Vec<u32> {
        self.frames()
            .iter()
            .filter_map(|f| f.notification_id)
            .collect()
    }

    fn open_feedback(&self, endpoint: &GatewayEndpoint) -> GatewaySession {
        let (client, mut server) = duplex(4096);
        let entries = {
            let mut state = self.state.lock().unwrap();
            state.feedback_connections += 1;
            state.feedback.clone()
        };

        tokio::spawn(async move {
            for entry in entries {
                if server.write_all(&entry.to_bytes()).await.is_err() {
                    return;
                }
            }
            let _ = server.shutdown().await;
        });

        GatewaySession::new(client, endpoint.clone())
    }

    fn open_gateway(&self, endpoint: &GatewayEndpoint) -> GatewaySession {
        let (client, server) = duplex(64 * 1024);
        let (connection, poisoned) = {
            let mut state = self.state.lock().unwrap();
            state.connections += 1;
            (state.connections, state.poisoned.clone())
        };

        tokio::spawn(serve_gateway(server, connection, self.state.clone()));

        GatewaySession::new(PoisonStream { inner: client, poisoned }, endpoint.clone())
    }
}

#[async_trait]
impl GatewayConnector for FakeGateway {
    async fn connect(
        &self,
        _credential: &Credential,
        endpoint: &GatewayEndpoint,
    ) -> GatewayResult<GatewaySession> {
        if self.state.lock().unwrap().refuse {
            return Err(GatewayError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        if *endpoint == self.feedback_endpoint {
            Ok(self.open_feedback(endpoint))
        } else {
            Ok(self.open_gateway(endpoint))
        }
    }
}

async fn serve_gateway(mut server: DuplexStream, connection: usize, state: Arc<Mutex<GatewayState>>) {
    while let Ok(frame) = read_frame(&mut server, connection).await {
        let rejection = frame
            .notification_id
            .and_then(|id| state.lock().unwrap().rejections.remove(&id).map(|code| (id, code)));
        state.lock().unwrap().frames.push(frame);

        if let Some((id, code)) = rejection {
            let _ = server
                .write_all(&ErrorResponse::new(code, id).to_bytes())
                .await;
            let _ = server.shutdown().await;
            return;
        }
    }
}

async fn read_frame(stream: &mut DuplexStream, connection: usize) -> io::Result<ReceivedFrame> {
    let command = stream.read_u8().await?;
    let notification_id = match command {
        0 => None,
        1 => {
            let id = stream.read_u32().await?;
            let _expiry = stream.read_u32().await?;
            Some(id)
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected command {other}"),
            ))
        }
    };

    let mut token = vec![0u8; stream.read_u16().await? as usize];
    stream.read_exact(&mut token).await?;
    let mut payload = vec![0u8; stream.read_u16().await? as usize];
    stream.read_exact(&mut payload).await?;

    Ok(ReceivedFrame {
        connection,
        command,
        notification_id,
        token,
        payload,
    })
}

/// Client half that fails writes carrying a poisoned token.
struct PoisonStream {
    inner: DuplexStream,
    poisoned: Vec<Vec<u8>>,
}

impl AsyncRead for PoisonStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PoisonStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poisoned = self
            .poisoned
            .iter()
            .any(|token| buf.windows(token.len()).any(|w| w == token.as_slice()));
        if poisoned {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "poisoned token")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

pub fn test_config() -> DeliveryConfig {
    let mut config = DeliveryConfig::default();
    config.gateway = GatewayEndpoint::new("gateway.test", 2195);
    config.feedback = GatewayEndpoint::new("feedback.test", 2196);
    config.response_timeout = Duration::from_millis(200);
    config
}

pub fn credential() -> Credential {
    Credential::from_pem(b"test certificate".to_vec())
}

pub fn token_for(id: DeviceId) -> DeviceToken {
    let mut bytes = vec![0xa5; 28];
    bytes.extend_from_slice(&(id as u32).to_be_bytes());
    DeviceToken::from_bytes(bytes)
}

pub fn device(id: DeviceId, app_id: Option<i64>) -> Device {
    Device {
        id,
        app_id,
        token: token_for(id),
        last_registered_at: Utc::now(),
    }
}

pub async fn add_notification(
    store: &InMemoryDeliveryStore,
    id: i64,
    device: &Device,
    alert: &str,
) -> Notification {
    let notification = Notification::new(
        id,
        device,
        PushPayload::new().with_alert(alert, apns_wire::PayloadFormat::Device),
    );
    store.insert_notification(notification.clone()).await;
    notification
}
