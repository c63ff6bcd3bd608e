//! 실시간 채널 클라이언트.
//!
//! `tokio-tungstenite` 기반. 연결 후 채널에 join하고 주기적으로
//! 하트비트를 보내 서버가 연결을 끊지 않도록 유지한다.
//! 복구 시퀀스에서는 best-effort로만 쓰인다.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use yamkar_core::error::CoreError;
use yamkar_core::ports::realtime::RealtimeChannel;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 기본 구독 토픽
const DEFAULT_TOPIC: &str = "realtime:public";

/// 채널 프로토콜 메시지
#[derive(Debug, Serialize)]
struct ChannelMessage<'a> {
    topic: &'a str,
    event: &'a str,
    payload: serde_json::Value,
    #[serde(rename = "ref")]
    reference: String,
}

struct ActiveSocket {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// 실시간 채널 클라이언트 — `RealtimeChannel` 포트 구현
pub struct RealtimeClient {
    url: String,
    topic: String,
    heartbeat_interval: Duration,
    connected: Arc<AtomicBool>,
    next_ref: Arc<AtomicU64>,
    active: Mutex<Option<ActiveSocket>>,
}

impl RealtimeClient {
    /// 새 실시간 클라이언트 생성 (`url`: ws:// 또는 wss://)
    pub fn new(url: &str, heartbeat_interval: Duration) -> Self {
        Self {
            url: url.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            heartbeat_interval,
            connected: Arc::new(AtomicBool::new(false)),
            next_ref: Arc::new(AtomicU64::new(1)),
            active: Mutex::new(None),
        }
    }

    /// 구독 토픽 변경
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    fn encode(next_ref: &AtomicU64, topic: &str, event: &str, payload: serde_json::Value) -> Message {
        let message = ChannelMessage {
            topic,
            event,
            payload,
            reference: next_ref.fetch_add(1, Ordering::Relaxed).to_string(),
        };
        // 필드가 모두 직렬화 가능한 타입이라 실패하지 않는다
        Message::text(serde_json::to_string(&message).unwrap_or_default())
    }

    /// 소켓 루프: 하트비트 송신, 수신 처리, 종료 신호 대기
    async fn run_socket(
        mut write: SplitSink<WsStream, Message>,
        mut read: SplitStream<WsStream>,
        heartbeat_interval: Duration,
        next_ref: Arc<AtomicU64>,
        connected: Arc<AtomicBool>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                _ = ticker.tick() => {
                    let heartbeat =
                        Self::encode(&next_ref, "phoenix", "heartbeat", serde_json::json!({}));
                    if let Err(e) = write.send(heartbeat).await {
                        warn!("실시간 하트비트 전송 실패: {e}");
                        break;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => debug!("실시간 수신: {}", text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("실시간 채널 서버 종료");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("실시간 수신 에러: {e}");
                        break;
                    }
                },
            }
        }

        connected.store(false, Ordering::SeqCst);
        debug!("실시간 소켓 루프 종료");
    }
}

#[async_trait]
impl RealtimeChannel for RealtimeClient {
    async fn connect(&self, access_token: &str) -> Result<(), CoreError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            let _ = previous.shutdown.send(());
            let _ = previous.task.await;
        }

        info!("실시간 채널 연결: {}", self.url.split('?').next().unwrap_or(&self.url));

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| CoreError::Network(format!("WebSocket 연결 실패: {e}")))?;

        let (mut write, read) = ws_stream.split();

        let join = Self::encode(
            &self.next_ref,
            &self.topic,
            "phx_join",
            serde_json::json!({ "access_token": access_token }),
        );
        write
            .send(join)
            .await
            .map_err(|e| CoreError::Network(format!("채널 join 실패: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.connected.store(true, Ordering::SeqCst);
        let task = tokio::spawn(Self::run_socket(
            write,
            read,
            self.heartbeat_interval,
            Arc::clone(&self.next_ref),
            Arc::clone(&self.connected),
            shutdown_rx,
        ));

        *active = Some(ActiveSocket {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        if let Some(socket) = self.active.lock().await.take() {
            let _ = socket.shutdown.send(());
            if let Err(e) = socket.task.await {
                warn!("실시간 소켓 태스크 종료 에러: {e}");
            }
            debug!("실시간 채널 연결 해제");
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
