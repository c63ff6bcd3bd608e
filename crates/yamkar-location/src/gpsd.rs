//! gpsd 위치 제공자 (Linux 현장 단말).
//!
//! gpsd JSON 프로토콜: TCP 접속 후 `?WATCH` 명령을 보내면 한 줄에 하나씩
//! JSON 보고가 온다. 그중 `TPV`(시각/위치/속도) 보고의 2D 이상 fix만
//! 위치 샘플로 쓴다. gpsd에는 권한 모델이 없으므로 권한은 항상 허용이다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use yamkar_core::bounded::bounded;
use yamkar_core::error::CoreError;
use yamkar_core::models::location::Position;
use yamkar_core::ports::location::{
    position_watch, PermissionScope, PermissionStatus, PositionProvider, PositionSample,
    PositionWatch, WatchFeed, WatchOptions,
};

/// JSON 보고 스트림 활성화 명령
const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// 감시 샘플 버퍼
const WATCH_BUFFER: usize = 16;

type ReportLines = Lines<BufReader<TcpStream>>;

#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    /// 0/1: fix 없음, 2: 2D, 3: 3D
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    /// 수평 위치 오차 추정 (미터)
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    time: Option<String>,
}

/// gpsd 보고 한 줄 해석.
///
/// TPV가 아니거나 fix가 없으면 `None`, 깨진 줄이나 좌표 없는 fix는 `Some(Err)`.
pub fn parse_report(line: &str) -> Option<PositionSample> {
    let report: TpvReport = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(e) => return Some(Err(e.into())),
    };
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }

    let (Some(lat), Some(lon)) = (report.lat, report.lon) else {
        return Some(Err(CoreError::Internal(
            "gpsd TPV 보고에 좌표 없음".to_string(),
        )));
    };

    let timestamp = report
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let accuracy_m = report.eph.or(match (report.epx, report.epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });

    let mut position = Position::new(lat, lon, timestamp);
    position.accuracy_m = accuracy_m;
    Some(Ok(position))
}

/// gpsd 위치 제공자 — `PositionProvider` 포트 구현
pub struct GpsdPositionProvider {
    addr: String,
}

impl GpsdPositionProvider {
    /// `addr`: gpsd 주소 (기본 `127.0.0.1:2947`)
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }

    async fn open_stream(&self) -> Result<ReportLines, CoreError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| CoreError::Network(format!("gpsd 연결 실패 ({}): {e}", self.addr)))?;
        stream.write_all(WATCH_COMMAND).await?;
        Ok(BufReader::new(stream).lines())
    }

    /// 보고 스트림 → 감시 채널 펌프. 취소되거나 소비자가 사라지면 종료.
    async fn pump(mut lines: ReportLines, feed: WatchFeed) {
        let WatchFeed {
            samples,
            mut cancelled,
        } = feed;

        loop {
            tokio::select! {
                _ = &mut cancelled => {
                    debug!("gpsd 감시 취소");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(sample) = parse_report(&line) {
                            if samples.send(sample).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("gpsd 연결 종료");
                        break;
                    }
                    Err(e) => {
                        warn!("gpsd 읽기 에러: {e}");
                        let _ = samples.send(Err(e.into())).await;
                        break;
                    }
                },
            }
        }
    }
}

#[async_trait]
impl PositionProvider for GpsdPositionProvider {
    async fn check_permissions(&self) -> Result<PermissionStatus, CoreError> {
        Ok(PermissionStatus::granted())
    }

    async fn request_permissions(
        &self,
        _scope: PermissionScope,
    ) -> Result<PermissionStatus, CoreError> {
        Ok(PermissionStatus::granted())
    }

    async fn current_position(&self, options: &WatchOptions) -> Result<Position, CoreError> {
        bounded("gpsd 단발 측위", options.timeout, async {
            let mut lines = self.open_stream().await?;
            while let Some(line) = lines.next_line().await? {
                match parse_report(&line) {
                    Some(Ok(position)) => return Ok(position),
                    Some(Err(e)) => debug!("gpsd 보고 무시: {e}"),
                    None => {}
                }
            }
            Err::<Position, CoreError>(CoreError::Network(
                "fix 전에 gpsd 연결 종료".to_string(),
            ))
        })
        .await
    }

    async fn start_watch(&self, options: &WatchOptions) -> Result<PositionWatch, CoreError> {
        debug!(
            "gpsd 감시 시작: {} (고정밀 {}, 필터 {}m)",
            self.addr, options.high_accuracy, options.distance_filter_m
        );
        let lines = self.open_stream().await?;
        let (feed, watch) = position_watch(WATCH_BUFFER);
        tokio::spawn(Self::pump(lines, feed));
        Ok(watch)
    }
}
