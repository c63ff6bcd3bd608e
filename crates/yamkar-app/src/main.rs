//! # yamkar-app
//!
//! YAMKAR 현장 단말 클라이언트 바이너리 진입점.
//! 설정 로드, 저장소 선택, DI 조립, 백그라운드 루프 기동, 종료 처리.

mod app;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yamkar_core::config_manager::ConfigManager;
use yamkar_core::ports::kv_store::KeyValueStore;
use yamkar_storage::{MemoryKvStore, SqliteKvStore};

use crate::app::App;
use crate::signals::SignalRouter;

/// YAMKAR 현장 단말 클라이언트
///
/// 출퇴근 기간 동안 위치를 보고하고, 절전/백그라운드 복귀 시 연결을 복구한다.
#[derive(Parser, Debug)]
#[command(name = "yamkar")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 config.json)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 백엔드 URL 지정
    #[arg(long, short = 's')]
    server: Option<String>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// 데이터 저장 디렉토리
    #[arg(long)]
    data_dir: Option<String>,

    /// 인메모리 저장소 사용 (재시작 시 세션/추적 상태 소실)
    #[arg(long)]
    ephemeral: bool,

    /// 실시간 채널 비활성화
    #[arg(long)]
    no_realtime: bool,

    /// 시작 시 이 출근 기록 ID로 위치 추적 시작
    #[arg(long)]
    attendance_id: Option<String>,
}

/// 데이터 디렉토리 결정 (CLI 인자 또는 플랫폼별 기본 경로)
///
/// - macOS: `~/Library/Application Support/app.yamkar.yamkar`
/// - Windows: `%APPDATA%\yamkar\yamkar\data`
/// - Linux: `~/.local/share/yamkar`
fn resolve_data_dir(data_dir: Option<&str>) -> PathBuf {
    data_dir
        .map(PathBuf::from)
        .or_else(|| ProjectDirs::from("app", "yamkar", "yamkar").map(|p| p.data_dir().to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn open_store(args: &Args, configured: Option<PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    if args.ephemeral {
        info!("인메모리 저장소 사용");
        return Ok(Arc::new(MemoryKvStore::new()));
    }
    let db_path = configured
        .unwrap_or_else(|| resolve_data_dir(args.data_dir.as_deref()).join("yamkar.db"));
    let store = SqliteKvStore::open(&db_path)
        .with_context(|| format!("SQLite 저장소 열기 실패: {}", db_path.display()))?;
    info!("SQLite 저장소: {}", db_path.display());
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "yamkar={0},yamkar_app={0},yamkar_core={0},yamkar_storage={0},yamkar_network={0},yamkar_recovery={0},yamkar_location={0}",
        args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    info!("YAMKAR 클라이언트 시작");

    // 설정 로드: 실패하면 데이터 디렉토리의 설정 파일로 대체
    let config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .or_else(|e| {
        warn!("설정 관리자 초기화 실패, 대체 경로 사용: {e}");
        ConfigManager::with_path(resolve_data_dir(args.data_dir.as_deref()).join("config.json"))
    })
    .context("설정 관리자 생성 실패")?;
    info!("설정 파일: {}", config_manager.config_path().display());

    let mut config = config_manager.get();
    if let Some(server) = &args.server {
        config.server.base_url = server.clone();
    }
    if args.no_realtime {
        config.server.realtime_enabled = false;
    }
    info!("서버: {}", config.server.base_url);

    let kv = open_store(&args, config.storage.db_path.clone())?;
    let app = App::build(&config, kv).context("클라이언트 조립 실패")?;

    let signals = SignalRouter::new(Arc::clone(&app.hub));
    let running = app.start(signals.subscribe()).await;

    let email = std::env::var("YAMKAR_EMAIL").ok();
    let password = std::env::var("YAMKAR_PASSWORD").ok();
    let signed_in = app
        .sign_in_if_needed(email.as_deref(), password.as_deref())
        .await;

    if let Some(id) = &args.attendance_id {
        if signed_in {
            match app.reporter.start_tracking(id).await {
                Ok(true) => info!("위치 추적 중: {id}"),
                Ok(false) => warn!("위치 추적을 시작하지 못함 (권한 또는 위치 제공자 확인)"),
                Err(e) => warn!("위치 추적 시작 거부: {e}"),
            }
        } else {
            warn!("로그인되지 않아 위치 추적을 시작하지 않음");
        }
    }

    // 첫 복구 시퀀스
    app.activate();

    info!("YAMKAR 클라이언트 실행 중 (Ctrl+C로 종료, SIGUSR1로 재연결)");
    signals
        .run_until_shutdown()
        .await
        .context("시그널 핸들러 등록 실패")?;

    app.shutdown(running).await;
    info!(
        "YAMKAR 클라이언트 종료 (연결 상태: {}, 재시도 대기 {}건)",
        app.recovery.status(),
        app.reporter.pending_count().await
    );
    Ok(())
}
