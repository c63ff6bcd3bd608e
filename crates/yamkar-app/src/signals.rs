//! OS 시그널 라우팅.
//!
//! SIGINT/SIGTERM은 종료 신호로, SIGUSR1/SIGUSR2는 라이프사이클 허브의
//! 활성/비활성 신호로 바꾼다. 화면이 없는 단말에서 운영자가
//! `kill -USR1`로 연결 복구를 수동 트리거하는 경로다.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use yamkar_core::models::lifecycle::LifecycleSignal;
use yamkar_recovery::LifecycleHub;

/// 처리하는 OS 시그널
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    /// 수동 재연결 (SIGUSR1)
    Resume,
    /// 백그라운드 진입 표시 (SIGUSR2)
    Park,
}

impl ProcessSignal {
    /// 라이프사이클 신호로 변환 (종료 시그널은 None)
    fn lifecycle(self) -> Option<LifecycleSignal> {
        match self {
            ProcessSignal::Interrupt | ProcessSignal::Terminate => None,
            ProcessSignal::Resume => Some(LifecycleSignal::BecameActive),
            ProcessSignal::Park => Some(LifecycleSignal::inactive_now()),
        }
    }
}

/// 시그널 라우터: 종료 watch 채널과 라이프사이클 허브를 잇는다
pub struct SignalRouter {
    hub: Arc<LifecycleHub>,
    shutdown_tx: watch::Sender<bool>,
}

impl SignalRouter {
    pub fn new(hub: Arc<LifecycleHub>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { hub, shutdown_tx }
    }

    /// 종료 수신기
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 시그널 하나 처리, 종료 시그널이면 true
    fn dispatch(&self, signal: ProcessSignal) -> bool {
        match signal.lifecycle() {
            Some(lifecycle) => {
                info!("{signal:?} 시그널 → {lifecycle:?}");
                self.hub.emit(lifecycle);
                false
            }
            None => {
                info!("{signal:?} 시그널, 종료 신호 발송");
                self.shutdown_tx.send_replace(true);
                true
            }
        }
    }

    /// 종료 시그널이 올 때까지 시그널을 라우팅
    pub async fn run_until_shutdown(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigusr1 = signal(SignalKind::user_defined1())?;
            let mut sigusr2 = signal(SignalKind::user_defined2())?;

            loop {
                let received = tokio::select! {
                    _ = sigint.recv() => ProcessSignal::Interrupt,
                    _ = sigterm.recv() => ProcessSignal::Terminate,
                    _ = sigusr1.recv() => ProcessSignal::Resume,
                    _ = sigusr2.recv() => ProcessSignal::Park,
                };
                if self.dispatch(received) {
                    return Ok(());
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            self.dispatch(ProcessSignal::Interrupt);
            Ok(())
        }
    }
}
