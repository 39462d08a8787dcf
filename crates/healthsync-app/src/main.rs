//! # healthsync
//!
//! HEALTHSYNC 에이전트 바이너리 진입점.
//! 명령 해석, 설정 로드, 어댑터 조립, 백그라운드 루프 시작만 담당한다.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use healthsync_app::event_bus::{AppEvent, EventBus};
use healthsync_app::lifecycle::LifecycleManager;
use healthsync_app::wiring::{self, App};
use healthsync_core::config::AppConfig;
use healthsync_core::config_manager::ConfigManager;
use healthsync_core::models::upload::TransferEvent;
use healthsync_core::ports::transport::UploadTransport;
use std::path::PathBuf;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 건강 데이터 동기화 에이전트
#[derive(Parser, Debug)]
#[command(name = "healthsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 실행할 명령 (기본: run)
    #[command(subcommand)]
    command: Option<Command>,

    /// 서버 URL 지정 (기본: 설정 파일 값)
    #[arg(long, short = 's', global = true)]
    server: Option<String>,

    /// 데이터 저장 경로 (DB, 전송 임시 파일)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 설정 파일 경로
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// 스케줄러와 백그라운드 전송을 종료 신호까지 실행
    Run,
    /// 지금 바로 동기화 (동기 전송)
    SyncNow,
    /// 주기 동기화 활성화
    Enable,
    /// 주기 동기화 비활성화
    Disable,
    /// 저장된 동기화 상태 출력
    Status,
    /// 서버 연결 확인
    TestConnection,
    /// 최근 이력 업로드 (최초 1회)
    Backfill {
        /// 업로드 기간 (일, 기본: 설정값)
        #[arg(long)]
        days: Option<u32>,
    },
}

/// 설정 로드 + CLI 오버라이드
fn load_config(args: &Args) -> Result<AppConfig> {
    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = match manager {
        Ok(manager) => {
            info!("설정 파일: {}", manager.config_path().display());
            manager.get()
        }
        Err(e) => {
            warn!("설정 파일 로드 실패, 기본 설정 사용: {e}");
            AppConfig::default_config()
        }
    };

    if let Some(server_url) = &args.server {
        config.server.base_url = server_url.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow!("설정 검증 실패: {e}"))?;
    Ok(config)
}

/// 데이터 디렉토리 결정 (CLI 인자 또는 플랫폼별 기본 경로)
fn resolve_data_dir(args: &Args) -> PathBuf {
    args.data_dir
        .clone()
        .or_else(|| ConfigManager::data_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "healthsync={0},healthsync_app={0},healthsync_core={0},healthsync_collector={0},healthsync_network={0},healthsync_storage={0}",
        args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    let config = load_config(&args)?;
    let data_dir = resolve_data_dir(&args);
    info!(
        "서버: {}, 데이터 디렉토리: {}",
        config.server.base_url,
        data_dir.display()
    );

    let mut app = wiring::assemble(config, &data_dir)?;
    let lifecycle = LifecycleManager::new();
    let command = args.command.clone().unwrap_or(Command::Run);

    // 명령과 무관한 시작 단계: 완료 리스너 + 장부 복구
    if command == Command::Run {
        spawn_event_logger(&app.events);
        wiring::forward_transfer_events(&app.transport, app.events.clone(), lifecycle.subscribe());
    }
    let mut transfers = app.transport.subscribe();
    let reattached = match app.start_transfers(lifecycle.subscribe()).await {
        Ok(reattached) => reattached,
        Err(e) => {
            error!("장부 복구 실패: {e}");
            0
        }
    };

    let result = match command {
        Command::Run => return run_daemon(app, lifecycle).await,
        Command::Backfill { days } => {
            let days = days.unwrap_or(app.config.sync.backfill_days);
            return backfill(app, lifecycle, transfers, reattached, days).await;
        }
        Command::SyncNow => sync_now(&app).await,
        Command::Enable => set_enabled(&app, true).await,
        Command::Disable => set_enabled(&app, false).await,
        Command::Status => print_status(&app).await,
        Command::TestConnection => {
            if app.transport.test_connection().await {
                println!("서버 연결 정상: {}", app.config.server.base_url);
                Ok(())
            } else {
                Err(anyhow!("서버 연결 실패: {}", app.config.server.base_url))
            }
        }
    };

    settle_reattached(&app, &mut transfers, reattached).await;
    lifecycle.shutdown();
    result
}

/// 짧은 명령 종료 전: 다시 연결한 작업을 요청 타임아웃까지 기다린다
async fn settle_reattached(
    app: &App,
    transfers: &mut broadcast::Receiver<TransferEvent>,
    reattached: usize,
) {
    if reattached == 0 {
        return;
    }
    info!("재연결한 백그라운드 작업 {reattached}건 완료 대기");
    let tally = wiring::await_transfers(transfers, reattached, app.config.request_timeout()).await;
    if tally.unfinished > 0 {
        println!(
            "백그라운드 작업 {}건 미완료 - 다음 실행 시 이어서 전송",
            tally.unfinished
        );
    }
}

async fn set_enabled(app: &App, enabled: bool) -> Result<()> {
    if enabled {
        app.scheduler.enable().await?;
        println!("주기 동기화 활성화됨");
    } else {
        app.scheduler.disable().await?;
        println!("주기 동기화 비활성화됨");
    }
    Ok(())
}

async fn print_status(app: &App) -> Result<()> {
    let status = app.scheduler.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// 수동 동기화: 동기 전송이므로 반환 시점에 결과가 확정된다
async fn sync_now(app: &App) -> Result<()> {
    if app.config.source.simulate {
        wiring::seed_simulation(app.source.clone(), &app.config);
    }
    let report = app.scheduler.on_manual_trigger().await?;
    println!("{}", report.outcome.status_text());
    Ok(())
}

/// 이력 업로드: 넘긴 작업과 재연결한 작업이 모두 끝날 때까지 대기
async fn backfill(
    app: App,
    lifecycle: LifecycleManager,
    mut transfers: broadcast::Receiver<TransferEvent>,
    reattached: usize,
    days: u32,
) -> Result<()> {
    if app.config.source.simulate {
        wiring::seed_simulation(app.source.clone(), &app.config);
    }

    let uploaded = app.scheduler.backfill_history(days).await?;
    if uploaded == 0 {
        println!("이력 업로드 대상 없음 (이미 완료했거나 데이터 없음)");
    } else {
        println!("스냅샷 {uploaded}개를 백그라운드 전송에 넘김 - 완료 대기 중 (Ctrl+C로 중단)");
    }
    let expected = uploaded + reattached;
    if expected == 0 {
        lifecycle.shutdown();
        return Ok(());
    }

    let signal = lifecycle.wait_for_signal();
    tokio::pin!(signal);

    let (mut completed, mut failed) = (0usize, 0usize);
    while completed + failed < expected {
        tokio::select! {
            received = transfers.recv() => match received {
                Ok(TransferEvent::Completed { .. }) => completed += 1,
                Ok(TransferEvent::Failed { handle, error }) => {
                    warn!(%handle, "스냅샷 전송 실패: {error}");
                    failed += 1;
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("전송 이벤트 {n}개 누락 - 성공으로 집계");
                    completed += n as usize;
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut signal => {
                println!("중단됨 - 남은 작업은 다음 실행 시 이어서 전송");
                return Ok(());
            }
        }
    }

    lifecycle.shutdown();
    println!("백그라운드 전송 완료: 성공 {completed}개, 실패 {failed}개");
    Ok(())
}

/// 앱 이벤트 로깅
fn spawn_event_logger(events: &EventBus) {
    let mut bus_rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(AppEvent::CycleFinished(report)) => info!(
                    "사이클 종료 [{}]: {}",
                    report.trigger,
                    report.outcome.status_text()
                ),
                Ok(AppEvent::Transfer(TransferEvent::Completed { handle, at })) => {
                    info!(%handle, "백그라운드 전송 완료: {at}");
                }
                Ok(AppEvent::Transfer(TransferEvent::Failed { handle, error })) => {
                    warn!(%handle, "백그라운드 전송 실패: {error}");
                }
                Ok(AppEvent::BackfillFinished { uploaded }) => {
                    info!("이력 업로드 완료: {uploaded}개");
                }
                Ok(AppEvent::Error(message)) => warn!("스케줄링 에러: {message}"),
                Err(RecvError::Lagged(n)) => warn!("앱 이벤트 {n}개 누락"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// 데몬 모드: 스케줄러와 변경 관찰을 종료 신호까지 실행
///
/// 완료 리스너와 장부 복구는 `main`의 시작 단계에서 이미 끝났다.
async fn run_daemon(app: App, lifecycle: LifecycleManager) -> Result<()> {
    let App {
        config,
        source,
        scheduler,
        grants,
        ..
    } = app;

    // 1. 데이터 소스 + 변경 관찰
    if config.source.simulate {
        wiring::start_simulation(source.clone(), &config, lifecycle.subscribe());
    }
    let changes = wiring::observe_all(source.as_ref()).await?;

    // 2. 스케줄러
    let state = scheduler.initialize().await?;
    info!("동기화 상태: {state}");
    tokio::spawn(scheduler.clone().run(grants, changes, lifecycle.subscribe()));

    // 3. 최초 이력 업로드
    let backfill_days = config.sync.backfill_days;
    let first_run = scheduler.clone();
    tokio::spawn(async move {
        match first_run.backfill_history(backfill_days).await {
            Ok(0) => {}
            Ok(uploaded) => info!("최초 이력 업로드: {uploaded}개 넘김"),
            Err(e) => warn!("최초 이력 업로드 실패 (다음 실행 시 재시도): {e}"),
        }
    });

    info!("HEALTHSYNC 에이전트 실행 중 (Ctrl+C로 종료)");
    lifecycle.wait_for_signal().await;

    info!("HEALTHSYNC 에이전트 종료");
    Ok(())
}
