//! DTP origin (송신측) - Diode Transfer Protocol
//!
//! 단방향 링크의 보내는 쪽 데모 데몬
//! - 파일을 청크로 잘라 공정 스케줄링으로 전송
//! - 회신 없음: 히스토리 브로드캐스트가 ACK를 대신한다
//!
//! 사용법:
//!   cargo run --release --bin dtp-origin -- [OPTIONS]
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin dtp-origin -- --remote 10.0.0.2:7000 --file data.bin
//!
//!   # 저대역 다이오드 + FIFO 정책
//!   cargo run --release --bin dtp-origin -- -f data.bin --low-bandwidth --fifo

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use dtp::{Config, Origin, OutboundState, SchedulerPolicy};

/// origin 데몬 설정
struct OriginConfig {
    file_path: Option<PathBuf>,
    user_id: Uuid,
    config: Config,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            user_id: Uuid::new_v4(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> OriginConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = OriginConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--remote" | "-r" => {
                if i + 1 < args.len() {
                    config.config.remote_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--user" | "-u" => {
                if i + 1 < args.len() {
                    config.user_id = args[i + 1].parse().expect("유효한 UUID 필요");
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.config.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--budget" => {
                if i + 1 < args.len() {
                    config.config.packet_byte_budget =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--fifo" => {
                config.config.scheduler_policy = SchedulerPolicy::Fifo;
            }
            "--low-bandwidth" => {
                let remote = config.config.remote_addr;
                config.config = Config::low_bandwidth();
                config.config.remote_addr = remote;
            }
            "--high-throughput" => {
                let remote = config.config.remote_addr;
                config.config = Config::high_throughput();
                config.config.remote_addr = remote;
            }
            "--help" | "-h" => {
                println!(
                    r#"DTP Origin - Diode Transfer Protocol 송신측

단방향 링크 너머로 파일을 보내는 데모 데몬
- 청크 분할 + weighted round-robin 공정 스케줄링
- 연결-당-패킷 TCP, 재시도 없음 (at-most-once)

사용법:
  cargo run --release --bin dtp-origin -- [OPTIONS]

옵션:
  -r, --remote <ADDR>     destination 주소 (기본: 127.0.0.1:7000)
  -f, --file <PATH>       전송할 파일 경로
  -u, --user <UUID>       업로드 소유 사용자 id (기본: 랜덤)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 524288)
  --budget <SIZE>         패킷당 바이트 예산 (기본: 2097152)
  --fifo                  공정 스케줄링 대신 전역 FIFO
  --low-bandwidth         저대역 다이오드 프리셋
  --high-throughput       고처리량 다이오드 프리셋
  -h, --help              이 도움말 출력

예시:
  # 파일 전송
  cargo run --release --bin dtp-origin -- -r 10.0.0.2:7000 -f large_file.bin

  # 저대역 링크
  cargo run --release --bin dtp-origin -- -f data.bin --low-bandwidth
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG로 재정의 가능)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let origin_config = parse_args();

    info!("DTP Origin starting...");
    info!("Remote address: {}", origin_config.config.remote_addr);
    info!("Chunk size: {} bytes", origin_config.config.chunk_size);
    info!(
        "Packet budget: {} bytes",
        origin_config.config.packet_byte_budget
    );

    // 전송할 데이터 준비
    let data = if let Some(path) = &origin_config.file_path {
        info!("Loading file: {:?}", path);
        std::fs::read(path)?
    } else {
        // 테스트용 더미 데이터 (1MB)
        info!("Using test data (1MB)");
        vec![0xABu8; 1024 * 1024]
    };

    let name = origin_config
        .file_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test-data.bin".into());

    let origin = Arc::new(Origin::new(origin_config.config)?);
    let pump = origin.spawn_pump();

    let id = origin.store_upload(origin_config.user_id, name, [], &data);
    info!("Upload accepted: {id} ({} bytes)", data.len());

    // 종결 상태까지 대기
    loop {
        match origin.state(id) {
            Some(OutboundState::Pending) | Some(OutboundState::Ongoing) => {
                std::thread::sleep(Duration::from_millis(200));
            }
            state => {
                info!("Transfer finished: {state:?}");
                break;
            }
        }
    }

    // 히스토리가 한 번은 나가도록 잠시 더 돌린 뒤 정렬된 종료
    std::thread::sleep(Duration::from_secs(1));
    origin.shutdown();
    let _ = pump.join();

    info!("Stats: {}", origin.stats().summary());
    Ok(())
}
