//! DTP destination (수신측) - Diode Transfer Protocol
//!
//! 단방향 링크의 받는 쪽 데모 데몬
//! - 패킷을 받아 청크를 재조립, 파일 스토리지에 기록
//! - 히스토리 대조로 유실을 감지해 Error로 기록
//!
//! 사용법:
//!   cargo run --release --bin dtp-destination -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin dtp-destination -- --bind 0.0.0.0:7000 --storage /tmp/dtp

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dtp::{Config, Destination, FileStorage};

/// destination 데몬 설정
struct DestinationConfig {
    stats_interval: Duration,
    config: Config,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(10),
            config: Config::default(),
        }
    }
}

fn parse_args() -> DestinationConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DestinationConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--storage" | "-s" => {
                if i + 1 < args.len() {
                    config.config.storage_root = (&args[i + 1]).into();
                    i += 1;
                }
            }
            "--queue-depth" => {
                if i + 1 < args.len() {
                    config.config.recv_queue_depth =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--stats-interval" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.stats_interval = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"DTP Destination - Diode Transfer Protocol 수신측

단방향 링크에서 패킷을 받아 파일을 재조립하는 데모 데몬
- 오프셋 연속성 + 크기/다이제스트 검증
- 취소/히스토리 반영, 어떤 실패에도 루프는 계속

사용법:
  cargo run --release --bin dtp-destination -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        수신 바인드 주소 (기본: 0.0.0.0:7000)
  -s, --storage <PATH>     청크 스토리지 루트 (기본: /var/lib/dtp/storage)
  --queue-depth <N>        수신 큐 깊이 (기본: 8)
  --stats-interval <SECS>  통계 출력 간격 초 (기본: 10)
  -h, --help               이 도움말 출력

예시:
  cargo run --release --bin dtp-destination -- -b 0.0.0.0:7000 -s /tmp/dtp
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

    let dest_config = parse_args();

    info!("DTP Destination starting...");
    info!("Bind address: {}", dest_config.config.bind_addr);
    info!("Storage root: {:?}", dest_config.config.storage_root);

    let storage = Arc::new(FileStorage::new(&dest_config.config.storage_root)?);
    let destination = Arc::new(Destination::new(dest_config.config, storage)?);
    let consume = destination.spawn_consume();

    info!(
        "Listening on {}",
        destination.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    // 주기적으로 통계와 상태별 전송 수 출력
    loop {
        std::thread::sleep(dest_config.stats_interval);
        info!("Stats: {}", destination.stats().summary());

        let tally = destination.reassembler().state_tally();
        if !tally.is_empty() {
            let mut parts: Vec<String> =
                tally.iter().map(|(s, n)| format!("{s:?}: {n}")).collect();
            parts.sort();
            info!("Transfers: {}", parts.join(", "));
        }
    }

    #[allow(unreachable_code)]
    {
        let _ = consume.join();
        Ok(())
    }
}
