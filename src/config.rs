//! 프로토콜 설정

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PACKET_BYTE_BUDGET, DEFAULT_RECV_QUEUE_DEPTH,
    DEFAULT_SEND_QUEUE_DEPTH,
};

/// 스케줄링 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// 사용자별 가중치 기반 weighted round-robin
    WeightedRoundRobin,

    /// 사용자 구분 없는 전역 oldest-first
    Fifo,
}

/// DTP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 상대편 전송 주소 (origin 측)
    pub remote_addr: SocketAddr,

    /// 수신 바인드 주소 (destination 측)
    pub bind_addr: SocketAddr,

    /// 송신 큐 깊이 (1~4, 가득 차면 패킷 생성이 블록됨)
    pub send_queue_depth: usize,

    /// 수신 큐 깊이 (가득 차면 수신 바이트를 버림)
    pub recv_queue_depth: usize,

    /// 패킷당 바이트 예산
    pub packet_byte_budget: usize,

    /// 업로드 분할 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 스케줄링 정책
    pub scheduler_policy: SchedulerPolicy,

    /// 히스토리 브로드캐스트 최소 간격
    pub history_interval: Duration,

    /// 히스토리 lookback 윈도우
    pub history_window: Duration,

    /// heartbeat 간격
    pub heartbeat_interval: Duration,

    /// 수신 dequeue 블로킹 타임아웃
    pub read_timeout: Duration,

    /// 파일 스토리지 루트 (destination 측)
    pub storage_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_addr: "127.0.0.1:7000".parse().unwrap(),
            bind_addr: "0.0.0.0:7000".parse().unwrap(),
            send_queue_depth: DEFAULT_SEND_QUEUE_DEPTH,
            recv_queue_depth: DEFAULT_RECV_QUEUE_DEPTH,
            packet_byte_budget: DEFAULT_PACKET_BYTE_BUDGET,
            chunk_size: DEFAULT_CHUNK_SIZE,
            scheduler_policy: SchedulerPolicy::WeightedRoundRobin,
            history_interval: Duration::from_secs(15),
            history_window: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(5),
            read_timeout: Duration::from_millis(500),
            storage_root: PathBuf::from("/var/lib/dtp/storage"),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저대역 다이오드용 설정 (작은 패킷, 긴 간격)
    pub fn low_bandwidth() -> Self {
        Self {
            send_queue_depth: 1,
            recv_queue_depth: 4,
            packet_byte_budget: 256 * 1024,
            chunk_size: 64 * 1024,
            history_interval: Duration::from_secs(60),
            history_window: Duration::from_secs(4 * 3600),
            heartbeat_interval: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// 고처리량 다이오드용 설정
    pub fn high_throughput() -> Self {
        Self {
            send_queue_depth: 4,
            recv_queue_depth: 16,
            packet_byte_budget: 16 * 1024 * 1024,
            chunk_size: 2 * 1024 * 1024,
            history_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(2),
            read_timeout: Duration::from_millis(200),
            ..Self::default()
        }
    }
}
