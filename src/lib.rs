//! # DTP (Diode Transfer Protocol)
//!
//! 하드웨어 네트워크 다이오드를 통한 단방향 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **단방향 전송**: 회신 채널 없음, ACK 없음 (TCP 연결 하나 = 패킷 하나)
//! - **히스토리 조정**: 주기적 브로드캐스트로 유실 감지 (ACK 대체)
//! - **공정 스케줄링**: 사용자별 가중치 기반 weighted round-robin
//! - **재개 가능 해시**: 프로세스 재시작 후에도 이어서 검증
//! - **청크 연속성**: offset 연속 검증, 갭 발생 시 해당 전송만 실패
//! - **취소 전파**: 진행 중인 전송의 revocation을 패킷에 실어 전달

pub mod config;
pub mod destination;
pub mod digest;
pub mod error;
pub mod history;
pub mod ledger;
pub mod origin;
pub mod packet;
pub mod reassembler;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod storage;
pub mod transferable;
pub mod transport;

pub use config::{Config, SchedulerPolicy};
pub use destination::Destination;
pub use digest::ResumableDigest;
pub use error::{Error, Result};
pub use ledger::OutboundLedger;
pub use origin::Origin;
pub use packet::Packet;
pub use reassembler::Reassembler;
pub use scheduler::FairShareScheduler;
pub use state::{InboundState, OutboundState};
pub use storage::{ChunkStorage, FileStorage, MemoryStorage};
pub use transferable::{
    HistoryEntry, Revocation, RevocationReason, TransferableId, TransferableMeta,
    TransferableRange, UserId,
};
pub use transport::{PacketReceiver, PacketSender};

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// 패킷당 기본 바이트 예산
pub const DEFAULT_PACKET_BYTE_BUDGET: usize = 2 * 1024 * 1024;

/// 송신 큐 기본 깊이 (1~4 권장)
pub const DEFAULT_SEND_QUEUE_DEPTH: usize = 2;

/// 수신 큐 기본 깊이
pub const DEFAULT_RECV_QUEUE_DEPTH: usize = 8;
