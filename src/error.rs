//! 에러 타입 정의

use thiserror::Error;

use crate::transferable::TransferableId;

/// DTP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("인코딩 에러: {0}")]
    Encoding(bincode::Error),

    #[error("디코딩 에러: {0}")]
    Decoding(bincode::Error),

    #[error("청크 누락: transferable={transferable_id}, expected_offset={expected}, got={got}")]
    MissedChunk {
        transferable_id: TransferableId,
        expected: u64,
        got: u64,
    },

    #[error("크기 불일치: transferable={transferable_id}, declared={declared}, received={received}")]
    SizeMismatch {
        transferable_id: TransferableId,
        declared: u64,
        received: u64,
    },

    #[error("다이제스트 불일치: transferable={transferable_id}")]
    DigestMismatch { transferable_id: TransferableId },

    #[error("마지막 청크 크기/다이제스트 누락: transferable={transferable_id}")]
    IncompleteFinalChunk { transferable_id: TransferableId },

    #[error("다이제스트 상태 복원 실패")]
    DigestRestore,

    #[error("스토리지 에러: transferable={transferable_id}: {message}")]
    Storage {
        transferable_id: TransferableId,
        message: String,
    },

    #[error("송신 큐 종료됨")]
    QueueClosed,

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
