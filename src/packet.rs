//! 패킷 정의와 와이어 코덱
//!
//! 패킷은 와이어에 실리는 단위: 청크 목록 + 취소 목록 + 선택적 히스토리.
//! 길이 프리픽스, CRC, 버전 바이트 없음 — 메시지 경계는 전적으로
//! 전송 계층(연결 하나 = 패킷 하나, EOF = 끝)이 정한다.
//! 무결성 검증은 프로토콜 계층(크기/다이제스트)에서 수행.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transferable::{History, Revocation, TransferableRange};

/// 와이어 패킷
///
/// 시퀀스 번호도 ACK도 없다. 순서 보장은 단일 TCP 연결 내 바이트 순서와
/// transferable별 offset 연속성에서만 나온다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Packet {
    /// 청크 목록 (순서 유지)
    pub ranges: Vec<TransferableRange>,

    /// 취소 목록 (순서 유지)
    pub revocations: Vec<Revocation>,

    /// 히스토리 스냅샷 (선택적)
    pub history: Option<History>,
}

impl Packet {
    /// 빈 패킷 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// heartbeat 패킷 (빈 목록 + 히스토리 없음)
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// heartbeat 여부
    pub fn is_heartbeat(&self) -> bool {
        self.ranges.is_empty() && self.revocations.is_empty() && self.history.is_none()
    }

    /// 페이로드 바이트 합 (예산 계산용)
    pub fn payload_len(&self) -> usize {
        self.ranges.iter().map(|r| r.wire_size()).sum()
    }

    /// 패킷을 바이트로 인코딩
    ///
    /// 유효한 패킷에 대해 결정적. 실패는 직렬화 불가능한 필드가 섞인
    /// 프로그래머 오류뿐이다.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::Encoding)
    }

    /// 바이트에서 패킷 디코딩
    ///
    /// 잘리거나 변형된 입력은 `Error::Decoding`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(Error::Decoding)
    }
}
