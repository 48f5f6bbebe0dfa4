//! 전송 단위(transferable)와 관련 메시지 정의
//!
//! - TransferableMeta: 파일 메타데이터 (모든 청크에 중복 탑재)
//! - TransferableRange: 연속 offset 청크 (퍼즐이 아닌 단일 패스 조립)
//! - Revocation: 진행 중 전송 취소
//! - HistoryEntry: origin 측 종결 상태 스냅샷 항목

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 전송 단위 ID (양측이 공유하는 UUID)
pub type TransferableId = Uuid;

/// 소유 사용자 ID
///
/// 다이오드 건너편에서는 불투명한 값. 로컬 DB 키를 절대 노출하지 않는다.
pub type UserId = Uuid;

/// 전송 단위 메타데이터
///
/// 생성 후 불변. 크기와 다이제스트는 마지막 청크에서만 채워진다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableMeta {
    /// 전송 단위 ID
    pub id: TransferableId,

    /// 소유 사용자 ID
    pub user_id: UserId,

    /// 표시 이름
    pub name: String,

    /// 자유형 사용자 메타데이터
    pub user_metadata: BTreeMap<String, String>,

    /// 전체 크기 (마지막 청크에서만 Some)
    pub size: Option<u64>,

    /// 콘텐츠 다이제스트 (마지막 청크에서만 Some, raw bytes)
    pub digest: Option<Bytes>,
}

impl TransferableMeta {
    /// 업로드 시작 시점의 메타데이터 생성 (크기/다이제스트 미정)
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            user_metadata: BTreeMap::new(),
            size: None,
            digest: None,
        }
    }

    /// 마지막 청크용: 크기와 다이제스트를 채운 사본
    pub fn finalized(&self, size: u64, digest: Bytes) -> Self {
        Self {
            size: Some(size),
            digest: Some(digest),
            ..self.clone()
        }
    }
}

/// 청크 (연속 offset 범위)
///
/// 한 transferable의 청크는 offset 오름차순, 간극 없이, 겹침 없이
/// 생산/소비된다. 재정렬이나 갭 채우기는 프로토콜에 없다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableRange {
    /// 메타데이터 (모든 청크에 중복 탑재)
    pub meta: TransferableMeta,

    /// 바이트 offset
    pub offset: u64,

    /// 페이로드 (raw bytes, hex/base64 금지)
    pub data: Bytes,

    /// 마지막 청크 여부
    pub is_last: bool,
}

impl TransferableRange {
    /// 와이어에 실리는 대략적 크기 (스케줄러 예산용)
    pub fn wire_size(&self) -> usize {
        self.data.len()
    }
}

/// 취소 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    /// 사용자 취소
    UserCanceled,

    /// 크기 불일치
    SizeMismatch,

    /// 예기치 못한 실패
    UnexpectedFailure,

    /// 스토리지 고갈
    StorageFull,

    /// 업로드 중단
    UploadInterrupted,
}

impl RevocationReason {
    /// 사용자 주도 취소 여부 (CANCELED vs ERROR 분기)
    pub fn is_user_initiated(&self) -> bool {
        matches!(self, RevocationReason::UserCanceled)
    }
}

/// 취소 메시지
///
/// transferable당 유효한 revocation은 최대 하나.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// 전송 단위 ID
    pub transferable_id: TransferableId,

    /// 소유 사용자 ID
    pub user_id: UserId,

    /// 취소 사유
    pub reason: RevocationReason,
}

/// 히스토리 항목의 종결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryOutcome {
    /// 전 청크 송신 완료
    Success,

    /// 청크 실패 또는 비사용자 취소
    Error,

    /// 사용자 취소
    Canceled,
}

/// 히스토리 항목
///
/// 최근 윈도우 내에 origin 측에서 종결 상태에 도달한 transferable만 생성.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 전송 단위 ID
    pub transferable_id: TransferableId,

    /// 소유 사용자 ID
    pub user_id: UserId,

    /// 종결 상태
    pub outcome: HistoryOutcome,

    /// 표시 이름
    pub name: String,

    /// 콘텐츠 다이제스트 (미완 업로드는 None)
    pub digest: Option<Bytes>,
}

/// 히스토리 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// 윈도우 내 종결 항목들
    pub entries: Vec<HistoryEntry>,
}
