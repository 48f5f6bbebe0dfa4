//! 전송 상태 머신
//!
//! - outbound (origin): 저장하지 않고 집계 카운터에서 읽을 때 계산하는
//!   파생 상태. "상태는 항상 현재 카운터를 반영한다"가 공짜로 성립한다.
//! - inbound (destination): 명시적으로 저장되는 상태. 종결 후에는 절대
//!   ONGOING으로 되돌아가지 않는다.

use serde::{Deserialize, Serialize};

use crate::transferable::RevocationReason;

/// outbound 상태 계산에 쓰이는 집계 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundCounters {
    /// 원본 업로드 완료 여부
    pub upload_finished: bool,

    /// 대기 청크 수
    pub pending: u64,

    /// 송신 청크 수
    pub sent: u64,

    /// 폐기 청크 수
    pub canceled: u64,

    /// 실패 청크 수
    pub failed: u64,

    /// 유효한 revocation 사유 (있다면)
    pub revocation: Option<RevocationReason>,
}

/// origin 측 파생 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboundState {
    /// 업로드 미완 또는 아직 아무것도 송신 안 됨
    Pending,

    /// 일부 청크 송신됨
    Ongoing,

    /// 업로드 완료 + 전 청크 송신 완료
    Success,

    /// 청크 실패 또는 비사용자 revocation
    Error,

    /// 사용자 revocation
    Canceled,
}

impl OutboundState {
    /// 종결 상태 여부
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboundState::Success | OutboundState::Error | OutboundState::Canceled
        )
    }
}

/// 카운터에서 outbound 상태를 계산하는 순수 함수
pub fn outbound_state(c: &OutboundCounters) -> OutboundState {
    if let Some(reason) = c.revocation {
        return if reason.is_user_initiated() {
            OutboundState::Canceled
        } else {
            OutboundState::Error
        };
    }

    if c.failed > 0 {
        return OutboundState::Error;
    }

    if c.upload_finished && c.pending == 0 && c.canceled == 0 && c.sent > 0 {
        return OutboundState::Success;
    }

    if c.sent > 0 {
        return OutboundState::Ongoing;
    }

    OutboundState::Pending
}

/// destination 측 저장 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InboundState {
    /// 수신 진행 중
    Ongoing,

    /// 수신/검증 완료
    Success,

    /// 갭, 크기/다이제스트 불일치, 유실, 스토리지 실패
    Error,

    /// revocation 수신
    Revoked,

    /// 보존 기간 만료 (외부 협력자가 설정)
    Expired,

    /// 제거됨 (외부 협력자가 설정)
    Removed,
}

impl InboundState {
    /// ONGOING 외 상태는 전부 종결
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InboundState::Ongoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> OutboundCounters {
        OutboundCounters::default()
    }

    #[test]
    fn pending_before_any_send() {
        let c = OutboundCounters {
            pending: 3,
            ..counters()
        };
        assert_eq!(outbound_state(&c), OutboundState::Pending);
        assert_eq!(outbound_state(&counters()), OutboundState::Pending);
    }

    #[test]
    fn ongoing_when_partially_sent() {
        let c = OutboundCounters {
            upload_finished: true,
            pending: 2,
            sent: 1,
            ..counters()
        };
        assert_eq!(outbound_state(&c), OutboundState::Ongoing);
    }

    #[test]
    fn success_requires_finished_upload_and_all_sent() {
        let done = OutboundCounters {
            upload_finished: true,
            sent: 4,
            ..counters()
        };
        assert_eq!(outbound_state(&done), OutboundState::Success);

        // 업로드 미완이면 전 청크 송신돼도 SUCCESS가 아니다
        let unfinished = OutboundCounters {
            sent: 4,
            ..counters()
        };
        assert_eq!(outbound_state(&unfinished), OutboundState::Ongoing);
    }

    #[test]
    fn any_failed_chunk_is_error() {
        let c = OutboundCounters {
            upload_finished: true,
            sent: 3,
            failed: 1,
            ..counters()
        };
        assert_eq!(outbound_state(&c), OutboundState::Error);
    }

    #[test]
    fn revocation_overrides_counters() {
        let user = OutboundCounters {
            sent: 2,
            pending: 2,
            revocation: Some(RevocationReason::UserCanceled),
            ..counters()
        };
        assert_eq!(outbound_state(&user), OutboundState::Canceled);

        let storage = OutboundCounters {
            revocation: Some(RevocationReason::StorageFull),
            ..user
        };
        assert_eq!(outbound_state(&storage), OutboundState::Error);
    }

    #[test]
    fn terminal_classification() {
        assert!(!OutboundState::Pending.is_terminal());
        assert!(!OutboundState::Ongoing.is_terminal());
        assert!(OutboundState::Success.is_terminal());
        assert!(OutboundState::Error.is_terminal());
        assert!(OutboundState::Canceled.is_terminal());

        assert!(!InboundState::Ongoing.is_terminal());
        assert!(InboundState::Success.is_terminal());
        assert!(InboundState::Revoked.is_terminal());
        assert!(InboundState::Expired.is_terminal());
    }
}
