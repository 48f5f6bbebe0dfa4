//! 히스토리 브로드캐스트 (origin 측)
//!
//! 다이오드에는 회신 채널이 없으므로, origin은 최근 윈도우 내에 종결된
//! 전송들의 스냅샷을 주기적으로 내보낸다. destination은 이 스냅샷과
//! 로컬 레코드를 대조해 유실을 감지한다 — ACK의 대체물이다.
//! 설정된 간격보다 자주 보내지는 않는다.

use std::time::{Duration, Instant};

use crate::ledger::OutboundLedger;
use crate::transferable::History;

/// 브로드캐스트 간격 게이트 + 스냅샷 빌더
pub struct HistoryBroadcaster {
    interval: Duration,
    window: Duration,
    last_broadcast: Option<Instant>,
}

impl HistoryBroadcaster {
    /// 간격과 lookback 윈도우로 생성
    pub fn new(interval: Duration, window: Duration) -> Self {
        Self {
            interval,
            window,
            last_broadcast: None,
        }
    }

    /// 브로드캐스트 시점이면 스냅샷을 만들어 반환
    ///
    /// 간격이 아직 안 찼으면 None. 윈도우 내 종결 항목이 하나도 없어도
    /// 빈 스냅샷을 내보낸다 — destination이 "요즘 종결된 건 없다"는
    /// 사실 자체를 알 수 있도록.
    pub fn snapshot_if_due(&mut self, ledger: &OutboundLedger) -> Option<History> {
        if let Some(last) = self.last_broadcast {
            if last.elapsed() < self.interval {
                return None;
            }
        }

        self.last_broadcast = Some(Instant::now());
        Some(History {
            entries: ledger.history_entries(self.window),
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::transferable::{TransferableMeta, TransferableRange};

    fn ledger_with_one_success() -> OutboundLedger {
        let ledger = OutboundLedger::new();
        let meta = TransferableMeta::new(Uuid::new_v4(), "done.bin")
            .finalized(3, Bytes::from_static(b"\x01"));
        let user = meta.user_id;
        ledger.enqueue_range(TransferableRange {
            meta,
            offset: 0,
            data: Bytes::from_static(b"abc"),
            is_last: true,
        });
        ledger.pull_user_chunks(user, usize::MAX);
        ledger
    }

    #[test]
    fn first_call_broadcasts_immediately() {
        let ledger = ledger_with_one_success();
        let mut broadcaster =
            HistoryBroadcaster::new(Duration::from_secs(3600), Duration::from_secs(3600));

        let history = broadcaster.snapshot_if_due(&ledger).unwrap();
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.entries[0].name, "done.bin");
    }

    #[test]
    fn respects_minimum_interval() {
        let ledger = ledger_with_one_success();
        let mut broadcaster =
            HistoryBroadcaster::new(Duration::from_secs(3600), Duration::from_secs(3600));

        assert!(broadcaster.snapshot_if_due(&ledger).is_some());
        // 간격 내 재호출은 전부 거른다
        assert!(broadcaster.snapshot_if_due(&ledger).is_none());
        assert!(broadcaster.snapshot_if_due(&ledger).is_none());
    }

    #[test]
    fn zero_interval_broadcasts_every_time() {
        let ledger = ledger_with_one_success();
        let mut broadcaster =
            HistoryBroadcaster::new(Duration::ZERO, Duration::from_secs(3600));

        assert!(broadcaster.snapshot_if_due(&ledger).is_some());
        assert!(broadcaster.snapshot_if_due(&ledger).is_some());
    }

    #[test]
    fn empty_ledger_yields_empty_snapshot() {
        let ledger = OutboundLedger::new();
        let mut broadcaster =
            HistoryBroadcaster::new(Duration::ZERO, Duration::from_secs(3600));

        let history = broadcaster.snapshot_if_due(&ledger).unwrap();
        assert!(history.entries.is_empty());
    }
}
