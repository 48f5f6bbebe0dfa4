//! origin 측 outbound 원장
//!
//! 전송 단위 레코드, 사용자별 FIFO 청크 큐, revocation 큐를 관리한다.
//! 전송 상태는 저장하지 않는다 — 집계 카운터에서 읽을 때마다 계산
//! ([`crate::state::outbound_state`]). 카운터 변경과 큐 조작은 하나의
//! 락 아래에서 이뤄져 transferable별 직렬화된 쓰기가 보장된다.
//!
//! CRUD 계층(업로드 API)은 이 원장의 create/enqueue/revoke 표면만 쓰고,
//! 펌프 루프는 pull/history 표면만 쓴다.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::state::{outbound_state, OutboundCounters, OutboundState};
use crate::transferable::{
    HistoryEntry, HistoryOutcome, Revocation, RevocationReason, TransferableId, TransferableMeta,
    TransferableRange, UserId,
};

/// 큐에 들어있는 청크 (enqueue 순서 보존용 seq 포함)
struct QueuedChunk {
    range: TransferableRange,
    seq: u64,
}

/// revocation 전파 상태
struct RevocationState {
    reason: RevocationReason,
    /// 한 번 송신되면 재송신하지 않는다
    transmitted: bool,
}

/// 전송 단위 레코드
struct OutboundRecord {
    meta: TransferableMeta,
    upload_finished: bool,
    pending: u64,
    sent: u64,
    canceled: u64,
    failed: u64,
    revocation: Option<RevocationState>,
    /// 처음 종결 상태로 관측된 시각 (히스토리 윈도우용)
    terminal_at: Option<DateTime<Utc>>,
}

impl OutboundRecord {
    fn counters(&self) -> OutboundCounters {
        OutboundCounters {
            upload_finished: self.upload_finished,
            pending: self.pending,
            sent: self.sent,
            canceled: self.canceled,
            failed: self.failed,
            revocation: self.revocation.as_ref().map(|r| r.reason),
        }
    }

    fn state(&self) -> OutboundState {
        outbound_state(&self.counters())
    }

    /// 종결 진입 시각 기록 (이미 기록돼 있으면 유지)
    fn touch_terminal(&mut self) {
        if self.terminal_at.is_none() && self.state().is_terminal() {
            self.terminal_at = Some(Utc::now());
        }
    }

    fn blocked(&self) -> bool {
        self.failed > 0 || self.revocation.is_some()
    }
}

struct Inner {
    records: HashMap<TransferableId, OutboundRecord>,
    queues: HashMap<UserId, VecDeque<QueuedChunk>>,
    next_seq: u64,
}

/// outbound 원장
pub struct OutboundLedger {
    inner: Mutex<Inner>,
}

impl Default for OutboundLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundLedger {
    /// 빈 원장 생성
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                queues: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// 청크를 소유 사용자의 FIFO 큐에 추가
    ///
    /// 레코드는 청크에 실린 메타데이터로 upsert된다. 마지막 청크는
    /// 업로드 완료를 뜻하고, 크기/다이제스트가 채워진 메타로 갱신한다.
    pub fn enqueue_range(&self, range: TransferableRange) {
        let mut inner = self.inner.lock();

        let record = inner
            .records
            .entry(range.meta.id)
            .or_insert_with(|| OutboundRecord {
                meta: range.meta.clone(),
                upload_finished: false,
                pending: 0,
                sent: 0,
                canceled: 0,
                failed: 0,
                revocation: None,
                terminal_at: None,
            });

        record.pending += 1;
        if range.is_last {
            record.upload_finished = true;
            record.meta = range.meta.clone();
        }

        let user_id = range.meta.user_id;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .queues
            .entry(user_id)
            .or_default()
            .push_back(QueuedChunk { range, seq });
    }

    /// 전송 취소 등록
    ///
    /// 이후 스케줄링이 중단되고, revocation은 다음 패킷에 실린다.
    /// 이미 종결됐거나 이미 취소된 전송은 false.
    pub fn revoke(&self, id: TransferableId, reason: RevocationReason) -> bool {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get_mut(&id) else {
            warn!("미등록 transferable 취소 요청: {id}");
            return false;
        };

        if record.revocation.is_some() || record.state().is_terminal() {
            debug!("이미 종결/취소된 transferable 취소 무시: {id}");
            return false;
        }

        record.revocation = Some(RevocationState {
            reason,
            transmitted: false,
        });
        record.touch_terminal();
        true
    }

    /// 청크 실패 기록 (업로드 계층 훅)
    ///
    /// 형제 청크 하나라도 실패하면 전송 전체가 ERROR가 되고 잔여 청크는
    /// 송신 없이 폐기된다.
    pub fn mark_chunk_failed(&self, id: TransferableId) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(&id) {
            record.failed += 1;
            record.touch_terminal();
        }
    }

    /// 대기 청크가 있는 사용자 집합 (사이클마다 새로 계산)
    pub fn pending_users(&self) -> BTreeSet<UserId> {
        let inner = self.inner.lock();
        inner
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(user, _)| *user)
            .collect()
    }

    /// 한 사용자의 대기 청크를 오래된 순으로 예산만큼 꺼낸다
    ///
    /// 실패/취소된 전송의 청크는 송신하지 않고 제자리에서 canceled 처리
    /// 한다 — 와이어 예산을 쓰지 않고 빠진다. 반환값은 (송신할 청크들,
    /// 소진한 바이트).
    pub fn pull_user_chunks(
        &self,
        user: UserId,
        byte_budget: usize,
    ) -> (Vec<TransferableRange>, usize) {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        let mut taken = 0usize;

        loop {
            let Some(queue) = inner.queues.get_mut(&user) else {
                break;
            };
            if taken >= byte_budget {
                break;
            }
            let Some(chunk) = queue.pop_front() else {
                break;
            };

            let id = chunk.range.meta.id;
            let Some(record) = inner.records.get_mut(&id) else {
                continue;
            };

            if record.blocked() {
                // 폐기: 바이트는 버려지고 예산도 쓰지 않는다
                record.pending = record.pending.saturating_sub(1);
                record.canceled += 1;
                record.touch_terminal();
                debug!("차단된 전송의 청크 폐기: {id}, offset={}", chunk.range.offset);
                continue;
            }

            record.pending = record.pending.saturating_sub(1);
            record.sent += 1;
            record.touch_terminal();

            taken += chunk.range.wire_size();
            out.push(chunk.range);
        }

        (out, taken)
    }

    /// FIFO 정책: 사용자 구분 없이 전역 oldest-first로 꺼낸다
    pub fn pull_fifo_chunks(&self, byte_budget: usize) -> (Vec<TransferableRange>, usize) {
        let mut out = Vec::new();
        let mut taken = 0usize;

        loop {
            if taken >= byte_budget {
                break;
            }

            let mut inner = self.inner.lock();
            // 각 큐의 head 중 가장 오래된 seq
            let oldest_user = inner
                .queues
                .iter()
                .filter_map(|(user, q)| q.front().map(|c| (*user, c.seq)))
                .min_by_key(|(_, seq)| *seq)
                .map(|(user, _)| user);
            drop(inner);

            let Some(user) = oldest_user else { break };

            // 해당 사용자에게서 청크 하나만 꺼낸다
            let (mut ranges, bytes) = self.pull_one(user);
            if ranges.is_empty() && bytes == 0 {
                continue; // 폐기된 청크였음, 다음 head 재평가
            }
            taken += bytes;
            out.append(&mut ranges);
        }

        (out, taken)
    }

    fn pull_one(&self, user: UserId) -> (Vec<TransferableRange>, usize) {
        let mut inner = self.inner.lock();

        let Some(queue) = inner.queues.get_mut(&user) else {
            return (Vec::new(), 0);
        };
        let Some(chunk) = queue.pop_front() else {
            return (Vec::new(), 0);
        };

        let id = chunk.range.meta.id;
        let Some(record) = inner.records.get_mut(&id) else {
            return (Vec::new(), 0);
        };

        if record.blocked() {
            record.pending = record.pending.saturating_sub(1);
            record.canceled += 1;
            record.touch_terminal();
            return (Vec::new(), 0);
        }

        record.pending = record.pending.saturating_sub(1);
        record.sent += 1;
        record.touch_terminal();

        let bytes = chunk.range.wire_size();
        (vec![chunk.range], bytes)
    }

    /// 미송신 revocation들을 꺼내고 송신됨으로 표시
    pub fn take_revocations(&self) -> Vec<Revocation> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();

        for (id, record) in inner.records.iter_mut() {
            if let Some(rev) = record.revocation.as_mut() {
                if !rev.transmitted {
                    rev.transmitted = true;
                    out.push(Revocation {
                        transferable_id: *id,
                        user_id: record.meta.user_id,
                        reason: rev.reason,
                    });
                }
            }
        }

        out
    }

    /// 파생 전송 상태 조회
    pub fn state(&self, id: TransferableId) -> Option<OutboundState> {
        self.inner.lock().records.get(&id).map(|r| r.state())
    }

    /// lookback 윈도우 내에 종결된 전송들의 히스토리 항목
    pub fn history_entries(&self, window: std::time::Duration) -> Vec<HistoryEntry> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1));
        let inner = self.inner.lock();

        let mut entries: Vec<(DateTime<Utc>, HistoryEntry)> = inner
            .records
            .iter()
            .filter_map(|(id, record)| {
                let terminal_at = record.terminal_at?;
                if terminal_at < cutoff {
                    return None;
                }
                let outcome = match record.state() {
                    OutboundState::Success => HistoryOutcome::Success,
                    OutboundState::Error => HistoryOutcome::Error,
                    OutboundState::Canceled => HistoryOutcome::Canceled,
                    _ => return None,
                };
                Some((
                    terminal_at,
                    HistoryEntry {
                        transferable_id: *id,
                        user_id: record.meta.user_id,
                        outcome,
                        name: record.meta.name.clone(),
                        digest: record.meta.digest.clone(),
                    },
                ))
            })
            .collect();

        entries.sort_by_key(|(at, _)| *at);
        entries.into_iter().map(|(_, e)| e).collect()
    }

    /// 상태별 전송 수 집계 (관리 계층 읽기 전용 훅)
    pub fn state_tally(&self) -> HashMap<OutboundState, u64> {
        let inner = self.inner.lock();
        let mut tally = HashMap::new();
        for record in inner.records.values() {
            *tally.entry(record.state()).or_insert(0) += 1;
        }
        tally
    }
}
