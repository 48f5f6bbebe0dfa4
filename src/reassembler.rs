//! destination 측 재조립/검증 엔진
//!
//! 청크를 연속된 바이트 스트림으로 쌓고 무결성을 검증한다. 다이오드에는
//! 재전송이 없으므로 offset 갭은 치유 불가능한 실패다. 히스토리 조정과
//! revocation 수신도 같은 레코드 맵 위에서 처리한다.
//!
//! 청크 하나에 대한 모든 변경(바이트 추가 + 카운터 + 상태 전이)은
//! transferable별 엔트리 가드 아래에서 한 단위로 이뤄진다. 가드가
//! 직렬화된 단일 쓰기자 역할이라 저장 바이트, 수신 누계, 상태가 서로
//! 어긋난 채 관측될 수 없다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::digest::ResumableDigest;
use crate::error::{Error, Result};
use crate::state::InboundState;
use crate::storage::ChunkStorage;
use crate::transferable::{
    History, HistoryEntry, Revocation, TransferableId, TransferableMeta, TransferableRange,
};

/// destination 측 전송 레코드
///
/// 직렬화된 다이제스트 누산기를 함께 저장해 프로세스 재시작 후에도
/// 이미 처리한 바이트를 다시 읽지 않고 이어간다.
struct InboundRecord {
    meta: TransferableMeta,
    state: InboundState,
    bytes_received: u64,
    digest_state: Vec<u8>,
    finished_at: Option<DateTime<Utc>>,
}

impl InboundRecord {
    fn ongoing(meta: TransferableMeta) -> Self {
        Self {
            meta,
            state: InboundState::Ongoing,
            bytes_received: 0,
            digest_state: ResumableDigest::new().serialize(),
            finished_at: None,
        }
    }

    fn terminal(meta: TransferableMeta, state: InboundState) -> Self {
        Self {
            meta,
            state,
            bytes_received: 0,
            digest_state: Vec::new(),
            finished_at: Some(Utc::now()),
        }
    }

    fn finish(&mut self, state: InboundState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

/// 재조립 엔진
pub struct Reassembler {
    records: DashMap<TransferableId, InboundRecord>,
    storage: Arc<dyn ChunkStorage>,
}

impl Reassembler {
    /// 스토리지 백엔드 위에 엔진 생성
    pub fn new(storage: Arc<dyn ChunkStorage>) -> Self {
        Self {
            records: DashMap::new(),
            storage,
        }
    }

    /// 청크 하나 수용
    ///
    /// 종결된 전송의 청크는 무시(멱등 no-op). 프로토콜 위반은 해당
    /// 전송만 ERROR로 전이시키고 타입 에러로 보고한다 — 다른 전송에는
    /// 영향 없음.
    pub fn ingest_range(&self, range: TransferableRange) -> Result<InboundState> {
        let id = range.meta.id;
        let mut record = self
            .records
            .entry(id)
            .or_insert_with(|| InboundRecord::ongoing(range.meta.clone()));

        if record.state.is_terminal() {
            debug!("종결된 전송의 청크 무시: {id}, state={:?}", record.state);
            return Ok(record.state);
        }

        // 연속성 검증: offset은 정확히 수신 누계와 같아야 한다
        if range.offset != record.bytes_received {
            let err = Error::MissedChunk {
                transferable_id: id,
                expected: record.bytes_received,
                got: range.offset,
            };
            self.fail_record(&mut record, id);
            return Err(err);
        }

        let mut digest = match ResumableDigest::restore(&record.digest_state) {
            Ok(d) => d,
            Err(e) => {
                self.fail_record(&mut record, id);
                return Err(e);
            }
        };

        // 바이트 추가 + 카운터 + 다이제스트가 한 단위
        if let Err(e) = self.storage.write(id, range.offset, &range.data) {
            self.fail_record(&mut record, id);
            return Err(e);
        }
        digest.update(&range.data);
        record.bytes_received += range.data.len() as u64;
        record.digest_state = digest.serialize();

        if !range.is_last {
            return Ok(InboundState::Ongoing);
        }

        // 마지막 청크: 선언된 크기와 다이제스트 검증
        let (declared_size, declared_digest) = match (&range.meta.size, &range.meta.digest) {
            (Some(size), Some(digest)) => (*size, digest.clone()),
            _ => {
                let err = Error::IncompleteFinalChunk {
                    transferable_id: id,
                };
                self.fail_record(&mut record, id);
                return Err(err);
            }
        };

        if record.bytes_received != declared_size {
            let err = Error::SizeMismatch {
                transferable_id: id,
                declared: declared_size,
                received: record.bytes_received,
            };
            self.fail_record(&mut record, id);
            return Err(err);
        }

        if digest.digest() != declared_digest.as_ref() {
            let err = Error::DigestMismatch {
                transferable_id: id,
            };
            self.fail_record(&mut record, id);
            return Err(err);
        }

        record.meta = range.meta.clone();
        record.finish(InboundState::Success);
        info!(
            "전송 완료: {id}, name={}, bytes={}",
            record.meta.name, record.bytes_received
        );
        Ok(InboundState::Success)
    }

    /// revocation 수용
    ///
    /// ONGOING이면 REVOKED로 전이하고 부분 저장분 폐기. 로컬에 없으면
    /// REVOKED 레코드를 직접 생성한다 (청크보다 먼저 도착한 경우).
    /// 다른 종결 상태면 로그만 남기는 no-op — 에러가 아니다.
    pub fn ingest_revocation(&self, revocation: &Revocation) {
        let id = revocation.transferable_id;

        let mut record = self.records.entry(id).or_insert_with(|| {
            debug!("미지의 transferable revocation: {id}, 레코드 직접 생성");
            let mut meta = TransferableMeta::new(revocation.user_id, String::new());
            meta.id = id;
            InboundRecord::terminal(meta, InboundState::Revoked)
        });

        match record.state {
            InboundState::Revoked if record.bytes_received == 0 => {
                // 방금 생성한 레코드 또는 이미 취소됨
            }
            InboundState::Ongoing => {
                info!(
                    "전송 취소됨: {id}, reason={:?}, 부분 저장분 폐기",
                    revocation.reason
                );
                record.finish(InboundState::Revoked);
                if let Err(e) = self.storage.delete(id) {
                    warn!("취소된 전송 저장분 삭제 실패: {id}: {e}");
                }
            }
            state => {
                debug!("종결된 전송의 revocation 무시: {id}, state={state:?}");
            }
        }
    }

    /// 히스토리 스냅샷과 로컬 레코드 조정
    ///
    /// 유실 감지의 유일한 메커니즘. 스냅샷의 각 항목을
    /// (a) 로컬 ONGOING → 유실 확정, ERROR + 저장분 폐기
    /// (b) 로컬 종결 → no-op
    /// (c) 로컬에 없음 → 아예 도착 못한 전송, ERROR 레코드 생성
    /// 으로 분기한다.
    pub fn reconcile_history(&self, history: &History) {
        for entry in &history.entries {
            self.reconcile_entry(entry);
        }
    }

    fn reconcile_entry(&self, entry: &HistoryEntry) {
        let id = entry.transferable_id;

        if let Some(mut record) = self.records.get_mut(&id) {
            if record.state.is_terminal() {
                return;
            }
            // origin은 끝났다는데 종결 청크가 안 왔다 — 와이어 유실
            warn!(
                "히스토리 조정: 유실 감지 {id}, name={}, 수신 {} bytes에서 중단",
                entry.name, record.bytes_received
            );
            self.fail_record(&mut record, id);
            return;
        }

        // 한 청크도 도착 못한 전송
        warn!("히스토리 조정: 미도착 전송 {id}, name={}", entry.name);
        let mut meta = TransferableMeta::new(entry.user_id, entry.name.clone());
        meta.id = id;
        meta.digest = entry.digest.clone();
        self.records
            .insert(id, InboundRecord::terminal(meta, InboundState::Error));
    }

    /// 보존 협력자 훅: SUCCESS/ERROR/REVOKED → EXPIRED/REMOVED
    pub fn retire(&self, id: TransferableId, state: InboundState) -> bool {
        if !matches!(state, InboundState::Expired | InboundState::Removed) {
            return false;
        }
        let Some(mut record) = self.records.get_mut(&id) else {
            return false;
        };
        if !record.state.is_terminal() {
            return false;
        }
        record.state = state;
        true
    }

    /// 저장 상태 조회
    pub fn state(&self, id: TransferableId) -> Option<InboundState> {
        self.records.get(&id).map(|r| r.state)
    }

    /// 수신 바이트 누계
    pub fn bytes_received(&self, id: TransferableId) -> Option<u64> {
        self.records.get(&id).map(|r| r.bytes_received)
    }

    /// 상태별 전송 수 집계 (관리 계층 읽기 전용 훅)
    pub fn state_tally(&self) -> std::collections::HashMap<InboundState, u64> {
        let mut tally = std::collections::HashMap::new();
        for record in self.records.iter() {
            *tally.entry(record.state).or_insert(0) += 1;
        }
        tally
    }

    fn fail_record(
        &self,
        record: &mut dashmap::mapref::one::RefMut<'_, TransferableId, InboundRecord>,
        id: TransferableId,
    ) {
        record.finish(InboundState::Error);
        if let Err(e) = self.storage.delete(id) {
            warn!("실패한 전송 저장분 삭제 실패: {id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::transferable::RevocationReason;

    fn engine() -> (Reassembler, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (Reassembler::new(storage.clone()), storage)
    }

    /// 올바른 다이제스트가 실린 청크 목록 생성
    fn make_ranges(data: &[u8], split: usize) -> Vec<TransferableRange> {
        let meta = TransferableMeta::new(Uuid::new_v4(), "file.bin");
        let mut digest = ResumableDigest::new();
        digest.update(data);
        let final_meta = meta.finalized(data.len() as u64, Bytes::from(digest.digest()));

        let chunks: Vec<&[u8]> = data.chunks(split).collect();
        let count = chunks.len();
        let mut offset = 0u64;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let is_last = i == count - 1;
                let range = TransferableRange {
                    meta: if is_last { final_meta.clone() } else { meta.clone() },
                    offset,
                    data: Bytes::copy_from_slice(chunk),
                    is_last,
                };
                offset += chunk.len() as u64;
                range
            })
            .collect()
    }

    #[test]
    fn two_chunk_upload_ends_in_success() {
        let (engine, storage) = engine();
        let ranges = make_ranges(b"0123456789", 5);
        let id = ranges[0].meta.id;

        assert_eq!(
            engine.ingest_range(ranges[0].clone()).unwrap(),
            InboundState::Ongoing
        );
        assert_eq!(
            engine.ingest_range(ranges[1].clone()).unwrap(),
            InboundState::Success
        );

        assert_eq!(engine.bytes_received(id), Some(10));
        assert_eq!(storage.read_all(id).unwrap(), b"0123456789");
    }

    #[test]
    fn offset_gap_is_fatal_for_that_transferable() {
        let (engine, storage) = engine();
        let ranges = make_ranges(b"0123456789", 5);
        let id = ranges[0].meta.id;

        engine.ingest_range(ranges[0].clone()).unwrap();

        // offset 7: 5가 와야 할 자리 — 갭은 치유 불가
        let mut gapped = ranges[1].clone();
        gapped.offset = 7;
        assert!(matches!(
            engine.ingest_range(gapped),
            Err(Error::MissedChunk { expected: 5, got: 7, .. })
        ));
        assert_eq!(engine.state(id), Some(InboundState::Error));
        assert!(storage.read_all(id).is_err());

        // 이후 청크는 전부 무시
        let state = engine.ingest_range(ranges[1].clone()).unwrap();
        assert_eq!(state, InboundState::Error);
    }

    #[test]
    fn size_mismatch_is_fatal() {
        let (engine, _) = engine();
        let mut ranges = make_ranges(b"0123456789", 10);
        ranges[0].meta.size = Some(99);
        let id = ranges[0].meta.id;

        assert!(matches!(
            engine.ingest_range(ranges.remove(0)),
            Err(Error::SizeMismatch { declared: 99, received: 10, .. })
        ));
        assert_eq!(engine.state(id), Some(InboundState::Error));
    }

    #[test]
    fn digest_mismatch_is_fatal() {
        let (engine, storage) = engine();
        let mut ranges = make_ranges(b"0123456789", 10);
        ranges[0].meta.digest = Some(Bytes::from_static(b"not-a-digest"));
        let id = ranges[0].meta.id;

        assert!(matches!(
            engine.ingest_range(ranges.remove(0)),
            Err(Error::DigestMismatch { .. })
        ));
        assert_eq!(engine.state(id), Some(InboundState::Error));
        assert!(storage.read_all(id).is_err());
    }

    #[test]
    fn final_chunk_without_declared_fields_is_fatal() {
        let (engine, _) = engine();
        let mut ranges = make_ranges(b"0123456789", 10);
        ranges[0].meta.size = None;

        assert!(matches!(
            engine.ingest_range(ranges.remove(0)),
            Err(Error::IncompleteFinalChunk { .. })
        ));
    }

    #[test]
    fn terminal_state_is_monotonic() {
        let (engine, _) = engine();
        let ranges = make_ranges(b"0123456789", 5);
        let id = ranges[0].meta.id;

        for range in &ranges {
            engine.ingest_range(range.clone()).unwrap();
        }
        assert_eq!(engine.state(id), Some(InboundState::Success));

        // 완료 후 도착하는 청크도 revocation도 상태를 못 바꾼다
        engine.ingest_range(ranges[0].clone()).unwrap();
        engine.ingest_revocation(&Revocation {
            transferable_id: id,
            user_id: ranges[0].meta.user_id,
            reason: RevocationReason::UserCanceled,
        });
        assert_eq!(engine.state(id), Some(InboundState::Success));
    }

    #[test]
    fn revocation_before_any_chunk_creates_revoked_record() {
        let (engine, storage) = engine();
        let id = Uuid::new_v4();

        engine.ingest_revocation(&Revocation {
            transferable_id: id,
            user_id: Uuid::new_v4(),
            reason: RevocationReason::UserCanceled,
        });

        assert_eq!(engine.state(id), Some(InboundState::Revoked));
        assert!(storage.is_empty());
    }

    #[test]
    fn revocation_mid_transfer_discards_partial_bytes() {
        let (engine, storage) = engine();
        let ranges = make_ranges(b"0123456789", 5);
        let id = ranges[0].meta.id;

        engine.ingest_range(ranges[0].clone()).unwrap();
        assert!(!storage.is_empty());

        engine.ingest_revocation(&Revocation {
            transferable_id: id,
            user_id: ranges[0].meta.user_id,
            reason: RevocationReason::StorageFull,
        });

        assert_eq!(engine.state(id), Some(InboundState::Revoked));
        assert!(storage.read_all(id).is_err());
    }

    #[test]
    fn reconciliation_never_leaves_ongoing() {
        let (engine, storage) = engine();

        // (a) 로컬 ONGOING: 첫 청크만 도착
        let partial = make_ranges(b"0123456789", 5);
        let partial_id = partial[0].meta.id;
        engine.ingest_range(partial[0].clone()).unwrap();

        // (b) 로컬 종결
        let complete = make_ranges(b"abc", 3);
        let complete_id = complete[0].meta.id;
        engine.ingest_range(complete[0].clone()).unwrap();

        // (c) 로컬에 없음
        let unknown_id = Uuid::new_v4();

        let history = History {
            entries: vec![
                HistoryEntry {
                    transferable_id: partial_id,
                    user_id: partial[0].meta.user_id,
                    outcome: crate::transferable::HistoryOutcome::Success,
                    name: "file.bin".into(),
                    digest: None,
                },
                HistoryEntry {
                    transferable_id: complete_id,
                    user_id: complete[0].meta.user_id,
                    outcome: crate::transferable::HistoryOutcome::Success,
                    name: "file.bin".into(),
                    digest: None,
                },
                HistoryEntry {
                    transferable_id: unknown_id,
                    user_id: Uuid::new_v4(),
                    outcome: crate::transferable::HistoryOutcome::Success,
                    name: "lost.bin".into(),
                    digest: None,
                },
            ],
        };
        engine.reconcile_history(&history);

        // (a) 유실 확정 + 저장분 폐기
        assert_eq!(engine.state(partial_id), Some(InboundState::Error));
        assert!(storage.read_all(partial_id).is_err());
        // (b) no-op
        assert_eq!(engine.state(complete_id), Some(InboundState::Success));
        // (c) ERROR 레코드 생성
        assert_eq!(engine.state(unknown_id), Some(InboundState::Error));

        // 스냅샷에 있던 항목 중 ONGOING으로 남은 것은 없어야 한다
        for id in [partial_id, complete_id, unknown_id] {
            assert!(engine.state(id).unwrap().is_terminal());
        }
    }

    #[test]
    fn retire_only_from_terminal_states() {
        let (engine, _) = engine();
        let ranges = make_ranges(b"abc", 3);
        let id = ranges[0].meta.id;

        engine.ingest_range(ranges[0].clone()).unwrap();
        assert_eq!(engine.state(id), Some(InboundState::Success));

        assert!(!engine.retire(id, InboundState::Success));
        assert!(engine.retire(id, InboundState::Expired));
        assert_eq!(engine.state(id), Some(InboundState::Expired));
    }

    #[test]
    fn digest_state_survives_serialize_between_chunks() {
        // 청크 수신 사이 프로세스 재시작을 흉내: 레코드의 직렬화된
        // 다이제스트 상태만으로 검증이 이어져야 한다
        let (engine, _) = engine();
        let data: Vec<u8> = (0..200u8).collect();
        let ranges = make_ranges(&data, 7);
        let id = ranges[0].meta.id;

        let last = ranges.len() - 1;
        for (i, range) in ranges.into_iter().enumerate() {
            let state = engine.ingest_range(range).unwrap();
            if i == last {
                assert_eq!(state, InboundState::Success);
            }
        }
        assert_eq!(engine.bytes_received(id), Some(200));
    }
}
