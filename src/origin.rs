//! origin 측 엔드포인트
//!
//! 업로드 계층(범위 밖 CRUD)이 넣어준 청크를 패킷으로 묶어 다이오드로
//! 내보낸다. 패킷 생성 루프 하나가 스케줄러를 단독 소유하고, 전송은
//! [`PacketSender`]의 바운디드 큐 건너편 워커가 맡는다 — 큐가 가득 차면
//! 패킷 생성이 블록되는 것이 곧 admission control이다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, SchedulerPolicy};
use crate::digest::ResumableDigest;
use crate::error::Result;
use crate::history::HistoryBroadcaster;
use crate::ledger::OutboundLedger;
use crate::packet::Packet;
use crate::scheduler::FairShareScheduler;
use crate::state::OutboundState;
use crate::stats::DiodeStats;
use crate::transferable::{
    RevocationReason, TransferableId, TransferableMeta, TransferableRange, UserId,
};
use crate::transport::PacketSender;

/// origin 엔드포인트
pub struct Origin {
    config: Config,
    ledger: Arc<OutboundLedger>,
    sender: Mutex<Option<PacketSender>>,
    stats: Arc<DiodeStats>,
    scheduler: Mutex<FairShareScheduler>,
    broadcaster: Mutex<HistoryBroadcaster>,
    last_send: Mutex<Option<Instant>>,
    running: AtomicBool,
}

impl Origin {
    /// origin 생성 (송신 워커 기동 포함)
    pub fn new(config: Config) -> Result<Self> {
        let stats = Arc::new(DiodeStats::new());
        let sender =
            PacketSender::start(config.remote_addr, config.send_queue_depth, stats.clone())?;
        let broadcaster =
            HistoryBroadcaster::new(config.history_interval, config.history_window);

        Ok(Self {
            ledger: Arc::new(OutboundLedger::new()),
            sender: Mutex::new(Some(sender)),
            stats,
            scheduler: Mutex::new(FairShareScheduler::new()),
            broadcaster: Mutex::new(broadcaster),
            last_send: Mutex::new(None),
            config,
            running: AtomicBool::new(true),
        })
    }

    /// outbound 원장 (업로드 계층용)
    pub fn ledger(&self) -> &Arc<OutboundLedger> {
        &self.ledger
    }

    /// 송수신 통계
    pub fn stats(&self) -> &Arc<DiodeStats> {
        &self.stats
    }

    /// 사용자 스케줄링 가중치 설정
    pub fn set_user_priority(&self, user: UserId, weight: u32) {
        self.scheduler.lock().set_weight(user, weight);
    }

    /// 업로드 바이트 수용: 청크로 잘라 다이제스트와 함께 원장에 넣는다
    ///
    /// 마지막 청크에만 전체 크기와 콘텐츠 다이제스트가 실린다. 빈 업로드는
    /// 빈 마지막 청크 하나가 된다.
    pub fn store_upload(
        &self,
        user: UserId,
        name: impl Into<String>,
        user_metadata: impl IntoIterator<Item = (String, String)>,
        data: &[u8],
    ) -> TransferableId {
        let mut meta = TransferableMeta::new(user, name);
        meta.user_metadata.extend(user_metadata);
        let id = meta.id;

        let mut digest = ResumableDigest::new();
        digest.update(data);
        let final_meta = meta.finalized(data.len() as u64, Bytes::from(digest.digest()));

        let chunk_size = self.config.chunk_size.max(1);
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(chunk_size).collect()
        };

        let count = chunks.len();
        let mut offset = 0u64;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let is_last = i == count - 1;
            self.ledger.enqueue_range(TransferableRange {
                meta: if is_last { final_meta.clone() } else { meta.clone() },
                offset,
                data: Bytes::copy_from_slice(chunk),
                is_last,
            });
            offset += chunk.len() as u64;
        }

        debug!("업로드 수용: {id}, {count} 청크, {} bytes", data.len());
        id
    }

    /// 전송 취소
    pub fn revoke(&self, id: TransferableId, reason: RevocationReason) -> bool {
        self.ledger.revoke(id, reason)
    }

    /// 파생 전송 상태 조회
    pub fn state(&self, id: TransferableId) -> Option<OutboundState> {
        self.ledger.state(id)
    }

    /// 패킷 하나 생성/전송 시도
    ///
    /// 실을 것이 없으면 heartbeat 간격이 찼을 때만 빈 패킷을 보낸다.
    /// 반환값은 패킷을 내보냈는지 여부.
    pub fn pump_once(&self) -> Result<bool> {
        let (ranges, taken) = self.fill_ranges();
        let revocations = self.ledger.take_revocations();
        let history = self.broadcaster.lock().snapshot_if_due(&self.ledger);

        let packet = Packet {
            ranges,
            revocations,
            history,
        };

        if packet.is_heartbeat() && !self.heartbeat_due() {
            return Ok(false);
        }

        if !packet.is_heartbeat() {
            debug!(
                "패킷 생성: {} 청크 / {} bytes, {} revocation, history={}",
                packet.ranges.len(),
                taken,
                packet.revocations.len(),
                packet.history.is_some()
            );
        }

        self.dispatch(packet)?;
        Ok(true)
    }

    /// 정책에 따라 패킷 바이트 예산만큼 청크를 채운다
    fn fill_ranges(&self) -> (Vec<TransferableRange>, usize) {
        let budget = self.config.packet_byte_budget;

        match self.config.scheduler_policy {
            SchedulerPolicy::Fifo => self.ledger.pull_fifo_chunks(budget),

            SchedulerPolicy::WeightedRoundRobin => {
                let mut ranges = Vec::new();
                let mut taken_total = 0usize;

                // 사이클마다 새로 계산되는 대기 사용자 스냅샷
                let mut pending = self.ledger.pending_users();
                let mut scheduler = self.scheduler.lock();

                while taken_total < budget {
                    let Some(user) = scheduler.next_user(&mut pending) else {
                        break;
                    };
                    let (mut pulled, taken) =
                        self.ledger.pull_user_chunks(user, budget - taken_total);
                    taken_total += taken;
                    ranges.append(&mut pulled);
                }

                (ranges, taken_total)
            }
        }
    }

    fn heartbeat_due(&self) -> bool {
        match *self.last_send.lock() {
            None => true,
            Some(last) => last.elapsed() >= self.config.heartbeat_interval,
        }
    }

    fn dispatch(&self, packet: Packet) -> Result<()> {
        let guard = self.sender.lock();
        if let Some(sender) = guard.as_ref() {
            sender.send(packet)?;
            *self.last_send.lock() = Some(Instant::now());
        }
        Ok(())
    }

    /// 펌프 루프를 전용 스레드로 기동
    pub fn spawn_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let origin = self.clone();
        thread::spawn(move || {
            info!("패킷 생성 루프 시작");
            while origin.running.load(Ordering::SeqCst) {
                match origin.pump_once() {
                    Ok(true) => {}
                    Ok(false) => thread::sleep(Duration::from_millis(50)),
                    Err(e) => {
                        // 루프는 죽지 않는다 — 실패는 로그로만
                        warn!("패킷 생성 실패: {e}");
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
            info!("패킷 생성 루프 종료");
        })
    }

    /// 정렬된 종료: 새 패킷 수용을 멈추고 송신 큐를 비운 뒤 워커 합류
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(sender) = self.sender.lock().take() {
            sender.shutdown();
        }
    }
}
