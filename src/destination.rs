//! destination 측 엔드포인트
//!
//! 수신 루프 하나가 패킷을 dequeue해 재조립 엔진에 순서대로 먹인다.
//! 다이오드 특성상 어떤 실패도 회신할 수 없으므로, 루프는 절대 죽지
//! 않고 패킷/청크 단위로만 실패를 기록한다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::packet::Packet;
use crate::reassembler::Reassembler;
use crate::state::InboundState;
use crate::stats::DiodeStats;
use crate::storage::ChunkStorage;
use crate::transferable::TransferableId;
use crate::transport::PacketReceiver;

/// destination 엔드포인트
pub struct Destination {
    config: Config,
    reassembler: Arc<Reassembler>,
    receiver: Mutex<Option<PacketReceiver>>,
    stats: Arc<DiodeStats>,
    running: AtomicBool,
}

impl Destination {
    /// destination 생성 (수신 accept 루프 기동 포함)
    pub fn new(config: Config, storage: Arc<dyn ChunkStorage>) -> Result<Self> {
        let stats = Arc::new(DiodeStats::new());
        let receiver =
            PacketReceiver::start(config.bind_addr, config.recv_queue_depth, stats.clone())?;

        Ok(Self {
            reassembler: Arc::new(Reassembler::new(storage)),
            receiver: Mutex::new(Some(receiver)),
            stats,
            config,
            running: AtomicBool::new(true),
        })
    }

    /// 실제 바인드된 수신 주소
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.receiver.lock().as_ref().map(|r| r.local_addr())
    }

    /// 재조립 엔진 (다운로드 계층용)
    pub fn reassembler(&self) -> &Arc<Reassembler> {
        &self.reassembler
    }

    /// 송수신 통계
    pub fn stats(&self) -> &Arc<DiodeStats> {
        &self.stats
    }

    /// 전송 상태 조회
    pub fn state(&self, id: TransferableId) -> Option<InboundState> {
        self.reassembler.state(id)
    }

    /// 패킷 하나 수신/처리 시도. 처리했으면 true, 타임아웃이면 false.
    pub fn consume_once(&self) -> Result<bool> {
        let packet = {
            let guard = self.receiver.lock();
            let Some(receiver) = guard.as_ref() else {
                return Ok(false);
            };
            match receiver.recv(self.config.read_timeout) {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(false),
                Err(e) => {
                    // 깨진 패킷은 그 패킷만 버린다
                    warn!("패킷 디코딩 실패, 폐기: {e}");
                    return Ok(false);
                }
            }
        };

        self.dispatch(packet);
        Ok(true)
    }

    /// 패킷 내용물을 엔진에 순서대로 반영
    ///
    /// revocation을 청크보다 먼저 처리한다 — 같은 패킷에 취소와 잔여
    /// 청크가 함께 실렸으면 청크 쪽이 no-op이 되도록.
    fn dispatch(&self, packet: Packet) {
        if packet.is_heartbeat() {
            debug!("heartbeat 수신");
            return;
        }

        for revocation in &packet.revocations {
            self.reassembler.ingest_revocation(revocation);
        }

        for range in packet.ranges {
            let id = range.meta.id;
            if let Err(e) = self.reassembler.ingest_range(range) {
                // 엔진이 이미 레코드를 Error로 넘겼다
                warn!("청크 반영 실패: {id}: {e}");
            }
        }

        if let Some(history) = &packet.history {
            self.reassembler.reconcile_history(history);
        }
    }

    /// 수신 루프를 전용 스레드로 기동
    pub fn spawn_consume(self: &Arc<Self>) -> JoinHandle<()> {
        let destination = self.clone();
        thread::spawn(move || {
            info!("수신 루프 시작");
            while destination.running.load(Ordering::SeqCst) {
                if let Err(e) = destination.consume_once() {
                    warn!("패킷 처리 실패: {e}");
                }
            }
            info!("수신 루프 종료");
        })
    }

    /// 수신 중단: accept 루프를 내리고 합류
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(receiver) = self.receiver.lock().take() {
            receiver.shutdown();
        }
    }
}
