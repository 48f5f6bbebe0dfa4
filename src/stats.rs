//! 전송 통계
//!
//! 관리 계층(범위 밖)이 읽어가는 카운터와 마지막 패킷 송수신 시각.
//! 상태별 전송 수는 원장/엔진의 `state_tally()`에서 직접 읽는다.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// 다이오드 송수신 통계
#[derive(Default)]
pub struct DiodeStats {
    /// 와이어에 쓰기 성공한 패킷 수
    pub packets_sent: AtomicU64,

    /// 소켓 에러로 버린 패킷 수
    pub packets_dropped: AtomicU64,

    /// 수신해 디코딩까지 성공한 패킷 수
    pub packets_received: AtomicU64,

    /// 디코딩 실패 또는 큐 포화로 버린 패킷 수
    pub packets_discarded: AtomicU64,

    /// 송신 heartbeat 수
    pub heartbeats_sent: AtomicU64,

    /// 송신 페이로드 바이트
    pub bytes_sent: AtomicU64,

    /// 수신 페이로드 바이트
    pub bytes_received: AtomicU64,

    last_packet_sent_at: Mutex<Option<DateTime<Utc>>>,
    last_packet_received_at: Mutex<Option<DateTime<Utc>>>,
}

impl DiodeStats {
    /// 새 통계 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 패킷 송신 성공 기록
    pub fn record_sent(&self, payload_bytes: usize, heartbeat: bool) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
        if heartbeat {
            self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_packet_sent_at.lock() = Some(Utc::now());
    }

    /// 송신 실패 기록
    pub fn record_send_failure(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// 패킷 수신 기록
    pub fn record_received(&self, payload_bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
        *self.last_packet_received_at.lock() = Some(Utc::now());
    }

    /// 수신 폐기 기록 (디코딩 실패, 큐 포화)
    pub fn record_discarded(&self) {
        self.packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// 마지막 패킷 송신 시각
    pub fn last_packet_sent_at(&self) -> Option<DateTime<Utc>> {
        *self.last_packet_sent_at.lock()
    }

    /// 마지막 패킷 수신 시각
    pub fn last_packet_received_at(&self) -> Option<DateTime<Utc>> {
        *self.last_packet_received_at.lock()
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "sent: {} pkts / {} bytes (hb {}, dropped {}) | recv: {} pkts / {} bytes (discarded {})",
            self.packets_sent.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.heartbeats_sent.load(Ordering::Relaxed),
            self.packets_dropped.load(Ordering::Relaxed),
            self.packets_received.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.packets_discarded.load(Ordering::Relaxed),
        )
    }
}
