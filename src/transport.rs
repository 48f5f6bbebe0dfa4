//! 단방향 패킷 전송 계층
//!
//! 연결 하나가 패킷 하나를 나른다: 송신자는 패킷마다 새 TCP 연결을 열어
//! 인코딩된 바이트를 전부 쓰고 닫는다. 수신자는 연결을 EOF까지 읽는다 —
//! 길이 프리픽스 없이 EOF가 곧 프레임 경계다.
//!
//! 전달 보장: at-most-once, 패킷 간 순서 없음, 한 연결 안에서만 순서
//! 보장. ACK는 어디에도 없다.
//!
//! - 송신 큐가 가득 차면 enqueue가 블록된다 (원하는 백프레셔 — 미전달
//!   데이터를 둘 곳이 달리 없다)
//! - 수신 큐가 가득 차면 바이트를 버린다 (단방향 링크는 송신자를 늦출
//!   방법이 없다; 유실은 히스토리 조정이 감내한다)

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::stats::DiodeStats;

/// 송신 워커 명령
enum SenderCmd {
    /// 전송할 패킷
    Packet(Packet),

    /// 종료 센티널 — 앞서 쌓인 패킷을 전부 비운 뒤 워커가 빠진다
    Shutdown,
}

/// 패킷 송신자
///
/// 바운디드 큐가 패킷 생성과 전송을 분리한다. 큐 용량이 곧 admission
/// control: 가득 차면 `send`가 자리 날 때까지 블록된다.
pub struct PacketSender {
    tx: Sender<SenderCmd>,
    worker: Option<JoinHandle<()>>,
}

impl PacketSender {
    /// 송신자 시작
    pub fn start(
        remote_addr: SocketAddr,
        queue_depth: usize,
        stats: Arc<DiodeStats>,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<SenderCmd>(queue_depth.max(1));

        let worker = thread::Builder::new()
            .name("dtp-sender".into())
            .spawn(move || sender_worker(remote_addr, rx, stats))?;

        info!("DTP 송신자 시작: remote={remote_addr}, queue_depth={queue_depth}");
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    /// 패킷 enqueue (큐가 가득 차면 블록, 타임아웃 없음)
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.tx
            .send(SenderCmd::Packet(packet))
            .map_err(|_| Error::QueueClosed)
    }

    /// 정렬된 종료: 이미 쌓인 패킷을 전부 전송한 뒤 워커 합류
    pub fn shutdown(mut self) {
        let _ = self.tx.send(SenderCmd::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn sender_worker(remote_addr: SocketAddr, rx: Receiver<SenderCmd>, stats: Arc<DiodeStats>) {
    for cmd in rx.iter() {
        let packet = match cmd {
            SenderCmd::Packet(p) => p,
            SenderCmd::Shutdown => break,
        };

        let bytes = match packet.encode() {
            Ok(b) => b,
            Err(e) => {
                // 직렬화 불가 필드는 프로그래머 오류 — 패킷만 버린다
                error!("패킷 인코딩 실패, 폐기: {e}");
                stats.record_send_failure();
                continue;
            }
        };

        // 패킷마다 새 연결: 쓰고 닫으면 끝 (at-most-once, 재시도 없음)
        match transmit(remote_addr, &bytes) {
            Ok(()) => {
                stats.record_sent(packet.payload_len(), packet.is_heartbeat());
                debug!("패킷 전송: {} bytes", bytes.len());
            }
            Err(e) => {
                warn!("패킷 전송 실패, 폐기: {e}");
                stats.record_send_failure();
            }
        }
    }
    debug!("송신 워커 종료");
}

fn transmit(remote_addr: SocketAddr, bytes: &[u8]) -> Result<()> {
    let mut stream = TcpStream::connect(remote_addr)?;
    stream.write_all(bytes)?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

/// 패킷 수신자
///
/// accept 루프가 연결마다 핸들러 스레드를 띄우고, 핸들러는 EOF까지 읽은
/// 원시 바이트를 바운디드 큐에 넣는다. 소비자는 타임아웃 dequeue 후
/// 디코딩한다.
pub struct PacketReceiver {
    rx: Receiver<Vec<u8>>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    accept_loop: Option<JoinHandle<()>>,
    stats: Arc<DiodeStats>,
}

impl PacketReceiver {
    /// 수신자 시작
    pub fn start(
        bind_addr: SocketAddr,
        queue_depth: usize,
        stats: Arc<DiodeStats>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = bounded::<Vec<u8>>(queue_depth.max(1));
        let running = Arc::new(AtomicBool::new(true));

        let accept_running = running.clone();
        let accept_stats = stats.clone();
        let handle = thread::Builder::new()
            .name("dtp-accept".into())
            .spawn(move || accept_loop(listener, tx, accept_running, accept_stats))?;

        info!("DTP 수신자 시작: bind={local_addr}, queue_depth={queue_depth}");
        Ok(Self {
            rx,
            running,
            local_addr,
            accept_loop: Some(handle),
            stats,
        })
    }

    /// 실제 바인드된 주소 (포트 0 바인드 시 확인용)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 패킷 하나 dequeue + 디코딩
    ///
    /// 타임아웃 내 도착이 없으면 `Ok(None)`. 디코딩 실패는 이 호출만
    /// 실패시키는 회복 가능한 에러 — 소비 루프를 죽이지 않는다.
    pub fn recv(&self, timeout: Duration) -> Result<Option<Packet>> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => match Packet::decode(&bytes) {
                Ok(packet) => {
                    self.stats.record_received(packet.payload_len());
                    Ok(Some(packet))
                }
                Err(e) => {
                    self.stats.record_discarded();
                    Err(e)
                }
            },
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::QueueClosed),
        }
    }

    /// accept 루프를 명시적으로 닫고 합류
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);

        // 블로킹 accept를 깨우는 셀프 연결
        let wake_addr = if self.local_addr.ip().is_unspecified() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.local_addr.port())
        } else {
            self.local_addr
        };
        let _ = TcpStream::connect(wake_addr);

        if let Some(handle) = self.accept_loop.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    tx: Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
    stats: Arc<DiodeStats>,
) {
    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("accept 실패: {e}");
                continue;
            }
        };

        // 연결당 핸들러 하나: EOF까지 읽고 큐에 넣는다
        let tx = tx.clone();
        let stats = stats.clone();
        let result = thread::Builder::new()
            .name("dtp-conn".into())
            .spawn(move || read_connection(stream, tx, stats));
        if let Err(e) = result {
            warn!("핸들러 스레드 생성 실패: {e}");
        }
    }
    debug!("accept 루프 종료");
}

fn read_connection(mut stream: TcpStream, tx: Sender<Vec<u8>>, stats: Arc<DiodeStats>) {
    let mut bytes = Vec::new();
    if let Err(e) = stream.read_to_end(&mut bytes) {
        warn!("연결 읽기 실패: {e}");
        return;
    }
    if bytes.is_empty() {
        // 셀프 wake 연결 등
        return;
    }

    // 큐 포화는 유실로 처리 — accept 루프를 막지 않는다
    if let Err(TrySendError::Full(_)) = tx.try_send(bytes) {
        warn!("수신 큐 포화, 패킷 폐기");
        stats.record_discarded();
    }
}
