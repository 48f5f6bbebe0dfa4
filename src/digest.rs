//! 재개 가능한 콘텐츠 다이제스트 (SHA-256)
//!
//! 청크 사이 간격이 무한정 벌어질 수 있고 그 사이 프로세스가 재시작될 수
//! 있으므로, 진행 중인 해시 상태를 직렬화해 저장했다가 복원할 수 있어야
//! 한다. 라이브러리 내부 메모리 레이아웃에 손대는 대신 명시적 상태 구조체를
//! 가진 SHA-256을 직접 구현한다. 상태는 압축 함수의 8워드 + 총 길이 +
//! 미처리 버퍼(<64바이트)가 전부다.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

const H0: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a,
    0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// 직렬화 가능한 내부 상태
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DigestState {
    /// 압축 상태 워드
    h: [u32; 8],

    /// 지금까지 처리한 총 바이트 수 (버퍼 포함)
    total_len: u64,

    /// 블록 미만 잔여 바이트 (항상 64 미만)
    buffer: Vec<u8>,
}

/// 재개 가능한 SHA-256 누산기
#[derive(Debug, Clone)]
pub struct ResumableDigest {
    state: DigestState,
}

impl Default for ResumableDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumableDigest {
    /// 새 누산기 생성
    pub fn new() -> Self {
        Self {
            state: DigestState {
                h: H0,
                total_len: 0,
                buffer: Vec::with_capacity(64),
            },
        }
    }

    /// 바이트 스트림 누적
    pub fn update(&mut self, bytes: &[u8]) {
        self.state.total_len += bytes.len() as u64;

        let mut input = bytes;

        // 잔여 버퍼 먼저 채움
        if !self.state.buffer.is_empty() {
            let need = 64 - self.state.buffer.len();
            let take = need.min(input.len());
            self.state.buffer.extend_from_slice(&input[..take]);
            input = &input[take..];

            if self.state.buffer.len() == 64 {
                let block: [u8; 64] = self.state.buffer[..].try_into().unwrap();
                compress(&mut self.state.h, &block);
                self.state.buffer.clear();
            }
        }

        // 완전한 블록 처리
        let mut chunks = input.chunks_exact(64);
        for block in &mut chunks {
            compress(&mut self.state.h, block.try_into().unwrap());
        }

        self.state.buffer.extend_from_slice(chunks.remainder());
    }

    /// 현재까지의 최종 다이제스트 (누산기 상태는 유지)
    pub fn digest(&self) -> Vec<u8> {
        let mut h = self.state.h;
        let bit_len = self.state.total_len.wrapping_mul(8);

        // 패딩: 0x80 + 0x00* + 64비트 길이
        let mut tail = self.state.buffer.clone();
        tail.push(0x80);
        while tail.len() % 64 != 56 {
            tail.push(0);
        }
        tail.extend_from_slice(&bit_len.to_be_bytes());

        for block in tail.chunks_exact(64) {
            compress(&mut h, block.try_into().unwrap());
        }

        let mut out = Vec::with_capacity(32);
        for word in h {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// 내부 상태 직렬화 (내구 저장용)
    pub fn serialize(&self) -> Vec<u8> {
        // 고정 필드만 가진 자체 구조체라 실패할 수 없다
        bincode::serialize(&self.state).unwrap_or_default()
    }

    /// 직렬화된 상태에서 복원
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let state: DigestState =
            bincode::deserialize(bytes).map_err(|_| Error::DigestRestore)?;
        if state.buffer.len() >= 64 {
            return Err(Error::DigestRestore);
        }
        Ok(Self { state })
    }
}

fn compress(h: &mut [u32; 8], block: &[u8; 64]) {
    let mut w = [0u32; 64];
    for (i, word) in w.iter_mut().take(16).enumerate() {
        *word = u32::from_be_bytes([
            block[i * 4],
            block[i * 4 + 1],
            block[i * 4 + 2],
            block[i * 4 + 3],
        ]);
    }
    for i in 16..64 {
        let s0 = w[i - 15].rotate_right(7) ^ w[i - 15].rotate_right(18) ^ (w[i - 15] >> 3);
        let s1 = w[i - 2].rotate_right(17) ^ w[i - 2].rotate_right(19) ^ (w[i - 2] >> 10);
        w[i] = w[i - 16]
            .wrapping_add(s0)
            .wrapping_add(w[i - 7])
            .wrapping_add(s1);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut hh] = *h;

    for i in 0..64 {
        let s1 = e.rotate_right(6) ^ e.rotate_right(11) ^ e.rotate_right(25);
        let ch = (e & f) ^ (!e & g);
        let t1 = hh
            .wrapping_add(s1)
            .wrapping_add(ch)
            .wrapping_add(K[i])
            .wrapping_add(w[i]);
        let s0 = a.rotate_right(2) ^ a.rotate_right(13) ^ a.rotate_right(22);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let t2 = s0.wrapping_add(maj);

        hh = g;
        g = f;
        f = e;
        e = d.wrapping_add(t1);
        d = c;
        c = b;
        b = a;
        a = t1.wrapping_add(t2);
    }

    h[0] = h[0].wrapping_add(a);
    h[1] = h[1].wrapping_add(b);
    h[2] = h[2].wrapping_add(c);
    h[3] = h[3].wrapping_add(d);
    h[4] = h[4].wrapping_add(e);
    h[5] = h[5].wrapping_add(f);
    h[6] = h[6].wrapping_add(g);
    h[7] = h[7].wrapping_add(hh);
}
