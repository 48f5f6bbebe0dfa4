//! 공정 분배 스케줄러
//!
//! 패킷 하나를 채울 때마다(= 한 사이클) 어느 사용자의 대기 청크를 실을지
//! 결정한다. 가중치 높은 사용자가 비례해서 더 많은 처리량을 가져가되
//! 저가중치 사용자도 굶지 않는 weighted round-robin. current user와
//! credit은 사이클을 넘어 유지되고, pending 사용자 집합은 사이클마다
//! 새로 계산된다.
//!
//! 스케줄러는 패킷 생성 루프가 단독 소유하는 상태 객체다 (락 불필요).

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

use crate::transferable::UserId;

/// 기본 가중치 (설정 안 된 사용자)
pub const DEFAULT_WEIGHT: u32 = 1;

/// weighted round-robin 스케줄러
#[derive(Debug)]
pub struct FairShareScheduler {
    /// 사용자별 가중치
    weights: HashMap<UserId, u32>,

    /// 현재 선택 사용자 (사이클 간 유지)
    current: Option<UserId>,

    /// credit 카운터 (사이클 간 유지)
    credit: u32,
}

impl Default for FairShareScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FairShareScheduler {
    /// 새 스케줄러 생성
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
            current: None,
            credit: 0,
        }
    }

    /// 사용자 가중치 설정 (0은 1로 올림)
    pub fn set_weight(&mut self, user: UserId, weight: u32) {
        self.weights.insert(user, weight.max(1));
    }

    fn weight_of(&self, user: UserId) -> u32 {
        self.weights.get(&user).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// 다음으로 청크를 뽑을 사용자 선택
    ///
    /// `pending`은 이번 사이클 시작 시점의 대기 사용자 스냅샷. 선택된
    /// 사용자는 스냅샷에서 소비되므로 한 사이클에 같은 사용자가 두 번
    /// 선택되는 일은 없다. 스냅샷 이후 생긴 작업은 다음 사이클까지
    /// 기다린다 — 엄밀한 보장이 아니라 best-effort 공정성이다.
    pub fn next_user(&mut self, pending: &mut BTreeSet<UserId>) -> Option<UserId> {
        if pending.is_empty() {
            self.current = None;
            self.credit = 0;
            return None;
        }

        let selected = match self.current {
            // 현재 사용자 없음: 최소 ID부터
            None => *pending.iter().next().unwrap(),

            Some(current) => {
                if self.credit < self.weight_of(current) && pending.contains(&current) {
                    // credit이 남았고 일감도 있으면 현재 사용자 유지
                    current
                } else {
                    // 다음 사용자로 전진 (ID 순, 끝이면 최소로 wrap)
                    let next = pending
                        .range((Excluded(current), Unbounded))
                        .next()
                        .copied()
                        .unwrap_or_else(|| *pending.iter().next().unwrap());
                    self.credit = 0;
                    next
                }
            }
        };

        pending.remove(&selected);
        self.current = Some(selected);
        // 어느 분기든 선택 시마다 증가
        self.credit += 1;
        Some(selected)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn two_users() -> (UserId, UserId) {
        let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        (ids[0], ids[1])
    }

    #[test]
    fn empty_pending_clears_state() {
        let mut sched = FairShareScheduler::new();
        let (a, _) = two_users();

        let mut pending: BTreeSet<UserId> = [a].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));

        let mut empty = BTreeSet::new();
        assert_eq!(sched.next_user(&mut empty), None);

        // 상태가 비워졌으니 다시 최소 ID부터 시작
        let mut pending: BTreeSet<UserId> = [a].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));
    }

    #[test]
    fn starts_with_lowest_id() {
        let mut sched = FairShareScheduler::new();
        let (low, high) = two_users();

        let mut pending: BTreeSet<UserId> = [high, low].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(low));
    }

    #[test]
    fn no_user_selected_twice_per_cycle() {
        let mut sched = FairShareScheduler::new();
        let (a, b) = two_users();
        sched.set_weight(a, 5);

        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        let mut seen = Vec::new();
        while let Some(user) = sched.next_user(&mut pending) {
            assert!(!seen.contains(&user));
            seen.push(user);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn converges_to_weight_ratio() {
        let mut sched = FairShareScheduler::new();
        let (a, b) = two_users();
        sched.set_weight(a, 3);
        sched.set_weight(b, 1);

        // 무한 일감 가정: 사이클마다 첫 선택 사용자가 패킷을 독차지한다
        let mut picks_a = 0u32;
        let mut picks_b = 0u32;
        for _ in 0..4000 {
            let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
            match sched.next_user(&mut pending) {
                Some(u) if u == a => picks_a += 1,
                Some(_) => picks_b += 1,
                None => unreachable!(),
            }
        }

        assert_eq!(picks_a, 3000);
        assert_eq!(picks_b, 1000);
    }

    #[test]
    fn wraps_around_after_highest_id() {
        let mut sched = FairShareScheduler::new();
        let (a, b) = two_users();
        // 가중치 1이면 선택마다 전진

        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));

        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(b));

        // b 다음은 wrap해서 a
        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));
    }

    #[test]
    fn keeps_current_user_while_credit_remains() {
        let mut sched = FairShareScheduler::new();
        let (a, b) = two_users();
        sched.set_weight(a, 2);

        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));

        // credit 1 < weight 2: a 유지, 같은 사이클 나머지에서 b 선택
        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));
        assert_eq!(sched.next_user(&mut pending), Some(b));
    }

    #[test]
    fn skips_current_user_without_pending_work() {
        let mut sched = FairShareScheduler::new();
        let (a, b) = two_users();
        sched.set_weight(a, 10);

        let mut pending: BTreeSet<UserId> = [a, b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(a));

        // a의 일감이 사라지면 credit이 남아도 b로 전진
        let mut pending: BTreeSet<UserId> = [b].into_iter().collect();
        assert_eq!(sched.next_user(&mut pending), Some(b));
    }
}
