use std::cmp::Ordering;
use std::task::Waker;
use std::time::Instant;

/// One armed timer: wake `waker` once `deadline` has passed.
pub(super) struct TimerEntry {
    pub(super) deadline: Instant,
    pub(super) waker: Waker,
}

// `BinaryHeap` is a max-heap; entries compare by *reverse* deadline so the
// earliest expiry surfaces at the top.
impl Ord for TimerEntry {
    fn cmp(&self, other: &TimerEntry) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &TimerEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &TimerEntry) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for TimerEntry {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::task::{RawWaker, RawWakerVTable};
    use std::time::Duration;

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        fn noop(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn heap_pops_earliest_first() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        for offset in [30u64, 10, 20] {
            heap.push(TimerEntry {
                deadline: base + Duration::from_millis(offset),
                waker: noop_waker(),
            });
        }

        assert_eq!(heap.pop().unwrap().deadline, base + Duration::from_millis(10));
        assert_eq!(heap.pop().unwrap().deadline, base + Duration::from_millis(20));
        assert_eq!(heap.pop().unwrap().deadline, base + Duration::from_millis(30));
    }
}
