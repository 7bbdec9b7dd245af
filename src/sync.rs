use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Compositing,
}

/// Rate-limits and serializes composite requests.
///
/// Reentrancy is structural: a mutation arriving while `Compositing` only
/// sets the dirty flag, it never queues a payload. The compositor reads
/// live surface state, so one deferred run always reflects every coalesced
/// mutation. A leaky-bucket minimum gap additionally bounds composite
/// frequency; coalesced work is drained by `poll`, the timer-driven trigger.
///
/// Time is injected so tests can drive the clock.
pub struct SyncScheduler {
    state: SyncState,
    min_gap: Duration,
    last_start: Option<Instant>,
    dirty: bool,
    composites: u64,
    coalesced: u64,
}

impl SyncScheduler {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            state: SyncState::Idle,
            min_gap,
            last_start: None,
            dirty: false,
            composites: 0,
            coalesced: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Mutation-event trigger. `true` means the caller runs exactly one
    /// composite now and calls `finish` when it completes.
    pub fn on_mutation(&mut self, now: Instant) -> bool {
        match self.state {
            SyncState::Compositing => {
                self.dirty = true;
                self.coalesced += 1;
                false
            }
            SyncState::Idle if self.gap_elapsed(now) => {
                self.begin(now);
                true
            }
            SyncState::Idle => {
                self.dirty = true;
                self.coalesced += 1;
                false
            }
        }
    }

    /// Timer-driven trigger: drains coalesced mutations once the gap has
    /// elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.state == SyncState::Idle && self.dirty && self.gap_elapsed(now) {
            self.begin(now);
            true
        } else {
            false
        }
    }

    pub fn finish(&mut self) {
        self.state = SyncState::Idle;
    }

    /// Request a recomposite outside the mutation-event path (garment
    /// switches recolor the base fill without touching any element).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn composites(&self) -> u64 {
        self.composites
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    fn gap_elapsed(&self, now: Instant) -> bool {
        self.last_start
            .is_none_or(|t| now.duration_since(t) >= self.min_gap)
    }

    fn begin(&mut self, now: Instant) {
        self.state = SyncState::Compositing;
        self.last_start = Some(now);
        self.dirty = false;
        self.composites += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAP: Duration = Duration::from_millis(150);

    #[test]
    fn two_triggers_inside_gap_yield_one_composite() {
        let mut s = SyncScheduler::new(GAP);
        let t0 = Instant::now();
        assert!(s.on_mutation(t0));
        s.finish();
        assert!(!s.on_mutation(t0 + Duration::from_millis(50)));
        assert_eq!(s.composites(), 1);
        assert!(s.is_dirty());
    }

    #[test]
    fn poll_drains_coalesced_work_after_gap() {
        let mut s = SyncScheduler::new(GAP);
        let t0 = Instant::now();
        assert!(s.on_mutation(t0));
        s.finish();
        assert!(!s.on_mutation(t0 + Duration::from_millis(10)));
        assert!(!s.poll(t0 + Duration::from_millis(100)));
        assert!(s.poll(t0 + GAP));
        s.finish();
        assert_eq!(s.composites(), 2);
        assert!(!s.is_dirty());
        assert!(!s.poll(t0 + 2 * GAP));
    }

    #[test]
    fn mutation_during_composite_is_coalesced() {
        let mut s = SyncScheduler::new(GAP);
        let t0 = Instant::now();
        assert!(s.on_mutation(t0));
        assert_eq!(s.state(), SyncState::Compositing);
        assert!(!s.on_mutation(t0 + Duration::from_millis(1)));
        assert_eq!(s.coalesced(), 1);
        s.finish();
        assert_eq!(s.state(), SyncState::Idle);
        assert!(s.poll(t0 + GAP));
    }

    #[test]
    fn trigger_after_gap_composites_immediately() {
        let mut s = SyncScheduler::new(GAP);
        let t0 = Instant::now();
        assert!(s.on_mutation(t0));
        s.finish();
        assert!(s.on_mutation(t0 + GAP));
        s.finish();
        assert_eq!(s.composites(), 2);
    }
}
