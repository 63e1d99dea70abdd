//! Adaptive scan scheduler: decides how long to wait before the next tick
//! based on recent hits, misses, and which process is in the foreground.

use std::time::{Duration, Instant};

use crate::config::ScanMode;

/// Mirrors the scheduler knobs carried on `ScanConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTuning {
    pub scan_mode: ScanMode,
    pub active_scan_interval_ms: u64,
    pub idle_scan_interval_ms: u64,
    pub miss_backoff_ms_max: u64,
    pub hit_cooldown_ms: u64,
}

/// Tracks hit/miss/foreground state and computes the delay before the next
/// scan tick. Exponential miss backoff is capped at `2^16` so long-idle
/// periods don't overflow.
pub struct AdaptiveScheduler {
    tuning: SchedulerTuning,
    process_whitelist: Vec<String>,
    active: bool,
    miss_count: u32,
    last_hit_at: Option<Instant>,
}

impl AdaptiveScheduler {
    pub fn new(tuning: SchedulerTuning, process_whitelist: Vec<String>) -> Self {
        AdaptiveScheduler {
            tuning,
            process_whitelist: process_whitelist
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
            active: matches!(tuning.scan_mode, ScanMode::Polling),
            miss_count: 0,
            last_hit_at: None,
        }
    }

    pub fn on_hit(&mut self) {
        self.miss_count = 0;
        self.last_hit_at = Some(Instant::now());
    }

    pub fn on_miss(&mut self) {
        if !self.in_hit_cooldown() {
            self.miss_count += 1;
        }
    }

    pub fn on_foreground_change(&mut self, process_name: &str) {
        self.active = match self.tuning.scan_mode {
            ScanMode::Polling => true,
            ScanMode::Event => {
                let lower = process_name.to_lowercase();
                self.process_whitelist.iter().any(|p| p == &lower)
            }
        };
    }

    fn in_hit_cooldown(&self) -> bool {
        self.hit_cooldown_remaining().is_some()
    }

    fn hit_cooldown_remaining(&self) -> Option<Duration> {
        let last_hit = self.last_hit_at?;
        let cooldown = Duration::from_millis(self.tuning.hit_cooldown_ms);
        let elapsed = last_hit.elapsed();
        if elapsed < cooldown {
            Some(cooldown - elapsed)
        } else {
            None
        }
    }

    /// Delay before the next tick, in milliseconds.
    pub fn next_delay_ms(&self) -> u64 {
        if let Some(remaining) = self.hit_cooldown_remaining() {
            return remaining.as_millis() as u64;
        }
        if !self.active {
            return self.tuning.idle_scan_interval_ms;
        }
        let backoff = self
            .tuning
            .active_scan_interval_ms
            .saturating_mul(1u64 << self.miss_count.min(16));
        backoff.clamp(self.tuning.active_scan_interval_ms, self.tuning.miss_backoff_ms_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> SchedulerTuning {
        SchedulerTuning {
            scan_mode: ScanMode::Event,
            active_scan_interval_ms: 120,
            idle_scan_interval_ms: 2000,
            miss_backoff_ms_max: 5000,
            hit_cooldown_ms: 4000,
        }
    }

    #[test]
    fn event_mode_starts_inactive_and_activates_on_whitelisted_foreground() {
        let mut sched = AdaptiveScheduler::new(tuning(), vec!["Code.exe".into()]);
        assert_eq!(sched.next_delay_ms(), 2000);
        sched.on_foreground_change("code.exe");
        assert_eq!(sched.next_delay_ms(), 120);
    }

    #[test]
    fn polling_mode_is_always_active_regardless_of_foreground() {
        let mut tuning = tuning();
        tuning.scan_mode = ScanMode::Polling;
        let sched = AdaptiveScheduler::new(tuning, vec![]);
        assert_eq!(sched.next_delay_ms(), 120);
    }

    #[test]
    fn misses_back_off_exponentially_until_capped() {
        let mut tuning = tuning();
        tuning.scan_mode = ScanMode::Polling;
        let mut sched = AdaptiveScheduler::new(tuning, vec![]);
        assert_eq!(sched.next_delay_ms(), 120);
        sched.on_miss();
        assert_eq!(sched.next_delay_ms(), 240);
        sched.on_miss();
        assert_eq!(sched.next_delay_ms(), 480);
        for _ in 0..10 {
            sched.on_miss();
        }
        assert_eq!(sched.next_delay_ms(), 5000);
    }

    #[test]
    fn hit_resets_miss_count_and_enters_cooldown() {
        let mut tuning = tuning();
        tuning.scan_mode = ScanMode::Polling;
        let mut sched = AdaptiveScheduler::new(tuning, vec![]);
        sched.on_miss();
        sched.on_miss();
        sched.on_hit();
        assert_eq!(sched.miss_count, 0);
        let delay = sched.next_delay_ms();
        assert!(delay > 0 && delay <= 4000);
    }

    #[test]
    fn misses_during_hit_cooldown_do_not_increment_miss_count() {
        let mut tuning = tuning();
        tuning.scan_mode = ScanMode::Polling;
        let mut sched = AdaptiveScheduler::new(tuning, vec![]);
        sched.on_hit();
        sched.on_miss();
        assert_eq!(sched.miss_count, 0);
    }
}
