//! Echo-suppression gate between the capture and playback callbacks.
//!
//! Every served playback chunk pushes a re-engage deadline forward; captured
//! frames are only forwarded once the deadline has passed, so the microphone
//! does not re-capture the device's own output. The deadline is the single
//! piece of state shared between the two real-time audio threads, held as an
//! atomic microsecond offset from a per-gate epoch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct FrameGate {
    epoch: Instant,
    /// Microseconds since `epoch` before which capture is suppressed.
    /// Written only by the playback path, read by the capture path.
    reengage_at_us: AtomicU64,
    active: AtomicBool,
    reengage_delay: Duration,
}

impl FrameGate {
    pub fn new(reengage_delay: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            reengage_at_us: AtomicU64::new(0),
            active: AtomicBool::new(true),
            reengage_delay,
        }
    }

    /// Decide whether a captured frame may be forwarded. Runs inside the
    /// real-time capture callback: two atomic ops, never blocks.
    pub fn offer(&self) -> bool {
        self.offer_at(Instant::now())
    }

    /// Re-arm suppression for the full re-engage delay. Called from the
    /// playback-serving path each time a chunk is handed to the device.
    pub fn notify(&self) {
        self.notify_at(Instant::now());
    }

    fn offer_at(&self, now: Instant) -> bool {
        let now_us = self.to_us(now);
        let forwarded = now_us > self.reengage_at_us.load(Ordering::Acquire);
        // Edge-triggered: log only on transitions, never per frame.
        if forwarded {
            if !self.active.swap(true, Ordering::Relaxed) {
                log::info!("Mic capture resumed");
            }
        } else if self.active.swap(false, Ordering::Relaxed) {
            log::info!("Mic capture suppressed");
        }
        forwarded
    }

    fn notify_at(&self, now: Instant) {
        let deadline = self.to_us(now) + self.reengage_delay.as_micros() as u64;
        self.reengage_at_us.store(deadline, Ordering::Release);
    }

    fn to_us(&self, t: Instant) -> u64 {
        t.saturating_duration_since(self.epoch).as_micros() as u64
    }

    #[cfg(test)]
    fn reengage_at(&self) -> u64 {
        self.reengage_at_us.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(500);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn forwards_once_deadline_passed() {
        let gate = FrameGate::new(DELAY);
        let t0 = gate.epoch;

        assert!(gate.offer_at(t0 + ms(1)));

        gate.notify_at(t0 + ms(10)); // suppressed until t0 + 510ms
        assert!(!gate.offer_at(t0 + ms(100)));
        assert!(!gate.offer_at(t0 + ms(510)));
        assert!(gate.offer_at(t0 + ms(511)));
    }

    #[test]
    fn deadline_is_now_plus_delay_and_monotonic() {
        let gate = FrameGate::new(DELAY);
        let t0 = gate.epoch;

        let mut prev = 0u64;
        for at in [5u64, 20, 20, 300, 1000] {
            gate.notify_at(t0 + ms(at));
            let deadline = gate.reengage_at();
            assert_eq!(deadline, (at + 500) * 1000);
            assert!(deadline >= prev);
            prev = deadline;
        }
    }

    #[test]
    fn interleaved_notify_and_offer_counts() {
        let gate = FrameGate::new(DELAY);
        let t0 = gate.epoch;

        // One notify at 250ms suppresses everything up to and including 750ms.
        gate.notify_at(t0 + ms(250));
        let forwarded = (1..=10)
            .filter(|i| gate.offer_at(t0 + ms(i * 100)))
            .count();
        // Of the frames at 100ms..1000ms only 800, 900 and 1000 pass.
        assert_eq!(forwarded, 3);
    }

    #[test]
    fn dropped_then_forwarded_flips_active_edge() {
        let gate = FrameGate::new(DELAY);
        let t0 = gate.epoch;

        gate.notify_at(t0 + ms(1));
        assert!(!gate.offer_at(t0 + ms(2)));
        assert!(!gate.active.load(Ordering::Relaxed));
        assert!(gate.offer_at(t0 + ms(600)));
        assert!(gate.active.load(Ordering::Relaxed));
    }
}
