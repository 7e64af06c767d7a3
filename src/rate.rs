// src/rate.rs
//
// Rate-control policies: given the next operation, decide how long to wait
// before releasing it. State is owned by the pace stage alone, so neither
// policy needs any synchronization.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::types::Operation;

/// Which pacing policy a replay should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Release a fixed number of operations per second.
    Fixed,
    /// Reproduce the original relative timing, scaled by a multiplier.
    Relative,
}

/// A pacing policy.
///
/// `wait_time` must be called exactly once per operation, in stream order.
/// Asking twice would double-count the fixed policy's release counter and
/// mis-pace the relative policy.
pub trait RateController: Send {
    /// How long to wait before applying `op`.
    fn wait_time(&mut self, op: &Operation) -> Duration;
}

/// Build the controller for a CLI-selected mode and speed parameter.
///
/// In fixed mode `speed` is operations per second and must be positive. In
/// relative mode it is a multiplier over the original timing; `0` and `-1`
/// are the "as fast as possible" sentinels.
pub fn controller_for(mode: ReplayMode, speed: f64) -> Result<Box<dyn RateController>> {
    match mode {
        ReplayMode::Fixed => Ok(Box::new(FixedRate::new(speed)?)),
        ReplayMode::Relative => Ok(Box::new(RelativeRate::new(speed))),
    }
}

/// Releases operations at a fixed target throughput, regardless of their
/// captured timestamps.
#[derive(Debug)]
pub struct FixedRate {
    ops_per_second: f64,
    released: u64,
    started: Instant,
}

impl FixedRate {
    pub fn new(ops_per_second: f64) -> Result<Self> {
        if !(ops_per_second > 0.0) {
            bail!("operations per second must be positive, got {ops_per_second}");
        }
        Ok(Self {
            ops_per_second,
            released: 0,
            started: Instant::now(),
        })
    }
}

impl RateController for FixedRate {
    fn wait_time(&mut self, _op: &Operation) -> Duration {
        let elapsed = self.started.elapsed().as_secs_f64();
        // The n-th operation (0-indexed) is due n/R seconds after start.
        let scheduled = self.released as f64 / self.ops_per_second;
        self.released += 1;
        clamp_to_millis(scheduled - elapsed)
    }
}

/// Replays operations at a multiple of the speed they were captured at.
///
/// The log-time origin latches from the first operation seen, not from the
/// start of the stream, so a replay beginning mid-stream stays internally
/// consistent. Operations sharing a wall-clock second release back to back;
/// sub-second ordering within a second is not reproduced.
#[derive(Debug)]
pub struct RelativeRate {
    speed_multiplier: f64,
    log_origin: Option<u32>,
    started: Instant,
}

impl RelativeRate {
    pub fn new(speed: f64) -> Self {
        // -1 and 0 both mean "as fast as possible".
        let speed_multiplier = if speed == -1.0 || speed == 0.0 {
            f64::INFINITY
        } else {
            speed
        };
        Self {
            speed_multiplier,
            log_origin: None,
            started: Instant::now(),
        }
    }
}

impl RateController for RelativeRate {
    fn wait_time(&mut self, op: &Operation) -> Duration {
        let event = op.event_seconds();
        let origin = *self.log_origin.get_or_insert(event);

        let relative = f64::from(event) - f64::from(origin);
        let scheduled = relative / self.speed_multiplier;
        let elapsed = self.started.elapsed().as_secs_f64();
        clamp_to_millis(scheduled - elapsed)
    }
}

// Truncating to whole milliseconds clamps sub-millisecond waits to zero and
// sidesteps float rounding at the nanosecond scale.
fn clamp_to_millis(seconds: f64) -> Duration {
    Duration::from_millis((seconds.max(0.0) * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Timestamp};
    use std::thread::sleep;

    fn op_at(secs: u32) -> Operation {
        Operation::from_document(doc! {
            "ts": Timestamp { time: secs, increment: 0 },
            "h": 1000i64,
            "v": 2,
            "op": "n",
            "ns": "",
            "o": { "message": "nop" },
        })
        .unwrap()
    }

    #[test]
    fn fixed_rate_paces_back_to_back_calls() {
        let op = op_at(0);
        let mut controller = FixedRate::new(10.0).unwrap();

        // First call is free.
        assert_eq!(controller.wait_time(&op), Duration::ZERO);

        // The second is due 100ms in; we have burned almost none of that.
        let wait = controller.wait_time(&op);
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100));

        // After 200ms of real time one more is already overdue...
        sleep(Duration::from_millis(200));
        assert_eq!(controller.wait_time(&op), Duration::ZERO);

        // ...but not two more.
        let wait = controller.wait_time(&op);
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100));
    }

    #[test]
    fn fixed_rate_rejects_nonpositive_rates() {
        assert!(FixedRate::new(0.0).is_err());
        assert!(FixedRate::new(-3.0).is_err());
    }

    #[test]
    fn relative_rate_scales_log_time() {
        let start = 1_400_000_000u32;
        let mut controller = RelativeRate::new(20.0);

        // Origin latches on the first call, which therefore waits nothing.
        assert_eq!(controller.wait_time(&op_at(start)), Duration::ZERO);

        // The next entry is 3 log-seconds later; at 20x that is 150ms out,
        // and ~100ms of wall time has already passed.
        sleep(Duration::from_millis(100));
        let wait = controller.wait_time(&op_at(start + 3));
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(100));
    }

    #[test]
    fn relative_rate_same_second_releases_back_to_back() {
        let mut controller = RelativeRate::new(1.0);
        assert_eq!(controller.wait_time(&op_at(100)), Duration::ZERO);
        assert_eq!(controller.wait_time(&op_at(100)), Duration::ZERO);
        assert_eq!(controller.wait_time(&op_at(100)), Duration::ZERO);
    }

    #[test]
    fn relative_rate_sentinels_disable_pacing() {
        for sentinel in [0.0, -1.0] {
            let mut controller = RelativeRate::new(sentinel);
            assert_eq!(controller.wait_time(&op_at(0)), Duration::ZERO);
            // An hour of log time, released immediately.
            assert_eq!(controller.wait_time(&op_at(3600)), Duration::ZERO);
        }
    }

    #[test]
    fn relative_rate_tolerates_backward_timestamps() {
        let mut controller = RelativeRate::new(1.0);
        assert_eq!(controller.wait_time(&op_at(100)), Duration::ZERO);
        assert_eq!(controller.wait_time(&op_at(90)), Duration::ZERO);
    }

    #[test]
    fn controller_for_checks_fixed_speed() {
        assert!(controller_for(ReplayMode::Fixed, 0.0).is_err());
        assert!(controller_for(ReplayMode::Fixed, 100.0).is_ok());
        assert!(controller_for(ReplayMode::Relative, 0.0).is_ok());
    }
}
