//! Step planning for backlight transitions.
//!
//! A transition walks from the current percentage to the target in steps of
//! exactly one, so the device never jumps, and paces each write so the
//! whole walk takes roughly 300 ms regardless of distance. The per-step
//! pause comes from integer division, so wide jumps get short pauses and
//! the loop leans on write latency alone.

use std::time::Duration;

/// Total time a stepped transition should take, spread over its steps.
const TRANSITION_MS: u64 = 300;

/// The strictly monotone sequence of percent levels to write, from one
/// step past `current` up to and including `target`.
pub fn step_plan(current: u8, target: u8) -> impl Iterator<Item = u8> {
    let ascending = current <= target;
    let span = if ascending {
        current + 1..=target
    } else {
        target..=current - 1
    };

    let mut steps: Vec<u8> = span.collect();
    if !ascending {
        steps.reverse();
    }
    steps.into_iter()
}

/// Pause between consecutive writes: `300 / |target - current|` ms.
#[must_use]
pub fn step_delay(current: u8, target: u8) -> Duration {
    let distance = u64::from(current.abs_diff(target));
    if distance == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(TRANSITION_MS / distance)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{step_delay, step_plan};

    #[test]
    fn ascending_plan_is_consecutive() {
        let steps: Vec<u8> = step_plan(20, 24).collect();
        assert_eq!(steps, vec![21, 22, 23, 24]);
    }

    #[test]
    fn descending_plan_is_consecutive() {
        let steps: Vec<u8> = step_plan(24, 20).collect();
        assert_eq!(steps, vec![23, 22, 21, 20]);
    }

    #[test]
    fn equal_endpoints_plan_nothing() {
        assert_eq!(step_plan(50, 50).count(), 0);
    }

    #[test]
    fn plans_are_strictly_monotone_unit_steps() {
        for (current, target) in [(1u8, 100u8), (100, 1), (42, 43), (99, 3)] {
            let steps: Vec<u8> = step_plan(current, target).collect();
            assert_eq!(steps.len(), usize::from(current.abs_diff(target)));
            assert_eq!(*steps.last().unwrap(), target);

            let mut previous = current;
            for step in steps {
                assert_eq!(step.abs_diff(previous), 1);
                previous = step;
            }
        }
    }

    #[test]
    fn pacing_spreads_the_transition() {
        // 4 steps over ~300 ms: 75 ms apart.
        assert_eq!(step_delay(20, 24), Duration::from_millis(75));
        // 3 steps: the division truncates.
        assert_eq!(step_delay(0, 3), Duration::from_millis(100));
        assert_eq!(step_delay(1, 100), Duration::from_millis(3));
    }
}
