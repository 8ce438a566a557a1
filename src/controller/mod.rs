//! The per-frame adaptation state machine.
//!
//! Every delivered frame becomes one tick. A tick sees the raw ambient
//! reading, the measured screen luma, and the backlight level read back
//! from the device, and does exactly one of: warm up the lux window,
//! notice a user adjustment and start the quiet-period countdown, tick
//! that countdown (committing the adjustment when it expires), or steer
//! the backlight toward the predicted level. No tick interleaves with
//! another; the compositor's frame delivery is the only clock.

use std::io::Error;

use crate::backlight::Backlight;
use crate::predictor::predict;
use crate::sensor::LuxWindow;
use crate::store::{DataFile, DataPoint, PreferenceStore};

/// Ticks a user adjustment must stay put before it becomes a data point.
///
/// Gives the user a quiet window to keep nudging the level before the
/// sample freezes.
pub const QUIET_PERIOD_TICKS: u8 = 15;

/// The backlight operations the controller needs; [`Backlight`] is the
/// real device, tests substitute a recorder.
pub trait BacklightDevice {
    /// Current level in percent.
    fn percent(&mut self) -> Result<u8, Error>;
    /// Stepped walk from `current` to `target`.
    fn transition(&mut self, current: u8, target: u8) -> Result<(), Error>;
}

impl BacklightDevice for Backlight {
    fn percent(&mut self) -> Result<u8, Error> {
        Backlight::percent(self)
    }

    fn transition(&mut self, current: u8, target: u8) -> Result<(), Error> {
        Backlight::transition(self, current, target)
    }
}

/// A user adjustment waiting out its quiet period.
#[derive(Debug, Clone, Copy)]
struct PendingChange {
    lux: u32,
    luma: u8,
    backlight: u8,
}

/// The adaptation controller.
pub struct AdaptationController<B> {
    store: PreferenceStore,
    data_file: DataFile,
    backlight: B,
    window: LuxWindow,
    backlight_last: u8,
    pending: Option<PendingChange>,
    countdown: u8,
}

impl<B: BacklightDevice> AdaptationController<B> {
    /// Assemble the controller around a (possibly pre-loaded) store.
    pub fn new(store: PreferenceStore, data_file: DataFile, backlight: B) -> Self {
        Self {
            store,
            data_file,
            backlight,
            window: LuxWindow::new(),
            backlight_last: 0,
            pending: None,
            countdown: 0,
        }
    }

    /// Run one tick with the current raw lux reading and measured luma.
    ///
    /// Per-tick failures never escape: device read failures make the tick
    /// a no-op, write failures are logged and leave the level where the
    /// device says it is, and the loop carries on either way.
    pub fn tick(&mut self, raw_lux: u32, luma: u8) {
        let backlight = match self.backlight.percent() {
            Ok(percent) => percent,
            Err(e) => {
                log::warn!("backlight read failed, skipping tick: {e}");
                return;
            }
        };

        // Warm-up: keep tracking the device so ambient-driven drift before
        // the window fills is not mistaken for a user change.
        if !self.window.is_initialized() {
            self.backlight_last = backlight;
            self.window.push(raw_lux);
            if self.window.is_initialized() {
                log::debug!("lux window warmed up, adaptation active");
            }
            return;
        }

        self.window.push(raw_lux);
        let Some(lux) = self.window.smoothed() else {
            return;
        };
        log::debug!(
            "tick: lux={lux} luma={luma} backlight={backlight} countdown={}",
            self.countdown
        );

        let user_changed = self.backlight_last != backlight;
        if user_changed || (self.store.is_empty() && self.countdown == 0) {
            // A fresh adjustment (or a bootstrap with nothing learned yet):
            // capture it and start the quiet period.
            self.pending = Some(PendingChange {
                lux,
                luma,
                backlight,
            });
            self.countdown = QUIET_PERIOD_TICKS;
            self.backlight_last = backlight;
            return;
        }

        if self.countdown == 0 {
            if let Some(target) = predict(&self.store, lux, luma) {
                if target != backlight {
                    log::info!("adjusting backlight {backlight}% -> {target}%");
                    match self.backlight.transition(backlight, target) {
                        Ok(()) => {
                            self.backlight_last = target;
                            return;
                        }
                        Err(e) => {
                            log::warn!("backlight write failed: {e}");
                            // A failed walk may have stranded the device
                            // between the two levels; resync from the
                            // device so the stranded value is not later
                            // taken for a user adjustment.
                            self.backlight_last =
                                self.backlight.percent().unwrap_or(backlight);
                            return;
                        }
                    }
                }
            }
        } else if self.countdown > 1 {
            self.countdown -= 1;
        } else {
            self.countdown = 0;
            self.commit_pending();
        }

        self.backlight_last = backlight;
    }

    fn commit_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let point = DataPoint {
            lux: pending.lux,
            luma: pending.luma,
            backlight: pending.backlight,
        };
        log::info!(
            "learned: {}% backlight at {} lux, {}% luma",
            point.backlight,
            point.lux,
            point.luma
        );
        self.store.add(point);
        if let Err(e) = self.data_file.persist(&self.store) {
            log::error!("failed to persist preferences: {e}");
        }
    }

    /// The learned preference set (primarily for inspection in tests).
    #[must_use]
    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::io::Error;

    use super::{AdaptationController, BacklightDevice, QUIET_PERIOD_TICKS};
    use crate::sensor::SAMPLE_WINDOW;
    use crate::store::{DataFile, DataPoint, PreferenceStore};

    /// In-memory device that records every transition request.
    struct FakeBacklight {
        level: u8,
        transitions: Vec<(u8, u8)>,
        fail_next_transition: bool,
    }

    impl FakeBacklight {
        fn at(level: u8) -> Self {
            Self {
                level,
                transitions: Vec::new(),
                fail_next_transition: false,
            }
        }
    }

    impl BacklightDevice for FakeBacklight {
        fn percent(&mut self) -> Result<u8, Error> {
            Ok(self.level)
        }

        fn transition(&mut self, current: u8, target: u8) -> Result<(), Error> {
            self.transitions.push((current, target));
            if self.fail_next_transition {
                self.fail_next_transition = false;
                // Die partway, leaving the device between the two levels.
                self.level = current / 2 + target / 2;
                return Err(Error::other("device write failed"));
            }
            self.level = target;
            Ok(())
        }
    }

    struct Fixture {
        controller: AdaptationController<FakeBacklight>,
        _dir: tempfile::TempDir,
        data_path: std::path::PathBuf,
    }

    fn fixture(points: &[(u32, u8, u8)], level: u8) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data");
        let data_file = DataFile::open_at(&data_path).unwrap();

        let mut store = PreferenceStore::new();
        for &(lux, luma, backlight) in points {
            store.restore(DataPoint {
                lux,
                luma,
                backlight,
            });
        }

        Fixture {
            controller: AdaptationController::new(store, data_file, FakeBacklight::at(level)),
            _dir: dir,
            data_path,
        }
    }

    fn warm_up(controller: &mut AdaptationController<FakeBacklight>, lux: u32, luma: u8) {
        for _ in 0..SAMPLE_WINDOW {
            controller.tick(lux, luma);
        }
    }

    #[test]
    fn no_writes_before_window_initializes() {
        let mut f = fixture(&[(100, 50, 90)], 50);

        for _ in 0..SAMPLE_WINDOW {
            f.controller.tick(100, 50);
        }
        assert!(f.controller.backlight.transitions.is_empty());
    }

    #[test]
    fn empty_store_starts_quiet_period_not_adjustment() {
        let mut f = fixture(&[], 50);
        warm_up(&mut f.controller, 100, 40);

        // First post-warm-up tick: bootstrap counts as a user change.
        f.controller.tick(100, 40);
        assert_eq!(f.controller.countdown, QUIET_PERIOD_TICKS);
        assert!(f.controller.backlight.transitions.is_empty());
        assert!(f.controller.store().is_empty());
    }

    #[test]
    fn stable_quiet_period_commits_and_persists() {
        let mut f = fixture(&[], 50);
        warm_up(&mut f.controller, 100, 40);
        f.controller.tick(100, 40); // arms the countdown

        for _ in 0..QUIET_PERIOD_TICKS {
            f.controller.tick(100, 40);
        }

        assert_eq!(
            f.controller.store().points(),
            &[DataPoint {
                lux: 100,
                luma: 40,
                backlight: 50
            }]
        );
        assert!(f.controller.backlight.transitions.is_empty());
        assert_eq!(
            std::fs::read_to_string(&f.data_path).unwrap(),
            "100 40 50\n"
        );
    }

    #[test]
    fn commit_happens_exactly_on_the_last_quiet_tick() {
        let mut f = fixture(&[], 50);
        warm_up(&mut f.controller, 100, 40);
        f.controller.tick(100, 40);

        for _ in 0..QUIET_PERIOD_TICKS - 1 {
            f.controller.tick(100, 40);
            assert!(f.controller.store().is_empty());
        }
        f.controller.tick(100, 40);
        assert_eq!(f.controller.store().points().len(), 1);
    }

    #[test]
    fn user_adjustment_restarts_the_countdown() {
        let mut f = fixture(&[], 50);
        warm_up(&mut f.controller, 100, 40);
        f.controller.tick(100, 40);
        f.controller.tick(100, 40);
        f.controller.tick(100, 40);

        // The user keeps adjusting mid-countdown.
        f.controller.backlight.level = 60;
        f.controller.tick(100, 40);
        assert_eq!(f.controller.countdown, QUIET_PERIOD_TICKS);

        for _ in 0..QUIET_PERIOD_TICKS {
            f.controller.tick(100, 40);
        }
        assert_eq!(
            f.controller.store().points(),
            &[DataPoint {
                lux: 100,
                luma: 40,
                backlight: 60
            }]
        );
    }

    #[test]
    fn prediction_drives_the_device() {
        let mut f = fixture(&[(100, 40, 80)], 50);
        warm_up(&mut f.controller, 100, 40);

        f.controller.tick(100, 40);
        assert_eq!(f.controller.backlight.transitions, vec![(50, 80)]);
        assert_eq!(f.controller.backlight.level, 80);

        // Once at the predicted level the controller stays quiet.
        f.controller.tick(100, 40);
        assert_eq!(f.controller.backlight.transitions.len(), 1);
    }

    #[test]
    fn failed_transition_resyncs_instead_of_learning_the_stranded_level() {
        let mut f = fixture(&[(100, 40, 80)], 50);
        warm_up(&mut f.controller, 100, 40);

        // The walk dies partway, stranding the device between 50 and 80.
        f.controller.backlight.fail_next_transition = true;
        f.controller.tick(100, 40);
        let stranded = f.controller.backlight.level;
        assert_ne!(stranded, 80);

        // The stranded level must not register as a user adjustment; the
        // next tick just retries the walk from where the device really is.
        f.controller.tick(100, 40);
        assert_eq!(f.controller.countdown, 0);
        assert!(f.controller.pending.is_none());
        assert_eq!(
            f.controller.backlight.transitions.last(),
            Some(&(stranded, 80))
        );
        assert_eq!(f.controller.backlight.level, 80);
    }

    #[test]
    fn own_adjustment_is_not_mistaken_for_a_user_change() {
        let mut f = fixture(&[(100, 40, 80)], 50);
        warm_up(&mut f.controller, 100, 40);

        f.controller.tick(100, 40); // drives 50 -> 80
        f.controller.tick(100, 40);
        assert_eq!(f.controller.countdown, 0);
        assert!(f.controller.pending.is_none());
    }

    #[test]
    fn commit_prunes_superseded_points() {
        let mut f = fixture(&[(100, 60, 70)], 70);
        warm_up(&mut f.controller, 200, 60);
        f.controller.tick(200, 60); // level matches history: no action

        // The user dims to 40 in a brighter room with the same content.
        f.controller.backlight.level = 40;
        f.controller.tick(200, 60);
        assert_eq!(f.controller.countdown, QUIET_PERIOD_TICKS);
        for _ in 0..QUIET_PERIOD_TICKS {
            f.controller.tick(200, 60);
        }

        // The old point (100, 60, 70) contradicts the new (200, 60, 40).
        assert_eq!(
            f.controller.store().points(),
            &[DataPoint {
                lux: 200,
                luma: 60,
                backlight: 40
            }]
        );
    }
}
