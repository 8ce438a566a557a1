//! Startup wiring and the frame-driven control loop.

use std::time::Duration;

use crate::backlight::Backlight;
use crate::capture::CaptureSession;
use crate::controller::AdaptationController;
use crate::error::LumoError;
use crate::gpu::{FrameReducer, GpuContext};
use crate::luma::luma_percent;
use crate::sensor::AmbientLightSensor;
use crate::signals;
use crate::store::{DataFile, PreferenceStore};

/// Pause between captures.
const TICK_PAUSE: Duration = Duration::from_millis(100);

/// Bring every subsystem up and run the control loop until an interrupt
/// or a permanent capture failure.
///
/// Missing devices, a dead compositor connection, and Vulkan bring-up
/// failures are all fatal here, before the loop starts. A load failure of
/// the preference file is not: it is logged and the daemon starts out
/// with an empty store.
pub fn run() -> Result<(), LumoError> {
    signals::install()?;

    let backlight = Backlight::discover()?;
    let mut sensor = AmbientLightSensor::discover()?;

    let mut store = PreferenceStore::new();
    let mut data_file = DataFile::open()?;
    if let Err(e) = data_file.load(&mut store) {
        log::warn!("could not load preferences, starting empty: {e}");
        store = PreferenceStore::new();
    }
    log::info!("loaded {} preference points", store.points().len());

    let mut session = CaptureSession::connect()?;
    let mut reducer = FrameReducer::new(GpuContext::new()?);
    let mut controller = AdaptationController::new(store, data_file, backlight);

    let (width, height) = session.target_size();
    log::info!("adapting to {width}x{height} frames");

    loop {
        if signals::quit_requested() {
            break;
        }

        let frame = match session.capture_frame() {
            Ok(Some(frame)) => frame,
            // Temporary cancel: rearm immediately.
            Ok(None) => continue,
            // Permanent cancel or a dead connection: both end the run.
            Err(e) => return Err(e.into()),
        };

        let luma = match reducer.reduce(&frame) {
            Ok((r, g, b)) => Some(luma_percent(r, g, b)),
            Err(e) => {
                log::warn!("frame reduction failed: {e}");
                None
            }
        };
        // Frame handles go back to the compositor before anything slow.
        drop(frame);

        if signals::quit_requested() {
            break;
        }

        if let Some(luma) = luma {
            match sensor.read_lux() {
                Ok(raw_lux) => controller.tick(raw_lux, luma),
                Err(e) => log::warn!("lux read failed, skipping tick: {e}"),
            }
        }

        std::thread::sleep(TICK_PAUSE);
    }

    log::info!("interrupted, shutting down");
    Ok(())
}
