// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints; thresholds and
// allowances live in Cargo.toml.

// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]

//! Adaptive display backlight daemon for wlroots compositors.
//!
//! Lumo couples three observations (ambient illuminance from an IIO light
//! sensor, the perceptual brightness of the frame currently on screen, and
//! the user's own past backlight choices) and converges the backlight to
//! the level the user has already picked in comparable conditions. When no
//! preference has been recorded for a situation, lumo makes no unsolicited
//! change; when the user adjusts the backlight, the adjustment is recorded
//! after a quiet period and used from then on.
//!
//! # Key entry points
//!
//! - [`daemon::run`] - connect to the compositor and run the control loop
//! - [`controller::AdaptationController`] - the per-frame decision machine
//! - [`store::PreferenceStore`] - the learned `(lux, luma, backlight)` set
//! - [`gpu::FrameReducer`] - GPU mip-chain reduction of a frame to one pixel
//!
//! # Architecture
//!
//! The compositor's export-dmabuf protocol delivers each displayed frame as
//! a set of GPU buffer handles. Plane 0 is imported into Vulkan without any
//! CPU copy and collapsed to a single average pixel through a manual mipmap
//! cascade; that pixel becomes a perceptual luma percentage. Together with
//! the smoothed ambient lux and the current backlight level, the luma feeds
//! a single-threaded state machine that either records a user adjustment or
//! steers the backlight toward the value predicted from nearby recorded
//! preferences.

pub mod backlight;
pub mod capture;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod gpu;
pub mod luma;
pub mod predictor;
pub mod sensor;
pub mod signals;
pub mod store;

pub use daemon::run;
pub use error::LumoError;
