//! Frame capture through the compositor's export-dmabuf protocol.
//!
//! Each capture is delivered as a burst of events: one `frame` announcing
//! dimensions and plane count, one `object` per plane carrying a GPU buffer
//! file descriptor, then either `ready` or `cancel`. [`CaptureState`] turns
//! those callbacks into pure transitions so the session code only has to
//! pump the event queue and inspect the outcome.

mod session;

pub use session::CaptureSession;

use std::fmt;
use std::os::fd::OwnedFd;

/// One plane of a captured frame.
///
/// The descriptor is owned: dropping the object (with the rest of its
/// [`Frame`]) closes it and releases the compositor's buffer reference.
#[derive(Debug)]
pub struct FrameObject {
    /// GPU buffer file descriptor shared by the compositor.
    pub fd: OwnedFd,
    /// Total size of the underlying buffer in bytes.
    pub size: u32,
    /// Starting offset of this plane within the buffer.
    pub offset: u32,
    /// Row pitch of this plane in bytes.
    pub stride: u32,
    /// Which image plane this object backs.
    pub plane_index: u32,
}

/// A fully assembled captured frame.
#[derive(Debug)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    objects: Vec<FrameObject>,
}

impl Frame {
    /// The object backing plane 0, which carries the color data the
    /// reducer consumes.
    #[must_use]
    pub fn primary_object(&self) -> Option<&FrameObject> {
        self.objects.iter().find(|object| object.plane_index == 0)
    }

    /// Number of plane objects delivered with this frame.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// Why the compositor abandoned a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    /// Transient condition; the next capture request may well succeed.
    Temporary,
    /// The capture source is gone for good.
    Permanent,
}

/// Assembly state of the capture currently in flight.
#[derive(Debug, Default)]
pub enum CaptureState {
    /// No capture requested.
    #[default]
    Idle,
    /// Capture requested, no events seen yet.
    AwaitingStart,
    /// Frame announced; waiting for the remaining plane objects and the
    /// ready event.
    Collecting {
        /// The frame being assembled.
        frame: Frame,
        /// Plane objects still to be delivered.
        remaining: u32,
    },
    /// Frame complete and usable.
    Ready(Frame),
    /// Capture abandoned by the compositor.
    Cancelled(CancelKind),
}

impl CaptureState {
    /// Arm the state machine for a freshly requested capture.
    pub fn begin(&mut self) {
        *self = Self::AwaitingStart;
    }

    /// Whether the capture is still waiting for events.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::AwaitingStart | Self::Collecting { .. })
    }

    /// The `frame` event: dimensions and plane count.
    pub fn on_start(&mut self, width: u32, height: u32, num_objects: u32) {
        match self {
            Self::AwaitingStart => {
                *self = Self::Collecting {
                    frame: Frame {
                        width,
                        height,
                        objects: Vec::with_capacity(num_objects as usize),
                    },
                    remaining: num_objects,
                };
            }
            _ => self.protocol_error("frame event outside a requested capture"),
        }
    }

    /// An `object` event: one plane descriptor.
    pub fn on_object(&mut self, fd: OwnedFd, size: u32, offset: u32, stride: u32, plane_index: u32) {
        match self {
            Self::Collecting { frame, remaining } if *remaining > 0 => {
                frame.objects.push(FrameObject {
                    fd,
                    size,
                    offset,
                    stride,
                    plane_index,
                });
                *remaining -= 1;
            }
            _ => self.protocol_error("unexpected object event"),
        }
    }

    /// The `ready` event: the frame is complete.
    pub fn on_ready(&mut self) {
        match std::mem::take(self) {
            Self::Collecting { frame, remaining: 0 } => *self = Self::Ready(frame),
            _ => self.protocol_error("ready before all objects arrived"),
        }
    }

    /// The `cancel` event.
    pub fn on_cancel(&mut self, kind: CancelKind) {
        *self = Self::Cancelled(kind);
    }

    /// Consume the outcome of a finished capture, resetting to idle.
    ///
    /// `None` while the capture is still pending.
    pub fn take_outcome(&mut self) -> Option<Result<Frame, CancelKind>> {
        match std::mem::take(self) {
            Self::Ready(frame) => Some(Ok(frame)),
            Self::Cancelled(kind) => Some(Err(kind)),
            pending @ (Self::AwaitingStart | Self::Collecting { .. }) => {
                *self = pending;
                None
            }
            Self::Idle => None,
        }
    }

    fn protocol_error(&mut self, what: &str) {
        // A compositor this far off-protocol gets the same treatment as a
        // temporary cancel: drop the frame and rearm.
        log::warn!("capture protocol violation: {what}");
        *self = Self::Cancelled(CancelKind::Temporary);
    }
}

/// Compositor session failures.
#[derive(Debug)]
pub enum CaptureError {
    /// Could not connect to the Wayland display.
    Connect(wayland_client::ConnectError),
    /// Event dispatch failed mid-session.
    Dispatch(wayland_client::DispatchError),
    /// The compositor does not advertise the export-dmabuf protocol.
    NoDmabufManager,
    /// No output with known dimensions was advertised.
    NoOutput,
    /// The compositor cancelled a capture permanently.
    CancelledPermanently,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "cannot connect to compositor: {e}"),
            Self::Dispatch(e) => write!(f, "event dispatch failed: {e}"),
            Self::NoDmabufManager => {
                write!(f, "compositor does not support zwlr_export_dmabuf_manager_v1")
            }
            Self::NoOutput => write!(f, "no usable output advertised"),
            Self::CancelledPermanently => {
                write!(f, "compositor cancelled the capture permanently")
            }
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) => Some(e),
            Self::Dispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wayland_client::ConnectError> for CaptureError {
    fn from(e: wayland_client::ConnectError) -> Self {
        Self::Connect(e)
    }
}

impl From<wayland_client::DispatchError> for CaptureError {
    fn from(e: wayland_client::DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::OwnedFd;

    use super::{CancelKind, CaptureState};

    fn fake_fd() -> OwnedFd {
        OwnedFd::from(tempfile::tempfile().unwrap())
    }

    #[test]
    fn full_capture_assembles_a_frame() {
        let mut state = CaptureState::default();
        state.begin();
        assert!(state.is_pending());

        state.on_start(1920, 1080, 2);
        state.on_object(fake_fd(), 8_294_400, 0, 7680, 0);
        state.on_object(fake_fd(), 8_294_400, 0, 7680, 1);
        assert!(state.is_pending());

        state.on_ready();
        let frame = state.take_outcome().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (1920, 1080));
        assert_eq!(frame.object_count(), 2);
        assert_eq!(frame.primary_object().unwrap().plane_index, 0);
    }

    #[test]
    fn cancel_reports_its_kind() {
        let mut state = CaptureState::default();
        state.begin();
        state.on_start(640, 480, 1);
        state.on_cancel(CancelKind::Permanent);

        assert_eq!(state.take_outcome().unwrap().unwrap_err(), CancelKind::Permanent);
    }

    #[test]
    fn no_outcome_while_pending() {
        let mut state = CaptureState::default();
        state.begin();
        assert!(state.take_outcome().is_none());
        assert!(state.is_pending());

        state.on_start(640, 480, 1);
        assert!(state.take_outcome().is_none());
        assert!(state.is_pending());
    }

    #[test]
    fn early_ready_is_a_protocol_violation() {
        let mut state = CaptureState::default();
        state.begin();
        state.on_start(640, 480, 2);
        state.on_object(fake_fd(), 1024, 0, 256, 0);

        state.on_ready();
        assert_eq!(state.take_outcome().unwrap().unwrap_err(), CancelKind::Temporary);
    }

    #[test]
    fn events_without_a_capture_are_violations() {
        let mut state = CaptureState::default();
        state.on_start(640, 480, 1);
        assert_eq!(state.take_outcome().unwrap().unwrap_err(), CancelKind::Temporary);
    }

    #[test]
    fn take_outcome_resets_to_idle() {
        let mut state = CaptureState::default();
        state.begin();
        state.on_start(1, 1, 0);
        state.on_ready();

        assert!(state.take_outcome().is_some());
        assert!(state.take_outcome().is_none());
        assert!(!state.is_pending());
    }
}
