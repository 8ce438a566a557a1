//! Wayland session: registry handling, output tracking, and the
//! export-dmabuf capture handshake.

use wayland_client::protocol::{wl_output, wl_registry};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols_wlr::export_dmabuf::v1::client::zwlr_export_dmabuf_frame_v1::{
    self, CancelReason, ZwlrExportDmabufFrameV1,
};
use wayland_protocols_wlr::export_dmabuf::v1::client::zwlr_export_dmabuf_manager_v1::{
    self, ZwlrExportDmabufManagerV1,
};

use crate::capture::{CancelKind, CaptureError, CaptureState, Frame};

/// A tracked compositor output.
#[derive(Debug)]
struct OutputInfo {
    registry_name: u32,
    output: wl_output::WlOutput,
    width: u32,
    height: u32,
}

/// Event-side state: everything the dispatch impls touch.
#[derive(Default)]
struct SessionState {
    outputs: Vec<OutputInfo>,
    manager: Option<ZwlrExportDmabufManagerV1>,
    capture: CaptureState,
}

/// An established capture session against one output.
///
/// Holds the connection, the event queue, and the chosen target output;
/// [`CaptureSession::capture_frame`] performs one full capture handshake.
pub struct CaptureSession {
    _conn: Connection,
    queue: EventQueue<SessionState>,
    qh: QueueHandle<SessionState>,
    state: SessionState,
    manager: ZwlrExportDmabufManagerV1,
    target: wl_output::WlOutput,
    width: u32,
    height: u32,
}

impl CaptureSession {
    /// Connect to the default display, enumerate globals, and pick the
    /// capture target.
    ///
    /// The target is the last advertised output; driving several outputs
    /// independently is out of scope.
    pub fn connect() -> Result<Self, CaptureError> {
        let conn = Connection::connect_to_env()?;
        let mut queue = conn.new_event_queue();
        let qh = queue.handle();

        let display = conn.display();
        let _registry = display.get_registry(&qh, ());

        let mut state = SessionState::default();
        // First round-trip binds the globals, second collects the mode
        // events of the outputs bound during the first.
        let _ = queue.roundtrip(&mut state)?;
        let _ = queue.roundtrip(&mut state)?;

        let manager = state.manager.clone().ok_or(CaptureError::NoDmabufManager)?;
        let target = state
            .outputs
            .iter()
            .rev()
            .find(|info| info.width > 0 && info.height > 0)
            .ok_or(CaptureError::NoOutput)?;

        log::info!(
            "capturing output {} ({}x{})",
            target.registry_name,
            target.width,
            target.height
        );

        let (target, width, height) = (target.output.clone(), target.width, target.height);
        Ok(Self {
            _conn: conn,
            queue,
            qh,
            state,
            manager,
            target,
            width,
            height,
        })
    }

    /// Advertised dimensions of the capture target.
    #[must_use]
    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Run one capture handshake to completion.
    ///
    /// `Ok(Some(frame))` on success, `Ok(None)` when the compositor
    /// cancelled transiently (caller simply rearms), `Err` on a permanent
    /// cancel or a dead connection.
    pub fn capture_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let frame_proxy = self
            .manager
            .capture_output(0, &self.target, &self.qh, ());
        self.state.capture.begin();

        while self.state.capture.is_pending() {
            let _ = self.queue.blocking_dispatch(&mut self.state)?;
        }
        frame_proxy.destroy();

        match self.state.capture.take_outcome() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(CancelKind::Temporary)) => {
                log::debug!("capture cancelled transiently, rearming");
                Ok(None)
            }
            Some(Err(CancelKind::Permanent)) => Err(CaptureError::CancelledPermanently),
            // Unreachable: the dispatch loop above only exits once the
            // state machine has an outcome.
            None => Ok(None),
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for SessionState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                if interface == wl_output::WlOutput::interface().name {
                    let output =
                        registry.bind::<wl_output::WlOutput, _, _>(name, version.min(4), qh, name);
                    state.outputs.push(OutputInfo {
                        registry_name: name,
                        output,
                        width: 0,
                        height: 0,
                    });
                } else if interface == ZwlrExportDmabufManagerV1::interface().name {
                    state.manager =
                        Some(registry.bind::<ZwlrExportDmabufManagerV1, _, _>(name, 1, qh, ()));
                }
            }
            wl_registry::Event::GlobalRemove { name } => {
                state.outputs.retain(|info| info.registry_name != name);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, u32> for SessionState {
    fn event(
        state: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        registry_name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_output::Event::Mode {
            flags: WEnum::Value(flags),
            width,
            height,
            ..
        } = event
        {
            if flags.contains(wl_output::Mode::Current) {
                if let Some(info) = state
                    .outputs
                    .iter_mut()
                    .find(|info| info.registry_name == *registry_name)
                {
                    info.width = width.max(0) as u32;
                    info.height = height.max(0) as u32;
                }
            }
        }
    }
}

impl Dispatch<ZwlrExportDmabufManagerV1, ()> for SessionState {
    fn event(
        _: &mut Self,
        _: &ZwlrExportDmabufManagerV1,
        _: zwlr_export_dmabuf_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // The manager has no events.
    }
}

impl Dispatch<ZwlrExportDmabufFrameV1, ()> for SessionState {
    fn event(
        state: &mut Self,
        _: &ZwlrExportDmabufFrameV1,
        event: zwlr_export_dmabuf_frame_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_export_dmabuf_frame_v1::Event::Frame {
                width,
                height,
                num_objects,
                ..
            } => state.capture.on_start(width, height, num_objects),
            zwlr_export_dmabuf_frame_v1::Event::Object {
                fd,
                size,
                offset,
                stride,
                plane_index,
                ..
            } => state.capture.on_object(fd, size, offset, stride, plane_index),
            zwlr_export_dmabuf_frame_v1::Event::Ready { .. } => state.capture.on_ready(),
            zwlr_export_dmabuf_frame_v1::Event::Cancel { reason } => {
                let kind = match reason {
                    WEnum::Value(CancelReason::Permanent) => CancelKind::Permanent,
                    _ => CancelKind::Temporary,
                };
                state.capture.on_cancel(kind);
            }
            _ => {}
        }
    }
}
