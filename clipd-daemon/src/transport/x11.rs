//! X11 transport backend
//!
//! A plain `RustConnection` with one never-mapped utility window that
//! acts as selection owner and conversion requestor. Timed waits poll
//! the connection socket so signals interrupt the daemon loop cleanly.

use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, PropMode, SelectionNotifyEvent,
    WindowClass, SELECTION_NOTIFY_EVENT,
};
use x11rb::protocol::Event as X11Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use clipd_utils::{ClipdError, Result};

use super::{Atom, Event, SelectionRequest, Timestamp, Transport, WindowId};

pub struct X11Transport {
    conn: RustConnection,
    window: WindowId,
    fd: i32,
}

fn xerr(e: impl std::fmt::Display) -> ClipdError {
    ClipdError::transport(e.to_string())
}

impl X11Transport {
    /// Connect to the display named by `$DISPLAY`
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = RustConnection::connect(None).map_err(xerr)?;
        let root = conn.setup().roots[screen_num].root;

        let window = conn.generate_id().map_err(xerr)?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new()
                .override_redirect(1)
                .event_mask(EventMask::PROPERTY_CHANGE),
        )
        .map_err(xerr)?;
        conn.flush().map_err(xerr)?;

        let fd = conn.stream().as_raw_fd();
        Ok(Self { conn, window, fd })
    }
}

impl Transport for X11Transport {
    fn intern_atom(&mut self, name: &str) -> Result<Atom> {
        let reply = self
            .conn
            .intern_atom(false, name.as_bytes())
            .map_err(xerr)?
            .reply()
            .map_err(xerr)?;
        Ok(reply.atom)
    }

    fn window(&self) -> WindowId {
        self.window
    }

    fn selection_owner(&mut self, selection: Atom) -> Result<Option<WindowId>> {
        let reply = self
            .conn
            .get_selection_owner(selection)
            .map_err(xerr)?
            .reply()
            .map_err(xerr)?;
        Ok((reply.owner != x11rb::NONE).then_some(reply.owner))
    }

    fn set_selection_owner(
        &mut self,
        owner: Option<WindowId>,
        selection: Atom,
        time: Timestamp,
    ) -> Result<()> {
        self.conn
            .set_selection_owner(owner.unwrap_or(x11rb::NONE), selection, time)
            .map_err(xerr)?;
        self.conn.flush().map_err(xerr)
    }

    fn convert_selection(
        &mut self,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()> {
        self.conn
            .convert_selection(self.window, selection, target, property, time)
            .map_err(xerr)?;
        self.conn.flush().map_err(xerr)
    }

    fn read_property(
        &mut self,
        window: WindowId,
        property: Atom,
    ) -> Result<Option<(Atom, Vec<u8>)>> {
        let reply = self
            .conn
            .get_property(true, window, property, AtomEnum::ANY, 0, u32::MAX)
            .map_err(xerr)?
            .reply()
            .map_err(xerr)?;
        if reply.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some((reply.type_, reply.value)))
    }

    fn write_property8(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        data: &[u8],
    ) -> Result<()> {
        self.conn
            .change_property8(PropMode::REPLACE, window, property, ty, data)
            .map_err(xerr)?;
        self.conn.flush().map_err(xerr)
    }

    fn write_property32(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        values: &[u32],
    ) -> Result<()> {
        self.conn
            .change_property32(PropMode::REPLACE, window, property, ty, values)
            .map_err(xerr)?;
        self.conn.flush().map_err(xerr)
    }

    fn delete_property(&mut self, window: WindowId, property: Atom) -> Result<()> {
        self.conn.delete_property(window, property).map_err(xerr)?;
        self.conn.flush().map_err(xerr)
    }

    fn send_selection_notify(&mut self, request: &SelectionRequest, property: Atom) -> Result<()> {
        let event = SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: request.time,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property,
        };
        self.conn
            .send_event(false, request.requestor, EventMask::NO_EVENT, event)
            .map_err(xerr)?;
        self.conn.flush().map_err(xerr)
    }

    fn wait_event(&mut self, timeout: Option<Duration>) -> Result<Option<Event>> {
        self.conn.flush().map_err(xerr)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(ev) = self.conn.poll_for_event().map_err(xerr)? {
                return Ok(Some(map_event(ev)));
            }

            let wait_ms: i32 = match deadline {
                None => -1,
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(None);
                    }
                    (d - now).as_millis().min(i32::MAX as u128) as i32
                }
            };

            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd, matching nfds of 1
            let ret = unsafe { libc::poll(&mut pfd, 1, wait_ms) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    // Interrupted, let the caller re-check its run flag
                    return Ok(None);
                }
                return Err(ClipdError::Io(err));
            }
            if ret == 0 {
                return Ok(None);
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.flush().map_err(xerr)
    }
}

fn map_event(ev: X11Event) -> Event {
    match ev {
        X11Event::SelectionRequest(e) => Event::Request(SelectionRequest {
            time: e.time,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
        }),
        X11Event::SelectionClear(e) => Event::Clear {
            selection: e.selection,
            time: e.time,
        },
        X11Event::SelectionNotify(e) => Event::Notify {
            selection: e.selection,
            target: e.target,
            property: e.property,
            time: e.time,
        },
        _ => Event::Other,
    }
}
