//! Display-server transport seam
//!
//! Everything the engine needs from the display server, reduced to a
//! small trait: atom interning, selection ownership, the
//! convert/notify exchange, window properties and event delivery.
//! [`x11::X11Transport`] is the real backend; [`mem::MemTransport`]
//! is the in-memory double used by the protocol tests.

pub mod mem;
pub mod x11;

use std::time::Duration;

use clipd_utils::Result;

pub use clipd_core::registry::Atom;

/// Window identifier on the display server
pub type WindowId = u32;

/// Server timestamp in milliseconds
pub type Timestamp = u32;

/// Timestamp wildcard meaning "now"
pub const CURRENT_TIME: Timestamp = 0;

/// Atom value meaning "no property"
pub const NONE: Atom = 0;

/// A peer asking us to convert a selection into a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub time: Timestamp,
    pub requestor: WindowId,
    pub selection: Atom,
    pub target: Atom,
    /// Property to place the result in; [`NONE`] from obsolete clients
    pub property: Atom,
}

/// Transport events the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A peer wants the content of a selection we own
    Request(SelectionRequest),
    /// We lost ownership of a selection
    Clear { selection: Atom, time: Timestamp },
    /// Reply to one of our convert-selection requests
    Notify {
        selection: Atom,
        target: Atom,
        /// [`NONE`] when the owner refused the conversion
        property: Atom,
        time: Timestamp,
    },
    /// Anything else; ignored
    Other,
}

/// Display-server primitives consumed by the engine
///
/// Implementations are single-connection and not thread safe, matching
/// the single-threaded daemon loop.
pub trait Transport {
    /// Intern an atom by name
    fn intern_atom(&mut self, name: &str) -> Result<Atom>;

    /// Our own window, requestor for conversions and owner candidate
    fn window(&self) -> WindowId;

    /// Current owner of a selection, `None` when unowned
    fn selection_owner(&mut self, selection: Atom) -> Result<Option<WindowId>>;

    /// Set or clear the owner of a selection
    fn set_selection_owner(
        &mut self,
        owner: Option<WindowId>,
        selection: Atom,
        time: Timestamp,
    ) -> Result<()>;

    /// Ask the current owner to convert `selection` into `target`,
    /// placing the result in `property` on our window
    fn convert_selection(
        &mut self,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<()>;

    /// Read a property in full and delete it; `None` when unset
    fn read_property(&mut self, window: WindowId, property: Atom) -> Result<Option<(Atom, Vec<u8>)>>;

    /// Replace a property with 8-bit data of the given type
    fn write_property8(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        data: &[u8],
    ) -> Result<()>;

    /// Replace a property with 32-bit values of the given type
    fn write_property32(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        values: &[u32],
    ) -> Result<()>;

    /// Delete a property
    fn delete_property(&mut self, window: WindowId, property: Atom) -> Result<()>;

    /// Tell a requestor where its conversion landed; `property` is
    /// [`NONE`] to refuse
    fn send_selection_notify(&mut self, request: &SelectionRequest, property: Atom) -> Result<()>;

    /// Wait for the next event
    ///
    /// `None` blocks indefinitely; a duration bounds the wait and
    /// `Duration::ZERO` only drains already-pending events. Returns
    /// `Ok(None)` on timeout or signal interruption.
    fn wait_event(&mut self, timeout: Option<Duration>) -> Result<Option<Event>>;

    /// Flush buffered requests to the server
    fn flush(&mut self) -> Result<()>;
}
