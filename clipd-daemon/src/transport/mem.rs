//! In-memory transport double for protocol tests
//!
//! Models just enough of a display server: an atom table, selection
//! owners, per-window properties and a scripted event queue. Peers are
//! simulated by seeding content that convert-selection requests will
//! "deliver", and by pushing request/clear events onto the queue.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use clipd_utils::Result;

use super::{Atom, Event, SelectionRequest, Timestamp, Transport, WindowId, NONE};

/// Window id the double hands out as our own
pub const OWN_WINDOW: WindowId = 1;

#[derive(Debug, Default)]
pub struct MemTransport {
    atoms: Vec<String>,
    owners: HashMap<Atom, WindowId>,
    properties: HashMap<(WindowId, Atom), (Atom, Vec<u8>)>,
    queue: VecDeque<Event>,
    /// Content a simulated foreign owner serves, by (selection, target)
    peer_content: HashMap<(Atom, Atom), Vec<u8>>,
    /// Record of every selection-notify we sent, with its property
    pub sent_notifies: Vec<(SelectionRequest, Atom)>,
    now: Timestamp,
}

impl MemTransport {
    pub fn new() -> Self {
        Self {
            now: 10,
            ..Self::default()
        }
    }

    fn tick(&mut self) -> Timestamp {
        self.now += 1;
        self.now
    }

    /// Atom for `name` without interning it first; panics when unknown
    pub fn atom(&self, name: &str) -> Atom {
        self.atoms
            .iter()
            .position(|n| n == name)
            .map(|i| i as Atom + 1)
            .unwrap_or_else(|| panic!("atom not interned: {name}"))
    }

    /// Script an event for the next `wait_event`
    pub fn push_event(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Give a selection to a simulated foreign window
    pub fn set_foreign_owner(&mut self, selection: Atom, window: WindowId) {
        self.owners.insert(selection, window);
    }

    /// Seed the content a foreign owner delivers for (selection, target)
    pub fn set_peer_content(&mut self, selection: Atom, target: Atom, data: &[u8]) {
        self.peer_content.insert((selection, target), data.to_vec());
    }

    /// Drop seeded content for (selection, target)
    pub fn clear_peer_content(&mut self, selection: Atom, target: Atom) {
        self.peer_content.remove(&(selection, target));
    }

    /// Inspect a property without deleting it
    pub fn property(&self, window: WindowId, property: Atom) -> Option<&(Atom, Vec<u8>)> {
        self.properties.get(&(window, property))
    }
}

impl Transport for MemTransport {
    fn intern_atom(&mut self, name: &str) -> Result<Atom> {
        if let Some(i) = self.atoms.iter().position(|n| n == name) {
            return Ok(i as Atom + 1);
        }
        self.atoms.push(name.to_string());
        Ok(self.atoms.len() as Atom)
    }

    fn window(&self) -> WindowId {
        OWN_WINDOW
    }

    fn selection_owner(&mut self, selection: Atom) -> Result<Option<WindowId>> {
        Ok(self.owners.get(&selection).copied())
    }

    fn set_selection_owner(
        &mut self,
        owner: Option<WindowId>,
        selection: Atom,
        _time: Timestamp,
    ) -> Result<()> {
        match owner {
            Some(w) => self.owners.insert(selection, w),
            None => self.owners.remove(&selection),
        };
        Ok(())
    }

    fn convert_selection(
        &mut self,
        selection: Atom,
        target: Atom,
        property: Atom,
        _time: Timestamp,
    ) -> Result<()> {
        let time = self.tick();
        let delivered = match self.peer_content.get(&(selection, target)) {
            Some(data) if self.owners.contains_key(&selection) => {
                self.properties
                    .insert((OWN_WINDOW, property), (target, data.clone()));
                property
            }
            _ => NONE,
        };
        self.queue.push_back(Event::Notify {
            selection,
            target,
            property: delivered,
            time,
        });
        Ok(())
    }

    fn read_property(
        &mut self,
        window: WindowId,
        property: Atom,
    ) -> Result<Option<(Atom, Vec<u8>)>> {
        Ok(self.properties.remove(&(window, property)))
    }

    fn write_property8(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        data: &[u8],
    ) -> Result<()> {
        self.properties
            .insert((window, property), (ty, data.to_vec()));
        Ok(())
    }

    fn write_property32(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        values: &[u32],
    ) -> Result<()> {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        self.properties.insert((window, property), (ty, data));
        Ok(())
    }

    fn delete_property(&mut self, window: WindowId, property: Atom) -> Result<()> {
        self.properties.remove(&(window, property));
        Ok(())
    }

    fn send_selection_notify(&mut self, request: &SelectionRequest, property: Atom) -> Result<()> {
        self.sent_notifies.push((*request, property));
        Ok(())
    }

    fn wait_event(&mut self, _timeout: Option<Duration>) -> Result<Option<Event>> {
        Ok(self.queue.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
