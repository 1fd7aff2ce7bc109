//! Selection ownership and transfer engine
//!
//! Implements the protocol logic on top of the [`Transport`] seam:
//! acquiring and releasing selections, serving conversion requests,
//! fetching content from foreign owners with a bounded wait, the
//! poll-and-reconcile cycle with its asymmetric debounce, one-hop
//! synchronization between selections, and history capture.
//!
//! Conversion requests arriving while we wait for our own fetch reply
//! are served inline rather than dropped.

use std::time::{Duration, Instant};

use enumflags2::BitFlags;
use tracing::{debug, info, warn};

use clipd_core::config::Config;
use clipd_core::hash::hash_bytes;
use clipd_core::history::HistoryStore;
use clipd_core::pipeline::{process, CommandFlag, CommandSet};
use clipd_core::registry::{Atom, Ownership, Policy, Registry};
use clipd_utils::{ClipdError, Result};

use crate::transport::{Event, SelectionRequest, Timestamp, Transport, CURRENT_TIME, NONE};

/// Property on our window that fetched conversions land in
const DATA_PROPERTY: &str = "CLIPD_DATA";

/// Standard atoms the protocol needs, interned once at startup
#[derive(Debug, Clone, Copy)]
struct Atoms {
    utf8_string: Atom,
    string: Atom,
    text: Atom,
    targets: Atom,
    timestamp: Atom,
    integer: Atom,
    atom: Atom,
    incr: Atom,
    data_property: Atom,
}

impl Atoms {
    fn intern<T: Transport>(transport: &mut T) -> Result<Self> {
        Ok(Self {
            utf8_string: transport.intern_atom("UTF8_STRING")?,
            string: transport.intern_atom("STRING")?,
            text: transport.intern_atom("TEXT")?,
            targets: transport.intern_atom("TARGETS")?,
            timestamp: transport.intern_atom("TIMESTAMP")?,
            integer: transport.intern_atom("INTEGER")?,
            atom: transport.intern_atom("ATOM")?,
            incr: transport.intern_atom("INCR")?,
            data_property: transport.intern_atom(DATA_PROPERTY)?,
        })
    }
}

/// Protocol engine over a transport
pub struct Engine<T: Transport> {
    transport: T,
    atoms: Atoms,
    registry: Registry,
    commands: CommandSet,
    store: HistoryStore,
    fetch_timeout: Duration,
    /// First protocol timestamp ever observed; requests older than
    /// this are refused
    epoch: Timestamp,
    /// Most recent protocol timestamp observed
    last_time: Timestamp,
}

impl<T: Transport> Engine<T> {
    /// Build the engine: registry from config, atoms resolved
    pub fn new(
        mut transport: T,
        config: &Config,
        store: HistoryStore,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let atoms = Atoms::intern(&mut transport)?;
        let mut registry = Registry::from_config(config)?;
        registry.resolve_atoms(|name| transport.intern_atom(name))?;
        Ok(Self {
            transport,
            atoms,
            registry,
            commands: config.command_set(),
            store,
            fetch_timeout,
            epoch: 0,
            last_time: 0,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Every managed selection is currently owned by us
    pub fn all_owned(&self) -> bool {
        self.registry.iter().all(|s| s.owned_by_us())
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn note_time(&mut self, time: Timestamp) {
        if time != CURRENT_TIME {
            if self.epoch == 0 {
                self.epoch = time;
            }
            self.last_time = time;
        }
    }

    /// Wait for the next transport event
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<Event>> {
        self.transport.wait_event(timeout)
    }

    /// React to one transport event
    pub fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Request(req) => self.serve(req),
            Event::Clear { selection, time } => self.on_clear(selection, time),
            // Stray reply from an abandoned fetch
            Event::Notify { .. } => Ok(()),
            Event::Other => Ok(()),
        }
    }

    /// Take ownership of a selection and verify it stuck
    ///
    /// On success an empty buffer is restored from the newest history
    /// record, without re-writing the log.
    pub fn acquire(&mut self, index: usize) -> Result<bool> {
        let (atom, name, needs_restore) = {
            let sel = self
                .registry
                .get(index)
                .ok_or_else(|| ClipdError::internal("selection index out of range"))?;
            (sel.atom, sel.name.clone(), sel.data.is_none())
        };

        let window = self.transport.window();
        self.transport
            .set_selection_owner(Some(window), atom, CURRENT_TIME)?;
        let verified = self.transport.selection_owner(atom)? == Some(window);

        if !verified {
            warn!(selection = %name, "ownership did not stick");
            if let Some(sel) = self.registry.get_mut(index) {
                sel.ownership = Ownership::Unowned;
            }
            return Ok(false);
        }

        let restored = if needs_restore {
            match self.store.latest(&name) {
                Ok(found) => found,
                Err(e) => {
                    warn!(selection = %name, error = %e, "history restore failed");
                    None
                }
            }
        } else {
            None
        };

        let time = self.last_time;
        if let Some(sel) = self.registry.get_mut(index) {
            sel.ownership = Ownership::OwnedByUs;
            sel.acquired_at = time;
            sel.fetch_failures = 0;
            if let Some((hash, data)) = restored {
                debug!(selection = %name, bytes = data.len(), "restored buffer from history");
                sel.hash = hash;
                sel.probe_hash = hash;
                sel.seen_hash = hash;
                sel.data = Some(data);
            }
        }
        debug!(selection = %name, "acquired");
        Ok(true)
    }

    /// Give a selection up voluntarily
    pub fn release(&mut self, index: usize) -> Result<()> {
        let atom = match self.registry.get(index) {
            Some(sel) if sel.owned_by_us() => sel.atom,
            _ => return Ok(()),
        };
        self.transport.set_selection_owner(None, atom, CURRENT_TIME)?;
        if let Some(sel) = self.registry.get_mut(index) {
            sel.ownership = Ownership::Unowned;
        }
        Ok(())
    }

    /// We lost a selection to another client
    ///
    /// The selection is marked unowned so the next reconcile cycle
    /// picks up the new owner's content; a selection with the
    /// own-immediately policy re-asserts itself after that content is
    /// committed, not here.
    pub fn on_clear(&mut self, selection: Atom, time: Timestamp) -> Result<()> {
        self.note_time(time);
        if let Some(sel) = self.registry.by_atom_mut(selection) {
            info!(selection = %sel.name, "lost ownership");
            sel.ownership = Ownership::Unowned;
            sel.fetch_failures = 0;
        }
        Ok(())
    }

    /// Serve one conversion request from a peer
    ///
    /// Unknown selections and targets, empty buffers and requests with
    /// a timestamp older than the first one we ever saw are refused by
    /// sending a notify with no property.
    pub fn serve(&mut self, req: SelectionRequest) -> Result<()> {
        self.note_time(req.time);

        // Obsolete clients pass no property; the target atom doubles
        // as the landing property then
        let property = if req.property == NONE {
            req.target
        } else {
            req.property
        };

        let served = self.try_serve(&req, property)?;
        let reply = if served { property } else { NONE };
        if !served {
            debug!(
                selection = req.selection,
                target = req.target,
                "refused conversion"
            );
        }
        self.transport.send_selection_notify(&req, reply)
    }

    fn try_serve(&mut self, req: &SelectionRequest, property: Atom) -> Result<bool> {
        let Some(index) = self.registry.index_by_atom(req.selection) else {
            return Ok(false);
        };
        if req.time != CURRENT_TIME && self.epoch != 0 && req.time < self.epoch {
            debug!(time = req.time, epoch = self.epoch, "stale request refused");
            return Ok(false);
        }

        let atoms = self.atoms;
        let Some(sel) = self.registry.get(index) else {
            return Ok(false);
        };

        if req.target == atoms.targets {
            let mut list = vec![
                atoms.targets,
                atoms.timestamp,
                atoms.utf8_string,
                atoms.string,
                atoms.text,
            ];
            if sel.handles_special {
                list.extend(
                    self.registry
                        .specials()
                        .filter(|sp| sp.data.is_some())
                        .map(|sp| sp.atom),
                );
            }
            self.transport
                .write_property32(req.requestor, property, atoms.atom, &list)?;
            return Ok(true);
        }

        if req.target == atoms.timestamp {
            let acquired_at = sel.acquired_at;
            self.transport.write_property32(
                req.requestor,
                property,
                atoms.integer,
                &[acquired_at],
            )?;
            return Ok(true);
        }

        if req.target == atoms.utf8_string || req.target == atoms.string || req.target == atoms.text
        {
            let Some(data) = sel.data.clone() else {
                return Ok(false);
            };
            let ty = if req.target == atoms.string {
                atoms.string
            } else {
                atoms.utf8_string
            };
            self.transport
                .write_property8(req.requestor, property, ty, &data)?;
            return Ok(true);
        }

        if sel.handles_special {
            if let Some(spi) = self.registry.special_index_by_atom(req.target) {
                let Some(data) = self.registry.special(spi).and_then(|sp| sp.data.clone()) else {
                    return Ok(false);
                };
                self.transport
                    .write_property8(req.requestor, property, req.target, &data)?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Ask the current owner for `target` content of `selection`
    ///
    /// Bounded by the fetch timeout; a refusal, a timeout or a chunked
    /// (INCR) offer all yield `None`. Requests and clears arriving in
    /// the meantime are handled inline.
    pub fn fetch(&mut self, selection: Atom, target: Atom) -> Result<Option<Vec<u8>>> {
        self.transport
            .convert_selection(selection, target, self.atoms.data_property, CURRENT_TIME)?;

        let deadline = Instant::now() + self.fetch_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match self.transport.wait_event(Some(deadline - now))? {
                None => return Ok(None),
                Some(Event::Notify {
                    selection: s,
                    property,
                    time,
                    ..
                }) if s == selection => {
                    self.note_time(time);
                    if property == NONE {
                        return Ok(None);
                    }
                    let window = self.transport.window();
                    let Some((ty, data)) = self.transport.read_property(window, property)? else {
                        return Ok(None);
                    };
                    if ty == self.atoms.incr {
                        warn!("owner offered chunked transfer, not supported, dropping");
                        self.transport.delete_property(window, property)?;
                        return Ok(None);
                    }
                    return Ok(Some(data));
                }
                Some(Event::Request(req)) => self.serve(req)?,
                Some(Event::Clear { selection, time }) => self.on_clear(selection, time)?,
                Some(_) => {}
            }
        }
    }

    /// One reconcile cycle for an unowned selection
    pub fn poll_selection(&mut self, index: usize) -> Result<()> {
        let (atom, handles_special) = {
            let Some(sel) = self.registry.get(index) else {
                return Ok(());
            };
            (sel.atom, sel.handles_special)
        };

        // Nobody owns it: adopt and stop
        let owner = self.transport.selection_owner(atom)?;
        let window = self.transport.window();
        match owner {
            None => {
                self.acquire(index)?;
                return Ok(());
            }
            Some(w) if w == window => {
                if let Some(sel) = self.registry.get_mut(index) {
                    sel.ownership = Ownership::OwnedByUs;
                }
                return Ok(());
            }
            Some(_) => {
                if let Some(sel) = self.registry.get_mut(index) {
                    sel.ownership = Ownership::Unowned;
                }
            }
        }

        if handles_special {
            self.poll_specials(atom)?;
        }

        // Text content, UTF-8 first, legacy STRING as fallback
        let raw = match self.fetch(atom, self.atoms.utf8_string)? {
            Some(data) => Some(data),
            None => self.fetch(atom, self.atoms.string)?,
        };
        let Some(raw) = raw else {
            let Some(sel) = self.registry.get_mut(index) else {
                return Ok(());
            };
            sel.fetch_failures += 1;
            let failures = sel.fetch_failures;
            if failures >= 2 {
                debug!(failures, "owner not answering, taking the selection over");
                self.acquire(index)?;
            }
            return Ok(());
        };

        let raw_hash = hash_bytes(&raw);
        {
            let Some(sel) = self.registry.get_mut(index) else {
                return Ok(());
            };
            sel.fetch_failures = 0;
            if raw_hash == sel.seen_hash {
                // Already handled this content; an own-immediately
                // selection still takes ownership back from the peer
                if sel.policy.contains(Policy::OwnImmediately) {
                    self.acquire(index)?;
                    self.sync_from(index)?;
                }
                return Ok(());
            }
            // Highlight-driven selections change on every drag; wait
            // until the content repeats before committing
            if sel.primary_style && raw_hash != sel.probe_hash {
                sel.probe_hash = raw_hash;
                return Ok(());
            }
            sel.probe_hash = raw_hash;
            sel.seen_hash = raw_hash;
        }

        self.commit(index, &raw)
    }

    fn poll_specials(&mut self, selection: Atom) -> Result<()> {
        let targets: Vec<(usize, Atom)> = self
            .registry
            .specials()
            .enumerate()
            .map(|(i, sp)| (i, sp.atom))
            .collect();
        for (i, target) in targets {
            if let Some(data) = self.fetch(selection, target)? {
                self.registry.assign_special(i, data);
            }
        }
        Ok(())
    }

    /// Run raw content through the pipeline and commit the result:
    /// replace the buffer, sync, record history, own-immediately
    fn commit(&mut self, index: usize, raw: &[u8]) -> Result<()> {
        let (policy, name) = {
            let Some(sel) = self.registry.get(index) else {
                return Ok(());
            };
            (sel.policy, sel.name.clone())
        };

        let Some(processed) = process(raw, policy, &self.commands) else {
            debug!(selection = %name, "update rejected by pipeline");
            if policy.contains(Policy::OwnImmediately) {
                self.acquire(index)?;
            }
            return Ok(());
        };

        let clean_hash = hash_bytes(&processed.bytes);
        let (max_clips, skip_history) = {
            let Some(sel) = self.registry.get_mut(index) else {
                return Ok(());
            };
            sel.commit(processed.bytes, clean_hash, processed.commands);
            (
                sel.max_clips,
                processed.commands.contains(CommandFlag::SkipHistory),
            )
        };
        info!(selection = %name, hash = clean_hash, "committed update");

        self.sync_from(index)?;

        if !skip_history && max_clips > 0 {
            let data = self
                .registry
                .get(index)
                .and_then(|s| s.data.clone())
                .unwrap_or_default();
            if let Err(e) = self.store.append(&name, clean_hash, &data, max_clips) {
                warn!(selection = %name, error = %e, "history append failed");
            }
        }

        if policy.contains(Policy::OwnImmediately) {
            self.acquire(index)?;
        }
        Ok(())
    }

    /// Copy the committed buffer verbatim into the sync target and
    /// take ownership of the target. Single hop.
    pub fn sync_from(&mut self, index: usize) -> Result<()> {
        let (target, data, hash) = {
            let Some(sel) = self.registry.get(index) else {
                return Ok(());
            };
            let (Some(target), Some(data)) = (sel.sync.clone(), sel.data.clone()) else {
                return Ok(());
            };
            (target, data, sel.hash)
        };
        let Some(tindex) = self.registry.index_of(&target) else {
            return Ok(());
        };
        if tindex == index {
            return Ok(());
        }

        if let Some(t) = self.registry.get_mut(tindex) {
            t.commit(data, hash, BitFlags::empty());
            t.probe_hash = hash;
            t.seen_hash = hash;
        }
        debug!(target = %target, "synchronized");
        self.acquire(tindex)?;
        Ok(())
    }

    /// Acquire every selection that has no owner at startup, then
    /// propagate restored buffers into empty sync targets we own
    pub fn adopt_unowned(&mut self) -> Result<()> {
        for index in 0..self.registry.len() {
            let Some(atom) = self.registry.get(index).map(|s| s.atom) else {
                continue;
            };
            if self.transport.selection_owner(atom)?.is_none() {
                self.acquire(index)?;
            }
        }

        for index in 0..self.registry.len() {
            let (target, data, hash) = {
                let Some(sel) = self.registry.get(index) else {
                    continue;
                };
                match (&sel.sync, &sel.data) {
                    (Some(t), Some(d)) => (t.clone(), d.clone(), sel.hash),
                    _ => continue,
                }
            };
            let Some(tindex) = self.registry.index_of(&target) else {
                continue;
            };
            if let Some(t) = self.registry.get_mut(tindex) {
                if t.owned_by_us() && t.data.is_none() {
                    t.commit(data, hash, BitFlags::empty());
                    t.probe_hash = hash;
                    t.seen_hash = hash;
                }
            }
        }
        Ok(())
    }

    /// Own a selection with a one-shot payload and serve it until
    /// another client takes the selection away
    pub fn serve_until_clear(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        let (atom, name) = {
            let sel = self
                .registry
                .get(index)
                .ok_or_else(|| ClipdError::internal("selection index out of range"))?;
            (sel.atom, sel.name.clone())
        };

        let hash = hash_bytes(&data);
        if let Some(sel) = self.registry.get_mut(index) {
            sel.commit(data, hash, BitFlags::empty());
            sel.probe_hash = hash;
            sel.seen_hash = hash;
        }
        if !self.acquire(index)? {
            return Err(ClipdError::transport(format!(
                "could not take ownership of {name}"
            )));
        }
        info!(selection = %name, "serving until another client takes over");

        loop {
            match self.transport.wait_event(None)? {
                Some(Event::Request(req)) => self.serve(req)?,
                Some(Event::Clear { selection, time }) if selection == atom => {
                    self.note_time(time);
                    if let Some(sel) = self.registry.get_mut(index) {
                        sel.ownership = Ownership::Unowned;
                    }
                    return Ok(());
                }
                Some(Event::Clear { selection, time }) => self.on_clear(selection, time)?,
                Some(_) => {}
                // Interrupted; stop serving
                None => return Ok(()),
            }
        }
    }

    /// Live text content of a selection, from whoever owns it
    pub fn fetch_live(&mut self, index: usize) -> Result<Option<Vec<u8>>> {
        let Some(sel) = self.registry.get(index) else {
            return Ok(None);
        };
        let atom = sel.atom;
        match self.fetch(atom, self.atoms.utf8_string)? {
            Some(data) => Ok(Some(data)),
            None => self.fetch(atom, self.atoms.string),
        }
    }

    /// Raw bytes for an arbitrary conversion target of a selection
    pub fn fetch_target(&mut self, index: usize, target: &str) -> Result<Option<Vec<u8>>> {
        let Some(sel) = self.registry.get(index) else {
            return Ok(None);
        };
        let atom = sel.atom;
        let target = self.transport.intern_atom(target)?;
        self.fetch(atom, target)
    }

    /// Release everything we own and flush
    pub fn shutdown(&mut self) -> Result<()> {
        for index in 0..self.registry.len() {
            self.release(index)?;
        }
        self.transport.flush()
    }
}
