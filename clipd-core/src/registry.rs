//! Selection registry
//!
//! Runtime state for every managed selection and special target,
//! built once from configuration. Atoms are resolved against the
//! display server after construction; until then lookups by atom find
//! nothing.

use std::collections::HashMap;

use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};

use clipd_utils::{ClipdError, Result};

use crate::config::Config;
use crate::pipeline::CommandFlag;

/// Protocol atom identifier
pub type Atom = u32;

/// Per-selection behavior policies
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Trim surrounding whitespace on every committed update
    TrimWhitespace = 0b0000_0001,
    /// Trim surrounding whitespace on single-line updates only
    TrimWhitespaceNoMultiline = 0b0000_0010,
    /// Strip trailing newlines and NULs from committed updates
    TrimTrailingNewline = 0b0000_0100,
    /// Take ownership as soon as new content is committed
    OwnImmediately = 0b0000_1000,
}

/// Who owns a selection right now, as far as we know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Some other client, or nobody
    Unowned,
    /// This daemon serves conversion requests for it
    OwnedByUs,
}

/// Runtime state of one managed selection
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selection atom name, e.g. `CLIPBOARD`
    pub name: String,
    /// Name of the selection this one mirrors its updates to
    pub sync: Option<String>,
    /// History capacity, 0 disables the log
    pub max_clips: usize,
    pub policy: BitFlags<Policy>,
    /// Command flags extracted from the most recent committed update
    pub update_flags: BitFlags<CommandFlag>,
    /// Digest of the current committed content
    pub hash: u32,
    /// Digest seen on the previous content probe
    pub probe_hash: u32,
    /// Digest of the raw fetch that produced the last commit or rejection
    pub seen_hash: u32,
    /// Current committed content
    pub data: Option<Vec<u8>>,
    /// This selection also watches and serves special targets
    pub handles_special: bool,
    /// Highlight-driven; commit only after the content stops changing
    pub primary_style: bool,
    /// Resolved atom, 0 until resolved
    pub atom: Atom,
    pub ownership: Ownership,
    /// Consecutive failed content fetches while unowned
    pub fetch_failures: u32,
    /// Server timestamp at which ownership was acquired
    pub acquired_at: u32,
}

impl Selection {
    fn from_config(name: String, cfg: &crate::config::SelectionConfig) -> Self {
        let mut policy = BitFlags::empty();
        for p in &cfg.policies {
            policy |= *p;
        }
        Self {
            name,
            sync: cfg.sync.clone(),
            max_clips: cfg.max_clips,
            policy,
            update_flags: BitFlags::empty(),
            hash: 0,
            probe_hash: 0,
            seen_hash: 0,
            data: None,
            handles_special: cfg.handles_special,
            primary_style: cfg.primary_style,
            atom: 0,
            ownership: Ownership::Unowned,
            fetch_failures: 0,
            acquired_at: 0,
        }
    }

    /// Replace the committed content and digest in one step
    pub fn commit(&mut self, data: Vec<u8>, hash: u32, flags: BitFlags<CommandFlag>) {
        self.hash = hash;
        self.data = Some(data);
        self.update_flags = flags;
    }

    pub fn owned_by_us(&self) -> bool {
        self.ownership == Ownership::OwnedByUs
    }
}

/// A special conversion target served alongside text
///
/// Examples are image formats and file-manager copy lists. At most one
/// binary-sharing special holds content at a time.
#[derive(Debug, Clone)]
pub struct SpecialSelection {
    /// Target atom name, e.g. `image/jpeg`
    pub name: String,
    /// Shares the single binary slot with other sharing specials
    pub share_binary: bool,
    /// Resolved atom, 0 until resolved
    pub atom: Atom,
    pub data: Option<Vec<u8>>,
}

/// All managed selections and specials, with atom and name indexes
#[derive(Debug, Clone)]
pub struct Registry {
    selections: Vec<Selection>,
    specials: Vec<SpecialSelection>,
    by_name: HashMap<String, usize>,
    by_atom: HashMap<Atom, usize>,
    special_by_atom: HashMap<Atom, usize>,
    /// Index of the sharing special that currently holds binary data
    shared_holder: Option<usize>,
}

impl Registry {
    /// Build the registry from configuration
    ///
    /// Rejects duplicate selection names and sync references to
    /// unknown selections or to the selection itself.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut selections = Vec::with_capacity(config.selections.len());

        for cfg in &config.selections {
            if by_name.contains_key(&cfg.name) {
                return Err(ClipdError::config(format!(
                    "duplicate selection: {}",
                    cfg.name
                )));
            }
            by_name.insert(cfg.name.clone(), selections.len());
            selections.push(Selection::from_config(cfg.name.clone(), cfg));
        }

        for sel in &selections {
            if let Some(target) = &sel.sync {
                if target == &sel.name {
                    return Err(ClipdError::config(format!(
                        "selection {} syncs to itself",
                        sel.name
                    )));
                }
                if !by_name.contains_key(target) {
                    return Err(ClipdError::config(format!(
                        "selection {} syncs to unknown selection {}",
                        sel.name, target
                    )));
                }
            }
        }

        let specials = config
            .specials
            .iter()
            .map(|cfg| SpecialSelection {
                name: cfg.name.clone(),
                share_binary: cfg.share_binary,
                atom: 0,
                data: None,
            })
            .collect();

        Ok(Self {
            selections,
            specials,
            by_name,
            by_atom: HashMap::new(),
            special_by_atom: HashMap::new(),
            shared_holder: None,
        })
    }

    /// Resolve every selection and special name to an atom
    ///
    /// The closure interns one name at a time, any failure aborts
    /// resolution.
    pub fn resolve_atoms<F>(&mut self, mut intern: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<Atom>,
    {
        self.by_atom.clear();
        for (i, sel) in self.selections.iter_mut().enumerate() {
            sel.atom = intern(&sel.name)?;
            self.by_atom.insert(sel.atom, i);
        }
        self.special_by_atom.clear();
        for (i, sp) in self.specials.iter_mut().enumerate() {
            sp.atom = intern(&sp.name)?;
            self.special_by_atom.insert(sp.atom, i);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.selections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Selection> {
        self.selections.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Selection> {
        self.selections.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Selection> {
        self.selections.get_mut(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&Selection> {
        self.index_of(name).and_then(|i| self.selections.get(i))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Selection> {
        self.index_of(name).and_then(|i| self.selections.get_mut(i))
    }

    pub fn index_by_atom(&self, atom: Atom) -> Option<usize> {
        self.by_atom.get(&atom).copied()
    }

    pub fn by_atom(&self, atom: Atom) -> Option<&Selection> {
        self.index_by_atom(atom).and_then(|i| self.selections.get(i))
    }

    pub fn by_atom_mut(&mut self, atom: Atom) -> Option<&mut Selection> {
        self.index_by_atom(atom)
            .and_then(|i| self.selections.get_mut(i))
    }

    pub fn specials(&self) -> impl Iterator<Item = &SpecialSelection> {
        self.specials.iter()
    }

    pub fn special_index_by_atom(&self, atom: Atom) -> Option<usize> {
        self.special_by_atom.get(&atom).copied()
    }

    pub fn special(&self, index: usize) -> Option<&SpecialSelection> {
        self.specials.get(index)
    }

    /// Store content for a special target
    ///
    /// A sharing special evicts the previous sharing holder's data
    /// first; non-sharing specials keep theirs independently.
    pub fn assign_special(&mut self, index: usize, data: Vec<u8>) {
        if self.specials.get(index).is_some_and(|s| s.share_binary) {
            if let Some(prev) = self.shared_holder.take() {
                if prev != index {
                    if let Some(sp) = self.specials.get_mut(prev) {
                        sp.data = None;
                    }
                }
            }
            self.shared_holder = Some(index);
        }
        if let Some(sp) = self.specials.get_mut(index) {
            sp.data = Some(data);
        }
    }

    /// Drop stored content for a special target
    pub fn clear_special(&mut self, index: usize) {
        if self.shared_holder == Some(index) {
            self.shared_holder = None;
        }
        if let Some(sp) = self.specials.get_mut(index) {
            sp.data = None;
        }
    }
}
