//! Capability registry
//!
//! Capabilities are optional, dynamically present feature modules exposing
//! session metadata. The registry holds at most one instance per
//! [`CapabilityKind`] and notifies listeners when kinds come and go.
//!
//! Lookups are typed: `registry.get::<CommandDetection>()` returns
//! `Option<&CommandDetection>` without any runtime casts at the call site.
//!
//! Notification ordering:
//! - add listeners run after the capability is stored and queryable
//! - remove listeners run while the capability is still stored, before it
//!   is handed back to the caller and dropped

pub mod command;
pub mod cwd;
pub mod marks;

use bitflags::bitflags;
use tracing::debug;

pub use command::{CommandDetection, CommandDetectionSnapshot, CommandPhase, TerminalCommand};
pub use cwd::{CwdDetection, NaiveCwdDetection};
pub use marks::{BufferMark, BufferMarkDetection};

/// Closed set of capability kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    CwdDetection,
    NaiveCwdDetection,
    CommandDetection,
    BufferMarkDetection,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::CwdDetection,
        CapabilityKind::NaiveCwdDetection,
        CapabilityKind::CommandDetection,
        CapabilityKind::BufferMarkDetection,
    ];

    fn flag(self) -> CapabilityKinds {
        match self {
            CapabilityKind::CwdDetection => CapabilityKinds::CWD_DETECTION,
            CapabilityKind::NaiveCwdDetection => CapabilityKinds::NAIVE_CWD_DETECTION,
            CapabilityKind::CommandDetection => CapabilityKinds::COMMAND_DETECTION,
            CapabilityKind::BufferMarkDetection => CapabilityKinds::BUFFER_MARK_DETECTION,
        }
    }
}

bitflags! {
    /// Set of kinds currently registered
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CapabilityKinds: u8 {
        const CWD_DETECTION = 0b0001;
        const NAIVE_CWD_DETECTION = 0b0010;
        const COMMAND_DETECTION = 0b0100;
        const BUFFER_MARK_DETECTION = 0b1000;
    }
}

/// A capability instance with its typed payload
#[derive(Debug)]
pub enum Capability {
    CwdDetection(CwdDetection),
    NaiveCwdDetection(NaiveCwdDetection),
    CommandDetection(CommandDetection),
    BufferMarkDetection(BufferMarkDetection),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::CwdDetection(_) => CapabilityKind::CwdDetection,
            Capability::NaiveCwdDetection(_) => CapabilityKind::NaiveCwdDetection,
            Capability::CommandDetection(_) => CapabilityKind::CommandDetection,
            Capability::BufferMarkDetection(_) => CapabilityKind::BufferMarkDetection,
        }
    }
}

/// Links a payload type to its kind for typed lookups
pub trait CapabilityType: Sized {
    const KIND: CapabilityKind;

    fn from_capability(capability: &Capability) -> Option<&Self>;
    fn from_capability_mut(capability: &mut Capability) -> Option<&mut Self>;
    fn into_capability(self) -> Capability;
}

macro_rules! capability_type {
    ($ty:ident) => {
        impl CapabilityType for $ty {
            const KIND: CapabilityKind = CapabilityKind::$ty;

            fn from_capability(capability: &Capability) -> Option<&Self> {
                match capability {
                    Capability::$ty(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_capability_mut(capability: &mut Capability) -> Option<&mut Self> {
                match capability {
                    Capability::$ty(inner) => Some(inner),
                    _ => None,
                }
            }

            fn into_capability(self) -> Capability {
                Capability::$ty(self)
            }
        }
    };
}

capability_type!(CwdDetection);
capability_type!(NaiveCwdDetection);
capability_type!(CommandDetection);
capability_type!(BufferMarkDetection);

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(CapabilityKind, &Capability)>;

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<Capability>,
    on_add: Vec<(ListenerId, Listener)>,
    on_remove: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("kinds", &self.kinds())
            .field("listeners", &(self.on_add.len() + self.on_remove.len()))
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, kind: CapabilityKind) -> bool {
        self.position(kind).is_some()
    }

    pub fn kinds(&self) -> CapabilityKinds {
        self.entries
            .iter()
            .fold(CapabilityKinds::empty(), |acc, c| acc | c.kind().flag())
    }

    pub fn get_by_kind(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.position(kind).map(|i| &self.entries[i])
    }

    pub fn get<T: CapabilityType>(&self) -> Option<&T> {
        self.get_by_kind(T::KIND).and_then(T::from_capability)
    }

    pub fn get_mut<T: CapabilityType>(&mut self) -> Option<&mut T> {
        let index = self.position(T::KIND)?;
        T::from_capability_mut(&mut self.entries[index])
    }

    /// Get the capability, registering `make()` first when absent.
    pub fn get_or_add<T: CapabilityType>(&mut self, make: impl FnOnce() -> T) -> &mut T {
        if !self.has(T::KIND) {
            self.add(make().into_capability());
        }
        let index = self
            .position(T::KIND)
            .unwrap_or_else(|| unreachable!("capability was just added"));
        match T::from_capability_mut(&mut self.entries[index]) {
            Some(inner) => inner,
            None => unreachable!("kind and payload always agree"),
        }
    }

    /// Register a capability. An existing instance of the same kind is
    /// removed first, with its remove notification.
    pub fn add(&mut self, capability: Capability) -> Option<Capability> {
        let kind = capability.kind();
        let replaced = self.remove(kind);
        debug!("Capability added: {:?}", kind);
        self.entries.push(capability);
        let index = self.entries.len() - 1;
        let entries = &self.entries;
        for (_, listener) in self.on_add.iter_mut() {
            listener(kind, &entries[index]);
        }
        replaced
    }

    /// Unregister and return the capability of `kind`.
    pub fn remove(&mut self, kind: CapabilityKind) -> Option<Capability> {
        let index = self.position(kind)?;
        let entries = &self.entries;
        for (_, listener) in self.on_remove.iter_mut() {
            listener(kind, &entries[index]);
        }
        debug!("Capability removed: {:?}", kind);
        Some(self.entries.remove(index))
    }

    /// Remove every capability, notifying for each.
    pub fn clear(&mut self) {
        for kind in CapabilityKind::ALL {
            self.remove(kind);
        }
    }

    pub fn on_did_add_capability_type(
        &mut self,
        listener: impl FnMut(CapabilityKind, &Capability) + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.on_add.push((id, Box::new(listener)));
        id
    }

    pub fn on_did_remove_capability_type(
        &mut self,
        listener: impl FnMut(CapabilityKind, &Capability) + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.on_remove.push((id, Box::new(listener)));
        id
    }

    pub fn unlisten(&mut self, id: ListenerId) {
        self.on_add.retain(|(i, _)| *i != id);
        self.on_remove.retain(|(i, _)| *i != id);
    }

    /// Detach every listener.
    pub fn clear_listeners(&mut self) {
        self.on_add.clear();
        self.on_remove.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.on_add.len() + self.on_remove.len()
    }

    fn position(&self, kind: CapabilityKind) -> Option<usize> {
        self.entries.iter().position(|c| c.kind() == kind)
    }

    fn next_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }
}
