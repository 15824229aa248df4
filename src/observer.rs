//! Observer-side view of remote companions.
//!
//! Shadows are built from spawn broadcasts, dropped on dismiss broadcasts,
//! and only ever ticked cosmetically. They have no owner and never touch a
//! registry.

use crate::simulation::{Agent, AgentIdentity};
use crate::wire::{Frame, SpawnBroadcast, WireError, WireMessage};
use std::collections::HashMap;
use tracing::{debug, warn};

/// What a received frame did to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverUpdate {
    /// A shadow was created or replaced
    Shadowed(AgentIdentity),
    /// The authority dismissed an agent; `known` is false if no shadow existed
    Forgotten { entity_id: i32, known: bool },
}

#[derive(Debug, Default)]
pub struct ObserverView {
    /// Shadows keyed by the authority's entity id
    shadows: HashMap<i32, Agent>,
}

impl ObserverView {
    pub fn new() -> Self {
        Self {
            shadows: HashMap::new(),
        }
    }

    /// Decode and apply one frame received from the authority.
    ///
    /// Client requests are rejected. Decode failures leave the view
    /// untouched.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Result<ObserverUpdate, WireError> {
        let frame = Frame::decode(bytes)?;
        match frame.message()? {
            WireMessage::SpawnBroadcast(broadcast) => {
                Ok(ObserverUpdate::Shadowed(self.apply(broadcast)))
            }
            WireMessage::DismissBroadcast { entity_id } => {
                let known = self.forget(entity_id).is_some();
                debug!(entity_id = entity_id, known = known, "Shadow companion dismissed");
                Ok(ObserverUpdate::Forgotten { entity_id, known })
            }
            other => Err(WireError::UnexpectedChannel(other.channel())),
        }
    }

    /// Like [`handle_frame`](Self::handle_frame), but logs and drops bad frames.
    pub fn receive(&mut self, bytes: &[u8]) -> Option<ObserverUpdate> {
        match self.handle_frame(bytes) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Dropping malformed frame");
                None
            }
        }
    }

    /// Insert (or replace) the shadow for a broadcast companion.
    pub fn apply(&mut self, broadcast: SpawnBroadcast) -> AgentIdentity {
        let identity = broadcast.identity();
        let name = broadcast.descriptor.name.clone();
        let replaced = self
            .shadows
            .insert(broadcast.entity_id, broadcast.into_shadow())
            .is_some();
        debug!(agent = %identity, companion = %name, replaced = replaced, "Shadow companion applied");
        identity
    }

    pub fn shadow(&self, entity_id: i32) -> Option<&Agent> {
        self.shadows.get(&entity_id)
    }

    pub fn forget(&mut self, entity_id: i32) -> Option<Agent> {
        self.shadows.remove(&entity_id)
    }

    pub fn shadows(&self) -> impl Iterator<Item = &Agent> {
        self.shadows.values()
    }

    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    /// Advance every shadow one cosmetic frame.
    pub fn tick(&mut self) {
        for shadow in self.shadows.values_mut() {
            shadow.tick();
        }
    }
}
