use super::{AgentIdentity, OwnerId, Pose, Vec3};
use crate::descriptor::CharacterDescriptor;
use crate::inventory::Inventory;
use std::fmt;
use uuid::Uuid;

/// Drives a companion's movement each tick.
///
/// Decision making lives outside this crate; the orchestrator only needs
/// a controller to exist once an agent is bound.
pub trait BehaviorController: Send {
    fn tick(&mut self, pose: &mut Pose);
}

/// Controller that stands still.
pub struct IdleController;

impl BehaviorController for IdleController {
    fn tick(&mut self, pose: &mut Pose) {
        pose.velocity = Vec3::ZERO;
    }
}

/// What kind of agent this is, decided once at construction.
pub enum AgentRole {
    /// Authoritative companion simulated on behalf of an owner
    Companion {
        owner: OwnerId,
        controller: Box<dyn BehaviorController>,
    },
    /// Render-only copy held by a remote observer
    Shadow,
}

impl fmt::Debug for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Companion { owner, .. } => {
                f.debug_struct("Companion").field("owner", owner).finish()
            }
            AgentRole::Shadow => write!(f, "Shadow"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentPhase {
    /// Descriptor attached and controller initialized, not yet placed
    Bound,
    /// Present in the simulation and ticked every frame
    Active,
    /// Removed from the simulation; never reactivated
    Dismissed,
}

/// A companion instance.
///
/// Agents can only be built with a descriptor, so there is no unbound state.
#[derive(Debug)]
pub struct Agent {
    uuid: Uuid,
    entity_id: Option<i32>,
    descriptor: CharacterDescriptor,
    pub pose: Pose,
    prev_velocity: Vec3,
    pub inventory: Inventory,
    role: AgentRole,
    phase: AgentPhase,
}

impl Agent {
    /// Bind a fresh companion to `descriptor` with a new durable id.
    pub fn companion(
        descriptor: CharacterDescriptor,
        owner: OwnerId,
        controller: Box<dyn BehaviorController>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            entity_id: None,
            descriptor,
            pose: Pose::default(),
            prev_velocity: Vec3::ZERO,
            inventory: Inventory::new(),
            role: AgentRole::Companion { owner, controller },
            phase: AgentPhase::Bound,
        }
    }

    /// Build a render-only copy of a remote companion.
    pub fn shadow(
        identity: AgentIdentity,
        descriptor: CharacterDescriptor,
        pose: Pose,
        inventory: Inventory,
    ) -> Self {
        Self {
            uuid: identity.uuid,
            entity_id: identity.entity_id,
            descriptor,
            pose,
            prev_velocity: pose.velocity,
            inventory,
            role: AgentRole::Shadow,
            phase: AgentPhase::Active,
        }
    }

    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            uuid: self.uuid,
            entity_id: self.entity_id,
        }
    }

    pub fn descriptor(&self) -> &CharacterDescriptor {
        &self.descriptor
    }

    pub fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }

    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    pub fn owner(&self) -> Option<OwnerId> {
        match self.role {
            AgentRole::Companion { owner, .. } => Some(owner),
            AgentRole::Shadow => None,
        }
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn is_alive(&self) -> bool {
        self.phase == AgentPhase::Active
    }

    /// Mark the agent as placed under `entity_id`.
    pub(crate) fn activate(&mut self, entity_id: i32) {
        if self.phase == AgentPhase::Bound {
            self.entity_id = Some(entity_id);
            self.phase = AgentPhase::Active;
        }
    }

    pub(crate) fn dismiss(&mut self) {
        self.phase = AgentPhase::Dismissed;
    }

    /// Advance one frame.
    ///
    /// Companions defer to their controller; shadows only integrate velocity
    /// so they keep drifting smoothly between broadcasts.
    pub fn tick(&mut self) {
        if !self.is_alive() {
            return;
        }
        self.prev_velocity = self.pose.velocity;
        match &mut self.role {
            AgentRole::Companion { controller, .. } => controller.tick(&mut self.pose),
            AgentRole::Shadow => {
                self.pose.position = self.pose.position.add(self.pose.velocity);
            }
        }
    }

    /// Velocity interpolated between the previous and current frame.
    pub fn lerp_velocity(&self, delta: f64) -> Vec3 {
        self.prev_velocity.lerp(self.pose.velocity, delta)
    }
}
