// Simulation-side model: agents, poses and the placement collaborator

mod agent;
mod space;


pub use agent::{Agent, AgentPhase, AgentRole, BehaviorController, IdleController};
pub use space::EntitySpace;

use crate::descriptor::CharacterDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Stable identifier of a human-controlled owner
pub type OwnerId = Uuid;

/// The human-controlled actor companions are attached to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub name: String,
}

impl Owner {
    pub fn new(id: OwnerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn add(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Linear interpolation from `self` towards `other`.
    pub fn lerp(&self, other: Vec3, delta: f64) -> Vec3 {
        Vec3::new(
            self.x + (other.x - self.x) * delta,
            self.y + (other.y - self.y) * delta,
            self.z + (other.z - self.z) * delta,
        )
    }
}

/// Position, velocity and orientation (degrees) of an agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
}

/// Where an owner currently stands in the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: Vec3,
    pub yaw: f32,
}

/// Identity of a live agent.
///
/// `uuid` is durable across simulation restarts and is the key used for
/// every lookup. `entity_id` is the process-unique id handed out by the
/// simulation at spawn time; it is unknown (`None`) for identities restored
/// from a persisted record until the agent is seen alive again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub uuid: Uuid,
    pub entity_id: Option<i32>,
}

impl AgentIdentity {
    /// Identity known only by its durable id
    pub fn durable(uuid: Uuid) -> Self {
        Self {
            uuid,
            entity_id: None,
        }
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity_id {
            Some(id) => write!(f, "{}#{}", self.uuid, id),
            None => write!(f, "{}", self.uuid),
        }
    }
}

/// Errors reported by the simulation when placing agents
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementError {
    /// Owner is not placed in the simulation (mid-teleport or disconnecting)
    OwnerUnavailable,
    /// Target position is not a finite coordinate
    InvalidPosition,
    /// Agent is not present in the simulation
    AgentMissing(Uuid),
    /// Simulation refused the placement
    Rejected(String),
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementError::OwnerUnavailable => write!(f, "owner has no active placement"),
            PlacementError::InvalidPosition => write!(f, "position is not finite"),
            PlacementError::AgentMissing(uuid) => write!(f, "agent {} is not in the simulation", uuid),
            PlacementError::Rejected(reason) => write!(f, "placement rejected: {}", reason),
        }
    }
}

impl std::error::Error for PlacementError {}

/// Placement interface of the authoritative simulation.
///
/// Every method is synchronous and must only be called from the tick.
pub trait Simulation {
    /// Current placement of `owner`, or `None` while the owner is not in the world.
    fn owner_placement(&self, owner: OwnerId) -> Option<Placement>;

    /// Insert a bound agent at `position` facing `yaw`; the agent becomes active.
    fn spawn(&mut self, agent: Agent, position: Vec3, yaw: f32) -> Result<AgentIdentity, PlacementError>;

    /// Move a live agent to `position`, keeping its state.
    fn teleport(&mut self, agent: &AgentIdentity, position: Vec3) -> Result<(), PlacementError>;

    /// Remove an agent from the simulation, returning it when it was present.
    fn remove(&mut self, agent: &AgentIdentity) -> Option<Agent>;

    /// Live agent matching the identity's durable id.
    fn find_live_agent(&self, agent: &AgentIdentity) -> Option<&Agent>;
}

/// Side channel notified once per newly created companion binding.
pub trait GreetingSink: Send + Sync {
    fn greet(&self, owner: &Owner, descriptor: &CharacterDescriptor);
}

/// Greeting sink that only logs.
pub struct LogGreeter;

impl GreetingSink for LogGreeter {
    fn greet(&self, owner: &Owner, descriptor: &CharacterDescriptor) {
        info!(
            owner = %owner,
            companion = %descriptor.name,
            display_name = %descriptor.display_name(),
            "Companion greets owner"
        );
    }
}
