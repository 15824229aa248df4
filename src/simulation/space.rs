use super::{Agent, AgentIdentity, OwnerId, Placement, PlacementError, Simulation, Vec3};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// In-memory entity space holding owners and live agents.
///
/// Owned by the tick; nothing here is shared across threads.
pub struct EntitySpace {
    agents: HashMap<Uuid, Agent>,
    owners: HashMap<OwnerId, Placement>,
    next_entity_id: i32,
    /// Agents spawned since the last drain (for spawn broadcasts)
    spawned: Vec<Uuid>,
    /// Announced agents teleported since the last drain
    moved: Vec<Uuid>,
    /// Entity ids of announced agents removed since the last drain
    removed: Vec<i32>,
    /// Refuse spawns beyond this many agents
    max_agents: Option<usize>,
}

impl EntitySpace {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            owners: HashMap::new(),
            next_entity_id: 1,
            spawned: Vec::new(),
            moved: Vec::new(),
            removed: Vec::new(),
            max_agents: None,
        }
    }

    /// Space that rejects spawns once `max_agents` agents are live.
    pub fn with_capacity_limit(max_agents: usize) -> Self {
        Self {
            max_agents: Some(max_agents),
            ..Self::new()
        }
    }

    /// Place (or move) an owner.
    pub fn place_owner(&mut self, owner: OwnerId, placement: Placement) {
        self.owners.insert(owner, placement);
    }

    /// Take an owner out of the world (teleporting or disconnecting).
    pub fn remove_owner(&mut self, owner: OwnerId) -> Option<Placement> {
        self.owners.remove(&owner)
    }

    pub fn agent(&self, uuid: &Uuid) -> Option<&Agent> {
        self.agents.get(uuid)
    }

    pub fn agent_mut(&mut self, uuid: &Uuid) -> Option<&mut Agent> {
        self.agents.get_mut(uuid)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Live agents attached to `owner`
    pub fn agents_of(&self, owner: OwnerId) -> Vec<&Agent> {
        self.agents
            .values()
            .filter(|a| a.owner() == Some(owner))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Durable ids of agents spawned since the previous call.
    pub fn drain_spawned(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.spawned)
    }

    /// Durable ids of agents teleported since the previous call.
    ///
    /// Agents spawned in the same window are only reported by
    /// [`drain_spawned`](Self::drain_spawned).
    pub fn drain_moved(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.moved)
    }

    /// Entity ids of removed agents since the previous call.
    ///
    /// Agents spawned and removed within the same window never appear.
    pub fn drain_removed(&mut self) -> Vec<i32> {
        std::mem::take(&mut self.removed)
    }

    /// Tick every live agent once.
    pub fn tick(&mut self) {
        for agent in self.agents.values_mut() {
            agent.tick();
        }
    }
}

impl Default for EntitySpace {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation for EntitySpace {
    fn owner_placement(&self, owner: OwnerId) -> Option<Placement> {
        self.owners.get(&owner).copied()
    }

    fn spawn(&mut self, mut agent: Agent, position: Vec3, yaw: f32) -> Result<AgentIdentity, PlacementError> {
        if !position.is_finite() {
            return Err(PlacementError::InvalidPosition);
        }
        if let Some(max) = self.max_agents {
            if self.agents.len() >= max {
                return Err(PlacementError::Rejected(format!(
                    "entity space is full ({} agents)",
                    max
                )));
            }
        }

        let entity_id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1).max(1);

        agent.pose.position = position;
        agent.pose.yaw = yaw;
        agent.pose.pitch = 0.0;
        agent.activate(entity_id);

        let identity = agent.identity();
        debug!(agent = %identity, "Agent entered entity space");
        self.spawned.push(identity.uuid);
        self.agents.insert(identity.uuid, agent);
        Ok(identity)
    }

    fn teleport(&mut self, agent: &AgentIdentity, position: Vec3) -> Result<(), PlacementError> {
        if !position.is_finite() {
            return Err(PlacementError::InvalidPosition);
        }
        let live = self
            .agents
            .get_mut(&agent.uuid)
            .filter(|a| a.is_alive())
            .ok_or(PlacementError::AgentMissing(agent.uuid))?;
        live.pose.position = position;
        live.pose.velocity = Vec3::ZERO;
        if !self.spawned.contains(&agent.uuid) && !self.moved.contains(&agent.uuid) {
            self.moved.push(agent.uuid);
        }
        Ok(())
    }

    fn remove(&mut self, agent: &AgentIdentity) -> Option<Agent> {
        let mut removed = self.agents.remove(&agent.uuid)?;
        removed.dismiss();

        let unannounced = self.spawned.contains(&agent.uuid);
        self.spawned.retain(|uuid| *uuid != agent.uuid);
        self.moved.retain(|uuid| *uuid != agent.uuid);
        if let (false, Some(entity_id)) = (unannounced, removed.identity().entity_id) {
            self.removed.push(entity_id);
        }
        info!(agent = %removed.identity(), "Agent left entity space");
        Some(removed)
    }

    fn find_live_agent(&self, agent: &AgentIdentity) -> Option<&Agent> {
        self.agents.get(&agent.uuid).filter(|a| a.is_alive())
    }
}
