//! Per-owner companion lifecycle.
//!
//! One [`CompanionOrchestrator`] exists per connected owner and is the only
//! writer of that owner's registry. Everything except
//! [`request_roster`](CompanionOrchestrator::request_roster) must run on the
//! simulation tick.

mod spawn;


pub use spawn::spawn_point;

use crate::config::SpawnConfig;
use crate::descriptor::{CharacterDescriptor, DescriptorError};
use crate::directory::DirectoryError;
use crate::reconcile::{self, ReconcileReport};
use crate::registry::CompanionRegistry;
use crate::roster::{RosterFetcher, RosterSlot, RosterSnapshot};
use crate::simulation::{
    Agent, AgentIdentity, GreetingSink, IdleController, Owner, PlacementError, Simulation,
};
use crate::wire::WireMessage;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors from [`CompanionOrchestrator::ensure_companion_exists`]
#[derive(Debug, Clone, PartialEq)]
pub enum CompanionError {
    InvalidDescriptor(DescriptorError),
    /// Owner is not placed in the simulation
    OwnerUnavailable,
    Placement(PlacementError),
}

impl fmt::Display for CompanionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompanionError::InvalidDescriptor(e) => write!(f, "invalid descriptor: {}", e),
            CompanionError::OwnerUnavailable => write!(f, "owner has no active placement"),
            CompanionError::Placement(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompanionError {}

/// How an ensure request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Existing live agent teleported next to the owner
    Reused(AgentIdentity),
    /// Fresh agent spawned and bound
    Created(AgentIdentity),
}

impl EnsureOutcome {
    pub fn identity(&self) -> AgentIdentity {
        match self {
            EnsureOutcome::Reused(identity) | EnsureOutcome::Created(identity) => *identity,
        }
    }
}

/// Why a companion was dismissed (logged)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    Roster,
    Request,
    Disconnect,
    Shutdown,
}

impl fmt::Display for DismissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DismissReason::Roster => "roster",
            DismissReason::Request => "request",
            DismissReason::Disconnect => "disconnect",
            DismissReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Keeps one owner's companions in line with their roster.
pub struct CompanionOrchestrator {
    owner: Owner,
    registry: CompanionRegistry,
    roster: Arc<RosterSlot>,
    fetcher: RosterFetcher,
    greeter: Arc<dyn GreetingSink>,
    spawn: SpawnConfig,
}

impl CompanionOrchestrator {
    pub fn new(
        owner: Owner,
        fetcher: RosterFetcher,
        greeter: Arc<dyn GreetingSink>,
        spawn: SpawnConfig,
    ) -> Self {
        Self {
            owner,
            registry: CompanionRegistry::new(),
            roster: Arc::new(RosterSlot::new()),
            fetcher,
            greeter,
            spawn,
        }
    }

    /// Start from a registry restored from a persisted record.
    pub fn with_registry(mut self, registry: CompanionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn registry(&self) -> &CompanionRegistry {
        &self.registry
    }

    pub fn roster(&self) -> &Arc<RosterSlot> {
        &self.roster
    }

    /// Owner joined: fetch their roster.
    pub fn on_join(&self) -> JoinHandle<Result<RosterSnapshot, DirectoryError>> {
        info!(owner = %self.owner, "Owner joined, requesting roster");
        self.request_roster()
    }

    /// Fetch the owner's roster asynchronously; the next tick reconciles it.
    pub fn request_roster(&self) -> JoinHandle<Result<RosterSnapshot, DirectoryError>> {
        self.fetcher.request(&self.owner, &self.roster)
    }

    /// Owner is leaving: dismiss every companion right away.
    ///
    /// In-flight fetches are not awaited; a result landing later only fills
    /// a slot nobody reads.
    pub fn on_disconnect(&self, sim: &mut dyn Simulation) -> usize {
        self.dismiss_all(sim, DismissReason::Disconnect)
    }

    /// Tick hook: reconcile the latest roster if one is pending.
    pub fn server_tick(&self, sim: &mut dyn Simulation) -> Option<ReconcileReport> {
        let desired = self.roster.take_pending()?;
        let report = self.reconcile(sim, &desired);
        info!(
            owner = %self.owner,
            dismissed = report.dismissed.len(),
            reused = report.reused.len(),
            created = report.created.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Roster reconciled"
        );
        Some(report)
    }

    /// Align bound companions with `desired`.
    ///
    /// Dismisses every bound name missing from the roster, then ensures each
    /// roster entry in order. Failures are recorded in the report and never
    /// abort the pass.
    pub fn reconcile(&self, sim: &mut dyn Simulation, desired: &[CharacterDescriptor]) -> ReconcileReport {
        let plan = reconcile::plan(&self.registry.all_names(), desired);
        let mut report = ReconcileReport {
            skipped: plan.skipped,
            ..ReconcileReport::default()
        };

        for name in plan.dismiss {
            if self.dismiss_companion(sim, &name, DismissReason::Roster).is_some() {
                report.dismissed.push(name);
            }
        }

        for descriptor in &plan.ensure {
            match self.ensure_companion_exists(sim, descriptor) {
                Ok(EnsureOutcome::Reused(_)) => report.reused.push(descriptor.name.clone()),
                Ok(EnsureOutcome::Created(_)) => report.created.push(descriptor.name.clone()),
                Err(e) => report.failed.push((descriptor.name.clone(), e.to_string())),
            }
        }

        report
    }

    /// Make sure a companion for `descriptor` is live next to the owner.
    ///
    /// A live agent already bound to the name is teleported (keeping its
    /// inventory and controller state); otherwise a fresh agent is spawned,
    /// bound and greets the owner. On error the registry is unchanged.
    pub fn ensure_companion_exists(
        &self,
        sim: &mut dyn Simulation,
        descriptor: &CharacterDescriptor,
    ) -> Result<EnsureOutcome, CompanionError> {
        if let Err(e) = descriptor.validate() {
            warn!(owner = %self.owner, error = %e, "Rejecting companion with invalid descriptor");
            return Err(CompanionError::InvalidDescriptor(e));
        }

        let placement = match sim.owner_placement(self.owner.id) {
            Some(placement) => placement,
            None => {
                warn!(owner = %self.owner, companion = %descriptor.name, "Owner not placed, cannot summon companion");
                return Err(CompanionError::OwnerUnavailable);
            }
        };

        let target = spawn_point(placement.position, &self.spawn, &mut rand::thread_rng());

        let live = self
            .registry
            .lookup(&descriptor.name)
            .and_then(|identity| sim.find_live_agent(&identity))
            .filter(|agent| agent.owner() == Some(self.owner.id))
            .map(Agent::identity);

        if let Some(identity) = live {
            if let Err(e) = sim.teleport(&identity, target) {
                warn!(owner = %self.owner, companion = %descriptor.name, error = %e, "Failed to teleport companion");
                return Err(CompanionError::Placement(e));
            }
            // Refresh the entity id of identities restored from disk
            self.registry.bind(&descriptor.name, identity);
            info!(owner = %self.owner, companion = %descriptor.name, agent = %identity, "Teleported existing companion");
            return Ok(EnsureOutcome::Reused(identity));
        }

        let agent = Agent::companion(descriptor.clone(), self.owner.id, Box::new(IdleController));
        let identity = match sim.spawn(agent, target, placement.yaw) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(owner = %self.owner, companion = %descriptor.name, error = %e, "Failed to spawn companion");
                return Err(CompanionError::Placement(e));
            }
        };

        if let Some(stale) = self.registry.bind(&descriptor.name, identity) {
            debug!(owner = %self.owner, companion = %descriptor.name, stale = %stale, "Replaced stale binding");
        }
        self.greeter.greet(&self.owner, descriptor);
        info!(owner = %self.owner, companion = %descriptor.name, agent = %identity, "Summoned new companion");
        Ok(EnsureOutcome::Created(identity))
    }

    /// Dismiss the companion bound to `name`.
    ///
    /// The binding is dropped before the agent is looked up, so nothing can
    /// reuse a half-dismissed agent. Unbound names and agents that are
    /// already gone are silently ignored. Returns the dropped binding.
    pub fn dismiss_companion(
        &self,
        sim: &mut dyn Simulation,
        name: &str,
        reason: DismissReason,
    ) -> Option<AgentIdentity> {
        let identity = self.registry.unbind(name)?;

        match sim.remove(&identity) {
            Some(_) => {
                info!(owner = %self.owner, companion = %name, reason = %reason, "Dismissed companion")
            }
            None => {
                debug!(owner = %self.owner, companion = %name, reason = %reason, "Companion already gone, binding dropped")
            }
        }

        Some(identity)
    }

    /// Dismiss every bound companion; returns how many bindings were dropped.
    pub fn dismiss_all(&self, sim: &mut dyn Simulation, reason: DismissReason) -> usize {
        let mut dismissed = 0;
        for name in self.registry.all_names() {
            if self.dismiss_companion(sim, &name, reason).is_some() {
                dismissed += 1;
            }
        }
        dismissed
    }

    /// Bound companions that are currently alive (stale bindings skipped).
    pub fn active_companions<'a>(&self, sim: &'a dyn Simulation) -> Vec<&'a Agent> {
        self.registry
            .entries()
            .into_iter()
            .filter_map(|(_, identity)| sim.find_live_agent(&identity))
            .collect()
    }

    /// Handle a request sent by this owner's client.
    ///
    /// Invalid requests are logged and dropped; nothing is reported back.
    pub fn handle_request(&self, sim: &mut dyn Simulation, message: WireMessage) {
        let message_channel = message.channel();
        match message {
            WireMessage::SpawnRequest { descriptor } => {
                info!(owner = %self.owner, companion = %descriptor.name, "Spawn request received");
                let _ = self.ensure_companion_exists(sim, &descriptor);
            }
            WireMessage::DespawnRequest { descriptor } => {
                info!(owner = %self.owner, companion = %descriptor.name, "Despawn request received");
                if descriptor.name.is_empty() {
                    warn!(owner = %self.owner, "Despawn request without a name");
                    return;
                }
                self.dismiss_companion(sim, &descriptor.name, DismissReason::Request);
            }
            WireMessage::SpawnBroadcast(_) | WireMessage::DismissBroadcast { .. } => {
                warn!(owner = %self.owner, channel = message_channel.id(), "Ignoring broadcast sent by a client");
            }
        }
    }
}
