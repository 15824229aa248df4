//! Tick-owned companion host.
//!
//! The host owns the entity space and one orchestrator per connected owner.
//! Connections never touch that state directly: they send [`HostCommand`]s
//! which are drained at the start of every tick, and they receive encoded
//! spawn broadcast frames from a broadcast channel.

use crate::config::RetinueConfig;
use crate::directory::CharacterDirectory;
use crate::orchestrator::{CompanionOrchestrator, DismissReason};
use crate::registry::CompanionRegistry;
use crate::roster::RosterFetcher;
use crate::simulation::{EntitySpace, GreetingSink, Owner, OwnerId, Placement};
use crate::store::{OwnerRecord, RecordStore};
use crate::wire::{Frame, SpawnBroadcast, WireMessage};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Work submitted to the tick from outside
#[derive(Debug)]
pub enum HostCommand {
    /// Owner entered the world at `placement`
    Join { owner: Owner, placement: Placement },
    /// Owner moved (or left the world while staying connected when `None`)
    Place {
        owner: OwnerId,
        placement: Option<Placement>,
    },
    /// Re-fetch the owner's roster
    Refresh(OwnerId),
    /// Encoded frame sent by the owner's client
    Inbound { owner: OwnerId, frame: Vec<u8> },
    Disconnect(OwnerId),
    /// Reply with a spawn broadcast frame for every live companion
    Snapshot(oneshot::Sender<Vec<Vec<u8>>>),
    Shutdown,
}

/// Cloneable handle used by connections to talk to the host.
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::UnboundedSender<HostCommand>,
    frames: broadcast::Sender<Vec<u8>>,
}

impl HostHandle {
    pub fn send(&self, command: HostCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("companion host has stopped"))
    }

    pub fn join(&self, owner: Owner, placement: Placement) -> Result<()> {
        self.send(HostCommand::Join { owner, placement })
    }

    pub fn disconnect(&self, owner: OwnerId) -> Result<()> {
        self.send(HostCommand::Disconnect(owner))
    }

    pub fn inbound(&self, owner: OwnerId, frame: Vec<u8>) -> Result<()> {
        self.send(HostCommand::Inbound { owner, frame })
    }

    /// Receiver of every spawn broadcast frame produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.frames.subscribe()
    }

    /// Spawn broadcast frames for companions that are already live.
    pub async fn snapshot(&self) -> Result<Vec<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        self.send(HostCommand::Snapshot(tx))?;
        rx.await.map_err(|_| anyhow!("companion host dropped snapshot request"))
    }
}

pub struct CompanionHost {
    space: EntitySpace,
    owners: HashMap<OwnerId, CompanionOrchestrator>,
    /// Open connections per owner; the owner leaves when the last one closes
    connections: HashMap<OwnerId, usize>,
    directory: Arc<dyn CharacterDirectory>,
    greeter: Arc<dyn GreetingSink>,
    config: RetinueConfig,
    store: Option<RecordStore>,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    frames: broadcast::Sender<Vec<u8>>,
    running: bool,
}

impl CompanionHost {
    pub fn new(
        config: RetinueConfig,
        space: EntitySpace,
        directory: Arc<dyn CharacterDirectory>,
        greeter: Arc<dyn GreetingSink>,
    ) -> (Self, HostHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, _) = broadcast::channel(config.server.broadcast_capacity.max(1));

        let store = if config.persistence.enabled {
            Some(RecordStore::new(config.persistence.directory.clone()))
        } else {
            None
        };

        let host = Self {
            space,
            owners: HashMap::new(),
            connections: HashMap::new(),
            directory,
            greeter,
            config,
            store,
            commands: command_rx,
            frames: frame_tx.clone(),
            running: true,
        };
        let handle = HostHandle {
            commands: command_tx,
            frames: frame_tx,
        };
        (host, handle)
    }

    pub fn space(&self) -> &EntitySpace {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut EntitySpace {
        &mut self.space
    }

    pub fn orchestrator(&self, owner: OwnerId) -> Option<&CompanionOrchestrator> {
        self.owners.get(&owner)
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Register an owner and start fetching their roster.
    ///
    /// A persisted record, when present, seeds the registry so companions
    /// the simulation still holds are reused instead of duplicated. Joining
    /// again while connected counts one more connection, moves the owner and
    /// refreshes the roster. Must run inside a tokio runtime.
    pub fn join(&mut self, owner: Owner, placement: Placement) {
        self.space.place_owner(owner.id, placement);
        *self.connections.entry(owner.id).or_insert(0) += 1;

        if let Some(existing) = self.owners.get(&owner.id) {
            debug!(owner = %owner, "Owner already joined, refreshing roster");
            existing.request_roster();
            return;
        }

        let registry = self.load_registry(&owner);
        let fetcher = RosterFetcher::new(
            Arc::clone(&self.directory),
            self.config.directory.game_tag.clone(),
            self.config.directory.timeout(),
        );
        let orchestrator = CompanionOrchestrator::new(
            owner.clone(),
            fetcher,
            Arc::clone(&self.greeter),
            self.config.spawn.clone(),
        )
        .with_registry(registry);

        orchestrator.on_join();
        self.owners.insert(owner.id, orchestrator);
    }

    fn load_registry(&self, owner: &Owner) -> CompanionRegistry {
        let Some(store) = &self.store else {
            return CompanionRegistry::new();
        };
        match store.load(owner.id) {
            Ok(Some(record)) => {
                info!(owner = %owner, companions = record.companions.len(), "Restored owner record");
                record.into_registry()
            }
            Ok(None) => CompanionRegistry::new(),
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to load owner record, starting empty");
                CompanionRegistry::new()
            }
        }
    }

    fn save_record(&self, orchestrator: &CompanionOrchestrator) {
        if let Some(store) = &self.store {
            let record = OwnerRecord::from_registry(orchestrator.owner(), orchestrator.registry());
            if let Err(e) = store.save(&record) {
                error!(owner = %orchestrator.owner(), error = %e, "Failed to save owner record");
            }
        }
    }

    /// Move an owner, or take them out of the world with `None`.
    pub fn place(&mut self, owner: OwnerId, placement: Option<Placement>) {
        match placement {
            Some(placement) => self.space.place_owner(owner, placement),
            None => {
                self.space.remove_owner(owner);
            }
        }
    }

    pub fn refresh(&self, owner: OwnerId) {
        match self.owners.get(&owner) {
            Some(orchestrator) => {
                orchestrator.request_roster();
            }
            None => warn!(owner = %owner, "Roster refresh for unknown owner"),
        }
    }

    /// One of the owner's connections closed.
    ///
    /// When it was the last one, the owner's record is saved and every
    /// companion dismissed.
    pub fn disconnect(&mut self, owner: OwnerId) {
        if let Some(count) = self.connections.get_mut(&owner) {
            *count = count.saturating_sub(1);
            if *count > 0 {
                debug!(owner = %owner, connections = *count, "Owner still connected elsewhere");
                return;
            }
            self.connections.remove(&owner);
        }

        let Some(orchestrator) = self.owners.remove(&owner) else {
            debug!(owner = %owner, "Disconnect for unknown owner");
            return;
        };
        self.save_record(&orchestrator);
        let dismissed = orchestrator.on_disconnect(&mut self.space);
        self.space.remove_owner(owner);
        info!(owner = %orchestrator.owner(), dismissed = dismissed, "Owner disconnected");
    }

    /// Decode a client frame and route it to the sender's orchestrator.
    ///
    /// Malformed frames are logged and dropped.
    pub fn handle_inbound(&mut self, owner: OwnerId, bytes: &[u8]) {
        let Some(orchestrator) = self.owners.get(&owner) else {
            warn!(owner = %owner, "Frame from unknown owner");
            return;
        };

        let message = match Frame::decode(bytes).and_then(|frame| frame.message()) {
            Ok(message) => message,
            Err(e) => {
                warn!(owner = %orchestrator.owner(), error = %e, bytes = bytes.len(), "Dropping malformed frame");
                return;
            }
        };

        orchestrator.handle_request(&mut self.space, message);
    }

    fn apply(&mut self, command: HostCommand) {
        match command {
            HostCommand::Join { owner, placement } => self.join(owner, placement),
            HostCommand::Place { owner, placement } => self.place(owner, placement),
            HostCommand::Refresh(owner) => self.refresh(owner),
            HostCommand::Inbound { owner, frame } => self.handle_inbound(owner, &frame),
            HostCommand::Disconnect(owner) => self.disconnect(owner),
            HostCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot_frames());
            }
            HostCommand::Shutdown => self.running = false,
        }
    }

    /// Run one simulation tick.
    ///
    /// Order: queued commands, roster reconciliation per owner, agent
    /// movement, then broadcasts: dismissals first, then the state of agents
    /// spawned or teleported during this tick.
    pub fn tick(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.running {
                        info!("All host handles dropped, stopping");
                    }
                    self.running = false;
                    break;
                }
            }
        }

        for orchestrator in self.owners.values() {
            orchestrator.server_tick(&mut self.space);
        }

        self.space.tick();

        // No receivers is fine: nobody is watching yet
        for entity_id in self.space.drain_removed() {
            let frame = WireMessage::DismissBroadcast { entity_id }.to_frame().encode();
            let _ = self.frames.send(frame);
        }

        let mut announced = self.space.drain_spawned();
        announced.extend(self.space.drain_moved());
        for uuid in announced {
            if let Some(frame) = self.broadcast_frame(&uuid) {
                let _ = self.frames.send(frame);
            }
        }
    }

    fn broadcast_frame(&self, uuid: &Uuid) -> Option<Vec<u8>> {
        let agent = self.space.agent(uuid).filter(|agent| agent.is_alive())?;
        let broadcast = SpawnBroadcast::from_agent(agent)?;
        Some(WireMessage::SpawnBroadcast(broadcast).to_frame().encode())
    }

    /// Spawn broadcast frames for every live companion, for late joiners.
    pub fn snapshot_frames(&self) -> Vec<Vec<u8>> {
        self.space
            .agents()
            .filter(|agent| agent.is_alive())
            .filter_map(SpawnBroadcast::from_agent)
            .map(|broadcast| WireMessage::SpawnBroadcast(broadcast).to_frame().encode())
            .collect()
    }

    /// Save every record and dismiss every companion.
    pub fn shutdown(&mut self) {
        let owners: Vec<OwnerId> = self.owners.keys().copied().collect();
        for owner in owners {
            if let Some(orchestrator) = self.owners.remove(&owner) {
                self.save_record(&orchestrator);
                orchestrator.dismiss_all(&mut self.space, DismissReason::Shutdown);
                self.space.remove_owner(owner);
            }
        }
        self.connections.clear();
        info!("Companion host stopped");
    }

    /// Tick at the configured rate until shut down.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.tick.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(rate_hz = self.config.tick.rate_hz, "Companion host running");

        while self.running {
            interval.tick().await;
            self.tick();
        }

        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CharacterDescriptor;
    use crate::directory::StaticDirectory;
    use crate::simulation::{Agent, IdleController, LogGreeter, Simulation, Vec3};
    use tempfile::TempDir;

    fn placement() -> Placement {
        Placement {
            position: Vec3::new(0.5, 64.0, 0.5),
            yaw: 0.0,
        }
    }

    fn roster(names: &[&str]) -> Vec<CharacterDescriptor> {
        names.iter().map(|n| CharacterDescriptor::new(*n, *n)).collect()
    }

    fn config(dir: Option<&TempDir>) -> RetinueConfig {
        let mut config = RetinueConfig::default();
        match dir {
            Some(dir) => config.persistence.directory = dir.path().to_path_buf(),
            None => config.persistence.enabled = false,
        }
        config
    }

    fn host(config: RetinueConfig, directory: Arc<StaticDirectory>) -> (CompanionHost, HostHandle) {
        CompanionHost::new(config, EntitySpace::new(), directory, Arc::new(LogGreeter))
    }

    /// Tick until the owner's roster has been reconciled once.
    async fn settle(host: &mut CompanionHost, owner: OwnerId) {
        for _ in 0..100 {
            host.tick();
            let settled = host
                .orchestrator(owner)
                .map(|o| o.roster().generation() > 0 && !o.roster().is_pending())
                .unwrap_or(true);
            if settled {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("roster never reconciled");
    }

    #[tokio::test]
    async fn test_join_spawns_roster_and_broadcasts() {
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen", "ember"])));
        let (mut host, handle) = host(config(None), directory);
        let mut frames = handle.subscribe();
        let owner = Owner::new(Uuid::new_v4(), "alex");

        handle.join(owner.clone(), placement()).unwrap();
        settle(&mut host, owner.id).await;

        assert_eq!(host.space().agents_of(owner.id).len(), 2);
        let mut names = Vec::new();
        while let Ok(bytes) = frames.try_recv() {
            match Frame::decode(&bytes).unwrap().message().unwrap() {
                WireMessage::SpawnBroadcast(b) => names.push(b.descriptor.name),
                other => panic!("unexpected message {:?}", other),
            }
        }
        names.sort();
        assert_eq!(names, vec!["ember", "lumen"]);
    }

    #[tokio::test]
    async fn test_inbound_requests_are_routed() {
        let directory = Arc::new(StaticDirectory::new(Vec::new()));
        let (mut host, handle) = host(config(None), directory);
        let owner = Owner::new(Uuid::new_v4(), "alex");
        handle.join(owner.clone(), placement()).unwrap();
        settle(&mut host, owner.id).await;

        let spawn = WireMessage::SpawnRequest {
            descriptor: CharacterDescriptor::new("lumen", "Lumen"),
        };
        handle.inbound(owner.id, spawn.to_frame().encode()).unwrap();
        handle.inbound(owner.id, vec![0xFF, 0x01]).unwrap();
        host.tick();

        assert!(host.orchestrator(owner.id).unwrap().registry().lookup("lumen").is_some());

        let despawn = WireMessage::DespawnRequest {
            descriptor: CharacterDescriptor::new("lumen", ""),
        };
        handle.inbound(owner.id, despawn.to_frame().encode()).unwrap();
        host.tick();

        assert!(host.space().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_saves_record_and_dismisses() {
        let dir = TempDir::new().unwrap();
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen"])));
        let (mut host, handle) = host(config(Some(&dir)), directory);
        let owner = Owner::new(Uuid::new_v4(), "alex");
        handle.join(owner.clone(), placement()).unwrap();
        settle(&mut host, owner.id).await;
        let lumen = host.orchestrator(owner.id).unwrap().registry().lookup("lumen").unwrap();

        handle.disconnect(owner.id).unwrap();
        host.tick();

        assert!(host.space().is_empty());
        assert_eq!(host.owner_count(), 0);
        assert!(host.space().owner_placement(owner.id).is_none());
        let record = RecordStore::new(dir.path()).load(owner.id).unwrap().unwrap();
        assert_eq!(record.companions.get("lumen"), Some(&lumen.uuid));
    }

    #[tokio::test]
    async fn test_companions_stay_until_last_connection_closes() {
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen"])));
        let (mut host, handle) = host(config(None), directory);
        let owner = Owner::new(Uuid::new_v4(), "alex");

        // Two sockets for the same owner
        handle.join(owner.clone(), placement()).unwrap();
        handle.join(owner.clone(), placement()).unwrap();
        settle(&mut host, owner.id).await;
        let lumen = host.orchestrator(owner.id).unwrap().registry().lookup("lumen").unwrap();

        handle.disconnect(owner.id).unwrap();
        host.tick();

        assert_eq!(host.owner_count(), 1);
        assert!(host.space().find_live_agent(&lumen).is_some());
        assert!(host.space().owner_placement(owner.id).is_some());

        handle.disconnect(owner.id).unwrap();
        host.tick();

        assert_eq!(host.owner_count(), 0);
        assert!(host.space().is_empty());

        // A stray extra close changes nothing
        host.disconnect(owner.id);
        assert_eq!(host.owner_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_broadcasts_dismissals() {
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen"])));
        let (mut host, handle) = host(config(None), directory);
        let mut frames = handle.subscribe();
        let owner = Owner::new(Uuid::new_v4(), "alex");
        handle.join(owner.clone(), placement()).unwrap();
        settle(&mut host, owner.id).await;
        let lumen = host.orchestrator(owner.id).unwrap().registry().lookup("lumen").unwrap();
        while frames.try_recv().is_ok() {}

        handle.disconnect(owner.id).unwrap();
        host.tick();

        let bytes = frames.try_recv().unwrap();
        match Frame::decode(&bytes).unwrap().message().unwrap() {
            WireMessage::DismissBroadcast { entity_id } => {
                assert_eq!(Some(entity_id), lumen.entity_id)
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_restores_record_and_reuses_live_agent() {
        let dir = TempDir::new().unwrap();
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen"])));
        let (mut host, _handle) = host(config(Some(&dir)), directory);
        let owner = Owner::new(Uuid::new_v4(), "alex");

        // Agent kept by the simulation from an earlier session
        let agent = Agent::companion(
            CharacterDescriptor::new("lumen", "lumen"),
            owner.id,
            Box::new(IdleController),
        );
        let identity = host.space_mut().spawn(agent, Vec3::new(3.5, 64.0, 3.5), 0.0).unwrap();
        let registry = CompanionRegistry::new();
        registry.bind("lumen", identity);
        RecordStore::new(dir.path())
            .save(&OwnerRecord::from_registry(&owner, &registry))
            .unwrap();

        host.join(owner.clone(), placement());
        settle(&mut host, owner.id).await;

        assert_eq!(host.space().len(), 1);
        assert_eq!(
            host.orchestrator(owner.id).unwrap().registry().lookup("lumen"),
            Some(identity)
        );
    }

    #[tokio::test]
    async fn test_snapshot_lists_live_companions() {
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen"])));
        let (mut host, handle) = host(config(None), directory);
        let owner = Owner::new(Uuid::new_v4(), "alex");
        handle.join(owner.clone(), placement()).unwrap();
        settle(&mut host, owner.id).await;

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.snapshot().await }
        });
        tokio::task::yield_now().await;
        for _ in 0..50 {
            host.tick();
            if pending.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let frames = pending.await.unwrap().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames, host.snapshot_frames());
    }

    #[tokio::test]
    async fn test_shutdown_command_stops_run_loop() {
        let dir = TempDir::new().unwrap();
        let directory = Arc::new(StaticDirectory::new(roster(&["lumen"])));
        let (host, handle) = host(config(Some(&dir)), directory);
        let owner = Owner::new(Uuid::new_v4(), "alex");
        handle.join(owner.clone(), placement()).unwrap();

        let task = tokio::spawn(host.run());
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.send(HostCommand::Shutdown).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(RecordStore::new(dir.path()).load(owner.id).unwrap().is_some());
    }

    #[test]
    fn test_unknown_owner_commands_are_ignored() {
        let directory = Arc::new(StaticDirectory::new(Vec::new()));
        let (mut host, _handle) = host(config(None), directory);

        host.handle_inbound(Uuid::new_v4(), &[1, 2, 3]);
        host.disconnect(Uuid::new_v4());
        host.refresh(Uuid::new_v4());
        host.tick();

        assert_eq!(host.owner_count(), 0);
        assert!(host.is_running());
    }
}
