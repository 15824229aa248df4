// Companion descriptors and validation
pub mod descriptor;

// Companion inventory model
pub mod inventory;

// Simulation model and entity space
pub mod simulation;

// Owner-scoped name -> agent registry
pub mod registry;

// Character directory client
pub mod directory;

// Asynchronous roster fetch
pub mod roster;

// Roster diffing
pub mod reconcile;

// Per-owner companion lifecycle
pub mod orchestrator;

// Binary wire protocol
pub mod wire;

// Observer-side shadow companions
pub mod observer;

// Owner record persistence
pub mod store;

// Tick-owned host
pub mod host;

// WebSocket API
pub mod api;

// Configuration
pub mod config;
