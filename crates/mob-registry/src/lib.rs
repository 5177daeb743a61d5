//! Cross-process mirror of live agents, persisted at
//! `<mobdir>/.mob/agents.json` and guarded by an advisory lock sidecar so
//! the supervisor and any tool-RPC-spawned children can safely share it.

pub mod registry;

pub use registry::{generate_agent_id, Registry, RegistryError};
