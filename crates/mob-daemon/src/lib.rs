//! Background supervisor for the mob: patrol sweeps, associate discipline,
//! and auto-assignment of ready beads to idle soldati.

pub mod heartbeat;
pub mod patrol;
pub mod scheduler;
pub mod supervisor;
pub mod worker;
