//! JSON-RPC 2.0 plumbing for the stdio tool endpoint handed to agent
//! subprocesses.
//!
//! [`mcp`] implements the JSON-RPC envelope, method dispatch table, and the
//! tool catalog exposed to agents over stdio.

pub mod mcp;
