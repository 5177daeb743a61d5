//! The JSON-RPC 2.0 envelope and method dispatch table exposed to agent
//! subprocesses over stdio: beads, turfs, and agent lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use mob_core::bead_store::{BeadFilter, BeadStore};
use mob_core::roster_store::RosterStore;
use mob_core::types::{AgentRole, AgentStatus, BeadStatus, BeadType, Hook, HookType, Turf};
use mob_mailbox::Mailbox;
use mob_registry::{generate_agent_id, Registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// JSON-RPC envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::Number(1.into())),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ---------------------------------------------------------------------------
// Spawning agents is the daemon's job; the RPC server only records intent
// and hands off to whatever is wired in as the spawner.
// ---------------------------------------------------------------------------

pub trait AgentSpawner: Send + Sync {
    /// Launch a soldati that will pick up work via its mailbox.
    fn spawn_soldati(&self, name: &str, turf: Option<&str>) -> String;

    /// Launch an ephemeral associate scoped to one bead.
    fn spawn_associate(&self, bead_id: &str) -> String;

    /// Terminate a running agent process by registry id.
    fn kill(&self, agent_id: &str);
}

// ---------------------------------------------------------------------------
// Dispatch context
// ---------------------------------------------------------------------------

pub struct RpcContext {
    pub mob_dir: PathBuf,
    pub beads: BeadStore,
    pub roster: RosterStore,
    pub registry: Registry,
    pub turfs: Vec<Turf>,
    pub spawner: Arc<dyn AgentSpawner>,
}

impl RpcContext {
    pub fn new(
        mob_dir: impl Into<PathBuf>,
        turfs: Vec<Turf>,
        spawner: Arc<dyn AgentSpawner>,
    ) -> Self {
        let mob_dir = mob_dir.into();
        Self {
            beads: BeadStore::new(mob_dir.join(".mob").join("beads")),
            roster: RosterStore::new(mob_dir.join(".mob").join("soldati")),
            registry: Registry::new(mob_dir.clone()),
            mob_dir,
            turfs,
            spawner,
        }
    }

    /// Handle one request, producing a response with the same `id`.
    pub fn dispatch(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id.clone();
        let params = req.params.clone().unwrap_or(Value::Null);
        match self.dispatch_method(&req.method, &params) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(DispatchError::InvalidParams(msg)) => {
                JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, msg)
            }
            Err(DispatchError::NotFound(msg)) => {
                JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, msg)
            }
            Err(DispatchError::MethodNotFound) => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown method: {}", req.method),
            ),
            Err(DispatchError::Internal(msg)) => {
                JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, msg)
            }
        }
    }

    fn dispatch_method(&self, method: &str, params: &Value) -> Result<Value, DispatchError> {
        match method {
            "beads/create" => self.bead_create(params),
            "beads/get" => self.bead_get(params),
            "beads/update" => self.bead_update(params),
            "beads/complete" => self.bead_complete(params),
            "beads/comment" => self.bead_comment(params),
            "beads/list" => self.bead_list(params),
            "beads/list_ready" => self.bead_list_ready(params),
            "turfs/list" => self.turf_list(),
            "agents/list" => self.agent_list(),
            "agents/get" => self.agent_get(params),
            "agents/kill" => self.agent_kill(params),
            "agents/nudge" => self.agent_nudge(params),
            "agents/spawn_soldati" => self.agent_spawn_soldati(params),
            "agents/spawn_associate" => self.agent_spawn_associate(params),
            "agents/assign" => self.agent_assign(params),
            _ => Err(DispatchError::MethodNotFound),
        }
    }

    // -- beads --

    fn bead_create(&self, params: &Value) -> Result<Value, DispatchError> {
        let title = required_str(params, "title")?;
        let description = params
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let bead_type = parse_bead_type(params.get("type"))?;
        let priority = parse_priority(params, 2)?;
        let turf = params.get("turf").and_then(Value::as_str).map(String::from);
        let blocks = string_array(params, "blocks");
        let pending_approval = params
            .get("pending_approval")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut bead = self
            .beads
            .create(title, description, bead_type, pending_approval)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        bead.priority = priority;
        bead.turf = turf;
        bead.blocks = blocks;
        let bead = self
            .beads
            .update(bead)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(bead).expect("bead serializes"))
    }

    fn bead_get(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        let bead = self
            .beads
            .get(id)
            .map_err(|e| DispatchError::NotFound(e.to_string()))?;
        Ok(serde_json::to_value(bead).expect("bead serializes"))
    }

    fn bead_update(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        let mut bead = self
            .beads
            .get(id)
            .map_err(|e| DispatchError::NotFound(e.to_string()))?;

        if let Some(title) = params.get("title").and_then(Value::as_str) {
            bead.title = title.to_string();
        }
        if let Some(desc) = params.get("description").and_then(Value::as_str) {
            bead.description = desc.to_string();
        }
        if let Some(status) = params.get("status").and_then(Value::as_str) {
            bead.status = parse_bead_status(status)?;
        }
        if let Some(assignee) = params.get("assignee").and_then(Value::as_str) {
            bead.assignee = Some(assignee.to_string());
        }
        if params.get("priority").is_some() {
            bead.priority = parse_priority(params, bead.priority)?;
        }

        let updated = self
            .beads
            .update(bead)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(updated).expect("bead serializes"))
    }

    fn bead_complete(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        let mut bead = self
            .beads
            .get(id)
            .map_err(|e| DispatchError::NotFound(e.to_string()))?;
        bead.status = BeadStatus::Closed;
        bead.close_reason = params
            .get("reason")
            .and_then(Value::as_str)
            .map(String::from);
        let updated = self
            .beads
            .update(bead)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(updated).expect("bead serializes"))
    }

    fn bead_comment(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        let actor = required_str(params, "actor")?;
        let text = required_str(params, "text")?;
        let updated = self
            .beads
            .add_comment(id, actor, text)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(updated).expect("bead serializes"))
    }

    fn bead_list(&self, params: &Value) -> Result<Value, DispatchError> {
        let filter = BeadFilter {
            status: params
                .get("status")
                .and_then(Value::as_str)
                .map(parse_bead_status)
                .transpose()?,
            turf: params.get("turf").and_then(Value::as_str).map(String::from),
            assignee: params
                .get("assignee")
                .and_then(Value::as_str)
                .map(String::from),
            bead_type: match params.get("type") {
                Some(v) => Some(parse_bead_type(Some(v))?),
                None => None,
            },
        };
        let beads = self
            .beads
            .list(&filter)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(beads).expect("beads serialize"))
    }

    fn bead_list_ready(&self, params: &Value) -> Result<Value, DispatchError> {
        let turf = params.get("turf").and_then(Value::as_str);
        let beads = self
            .beads
            .list_ready(turf)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(beads).expect("beads serialize"))
    }

    // -- turfs --

    fn turf_list(&self) -> Result<Value, DispatchError> {
        Ok(serde_json::to_value(&self.turfs).expect("turfs serialize"))
    }

    // -- agents --

    fn agent_list(&self) -> Result<Value, DispatchError> {
        let agents = self
            .registry
            .list()
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(agents).expect("agents serialize"))
    }

    fn agent_get(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        let agent = self
            .registry
            .get(id)
            .map_err(|e| DispatchError::NotFound(e.to_string()))?;
        Ok(serde_json::to_value(agent).expect("agent serializes"))
    }

    fn agent_kill(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        self.spawner.kill(id);
        self.registry
            .update(id, |record| record.status = AgentStatus::Failed)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(Value::Bool(true))
    }

    fn agent_nudge(&self, params: &Value) -> Result<Value, DispatchError> {
        let id = required_str(params, "id")?;
        let record = self
            .registry
            .get(id)
            .map_err(|e| DispatchError::NotFound(e.to_string()))?;
        if record.role == AgentRole::Soldati {
            let mailbox = Mailbox::open(&self.mob_dir, &record.name)
                .map_err(|e| DispatchError::Internal(e.to_string()))?;
            let hook = Hook {
                hook_type: HookType::Nudge,
                bead_id: record.bead_id.clone(),
                message: params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from),
                timestamp: chrono::Utc::now(),
                seq: 0,
            };
            mailbox
                .write(hook)
                .map_err(|e| DispatchError::Internal(e.to_string()))?;
        }
        self.registry
            .update(id, |r| r.nudged_at = Some(chrono::Utc::now()))
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(Value::Bool(true))
    }

    fn agent_spawn_soldati(&self, params: &Value) -> Result<Value, DispatchError> {
        let name = required_str(params, "name")?;
        let turf = params.get("turf").and_then(Value::as_str);
        self.roster
            .register(name)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        let id = self.spawner.spawn_soldati(name, turf);
        let record = self
            .registry
            .register(mob_core::types::RegistryRecord::new_soldati(id, name))
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(record).expect("record serializes"))
    }

    fn agent_spawn_associate(&self, params: &Value) -> Result<Value, DispatchError> {
        let bead_id = required_str(params, "bead_id")?;
        self.beads
            .get(bead_id)
            .map_err(|e| DispatchError::NotFound(e.to_string()))?;
        let agent_id = generate_agent_id();
        self.spawner.spawn_associate(bead_id);
        let record = self
            .registry
            .register(mob_core::types::RegistryRecord::new_associate(
                agent_id, bead_id,
            ))
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(record).expect("record serializes"))
    }

    fn agent_assign(&self, params: &Value) -> Result<Value, DispatchError> {
        let worker = required_str(params, "worker")?;
        let bead_id = required_str(params, "bead_id")?;
        let mailbox = Mailbox::open(&self.mob_dir, worker)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        let hook = Hook {
            hook_type: HookType::Assign,
            bead_id: Some(bead_id.to_string()),
            message: None,
            timestamp: chrono::Utc::now(),
            seq: 0,
        };
        let written = mailbox
            .write(hook)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        Ok(serde_json::to_value(written).expect("hook serializes"))
    }
}

enum DispatchError {
    InvalidParams(String),
    NotFound(String),
    MethodNotFound,
    Internal(String),
}

fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, DispatchError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::InvalidParams(format!("missing required field: {field}")))
}

fn parse_priority(params: &Value, default: u8) -> Result<u8, DispatchError> {
    match params.get("priority") {
        None => Ok(default),
        Some(v) => {
            let n = v
                .as_u64()
                .ok_or_else(|| DispatchError::InvalidParams("priority must be an integer".into()))?;
            u8::try_from(n)
                .map_err(|_| DispatchError::InvalidParams(format!("priority out of range: {n}")))
        }
    }
}

fn string_array(params: &Value, field: &str) -> Vec<String> {
    params
        .get(field)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_bead_type(value: Option<&Value>) -> Result<BeadType, DispatchError> {
    let s = value
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::InvalidParams("missing required field: type".to_string()))?;
    match s {
        "bug" => Ok(BeadType::Bug),
        "feature" => Ok(BeadType::Feature),
        "task" => Ok(BeadType::Task),
        "epic" => Ok(BeadType::Epic),
        "chore" => Ok(BeadType::Chore),
        "review" => Ok(BeadType::Review),
        "heresy" => Ok(BeadType::Heresy),
        other => Err(DispatchError::InvalidParams(format!("unknown bead type: {other}"))),
    }
}

fn parse_bead_status(s: &str) -> Result<BeadStatus, DispatchError> {
    match s {
        "open" => Ok(BeadStatus::Open),
        "in_progress" => Ok(BeadStatus::InProgress),
        "blocked" => Ok(BeadStatus::Blocked),
        "closed" => Ok(BeadStatus::Closed),
        "pending_approval" => Ok(BeadStatus::PendingApproval),
        other => Err(DispatchError::InvalidParams(format!("unknown bead status: {other}"))),
    }
}
