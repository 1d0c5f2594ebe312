use crate::error::StoreError;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::policy::{RecordType, User};
use crate::session::Session;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        if matches!(e, StoreError::Db(_) | StoreError::Io(_)) {
            tracing::warn!(error = %e, "store failure");
        }
        HandlerErr {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

/// Wraps an `anyhow` failure, keeping the whole context chain in the message.
pub fn failed(code: &'static str, e: anyhow::Error) -> HandlerErr {
    tracing::warn!(code, error = %format!("{e:#}"), "request failed");
    HandlerErr::new(code, format!("{e:#}"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Integer id, accepted as a JSON number or a numeric string.
pub fn get_required_id(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    let v = params.get(key);
    v.and_then(|v| v.as_i64())
        .or_else(|| v.and_then(|v| v.as_str()).and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_limit(params: &Value) -> Result<Option<usize>, HandlerErr> {
    match params.get("limit") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| HandlerErr::new("bad_params", "limit must be a non-negative integer")),
    }
}

/// Everything a record handler needs: an open workspace and a session.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub workspace: &'a Path,
    pub session: &'a Session,
}

impl Ctx<'_> {
    pub fn user(&self) -> User {
        self.session.user()
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_ctx(state: &AppState) -> Result<Ctx<'_>, HandlerErr> {
    let conn = require_db(state)?;
    let Some(workspace) = state.workspace.as_deref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let Some(session) = state.session.as_ref() else {
        return Err(HandlerErr::new("no_session", "log in first"));
    };
    Ok(Ctx {
        conn,
        workspace,
        session,
    })
}

pub fn forbidden(method: &str, session: &Session, record_type: RecordType) -> HandlerErr {
    tracing::debug!(
        method,
        department = %session.department,
        record_type = record_type.as_str(),
        "policy denied"
    );
    HandlerErr::new(
        "forbidden",
        format!(
            "{} cannot access {} records",
            session.department,
            record_type.as_str()
        ),
    )
}
