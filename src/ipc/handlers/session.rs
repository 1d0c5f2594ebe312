use crate::departments;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::Department;
use crate::session::Session;
use serde_json::json;

fn profile_json(department: Option<Department>) -> serde_json::Value {
    department
        .map(|d| json!(departments::profile(d)))
        .unwrap_or(serde_json::Value::Null)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let fields = get_required_str(&req.params, "name")
        .and_then(|name| Ok((name, get_required_str(&req.params, "department")?)));
    let (name, department) = match fields {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let email = get_opt_str(&req.params, "email");

    let session = Session::new(&name, email.as_deref(), &department);
    let known = session.known_department();
    if known.is_none() {
        tracing::warn!(department = %session.department, "login with unrecognised department");
    }
    tracing::info!(name = %session.name, department = %session.department, "login");
    let result = json!({
        "session": session,
        "profile": profile_json(known),
    });
    state.session = Some(session);
    ok(&req.id, result)
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(s) = state.session.take() {
        tracing::info!(name = %s.name, department = %s.department, "logout");
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "session": state.session }))
}

fn handle_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let department = match req.params.get("department").and_then(|v| v.as_str()) {
        Some(raw) => match Department::parse(raw) {
            Some(d) => d,
            None => {
                return HandlerErr::new("bad_params", format!("unknown department {}", raw))
                    .response(&req.id)
            }
        },
        None => match state.session.as_ref().and_then(|s| s.known_department()) {
            Some(d) => d,
            None if state.session.is_none() => {
                return err(&req.id, "no_session", "log in first", None)
            }
            None => return err(&req.id, "bad_params", "session department is not recognised", None),
        },
    };
    ok(&req.id, json!(departments::profile(department)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        "session.current" => Some(handle_current(state, req)),
        "departments.profile" => Some(handle_profile(state, req)),
        _ => None,
    }
}
