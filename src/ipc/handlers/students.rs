use crate::ipc::error::ok;
use crate::ipc::helpers::{failed, get_required_str, require_ctx, Ctx, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::Department;
use crate::students::{self, Student, StudentFilter};
use serde_json::json;
use std::path::PathBuf;

/// Student directory writes belong to the three offices, not the
/// Administrator.
fn require_office(ctx: &Ctx<'_>, method: &str) -> Result<(), HandlerErr> {
    match ctx.session.known_department() {
        Some(Department::Opd | Department::Gco | Department::Inf) => Ok(()),
        _ => {
            tracing::debug!(method, department = %ctx.session.department, "policy denied");
            Err(HandlerErr::new(
                "forbidden",
                format!("{} cannot modify student data", ctx.session.department),
            ))
        }
    }
}

fn students_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let filter = StudentFilter::from_params(&req.params);
    let (semester, rows) = students::list(ctx.conn, &filter)?;
    Ok(json!({ "semester": semester, "students": rows }))
}

fn students_search(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let rows = students::search(ctx.conn, query)?;
    Ok(json!({ "students": rows }))
}

fn students_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let id = get_required_str(&req.params, "idNumber")?;
    match students::get(ctx.conn, &id)? {
        Some(s) => Ok(json!({ "student": s })),
        None => Err(HandlerErr::new("not_found", format!("student {} not found", id))),
    }
}

fn students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    require_office(&ctx, &req.method)?;
    let raw = req.params.get("student").cloned().unwrap_or_else(|| req.params.clone());
    let student: Student = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid student: {}", e)))?;
    students::create(ctx.conn, &student)?;
    tracing::info!(id_number = %student.id_number, "student created");
    let stored = students::get(ctx.conn, student.id_number.trim())?;
    Ok(json!({ "student": stored }))
}

fn students_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    require_office(&ctx, &req.method)?;
    let id = get_required_str(&req.params, "idNumber")?;
    let Some(patch) = req.params.get("patch") else {
        return Err(HandlerErr::new("bad_params", "missing patch"));
    };
    let student = students::update(ctx.conn, &id, patch)?;
    tracing::info!(id_number = %id, "student updated");
    Ok(json!({ "student": student }))
}

fn students_semesters(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let semesters = students::semesters(ctx.conn)?;
    let current = semesters.last().cloned();
    Ok(json!({ "semesters": semesters, "current": current }))
}

fn students_import_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    require_office(&ctx, &req.method)?;
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    if !path.is_file() {
        return Err(HandlerErr::new("not_found", "csv file not found")
            .with_details(json!({ "path": path.to_string_lossy() })));
    }
    let summary = students::import_csv(ctx.conn, &path).map_err(|e| failed("io_failed", e))?;
    tracing::info!(
        imported = summary.imported,
        updated = summary.updated,
        skipped = summary.skipped,
        "student csv imported"
    );
    Ok(json!(summary))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.search" => students_search(state, req),
        "students.get" => students_get(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.semesters" => students_semesters(state, req),
        "students.importCsv" => students_import_csv(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
