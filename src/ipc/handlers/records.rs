use crate::ipc::error::ok;
use crate::ipc::helpers::{
    forbidden, get_opt_limit, get_required_id, get_required_str, require_ctx, Ctx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, ListAccess, RecordType};
use crate::records::{self, ListQuery, RecordKind};
use crate::students;
use serde_json::{json, Value};

#[derive(Clone, Copy)]
enum Op {
    List,
    Get,
    Create,
    Update,
}

fn route(method: &str) -> Option<(RecordKind, Op)> {
    let (family, op) = method.split_once('.')?;
    let kind = match family {
        "cases" => RecordKind::Case,
        "counseling" => RecordKind::Counseling,
        "medical" => RecordKind::Medical,
        _ => return None,
    };
    let op = match op {
        "list" => Op::List,
        "get" => Op::Get,
        "create" => Op::Create,
        "update" => Op::Update,
        _ => return None,
    };
    Some((kind, op))
}

fn record_id(params: &Value, kind: RecordKind) -> Result<i64, HandlerErr> {
    if params.get("id").is_some() {
        get_required_id(params, "id")
    } else {
        get_required_id(params, kind.id_field())
    }
}

fn kind_param(params: &Value) -> Result<RecordKind, HandlerErr> {
    let raw = get_required_str(params, "recordType")?;
    RecordKind::parse(&raw)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown recordType {}", raw)))
}

/// Fetches a list and applies the visibility policy to it.
fn visible_list(
    ctx: &Ctx<'_>,
    method: &str,
    kind: RecordKind,
    query: &ListQuery,
) -> Result<(ListAccess, Vec<Value>), HandlerErr> {
    let user = ctx.user();
    let rt = kind.record_type();
    let access = policy::list_access(&user, rt);
    if access == ListAccess::Denied {
        return Err(forbidden(method, ctx.session, rt));
    }
    let rows = records::list(ctx.conn, kind, query)?;
    Ok((access, policy::filter_list(&user, rt, &rows)))
}

fn records_list(
    state: &mut AppState,
    req: &Request,
    kind: RecordKind,
) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let query = ListQuery::from_params(&req.params);
    let limit = get_opt_limit(&req.params)?;
    let (access, mut rows) = visible_list(&ctx, &req.method, kind, &query)?;
    if let Some(n) = limit {
        rows.truncate(n);
    }
    Ok(json!({
        "recordType": kind.record_type().as_str(),
        "access": access,
        "records": rows,
    }))
}

fn records_get(state: &mut AppState, req: &Request, kind: RecordKind) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let id = record_id(&req.params, kind)?;
    let user = ctx.user();
    let rt = kind.record_type();
    let Some(record) = records::get(ctx.conn, kind, id)? else {
        return Err(HandlerErr::new(
            "not_found",
            format!("{} {} not found", kind.as_str(), id),
        ));
    };
    let value = record.to_value();
    if !policy::can_view_record(&user, rt, &value) {
        return Err(forbidden(&req.method, ctx.session, rt));
    }
    Ok(json!({
        "record": value,
        "canEdit": policy::can_edit(&user, rt),
    }))
}

fn records_create(
    state: &mut AppState,
    req: &Request,
    kind: RecordKind,
) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let rt = kind.record_type();
    if !policy::can_edit(&ctx.user(), rt) {
        return Err(forbidden(&req.method, ctx.session, rt));
    }
    let payload = req.params.get("record").unwrap_or(&req.params);
    let record = records::create(ctx.conn, kind, payload)?;
    tracing::info!(kind = kind.as_str(), id = record.id(), "record created");
    Ok(json!({ "id": record.id(), "record": record.to_value() }))
}

fn records_update(
    state: &mut AppState,
    req: &Request,
    kind: RecordKind,
) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let rt = kind.record_type();
    if !policy::can_edit(&ctx.user(), rt) {
        return Err(forbidden(&req.method, ctx.session, rt));
    }
    let id = record_id(&req.params, kind)?;
    let Some(patch) = req.params.get("patch") else {
        return Err(HandlerErr::new("bad_params", "missing patch"));
    };
    let record = records::update(ctx.conn, kind, id, patch)?;
    tracing::info!(kind = kind.as_str(), id, "record updated");
    Ok(json!({ "record": record.to_value() }))
}

fn student_records(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let kind = kind_param(&req.params)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    if !students::exists(ctx.conn, &student_id)? {
        return Err(HandlerErr::new(
            "not_found",
            format!("student {} not found", student_id),
        ));
    }
    let mut query = ListQuery::from_params(&req.params);
    query.student_id = Some(student_id.clone());
    let (access, rows) = visible_list(&ctx, &req.method, kind, &query)?;
    Ok(json!({
        "studentId": student_id,
        "recordType": kind.record_type().as_str(),
        "access": access,
        "records": rows,
    }))
}

fn records_by_semester(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let kind = kind_param(&req.params)?;
    let query = ListQuery::from_params(&req.params);
    let (access, rows) = visible_list(&ctx, &req.method, kind, &query)?;
    let groups = records::group_by_semester(&rows);
    let current = records::current_semester(&groups).map(str::to_string);
    Ok(json!({
        "recordType": kind.record_type().as_str(),
        "access": access,
        "currentSemester": current,
        "groups": groups,
    }))
}

/// Classifies an arbitrary record and reports what the session may do
/// with it. Needs no workspace.
fn records_inspect(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(session) = state.session.as_ref() else {
        return Err(HandlerErr::new("no_session", "log in first"));
    };
    let Some(record) = req.params.get("record") else {
        return Err(HandlerErr::new("bad_params", "missing record"));
    };
    let Some(obj) = record.as_object() else {
        return Err(HandlerErr::new("bad_params", "record must be an object"));
    };
    let user = session.user();
    let rt = policy::resolve_record_type(obj);
    let can_view = rt != RecordType::Unknown && policy::can_view_record(&user, rt, record);
    Ok(json!({
        "recordType": rt.as_str(),
        "detectedType": policy::classify(obj).as_str(),
        "canView": can_view,
        "canEdit": policy::can_edit(&user, rt),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.records" => student_records(state, req),
        "records.bySemester" => records_by_semester(state, req),
        "records.inspect" => records_inspect(state, req),
        m => {
            let (kind, op) = route(m)?;
            match op {
                Op::List => records_list(state, req, kind),
                Op::Get => records_get(state, req, kind),
                Op::Create => records_create(state, req, kind),
                Op::Update => records_update(state, req, kind),
            }
        }
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
