use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, require_ctx, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Department, RecordType};
use crate::records::{self, RecordKind};
use serde_json::{json, Map, Value};

fn tally_for(conn: &rusqlite::Connection, department: Department) -> Result<Value, HandlerErr> {
    let kind = department
        .owned_record_type()
        .and_then(RecordKind::from_record_type)
        .ok_or_else(|| HandlerErr::new("bad_params", "department has no records to tally"))?;
    Ok(json!(records::tally(conn, kind)?))
}

fn analytics_tally(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let Some(own) = ctx.session.known_department() else {
        tracing::debug!(department = %ctx.session.department, "policy denied tally");
        return Err(HandlerErr::new("forbidden", "unrecognised department"));
    };
    let requested = match get_opt_str(&req.params, "department") {
        None => None,
        Some(raw) if raw.eq_ignore_ascii_case("all") => None,
        Some(raw) => Some(Department::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("unknown department {}", raw))
        })?),
    };

    match (own, requested) {
        (Department::Administrator, None) => {
            let mut all = Map::new();
            for d in [Department::Opd, Department::Gco, Department::Inf] {
                all.insert(d.as_str().to_string(), tally_for(ctx.conn, d)?);
            }
            Ok(json!({ "department": "ALL", "tallies": all }))
        }
        (Department::Administrator, Some(d)) => {
            Ok(json!({ "department": d.as_str(), "tally": tally_for(ctx.conn, d)? }))
        }
        (own, Some(d)) if d != own => {
            tracing::debug!(
                method = %req.method,
                department = own.as_str(),
                record_type = d.owned_record_type().unwrap_or(RecordType::Unknown).as_str(),
                "policy denied"
            );
            Err(HandlerErr::new(
                "forbidden",
                format!("{} cannot view {} tallies", own.as_str(), d.as_str()),
            ))
        }
        (own, _) => Ok(json!({ "department": own.as_str(), "tally": tally_for(ctx.conn, own)? })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "analytics.tally" => analytics_tally(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
