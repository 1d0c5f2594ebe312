use crate::attachments::{self, AttachmentError, NewAttachment};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    failed, forbidden, get_opt_str, get_required_id, get_required_str, require_ctx, Ctx,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, RecordType};
use crate::records::{self, RecordKind};
use serde_json::{json, Value};
use std::path::PathBuf;

fn attachment_failure(e: anyhow::Error) -> HandlerErr {
    match e.downcast_ref::<AttachmentError>() {
        Some(ae) => {
            tracing::debug!(code = ae.code(), error = %ae, "attachment rejected");
            HandlerErr::new(ae.code(), ae.to_string())
        }
        None => failed("io_failed", e),
    }
}

/// Resolves `recordType`/`recordId` to a stored record's wire form.
fn target_record(ctx: &Ctx<'_>, params: &Value) -> Result<(RecordKind, i64, Value), HandlerErr> {
    let raw = get_required_str(params, "recordType")?;
    let kind = RecordKind::parse(&raw)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown recordType {}", raw)))?;
    let id = get_required_id(params, "recordId")?;
    match records::get(ctx.conn, kind, id)? {
        Some(r) => Ok((kind, id, r.to_value())),
        None => Err(HandlerErr::new(
            "not_found",
            format!("{} {} not found", kind.as_str(), id),
        )),
    }
}

fn attachments_add(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let max_bytes = state.config.max_attachment_bytes;
    let ctx = require_ctx(state)?;
    let (kind, record_id, _) = target_record(&ctx, &req.params)?;
    let rt = kind.record_type();
    if !policy::can_edit(&ctx.user(), rt) {
        return Err(forbidden(&req.method, ctx.session, rt));
    }
    let source = PathBuf::from(get_required_str(&req.params, "path")?);
    let file_name = get_opt_str(&req.params, "fileName");
    let classification = get_opt_str(&req.params, "classification");

    let att = attachments::add(
        ctx.conn,
        ctx.workspace,
        max_bytes,
        NewAttachment {
            record_type: rt,
            record_id,
            source: &source,
            file_name: file_name.as_deref(),
            classification: classification.as_deref(),
        },
    )
    .map_err(attachment_failure)?;
    tracing::info!(kind = kind.as_str(), record_id, attachment = %att.id, "attachment added");
    Ok(json!({ "attachment": att }))
}

fn attachments_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let (kind, record_id, record) = target_record(&ctx, &req.params)?;
    let rt = kind.record_type();
    if !policy::can_view_record(&ctx.user(), rt, &record) {
        return Err(forbidden(&req.method, ctx.session, rt));
    }
    let rows = attachments::list(ctx.conn, rt, record_id).map_err(|e| failed("db_query_failed", e))?;
    Ok(json!({
        "attachments": rows,
        "remaining": attachments::MAX_ATTACHMENTS_PER_RECORD.saturating_sub(rows.len()),
    }))
}

fn attachments_remove(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let ctx = require_ctx(state)?;
    let id = get_required_str(&req.params, "id")?;
    let Some(att) = attachments::get(ctx.conn, &id).map_err(|e| failed("db_query_failed", e))? else {
        return Err(HandlerErr::new("not_found", format!("attachment {} not found", id)));
    };
    let rt = RecordType::parse(&att.record_type);
    if !policy::can_edit(&ctx.user(), rt) {
        return Err(forbidden(&req.method, ctx.session, rt));
    }
    attachments::remove(ctx.conn, ctx.workspace, &id).map_err(|e| failed("io_failed", e))?;
    tracing::info!(attachment = %id, "attachment removed");
    Ok(json!({ "removed": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attachments.add" => attachments_add(state, req),
        "attachments.list" => attachments_list(state, req),
        "attachments.remove" => attachments_remove(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
