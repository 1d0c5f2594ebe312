//! Record attachments.
//!
//! Files are content-addressed under `<workspace>/attachments/` and indexed
//! in the `attachments` table against `(record_type, record_id)`.

use crate::policy::RecordType;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const ATTACHMENTS_DIR: &str = "attachments";
pub const MAX_ATTACHMENTS_PER_RECORD: usize = 5;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("file type .{extension} is not accepted for {record_type} records")]
    UnsupportedType {
        extension: String,
        record_type: &'static str,
    },
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("a record holds at most 5 attachments")]
    LimitReached,
    #[error("classification {0:?} is not allowed here")]
    Classification(String),
    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),
}

impl AttachmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AttachmentError::UnsupportedType { .. } => "unsupported_type",
            AttachmentError::TooLarge { .. } => "attachment_too_large",
            AttachmentError::LimitReached => "attachment_limit",
            AttachmentError::Classification(_) => "validation_failed",
            AttachmentError::SourceMissing(_) => "not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Medical,
    Psychological,
}

impl Classification {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "medical" => Some(Self::Medical),
            "psychological" => Some(Self::Psychological),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Psychological => "psychological",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub record_type: String,
    pub record_id: i64,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub classification: Option<String>,
    pub stored_path: String,
    pub created_at: String,
}

pub struct NewAttachment<'a> {
    pub record_type: RecordType,
    pub record_id: i64,
    pub source: &'a Path,
    pub file_name: Option<&'a str>,
    pub classification: Option<&'a str>,
}

/// Content type for an accepted extension, `None` when the record type
/// does not take that kind of file.
pub fn content_type_for(record_type: RecordType, extension: &str) -> Option<&'static str> {
    let ext = extension.to_ascii_lowercase();
    let ct = match ext.as_str() {
        "png" => "image/png",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    let allowed: &[&str] = match record_type {
        RecordType::Opd | RecordType::Inf => &["png", "pdf", "docx"],
        RecordType::Gco => &["pdf", "doc", "docx"],
        RecordType::Unknown => &[],
    };
    allowed.contains(&ext.as_str()).then_some(ct)
}

fn resolve_classification(
    record_type: RecordType,
    raw: Option<&str>,
) -> Result<Option<Classification>, AttachmentError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if record_type != RecordType::Inf {
        return Err(AttachmentError::Classification(raw.to_string()));
    }
    Classification::parse(raw)
        .map(Some)
        .ok_or_else(|| AttachmentError::Classification(raw.to_string()))
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn count_for_record(
    conn: &Connection,
    record_type: RecordType,
    record_id: i64,
) -> anyhow::Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attachments WHERE record_type = ? AND record_id = ?",
        (record_type.as_str(), record_id),
        |r| r.get(0),
    )?;
    Ok(usize::try_from(n).unwrap_or(0))
}

/// Validates and stores a file. Errors that callers should surface with a
/// specific code are `AttachmentError`s inside the returned `anyhow::Error`.
pub fn add(
    conn: &Connection,
    workspace: &Path,
    max_bytes: u64,
    new: NewAttachment<'_>,
) -> anyhow::Result<Attachment> {
    let meta = std::fs::metadata(new.source)
        .map_err(|_| AttachmentError::SourceMissing(new.source.to_path_buf()))?;
    if !meta.is_file() {
        return Err(AttachmentError::SourceMissing(new.source.to_path_buf()).into());
    }

    let file_name = new
        .file_name
        .map(str::to_string)
        .or_else(|| {
            new.source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let extension = Path::new(&file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let content_type = content_type_for(new.record_type, &extension).ok_or_else(|| {
        AttachmentError::UnsupportedType {
            extension: extension.clone(),
            record_type: new.record_type.as_str(),
        }
    })?;

    if meta.len() > max_bytes {
        return Err(AttachmentError::TooLarge {
            size: meta.len(),
            limit: max_bytes,
        }
        .into());
    }
    let classification = resolve_classification(new.record_type, new.classification)?;
    if count_for_record(conn, new.record_type, new.record_id)? >= MAX_ATTACHMENTS_PER_RECORD {
        return Err(AttachmentError::LimitReached.into());
    }

    let sha256 = file_sha256(new.source)?;
    let dir = workspace.join(ATTACHMENTS_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let stored_name = format!("{sha256}.{extension}");
    let stored = dir.join(&stored_name);
    if !stored.is_file() {
        std::fs::copy(new.source, &stored).with_context(|| {
            format!(
                "failed to copy {} to {}",
                new.source.to_string_lossy(),
                stored.to_string_lossy()
            )
        })?;
    }

    let att = Attachment {
        id: Uuid::new_v4().to_string(),
        record_type: new.record_type.as_str().to_string(),
        record_id: new.record_id,
        file_name,
        content_type: content_type.to_string(),
        size_bytes: i64::try_from(meta.len()).unwrap_or(i64::MAX),
        sha256,
        classification: classification.map(|c| c.as_str().to_string()),
        stored_path: format!("{ATTACHMENTS_DIR}/{stored_name}"),
        created_at: chrono::Local::now().to_rfc3339(),
    };
    conn.execute(
        "INSERT INTO attachments(
            id, record_type, record_id, file_name, content_type,
            size_bytes, sha256, classification, stored_path, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            att.id,
            att.record_type,
            att.record_id,
            att.file_name,
            att.content_type,
            att.size_bytes,
            att.sha256,
            att.classification,
            att.stored_path,
            att.created_at,
        ],
    )?;
    Ok(att)
}

fn map_attachment(r: &rusqlite::Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: r.get(0)?,
        record_type: r.get(1)?,
        record_id: r.get(2)?,
        file_name: r.get(3)?,
        content_type: r.get(4)?,
        size_bytes: r.get(5)?,
        sha256: r.get(6)?,
        classification: r.get(7)?,
        stored_path: r.get(8)?,
        created_at: r.get(9)?,
    })
}

const SELECT_ATTACHMENT: &str = "SELECT id, record_type, record_id, file_name, content_type,
        size_bytes, sha256, classification, stored_path, created_at
 FROM attachments";

pub fn list(
    conn: &Connection,
    record_type: RecordType,
    record_id: i64,
) -> anyhow::Result<Vec<Attachment>> {
    let sql = format!(
        "{SELECT_ATTACHMENT} WHERE record_type = ? AND record_id = ? ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((record_type.as_str(), record_id), map_attachment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get(conn: &Connection, id: &str) -> anyhow::Result<Option<Attachment>> {
    let sql = format!("{SELECT_ATTACHMENT} WHERE id = ?");
    Ok(conn.query_row(&sql, [id], map_attachment).optional()?)
}

/// Deletes the row, and the stored file once no other row shares its
/// content. Returns the removed attachment.
pub fn remove(conn: &Connection, workspace: &Path, id: &str) -> anyhow::Result<Option<Attachment>> {
    let Some(att) = get(conn, id)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM attachments WHERE id = ?", [id])?;
    let still_used: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attachments WHERE stored_path = ?",
        [&att.stored_path],
        |r| r.get(0),
    )?;
    if still_used == 0 {
        let path = workspace.join(&att.stored_path);
        if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.to_string_lossy()))?;
        }
    }
    Ok(Some(att))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn attachment_code(e: &anyhow::Error) -> Option<&'static str> {
        e.downcast_ref::<AttachmentError>().map(AttachmentError::code)
    }

    #[test]
    fn accepted_types_differ_by_department() {
        assert_eq!(content_type_for(RecordType::Opd, "PNG"), Some("image/png"));
        assert_eq!(content_type_for(RecordType::Opd, "doc"), None);
        assert_eq!(content_type_for(RecordType::Gco, "doc"), Some("application/msword"));
        assert_eq!(content_type_for(RecordType::Gco, "png"), None);
        assert!(content_type_for(RecordType::Inf, "docx").is_some());
        assert_eq!(content_type_for(RecordType::Inf, "exe"), None);
        assert_eq!(content_type_for(RecordType::Unknown, "pdf"), None);
    }

    #[test]
    fn only_inf_attachments_take_a_classification() {
        assert_eq!(
            resolve_classification(RecordType::Inf, Some("Psychological")).expect("inf"),
            Some(Classification::Psychological)
        );
        assert!(resolve_classification(RecordType::Opd, Some("medical")).is_err());
        assert!(resolve_classification(RecordType::Inf, Some("dental")).is_err());
        assert_eq!(resolve_classification(RecordType::Gco, Some("  ")).expect("blank"), None);
    }

    #[test]
    fn add_dedupes_content_and_enforces_limits() {
        let ws = temp_dir("ccmr-attach");
        let conn = crate::db::open_db(&ws).expect("open");
        let src = ws.join("note.pdf");
        std::fs::write(&src, b"%PDF-1.4 hello").expect("write src");

        let mut ids = Vec::new();
        for _ in 0..MAX_ATTACHMENTS_PER_RECORD {
            let att = add(
                &conn,
                &ws,
                1024,
                NewAttachment {
                    record_type: RecordType::Opd,
                    record_id: 1,
                    source: &src,
                    file_name: None,
                    classification: None,
                },
            )
            .expect("add");
            assert_eq!(att.content_type, "application/pdf");
            assert!(ws.join(&att.stored_path).is_file());
            ids.push(att.id);
        }
        let stored: Vec<_> = std::fs::read_dir(ws.join(ATTACHMENTS_DIR))
            .expect("read dir")
            .collect();
        assert_eq!(stored.len(), 1);

        let sixth = add(
            &conn,
            &ws,
            1024,
            NewAttachment {
                record_type: RecordType::Opd,
                record_id: 1,
                source: &src,
                file_name: None,
                classification: None,
            },
        )
        .expect_err("sixth attachment");
        assert_eq!(attachment_code(&sixth), Some("attachment_limit"));

        let too_big = add(
            &conn,
            &ws,
            4,
            NewAttachment {
                record_type: RecordType::Opd,
                record_id: 2,
                source: &src,
                file_name: None,
                classification: None,
            },
        )
        .expect_err("too large");
        assert_eq!(attachment_code(&too_big), Some("attachment_too_large"));

        for id in &ids[..4] {
            remove(&conn, &ws, id).expect("remove").expect("existed");
        }
        assert!(ws.join(ATTACHMENTS_DIR).read_dir().expect("dir").next().is_some());
        let last = remove(&conn, &ws, &ids[4]).expect("remove").expect("existed");
        assert!(!ws.join(&last.stored_path).exists());
        assert!(list(&conn, RecordType::Opd, 1).expect("list").is_empty());
        assert!(remove(&conn, &ws, &ids[0]).expect("remove again").is_none());

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn executable_is_rejected() {
        let ws = temp_dir("ccmr-attach-exe");
        let conn = crate::db::open_db(&ws).expect("open");
        let src = ws.join("tool.exe");
        std::fs::write(&src, b"MZ").expect("write");
        let e = add(
            &conn,
            &ws,
            1024,
            NewAttachment {
                record_type: RecordType::Inf,
                record_id: 1,
                source: &src,
                file_name: None,
                classification: Some("medical"),
            },
        )
        .expect_err("exe");
        assert_eq!(attachment_code(&e), Some("unsupported_type"));
        let _ = std::fs::remove_dir_all(ws);
    }
}
