//! Case, counseling and medical records.
//!
//! Each department owns one table. Records leave this module as camelCase
//! JSON carrying an explicit `recordType` tag plus the student display
//! fields, which is the shape the visibility policy filters on.

use crate::error::{StoreError, StoreResult};
use crate::policy::RecordType;
use crate::sorting::{sort_records, SortSpec};
use crate::students;
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Case,
    Counseling,
    Medical,
}

impl RecordKind {
    /// Accepts `case`/`counseling`/`medical` as well as department codes.
    pub fn parse(raw: &str) -> Option<RecordKind> {
        RecordKind::from_record_type(RecordType::parse(raw))
    }

    pub fn from_record_type(t: RecordType) -> Option<RecordKind> {
        match t {
            RecordType::Opd => Some(RecordKind::Case),
            RecordType::Gco => Some(RecordKind::Counseling),
            RecordType::Inf => Some(RecordKind::Medical),
            RecordType::Unknown => None,
        }
    }

    pub fn record_type(self) -> RecordType {
        match self {
            RecordKind::Case => RecordType::Opd,
            RecordKind::Counseling => RecordType::Gco,
            RecordKind::Medical => RecordType::Inf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Case => "case",
            RecordKind::Counseling => "counseling",
            RecordKind::Medical => "medical",
        }
    }

    /// JSON field carrying the record id.
    pub fn id_field(self) -> &'static str {
        match self {
            RecordKind::Case => "caseId",
            RecordKind::Counseling | RecordKind::Medical => "recordId",
        }
    }

    fn table(self) -> &'static str {
        match self {
            RecordKind::Case => "case_records",
            RecordKind::Counseling => "counseling_records",
            RecordKind::Medical => "medical_records",
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            RecordKind::Case => "case_id",
            RecordKind::Counseling | RecordKind::Medical => "record_id",
        }
    }

    pub fn buckets(self) -> &'static [&'static str] {
        match self {
            RecordKind::Case => &["ALL", "MINOR", "MAJOR", "SERIOUS", "ONGOING", "RESOLVED"],
            RecordKind::Counseling => &["ALL", "TO_SCHEDULE", "SCHEDULED", "DONE"],
            RecordKind::Medical => &["ALL", "MEDICAL", "PSYCHOLOGICAL", "MEDICALPSYCHOLOGICAL"],
        }
    }
}

// --- enums ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationLevel {
    Minor,
    Major,
    Serious,
}

impl ViolationLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_lowercase();
        let s = s.strip_suffix("offense").unwrap_or(&s).trim();
        match s {
            "minor" => Some(Self::Minor),
            "major" => Some(Self::Major),
            "serious" => Some(Self::Serious),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minor => "Minor",
            Self::Major => "Major",
            Self::Serious => "Serious",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaseStatus {
    Ongoing,
    Resolved,
}

impl CaseStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let s: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match s.as_str() {
            "ongoing" => Some(Self::Ongoing),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ongoing => "Ongoing",
            Self::Resolved => "Resolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CounselingStatus {
    #[serde(rename = "TO SCHEDULE")]
    ToSchedule,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "DONE")]
    Done,
}

impl CounselingStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_uppercase().replace('_', " ");
        match s.as_str() {
            "TO SCHEDULE" | "TOSCHEDULE" => Some(Self::ToSchedule),
            "SCHEDULED" => Some(Self::Scheduled),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToSchedule => "TO SCHEDULE",
            Self::Scheduled => "SCHEDULED",
            Self::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PsychologicalCondition {
    Yes,
    No,
    Unconfirmed,
}

impl PsychologicalCondition {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(Self::Yes),
            "NO" => Some(Self::No),
            "UNCONFIRMED" => Some(Self::Unconfirmed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Unconfirmed => "UNCONFIRMED",
        }
    }
}

// --- typed records ----------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub name: Option<String>,
    pub strand: Option<String>,
    pub grade_level: Option<String>,
    pub section: Option<String>,
    pub school_year_semester: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub case_id: i64,
    pub case_no: i64,
    pub student_id: String,
    pub violation_level: ViolationLevel,
    pub status: CaseStatus,
    pub referred: bool,
    pub description: String,
    pub remarks: String,
    pub date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub student: StudentInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselingRecord {
    pub record_id: i64,
    pub student_id: String,
    pub session_number: i64,
    pub status: CounselingStatus,
    pub psychological_condition: PsychologicalCondition,
    pub date: Option<String>,
    pub time: Option<String>,
    pub concern: String,
    pub remarks: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub student: StudentInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub record_id: i64,
    pub student_id: String,
    pub subject: String,
    pub status: String,
    pub medical_details: String,
    pub remarks: String,
    pub is_medical: bool,
    pub is_psychological: bool,
    pub referred: bool,
    pub date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub student: StudentInfo,
}

#[derive(Debug, Clone)]
pub enum Record {
    Case(CaseRecord),
    Counseling(CounselingRecord),
    Medical(MedicalRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Case(_) => RecordKind::Case,
            Record::Counseling(_) => RecordKind::Counseling,
            Record::Medical(_) => RecordKind::Medical,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Record::Case(r) => r.case_id,
            Record::Counseling(r) => r.record_id,
            Record::Medical(r) => r.record_id,
        }
    }

    /// Wire form, tagged with `recordType`.
    pub fn to_value(&self) -> Value {
        let v = match self {
            Record::Case(r) => serde_json::to_value(r),
            Record::Counseling(r) => serde_json::to_value(r),
            Record::Medical(r) => serde_json::to_value(r),
        };
        let mut v = v.unwrap_or(Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.insert(
                "recordType".to_string(),
                Value::String(self.kind().record_type().as_str().to_string()),
            );
        }
        v
    }

    /// `None` when the bucket does not exist for this record kind.
    pub fn matches_bucket(&self, bucket: &str) -> Option<bool> {
        let b = bucket.trim().to_ascii_uppercase();
        if b == "ALL" {
            return Some(true);
        }
        match self {
            Record::Case(r) => match b.as_str() {
                "MINOR" => Some(r.violation_level == ViolationLevel::Minor),
                "MAJOR" => Some(r.violation_level == ViolationLevel::Major),
                "SERIOUS" => Some(r.violation_level == ViolationLevel::Serious),
                "ONGOING" => Some(r.status == CaseStatus::Ongoing),
                "RESOLVED" => Some(r.status == CaseStatus::Resolved),
                _ => None,
            },
            Record::Counseling(r) => match b.as_str() {
                "TO_SCHEDULE" => Some(r.status == CounselingStatus::ToSchedule),
                "SCHEDULED" => Some(r.status == CounselingStatus::Scheduled),
                "DONE" => Some(r.status == CounselingStatus::Done),
                _ => None,
            },
            Record::Medical(r) => match b.as_str() {
                "MEDICAL" => Some(r.is_medical),
                "PSYCHOLOGICAL" => Some(r.is_psychological),
                "MEDICALPSYCHOLOGICAL" => Some(r.is_medical && r.is_psychological),
                _ => None,
            },
        }
    }

    fn search_text(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let (student_id, student) = match self {
            Record::Case(r) => {
                out.push(&r.description);
                out.push(&r.remarks);
                (&r.student_id, &r.student)
            }
            Record::Counseling(r) => {
                out.push(&r.concern);
                out.push(&r.remarks);
                (&r.student_id, &r.student)
            }
            Record::Medical(r) => {
                out.push(&r.subject);
                out.push(&r.medical_details);
                out.push(&r.remarks);
                (&r.student_id, &r.student)
            }
        };
        out.push(student_id);
        if let Some(n) = &student.name {
            out.push(n);
        }
        out
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        self.search_text()
            .iter()
            .any(|s| s.to_lowercase().contains(&q))
    }
}

// --- row mapping ------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
#[error("unrecognised stored value {0:?}")]
struct BadStoredValue(String);

fn enum_col<T>(r: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(BadStoredValue(raw)),
        )
    })
}

fn student_cols(r: &Row<'_>, start: usize) -> rusqlite::Result<StudentInfo> {
    Ok(StudentInfo {
        name: r.get(start)?,
        strand: r.get(start + 1)?,
        grade_level: r.get(start + 2)?,
        section: r.get(start + 3)?,
        school_year_semester: r.get(start + 4)?,
    })
}

const STUDENT_JOIN_COLUMNS: &str =
    "s.name, s.strand, s.grade_level, s.section, s.school_year_semester";

fn select_sql(kind: RecordKind) -> String {
    let cols = match kind {
        RecordKind::Case => {
            "r.case_id, r.student_id, r.violation_level, r.status, r.referred, r.description, r.remarks, r.date, r.created_at, r.updated_at"
        }
        RecordKind::Counseling => {
            "r.record_id, r.student_id, r.session_number, r.status, r.psychological_condition, r.date, r.time, r.concern, r.remarks, r.created_at, r.updated_at"
        }
        RecordKind::Medical => {
            "r.record_id, r.student_id, r.subject, r.status, r.medical_details, r.remarks, r.is_medical, r.is_psychological, r.referred, r.date, r.created_at, r.updated_at"
        }
    };
    format!(
        "SELECT {cols}, {STUDENT_JOIN_COLUMNS}
         FROM {} r
         LEFT JOIN students s ON s.id_number = r.student_id",
        kind.table()
    )
}

fn map_row(kind: RecordKind, r: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(match kind {
        RecordKind::Case => {
            let id: i64 = r.get(0)?;
            Record::Case(CaseRecord {
                case_id: id,
                case_no: id,
                student_id: r.get(1)?,
                violation_level: enum_col(r, 2, ViolationLevel::parse)?,
                status: enum_col(r, 3, CaseStatus::parse)?,
                referred: r.get::<_, i64>(4)? != 0,
                description: r.get(5)?,
                remarks: r.get(6)?,
                date: r.get(7)?,
                created_at: r.get(8)?,
                updated_at: r.get(9)?,
                student: student_cols(r, 10)?,
            })
        }
        RecordKind::Counseling => Record::Counseling(CounselingRecord {
            record_id: r.get(0)?,
            student_id: r.get(1)?,
            session_number: r.get(2)?,
            status: enum_col(r, 3, CounselingStatus::parse)?,
            psychological_condition: enum_col(r, 4, PsychologicalCondition::parse)?,
            date: r.get(5)?,
            time: r.get(6)?,
            concern: r.get(7)?,
            remarks: r.get(8)?,
            created_at: r.get(9)?,
            updated_at: r.get(10)?,
            student: student_cols(r, 11)?,
        }),
        RecordKind::Medical => Record::Medical(MedicalRecord {
            record_id: r.get(0)?,
            student_id: r.get(1)?,
            subject: r.get(2)?,
            status: r.get(3)?,
            medical_details: r.get(4)?,
            remarks: r.get(5)?,
            is_medical: r.get::<_, i64>(6)? != 0,
            is_psychological: r.get::<_, i64>(7)? != 0,
            referred: r.get::<_, i64>(8)? != 0,
            date: r.get(9)?,
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
            student: student_cols(r, 12)?,
        }),
    })
}

// --- queries ----------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub bucket: Option<String>,
    pub student_id: Option<String>,
    pub semester: Option<String>,
    pub query: Option<String>,
    pub sort: Option<SortSpec>,
}

impl ListQuery {
    pub fn from_params(params: &Value) -> Self {
        let s = |k: &str| {
            params
                .get(k)
                .and_then(|v| v.as_str())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            bucket: s("filter"),
            student_id: s("studentId"),
            semester: s("semester"),
            query: s("query"),
            sort: SortSpec::from_params(params),
        }
    }
}

pub fn get(conn: &Connection, kind: RecordKind, id: i64) -> StoreResult<Option<Record>> {
    let sql = format!("{} WHERE r.{} = ?", select_sql(kind), kind.id_column());
    Ok(conn
        .query_row(&sql, [id], |r| map_row(kind, r))
        .optional()?)
}

/// Lists records as tagged JSON, newest first unless a sort is given.
///
/// No visibility filtering happens here; callers apply the policy.
pub fn list(conn: &Connection, kind: RecordKind, q: &ListQuery) -> StoreResult<Vec<Value>> {
    if let Some(bucket) = &q.bucket {
        let b = bucket.to_ascii_uppercase();
        if !kind.buckets().contains(&b.as_str()) {
            return Err(StoreError::validation(
                "filter",
                format!("unknown {} filter {bucket}", kind.as_str()),
            ));
        }
    }

    let mut sql = format!("{} WHERE 1 = 1", select_sql(kind));
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(sid) = &q.student_id {
        sql.push_str(" AND r.student_id = ?");
        binds.push(SqlValue::Text(sid.clone()));
    }
    if let Some(sem) = &q.semester {
        sql.push_str(" AND s.school_year_semester = ?");
        binds.push(SqlValue::Text(sem.clone()));
    }
    sql.push_str(&format!(
        " ORDER BY r.date DESC, r.{} DESC",
        kind.id_column()
    ));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| map_row(kind, r))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out: Vec<Value> = rows
        .iter()
        .filter(|r| {
            q.bucket
                .as_deref()
                .map(|b| r.matches_bucket(b).unwrap_or(false))
                .unwrap_or(true)
        })
        .filter(|r| q.query.as_deref().map(|t| r.matches_query(t)).unwrap_or(true))
        .map(Record::to_value)
        .collect();

    if let Some(spec) = &q.sort {
        sort_records(&mut out, spec);
    }
    Ok(out)
}

// --- writes -----------------------------------------------------------------

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    str_field(obj, key).unwrap_or_default()
}

fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> StoreResult<bool> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::Bool(b)) => return Ok(*b),
            Some(Value::String(s)) => {
                return match s.trim().to_ascii_lowercase().as_str() {
                    "yes" | "true" => Ok(true),
                    "no" | "false" | "" => Ok(false),
                    _ => Err(StoreError::validation(key, "expected Yes or No")),
                }
            }
            Some(_) => return Err(StoreError::validation(key, "expected Yes or No")),
        }
    }
    Ok(false)
}

fn date_field(obj: &Map<String, Value>, key: &str) -> StoreResult<Option<String>> {
    match str_field(obj, key).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(|d| Some(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| StoreError::validation(key, "expected YYYY-MM-DD")),
    }
}

fn required_enum<T>(
    obj: &Map<String, Value>,
    key: &str,
    default: Option<T>,
    parse: fn(&str) -> Option<T>,
) -> StoreResult<T> {
    match str_field(obj, key).filter(|s| !s.is_empty()) {
        Some(raw) => parse(&raw).ok_or_else(|| StoreError::validation(key, format!("unknown value {raw}"))),
        None => default.ok_or_else(|| StoreError::validation(key, "is required")),
    }
}

fn require_student(conn: &Connection, obj: &Map<String, Value>) -> StoreResult<String> {
    let sid = str_field(obj, "studentId")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::validation("studentId", "is required"))?;
    if !students::exists(conn, &sid)? {
        return Err(StoreError::NotFound(format!("student {sid}")));
    }
    Ok(sid)
}

fn next_session_number(conn: &Connection, student_id: &str) -> StoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(session_number), 0) + 1 FROM counseling_records WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?)
}

fn session_number_field(obj: &Map<String, Value>) -> StoreResult<Option<i64>> {
    let n = match obj.get("sessionNumber") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match n {
        Some(v) if v > 0 => Ok(Some(v)),
        _ => Err(StoreError::validation(
            "sessionNumber",
            "must be a positive integer",
        )),
    }
}

/// Validated column values for one record, in table column order.
struct Columns {
    names: &'static [&'static str],
    values: Vec<SqlValue>,
}

fn text(s: String) -> SqlValue {
    SqlValue::Text(s)
}

fn opt_text(s: Option<String>) -> SqlValue {
    s.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn flag(b: bool) -> SqlValue {
    SqlValue::Integer(i64::from(b))
}

fn validate_payload(
    conn: &Connection,
    kind: RecordKind,
    obj: &Map<String, Value>,
    existing_id: Option<i64>,
) -> StoreResult<Columns> {
    let student_id = require_student(conn, obj)?;
    Ok(match kind {
        RecordKind::Case => {
            let level = required_enum(obj, "violationLevel", None, ViolationLevel::parse)?;
            let status = required_enum(obj, "status", Some(CaseStatus::Ongoing), CaseStatus::parse)?;
            Columns {
                names: &[
                    "student_id",
                    "violation_level",
                    "status",
                    "referred",
                    "description",
                    "remarks",
                    "date",
                ],
                values: vec![
                    text(student_id),
                    text(level.as_str().to_string()),
                    text(status.as_str().to_string()),
                    flag(bool_field(obj, &["referred", "referredToGCO"])?),
                    text(text_field(obj, "description")),
                    text(text_field(obj, "remarks")),
                    opt_text(date_field(obj, "date")?),
                ],
            }
        }
        RecordKind::Counseling => {
            let status = required_enum(
                obj,
                "status",
                Some(CounselingStatus::ToSchedule),
                CounselingStatus::parse,
            )?;
            let condition = required_enum(
                obj,
                "psychologicalCondition",
                Some(PsychologicalCondition::Unconfirmed),
                PsychologicalCondition::parse,
            )?;
            let session_number = match session_number_field(obj)? {
                Some(n) => n,
                None if existing_id.is_none() => next_session_number(conn, &student_id)?,
                None => {
                    return Err(StoreError::validation(
                        "sessionNumber",
                        "must be a positive integer",
                    ))
                }
            };
            Columns {
                names: &[
                    "student_id",
                    "session_number",
                    "status",
                    "psychological_condition",
                    "date",
                    "time",
                    "concern",
                    "remarks",
                ],
                values: vec![
                    text(student_id),
                    SqlValue::Integer(session_number),
                    text(status.as_str().to_string()),
                    text(condition.as_str().to_string()),
                    opt_text(date_field(obj, "date")?),
                    opt_text(str_field(obj, "time").filter(|s| !s.is_empty())),
                    text(text_field(obj, "concern")),
                    text(text_field(obj, "remarks")),
                ],
            }
        }
        RecordKind::Medical => {
            let subject = text_field(obj, "subject");
            if subject.is_empty() {
                return Err(StoreError::validation("subject", "is required"));
            }
            let status = text_field(obj, "status");
            if status.is_empty() {
                return Err(StoreError::validation("status", "is required"));
            }
            let is_medical = bool_field(obj, &["isMedical"])?;
            let is_psychological = bool_field(obj, &["isPsychological"])?;
            if !is_medical && !is_psychological {
                return Err(StoreError::validation(
                    "isMedical",
                    "at least one condition (medical or psychological) must be Yes",
                ));
            }
            Columns {
                names: &[
                    "student_id",
                    "subject",
                    "status",
                    "medical_details",
                    "remarks",
                    "is_medical",
                    "is_psychological",
                    "referred",
                    "date",
                ],
                values: vec![
                    text(student_id),
                    text(subject),
                    text(status),
                    text(text_field(obj, "medicalDetails")),
                    text(text_field(obj, "remarks")),
                    flag(is_medical),
                    flag(is_psychological),
                    flag(bool_field(obj, &["referred", "referredToGCO"])?),
                    opt_text(date_field(obj, "date")?),
                ],
            }
        }
    })
}

fn payload_object(payload: &Value) -> StoreResult<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| StoreError::validation("record", "must be an object"))
}

pub fn create(conn: &Connection, kind: RecordKind, payload: &Value) -> StoreResult<Record> {
    let obj = payload_object(payload)?;
    let cols = validate_payload(conn, kind, obj, None)?;
    let now = chrono::Local::now().to_rfc3339();

    let mut names: Vec<&str> = cols.names.to_vec();
    names.extend(["created_at", "updated_at"]);
    let mut values = cols.values;
    values.push(SqlValue::Text(now.clone()));
    values.push(SqlValue::Text(now));

    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        kind.table(),
        names.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(values))?;
    let id = conn.last_insert_rowid();
    get(conn, kind, id)?.ok_or_else(|| StoreError::NotFound(format!("{} {id}", kind.as_str())))
}

/// Merges `patch` over the stored record and re-validates the whole thing.
pub fn update(conn: &Connection, kind: RecordKind, id: i64, patch: &Value) -> StoreResult<Record> {
    let Some(current) = get(conn, kind, id)? else {
        return Err(StoreError::NotFound(format!("{} {id}", kind.as_str())));
    };
    let patch = payload_object(patch)?;

    let mut merged = current.to_value();
    if let Some(obj) = merged.as_object_mut() {
        // "referredToGCO" is the form-field alias for "referred"; the patch
        // value must win over the stored one.
        if patch.contains_key("referredToGCO") {
            obj.remove("referred");
        }
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    let obj = payload_object(&merged)?;
    let cols = validate_payload(conn, kind, obj, Some(id))?;

    let assignments: Vec<String> = cols
        .names
        .iter()
        .map(|n| format!("{n} = ?"))
        .chain(std::iter::once("updated_at = ?".to_string()))
        .collect();
    let mut values = cols.values;
    values.push(SqlValue::Text(chrono::Local::now().to_rfc3339()));
    values.push(SqlValue::Integer(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        kind.table(),
        assignments.join(", "),
        kind.id_column()
    );
    conn.execute(&sql, params_from_iter(values))?;
    get(conn, kind, id)?.ok_or_else(|| StoreError::NotFound(format!("{} {id}", kind.as_str())))
}

// --- semester grouping ------------------------------------------------------

pub const UNASSIGNED_SEMESTER: &str = "Unassigned";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterGroup {
    pub semester: String,
    pub records: Vec<Value>,
}

/// Groups records by `schoolYearSemester`, oldest semester first, keeping
/// record order within a group. Records without a semester go last.
pub fn group_by_semester(records: &[Value]) -> Vec<SemesterGroup> {
    let mut named: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut unassigned: Vec<Value> = Vec::new();
    for r in records {
        match r
            .get("schoolYearSemester")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(sem) => named.entry(sem.to_string()).or_default().push(r.clone()),
            None => unassigned.push(r.clone()),
        }
    }
    let mut out: Vec<SemesterGroup> = named
        .into_iter()
        .map(|(semester, records)| SemesterGroup { semester, records })
        .collect();
    if !unassigned.is_empty() {
        out.push(SemesterGroup {
            semester: UNASSIGNED_SEMESTER.to_string(),
            records: unassigned,
        });
    }
    out
}

/// The latest named semester among the groups.
pub fn current_semester(groups: &[SemesterGroup]) -> Option<&str> {
    groups
        .iter()
        .rev()
        .map(|g| g.semester.as_str())
        .find(|s| *s != UNASSIGNED_SEMESTER)
}

// --- tallies ----------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseTally {
    pub minor: i64,
    pub major: i64,
    pub serious: i64,
    pub ongoing: i64,
    pub resolved: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselingTally {
    pub to_schedule: i64,
    pub scheduled: i64,
    pub done: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalTally {
    pub medical: i64,
    pub psychological: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Tally {
    Case(CaseTally),
    Counseling(CounselingTally),
    Medical(MedicalTally),
}

fn count_by(conn: &Connection, table: &str, column: &str) -> StoreResult<Vec<(String, i64)>> {
    let sql = format!("SELECT {column}, COUNT(*) FROM {table} GROUP BY {column}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn tally(conn: &Connection, kind: RecordKind) -> StoreResult<Tally> {
    Ok(match kind {
        RecordKind::Case => {
            let mut t = CaseTally::default();
            for (level, n) in count_by(conn, "case_records", "violation_level")? {
                match ViolationLevel::parse(&level) {
                    Some(ViolationLevel::Minor) => t.minor += n,
                    Some(ViolationLevel::Major) => t.major += n,
                    Some(ViolationLevel::Serious) => t.serious += n,
                    None => {}
                }
            }
            for (status, n) in count_by(conn, "case_records", "status")? {
                match CaseStatus::parse(&status) {
                    Some(CaseStatus::Ongoing) => t.ongoing += n,
                    Some(CaseStatus::Resolved) => t.resolved += n,
                    None => {}
                }
            }
            t.total = t.minor + t.major + t.serious;
            Tally::Case(t)
        }
        RecordKind::Counseling => {
            let mut t = CounselingTally::default();
            for (status, n) in count_by(conn, "counseling_records", "status")? {
                match CounselingStatus::parse(&status) {
                    Some(CounselingStatus::ToSchedule) => t.to_schedule += n,
                    Some(CounselingStatus::Scheduled) => t.scheduled += n,
                    Some(CounselingStatus::Done) => t.done += n,
                    None => {}
                }
            }
            t.total = t.to_schedule + t.scheduled + t.done;
            Tally::Counseling(t)
        }
        RecordKind::Medical => {
            let (medical, psychological, total) = conn.query_row(
                "SELECT COALESCE(SUM(is_medical), 0), COALESCE(SUM(is_psychological), 0), COUNT(*)
                 FROM medical_records",
                [],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
            )?;
            Tally::Medical(MedicalTally {
                medical,
                psychological,
                total,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enum_parsing_accepts_form_spellings() {
        assert_eq!(ViolationLevel::parse("Minor Offense"), Some(ViolationLevel::Minor));
        assert_eq!(ViolationLevel::parse("SERIOUS"), Some(ViolationLevel::Serious));
        assert_eq!(ViolationLevel::parse("grave"), None);
        assert_eq!(CaseStatus::parse("ON GOING"), Some(CaseStatus::Ongoing));
        assert_eq!(CaseStatus::parse("Resolved"), Some(CaseStatus::Resolved));
        assert_eq!(
            CounselingStatus::parse("to_schedule"),
            Some(CounselingStatus::ToSchedule)
        );
        assert_eq!(
            CounselingStatus::parse("TO SCHEDULE"),
            Some(CounselingStatus::ToSchedule)
        );
        assert_eq!(
            PsychologicalCondition::parse("unconfirmed"),
            Some(PsychologicalCondition::Unconfirmed)
        );
    }

    #[test]
    fn kind_parse_accepts_names_and_department_codes() {
        assert_eq!(RecordKind::parse("case"), Some(RecordKind::Case));
        assert_eq!(RecordKind::parse("GCO"), Some(RecordKind::Counseling));
        assert_eq!(RecordKind::parse("Medical"), Some(RecordKind::Medical));
        assert_eq!(RecordKind::parse("student"), None);
    }

    fn sample_case(level: ViolationLevel, status: CaseStatus) -> Record {
        Record::Case(CaseRecord {
            case_id: 7,
            case_no: 7,
            student_id: "2024-001".into(),
            violation_level: level,
            status,
            referred: true,
            description: "Cutting class".into(),
            remarks: String::new(),
            date: Some("2024-08-01".into()),
            created_at: "t".into(),
            updated_at: "t".into(),
            student: StudentInfo {
                name: Some("Ana Cruz".into()),
                ..Default::default()
            },
        })
    }

    #[test]
    fn case_wire_shape_is_tagged_and_classifiable() {
        let v = sample_case(ViolationLevel::Major, CaseStatus::Ongoing).to_value();
        assert_eq!(v["recordType"], json!("OPD"));
        assert_eq!(v["caseNo"], json!(7));
        assert_eq!(v["violationLevel"], json!("Major"));
        assert_eq!(v["status"], json!("Ongoing"));
        assert_eq!(v["name"], json!("Ana Cruz"));
        let obj = v.as_object().expect("object");
        assert_eq!(crate::policy::classify(obj), RecordType::Opd);
    }

    #[test]
    fn bucket_matching() {
        let r = sample_case(ViolationLevel::Minor, CaseStatus::Resolved);
        assert_eq!(r.matches_bucket("all"), Some(true));
        assert_eq!(r.matches_bucket("MINOR"), Some(true));
        assert_eq!(r.matches_bucket("MAJOR"), Some(false));
        assert_eq!(r.matches_bucket("RESOLVED"), Some(true));
        assert_eq!(r.matches_bucket("DONE"), None);
    }

    #[test]
    fn text_query_matches_student_name_and_description() {
        let r = sample_case(ViolationLevel::Minor, CaseStatus::Ongoing);
        assert!(r.matches_query("ana"));
        assert!(r.matches_query("CUTTING"));
        assert!(r.matches_query("2024-0"));
        assert!(!r.matches_query("infirmary"));
    }

    #[test]
    fn semester_groups_are_ordered_with_unassigned_last() {
        let records = vec![
            json!({ "caseId": 1, "schoolYearSemester": "2024-2025 2nd" }),
            json!({ "caseId": 2 }),
            json!({ "caseId": 3, "schoolYearSemester": "2023-2024 1st" }),
            json!({ "caseId": 4, "schoolYearSemester": "2024-2025 2nd" }),
        ];
        let groups = group_by_semester(&records);
        let names: Vec<&str> = groups.iter().map(|g| g.semester.as_str()).collect();
        assert_eq!(names, vec!["2023-2024 1st", "2024-2025 2nd", UNASSIGNED_SEMESTER]);
        let ids: Vec<i64> = groups[1]
            .records
            .iter()
            .filter_map(|r| r["caseId"].as_i64())
            .collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(current_semester(&groups), Some("2024-2025 2nd"));
        assert_eq!(current_semester(&[]), None);
    }
}
