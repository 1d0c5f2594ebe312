//! Cross-department record visibility.
//!
//! Every record is owned by the department that created it. Other
//! departments only ever see a filtered view. All functions here are pure:
//! no I/O, no shared state, and no failure path. Unrecognised departments
//! and unknown record types are denied rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Department {
    #[serde(rename = "OPD")]
    Opd,
    #[serde(rename = "GCO")]
    Gco,
    #[serde(rename = "INF")]
    Inf,
    Administrator,
}

impl Department {
    pub const ALL: [Department; 4] = [
        Department::Opd,
        Department::Gco,
        Department::Inf,
        Department::Administrator,
    ];

    pub fn parse(raw: &str) -> Option<Department> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPD" => Some(Department::Opd),
            "GCO" => Some(Department::Gco),
            "INF" => Some(Department::Inf),
            "ADMINISTRATOR" | "ADMIN" => Some(Department::Administrator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Department::Opd => "OPD",
            Department::Gco => "GCO",
            Department::Inf => "INF",
            Department::Administrator => "Administrator",
        }
    }

    /// The record type this department creates, if any.
    pub fn owned_record_type(self) -> Option<RecordType> {
        match self {
            Department::Opd => Some(RecordType::Opd),
            Department::Gco => Some(RecordType::Gco),
            Department::Inf => Some(RecordType::Inf),
            Department::Administrator => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "OPD")]
    Opd,
    #[serde(rename = "GCO")]
    Gco,
    #[serde(rename = "INF")]
    Inf,
    Unknown,
}

impl RecordType {
    pub fn parse(raw: &str) -> RecordType {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPD" | "CASE" => RecordType::Opd,
            "GCO" | "COUNSELING" => RecordType::Gco,
            "INF" | "MEDICAL" => RecordType::Inf,
            _ => RecordType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Opd => "OPD",
            RecordType::Gco => "GCO",
            RecordType::Inf => "INF",
            RecordType::Unknown => "Unknown",
        }
    }
}

/// The acting user as far as the policy is concerned.
///
/// `department` is `None` when the session carried a department string the
/// policy does not recognise; every decision for such a user is a deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub department: Option<Department>,
}

impl User {
    pub fn new(department: Department) -> Self {
        Self {
            department: Some(department),
        }
    }

    pub fn from_department_str(raw: &str) -> Self {
        Self {
            department: Department::parse(raw),
        }
    }
}

/// How much of a same-type record list a user may retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ListAccess {
    Full,
    Filtered,
    Denied,
}

// --- classification ---------------------------------------------------------

const MEDICAL_ID_FIELDS: &[&str] = &["mr_medical_id"];
const GENERIC_ID_FIELDS: &[&str] = &["recordId"];
const MEDICAL_LINK_FIELDS: &[&str] = &["mr_student_id", "medicalDetails"];
const COUNSELING_ID_FIELDS: &[&str] = &["cor_record_id"];
const SESSION_NUMBER_FIELDS: &[&str] = &["sessionNumber", "cor_session_number"];
const CASE_FIELDS: &[&str] = &["cr_case_id", "caseNo", "violationLevel"];

/// A field counts as carried only when it holds a non-empty value.
fn carries(record: &Map<String, Value>, field: &str) -> bool {
    match record.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn carries_any(record: &Map<String, Value>, fields: &[&str]) -> bool {
    fields.iter().any(|f| carries(record, f))
}

/// Infers which department owns an untagged record from the fields it
/// carries. Priority is INF, then GCO, then OPD; a record that matches none
/// of the rules is `Unknown`.
pub fn classify(record: &Map<String, Value>) -> RecordType {
    let generic_id = carries_any(record, GENERIC_ID_FIELDS);

    if carries_any(record, MEDICAL_ID_FIELDS)
        || (generic_id && carries_any(record, MEDICAL_LINK_FIELDS))
    {
        return RecordType::Inf;
    }
    if carries_any(record, COUNSELING_ID_FIELDS)
        || (generic_id && carries_any(record, SESSION_NUMBER_FIELDS))
    {
        return RecordType::Gco;
    }
    if carries_any(record, CASE_FIELDS) {
        return RecordType::Opd;
    }
    RecordType::Unknown
}

/// Like [`classify`], but an explicit `recordType` tag wins when it names a
/// known type.
pub fn resolve_record_type(record: &Map<String, Value>) -> RecordType {
    if let Some(tag) = record.get("recordType").and_then(|v| v.as_str()) {
        let t = RecordType::parse(tag);
        if t != RecordType::Unknown {
            return t;
        }
    }
    classify(record)
}

// --- decisions --------------------------------------------------------------

pub fn can_view(user: &User, record_type: RecordType) -> bool {
    use RecordType::*;
    matches!(
        (user.department, record_type),
        (Some(Department::Opd), Opd | Inf)
            | (Some(Department::Gco), Gco)
            | (Some(Department::Inf), Inf)
            | (Some(Department::Administrator), Opd | Gco | Inf)
    )
}

pub fn can_edit(user: &User, record_type: RecordType) -> bool {
    use RecordType::*;
    matches!(
        (user.department, record_type),
        (Some(Department::Opd), Opd | Inf)
            | (Some(Department::Gco), Gco)
            | (Some(Department::Inf), Inf)
    )
}

fn filter_rule(user: &User, record_type: RecordType) -> Option<fn(&Value) -> bool> {
    match (user.department?, record_type) {
        (Department::Gco, RecordType::Opd) | (Department::Gco, RecordType::Inf) => {
            Some(is_referred)
        }
        (Department::Inf, RecordType::Gco) => Some(is_psychological),
        _ => None,
    }
}

pub fn list_access(user: &User, record_type: RecordType) -> ListAccess {
    if can_view(user, record_type) {
        ListAccess::Full
    } else if filter_rule(user, record_type).is_some() {
        ListAccess::Filtered
    } else {
        ListAccess::Denied
    }
}

/// Returns the subset of `records` the user is entitled to receive.
///
/// Order is preserved and the input is never modified. Applying the same
/// filter twice yields the same result.
pub fn filter_list(user: &User, record_type: RecordType, records: &[Value]) -> Vec<Value> {
    if user.department.is_none() {
        return Vec::new();
    }
    match filter_rule(user, record_type) {
        Some(keep) => records.iter().filter(|r| keep(r)).cloned().collect(),
        None => records.to_vec(),
    }
}

/// Per-record view check: direct access, or the record is one the filtered
/// list would have surfaced.
pub fn can_view_record(user: &User, record_type: RecordType, record: &Value) -> bool {
    if can_view(user, record_type) {
        return true;
    }
    match filter_rule(user, record_type) {
        Some(keep) => keep(record),
        None => false,
    }
}

fn flag(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "yes" | "true" | "y" | "1"
        ),
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        _ => false,
    }
}

pub fn is_referred(record: &Value) -> bool {
    flag(record.get("referred"))
}

pub fn is_psychological(record: &Value) -> bool {
    let condition_yes = record
        .get("psychologicalCondition")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().eq_ignore_ascii_case("yes"))
        .unwrap_or(false);
    condition_yes || flag(record.get("isPsychological"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TYPES: [RecordType; 4] = [
        RecordType::Opd,
        RecordType::Gco,
        RecordType::Inf,
        RecordType::Unknown,
    ];

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    fn user(d: Department) -> User {
        User::new(d)
    }

    #[test]
    fn classify_empty_record_is_unknown() {
        assert_eq!(classify(&Map::new()), RecordType::Unknown);
        assert_eq!(classify(&obj(json!({ "name": "x" }))), RecordType::Unknown);
    }

    #[test]
    fn classify_follows_priority() {
        assert_eq!(classify(&obj(json!({ "mr_medical_id": 3 }))), RecordType::Inf);
        assert_eq!(
            classify(&obj(json!({ "recordId": 1, "mr_student_id": "2024-001" }))),
            RecordType::Inf
        );
        assert_eq!(classify(&obj(json!({ "cor_record_id": 9 }))), RecordType::Gco);
        assert_eq!(
            classify(&obj(json!({ "recordId": 1, "sessionNumber": 2 }))),
            RecordType::Gco
        );
        assert_eq!(classify(&obj(json!({ "caseNo": 12 }))), RecordType::Opd);
        assert_eq!(
            classify(&obj(json!({ "violationLevel": "Major" }))),
            RecordType::Opd
        );
    }

    #[test]
    fn classify_dual_match_resolves_to_inf() {
        let r = obj(json!({
            "recordId": 4,
            "medicalDetails": "asthma",
            "sessionNumber": 2
        }));
        assert_eq!(classify(&r), RecordType::Inf);
    }

    #[test]
    fn classify_ignores_empty_values() {
        // recordId alone, or with empty link fields, is not enough.
        assert_eq!(
            classify(&obj(json!({ "recordId": 4, "medicalDetails": "" }))),
            RecordType::Unknown
        );
        assert_eq!(
            classify(&obj(json!({ "recordId": 0, "sessionNumber": 1 }))),
            RecordType::Unknown
        );
        assert_eq!(
            classify(&obj(json!({ "caseNo": null, "violationLevel": "" }))),
            RecordType::Unknown
        );
    }

    #[test]
    fn classify_does_not_read_tag_but_resolve_does() {
        let r = obj(json!({ "recordType": "GCO", "caseNo": 7 }));
        assert_eq!(classify(&r), RecordType::Opd);
        assert_eq!(resolve_record_type(&r), RecordType::Gco);

        let bogus = obj(json!({ "recordType": "XYZ", "caseNo": 7 }));
        assert_eq!(resolve_record_type(&bogus), RecordType::Opd);
    }

    #[test]
    fn opd_edit_set_matches_view_grant() {
        let opd = user(Department::Opd);
        for t in TYPES {
            let expected = matches!(t, RecordType::Opd | RecordType::Inf);
            assert_eq!(can_edit(&opd, t), expected, "{t:?}");
            assert_eq!(can_view(&opd, t), expected, "{t:?}");
        }
    }

    #[test]
    fn administrator_views_all_and_edits_nothing() {
        let admin = user(Department::Administrator);
        for t in TYPES {
            assert!(!can_edit(&admin, t));
            assert_eq!(can_view(&admin, t), t != RecordType::Unknown);
        }
    }

    #[test]
    fn owners_edit_only_their_own() {
        assert!(can_edit(&user(Department::Gco), RecordType::Gco));
        assert!(!can_edit(&user(Department::Gco), RecordType::Opd));
        assert!(!can_edit(&user(Department::Gco), RecordType::Inf));
        assert!(can_edit(&user(Department::Inf), RecordType::Inf));
        assert!(!can_edit(&user(Department::Inf), RecordType::Gco));
    }

    #[test]
    fn direct_view_is_denied_for_filtered_pairs() {
        assert!(can_view(&user(Department::Opd), RecordType::Inf));
        assert!(!can_view(&user(Department::Gco), RecordType::Inf));
        assert!(!can_view(&user(Department::Gco), RecordType::Opd));
        assert!(!can_view(&user(Department::Inf), RecordType::Gco));
        assert!(!can_view(&user(Department::Inf), RecordType::Opd));
    }

    #[test]
    fn unknown_record_type_is_denied_for_everyone() {
        for d in Department::ALL {
            assert!(!can_view(&user(d), RecordType::Unknown));
            assert!(!can_edit(&user(d), RecordType::Unknown));
        }
    }

    #[test]
    fn unrecognised_department_fails_closed() {
        let xyz = User::from_department_str("XYZ");
        assert_eq!(xyz.department, None);
        let records = vec![json!({ "caseId": 1, "referred": true })];
        for t in TYPES {
            assert!(!can_view(&xyz, t));
            assert!(!can_edit(&xyz, t));
            assert_eq!(list_access(&xyz, t), ListAccess::Denied);
            assert!(filter_list(&xyz, t, &records).is_empty());
        }
    }

    #[test]
    fn gco_sees_only_referred_cases() {
        let records = vec![
            json!({ "caseId": 1, "referred": true }),
            json!({ "caseId": 2, "referred": false }),
        ];
        let out = filter_list(&user(Department::Gco), RecordType::Opd, &records);
        assert_eq!(out, vec![json!({ "caseId": 1, "referred": true })]);
    }

    #[test]
    fn gco_sees_only_referred_medical_records() {
        let records = vec![
            json!({ "recordId": 1, "referred": "No" }),
            json!({ "recordId": 2, "referred": "Yes" }),
        ];
        let out = filter_list(&user(Department::Gco), RecordType::Inf, &records);
        assert_eq!(out, vec![json!({ "recordId": 2, "referred": "Yes" })]);
    }

    #[test]
    fn inf_sees_only_psychological_counseling() {
        let records = vec![
            json!({ "recordId": 1, "psychologicalCondition": "YES" }),
            json!({ "recordId": 2, "psychologicalCondition": "NO" }),
            json!({ "recordId": 3, "isPsychological": "Yes" }),
        ];
        let out = filter_list(&user(Department::Inf), RecordType::Gco, &records);
        assert_eq!(
            out,
            vec![
                json!({ "recordId": 1, "psychologicalCondition": "YES" }),
                json!({ "recordId": 3, "isPsychological": "Yes" }),
            ]
        );
    }

    #[test]
    fn filter_is_idempotent_and_order_preserving() {
        let records: Vec<Value> = (1..=8)
            .map(|i| json!({ "caseId": i, "referred": i % 3 != 0 }))
            .collect();
        let gco = user(Department::Gco);
        let once = filter_list(&gco, RecordType::Opd, &records);
        let twice = filter_list(&gco, RecordType::Opd, &once);
        assert_eq!(once, twice);
        let ids: Vec<i64> = once.iter().filter_map(|r| r["caseId"].as_i64()).collect();
        assert_eq!(ids, vec![1, 2, 4, 5, 7, 8]);
    }

    #[test]
    fn owners_and_admin_get_lists_unchanged() {
        let records = vec![
            json!({ "caseId": 1, "referred": false }),
            json!({ "caseId": 2, "referred": true }),
        ];
        assert_eq!(
            filter_list(&user(Department::Opd), RecordType::Opd, &records),
            records
        );
        assert_eq!(
            filter_list(&user(Department::Administrator), RecordType::Opd, &records),
            records
        );
    }

    #[test]
    fn list_access_distinguishes_full_filtered_denied() {
        assert_eq!(
            list_access(&user(Department::Opd), RecordType::Inf),
            ListAccess::Full
        );
        assert_eq!(
            list_access(&user(Department::Gco), RecordType::Opd),
            ListAccess::Filtered
        );
        assert_eq!(
            list_access(&user(Department::Inf), RecordType::Gco),
            ListAccess::Filtered
        );
        assert_eq!(
            list_access(&user(Department::Inf), RecordType::Opd),
            ListAccess::Denied
        );
        assert_eq!(
            list_access(&user(Department::Opd), RecordType::Gco),
            ListAccess::Denied
        );
    }

    #[test]
    fn record_level_view_follows_filter() {
        let gco = user(Department::Gco);
        assert!(can_view_record(
            &gco,
            RecordType::Opd,
            &json!({ "caseId": 1, "referred": true })
        ));
        assert!(!can_view_record(
            &gco,
            RecordType::Opd,
            &json!({ "caseId": 2, "referred": false })
        ));
        assert!(!can_view_record(
            &user(Department::Inf),
            RecordType::Opd,
            &json!({ "caseId": 3, "referred": true })
        ));
    }

    #[test]
    fn department_parse_is_case_insensitive() {
        assert_eq!(Department::parse("opd"), Some(Department::Opd));
        assert_eq!(Department::parse(" Gco "), Some(Department::Gco));
        assert_eq!(
            Department::parse("administrator"),
            Some(Department::Administrator)
        );
        assert_eq!(Department::parse(""), None);
    }
}
