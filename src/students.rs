use crate::error::{StoreError, StoreResult};
use crate::sorting::{sort_records, SortSpec};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

pub const SEARCH_MIN_CHARS: usize = 3;
pub const SEARCH_LIMIT: usize = 10;

const CSV_HEADER: [&str; 7] = [
    "idNumber",
    "name",
    "strand",
    "gradeLevel",
    "section",
    "schoolYearSemester",
    "gender",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id_number: String,
    pub name: String,
    #[serde(default)]
    pub strand: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub school_year_semester: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub semester: Option<String>,
    pub strand: Option<String>,
    pub grade_level: Option<String>,
    pub gender: Option<String>,
    pub sort: Option<SortSpec>,
}

impl StudentFilter {
    pub fn from_params(params: &Value) -> Self {
        let s = |k: &str| {
            params
                .get(k)
                .and_then(|v| v.as_str())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            semester: s("semester"),
            strand: s("strand"),
            grade_level: s("gradeLevel"),
            gender: s("gender"),
            sort: SortSpec::from_params(params),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub warnings: Vec<Value>,
}

const SELECT_COLUMNS: &str =
    "id_number, name, strand, grade_level, section, school_year_semester, gender";

fn row_to_student(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id_number: r.get(0)?,
        name: r.get(1)?,
        strand: r.get(2)?,
        grade_level: r.get(3)?,
        section: r.get(4)?,
        school_year_semester: r.get(5)?,
        gender: r.get(6)?,
    })
}

fn clean(v: &Option<String>) -> Option<String> {
    v.as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate(student: &Student) -> StoreResult<()> {
    if student.id_number.trim().is_empty() {
        return Err(StoreError::validation("idNumber", "must not be empty"));
    }
    if student.name.trim().is_empty() {
        return Err(StoreError::validation("name", "must not be empty"));
    }
    Ok(())
}

pub fn get(conn: &Connection, id_number: &str) -> StoreResult<Option<Student>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM students WHERE id_number = ?");
    Ok(conn
        .query_row(&sql, [id_number], row_to_student)
        .optional()?)
}

pub fn exists(conn: &Connection, id_number: &str) -> StoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM students WHERE id_number = ?",
            [id_number],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Distinct semesters, oldest first. The last entry is the current one.
pub fn semesters(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT school_year_semester FROM students
         WHERE school_year_semester IS NOT NULL AND school_year_semester <> ''
         ORDER BY school_year_semester",
    )?;
    let rows = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists students for one semester (the latest when none is given), then
/// applies the optional column filters and sort.
pub fn list(conn: &Connection, filter: &StudentFilter) -> StoreResult<(Option<String>, Vec<Student>)> {
    let semester = match &filter.semester {
        Some(s) => Some(s.clone()),
        None => semesters(conn)?.pop(),
    };

    let mut sql = format!("SELECT {SELECT_COLUMNS} FROM students WHERE 1 = 1");
    let mut binds: Vec<SqlValue> = Vec::new();
    let mut push = |col: &str, v: &Option<String>| {
        if let Some(v) = v {
            sql.push_str(&format!(" AND {col} = ?"));
            binds.push(SqlValue::Text(v.clone()));
        }
    };
    push("school_year_semester", &semester);
    push("strand", &filter.strand);
    push("grade_level", &filter.grade_level);
    push("gender", &filter.gender);
    sql.push_str(" ORDER BY name, id_number");

    let mut stmt = conn.prepare(&sql)?;
    let mut students = stmt
        .query_map(params_from_iter(binds), row_to_student)?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(spec) = &filter.sort {
        let mut values: Vec<Value> = students
            .iter()
            .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
            .collect();
        sort_records(&mut values, spec);
        students = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
    }

    Ok((semester, students))
}

/// Autocomplete by id-number prefix. Short queries return nothing.
pub fn search(conn: &Connection, query: &str) -> StoreResult<Vec<Student>> {
    let q = query.trim();
    if q.chars().count() < SEARCH_MIN_CHARS {
        return Ok(Vec::new());
    }
    let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM students
         WHERE id_number LIKE ? ESCAPE '\\'
         ORDER BY id_number
         LIMIT {SEARCH_LIMIT}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([format!("{escaped}%")], row_to_student)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create(conn: &Connection, student: &Student) -> StoreResult<()> {
    validate(student)?;
    let id = student.id_number.trim();
    if exists(conn, id)? {
        return Err(StoreError::Conflict(format!("student {id}")));
    }
    insert(conn, student)
}

fn insert(conn: &Connection, student: &Student) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO students(id_number, name, strand, grade_level, section, school_year_semester, gender, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            student.id_number.trim(),
            student.name.trim(),
            clean(&student.strand),
            clean(&student.grade_level),
            clean(&student.section),
            clean(&student.school_year_semester),
            clean(&student.gender),
            chrono::Local::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn overwrite(conn: &Connection, student: &Student) -> StoreResult<()> {
    conn.execute(
        "UPDATE students
         SET name = ?, strand = ?, grade_level = ?, section = ?, school_year_semester = ?, gender = ?, updated_at = ?
         WHERE id_number = ?",
        (
            student.name.trim(),
            clean(&student.strand),
            clean(&student.grade_level),
            clean(&student.section),
            clean(&student.school_year_semester),
            clean(&student.gender),
            chrono::Local::now().to_rfc3339(),
            student.id_number.trim(),
        ),
    )?;
    Ok(())
}

/// Applies a camelCase patch. `idNumber` cannot be changed.
pub fn update(conn: &Connection, id_number: &str, patch: &Value) -> StoreResult<Student> {
    let Some(current) = get(conn, id_number)? else {
        return Err(StoreError::NotFound(format!("student {id_number}")));
    };
    let Some(patch) = patch.as_object() else {
        return Err(StoreError::validation("patch", "must be an object"));
    };
    if let Some(new_id) = patch.get("idNumber").and_then(|v| v.as_str()) {
        if new_id.trim() != current.id_number {
            return Err(StoreError::validation("idNumber", "cannot be changed"));
        }
    }

    let mut merged = serde_json::to_value(&current).unwrap_or_else(|_| json!({}));
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            if k != "idNumber" {
                obj.insert(k.clone(), v.clone());
            }
        }
    }
    let next: Student = serde_json::from_value(merged)
        .map_err(|e| StoreError::validation("patch", e.to_string()))?;
    validate(&next)?;
    overwrite(conn, &next)?;
    get(conn, id_number)?.ok_or_else(|| StoreError::NotFound(format!("student {id_number}")))
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut buf)),
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}

/// Splits CSV text into records paired with the line each one starts on.
/// A quoted field may span lines; its line breaks are kept as `\n`.
fn csv_records(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut open = false;
    for (idx, line) in text.lines().enumerate() {
        if open {
            current.push('\n');
        } else {
            start = idx + 1;
        }
        current.push_str(line);
        // Escaped `""` pairs leave the parity unchanged.
        if line.chars().filter(|c| *c == '"').count() % 2 == 1 {
            open = !open;
        }
        if !open {
            out.push((start, std::mem::take(&mut current)));
        }
    }
    if open {
        out.push((start, current));
    }
    out
}

/// Upserts students from a CSV file whose first row is the header
/// `idNumber,name,strand,gradeLevel,section,schoolYearSemester,gender`.
pub fn import_csv(conn: &Connection, path: &Path) -> anyhow::Result<ImportSummary> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let mut summary = ImportSummary::default();

    let mut records = csv_records(&text).into_iter();
    let header = records
        .next()
        .map(|(_, l)| parse_csv_record(l.trim_start_matches('\u{feff}')))
        .unwrap_or_default();
    let header: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
    if header.len() < 2 || header[0] != CSV_HEADER[0] || header[1] != CSV_HEADER[1] {
        anyhow::bail!("expected header starting with idNumber,name");
    }
    let col = |name: &str| header.iter().position(|h| h == name);
    let cols: Vec<Option<usize>> = CSV_HEADER.iter().map(|h| col(*h)).collect();

    let tx = conn.unchecked_transaction()?;
    for (line_no, raw) in records {
        if raw.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_record(&raw);
        let field = |i: usize| -> Option<String> {
            cols[i]
                .and_then(|c| fields.get(c))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let (Some(id_number), Some(name)) = (field(0), field(1)) else {
            summary.skipped += 1;
            summary.warnings.push(json!({
                "line": line_no,
                "code": "missing_required",
                "message": "idNumber and name are required"
            }));
            continue;
        };
        let student = Student {
            id_number,
            name,
            strand: field(2),
            grade_level: field(3),
            section: field(4),
            school_year_semester: field(5),
            gender: field(6),
        };
        if exists(&tx, &student.id_number)? {
            overwrite(&tx, &student)?;
            summary.updated += 1;
        } else {
            insert(&tx, &student)?;
            summary.imported += 1;
        }
    }
    tx.commit()?;
    Ok(summary)
}
