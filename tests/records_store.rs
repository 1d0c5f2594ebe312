mod test_support;

use serde_json::json;
use test_support::{login, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn medical_validation_and_counseling_numbering() {
    let workspace = temp_dir("ccmr-records-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    login(&mut stdin, &mut reader, "2", "INF");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "student": { "idNumber": "2024-0001", "name": "Cruz, Ana" } }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "medical.create",
        json!({ "record": {
            "studentId": "2024-0001",
            "subject": "Check-up",
            "status": "Done",
            "isMedical": "No",
            "isPsychological": "No"
        }}),
    );
    assert_eq!(code, "validation_failed");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "medical.create",
        json!({ "record": { "studentId": "2024-0001", "status": "Done", "isMedical": true } }),
    );
    assert_eq!(code, "validation_failed");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "medical.create",
        json!({ "record": {
            "studentId": "1999-9999",
            "subject": "Headache",
            "status": "Rested",
            "isMedical": "Yes"
        }}),
    );
    assert_eq!(code, "not_found");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "medical.create",
        json!({ "record": {
            "studentId": "2024-0001",
            "subject": "Panic attack",
            "status": "Referred",
            "isMedical": "Yes",
            "isPsychological": "Yes",
            "date": "2024-09-02"
        }}),
    );
    let id = created.get("id").and_then(|v| v.as_i64()).expect("id");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "medical.update",
        json!({ "recordId": id, "patch": { "isMedical": "No", "isPsychological": "No" } }),
    );
    assert_eq!(code, "validation_failed");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "medical.update",
        json!({ "recordId": id, "patch": { "date": "09/02/2024" } }),
    );
    assert_eq!(code, "validation_failed");

    login(&mut stdin, &mut reader, "10", "GCO");
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "counseling.create",
        json!({ "record": { "studentId": "2024-0001", "concern": "Stress" } }),
    );
    assert_eq!(first.pointer("/record/sessionNumber").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        first.pointer("/record/status").and_then(|v| v.as_str()),
        Some("TO SCHEDULE")
    );
    assert_eq!(
        first.pointer("/record/psychologicalCondition").and_then(|v| v.as_str()),
        Some("UNCONFIRMED")
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "counseling.create",
        json!({ "record": { "studentId": "2024-0001", "status": "to_schedule" } }),
    );
    assert_eq!(second.pointer("/record/sessionNumber").and_then(|v| v.as_i64()), Some(2));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "counseling.create",
        json!({ "record": { "studentId": "2024-0001", "sessionNumber": 0 } }),
    );
    assert_eq!(code, "validation_failed");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn buckets_sorting_semesters_and_tallies() {
    let workspace = temp_dir("ccmr-records-tally");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    login(&mut stdin, &mut reader, "login", "OPD");
    for (i, (id, sem)) in [
        ("2023-0101", Some("2023-2024 2nd")),
        ("2024-0001", Some("2024-2025 1st")),
        ("2024-0002", None),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("st{}", i),
            "students.create",
            json!({ "student": {
                "idNumber": id,
                "name": format!("Student {}", id),
                "schoolYearSemester": sem
            }}),
        );
    }
    let cases = [
        ("2023-0101", "Serious", "Resolved", "2024-02-01"),
        ("2024-0001", "Minor", "Ongoing", "2024-08-01"),
        ("2024-0001", "Minor", "Resolved", "2024-09-10"),
        ("2024-0002", "Major", "Ongoing", "not a date"),
    ];
    for (i, (sid, level, status, date)) in cases.iter().enumerate() {
        let params = if *date == "not a date" {
            json!({ "record": { "studentId": sid, "violationLevel": level, "status": status } })
        } else {
            json!({ "record": { "studentId": sid, "violationLevel": level, "status": status, "date": date } })
        };
        let _ = request_ok(&mut stdin, &mut reader, &format!("c{}", i), "cases.create", params);
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-date",
        "cases.create",
        json!({ "record": { "studentId": "2024-0001", "violationLevel": "Minor", "date": "2024-13-40" } }),
    );
    assert_eq!(code, "validation_failed");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-level",
        "cases.create",
        json!({ "record": { "studentId": "2024-0001", "violationLevel": "Grave" } }),
    );
    assert_eq!(code, "validation_failed");

    let minor = request_ok(
        &mut stdin,
        &mut reader,
        "minor",
        "cases.list",
        json!({ "filter": "MINOR" }),
    );
    let minor_ids: Vec<i64> = minor["records"]
        .as_array()
        .expect("records")
        .iter()
        .filter_map(|r| r["caseId"].as_i64())
        .collect();
    assert_eq!(minor_ids, vec![3, 2]);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-filter",
        "cases.list",
        json!({ "filter": "DONE" }),
    );
    assert_eq!(code, "validation_failed");

    let by_date = request_ok(
        &mut stdin,
        &mut reader,
        "sorted",
        "cases.list",
        json!({ "sort": { "key": "date", "direction": "asc" }, "limit": 3 }),
    );
    let sorted_ids: Vec<i64> = by_date["records"]
        .as_array()
        .expect("records")
        .iter()
        .filter_map(|r| r["caseId"].as_i64())
        .collect();
    assert_eq!(sorted_ids, vec![4, 1, 2]);

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "query",
        "cases.list",
        json!({ "query": "student 2023" }),
    );
    assert_eq!(searched["records"].as_array().map(|a| a.len()), Some(1));

    let grouped = request_ok(
        &mut stdin,
        &mut reader,
        "groups",
        "records.bySemester",
        json!({ "recordType": "case" }),
    );
    let groups: Vec<&str> = grouped["groups"]
        .as_array()
        .expect("groups")
        .iter()
        .filter_map(|g| g["semester"].as_str())
        .collect();
    assert_eq!(groups, vec!["2023-2024 2nd", "2024-2025 1st", "Unassigned"]);
    assert_eq!(grouped["currentSemester"].as_str(), Some("2024-2025 1st"));

    let per_student = request_ok(
        &mut stdin,
        &mut reader,
        "per-student",
        "students.records",
        json!({ "studentId": "2024-0001", "recordType": "OPD" }),
    );
    assert_eq!(per_student["records"].as_array().map(|a| a.len()), Some(2));

    let tally = request_ok(&mut stdin, &mut reader, "tally", "analytics.tally", json!({}));
    assert_eq!(tally["department"].as_str(), Some("OPD"));
    assert_eq!(
        tally["tally"],
        json!({ "minor": 2, "major": 1, "serious": 1, "ongoing": 2, "resolved": 2, "total": 4 })
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "tally-gco",
        "analytics.tally",
        json!({ "department": "GCO" }),
    );
    assert_eq!(code, "forbidden");

    login(&mut stdin, &mut reader, "admin", "Administrator");
    let all = request_ok(&mut stdin, &mut reader, "tally-all", "analytics.tally", json!({}));
    assert_eq!(all["tallies"]["OPD"]["total"].as_i64(), Some(4));
    assert_eq!(all["tallies"]["GCO"]["total"].as_i64(), Some(0));
    assert_eq!(
        all["tallies"]["INF"],
        json!({ "medical": 0, "psychological": 0, "total": 0 })
    );

    let _ = std::fs::remove_dir_all(workspace);
}
