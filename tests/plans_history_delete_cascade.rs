mod test_support;

use rusqlite::Connection;
use serde_json::json;
use test_support::{
    error_code, register_and_login, request_as, request_ok, request_ok_as, sample_plan_params,
    spawn_sidecar, temp_dir,
};

#[test]
fn list_open_chart_and_delete_cascade() {
    let workspace = temp_dir("studyplanner-plans");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let owner = register_and_login(&mut stdin, &mut reader, "owner@example.com", "password123");
    let intruder = register_and_login(&mut stdin, &mut reader, "other@example.com", "password123");

    let first = request_ok_as(
        &mut stdin,
        &mut reader,
        &owner,
        "2",
        "plans.create",
        sample_plan_params("Midterms"),
    );
    let second = request_ok_as(
        &mut stdin,
        &mut reader,
        &owner,
        "3",
        "plans.create",
        sample_plan_params("Finals"),
    );
    let first_id = first["planId"].as_str().expect("id").to_string();
    let second_id = second["planId"].as_str().expect("id").to_string();

    let list = request_ok_as(&mut stdin, &mut reader, &owner, "4", "plans.list", json!({}));
    let plans = list["plans"].as_array().expect("plans");
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0]["planName"].as_str(), Some("Finals"));
    assert_eq!(plans[1]["planName"].as_str(), Some("Midterms"));
    assert_eq!(plans[0]["totalTopics"].as_i64(), Some(3));
    assert!(plans[0]["lastStudied"].is_null());

    let other_list = request_ok_as(&mut stdin, &mut reader, &intruder, "5", "plans.list", json!({}));
    assert_eq!(other_list["plans"].as_array().map(|a| a.len()), Some(0));

    let opened = request_ok_as(
        &mut stdin,
        &mut reader,
        &owner,
        "6",
        "plans.open",
        json!({ "planId": first_id, "today": "2026-10-01" }),
    );
    assert_eq!(opened["plan"]["planName"].as_str(), Some("Midterms"));
    let subjects = opened["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 2);
    // Grouped by subject name, then subtopic.
    assert_eq!(subjects[0]["subject"].as_str(), Some("History"));
    assert_eq!(subjects[0]["daysLeft"].as_i64(), Some(10));
    assert_eq!(subjects[1]["subject"].as_str(), Some("Math"));
    assert_eq!(subjects[1]["difficulty"].as_i64(), Some(3));
    assert_eq!(subjects[1]["hoursAllocated"].as_f64(), Some(15.0));
    let math_topics: Vec<&str> = subjects[1]["topics"]
        .as_array()
        .expect("topics")
        .iter()
        .filter_map(|t| t["subtopic"].as_str())
        .collect();
    assert_eq!(math_topics, vec!["Algebra", "Geometry"]);

    let chart = request_ok_as(
        &mut stdin,
        &mut reader,
        &owner,
        "7",
        "plans.chartData",
        json!({ "planId": first_id }),
    );
    assert_eq!(chart["totalTopics"].as_i64(), Some(3));
    assert_eq!(chart["subjects"][0]["subject"].as_str(), Some("Math"));
    assert_eq!(chart["subjects"][0]["avgDifficulty"].as_f64(), Some(2.5));
    assert_eq!(chart["subjects"][0]["topicCount"].as_i64(), Some(2));
    assert_eq!(chart["subjects"][1]["hoursAllocated"].as_f64(), Some(5.0));

    let foreign = request_as(
        &mut stdin,
        &mut reader,
        &intruder,
        "8",
        "plans.delete",
        json!({ "planId": first_id }),
    );
    assert_eq!(error_code(&foreign), Some("not_found"));
    let foreign_open = request_as(
        &mut stdin,
        &mut reader,
        &intruder,
        "9",
        "plans.open",
        json!({ "planId": first_id }),
    );
    assert_eq!(error_code(&foreign_open), Some("not_found"));

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        &owner,
        "10",
        "plans.delete",
        json!({ "planId": first_id }),
    );

    let conn = Connection::open(workspace.join("studyplanner.sqlite3")).expect("open db");
    for table in ["plan_subjects", "plan_details", "progress"] {
        let n: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE plan_id = ?", table),
                [&first_id],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(n, 0, "{} rows survived delete", table);
    }
    let kept: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM plan_details WHERE plan_id = ?",
            [&second_id],
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(kept, 3);

    let list = request_ok_as(&mut stdin, &mut reader, &owner, "11", "plans.list", json!({}));
    assert_eq!(list["plans"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn export_csv_writes_one_line_per_topic() {
    let workspace = temp_dir("studyplanner-export");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let session = register_and_login(&mut stdin, &mut reader, "csv@example.com", "password123");
    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        &session,
        "2",
        "plans.create",
        sample_plan_params("Export me"),
    );
    let out = workspace.join("exports").join("plan.csv");
    let exported = request_ok_as(
        &mut stdin,
        &mut reader,
        &session,
        "3",
        "plans.exportCsv",
        json!({
            "planId": created["planId"],
            "outPath": out.to_string_lossy(),
            "today": "2026-10-01"
        }),
    );
    assert_eq!(exported["rowCount"].as_i64(), Some(3));

    let text = std::fs::read_to_string(&out).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Subject,Subtopic,Exam Date,Days Left"));
    assert_eq!(lines[1], "Math,Algebra,2026-10-31,30,3,9.0,9 hrs,false");
    assert_eq!(lines[3], "History,Wars,2026-10-11,10,1,5.0,5 hrs,false");
}
