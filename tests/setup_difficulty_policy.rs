mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, sample_plan_params, spawn_sidecar, temp_dir};

#[test]
fn setup_defaults_validation_and_policy_switch() {
    let workspace = temp_dir("studyplanner-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let no_ws = request(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(error_code(&no_ws), Some("no_workspace"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(setup["planner"]["difficultyPolicy"].as_str(), Some("reject"));
    assert_eq!(setup["planner"]["recentPlansLimit"].as_i64(), Some(3));
    assert_eq!(setup["gamification"]["hoursPerLevel"].as_i64(), Some(10));

    for (id, patch) in [
        ("4", json!({ "difficultyPolicy": "lenient" })),
        ("5", json!({ "recentPlansLimit": 0 })),
        ("6", json!({ "unknownField": true })),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "setup.update",
            json!({ "section": "planner", "patch": patch }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "{}", resp);
    }
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "nope", "patch": {} }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));

    let mut params = sample_plan_params("Policy");
    params["subjects"][0]["subtopics"][1]["difficulty"] = json!(0);
    let rejected = request(&mut stdin, &mut reader, "8", "planner.preview", params.clone());
    assert_eq!(error_code(&rejected), Some("validation_failed"));
    assert_eq!(
        rejected["error"]["details"]["field"].as_str(),
        Some("subjects[0].subtopics[1].difficulty")
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "planner", "patch": { "difficultyPolicy": "fallback" } }),
    );
    assert_eq!(updated["planner"]["difficultyPolicy"].as_str(), Some("fallback"));

    // Geometry's 0 becomes 5, so Math's 15 hours split 3:5.
    let preview = request_ok(&mut stdin, &mut reader, "10", "planner.preview", params);
    let rows = preview["rows"].as_array().expect("rows");
    assert_eq!(rows[1]["difficulty"].as_i64(), Some(5));
    assert!((rows[0]["allocatedHours"].as_f64().expect("hours") - 5.625).abs() < 1e-9);
    assert!((rows[1]["allocatedHours"].as_f64().expect("hours") - 9.375).abs() < 1e-9);

    let game = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "setup.update",
        json!({ "section": "gamification", "patch": { "hoursPerLevel": 5, "pointsPerHour": 20 } }),
    );
    assert_eq!(game["gamification"]["hoursPerLevel"].as_i64(), Some(5));
    assert_eq!(game["gamification"]["topicsPerLevel"].as_i64(), Some(10));

    let again = request_ok(&mut stdin, &mut reader, "12", "setup.get", json!({}));
    assert_eq!(again["planner"]["difficultyPolicy"].as_str(), Some("fallback"));
    assert_eq!(again["gamification"]["pointsPerHour"].as_i64(), Some(20));
}
