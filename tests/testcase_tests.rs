mod common;

use actix_web::http::StatusCode;
use actix_web::{App, test};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use stresser::generator::ThinkingLevel;

use common::{create_test_db, test_config, test_services};

const SOLUTION: &str = "#include <bits/stdc++.h>\nsigned main(){int a,b;std::cin>>a>>b;std::cout<<a-b;}";

#[actix_web::test]
async fn test_health() {
    let test_db = create_test_db().await;
    let config = test_config();
    let services = test_services(&config, &test_db.pool, &[]);
    let state = services.state.clone();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"message": "Server is running fine"}));
}

#[actix_web::test]
async fn test_missing_fields() {
    let test_db = create_test_db().await;
    let config = test_config();
    let services = test_services(&config, &test_db.pool, &["never used"]);
    let state = services.state.clone();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let cases = [
        (json!({"problemStatement": "sum"}), "code is missing"),
        (json!({"code": " \n", "problemStatement": "sum"}), "code is missing"),
        (json!({"code": SOLUTION}), "Problem Statement is missing"),
        (json!({"code": SOLUTION, "problemStatement": ""}), "Problem Statement is missing"),
    ];

    for (payload, message) in cases {
        let req = test::TestRequest::post()
            .uri("/getTestCase")
            .set_json(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "message": message }));
    }

    // Validation happens before any generation
    assert!(services.generator.levels.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_counterexample_found() {
    let test_db = create_test_db().await;
    let config = test_config();
    let services = test_services(&config, &test_db.pool, &["", "silent", "```cpp\n2 3\n```"]);
    let state = services.state.clone();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/getTestCase")
        .set_json(json!({
            "code": SOLUTION,
            "problemStatement": "Print the sum of a and b",
            "thinkingLevel": "High"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"testCase": "2 3", "attempts": 3}));

    assert_eq!(
        *services.generator.levels.lock().unwrap(),
        vec![ThinkingLevel::High; 3]
    );
}

#[actix_web::test]
async fn test_no_issues_found() {
    let test_db = create_test_db().await;
    let mut config = test_config();
    config.stress.max_attempts = 4;
    let services = test_services(&config, &test_db.pool, &["silent", "silent"]);
    let state = services.state.clone();
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::post()
        .uri("/getTestCase")
        .set_json(json!({"code": SOLUTION, "problemStatement": "Print the sum of a and b"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"message": "No issues found", "attempts": 4}));

    assert_eq!(
        *services.generator.levels.lock().unwrap(),
        vec![ThinkingLevel::Standard; 4]
    );
}
