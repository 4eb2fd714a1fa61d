use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::non_blank;
use crate::error::ApiResult;
use crate::generator::ThinkingLevel;
use crate::stress::{StressOutcome, StressRequest, StressTester};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseRequest {
    pub code: Option<String>,
    pub problem_statement: Option<String>,
    pub thinking_level: Option<String>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub attempts: u32,
}

impl From<StressOutcome> for TestCaseResponse {
    fn from(outcome: StressOutcome) -> Self {
        match outcome {
            StressOutcome::Found {
                test_case,
                attempts,
            } => Self {
                test_case: Some(test_case),
                message: None,
                attempts,
            },
            StressOutcome::Exhausted { attempts } => Self {
                test_case: None,
                message: Some("No issues found".to_string()),
                attempts,
            },
        }
    }
}

/// Searches for an input on which the submitted solution misbehaves.
///
/// The request blocks until a counter-example turns up or every attempt is spent.
#[post("/getTestCase")]
pub async fn get_test_case(
    stress: web::Data<StressTester>,
    body: web::Json<TestCaseRequest>,
) -> ApiResult<HttpResponse> {
    let Some(code) = non_blank(&body.code) else {
        return Ok(HttpResponse::BadRequest().json(json!({ "message": "code is missing" })));
    };
    let Some(problem_statement) = non_blank(&body.problem_statement) else {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "message": "Problem Statement is missing" }))
        );
    };

    let request = StressRequest {
        code: code.to_string(),
        problem_statement: problem_statement.to_string(),
        thinking_level: ThinkingLevel::parse(body.thinking_level.as_deref()),
    };
    log::info!(
        "Stress session started ({:?}, {} bytes of code)",
        request.thinking_level,
        request.code.len()
    );

    let outcome = stress.find_counterexample(&request).await?;
    Ok(HttpResponse::Ok().json(TestCaseResponse::from(outcome)))
}

#[get("/")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "message": "Server is running fine" }))
}
