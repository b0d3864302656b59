//! JSON request handling, independent of any transport.
//!
//! Each route takes a JSON body and answers with an [`Envelope`] carrying
//! either `data` or `error`, plus an HTTP-style status code.

use crate::model::{MatchCandidate, Modification};
use crate::service::{ApplySummary, PatchService};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMatchesRequest {
    pub file_path: String,
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    #[serde(default)]
    pub modifications: Vec<Modification>,
}

pub type ApplyResponse = ApplySummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    FindMatches,
    Apply,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::FindMatches => "find-matches",
            Route::Apply => "apply",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRoute(pub String);

impl fmt::Display for UnknownRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown route '{}' (expected find-matches or apply)", self.0)
    }
}

impl std::error::Error for UnknownRoute {}

impl FromStr for Route {
    type Err = UnknownRoute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('/') {
            "find-matches" => Ok(Route::FindMatches),
            "apply" => Ok(Route::Apply),
            other => Err(UnknownRoute(other.to_string())),
        }
    }
}

/// Status code and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    fn new<T: Serialize>(status: u16, envelope: Envelope<T>) -> Self {
        match serde_json::to_value(&envelope) {
            Ok(body) => Self { status, body },
            Err(e) => Self {
                status: 500,
                body: serde_json::json!({ "error": format!("failed to encode response: {e}") }),
            },
        }
    }

    fn bad_request(error: serde_json::Error) -> Self {
        Self::new::<()>(400, Envelope::error(format!("malformed request: {error}")))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Handle one request body for `route`.
pub fn handle(service: &PatchService, route: Route, body: &str) -> Response {
    debug!(%route, "handling request");
    match route {
        Route::FindMatches => {
            let request: FindMatchesRequest = match serde_json::from_str(body) {
                Ok(request) => request,
                Err(e) => return Response::bad_request(e),
            };
            match service.search_anchor(&request.file_path, &request.prefix, &request.suffix) {
                Ok(matches) => {
                    let candidates: Vec<MatchCandidate> = matches.collect();
                    Response::new(200, Envelope::data(candidates))
                }
                Err(e) => {
                    warn!(error = %e, "find-matches failed");
                    Response::new::<()>(422, Envelope::error(e.to_string()))
                }
            }
        }
        Route::Apply => {
            let request: ApplyRequest = match serde_json::from_str(body) {
                Ok(request) => request,
                Err(e) => return Response::bad_request(e),
            };
            let summary: ApplyResponse = service.apply_modifications(&request.modifications);
            Response::new(200, Envelope::data(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_route_parsing() {
        assert_eq!("find-matches".parse::<Route>(), Ok(Route::FindMatches));
        assert_eq!("/apply".parse::<Route>(), Ok(Route::Apply));
        assert!("delete".parse::<Route>().is_err());
    }

    #[test]
    fn test_find_matches_round() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.conf"), "a=1\ntimeout=30 # seconds\n").unwrap();
        let service = PatchService::new(dir.path());

        let body = json!({ "filePath": "app.conf", "prefix": "timeout=", "suffix": "#" });
        let response = handle(&service, Route::FindMatches, &body.to_string());

        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            json!({ "data": [{ "lineNumber": 2, "lineContent": "timeout=30 # seconds" }] })
        );
    }

    #[test]
    fn test_find_matches_domain_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = PatchService::new(dir.path());

        let body = json!({ "filePath": "missing.conf", "prefix": "a=" });
        let response = handle(&service, Route::FindMatches, &body.to_string());
        assert_eq!(response.status, 422);
        assert!(response.body["error"].as_str().unwrap().contains("not found"));
        assert!(response.body.get("data").is_none());
    }

    #[test]
    fn test_malformed_body() {
        let service = PatchService::new("/");
        let response = handle(&service, Route::Apply, "{\"modifications\": 3}");
        assert_eq!(response.status, 400);
        assert!(!response.is_success());
        assert!(response.body["error"].is_string());
    }

    #[test]
    fn test_apply_processed_batch_is_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.conf"), "port=80\n").unwrap();
        let service = PatchService::new(dir.path());

        let body = json!({
            "modifications": [
                {
                    "target": { "id": "t1", "filePath": "app.conf", "lineNumber": 1, "prefix": "port=" },
                    "newValue": "81"
                },
                {
                    "target": { "id": "t2", "filePath": "gone.conf", "lineNumber": 1, "prefix": "port=" },
                    "newValue": "81"
                }
            ]
        });
        let response = handle(&service, Route::Apply, &body.to_string());

        assert_eq!(response.status, 200);
        let data = &response.body["data"];
        assert_eq!(data["appliedCount"], 1);
        assert_eq!(data["results"][0]["outcome"]["status"], "applied");
        assert_eq!(data["results"][1]["outcome"]["status"], "failed");
        assert_eq!(data["results"][1]["outcome"]["reason"]["kind"], "fileNotFound");
        assert_eq!(fs::read_to_string(dir.path().join("app.conf")).unwrap(), "port=81\n");
    }
}
