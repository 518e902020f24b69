use serde::{Deserialize, Serialize};

use crate::types::Report;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Body of the create-report POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl From<&Report> for CreateReportRequest {
    fn from(report: &Report) -> Self {
        Self {
            title: report.title.clone(),
            description: report.description.clone(),
        }
    }
}

/// Body of the finalize POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeFileRequest {
    pub file_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Returned by create-report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReportResponse {
    pub id: String,
}

/// Returned by finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeFileResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReportId, ReportStatus, ServerConfig};

    #[test]
    fn create_request_from_report() {
        let report = Report {
            id: ReportId(3),
            api_id: None,
            status: ReportStatus::Draft,
            title: "Flooded road".into(),
            description: String::new(),
            server: ServerConfig {
                url: "https://example.org".into(),
                access_token: "tok".into(),
                background_upload: false,
            },
            files: vec![],
        };
        let req = CreateReportRequest::from(&report);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"title":"Flooded road"}"#);
    }

    #[test]
    fn finalize_request_field_names() {
        let req = FinalizeFileRequest {
            file_id: "abc".into(),
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"fileId":"abc"}"#);
    }

    #[test]
    fn create_response_parses_id() {
        let resp: CreateReportResponse =
            serde_json::from_str(r#"{"id":"r-42","extra":true}"#).unwrap();
        assert_eq!(resp.id, "r-42");
    }

    #[test]
    fn finalize_response_requires_success() {
        assert!(serde_json::from_str::<FinalizeFileResponse>("{}").is_err());
        let resp: FinalizeFileResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!resp.success);
    }
}
