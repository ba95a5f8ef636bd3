use crate::config::WmsConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WmsImportError {
    #[error("ORG and token required")]
    MissingFields,
    #[error("No CSV data provided")]
    NoRows,
    #[error("No valid items in CSV data")]
    NoValidItems,
    /// The WMS answered 401; the caller must re-authenticate.
    #[error("Token expired")]
    TokenExpired,
    #[error("WMS import request failed: {0}")]
    Transport(String),
}

impl WmsImportError {
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            WmsImportError::MissingFields | WmsImportError::NoRows | WmsImportError::NoValidItems
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportItem {
    #[serde(rename = "ItemId")]
    pub item_id: String,
    #[serde(rename = "ShortDescription")]
    pub short_description: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "ImageUrl")]
    pub image_url: String,
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub success: bool,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub trace_id: String,
    pub messages: Vec<String>,
    pub exceptions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkImportResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    messages: MessagesEnvelope,
    #[serde(default)]
    exceptions: Vec<ImportException>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesEnvelope {
    #[serde(rename = "Message", default)]
    message: Vec<MessageEntry>,
}

#[derive(Debug, Deserialize)]
struct MessageEntry {
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ImportException {
    #[serde(rename = "messageKey", default)]
    message_key: String,
    #[serde(default)]
    message: String,
}

/// Manifest rows → import payload. A row qualifies when it has at least four
/// columns and both the item id and the image URL are non-blank.
pub fn rows_to_items(rows: &[Vec<String>]) -> Vec<ImportItem> {
    rows.iter()
        .filter(|row| {
            row.len() >= 4 && !row[0].trim().is_empty() && !row[3].trim().is_empty()
        })
        .map(|row| ImportItem {
            item_id: row[0].trim().to_string(),
            short_description: row[1].trim().to_string(),
            description: row[2].trim().to_string(),
            image_url: row[3].trim().to_string(),
        })
        .collect()
}

/// Pushes the qualifying rows into the WMS bulk-import endpoint and folds the
/// per-row outcome into one report with the upstream trace id.
pub async fn bulk_import(
    client: &Client,
    config: &WmsConfig,
    org: &str,
    token: &str,
    rows: &[Vec<String>],
) -> Result<ImportReport, WmsImportError> {
    let org = org.trim();
    let token = token.trim();
    if org.is_empty() || token.is_empty() {
        return Err(WmsImportError::MissingFields);
    }
    if rows.is_empty() {
        return Err(WmsImportError::NoRows);
    }
    let items = rows_to_items(rows);
    if items.is_empty() {
        return Err(WmsImportError::NoValidItems);
    }

    let total = items.len();
    let org_upper = org.to_uppercase();
    info!(target = "itemgen.wms", org, items = total, "uploading items to wms");

    let response = client
        .post(config.bulk_import_url())
        .json(&serde_json::json!({ "Data": &items }))
        .bearer_auth(token)
        .header("selectedOrganization", &org_upper)
        .header("selectedLocation", format!("{org_upper}-DM1"))
        .send()
        .await
        .map_err(|err| WmsImportError::Transport(err.to_string()))?;

    if response.status().as_u16() == 401 {
        return Err(WmsImportError::TokenExpired);
    }

    let trace_id = response
        .headers()
        .get("CP-TRACE-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("N/A")
        .to_string();

    let body = response
        .text()
        .await
        .map_err(|err| WmsImportError::Transport(err.to_string()))?;

    let report = match serde_json::from_str::<BulkImportResponse>(&body) {
        Ok(parsed) => fold_report(total, trace_id, parsed),
        Err(_) => {
            let snippet = crate::http::clip_text(body, 500);
            ImportReport {
                success: false,
                total,
                success_count: 0,
                failed_count: total,
                trace_id,
                messages: vec![snippet],
                exceptions: Vec::new(),
            }
        }
    };

    if !report.success {
        warn!(
            target = "itemgen.wms",
            org,
            failed = report.failed_count,
            trace_id = %report.trace_id,
            "wms import reported failures"
        );
    }
    Ok(report)
}

fn fold_report(total: usize, trace_id: String, parsed: BulkImportResponse) -> ImportReport {
    let messages = parsed
        .messages
        .message
        .into_iter()
        .map(|m| m.description)
        .filter(|d| !d.is_empty())
        .collect();
    let exceptions: Vec<String> = parsed
        .exceptions
        .into_iter()
        .map(|e| {
            let key = if e.message_key.is_empty() {
                "Error".to_string()
            } else {
                e.message_key
            };
            format!("{key}: {}", e.message)
        })
        .collect();
    let failed_count = if parsed.success {
        exceptions.len()
    } else {
        total
    };
    ImportReport {
        success: parsed.success,
        total,
        success_count: total - failed_count,
        failed_count,
        trace_id,
        messages,
        exceptions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn rows_need_an_item_id_and_an_image_url() {
        let rows = vec![
            row(&["A1", "Shoe", "Shoe", "https://cdn/a.jpg"]),
            row(&["", "Shoe", "Shoe", "https://cdn/b.jpg"]),
            row(&["B2", "Mug", "Mug", ""]),
            row(&["short"]),
        ];
        let items = rows_to_items(&rows);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "A1");
        assert_eq!(items[0].image_url, "https://cdn/a.jpg");
    }

    #[test]
    fn import_item_serializes_with_wms_field_names() {
        let value = serde_json::to_value(ImportItem {
            item_id: "A1".into(),
            short_description: "Shoe".into(),
            description: "Shoe".into(),
            image_url: "https://cdn/a.jpg".into(),
        })
        .unwrap();
        assert_eq!(value["ItemId"], "A1");
        assert_eq!(value["ImageUrl"], "https://cdn/a.jpg");
    }

    #[test]
    fn report_counts_exceptions_only_on_success() {
        let parsed: BulkImportResponse = serde_json::from_str(
            r#"{
                "success": true,
                "messages": {"Message": [{"Description": "Imported"}, {"Description": ""}]},
                "exceptions": [{"messageKey": "DUP", "message": "duplicate id"}, {"message": "bad url"}]
            }"#,
        )
        .unwrap();
        let report = fold_report(5, "trace-1".into(), parsed);
        assert!(report.success);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.success_count, 3);
        assert_eq!(report.messages, vec!["Imported"]);
        assert_eq!(
            report.exceptions,
            vec!["DUP: duplicate id", "Error: bad url"]
        );
    }

    #[test]
    fn report_fails_everything_when_upstream_says_no() {
        let parsed = BulkImportResponse::default();
        let report = fold_report(4, "N/A".into(), parsed);
        assert!(!report.success);
        assert_eq!(report.failed_count, 4);
        assert_eq!(report.success_count, 0);
    }

    #[tokio::test]
    async fn input_validation_happens_before_any_call() {
        let config = crate::config::AppConfig::from_env().wms;
        let client = Client::new();
        let err = bulk_import(&client, &config, "", "tok", &[]).await.unwrap_err();
        assert!(matches!(err, WmsImportError::MissingFields));
        let err = bulk_import(&client, &config, "acme", "tok", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, WmsImportError::NoRows));
        assert!(err.is_input());
    }
}
