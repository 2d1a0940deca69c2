// CT log list
//
// Fetches the authoritative log list and selects the usable logs.

use serde::Deserialize;
use tracing::debug;

use crate::error::StreamError;
use crate::Result;

/// Google CT log list URL (v3, all logs)
pub const LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/v3/all_logs_list.json";

/// One CT log from the authoritative list; `url` is the identity used for
/// reconciliation
#[derive(Debug, Clone, Deserialize)]
pub struct CtLog {
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub state: LogState,
}

/// Log lifecycle state; a present (non-null) `usable` marks the log as
/// eligible for tailing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogState {
    pub usable: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LogList {
    operators: Vec<Operator>,
}

#[derive(Debug, Deserialize)]
struct Operator {
    #[serde(default)]
    logs: Vec<CtLog>,
}

/// Fetch the log list and return the usable logs
pub async fn fetch_log_list(client: &reqwest::Client, url: &str) -> Result<Vec<CtLog>> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(StreamError::HttpError {
            status: response.status().as_u16(),
            details: format!("log list fetch failed for {}", url),
        });
    }

    let list: LogList = response.json().await.map_err(|e| StreamError::ParseError {
        message: format!("invalid log list: {}", e),
    })?;

    debug!(operators = list.operators.len(), "fetched CT log list");

    let logs = list
        .operators
        .into_iter()
        .flat_map(|op| op.logs)
        .filter(|log| log.state.usable.is_some())
        .collect();

    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_usable_logs_are_selected() {
        let doc = r#"{
            "operators": [
                {"logs": [
                    {"description": "Usable Log", "url": "https://ct.example/a/", "state": {"usable": {"timestamp": "2024-01-01T00:00:00Z"}}},
                    {"description": "Retired Log", "url": "https://ct.example/b/", "state": {"retired": {}}},
                    {"description": "Stateless Log", "url": "https://ct.example/c/"}
                ]},
                {"logs": []}
            ]
        }"#;

        let list: LogList = serde_json::from_str(doc).unwrap();
        let logs: Vec<CtLog> = list
            .operators
            .into_iter()
            .flat_map(|op| op.logs)
            .filter(|log| log.state.usable.is_some())
            .collect();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].url, "https://ct.example/a/");
        assert_eq!(logs[0].description, "Usable Log");
    }

    #[test]
    fn test_missing_description_defaults_to_empty() {
        let log: CtLog =
            serde_json::from_str(r#"{"url": "https://ct.example/", "state": {"usable": {}}}"#)
                .unwrap();

        assert!(log.description.is_empty());
        assert!(log.state.usable.is_some());
    }
}
