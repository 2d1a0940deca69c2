// CT log RPC client
//
// HTTP communication with a single CT log's RFC 6962 endpoints.

use serde::Deserialize;
use std::time::Duration;

use crate::error::StreamError;
use crate::Result;

/// Per-request timeout for CT log endpoints
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// User-Agent sent on every upstream request
pub const USER_AGENT: &str = "ctlstream";

/// One entry as returned by get-entries
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub leaf_input: String,
    pub extra_data: String,
}

#[derive(Debug, Deserialize)]
struct SignedTreeHead {
    tree_size: u64,
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    entries: Vec<LogEntry>,
}

/// HTTP client for one CT log
pub struct LogClient {
    client: reqwest::Client,
}

impl LogClient {
    /// Build a client with the streaming timeout and User-Agent
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch the current tree size from the signed tree head
    pub async fn get_tree_size(&self, log_url: &str) -> Result<u64> {
        let url = format!("{}/ct/v1/get-sth", log_url.trim_end_matches('/'));

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(StreamError::HttpError {
                status: response.status().as_u16(),
                details: format!("get-sth failed for {}", url),
            });
        }

        let sth: SignedTreeHead = response.json().await.map_err(|e| StreamError::ParseError {
            message: format!("invalid get-sth response: {}", e),
        })?;

        Ok(sth.tree_size)
    }

    /// Fetch entries `start..=end` from the log
    pub async fn get_entries(&self, log_url: &str, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        let url = format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            log_url.trim_end_matches('/'),
            start,
            end
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(StreamError::HttpError {
                status: response.status().as_u16(),
                details: format!("get-entries failed for {}", url),
            });
        }

        let entries: EntriesResponse =
            response.json().await.map_err(|e| StreamError::ParseError {
                message: format!("invalid get-entries response: {}", e),
            })?;

        Ok(entries.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(LogClient::new().is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_log_is_an_error() {
        let client = LogClient::new().unwrap();

        let result = client.get_tree_size("http://127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
