// HTTP scanner: one GET per candidate
// reason: reqwest for async HTTP with per-request timeouts
use async_trait::async_trait;
use rangescan_core::domain::CandidateId;
use rangescan_core::error::{AppError, Result};
use rangescan_core::port::{ScanError, ScanVerdict, Scanner};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Placeholder replaced by the candidate ID in the URL template
pub const ID_PLACEHOLDER: &str = "{id}";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes `url_template` with `{id}` substituted
///
/// - 2xx: hit, payload `{"status", "url"}`
/// - 404 / 410: miss
/// - 429: throttled (retried)
/// - 5xx: unexpected response (retried)
/// - other statuses: miss
pub struct HttpScanner {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpScanner {
    /// # Errors
    /// - AppError::InvalidConfig if the template lacks `{id}` or the client cannot be built
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url_template = url_template.into();
        if !url_template.contains(ID_PLACEHOLDER) {
            return Err(AppError::InvalidConfig(format!(
                "scan url template must contain {}: {}",
                ID_PLACEHOLDER, url_template
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url_template,
            timeout,
        })
    }

    fn url_for(&self, candidate_id: CandidateId) -> String {
        self.url_template
            .replace(ID_PLACEHOLDER, &candidate_id.to_string())
    }
}

#[async_trait]
impl Scanner for HttpScanner {
    async fn scan(&self, candidate_id: CandidateId) -> std::result::Result<ScanVerdict, ScanError> {
        let url = self.url_for(candidate_id);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScanError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    ScanError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(candidate_id, status = status.as_u16(), "HTTP probe answered");

        match status {
            s if s.is_success() => Ok(ScanVerdict::Hit {
                payload: Some(serde_json::json!({
                    "status": s.as_u16(),
                    "url": url,
                })),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(ScanError::Throttled(url)),
            s if s.is_server_error() => Err(ScanError::UnexpectedResponse(format!(
                "status {} from {}",
                s.as_u16(),
                url
            ))),
            _ => Ok(ScanVerdict::Miss),
        }
    }
}
