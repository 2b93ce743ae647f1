//! Google Fitness API HTTP client
//!
//! Issues aggregate queries and classifies every failure into a
//! [`FetchError`] so the retry policy can decide what to do with it.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use log::debug;
use std::time::Duration;

use super::api::{AggregateRequest, AggregateResponse, ErrorResponse};
use crate::error::FetchError;

/// The remote fitness data source
pub trait FitnessApi: Send + Sync {
    /// Run one aggregate query
    fn aggregate(
        &self,
        access_token: &str,
        request: &AggregateRequest,
    ) -> Result<AggregateResponse, FetchError>;
}

/// Fitness API client over ureq
pub struct FitnessClient {
    agent: ureq::Agent,
}

impl FitnessClient {
    const AGGREGATE_URL: &'static str =
        "https://www.googleapis.com/fitness/v1/users/me/dataset:aggregate";

    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for FitnessClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl FitnessApi for FitnessClient {
    fn aggregate(
        &self,
        access_token: &str,
        request: &AggregateRequest,
    ) -> Result<AggregateResponse, FetchError> {
        let mut response = self
            .agent
            .post(Self::AGGREGATE_URL)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(request)
            .map_err(|e| FetchError::Transient(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status == 200 {
            return response
                .body_mut()
                .read_json()
                .map_err(|e| {
                    FetchError::Transient(format!("Failed to parse aggregate response: {}", e))
                });
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.body_mut().read_to_string().unwrap_or_default();
        debug!("Aggregate query returned HTTP {}: {}", status, body.trim());

        Err(classify_status(status, retry_after, &body))
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a non-success HTTP response to a [`FetchError`]
///
/// `body` is the raw response body, normally a Google error envelope.
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> FetchError {
    let envelope: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| body.trim().to_string());
    let reasons: Vec<&str> = envelope
        .as_ref()
        .map(|e| {
            e.error
                .errors
                .iter()
                .filter_map(|d| d.reason.as_deref())
                .collect()
        })
        .unwrap_or_default();

    let rate_limited = reasons.iter().any(|r| {
        matches!(
            *r,
            "rateLimitExceeded" | "userRateLimitExceeded" | "quotaExceeded"
        )
    });
    let lower = message.to_lowercase();

    match status {
        429 => FetchError::RateLimited { retry_after },
        403 if rate_limited => FetchError::RateLimited { retry_after },
        403 => FetchError::ScopeForbidden(message),
        401 => FetchError::Auth(message),
        404 => FetchError::NoData,
        400 if lower.contains("no default datasource")
            || lower.contains("datasource not found") =>
        {
            FetchError::NoData
        }
        _ => FetchError::Transient(format!("HTTP {}: {}", status, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: u16, message: &str, reason: &str) -> String {
        format!(
            r#"{{"error":{{"code":{},"message":"{}","errors":[{{"reason":"{}","message":"{}"}}]}}}}"#,
            code, message, reason, message
        )
    }

    #[test]
    fn test_429_is_rate_limited_with_hint() {
        let err = classify_status(429, Some(Duration::from_secs(7)), "");
        assert_eq!(
            err,
            FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn test_403_quota_is_rate_limited() {
        let body = envelope(403, "Quota exceeded", "quotaExceeded");
        assert!(matches!(
            classify_status(403, None, &body),
            FetchError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn test_403_other_is_scope_forbidden() {
        let body = envelope(403, "Request had insufficient authentication scopes.", "forbidden");
        assert_eq!(
            classify_status(403, None, &body),
            FetchError::ScopeForbidden("Request had insufficient authentication scopes.".into())
        );
    }

    #[test]
    fn test_no_data_statuses() {
        assert_eq!(classify_status(404, None, ""), FetchError::NoData);
        let body = envelope(
            400,
            "no default datasource found for: com.google.oxygen_saturation",
            "invalidArgument",
        );
        assert_eq!(classify_status(400, None, &body), FetchError::NoData);
    }

    #[test]
    fn test_other_400_is_transient() {
        let body = envelope(400, "Invalid value at 'start_time_millis'", "invalidArgument");
        assert!(matches!(classify_status(400, None, &body), FetchError::Transient(_)));
    }

    #[test]
    fn test_401_is_auth() {
        assert!(matches!(classify_status(401, None, "{}"), FetchError::Auth(_)));
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = classify_status(503, None, "Service Unavailable");
        assert_eq!(err, FetchError::Transient("HTTP 503: Service Unavailable".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
