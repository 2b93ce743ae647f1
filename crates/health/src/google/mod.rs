//! Google Fit API integration
//!
//! This module provides:
//! - OAuth2 credential lifecycle (consent, refresh, token store)
//! - Loopback redirect handler for the consent flow
//! - Fitness API client with failure classification

mod auth;
mod client;
mod loopback;

pub use auth::{
    AuthorizationCode, ConsentRequest, Credential, CredentialManager, GoogleOAuth,
    RedirectHandler, TokenEndpoint, TokenResponse, TokenStore,
};
pub use client::{FitnessApi, FitnessClient, classify_status};
pub use loopback::{CallbackOutcome, LoopbackRedirect, parse_callback};

/// Fitness API request and response types
pub mod api {
    use serde::{Deserialize, Serialize};

    use crate::models::{MetricDescriptor, TimeWindow};

    /// Body of `POST users/me/dataset:aggregate`
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AggregateRequest {
        pub aggregate_by: Vec<AggregateBy>,
        pub bucket_by_time: BucketByTime,
        pub start_time_millis: i64,
        pub end_time_millis: i64,
    }

    impl AggregateRequest {
        /// Query one metric over one window, bucketed by `bucket_millis`
        pub fn for_window(
            metric: &MetricDescriptor,
            window: &TimeWindow,
            bucket_millis: i64,
        ) -> Self {
            Self {
                aggregate_by: vec![AggregateBy {
                    data_type_name: metric.remote_type_name.clone(),
                    data_source_id: metric.data_source_id.clone(),
                }],
                bucket_by_time: BucketByTime {
                    duration_millis: bucket_millis,
                },
                start_time_millis: window.start_millis(),
                end_time_millis: window.end_millis(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AggregateBy {
        pub data_type_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub data_source_id: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BucketByTime {
        pub duration_millis: i64,
    }

    /// Aggregate response: buckets → datasets → points
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct AggregateResponse {
        #[serde(default)]
        pub bucket: Vec<Bucket>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Bucket {
        pub start_time_millis: Option<String>,
        pub end_time_millis: Option<String>,
        #[serde(default)]
        pub dataset: Vec<Dataset>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Dataset {
        pub data_source_id: Option<String>,
        #[serde(default)]
        pub point: Vec<Point>,
    }

    /// A raw point; timestamps are nanoseconds encoded as strings
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Point {
        pub start_time_nanos: String,
        pub end_time_nanos: String,
        pub data_type_name: Option<String>,
        #[serde(default)]
        pub value: Vec<Value>,
    }

    /// A typed value; exactly one field is normally set
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Value {
        pub int_val: Option<i64>,
        pub fp_val: Option<f64>,
        pub string_val: Option<String>,
    }

    /// Google API error envelope
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ErrorBody {
        pub code: Option<u16>,
        pub message: Option<String>,
        pub status: Option<String>,
        #[serde(default)]
        pub errors: Vec<ErrorDetail>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ErrorDetail {
        pub reason: Option<String>,
        pub message: Option<String>,
    }

}
