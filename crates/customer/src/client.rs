use std::time::Duration;

use metrics::counter;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default request timeout for customer lookups.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the external customer service.
///
/// Lookups never fail: transport problems, timeouts and unexpected statuses
/// are reported as [`CustomerLookup::Unavailable`].
#[derive(Clone)]
pub struct CustomerClient {
    http: Client,
    base_url: Url,
}

impl CustomerClient {
    pub fn new(base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
        }
    }

    /// Builds a client with its own HTTP connection pool and request timeout.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, CustomerClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::new(base_url, http))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a customer by id.
    pub async fn lookup(&self, customer_id: i64) -> CustomerLookup {
        let outcome = match self.fetch(customer_id).await {
            Ok(Some(customer)) => CustomerLookup::Found(customer),
            Ok(None) => CustomerLookup::NotFound,
            Err(err) => {
                warn!(
                    stage = "customer",
                    customer_id,
                    error = %err,
                    "customer service lookup failed"
                );
                CustomerLookup::Unavailable
            }
        };
        counter!("customer_lookup_total", "outcome" => outcome.metric_label()).increment(1);
        outcome
    }

    async fn fetch(&self, customer_id: i64) -> Result<Option<Customer>, CustomerClientError> {
        let url = self.base_url.join(&format!("customers/{customer_id}"))?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(CustomerClientError::Status { status, body });
        }

        let details: Value = response.json().await?;
        if !details.is_object() {
            return Err(CustomerClientError::UnexpectedBody);
        }
        Ok(Some(Customer {
            id: customer_id,
            details,
        }))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Customer record as returned by the customer service.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    /// Raw JSON document; its shape is owned by the customer service.
    pub details: Value,
}

/// Outcome of a customer lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerLookup {
    Found(Customer),
    NotFound,
    Unavailable,
}

impl CustomerLookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn into_customer(self) -> Option<Customer> {
        match self {
            Self::Found(customer) => Some(customer),
            _ => None,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Failures observed while talking to the customer service.
#[derive(Debug, Error)]
pub enum CustomerClientError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("customer payload is not a JSON object")]
    UnexpectedBody,
}
