//! Client for the GraphQL engine behind the cache
//!
//! Every failure is reported as a GraphQL error result, so a broken upstream
//! never produces a cache entry.

use anyhow::Result;
use async_trait::async_trait;
use graphql_cache::{ExecutionResult, Operation, QueryExecutor, RequestContext};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Header carrying the resolved identity to the upstream engine
pub const IDENTITY_HEADER: &str = "x-user-id";

#[derive(Error, Debug)]
enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("upstream response is not a GraphQL result: {0}")]
    Decode(#[from] serde_json::Error),
}

/// [`QueryExecutor`] that POSTs operations to a GraphQL-over-HTTP endpoint
pub struct HttpExecutor {
    client: Client,
    endpoint: String,
}

impl HttpExecutor {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        operation: &Operation,
        identity: Option<&str>,
    ) -> std::result::Result<ExecutionResult, UpstreamError> {
        let mut request = self.client.post(&self.endpoint).json(operation);
        if let Some(identity) = identity {
            request = request.header(IDENTITY_HEADER, identity);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        // GraphQL servers may answer errors with a 4xx and a valid result body
        match serde_json::from_str::<ExecutionResult>(&body) {
            Ok(result) if status.is_success() || result.has_errors() => Ok(result),
            Ok(_) => Err(UpstreamError::Status { status, body }),
            Err(_) if !status.is_success() => Err(UpstreamError::Status { status, body }),
            Err(e) => Err(UpstreamError::Decode(e)),
        }
    }
}

#[async_trait]
impl QueryExecutor for HttpExecutor {
    async fn execute(&self, operation: &Operation, ctx: &mut RequestContext) -> ExecutionResult {
        debug!(endpoint = %self.endpoint, "Forwarding operation upstream");

        match self.send(operation, ctx.identity()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(endpoint = %self.endpoint, "{}", e);
                ExecutionResult::error(e.to_string())
            }
        }
    }
}
