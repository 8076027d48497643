//! Controller HTTP client.
//!
//! Three wire operations, per the controller service contract: register the
//! debuggee, long-poll the active breakpoint list, and report a finalized
//! breakpoint. The list call is a hanging GET; the server closes it either
//! with data or with `waitExpired` when its own timeout lapses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Breakpoint, Debuggee};

const UPDATE_ATTEMPTS: u32 = 4;
const UPDATE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller request failed: {0}")]
    Http(reqwest::Error),
    #[error("controller request timed out")]
    Timeout,
    #[error("controller returned status {0}")]
    Status(u16),
    #[error("update retries exhausted for breakpoint {0}")]
    RetriesExhausted(String),
}

fn map_reqwest_error(err: reqwest::Error) -> ControllerError {
    if err.is_timeout() {
        ControllerError::Timeout
    } else {
        ControllerError::Http(err)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    debuggee: &'a Debuggee,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterResponse {
    pub debuggee: RegisteredDebuggee,
    pub active_period_sec: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisteredDebuggee {
    pub id: String,
    pub is_disabled: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListBreakpointsResponse {
    pub breakpoints: Vec<Breakpoint>,
    /// Normal long-poll timeout; reissue immediately.
    pub wait_expired: bool,
    pub kind: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    debuggee_id: &'a str,
    breakpoint: &'a Breakpoint,
}

#[derive(Clone)]
pub struct ControllerClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ControllerClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        // No client-wide timeout: the breakpoint list call hangs by design
        // and is bounded server-side.
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn register(&self, debuggee: &Debuggee) -> Result<RegisterResponse, ControllerError> {
        let url = format!("{}/debuggees/register", self.base_url);
        let response = self
            .authorized(self.http.post(&url))
            .json(&RegisterRequest { debuggee })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(ControllerError::Status(response.status().as_u16()));
        }
        response.json().await.map_err(map_reqwest_error)
    }

    /// Hanging GET for the active breakpoint set. A missing or malformed
    /// payload is "no breakpoints", not an error; only a non-2xx status is.
    pub async fn list_breakpoints(
        &self,
        debuggee_id: &str,
    ) -> Result<ListBreakpointsResponse, ControllerError> {
        let url = format!("{}/debuggees/{}/breakpoints", self.base_url, debuggee_id);
        let response = self
            .authorized(self.http.get(&url))
            .query(&[("successOnTimeout", "true")])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(ControllerError::Status(response.status().as_u16()));
        }
        let payload = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(payload).unwrap_or_default())
    }

    /// Report a finalized breakpoint. Retried on a fixed budget; exhaustion
    /// is surfaced so the caller can log and forget rather than loop.
    pub async fn update_breakpoint(
        &self,
        debuggee_id: &str,
        breakpoint: &Breakpoint,
    ) -> Result<(), ControllerError> {
        let url = format!(
            "{}/debuggees/{}/breakpoints/{}",
            self.base_url, debuggee_id, breakpoint.id
        );
        let body = UpdateRequest {
            debuggee_id,
            breakpoint,
        };

        for attempt in 0..UPDATE_ATTEMPTS {
            let result = self
                .authorized(self.http.put(&url))
                .json(&body)
                .send()
                .await
                .map_err(map_reqwest_error);
            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    tracing::warn!(
                        id = %breakpoint.id,
                        status = response.status().as_u16(),
                        attempt,
                        "breakpoint update rejected"
                    );
                }
                Err(err) => {
                    tracing::warn!(id = %breakpoint.id, %err, attempt, "breakpoint update failed");
                }
            }
            tokio::time::sleep(UPDATE_BACKOFF * 2u32.pow(attempt)).await;
        }
        Err(ControllerError::RetriesExhausted(breakpoint.id.clone()))
    }
}
