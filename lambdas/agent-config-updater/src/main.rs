//! Agent Config Updater - CloudFormation custom resource.
//!
//! The forwarder is deployed before the agent exists, so the stack calls this
//! function once the agent and its alias are created. It writes `AGENT_ID` and
//! `AGENT_ALIAS_ID` into the forwarder's environment, keeping every other
//! variable, then waits for the configuration update to finish.
//!
//! A response is always sent to the pre-signed `ResponseURL`, otherwise the
//! stack hangs until its timeout.

use async_trait::async_trait;
use aws_sdk_lambda::types::Environment;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::Error as AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Prefix of a CDK token that has not been resolved yet.
const UNRESOLVED_TOKEN: &str = "${Token[";

/// Custom resource request sent by CloudFormation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CustomResourceEvent {
    request_type: String,
    #[serde(rename = "ResponseURL")]
    response_url: String,
    stack_id: String,
    request_id: String,
    logical_resource_id: String,
    #[serde(default)]
    resource_properties: ResourceProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceProperties {
    function_name: Option<String>,
    agent_id: Option<String>,
    agent_alias_id: Option<String>,
}

/// Properties needed to update the forwarder.
#[derive(Debug, Clone, PartialEq)]
struct AgentTarget {
    function_name: String,
    agent_id: String,
    agent_alias_id: String,
}

impl ResourceProperties {
    fn target(&self) -> Option<AgentTarget> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        Some(AgentTarget {
            function_name: non_empty(&self.function_name)?,
            agent_id: non_empty(&self.agent_id)?,
            agent_alias_id: non_empty(&self.agent_alias_id)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CustomResourceResponse {
    status: ResponseStatus,
    reason: String,
    physical_resource_id: String,
    stack_id: String,
    request_id: String,
    logical_resource_id: String,
    data: Value,
}

fn physical_resource_id(function_name: Option<&str>) -> String {
    format!("update-lambda-{}", function_name.unwrap_or("unknown"))
}

fn build_response(
    event: &CustomResourceEvent,
    status: ResponseStatus,
    reason: impl Into<String>,
    data: Value,
) -> CustomResourceResponse {
    CustomResourceResponse {
        status,
        reason: reason.into(),
        physical_resource_id: physical_resource_id(
            event.resource_properties.function_name.as_deref(),
        ),
        stack_id: event.stack_id.clone(),
        request_id: event.request_id.clone(),
        logical_resource_id: event.logical_resource_id.clone(),
        data,
    }
}

fn is_unresolved(value: &str) -> bool {
    value.starts_with(UNRESOLVED_TOKEN)
}

/// Existing variables with the agent identifiers set.
fn merge_environment(
    existing: HashMap<String, String>,
    target: &AgentTarget,
) -> HashMap<String, String> {
    let mut variables = existing;
    variables.insert("AGENT_ID".to_string(), target.agent_id.clone());
    variables.insert("AGENT_ALIAS_ID".to_string(), target.agent_alias_id.clone());
    variables
}

/// Attempts and spacing for a polling loop.
#[derive(Debug, Clone, Copy)]
struct Polling {
    attempts: u32,
    interval: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    token_resolution: Polling,
    update_status: Polling,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            token_resolution: Polling {
                attempts: 10,
                interval: Duration::from_secs(10),
            },
            update_status: Polling {
                attempts: 30,
                interval: Duration::from_secs(10),
            },
        }
    }
}

/// Lambda control-plane calls the updater needs.
#[async_trait]
trait FunctionConfiguration: Send + Sync {
    async fn environment(&self, function_name: &str) -> shared::Result<HashMap<String, String>>;

    async fn set_environment(
        &self,
        function_name: &str,
        variables: HashMap<String, String>,
    ) -> shared::Result<()>;

    /// `LastUpdateStatus` of the function, if reported.
    async fn last_update_status(&self, function_name: &str) -> shared::Result<Option<String>>;
}

struct LambdaFunctions {
    client: aws_sdk_lambda::Client,
}

#[async_trait]
impl FunctionConfiguration for LambdaFunctions {
    async fn environment(&self, function_name: &str) -> shared::Result<HashMap<String, String>> {
        let output = self
            .client
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| AppError::from_sdk("Failed to read function configuration", e))?;

        Ok(output
            .environment()
            .and_then(|env| env.variables())
            .cloned()
            .unwrap_or_default())
    }

    async fn set_environment(
        &self,
        function_name: &str,
        variables: HashMap<String, String>,
    ) -> shared::Result<()> {
        self.client
            .update_function_configuration()
            .function_name(function_name)
            .environment(Environment::builder().set_variables(Some(variables)).build())
            .send()
            .await
            .map_err(|e| AppError::from_sdk("Failed to update function configuration", e))?;

        Ok(())
    }

    async fn last_update_status(&self, function_name: &str) -> shared::Result<Option<String>> {
        let output = self
            .client
            .get_function()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| AppError::from_sdk("Failed to read function state", e))?;

        Ok(output
            .configuration()
            .and_then(|config| config.last_update_status())
            .map(|status| status.as_str().to_string()))
    }
}

struct AppState {
    functions: Arc<dyn FunctionConfiguration>,
    http_client: reqwest::Client,
    timing: Timing,
}

impl AppState {
    async fn new() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        Self {
            functions: Arc::new(LambdaFunctions {
                client: aws_sdk_lambda::Client::new(&config),
            }),
            http_client: reqwest::Client::new(),
            timing: Timing::default(),
        }
    }
}

/// Wait for the deployment to hand over real identifiers.
async fn await_resolved(target: &AgentTarget, polling: Polling) -> shared::Result<()> {
    for attempt in 1..=polling.attempts {
        if !is_unresolved(&target.agent_id) && !is_unresolved(&target.agent_alias_id) {
            return Ok(());
        }
        info!(attempt, max = polling.attempts, "Waiting for agent identifiers to resolve");
        tokio::time::sleep(polling.interval).await;
    }

    if is_unresolved(&target.agent_id) || is_unresolved(&target.agent_alias_id) {
        return Err(AppError::Config(
            "Agent identifiers were not resolved in time".to_string(),
        ));
    }
    Ok(())
}

async fn await_update(
    functions: &dyn FunctionConfiguration,
    function_name: &str,
    polling: Polling,
) -> shared::Result<()> {
    for attempt in 1..=polling.attempts {
        match functions.last_update_status(function_name).await?.as_deref() {
            Some("Successful") => return Ok(()),
            Some("Failed") => {
                return Err(AppError::Aws(format!(
                    "Configuration update of {} failed",
                    function_name
                )))
            }
            status => {
                info!(attempt, status = ?status, "Function update in progress");
                tokio::time::sleep(polling.interval).await;
            }
        }
    }

    Err(AppError::Internal(format!(
        "Timed out waiting for {} to update",
        function_name
    )))
}

async fn update_agent_settings(
    functions: &dyn FunctionConfiguration,
    target: &AgentTarget,
    timing: Timing,
) -> shared::Result<()> {
    await_resolved(target, timing.token_resolution).await?;

    let existing = functions.environment(&target.function_name).await?;
    let variables = merge_environment(existing, target);
    functions
        .set_environment(&target.function_name, variables)
        .await?;

    info!(
        function_name = %target.function_name,
        agent_id = %target.agent_id,
        agent_alias_id = %target.agent_alias_id,
        "Updated agent settings"
    );

    await_update(functions, &target.function_name, timing.update_status).await
}

/// Work out the response for one request.
async fn process(state: &AppState, event: &CustomResourceEvent) -> CustomResourceResponse {
    if event.request_type == "Delete" {
        return build_response(event, ResponseStatus::Success, "Nothing to clean up", json!({}));
    }

    let Some(target) = event.resource_properties.target() else {
        warn!("Custom resource invoked without required properties");
        return build_response(
            event,
            ResponseStatus::Failed,
            "Missing required properties",
            json!({}),
        );
    };

    match update_agent_settings(state.functions.as_ref(), &target, state.timing).await {
        Ok(()) => build_response(
            event,
            ResponseStatus::Success,
            "Agent settings updated",
            json!({ "Message": format!("Updated {}", target.function_name) }),
        ),
        Err(e) => {
            error!(function_name = %target.function_name, error = %e, "Failed to update agent settings");
            build_response(event, ResponseStatus::Failed, e.to_string(), json!({}))
        }
    }
}

async fn send_response(
    client: &reqwest::Client,
    url: &str,
    response: &CustomResourceResponse,
) -> Result<(), Error> {
    // The pre-signed URL is signed without a content type.
    let body = serde_json::to_string(response)?;
    let result = client
        .put(url)
        .header("content-type", "")
        .body(body)
        .send()
        .await
        .map_err(|e| format!("Failed to send custom resource response: {}", e))?;

    if !result.status().is_success() {
        return Err(format!("Custom resource response rejected: {}", result.status()).into());
    }
    Ok(())
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<CustomResourceEvent>) -> Result<(), Error> {
    let event = event.payload;
    info!(
        request_type = %event.request_type,
        logical_resource_id = %event.logical_resource_id,
        "Received custom resource request"
    );

    let response = process(&state, &event).await;
    send_response(&state.http_client, &event.response_url, &response).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
