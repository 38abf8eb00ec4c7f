//! Agent Actions Lambda - Executes the course operations the agent calls.
//!
//! The agent invokes this function for every action group call. Results are
//! always returned in the action group response envelope; failures become an
//! `{"error": ...}` body so the agent can explain them to the user.

mod functions;

use chrono::Utc;
use functions::{
    book_course, build_search_request, error_body, get_course_details, handle_greeting,
    search_courses, ActionEvent, ActionFunction, ActionResponse, BookingRequest, ACTION_GROUP,
    DEFAULT_FUNCTION,
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use shared::{
    ActionsConfig, BedrockModels, CourseIndex, OpenSearchCourseIndex, RetryPolicy, TextModel,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    models: Arc<dyn TextModel>,
    /// `None` when the search collection could not be configured
    index: Option<Arc<dyn CourseIndex>>,
    retry: RetryPolicy,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let settings = ActionsConfig::from_env();

        let (chat_model_id, embedding_model_id) = match &settings {
            Ok(s) => (s.chat_model_id.clone(), s.embedding_model_id.clone()),
            Err(_) => (
                shared::config::DEFAULT_CHAT_MODEL.to_string(),
                shared::config::DEFAULT_EMBEDDING_MODEL.to_string(),
            ),
        };

        let models: Arc<dyn TextModel> = Arc::new(BedrockModels::new(
            aws_sdk_bedrockruntime::Client::new(&config),
            chat_model_id,
            embedding_model_id,
        ));

        let index = settings
            .and_then(|s| {
                OpenSearchCourseIndex::connect(
                    &config,
                    &s.opensearch_endpoint,
                    s.opensearch_index,
                    Arc::clone(&models),
                )
            })
            .map(|index| Arc::new(index) as Arc<dyn CourseIndex>)
            .map_err(|e| error!(error = %e, "Search collection unavailable"))
            .ok();

        Ok(Self {
            models,
            index,
            retry: RetryPolicy::default(),
        })
    }
}

async fn dispatch(state: &AppState, action: &ActionEvent) -> Value {
    let Some(function) = ActionFunction::from_name(&action.function) else {
        return error_body(format!("Unsupported function: {}", action.function));
    };

    let index = match (&state.index, function.needs_search()) {
        (Some(index), true) => Some(index.as_ref()),
        (None, true) => return error_body("OpenSearch service is not available"),
        (_, false) => None,
    };

    match (function, index) {
        (ActionFunction::SearchCourses, Some(index)) => {
            let query_text = action
                .parameter("text")
                .unwrap_or_else(|| action.input_text.clone());
            let request =
                build_search_request(state.models.as_ref(), &state.retry, &query_text).await;
            match serde_json::to_value(search_courses(index, &request).await) {
                Ok(page) => page,
                Err(e) => error_body(e.to_string()),
            }
        }
        (ActionFunction::GetCourseDetails, Some(index)) => {
            let title = action.parameter("course_title").unwrap_or_default();
            get_course_details(index, &title).await
        }
        (ActionFunction::DetectGreeting, _) => handle_greeting(),
        (ActionFunction::BookCourse, _) => book_course(
            BookingRequest {
                course_title: action.parameter("course_title").unwrap_or_default(),
                user_name: action.parameter("user_name").unwrap_or_default(),
                user_email: action.parameter("user_email").unwrap_or_default(),
            },
            Utc::now(),
        ),
        (_, None) => error_body("OpenSearch service is not available"),
    }
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<Value>) -> Result<ActionResponse, Error> {
    let (payload, _context) = event.into_parts();

    let function_name = payload
        .get("function")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_FUNCTION)
        .to_string();

    let action: ActionEvent = match serde_json::from_value(payload) {
        Ok(action) => action,
        Err(e) => {
            error!(error = %e, "Failed to parse action event");
            return Ok(ActionResponse::new(
                ACTION_GROUP,
                &function_name,
                &error_body(format!("Invalid action event: {}", e)),
            ));
        }
    };

    info!(
        function = %action.function,
        session_id = action.session_id.as_deref().unwrap_or_default(),
        "Processing action"
    );

    let body = dispatch(&state, &action).await;
    let action_group = action.action_group.as_deref().unwrap_or(ACTION_GROUP);

    Ok(ActionResponse::new(action_group, &action.function, &body))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
