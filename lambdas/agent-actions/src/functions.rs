//! Course operations exposed to the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use shared::bedrock::{
    fallback_subject, parameter_prompt, parse_parameter, subject_prompt, ParameterKind,
};
use shared::courses::paginate;
use shared::{retry_with_backoff, CourseIndex, RetryPolicy, SearchPage, SearchRequest, TextModel};
use std::collections::HashMap;
use tracing::{error, info, warn};
use validator::{Validate, ValidationErrors};

/// Action group name declared on the agent.
pub const ACTION_GROUP: &str = "CourseOperations";

/// Function assumed when the event names none.
pub const DEFAULT_FUNCTION: &str = "searchCourses";

/// Functions declared in the action group schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFunction {
    SearchCourses,
    GetCourseDetails,
    DetectGreeting,
    BookCourse,
}

impl ActionFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "searchCourses" => Some(Self::SearchCourses),
            "getCourseDetails" => Some(Self::GetCourseDetails),
            "detectGreeting" => Some(Self::DetectGreeting),
            "bookCourse" => Some(Self::BookCourse),
            _ => None,
        }
    }

    pub fn needs_search(self) -> bool {
        matches!(self, Self::SearchCourses | Self::GetCourseDetails)
    }
}

/// Action group invocation sent by the agent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    #[serde(default = "default_function")]
    pub function: String,
    #[serde(default)]
    pub input_text: String,
    pub action_group: Option<String>,
    pub session_id: Option<String>,
    /// `[{name, type, value}]`; entries missing a name or value are ignored,
    /// and anything other than a list counts as no parameters
    #[serde(default, deserialize_with = "list_or_empty")]
    pub parameters: Vec<Value>,
}

fn default_function() -> String {
    DEFAULT_FUNCTION.to_string()
}

fn list_or_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

impl ActionEvent {
    pub fn parameters(&self) -> HashMap<String, String> {
        self.parameters
            .iter()
            .filter_map(|param| {
                let name = param.get("name")?.as_str()?;
                let value = match param.get("value")? {
                    Value::String(s) => s.clone(),
                    Value::Null => return None,
                    other => other.to_string(),
                };
                Some((name.to_string(), value))
            })
            .collect()
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        self.parameters().remove(name)
    }
}

/// Function result in the shape the agent expects.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub message_version: String,
    pub response: FunctionResult,
    pub session_attributes: Map,
    pub prompt_session_attributes: Map,
}

pub type Map = serde_json::Map<String, Value>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub action_group: String,
    pub function: String,
    pub function_response: FunctionResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub response_body: ResponseBody,
}

#[derive(Debug, Serialize)]
pub struct ResponseBody {
    #[serde(rename = "TEXT")]
    pub text: TextBody,
}

#[derive(Debug, Serialize)]
pub struct TextBody {
    /// JSON document rendered as a string
    pub body: String,
}

impl ActionResponse {
    pub fn new(action_group: &str, function: &str, body: &Value) -> Self {
        Self {
            message_version: "1.0".to_string(),
            response: FunctionResult {
                action_group: action_group.to_string(),
                function: function.to_string(),
                function_response: FunctionResponse {
                    response_body: ResponseBody {
                        text: TextBody {
                            body: body.to_string(),
                        },
                    },
                },
            },
            session_attributes: Map::new(),
            prompt_session_attributes: Map::new(),
        }
    }
}

pub fn error_body(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

async fn ask_model(models: &dyn TextModel, retry: &RetryPolicy, prompt: &str) -> shared::Result<String> {
    retry_with_backoff(retry, || models.complete(prompt)).await
}

/// Pull the subject and optional refinements out of the user's text.
pub async fn build_search_request(
    models: &dyn TextModel,
    retry: &RetryPolicy,
    query_text: &str,
) -> SearchRequest {
    let subject_prompt = subject_prompt(query_text);
    let level_prompt = parameter_prompt(query_text, ParameterKind::Level);
    let duration_prompt = parameter_prompt(query_text, ParameterKind::Duration);
    let price_prompt = parameter_prompt(query_text, ParameterKind::PriceRange);

    let (subject, level, duration, price_range) = tokio::join!(
        ask_model(models, retry, &subject_prompt),
        ask_model(models, retry, &level_prompt),
        ask_model(models, retry, &duration_prompt),
        ask_model(models, retry, &price_prompt),
    );

    let subject = match subject {
        Ok(subject) if !subject.is_empty() => subject,
        Ok(_) => fallback_subject(query_text),
        Err(e) => {
            error!(error = %e, "Error extracting subject");
            fallback_subject(query_text)
        }
    };

    let optional = |answer: shared::Result<String>, kind: ParameterKind| match answer {
        Ok(answer) => parse_parameter(&answer),
        Err(e) => {
            error!(parameter = ?kind, error = %e, "Error extracting parameter");
            None
        }
    };

    SearchRequest {
        level: optional(level, ParameterKind::Level),
        duration: optional(duration, ParameterKind::Duration),
        price_range: optional(price_range, ParameterKind::PriceRange),
        ..SearchRequest::new(subject)
    }
}

pub async fn search_courses(index: &dyn CourseIndex, request: &SearchRequest) -> SearchPage {
    info!(request = ?request, "Searching courses");

    let courses = match index.semantic_search(&request.subject, &request.filters()).await {
        Ok(courses) => courses,
        Err(e) => {
            error!(error = %e, "Semantic search error");
            Vec::new()
        }
    };

    paginate(courses, request.page, request.page_size)
}

pub async fn get_course_details(index: &dyn CourseIndex, course_title: &str) -> Value {
    if course_title.trim().is_empty() {
        return json!({ "success": false, "message": "Course title is required" });
    }

    let courses = match index.semantic_search(course_title, &[]).await {
        Ok(courses) => courses,
        Err(e) => {
            error!(error = %e, "Course lookup failed");
            return json!({
                "success": false,
                "message": format!("Error searching for course: {}", e)
            });
        }
    };

    match courses.into_iter().next() {
        Some(course) => json!({ "course": course, "success": true }),
        None => json!({
            "success": false,
            "message": format!("Course with title '{}' not found", course_title)
        }),
    }
}

pub fn handle_greeting() -> Value {
    json!({
        "messageFormat": "custom",
        "responseType": "carousel",
        "message": "Welcome to our technical course recommender! Here are popular technical categories to explore."
    })
}

#[derive(Debug, Validate)]
pub struct BookingRequest {
    #[validate(length(min = 1, message = "Course title is required"))]
    pub course_title: String,
    #[validate(length(min = 1, message = "User name is required"))]
    pub user_name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub user_email: String,
}

#[derive(Debug, Serialize)]
pub struct Booking {
    pub booking_id: String,
    pub course_title: String,
    pub user_name: String,
    pub user_email: String,
    pub start_date: String,
    pub status: String,
    pub message: String,
    pub success: bool,
}

fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errors| errors.iter())
        .map(|error| {
            error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| error.code.to_string())
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

/// Confirm a booking. Bookings are not persisted.
pub fn book_course(request: BookingRequest, now: DateTime<Utc>) -> Value {
    if let Err(errors) = request.validate() {
        let message = validation_message(&errors);
        warn!(message = %message, "Rejected booking request");
        return json!({ "success": false, "message": message });
    }

    let booking = Booking {
        booking_id: format!("BK-{}", now.format("%Y%m%d%H%M%S")),
        message: format!("Successfully booked \"{}\"", request.course_title),
        course_title: request.course_title,
        user_name: request.user_name,
        user_email: request.user_email,
        start_date: now.format("%Y-%m-%d").to_string(),
        status: "CONFIRMED".to_string(),
        success: true,
    };

    info!(booking_id = %booking.booking_id, course = %booking.course_title, "Course booked");
    serde_json::to_value(booking).unwrap_or_else(|e| error_body(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(json: Value) -> ActionEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_event_defaults_and_parameters() {
        let action = event(json!({
            "inputText": "find me python courses",
            "parameters": [
                {"name": "text", "type": "string", "value": "python"},
                {"name": "missing_value"},
                {"value": "no name"},
                "garbage"
            ]
        }));

        assert_eq!(action.function, DEFAULT_FUNCTION);
        assert_eq!(action.parameters().len(), 1);
        assert_eq!(action.parameter("text").as_deref(), Some("python"));
    }

    #[test]
    fn test_parameters_that_are_not_a_list_are_ignored() {
        let action = event(json!({"inputText": "rust courses", "parameters": "not a list"}));
        assert!(action.parameters().is_empty());
        assert_eq!(action.input_text, "rust courses");

        let action = event(json!({"inputText": "rust courses", "parameters": null}));
        assert!(action.parameters().is_empty());
    }

    #[test]
    fn test_response_envelope() {
        let response = ActionResponse::new(ACTION_GROUP, "detectGreeting", &handle_greeting());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["messageVersion"], "1.0");
        assert_eq!(value["response"]["actionGroup"], "CourseOperations");
        assert_eq!(value["response"]["function"], "detectGreeting");
        assert!(value["sessionAttributes"].as_object().unwrap().is_empty());

        let body = value["response"]["functionResponse"]["responseBody"]["TEXT"]["body"]
            .as_str()
            .unwrap();
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["responseType"], "carousel");
    }

    #[test]
    fn test_function_names() {
        assert_eq!(
            ActionFunction::from_name("bookCourse"),
            Some(ActionFunction::BookCourse)
        );
        assert_eq!(ActionFunction::from_name("deleteCourse"), None);
        assert!(ActionFunction::SearchCourses.needs_search());
        assert!(!ActionFunction::DetectGreeting.needs_search());
    }

    #[test]
    fn test_book_course() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 9, 26, 53).unwrap();
        let booking = book_course(
            BookingRequest {
                course_title: "DevOps Engineering".to_string(),
                user_name: "Asha".to_string(),
                user_email: "asha@example.com".to_string(),
            },
            now,
        );

        assert_eq!(booking["booking_id"], "BK-20250304092653");
        assert_eq!(booking["start_date"], "2025-03-04");
        assert_eq!(booking["status"], "CONFIRMED");
        assert_eq!(booking["success"], true);
        assert_eq!(booking["message"], "Successfully booked \"DevOps Engineering\"");
    }

    #[test]
    fn test_book_course_rejects_bad_email() {
        let booking = book_course(
            BookingRequest {
                course_title: "DevOps Engineering".to_string(),
                user_name: "Asha".to_string(),
                user_email: "not-an-email".to_string(),
            },
            Utc::now(),
        );

        assert_eq!(booking["success"], false);
        assert_eq!(booking["message"], "A valid email address is required");
    }
}
