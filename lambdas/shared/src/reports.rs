//! Ad-hoc reports over the analytics table.

use chrono::{Datelike, NaiveDate};

use crate::{Error, Result};

/// Catalog database holding the messages table.
pub const DEFAULT_DATABASE: &str = "whatsapp_course_recommender_db";

/// Table over the messages bucket.
pub const MESSAGES_TABLE: &str = "whatsapp_messages";

/// Workgroup with the results location configured.
pub const DEFAULT_WORKGROUP: &str = "whatsapp_course_recommender_workgroup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    CountByDate,
    CountByStatus,
    CountByTemplate,
    /// Every record published on the given day
    MessagesOn(NaiveDate),
}

/// Parse a `YYYY-MM-DD` date argument.
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| Error::Validation(format!("Invalid date '{}': {}", date, e)))
}

impl Report {
    /// SQL for this report against `database`.
    pub fn sql(&self, database: &str) -> String {
        let table = format!("\"{}\".\"{}\"", database, MESSAGES_TABLE);

        match self {
            Report::CountByDate => format!(
                "SELECT event_date, COUNT(*) AS messages FROM {table} \
                 GROUP BY event_date ORDER BY event_date"
            ),
            Report::CountByStatus => format!(
                "SELECT status, COUNT(*) AS messages FROM {table} \
                 GROUP BY status ORDER BY messages DESC"
            ),
            Report::CountByTemplate => format!(
                "SELECT template_name, template_language, COUNT(*) AS messages FROM {table} \
                 WHERE template_name IS NOT NULL \
                 GROUP BY template_name, template_language ORDER BY messages DESC"
            ),
            Report::MessagesOn(date) => format!(
                "SELECT message_id, event_date, event_time, status, recipient_id, \
                 conversation_id, billable, pricing_model, pricing_category, \
                 template_name, template_language FROM {table} \
                 WHERE year = {} AND month = {} AND day = {} AND event_date = '{}' \
                 ORDER BY event_time",
                date.year(),
                date.month(),
                date.day(),
                date.format("%Y-%m-%d")
            ),
        }
    }
}
