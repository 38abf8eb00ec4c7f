//! Run the canned message reports through Athena.
//!
//! ```bash
//! analytics_report count-by-status
//! analytics_report messages-on --date 2025-03-04
//! ```

use anyhow::{anyhow, bail, Context, Result};
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, Row};
use aws_sdk_athena::Client;
use clap::{Parser, Subcommand};
use shared::reports::{parse_date, Report, DEFAULT_DATABASE, DEFAULT_WORKGROUP};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "analytics_report")]
#[command(about = "Query the WhatsApp message analytics table")]
struct Args {
    #[command(subcommand)]
    report: ReportCommand,

    #[arg(long, env = "ATHENA_WORKGROUP", default_value = DEFAULT_WORKGROUP)]
    workgroup: String,

    #[arg(long, env = "ATHENA_DATABASE", default_value = DEFAULT_DATABASE)]
    database: String,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Messages per day
    CountByDate,
    /// Messages per delivery status
    CountByStatus,
    /// Template events per template and language
    CountByTemplate,
    /// All records for one day
    MessagesOn {
        /// Day in YYYY-MM-DD form
        #[arg(long)]
        date: String,
    },
}

impl ReportCommand {
    fn report(&self) -> Result<Report> {
        Ok(match self {
            ReportCommand::CountByDate => Report::CountByDate,
            ReportCommand::CountByStatus => Report::CountByStatus,
            ReportCommand::CountByTemplate => Report::CountByTemplate,
            ReportCommand::MessagesOn { date } => Report::MessagesOn(parse_date(date)?),
        })
    }
}

fn format_row(row: &Row) -> String {
    row.data()
        .iter()
        .map(|datum| datum.var_char_value().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\t")
}

async fn run_query(client: &Client, sql: &str, workgroup: &str, database: &str) -> Result<String> {
    let started = client
        .start_query_execution()
        .query_string(sql)
        .work_group(workgroup)
        .query_execution_context(QueryExecutionContext::builder().database(database).build())
        .send()
        .await
        .context("Failed to start query")?;

    let id = started
        .query_execution_id()
        .ok_or_else(|| anyhow!("Athena returned no query execution id"))?
        .to_string();
    info!(query_execution_id = %id, "Query started");

    loop {
        let execution = client
            .get_query_execution()
            .query_execution_id(&id)
            .send()
            .await
            .context("Failed to read query state")?;
        let status = execution.query_execution().and_then(|q| q.status());

        match status.and_then(|s| s.state()) {
            Some(QueryExecutionState::Succeeded) => return Ok(id),
            Some(QueryExecutionState::Failed) | Some(QueryExecutionState::Cancelled) => {
                let reason = status
                    .and_then(|s| s.state_change_reason())
                    .unwrap_or("no reason given");
                bail!("Query {} did not complete: {}", id, reason);
            }
            state => {
                debug!(state = ?state, "Query still running");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn print_results(client: &Client, id: &str) -> Result<()> {
    let mut next_token: Option<String> = None;

    loop {
        let page = client
            .get_query_results()
            .query_execution_id(id)
            .set_next_token(next_token.take())
            .send()
            .await
            .context("Failed to fetch query results")?;

        if let Some(result_set) = page.result_set() {
            for row in result_set.rows() {
                println!("{}", format_row(row));
            }
        }

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let report = args.report.report()?;
    let sql = report.sql(&args.database);

    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = Client::new(&config);

    let id = run_query(&client, &sql, &args.workgroup, &args.database).await?;
    print_results(&client, &id).await
}
