//! Create the course index and load the sample catalog.
//!
//! ```bash
//! index_courses --endpoint abc123.us-east-1.aoss.amazonaws.com
//! ```

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use clap::Parser;
use shared::config::{DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL, DEFAULT_INDEX};
use shared::courses::{sample_courses, IndexCreation};
use shared::{BedrockModels, CourseIndex, OpenSearchCourseIndex};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "index_courses")]
#[command(about = "Create the course index and load the sample courses")]
struct Args {
    /// Collection endpoint, with or without scheme
    #[arg(long, env = "OPENSEARCH_ENDPOINT")]
    endpoint: String,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    #[arg(long, env = "OPENSEARCH_INDEX", default_value = DEFAULT_INDEX)]
    index: String,

    /// Model used to embed each course
    #[arg(long, env = "EMBEDDING_MODEL_ID", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(args.region.clone()))
        .load()
        .await;

    let models = Arc::new(BedrockModels::new(
        aws_sdk_bedrockruntime::Client::new(&config),
        DEFAULT_CHAT_MODEL,
        args.embedding_model.clone(),
    ));
    let index = OpenSearchCourseIndex::connect(&config, &args.endpoint, &args.index, models)
        .context("Failed to connect to the search collection")?;

    match index.create_index().await.context("Failed to create index")? {
        IndexCreation::Created => println!("Created index {}", args.index),
        IndexCreation::AlreadyExists => println!("Index {} already exists", args.index),
    }

    let courses = sample_courses();
    let mut indexed = 0;
    for (position, course) in courses.iter().enumerate() {
        let id = (position + 1).to_string();
        match index.index_course(&id, course).await {
            Ok(()) => {
                indexed += 1;
                println!("Indexed course {}: {}", id, course.title);
            }
            Err(e) => println!("Failed to index course {}: {}", id, e),
        }
    }

    info!(indexed, total = courses.len(), "Finished indexing");
    println!("Indexed {} of {} courses", indexed, courses.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["index_courses", "--endpoint", "abc.aoss.amazonaws.com"]).unwrap();
        assert_eq!(args.index, "courses");
        assert_eq!(args.embedding_model, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_endpoint_is_required() {
        if std::env::var_os("OPENSEARCH_ENDPOINT").is_none() {
            assert!(Args::try_parse_from(["index_courses"]).is_err());
        }
    }
}
