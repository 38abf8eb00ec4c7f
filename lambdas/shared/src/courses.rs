//! Course search collection.
//!
//! Courses live in an OpenSearch Serverless collection. Queries are embedded
//! with [`TextModel::embed`] and matched against `content_vector` with k-NN,
//! optionally narrowed by term filters.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::SdkConfig;
use opensearch::auth::Credentials;
use opensearch::http::response::Response;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::indices::IndicesCreateParts;
use opensearch::params::Refresh;
use opensearch::{IndexParts, OpenSearch, SearchParts};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use url::Url;

use crate::bedrock::TextModel;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};

/// Nearest neighbours requested per query.
pub const DEFAULT_K: usize = 10;

/// Dimension of the Titan v2 embeddings stored in `content_vector`.
pub const EMBEDDING_DIMENSION: usize = 1024;

/// Signing service name for OpenSearch Serverless.
const AOSS_SERVICE: &str = "aoss";

/// A course document.
///
/// Stored documents are not always written by this crate, so a field that is
/// `null` or of an unexpected type reads as its default instead of rejecting
/// the whole hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(
        rename = "courseId",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub course_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient")]
    pub level: String,
    #[serde(default, deserialize_with = "lenient")]
    pub duration: String,
    #[serde(default, deserialize_with = "lenient")]
    pub duration_hours: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub instructor: String,
    #[serde(default, deserialize_with = "lenient")]
    pub rating: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub keywords: Vec<String>,
    /// Relevance score, set on search results only
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Fields this crate does not model are passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl Course {
    /// Text embedded into `content_vector` at indexing time.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}. {} Keywords: {}",
            self.title,
            self.description,
            self.keywords.join(", ")
        )
    }
}

/// Document stored in the index: the course plus its vector.
#[derive(Debug, Serialize)]
pub struct CourseDocument<'a> {
    #[serde(flatten)]
    pub course: &'a Course,
    pub content_vector: Vec<f32>,
}

/// Search criteria extracted from a user query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
    pub page: usize,
    pub page_size: usize,
}

impl SearchRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            level: None,
            duration: None,
            price_range: None,
            page: 1,
            page_size: 10,
        }
    }

    /// Term filters for the criteria the index can filter on.
    pub fn filters(&self) -> Vec<Value> {
        self.level.iter().map(|level| level_filter(level)).collect()
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub courses: Vec<Course>,
    pub total_results: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

pub fn level_filter(level: &str) -> Value {
    json!({ "term": { "level": level.trim().to_lowercase() } })
}

/// k-NN query over `content_vector`, excluding the vector from the results.
pub fn knn_query(vector: &[f32], k: usize, filters: &[Value]) -> Value {
    let mut query = json!({
        "_source": { "excludes": ["content_vector"] },
        "query": {
            "bool": {
                "must": [
                    { "knn": { "content_vector": { "vector": vector, "k": k } } }
                ]
            }
        }
    });

    if !filters.is_empty() {
        query["query"]["bool"]["filter"] = Value::Array(filters.to_vec());
    }

    query
}

/// Turn a search hit into a course carrying its score and id.
pub fn hit_to_course(hit: &Value) -> Result<Course> {
    let source = hit
        .get("_source")
        .cloned()
        .ok_or_else(|| Error::Search("Hit without _source".to_string()))?;
    let mut course: Course = serde_json::from_value(source)?;

    course.score = hit.get("_score").and_then(Value::as_f64);
    if course.course_id.is_none() {
        course.course_id = hit.get("_id").and_then(Value::as_str).map(String::from);
    }

    Ok(course)
}

/// Slice `courses` into the requested 1-based page.
pub fn paginate(courses: Vec<Course>, page: usize, page_size: usize) -> SearchPage {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total_results = courses.len();
    let total_pages = total_results.div_ceil(page_size);

    let courses = courses
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    SearchPage {
        courses,
        total_results,
        current_page: page,
        total_pages,
    }
}

/// Index settings and field mapping for the course collection.
pub fn index_mapping() -> Value {
    json!({
        "settings": {
            "index": {
                "number_of_shards": 4,
                "number_of_replicas": 1,
                "knn": true
            }
        },
        "mappings": {
            "properties": {
                "title": { "type": "text" },
                "description": { "type": "text" },
                "level": { "type": "keyword" },
                "duration": { "type": "text" },
                "duration_hours": { "type": "float" },
                "price": { "type": "float" },
                "instructor": { "type": "text" },
                "rating": { "type": "float" },
                "keywords": { "type": "keyword" },
                "content_vector": {
                    "type": "knn_vector",
                    "dimension": EMBEDDING_DIMENSION
                }
            }
        }
    })
}

/// Outcome of creating the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCreation {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait CourseIndex: Send + Sync {
    /// Courses closest to `text`, best first.
    async fn semantic_search(&self, text: &str, filters: &[Value]) -> Result<Vec<Course>>;

    async fn create_index(&self) -> Result<IndexCreation>;

    async fn index_course(&self, id: &str, course: &Course) -> Result<()>;
}

pub struct OpenSearchCourseIndex {
    client: OpenSearch,
    index: String,
    models: Arc<dyn TextModel>,
    retry: RetryPolicy,
}

/// Accept either a bare host or a full URL.
pub fn endpoint_url(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    };

    Url::parse(&with_scheme)
        .map_err(|e| Error::Config(format!("Invalid search endpoint '{}': {}", endpoint, e)))
}

impl OpenSearchCourseIndex {
    /// Build a SigV4-signed client for the collection at `endpoint`.
    pub fn connect(
        sdk_config: &SdkConfig,
        endpoint: &str,
        index: impl Into<String>,
        models: Arc<dyn TextModel>,
    ) -> Result<Self> {
        let url = endpoint_url(endpoint)?;
        let credentials = Credentials::try_from(sdk_config)
            .map_err(|e| Error::Config(format!("No AWS credentials for search: {}", e)))?;

        let transport = TransportBuilder::new(SingleNodeConnectionPool::new(url))
            .auth(credentials)
            .service_name(AOSS_SERVICE)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build search transport: {}", e)))?;

        Ok(Self {
            client: OpenSearch::new(transport),
            index: index.into(),
            models,
            retry: RetryPolicy::default(),
        })
    }

    async fn search(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(body.clone())
            .send()
            .await
            .map_err(|e| Error::Search(format!("Search request failed: {}", e)))?;

        read_json(response).await
    }
}

/// Read a JSON body, mapping non-success statuses to errors.
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status_code();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Search(format!("Failed to read search response: {}", e)))?;

    parse_response(status.as_u16(), &body)
}

/// 429 is throttling and retried; any other non-2xx status is a search error.
fn parse_response(status: u16, body: &str) -> Result<Value> {
    if status == 429 {
        return Err(Error::Throttled(format!("Search throttled: {}", body)));
    }
    if !(200..300).contains(&status) {
        return Err(Error::Search(format!("{}: {}", status, body)));
    }

    Ok(serde_json::from_str(body)?)
}

/// An index that already exists is not a failure.
fn creation_outcome(result: Result<Value>) -> Result<IndexCreation> {
    match result {
        Ok(_) => Ok(IndexCreation::Created),
        Err(Error::Search(message)) if message.contains("resource_already_exists_exception") => {
            Ok(IndexCreation::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CourseIndex for OpenSearchCourseIndex {
    async fn semantic_search(&self, text: &str, filters: &[Value]) -> Result<Vec<Course>> {
        let vector = retry_with_backoff(&self.retry, || self.models.embed(text)).await?;
        let query = knn_query(&vector, DEFAULT_K, filters);

        let results = retry_with_backoff(&self.retry, || self.search(&query)).await?;

        let hits = results["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut courses = Vec::with_capacity(hits.len());
        for hit in &hits {
            match hit_to_course(hit) {
                Ok(course) => courses.push(course),
                Err(e) => warn!(error = %e, "Skipping unreadable search hit"),
            }
        }

        info!(hits = courses.len(), "Semantic search complete");
        Ok(courses)
    }

    async fn create_index(&self) -> Result<IndexCreation> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.index))
            .body(index_mapping())
            .send()
            .await
            .map_err(|e| Error::Search(format!("Create index request failed: {}", e)))?;

        creation_outcome(read_json(response).await)
    }

    async fn index_course(&self, id: &str, course: &Course) -> Result<()> {
        let text = course.embedding_text();
        let content_vector = retry_with_backoff(&self.retry, || self.models.embed(&text)).await?;
        let document = serde_json::to_value(CourseDocument {
            course,
            content_vector,
        })?;

        let response = self
            .client
            .index(IndexParts::IndexId(&self.index, id))
            .body(document)
            .refresh(Refresh::True)
            .send()
            .await
            .map_err(|e| Error::Search(format!("Index request failed: {}", e)))?;

        read_json(response).await.map(|_| ())
    }
}

/// Seed catalog used to populate a fresh collection.
pub fn sample_courses() -> Vec<Course> {
    let seed = [
        ("Introduction to Python Programming", "A beginner-friendly course covering Python basics, data structures, and control flow.", "beginner", "4 weeks", 32.0, 99.99, "John Smith", 4.7, &["python", "programming", "beginner", "coding"][..]),
        ("Advanced Machine Learning", "Deep dive into neural networks, deep learning, and advanced ML algorithms.", "advanced", "8 weeks", 64.0, 299.99, "Sarah Johnson", 4.9, &["machine learning", "AI", "deep learning", "neural networks"][..]),
        ("Web Development with JavaScript", "Learn modern JavaScript frameworks and build responsive web applications.", "intermediate", "6 weeks", 48.0, 149.99, "Michael Brown", 4.5, &["javascript", "web development", "frontend", "react"][..]),
        ("Data Science Fundamentals", "Introduction to data analysis, visualization, and basic statistical methods.", "beginner", "5 weeks", 40.0, 129.99, "Emily Chen", 4.6, &["data science", "statistics", "data analysis", "visualization"][..]),
        ("Cloud Architecture on AWS", "Design and implement scalable, highly available systems on AWS.", "advanced", "6 weeks", 48.0, 249.99, "David Wilson", 4.8, &["aws", "cloud", "architecture", "devops"][..]),
        ("Mobile App Development with Flutter", "Build cross-platform mobile applications using Flutter and Dart.", "intermediate", "7 weeks", 56.0, 179.99, "Lisa Rodriguez", 4.7, &["flutter", "mobile", "dart", "app development"][..]),
        ("Cybersecurity Essentials", "Learn fundamental security concepts, threat detection, and protection strategies.", "beginner", "4 weeks", 32.0, 149.99, "Robert Taylor", 4.5, &["cybersecurity", "security", "hacking", "protection"][..]),
        ("DevOps Engineering", "Master CI/CD pipelines, containerization, and infrastructure as code.", "advanced", "8 weeks", 64.0, 279.99, "Jennifer Adams", 4.8, &["devops", "docker", "kubernetes", "ci/cd"][..]),
        ("Digital Marketing Fundamentals", "Learn SEO, social media marketing, and digital advertising strategies.", "beginner", "5 weeks", 40.0, 119.99, "Thomas Green", 4.4, &["marketing", "digital", "seo", "social media"][..]),
        ("Blockchain Development", "Build decentralized applications and smart contracts on Ethereum.", "intermediate", "7 weeks", 56.0, 199.99, "Alex Martinez", 4.6, &["blockchain", "ethereum", "smart contracts", "web3"][..]),
    ];

    seed.iter()
        .map(
            |(title, description, level, duration, hours, price, instructor, rating, keywords)| Course {
                title: title.to_string(),
                description: description.to_string(),
                level: level.to_string(),
                duration: duration.to_string(),
                duration_hours: *hours,
                price: *price,
                instructor: instructor.to_string(),
                rating: *rating,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                ..Course::default()
            },
        )
        .collect()
}
