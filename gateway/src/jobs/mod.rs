//! Batch dataset jobs: fan items across the node pool and expose progress.
//!
//! A job is created synchronously (the caller gets its id right away) and
//! processed by a bounded set of workers that push every item through the
//! same dispatcher live chat uses, in non-streaming mode. Results are
//! appended as items complete; each entry carries its original item, so
//! callers can re-key regardless of completion order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use inferops_common::{ChatCompletionRequest, ChatMessage};

use crate::cluster::registry::NodeRegistry;
use crate::config::JobsConfig;
use crate::dispatch::Dispatcher;

/// Jobs retained at minimum, regardless of configuration.
const MIN_RETAINED_JOBS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One processed dataset item.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub original: Value,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub total_items: usize,
    pub processed_items: usize,
    pub results: Vec<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(job_id: String, total_items: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Pending,
            total_items,
            processed_items: 0,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<String, Arc<Mutex<Job>>>,
    /// Creation order, oldest first; drives eviction.
    order: VecDeque<String>,
}

/// In-memory job table with per-job locking and a retention cap.
pub struct JobStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            capacity: capacity.max(MIN_RETAINED_JOBS),
        }
    }

    async fn create(&self, total_items: usize) -> (String, Arc<Mutex<Job>>) {
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let job = Arc::new(Mutex::new(Job::new(job_id.clone(), total_items)));

        let mut inner = self.inner.write().await;
        inner.jobs.insert(job_id.clone(), Arc::clone(&job));
        inner.order.push_back(job_id.clone());
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.jobs.remove(&evicted);
                tracing::debug!(job = %evicted, "evicted old job");
            }
        }
        (job_id, job)
    }

    /// Field-wise consistent snapshot of a job, if it is still retained.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        let job = {
            let inner = self.inner.read().await;
            inner.jobs.get(job_id).cloned()
        }?;
        let job = job.lock().await;
        Some(job.clone())
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

/// Schedules dataset items through the dispatcher with a bounded worker set.
#[derive(Clone)]
pub struct BatchEngine {
    store: Arc<JobStore>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<NodeRegistry>,
    max_workers: usize,
    item_timeout: Duration,
}

impl BatchEngine {
    pub fn new(
        store: Arc<JobStore>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<NodeRegistry>,
        config: &JobsConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            registry,
            max_workers: config.max_workers,
            item_timeout: config.item_timeout(),
        }
    }

    /// Create a job for `items` and start processing it in the background.
    /// Returns the job id immediately.
    pub async fn submit(&self, items: Vec<Value>) -> String {
        let (job_id, job) = self.store.create(items.len()).await;
        tracing::info!(job = %job_id, items = items.len(), "batch job created");

        let engine = self.clone();
        let handle = job_id.clone();
        tokio::spawn(async move {
            engine.run_job(handle, job, items).await;
        });
        job_id
    }

    async fn run_job(&self, job_id: String, job: Arc<Mutex<Job>>, items: Vec<Value>) {
        let total = items.len();
        let workers = self
            .max_workers
            .min(self.registry.online_count())
            .min(total)
            .max(1);
        {
            let mut job = job.lock().await;
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
        }
        tracing::info!(job = %job_id, workers, total, "batch job running");

        futures_util::stream::iter(items)
            .for_each_concurrent(workers, |item| {
                let job = Arc::clone(&job);
                async move {
                    let output = self.process_item(&item).await;
                    let mut job = job.lock().await;
                    job.results.push(JobResult {
                        original: item,
                        output,
                    });
                    job.processed_items += 1;
                    job.updated_at = Utc::now();
                }
            })
            .await;

        let mut job = job.lock().await;
        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        tracing::info!(job = %job_id, processed = job.processed_items, "batch job completed");
    }

    /// Run one item through the pool. Failures become `{"error": …}`
    /// outputs; the item still counts as processed.
    async fn process_item(&self, item: &Value) -> Value {
        let request = item_request(item);
        match tokio::time::timeout(self.item_timeout, self.dispatcher.dispatch_buffered(&request))
            .await
        {
            Ok(Ok((_assigned, body))) => body,
            Ok(Err(e)) => serde_json::json!({ "error": e.to_string() }),
            Err(_) => serde_json::json!({ "error": "item deadline exceeded" }),
        }
    }
}

/// Chat request template for one dataset item: the item, serialized as
/// JSON, becomes the user message. No model constraint.
fn item_request(item: &Value) -> ChatCompletionRequest {
    ChatCompletionRequest {
        messages: vec![ChatMessage::user(item.to_string())],
        model: None,
        stream: false,
        extra: serde_json::Map::new(),
    }
}
