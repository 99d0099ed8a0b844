// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batch coordinator: fans a job out over a fixed worker pool.
//!
//! Workers claim the next unclaimed slot through a shared cursor and run it
//! through the full engine pipeline. A failure fills its own slot and never
//! touches siblings. Cancellation stops workers from claiming new slots;
//! work already dispatched runs to completion or its own deadline, and every
//! slot left unclaimed is filled with [`AcquireError::Cancelled`]. The
//! report always has one entry per submitted URL, in submission order.

use crate::engine::Engine;
use crate::error::AcquireError;
use crate::events::AcquireEvent;
use crate::types::{AcquisitionRequest, AcquisitionResult, Acquired};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// An ordered set of requests plus a pool size.
#[derive(Debug, Clone)]
pub struct BatchJob {
    id: String,
    /// Submitted URL and its parsed request; requests that failed to build
    /// fill their slot with the build error without being dispatched.
    items: Vec<(String, Result<AcquisitionRequest, AcquireError>)>,
    concurrency: Option<usize>,
    tag: Option<String>,
}

impl BatchJob {
    pub fn new(requests: Vec<AcquisitionRequest>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            items: requests
                .into_iter()
                .map(|r| (r.url().to_string(), Ok(r)))
                .collect(),
            concurrency: None,
            tag: None,
        }
    }

    /// Build a job from raw URLs, each with `timeout_ms`. Unparseable URLs
    /// keep their slot and report `InvalidRequest`.
    pub fn from_urls<S: AsRef<str>>(urls: &[S], timeout_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            items: urls
                .iter()
                .map(|raw| {
                    let raw = raw.as_ref();
                    let request =
                        AcquisitionRequest::new(raw).map(|r| r.with_timeout_ms(timeout_ms));
                    (raw.to_string(), request)
                })
                .collect(),
            concurrency: None,
            tag: None,
        }
    }

    /// Override the pool size. Zero is treated as one.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers.max(1));
        self
    }

    /// Tag every request with `tag`. Concurrent batches sharing a tag share
    /// one pool, sized by whichever of them registered the tag first.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        for (_, item) in &mut self.items {
            if let Ok(request) = item {
                *request = request.clone().with_concurrency_tag(tag.clone());
            }
        }
        self.tag = Some(tag);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }
}

/// Caller-side switch that stops a running batch from dispatching more work.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One filled slot.
///
/// Serialized as `{ index, url, ok: true, result }` or
/// `{ index, url, ok: false, error }`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// Position in the submitted job.
    pub index: usize,
    pub url: String,
    pub result: AcquisitionResult,
}

impl BatchEntry {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(AcquireError::Cancelled))
    }
}

/// Result of a whole batch: one entry per submitted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub id: String,
    pub entries: Vec<BatchEntry>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Result for the first entry submitted as `url`.
    pub fn get(&self, url: &str) -> Option<&AcquisitionResult> {
        self.entries.iter().find(|e| e.url == url).map(|e| &e.result)
    }

    /// Results keyed by submitted URL. Duplicate URLs keep the first entry.
    pub fn by_url(&self) -> HashMap<&str, &AcquisitionResult> {
        let mut map = HashMap::with_capacity(self.entries.len());
        for e in &self.entries {
            map.entry(e.url.as_str()).or_insert(&e.result);
        }
        map
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_ok()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.entries.iter().filter(|e| e.is_cancelled()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded() - self.cancelled()
    }
}

/// Handle to a batch running in the background.
pub struct BatchHandle {
    pub cancel: CancelHandle,
    task: tokio::task::JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Wait for every slot to be filled.
    pub async fn join(self) -> Result<BatchReport, tokio::task::JoinError> {
        self.task.await
    }
}

/// Run `job` to completion on `engine`.
pub async fn run(engine: Arc<Engine>, job: BatchJob, cancel: CancelHandle) -> BatchReport {
    run_with_progress(engine, job, cancel, None).await
}

/// Start `job` in the background. Entries are streamed on the returned
/// receiver in completion order as slots fill.
pub fn spawn(engine: Arc<Engine>, job: BatchJob) -> (BatchHandle, mpsc::UnboundedReceiver<BatchEntry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelHandle::default();
    let task = tokio::spawn(run_with_progress(engine, job, cancel.clone(), Some(tx)));
    (BatchHandle { cancel, task }, rx)
}

async fn run_with_progress(
    engine: Arc<Engine>,
    job: BatchJob,
    cancel: CancelHandle,
    progress: Option<mpsc::UnboundedSender<BatchEntry>>,
) -> BatchReport {
    let started = Instant::now();
    let total = job.items.len();
    let workers = job
        .concurrency
        .unwrap_or_else(|| engine.config().worker_ceiling)
        .max(1)
        .min(total.max(1));
    if let Some(tag) = &job.tag {
        engine.register_tag(tag, workers);
    }
    let urls: Vec<String> = job.items.iter().map(|(url, _)| url.clone()).collect();
    let items = Arc::new(job.items);
    let cursor = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, AcquisitionResult)>();

    tracing::info!("batch {} started: {total} requests, {workers} workers", job.id);

    let mut pool = JoinSet::new();
    for _ in 0..workers {
        let engine = Arc::clone(&engine);
        let items = Arc::clone(&items);
        let cursor = Arc::clone(&cursor);
        let cancel = cancel.clone();
        let tx = tx.clone();
        pool.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some((_, item)) = items.get(index) else {
                    break;
                };
                let result = match item {
                    Ok(request) => engine.acquire(request.clone()).await,
                    Err(e) => Err(e.clone()),
                };
                if tx.send((index, result)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut slots: Vec<Option<AcquisitionResult>> = vec![None; total];
    let mut completed = 0;
    while let Some((index, result)) = rx.recv().await {
        completed += 1;
        if let Some(sink) = &progress {
            let _ = sink.send(BatchEntry {
                index,
                url: urls[index].clone(),
                result: result.clone(),
            });
        }
        slots[index] = Some(result);
        engine.events().emit(AcquireEvent::BatchProgress {
            batch_id: job.id.clone(),
            completed,
            total,
        });
    }

    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("batch {} worker ended abnormally: {e}", job.id);
        }
    }

    let entries: Vec<BatchEntry> = slots
        .into_iter()
        .zip(urls)
        .enumerate()
        .map(|(index, (slot, url))| {
            let undispatched = slot.is_none();
            let result = slot.unwrap_or(Err(AcquireError::Cancelled));
            if undispatched {
                if let Some(sink) = &progress {
                    let _ = sink.send(BatchEntry {
                        index,
                        url: url.clone(),
                        result: result.clone(),
                    });
                }
            }
            BatchEntry { index, url, result }
        })
        .collect();

    let report = BatchReport {
        id: job.id,
        entries,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        "batch {} complete: {} ok, {} failed, {} cancelled in {}ms",
        report.id,
        report.succeeded(),
        report.failed(),
        report.cancelled(),
        report.elapsed_ms
    );
    engine.events().emit(AcquireEvent::BatchComplete {
        batch_id: report.id.clone(),
        succeeded: report.succeeded(),
        failed: report.failed(),
        cancelled: report.cancelled(),
        total_ms: report.elapsed_ms,
    });
    report
}

#[derive(Serialize, Deserialize)]
struct EntryRepr {
    index: usize,
    url: String,
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Acquired>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<AcquireError>,
}

impl Serialize for BatchEntry {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let (result, error) = match &self.result {
            Ok(acquired) => (Some(acquired.clone()), None),
            Err(e) => (None, Some(e.clone())),
        };
        EntryRepr {
            index: self.index,
            url: self.url.clone(),
            ok: result.is_some(),
            result,
            error,
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for BatchEntry {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let repr = EntryRepr::deserialize(d)?;
        let result = match (repr.ok, repr.result, repr.error) {
            (true, Some(acquired), _) => Ok(acquired),
            (false, _, Some(e)) => Err(e),
            _ => return Err(serde::de::Error::custom("entry has neither result nor error")),
        };
        Ok(BatchEntry {
            index: repr.index,
            url: repr.url,
            result,
        })
    }
}
