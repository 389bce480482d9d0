//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::{FlowRecord, Outcome, StageKind};
use crate::errors::StageError;
use crate::stages::{FnStage, Stage, StageContext, Transfer};

/// Builds an outcome list from labels.
#[must_use]
pub fn outcomes<I, S>(labels: I) -> Vec<Outcome>
where
    I: IntoIterator<Item = S>,
    S: Into<Outcome>,
{
    labels.into_iter().map(Into::into).collect()
}

/// A stage forwarding every record under `success` (declares `success` and `failure`).
pub fn passthrough(
    name: impl Into<String>,
) -> FnStage<impl FnMut(FlowRecord) -> Result<Transfer, StageError> + Send> {
    FnStage::new(name, |record: FlowRecord| Ok(Transfer::success(record)))
}

/// A source emitting a fixed list of records, `batch_size` per invocation.
///
/// Records arriving on its own queue are forwarded unchanged.
#[derive(Debug)]
pub struct VecSource {
    name: String,
    records: VecDeque<FlowRecord>,
    batch_size: usize,
}

impl VecSource {
    /// Creates a source over `records`.
    #[must_use]
    pub fn new(name: impl Into<String>, records: Vec<FlowRecord>) -> Self {
        Self {
            name: name.into(),
            records: records.into(),
            batch_size: 1,
        }
    }

    /// Creates a source emitting one text record per item.
    #[must_use]
    pub fn from_texts<I, S>(name: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, texts.into_iter().map(FlowRecord::from_text).collect())
    }

    /// Sets how many records are emitted per invocation.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns how many records are still to be emitted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl Stage for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success()]
    }

    fn has_more_input(&self) -> bool {
        !self.records.is_empty()
    }

    async fn transform(
        &mut self,
        _ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let take = self.batch_size.min(self.records.len());
        Ok(batch
            .into_iter()
            .chain(self.records.drain(..take))
            .map(Transfer::success)
            .collect())
    }
}

/// A source that always reports more input.
///
/// Emits one record per invocation, or nothing when created with
/// [`EndlessSource::idle`]. Only stops when the flow is shut down.
#[derive(Debug)]
pub struct EndlessSource {
    name: String,
    emitted: Arc<AtomicU64>,
    idle: bool,
}

impl EndlessSource {
    /// Creates a source emitting `record-<n>` records.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            emitted: Arc::new(AtomicU64::new(0)),
            idle: false,
        }
    }

    /// Creates a source that waits for input forever without producing any.
    #[must_use]
    pub fn idle(name: impl Into<String>) -> Self {
        Self {
            idle: true,
            ..Self::new(name)
        }
    }

    /// Returns a shared counter of emitted records.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.emitted)
    }
}

#[async_trait]
impl Stage for EndlessSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success()]
    }

    fn has_more_input(&self) -> bool {
        true
    }

    async fn transform(
        &mut self,
        _ctx: &StageContext<'_>,
        _batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        if self.idle {
            return Ok(Vec::new());
        }
        let n = self.emitted.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Transfer::success(FlowRecord::from_text(format!("record-{n}")))])
    }
}

/// A stage that fails, optionally after forwarding some records first.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    pass_first: usize,
    seen: usize,
    on_schedule: bool,
}

impl FailingStage {
    /// Creates a stage failing on its first invocation.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            pass_first: 0,
            seen: 0,
            on_schedule: false,
        }
    }

    /// Forwards the first `count` records under `success`, then fails.
    #[must_use]
    pub fn after(mut self, count: usize) -> Self {
        self.pass_first = count;
        self
    }

    /// Fails in `on_scheduled` instead, before any record is seen.
    #[must_use]
    pub const fn when_scheduled(mut self) -> Self {
        self.on_schedule = true;
        self
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success(), Outcome::failure()]
    }

    async fn on_scheduled(&mut self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
        if self.on_schedule {
            return Err(StageError::message(self.error.clone()));
        }
        Ok(())
    }

    async fn transform(
        &mut self,
        _ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        if self.seen + batch.len() > self.pass_first {
            return Err(StageError::message(self.error.clone()));
        }
        self.seen += batch.len();
        Ok(batch.into_iter().map(Transfer::success).collect())
    }
}

/// Emits `copies` forks of each record under `success` and the record itself
/// under `failure`.
#[derive(Debug)]
pub struct FanOutStage {
    name: String,
    copies: usize,
}

impl FanOutStage {
    /// Creates a fan-out stage.
    #[must_use]
    pub fn new(name: impl Into<String>, copies: usize) -> Self {
        Self {
            name: name.into(),
            copies,
        }
    }
}

#[async_trait]
impl Stage for FanOutStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success(), Outcome::failure()]
    }

    async fn transform(
        &mut self,
        _ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let mut transfers = Vec::with_capacity(batch.len() * (self.copies + 1));
        for record in batch {
            for i in 0..self.copies {
                let fork = record.fork(format!("{}#{i}", record.content_text()));
                transfers.push(Transfer::success(fork));
            }
            transfers.push(Transfer::failure(record));
        }
        Ok(transfers)
    }
}

/// A passthrough stage logging its lifecycle and every record it sees.
///
/// Entries are `scheduled`, `record:<content>` and `stopped`.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the shared log.
    #[must_use]
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_outcomes(&self) -> Vec<Outcome> {
        vec![Outcome::success()]
    }

    async fn on_scheduled(&mut self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
        self.log.lock().push("scheduled".to_string());
        Ok(())
    }

    async fn transform(
        &mut self,
        _ctx: &StageContext<'_>,
        batch: Vec<FlowRecord>,
    ) -> Result<Vec<Transfer>, StageError> {
        let mut log = self.log.lock();
        log.extend(batch.iter().map(|r| format!("record:{}", r.content_text())));
        Ok(batch.into_iter().map(Transfer::success).collect())
    }

    async fn on_stopped(&mut self) {
        self.log.lock().push("stopped".to_string());
    }
}
