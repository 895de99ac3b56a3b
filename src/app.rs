use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{BatchClient, ResultOutcome};
use crate::collections;
use crate::config::ResolvedConfig;
use crate::domain::{
    Chunk, ChunkStatus, PipelineState, ResultsCache, coverage_percent, normalize_description,
};
use crate::error::DescError;
use crate::estimate::CostEstimate;
use crate::partition::{self, RequestSettings};
use crate::poll::{CancelFlag, PollExit, PollSchedule, Sleeper, poll_until};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    Prepare,
    Submit,
    Poll,
    Merge,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Scan => "Scan",
            Phase::Prepare => "Prepare",
            Phase::Submit => "Submit",
            Phase::Poll => "Poll",
            Phase::Merge => "Merge",
        }
    }

    pub fn parse(message: &str) -> Option<(Phase, &str)> {
        let rest = message.strip_prefix("phase=")?;
        let (label, payload) = rest.split_once(';')?;
        let phase = match label {
            "Scan" => Phase::Scan,
            "Prepare" => Phase::Prepare,
            "Submit" => Phase::Submit,
            "Poll" => Phase::Poll,
            "Merge" => Phase::Merge,
            _ => return None,
        };
        Some((phase, payload.trim()))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Prepare,
    Submit,
    Status,
    Merge,
    Run,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, phase: Phase, message: impl fmt::Display) {
    sink.event(ProgressEvent {
        message: format!("phase={phase}; {message}"),
        elapsed: None,
    });
}

fn emit_timed(sink: &dyn ProgressSink, phase: Phase, message: impl fmt::Display, started: Instant) {
    sink.event(ProgressEvent {
        message: format!("phase={phase}; {message}"),
        elapsed: Some(started.elapsed()),
    });
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PrepareOutcome {
    Prepared {
        collections: usize,
        total_records: usize,
        chunks: Vec<Chunk>,
        estimate: CostEstimate,
        removed_stale_files: usize,
        state_path: String,
    },
    AlreadyPrepared {
        total_records: usize,
        chunks: usize,
        state_path: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitPlan {
    pub model: String,
    pub total_records: usize,
    pub total_chunks: usize,
    pub batch_size: usize,
    pub pending: Vec<usize>,
    pub pending_records: usize,
    pub estimate: CostEstimate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedChunk {
    pub index: usize,
    pub batch_id: String,
    pub requests: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitResult {
    pub submitted: Vec<SubmittedChunk>,
    pub skipped: usize,
    /// Cancelled before every pending chunk was sent.
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub chunks: Vec<Chunk>,
    pub total: usize,
    pub submitted: usize,
    pub ended: usize,
    pub merged: usize,
    pub all_ended: bool,
    pub changed: bool,
}

impl StatusReport {
    fn from_state(state: &PipelineState, changed: bool) -> Self {
        Self {
            chunks: state.chunks.clone(),
            total: state.chunks.len(),
            submitted: state
                .chunks
                .iter()
                .filter(|chunk| chunk.batch_id.is_some())
                .count(),
            ended: state.count_with(ChunkStatus::is_settled),
            merged: state.count_with(|status| status == ChunkStatus::Merged),
            all_ended: state.all_submitted_settled(),
            changed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchExit {
    AllEnded,
    NothingSubmitted,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchResult {
    pub exit: WatchExit,
    pub polls: usize,
    pub report: StatusReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMergeAction {
    Merged,
    AlreadyMerged,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkMerge {
    pub index: usize,
    pub action: ChunkMergeAction,
    pub status: ChunkStatus,
    pub ok: Option<u64>,
    pub errors: Option<u64>,
    pub newly_cached: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionUpdate {
    pub market: String,
    pub path: String,
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub chunks: Vec<ChunkMerge>,
    pub newly_cached: usize,
    pub cached_total: usize,
    pub collections: Vec<CollectionUpdate>,
    pub total_updated: usize,
    pub total_records: usize,
    pub coverage_percent: f64,
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub prepare: PrepareOutcome,
    pub submit: Option<SubmitResult>,
    pub watch: Option<WatchResult>,
    pub merge: Option<MergeResult>,
    pub declined: bool,
}

/// Drives the prepare, submit, poll and merge stages against one data
/// directory. Every stage reloads the persisted state before acting.
#[derive(Clone)]
pub struct App<C: BatchClient> {
    store: Store,
    config: ResolvedConfig,
    client: C,
}

impl<C: BatchClient> App<C> {
    pub fn new(config: ResolvedConfig, client: C) -> Self {
        Self {
            store: Store::new(config.data_dir.clone()),
            config,
            client,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn prepare(&self, force: bool, sink: &dyn ProgressSink) -> Result<PrepareOutcome, DescError> {
        let state_path = self.store.state_path();
        if !force && self.store.state_exists() {
            let state = self.store.load_state()?;
            emit(
                sink,
                Phase::Prepare,
                format!(
                    "state already exists: {} records across {} chunk(s); run submit to proceed, or use --force to regenerate",
                    state.total_records,
                    state.chunks.len()
                ),
            );
            return Ok(PrepareOutcome::AlreadyPrepared {
                total_records: state.total_records,
                chunks: state.chunks.len(),
                state_path: state_path.to_string(),
            });
        }

        emit(
            sink,
            Phase::Scan,
            format!("scanning {}{}*.json", self.store.data_dir(), self.config.collection_prefix),
        );
        let collections =
            collections::load_all(self.store.data_dir(), &self.config.collection_prefix)?;
        let outcome = collections::scan(&collections);
        let total = outcome.records.len();
        emit(
            sink,
            Phase::Scan,
            format!("{} collection file(s)", outcome.collection_count),
        );
        emit(sink, Phase::Scan, format!("{total} unique slugs need descriptions"));

        let estimate = CostEstimate::for_records(total);
        emit(
            sink,
            Phase::Prepare,
            format!(
                "estimated cost ${:.2} (${:.2} in + ${:.2} out, batch discount applied)",
                estimate.total, estimate.input_cost, estimate.output_cost
            ),
        );

        let settings = RequestSettings {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
        };
        let chunks =
            partition::write_chunks(&self.store, &outcome.records, self.config.batch_size, &settings)?;
        for chunk in &chunks {
            emit(
                sink,
                Phase::Prepare,
                format!("chunk {}: {} requests -> {}", chunk.index, chunk.count, chunk.file),
            );
        }
        let removed_stale_files = self.store.remove_request_files_from(chunks.len())?;

        let state = PipelineState::new(&self.config.model, chunks);
        self.store.create_state(&state, force)?;
        info!(
            records = state.total_records,
            chunks = state.chunks.len(),
            "pipeline prepared"
        );
        emit(sink, Phase::Prepare, format!("state saved -> {state_path}"));

        Ok(PrepareOutcome::Prepared {
            collections: outcome.collection_count,
            total_records: state.total_records,
            chunks: state.chunks,
            estimate,
            removed_stale_files,
            state_path: state_path.to_string(),
        })
    }

    /// What `submit` would send right now. Shown to the operator before any
    /// billable call is made.
    pub fn submit_plan(&self) -> Result<SubmitPlan, DescError> {
        let state = self.store.load_state()?;
        let pending: Vec<&Chunk> = state.pending().collect();
        let pending_records = pending.iter().map(|chunk| chunk.count).sum();
        Ok(SubmitPlan {
            model: state.model.clone(),
            total_records: state.total_records,
            total_chunks: state.chunks.len(),
            batch_size: self.config.batch_size,
            pending: pending.iter().map(|chunk| chunk.index).collect(),
            pending_records,
            estimate: CostEstimate::for_records(pending_records),
        })
    }

    /// Submits every `pending` chunk, persisting after each one so a crash
    /// can lose at most the submission in flight. `cancel` is checked
    /// between chunks.
    pub fn submit(
        &self,
        cancel: &CancelFlag,
        sink: &dyn ProgressSink,
    ) -> Result<SubmitResult, DescError> {
        let initial = self.store.load_state()?;
        let pending: Vec<usize> = initial.pending().map(|chunk| chunk.index).collect();
        let mut result = SubmitResult {
            submitted: Vec::new(),
            skipped: initial.chunks.len() - pending.len(),
            stopped: false,
        };

        if pending.is_empty() {
            emit(sink, Phase::Submit, "no pending chunks; all already submitted");
            return Ok(result);
        }

        for index in pending {
            if cancel.is_cancelled() {
                emit(sink, Phase::Submit, "stopped; remaining chunks stay pending");
                result.stopped = true;
                break;
            }
            // Another invocation may have submitted it since we listed.
            let mut state = self.store.load_state()?;
            let Some(chunk) = state.chunks.get(index) else {
                return Err(DescError::StateCorrupt(format!(
                    "chunk {index} disappeared from the state"
                )));
            };
            if chunk.status != ChunkStatus::Pending {
                emit(
                    sink,
                    Phase::Submit,
                    format!("chunk {index} is already {}; skipping", chunk.status),
                );
                result.skipped += 1;
                continue;
            }

            let requests = partition::read_request_file(&chunk.file)?;
            if requests.len() != chunk.count {
                return Err(DescError::RequestFile {
                    path: chunk.file.clone(),
                    message: format!(
                        "expected {} requests, found {}",
                        chunk.count,
                        requests.len()
                    ),
                });
            }

            emit(
                sink,
                Phase::Submit,
                format!("submitting chunk {index} ({} requests)", requests.len()),
            );
            let started = Instant::now();
            let job = self.client.submit(&requests)?;

            let chunk = &mut state.chunks[index];
            chunk.batch_id = Some(job.id.clone());
            chunk.advance(ChunkStatus::Submitted);
            self.store.save_state(&state)?;

            info!(chunk = index, batch_id = %job.id, "chunk submitted");
            emit_timed(
                sink,
                Phase::Submit,
                format!("chunk {index} submitted -> {}", job.id),
                started,
            );
            result.submitted.push(SubmittedChunk {
                index,
                batch_id: job.id,
                requests: requests.len(),
            });
        }

        emit(
            sink,
            Phase::Submit,
            format!("{} chunk(s) submitted", result.submitted.len()),
        );
        Ok(result)
    }

    /// One status sweep: queries every chunk still processing remotely and
    /// saves the state once if anything changed.
    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StatusReport, DescError> {
        let mut snapshot = self.store.load_state()?;
        let mut touched = Vec::new();
        let refreshed = self.refresh_chunks(&mut snapshot, &mut touched, sink);
        if touched.is_empty() {
            refreshed?;
            return Ok(self.report_status(&snapshot, false, sink));
        }

        // Partial changes are kept even when a later query failed.
        let (state, changed) = self.save_refreshed(&touched)?;
        refreshed?;
        Ok(self.report_status(&state, changed, sink))
    }

    fn report_status(
        &self,
        state: &PipelineState,
        changed: bool,
        sink: &dyn ProgressSink,
    ) -> StatusReport {
        let report = StatusReport::from_state(state, changed);
        emit(
            sink,
            Phase::Poll,
            format!(
                "{}/{} ended, {}/{} merged",
                report.ended, report.total, report.merged, report.total
            ),
        );
        report
    }

    /// Queries the service for every refreshable chunk of `state`. Chunks
    /// that changed are copied into `touched`.
    fn refresh_chunks(
        &self,
        state: &mut PipelineState,
        touched: &mut Vec<Chunk>,
        sink: &dyn ProgressSink,
    ) -> Result<(), DescError> {
        for chunk in &mut state.chunks {
            let Some(batch_id) = chunk.batch_id.clone() else {
                emit(sink, Phase::Poll, status_line(chunk));
                continue;
            };
            if chunk.status.is_refreshable() {
                let started = Instant::now();
                let job = self.client.retrieve(&batch_id)?;
                // A job being canceled is still running on the service side.
                let next = if job.status.is_terminal() {
                    ChunkStatus::Ended
                } else {
                    ChunkStatus::InProgress
                };
                let mut changed = next != chunk.status && chunk.advance(next);
                let ok = Some(job.counts.succeeded);
                let errors = Some(job.counts.failed());
                if chunk.ok != ok || chunk.errors != errors {
                    chunk.ok = ok;
                    chunk.errors = errors;
                    changed = true;
                }
                if changed {
                    touched.push(chunk.clone());
                }
                emit_timed(sink, Phase::Poll, status_line(chunk), started);
                continue;
            }
            if chunk.status == ChunkStatus::Ended && !chunk.has_counts() {
                // Ended earlier but the counts never made it to disk.
                let job = self.client.retrieve(&batch_id)?;
                chunk.ok = Some(job.counts.succeeded);
                chunk.errors = Some(job.counts.failed());
                touched.push(chunk.clone());
            }
            emit(sink, Phase::Poll, status_line(chunk));
        }
        Ok(())
    }

    /// Reloads the state and applies only the refreshed chunks to it, so a
    /// concurrent writer's progress on other chunks survives.
    fn save_refreshed(&self, touched: &[Chunk]) -> Result<(PipelineState, bool), DescError> {
        let mut state = self.store.load_state()?;
        let mut changed = false;
        for refreshed in touched {
            let Some(chunk) = state.chunks.get_mut(refreshed.index) else {
                continue;
            };
            if chunk.batch_id != refreshed.batch_id {
                continue;
            }
            if refreshed.status != chunk.status && chunk.advance(refreshed.status) {
                changed = true;
            }
            // A chunk that moved further meanwhile keeps its own counts.
            if chunk.status == refreshed.status
                && (chunk.ok != refreshed.ok || chunk.errors != refreshed.errors)
            {
                chunk.ok = refreshed.ok;
                chunk.errors = refreshed.errors;
                changed = true;
            }
        }
        if changed {
            self.store.save_state(&state)?;
        }
        Ok((state, changed))
    }

    /// Repeats [`App::status`] until every submitted chunk has ended, the
    /// schedule runs out, or `cancel` is raised.
    pub fn watch(
        &self,
        schedule: &PollSchedule,
        sleeper: &dyn Sleeper,
        cancel: &CancelFlag,
        sink: &dyn ProgressSink,
    ) -> Result<WatchResult, DescError> {
        let mut last: Option<StatusReport> = None;
        let mut nothing_submitted = false;
        let (exit, polls) = poll_until(schedule, sleeper, cancel, |poll| {
            let report = self.status(sink)?;
            let done = report.all_ended;
            if report.submitted == 0 {
                nothing_submitted = true;
                emit(sink, Phase::Poll, "nothing has been submitted yet");
            } else if !done && schedule.max_polls.is_none_or(|max| poll < max) {
                emit(
                    sink,
                    Phase::Poll,
                    format!(
                        "still in progress; next check in {}s",
                        schedule.interval.as_secs()
                    ),
                );
            }
            last = Some(report);
            Ok::<bool, DescError>(done || nothing_submitted)
        })?;

        let report = match last {
            Some(report) => report,
            None => StatusReport::from_state(&self.store.load_state()?, false),
        };
        let exit = match exit {
            PollExit::Done if nothing_submitted => WatchExit::NothingSubmitted,
            PollExit::Done => WatchExit::AllEnded,
            PollExit::Exhausted => WatchExit::Exhausted,
            PollExit::Cancelled => WatchExit::Cancelled,
        };
        if exit == WatchExit::AllEnded {
            emit(sink, Phase::Poll, "all chunks have ended; next step: merge");
        }
        Ok(WatchResult {
            exit,
            polls,
            report,
        })
    }

    /// Downloads results of ended chunks into the results cache, then fills
    /// empty descriptions in every collection. When `cancel` is raised the
    /// remaining downloads are left for the next merge; whatever is cached
    /// is still written out.
    pub fn merge(
        &self,
        cancel: &CancelFlag,
        sink: &dyn ProgressSink,
    ) -> Result<MergeResult, DescError> {
        let initial = self.store.load_state()?;
        let mut cache = self.store.load_results()?;
        let mut chunk_merges = Vec::with_capacity(initial.chunks.len());
        let mut newly_cached = 0usize;
        let mut stopped = false;

        for index in 0..initial.chunks.len() {
            if cancel.is_cancelled() {
                emit(sink, Phase::Merge, "stopped; remaining chunks left for the next merge");
                stopped = true;
                break;
            }
            // Another invocation may have moved this chunk since we started.
            let state = self.store.load_state()?;
            let Some(chunk) = state.chunks.get(index) else {
                return Err(DescError::StateCorrupt(format!(
                    "chunk {index} disappeared from the state"
                )));
            };
            let batch_id = match (chunk.status, chunk.batch_id.clone()) {
                (ChunkStatus::Merged, _) => {
                    emit(
                        sink,
                        Phase::Merge,
                        format!("chunk {index} already merged; skipping download"),
                    );
                    chunk_merges.push(merge_entry(chunk, ChunkMergeAction::AlreadyMerged, 0));
                    continue;
                }
                (ChunkStatus::Ended, Some(batch_id)) => batch_id,
                (status, None) if status != ChunkStatus::Pending => {
                    warn!(chunk = index, %status, "chunk without batch id");
                    emit(sink, Phase::Merge, format!("chunk {index} has no batch id; skipping"));
                    chunk_merges.push(merge_entry(chunk, ChunkMergeAction::Skipped, 0));
                    continue;
                }
                (status, _) => {
                    emit(
                        sink,
                        Phase::Merge,
                        format!("chunk {index} is '{status}' (not ended); skipping"),
                    );
                    chunk_merges.push(merge_entry(chunk, ChunkMergeAction::Skipped, 0));
                    continue;
                }
            };

            emit(
                sink,
                Phase::Merge,
                format!("downloading chunk {index} ({batch_id})"),
            );
            let started = Instant::now();
            let (ok, errors, added) = collect_results(&self.client, &batch_id, &mut cache)?;

            // Results must be on disk before the chunk is marked merged, or a
            // crash in between would lose them for good.
            if added > 0 {
                self.store.save_results(&cache)?;
            }
            let mut state = self.store.load_state()?;
            let Some(chunk) = state
                .chunks
                .get_mut(index)
                .filter(|chunk| chunk.batch_id.as_deref() == Some(batch_id.as_str()))
            else {
                return Err(DescError::StateCorrupt(format!(
                    "chunk {index} was replaced while its results were downloading"
                )));
            };
            chunk.advance(ChunkStatus::Merged);
            chunk.ok = Some(ok);
            chunk.errors = Some(errors);
            let merged = merge_entry(chunk, ChunkMergeAction::Merged, added);
            self.store.save_state(&state)?;
            newly_cached += added;

            info!(chunk = index, ok, errors, added, "chunk merged");
            emit_timed(
                sink,
                Phase::Merge,
                format!("chunk {index}: {ok} ok, {errors} errors"),
                started,
            );
            chunk_merges.push(merged);
        }

        let mut result = MergeResult {
            chunks: chunk_merges,
            newly_cached,
            cached_total: cache.len(),
            collections: Vec::new(),
            total_updated: 0,
            total_records: initial.total_records,
            coverage_percent: coverage_percent(cache.len(), initial.total_records),
            stopped,
        };

        if cache.is_empty() {
            emit(sink, Phase::Merge, "no results available yet");
            return Ok(result);
        }
        emit(
            sink,
            Phase::Merge,
            format!("{} descriptions cached -> {}", cache.len(), self.store.results_path()),
        );

        let collections =
            collections::load_all(self.store.data_dir(), &self.config.collection_prefix)?;
        emit(
            sink,
            Phase::Merge,
            format!("updating {} collection file(s)", collections.len()),
        );
        for mut collection in collections {
            let updated = collection.apply_descriptions(&cache);
            if updated == 0 {
                continue;
            }
            collection.save()?;
            emit(
                sink,
                Phase::Merge,
                format!("{:<4} {updated:>6} records updated", collection.market),
            );
            result.total_updated += updated;
            result.collections.push(CollectionUpdate {
                market: collection.market,
                path: collection.path.to_string(),
                updated,
            });
        }

        emit(
            sink,
            Phase::Merge,
            format!("total records updated: {}", result.total_updated),
        );
        emit(
            sink,
            Phase::Merge,
            format!(
                "description coverage: {} / {} unique slugs ({:.1} %)",
                result.cached_total, result.total_records, result.coverage_percent
            ),
        );
        Ok(result)
    }

    /// prepare, submit, watch, merge. `confirm` sees the submit plan before
    /// anything billable happens; returning false stops the run.
    pub fn run(
        &self,
        options: RunOptions,
        confirm: &mut dyn FnMut(&SubmitPlan) -> bool,
        schedule: &PollSchedule,
        sleeper: &dyn Sleeper,
        cancel: &CancelFlag,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, DescError> {
        emit(sink, Phase::Prepare, "step 1/4: prepare");
        let prepare = self.prepare(options.force, sink)?;
        let mut result = RunResult {
            prepare,
            submit: None,
            watch: None,
            merge: None,
            declined: false,
        };

        emit(sink, Phase::Submit, "step 2/4: submit");
        let plan = self.submit_plan()?;
        if plan.total_chunks == 0 {
            emit(sink, Phase::Submit, "nothing to submit; every record has a description");
            return Ok(result);
        }
        if plan.pending.is_empty() {
            emit(sink, Phase::Submit, "no pending chunks; all already submitted");
            result.submit = Some(SubmitResult {
                submitted: Vec::new(),
                skipped: plan.total_chunks,
                stopped: false,
            });
        } else if !confirm(&plan) {
            emit(sink, Phase::Submit, "aborted");
            result.declined = true;
            return Ok(result);
        } else {
            result.submit = Some(self.submit(cancel, sink)?);
        }

        emit(
            sink,
            Phase::Poll,
            format!(
                "step 3/4: polling every {}s until all chunks end",
                schedule.interval.as_secs()
            ),
        );
        let watch = self.watch(schedule, sleeper, cancel, sink)?;
        let finished = watch.exit == WatchExit::AllEnded;
        result.watch = Some(watch);
        if !finished {
            return Ok(result);
        }

        emit(sink, Phase::Merge, "step 4/4: merge");
        result.merge = Some(self.merge(cancel, sink)?);
        Ok(result)
    }
}

fn collect_results<C: BatchClient>(
    client: &C,
    batch_id: &str,
    cache: &mut ResultsCache,
) -> Result<(u64, u64, usize), DescError> {
    let mut ok = 0u64;
    let mut errors = 0u64;
    let mut added = 0usize;
    for result in client.results(batch_id)? {
        match result.outcome {
            ResultOutcome::Succeeded { text } => {
                let text = normalize_description(&text);
                if text.is_empty() {
                    continue;
                }
                ok += 1;
                if cache.insert(&result.custom_id, text) {
                    added += 1;
                }
            }
            ResultOutcome::Errored { message } => {
                warn!(custom_id = %result.custom_id, %message, "request errored");
                errors += 1;
            }
            ResultOutcome::Canceled | ResultOutcome::Expired => errors += 1,
        }
    }
    Ok((ok, errors, added))
}

fn merge_entry(chunk: &Chunk, action: ChunkMergeAction, newly_cached: usize) -> ChunkMerge {
    ChunkMerge {
        index: chunk.index,
        action,
        status: chunk.status,
        ok: chunk.ok,
        errors: chunk.errors,
        newly_cached,
    }
}

fn status_line(chunk: &Chunk) -> String {
    let batch_id = chunk.batch_id.as_deref().unwrap_or("(not submitted)");
    let ok = chunk.ok.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
    let errors = chunk
        .errors
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<4} {:<28} {:<12} {:>7} {:>6}",
        chunk.index,
        batch_id,
        chunk.status.as_str(),
        ok,
        errors
    )
}
