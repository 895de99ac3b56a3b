use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

use crate::app::{
    MergeResult, Phase, PrepareOutcome, ProgressEvent, ProgressSink, RunResult, StatusReport,
    SubmitPlan, SubmitResult, WatchResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_prepare(result: &PrepareOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_submit(result: &SubmitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_watch(result: &WatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_merge(result: &MergeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints each progress event as a plain line, without the phase prefix.
/// Goes to stderr so stdout stays machine readable.
pub struct LineOutput<W: Write + Send> {
    writer: Mutex<W>,
}

impl LineOutput<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> LineOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> ProgressSink for LineOutput<W> {
    fn event(&self, event: ProgressEvent) {
        let line = match Phase::parse(&event.message) {
            Some((_, payload)) => payload.to_string(),
            None => event.message,
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}

/// The confirmation text shown before a billable submission.
pub fn plan_lines(plan: &SubmitPlan) -> Vec<String> {
    vec![
        format!("Model:   {}", plan.model),
        format!("Records: {}", plan.total_records),
        format!(
            "Chunks:  {} (batch size {}), {} pending with {} records",
            plan.total_chunks,
            plan.batch_size,
            plan.pending.len(),
            plan.pending_records
        ),
        format!(
            "Est. cost: ${:.2} (${:.2} in + ${:.2} out, 50% batch discount)",
            plan.estimate.total, plan.estimate.input_cost, plan.estimate.output_cost
        ),
    ]
}
