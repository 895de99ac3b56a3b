use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{Phase, ProgressEvent, ProgressSink, ProgressSinkKind, SubmitPlan};
use crate::domain::ChunkStatus;
use crate::error::DescError;
use crate::output::plan_lines;
use crate::poll::CancelFlag;
use crate::store::Store;

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 500;
const SUMMARY_REFRESH: Duration = Duration::from_secs(2);
const HINTS: &[&str] = &[
    "Tip: Esc stops after the current step; progress is saved",
    "Tip: F4 shows the full log, F3 returns here",
    "Tip: re-running a stage is safe; finished chunks are skipped",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Operational,
    Logs,
    Help,
}

#[derive(Debug, Clone, Default)]
struct StateSummary {
    total_records: usize,
    chunks: usize,
    pending: usize,
    running: usize,
    ended: usize,
    merged: usize,
    loaded: bool,
}

#[derive(Debug)]
struct DashboardState {
    status: String,
    phase: Phase,
    latency_ms: Option<u128>,
    remote_calls: u64,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    summary: StateSummary,
    summary_at: Option<Instant>,
    started: Instant,
    active: bool,
    aborting: bool,
    hint_index: usize,
    last_hint_update: Instant,
}

/// Full-screen progress view for one pipeline command. The command runs on
/// a worker thread while the dashboard renders.
pub struct Tui {
    kind: ProgressSinkKind,
    store: Store,
    cancel: CancelFlag,
    state: Arc<Mutex<DashboardState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<DashboardState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            let display = match Phase::parse(&message) {
                Some((phase, payload)) => {
                    state.phase = phase;
                    state.status = payload.to_string();
                    payload.to_string()
                }
                None => {
                    state.status = message.clone();
                    message
                }
            };
            if let Some(elapsed) = event.elapsed {
                state.latency_ms = Some(elapsed.as_millis());
                state.remote_calls = state.remote_calls.saturating_add(1);
                // Remote calls change the persisted state; pick it up soon.
                state.summary_at = None;
            }

            push_bounded(&mut state.events, display.clone(), EVENTS_MAX);
            let line = format!("[{}] {display}", timestamp());
            push_bounded(&mut state.logs, line, LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind, store: Store, cancel: CancelFlag) -> Self {
        Self {
            kind,
            store,
            cancel,
            state: Arc::new(Mutex::new(DashboardState {
                status: "ready".to_string(),
                phase: Phase::Scan,
                latency_ms: None,
                remote_calls: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Operational,
                summary: StateSummary::default(),
                summary_at: None,
                started: Instant::now(),
                active: false,
                aborting: false,
                hint_index: 0,
                last_hint_update: Instant::now(),
            })),
            log_scroll: 0,
        }
    }

    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, DescError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let outcome = loop {
            self.refresh_metrics();
            if let Ok(state) = self.state.lock() {
                let elapsed = state.started.elapsed();
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick, elapsed))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                break result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    self.handle_key(key);
                }
            }

            tick = tick.wrapping_add(1);
        };

        self.set_active(false);
        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        outcome.map_err(miette::Report::new)
    }

    /// Shows the submit plan and waits for y/n.
    pub fn confirm_submit(&mut self, plan: &SubmitPlan) -> miette::Result<bool> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        let mut lines: Vec<Line> = plan_lines(plan).into_iter().map(Line::from).collect();
        lines.push(Line::from(""));
        lines.push(Line::from("Submit? Press y to confirm, n to cancel."));

        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(lines.clone())
                        .alignment(Alignment::Center)
                        .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(confirmed)
    }

    /// Replays the event log to stdout once the dashboard is gone.
    pub fn print_log(&self) -> io::Result<()> {
        let mut stdout = io::stdout();
        if let Ok(state) = self.state.lock() {
            for line in &state.logs {
                writeln!(stdout, "{line}")?;
            }
        }
        stdout.flush()
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::F(1) | KeyCode::Char('?') => self.set_view(View::Help),
            KeyCode::F(3) => self.set_view(View::Operational),
            KeyCode::F(4) => self.set_view(View::Logs),
            KeyCode::PageUp => self.scroll_logs(5),
            KeyCode::PageDown => self.scroll_logs(-5),
            KeyCode::Esc | KeyCode::Char('q') => self.request_abort(),
            _ => {}
        }
    }

    fn request_abort(&self) {
        // Prepare is one local step with nothing to stop between.
        if matches!(self.kind, ProgressSinkKind::Prepare) {
            return;
        }
        self.cancel.cancel();
        if let Ok(mut state) = self.state.lock() {
            if !state.aborting {
                state.aborting = true;
                state.status = "stopping after the current step".to_string();
            }
        }
    }

    fn set_view(&self, view: View) {
        if let Ok(mut state) = self.state.lock() {
            state.view = view;
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
                state.remote_calls = 0;
                state.latency_ms = None;
                state.aborting = false;
            }
        }
    }

    fn refresh_metrics(&self) {
        let stale = self
            .state
            .lock()
            .map(|state| state.summary_at.is_none_or(|at| at.elapsed() >= SUMMARY_REFRESH))
            .unwrap_or(false);
        let summary = if stale {
            Some(summarize_store(&self.store))
        } else {
            None
        };

        if let Ok(mut state) = self.state.lock() {
            if let Some(summary) = summary {
                state.summary = summary;
                state.summary_at = Some(Instant::now());
            }
            if state.last_hint_update.elapsed() >= Duration::from_secs(5) {
                state.hint_index = (state.hint_index + 1) % HINTS.len();
                state.last_hint_update = Instant::now();
            }
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll);
        self.log_scroll = next as u16;
    }
}

fn summarize_store(store: &Store) -> StateSummary {
    let Ok(state) = store.load_state() else {
        return StateSummary::default();
    };
    StateSummary {
        total_records: state.total_records,
        chunks: state.chunks.len(),
        pending: state.count_with(|status| status == ChunkStatus::Pending),
        running: state.count_with(ChunkStatus::is_refreshable),
        ended: state.count_with(|status| status == ChunkStatus::Ended),
        merged: state.count_with(|status| status == ChunkStatus::Merged),
        loaded: true,
    }
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    state: &DashboardState,
    tick: usize,
    elapsed: Duration,
) {
    match state.view {
        View::Operational => draw_operational(frame, tui, state, tick, elapsed),
        View::Logs => draw_logs(frame, tui, state, tick),
        View::Help => draw_help(frame),
    }
}

fn draw_operational(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    state: &DashboardState,
    tick: usize,
    elapsed: Duration,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, state, tick), rows[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[1]);
    frame.render_widget(draw_status_panel(state, elapsed), main[0]);
    frame.render_widget(draw_chunks_panel(&state.summary), main[1]);

    frame.render_widget(draw_footer(state), rows[2]);
}

fn draw_logs(frame: &mut ratatui::Frame, tui: &Tui, state: &DashboardState, tick: usize) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, state, tick), rows[0]);

    let visible = rows[1].height.saturating_sub(1).max(1) as usize;
    let total = state.logs.len();
    let start = total.saturating_sub(tui.log_scroll as usize + visible);
    let mut lines = vec![Line::from(Span::styled(
        "LOG (PgUp/PgDown to scroll)",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for line in state.logs.iter().skip(start).take(visible) {
        lines.push(Line::from(line.clone()));
    }
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), rows[1]);
    frame.render_widget(draw_footer(state), rows[2]);
}

fn draw_help(frame: &mut ratatui::Frame) {
    let block = Block::default().borders(Borders::ALL).title("Help");
    let lines = vec![
        Line::from("F1/? help   F3 dashboard   F4 log"),
        Line::from("Esc/q stop after the current step"),
        Line::from("Stages: prepare -> submit -> status -> merge"),
    ];
    let view = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    frame.render_widget(view, frame.area());
}

fn draw_header(tui: &Tui, state: &DashboardState, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let op_label = match tui.kind {
        ProgressSinkKind::Prepare => "Prepare",
        ProgressSinkKind::Submit => "Submit",
        ProgressSinkKind::Status => "Status",
        ProgressSinkKind::Merge => "Merge",
        ProgressSinkKind::Run => "Run",
    };
    let header_line = Line::from(vec![
        Span::styled(
            "DESCGEN",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let dir_line = Line::from(Span::styled(
        format!("Data dir: {}", tui.store.data_dir()),
        Style::default().fg(Color::Gray),
    ));
    Paragraph::new(vec![header_line, dir_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &DashboardState, elapsed: Duration) -> Paragraph<'static> {
    let progress = phase_progress(state.phase);
    let phase_color = if state.aborting {
        Color::Yellow
    } else if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let latency = state
        .latency_ms
        .map(|v| format!("{v} ms"))
        .unwrap_or_else(|| "--".to_string());
    let mut lines = vec![
        Line::from(Span::styled(
            "STATUS / PROGRESS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:<7} ", state.phase.label()),
                Style::default().fg(phase_color),
            ),
            Span::raw(progress_bar(progress)),
            Span::raw(format!(" {progress:>3}%")),
        ]),
        Line::from(vec![
            Span::styled("Now: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Remote calls: ", Style::default().fg(Color::Gray)),
            Span::raw(state.remote_calls.to_string()),
            Span::styled("   Last latency: ", Style::default().fg(Color::Gray)),
            Span::raw(latency),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", elapsed.as_secs())),
        ]),
        Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )),
    ];
    for event in state.events.iter().rev().take(EVENTS_MAX) {
        lines.push(Line::from(format!("- {event}")));
    }

    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_chunks_panel(summary: &StateSummary) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "CHUNKS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    if !summary.loaded {
        lines.push(Line::from(Span::styled(
            "not prepared yet",
            Style::default().fg(Color::Yellow),
        )));
        return Paragraph::new(lines);
    }
    let row = |label: &str, value: usize, color: Color| {
        Line::from(vec![
            Span::styled(format!("{label:<10}"), Style::default().fg(Color::Gray)),
            Span::styled(value.to_string(), Style::default().fg(color)),
        ])
    };
    lines.push(row("Records", summary.total_records, Color::White));
    lines.push(row("Chunks", summary.chunks, Color::White));
    lines.push(row("Pending", summary.pending, Color::Yellow));
    lines.push(row("Running", summary.running, Color::Cyan));
    lines.push(row("Ended", summary.ended, Color::Green));
    lines.push(row("Merged", summary.merged, Color::Green));
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_footer(state: &DashboardState) -> Paragraph<'static> {
    let text = if state.aborting {
        Span::styled(
            "Stopping; waiting for the current step to finish",
            Style::default().fg(Color::Yellow),
        )
    } else {
        Span::styled(HINTS[state.hint_index], Style::default().fg(Color::Gray))
    };
    Paragraph::new(Line::from(text)).block(Block::default().borders(Borders::TOP))
}

fn phase_progress(phase: Phase) -> u8 {
    let index = match phase {
        Phase::Scan => 0,
        Phase::Prepare => 1,
        Phase::Submit => 2,
        Phase::Poll => 3,
        Phase::Merge => 4,
    };
    ((index + 1) * 20) as u8
}

fn progress_bar(percent: u8) -> String {
    let total = 10;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
