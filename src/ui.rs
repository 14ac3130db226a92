use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline},
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const MAX_ERRORS: usize = 10;
const RATE_WINDOW: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Listing,
    Details,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Listing => "Scanning listings",
            Phase::Details => "Fetching details",
            Phase::Done => "Done",
        }
    }
}

/// Live counters for a run, shared between the crawler and the dashboard.
#[derive(Debug)]
pub struct RunStats {
    pub listing_total: AtomicUsize,
    pub listing_scanned: AtomicUsize,
    pub discovered: AtomicUsize,
    pub processed: AtomicUsize,
    pub matched: AtomicUsize,
    pub added: AtomicUsize,
    pub failed: AtomicUsize,
    pub active_workers: AtomicUsize,
    phase: AtomicU8,
    finished: AtomicBool,
    errors: Mutex<VecDeque<String>>,
    rate_history: Mutex<VecDeque<u64>>,
    pub start_time: Instant,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub phase: Phase,
    pub listing_total: usize,
    pub listing_scanned: usize,
    pub discovered: usize,
    pub processed: usize,
    pub matched: usize,
    pub added: usize,
    pub failed: usize,
    pub active_workers: usize,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            listing_total: AtomicUsize::new(0),
            listing_scanned: AtomicUsize::new(0),
            discovered: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            matched: AtomicUsize::new(0),
            added: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            active_workers: AtomicUsize::new(0),
            phase: AtomicU8::new(Phase::Listing as u8),
            finished: AtomicBool::new(false),
            errors: Mutex::new(VecDeque::with_capacity(MAX_ERRORS)),
            rate_history: Mutex::new(VecDeque::with_capacity(RATE_WINDOW)),
            start_time: Instant::now(),
        }
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Relaxed) {
            0 => Phase::Listing,
            1 => Phase::Details,
            _ => Phase::Done,
        }
    }

    pub fn add_error(&self, error: String) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if errors.len() >= MAX_ERRORS {
            errors.pop_front();
        }
        errors.push_back(error);
    }

    pub fn recent_errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn add_rate(&self, rate: u64) {
        let mut history = self.rate_history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() >= RATE_WINDOW {
            history.pop_front();
        }
        history.push_back(rate);
    }

    pub fn finish(&self) {
        self.set_phase(Phase::Done);
        self.finished.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            phase: self.phase(),
            listing_total: self.listing_total.load(Ordering::Relaxed),
            listing_scanned: self.listing_scanned.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
        }
    }
}

/// Runs the terminal dashboard until the run finishes.
///
/// `q` closes the dashboard; the crawl itself keeps going.
pub async fn run_ui(stats: Arc<RunStats>) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_ui_loop(&mut terminal, stats).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_ui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    stats: Arc<RunStats>,
) -> io::Result<()> {
    let mut animation_frame = 0u8;
    let spinner_frames = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
    let mut last_rate_update = Instant::now();
    let mut last_processed = 0usize;

    loop {
        let snapshot = stats.snapshot();
        let elapsed = stats.start_time.elapsed();

        if last_rate_update.elapsed() >= Duration::from_secs(1) {
            stats.add_rate(snapshot.processed.saturating_sub(last_processed) as u64);
            last_processed = snapshot.processed;
            last_rate_update = Instant::now();
        }

        animation_frame = (animation_frame + 1) % (spinner_frames.len() as u8);
        let spinner = spinner_frames[animation_frame as usize];

        terminal.draw(|f| {
            let vertical_chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(f.area());

            let top_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(vertical_chunks[0]);

            let bottom_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(vertical_chunks[1]);

            // Top-left: run info
            let elapsed_secs = elapsed.as_secs();
            let rate = if elapsed_secs > 0 {
                snapshot.processed as f64 / elapsed_secs as f64
            } else {
                0.0
            };
            let label = Style::default().fg(Color::Cyan);
            let value = Style::default().fg(Color::White);

            let worker_status = if snapshot.active_workers > 0 {
                Span::styled(
                    format!("{} Active", snapshot.active_workers),
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                )
            } else {
                Span::styled(
                    "Idle",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )
            };

            let system_info = vec![
                Line::from(""),
                Line::from(vec![
                    Span::raw("  "),
                    Span::styled(format!("{spinner} "), label.add_modifier(Modifier::BOLD)),
                    Span::styled("catalog-crawler", label.add_modifier(Modifier::BOLD)),
                ]),
                Line::from("  ─────────────────"),
                Line::from(vec![
                    Span::styled("  Phase     : ", label),
                    Span::styled(snapshot.phase.label(), value),
                ]),
                Line::from(vec![
                    Span::styled("  Uptime    : ", label),
                    Span::styled(
                        format!(
                            "{:02}:{:02}:{:02}",
                            elapsed_secs / 3600,
                            (elapsed_secs % 3600) / 60,
                            elapsed_secs % 60
                        ),
                        value,
                    ),
                ]),
                Line::from(vec![
                    Span::styled("  Rate      : ", label),
                    Span::styled(format!("{rate:.2} p/s"), value),
                ]),
                Line::from(vec![Span::styled("  Workers   : ", label), worker_status]),
            ];
            f.render_widget(
                Paragraph::new(system_info)
                    .block(Block::default().borders(Borders::ALL).title("Run")),
                top_chunks[0],
            );

            // Top-right: recent failures
            let mut error_lines: Vec<Line> = stats
                .recent_errors()
                .into_iter()
                .rev()
                .take(8)
                .map(|msg| Line::from(Span::styled(msg, Style::default().fg(Color::Red))))
                .collect();
            error_lines.reverse();
            if error_lines.is_empty() {
                error_lines.push(Line::from(Span::styled(
                    "No failures",
                    Style::default().fg(Color::Green),
                )));
            }
            f.render_widget(
                Paragraph::new(error_lines)
                    .block(Block::default().borders(Borders::ALL).title("Failures")),
                top_chunks[1],
            );

            // Bottom-left: progress gauge and counters
            let progress_chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(0)])
                .split(bottom_chunks[0]);

            let ratio = if snapshot.discovered > 0 {
                (snapshot.processed as f64 / snapshot.discovered as f64).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL).title("Details"))
                .gauge_style(Style::default().fg(Color::Cyan))
                .ratio(ratio)
                .label(format!("{} / {}", snapshot.processed, snapshot.discovered));
            f.render_widget(gauge, progress_chunks[0]);

            let counters = vec![
                Line::from(vec![
                    Span::styled("  Listing pages : ", label),
                    Span::styled(
                        format!("{} / {}", snapshot.listing_scanned, snapshot.listing_total),
                        value,
                    ),
                ]),
                Line::from(vec![
                    Span::styled("  Matched       : ", label),
                    Span::styled(snapshot.matched.to_string(), value.add_modifier(Modifier::BOLD)),
                ]),
                Line::from(vec![
                    Span::styled("  Added         : ", label),
                    Span::styled(snapshot.added.to_string(), value.add_modifier(Modifier::BOLD)),
                ]),
                Line::from(vec![
                    Span::styled("  Failed        : ", label),
                    Span::styled(snapshot.failed.to_string(), Style::default().fg(Color::Red)),
                ]),
            ];
            f.render_widget(
                Paragraph::new(counters)
                    .block(Block::default().borders(Borders::ALL).title("Catalog")),
                progress_chunks[1],
            );

            // Bottom-right: throughput history
            let rate_history: Vec<u64> = stats
                .rate_history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .copied()
                .collect();
            let max_rate = rate_history.iter().max().copied().unwrap_or(1).max(1);
            let sparkline = Sparkline::default()
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title("Rate (details/sec, 60s)"),
                )
                .data(&rate_history)
                .style(Style::default().fg(Color::Cyan))
                .max(max_rate);
            f.render_widget(sparkline, bottom_chunks[1]);
        })?;

        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
            && let KeyCode::Char('q') = key.code
        {
            break;
        }

        if stats.is_finished() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            break;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}
