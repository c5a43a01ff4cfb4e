use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::time::Duration;
use subflix::store::fs::load_records;
use subflix::{JobStatus, ProcessingJob, SubflixConfig, VideoFile};
use sysinfo::System;

struct App {
    jobs: Vec<ProcessingJob>,
    videos: Vec<VideoFile>,
    system: System,
    table_state: TableState,
    should_quit: bool,
    state_dir: PathBuf,
}

impl App {
    fn new(state_dir: PathBuf) -> Self {
        Self {
            jobs: Vec::new(),
            videos: Vec::new(),
            system: System::new(),
            table_state: TableState::default(),
            should_quit: false,
            state_dir,
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        // Unreadable state shows as an empty table
        self.jobs = load_records::<ProcessingJob>(&self.state_dir).unwrap_or_default();
        self.jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.videos = load_records::<VideoFile>(&self.state_dir).unwrap_or_default();
    }

    fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    fn library_bytes(&self) -> u64 {
        self.videos.iter().map(|v| v.file_size).sum()
    }
}

/// Subflix TUI monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Same fallback location as the daemon's packaging
    let default_config_path = Path::new("/etc/subflix/config.toml");
    let config_path = match args.config.as_deref() {
        Some(path) => Some(path),
        None if default_config_path.exists() => Some(default_config_path),
        None => None,
    };

    let cfg = SubflixConfig::load_config(config_path).context("Failed to load configuration")?;

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(cfg.state_dir.clone());
    let result = run(&mut terminal, &mut app);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;

    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.refresh();
        terminal.draw(|f| ui(f, app))?;

        if crossterm::event::poll(Duration::from_millis(100))? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                match key.code {
                    crossterm::event::KeyCode::Char('q') => app.should_quit = true,
                    crossterm::event::KeyCode::Char('r') => app.refresh(),
                    _ => {}
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.size();

    if size.height < 10 || size.width < 80 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 80x10.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(size);

    render_top_bar(f, app, chunks[0]);
    render_job_table(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn render_top_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let cpu_usage = clamp_percent(app.system.global_cpu_usage() as f64);

    let total_memory = app.system.total_memory();
    let memory_percent = if total_memory == 0 {
        0.0
    } else {
        clamp_percent(app.system.used_memory() as f64 / total_memory as f64 * 100.0)
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(cpu_usage as u16)
        .label(format!("{:.1}%", cpu_usage));
    f.render_widget(cpu_gauge, chunks[0]);

    let memory_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(memory_percent as u16)
        .label(format!("{:.1}%", memory_percent));
    f.render_widget(memory_gauge, chunks[1]);
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "QUE",
        JobStatus::Processing => "RUN",
        JobStatus::Completed => "OK",
        JobStatus::Failed => "FAIL",
    }
}

/// Run time so far for active jobs, total for finished ones
fn job_duration(job: &ProcessingJob, now: DateTime<Utc>) -> String {
    match (job.started_at, job.completed_at) {
        (Some(started), Some(finished)) => format_duration(finished - started),
        (Some(started), None) => format_duration(now - started),
        _ => "-".to_string(),
    }
}

fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn render_job_table(f: &mut Frame, app: &mut App, area: Rect) {
    let max_data_rows = (area.height as usize).saturating_sub(3);

    let header = Row::new(vec!["ST", "FILE", "LANG", "PROG", "TIME", "ERROR"])
        .style(Style::default().add_modifier(Modifier::BOLD))
        .height(1);

    let now = Utc::now();
    let rows: Vec<Row> = if app.jobs.is_empty() {
        vec![Row::new(vec![
            "-".to_string(),
            format!("No jobs in {}", app.state_dir.display()),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
        ])]
    } else {
        app.jobs
            .iter()
            .take(max_data_rows)
            .map(|job| {
                let file_name = job
                    .input_video_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "?".to_string());

                // Output is always `<stem>.<lang>.<ext>`
                let language = job
                    .output_path
                    .file_stem()
                    .and_then(|s| Path::new(s).extension())
                    .map(|l| l.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "-".to_string());

                let style = match job.status {
                    JobStatus::Failed => Style::default().fg(Color::Red),
                    JobStatus::Processing => Style::default().fg(Color::Yellow),
                    _ => Style::default(),
                };

                Row::new(vec![
                    status_label(job.status).to_string(),
                    truncate_string(&file_name, 50),
                    language,
                    format!("{}%", job.progress),
                    job_duration(job, now),
                    truncate_string(job.error_message.as_deref().unwrap_or("-"), 40),
                ])
                .style(style)
            })
            .collect()
    };

    let widths = [
        Constraint::Length(5),
        Constraint::Percentage(45),
        Constraint::Length(8),
        Constraint::Length(5),
        Constraint::Length(7),
        Constraint::Percentage(30),
    ];

    let title = format!("Jobs ({}/{})", rows.len().min(app.jobs.len()), app.jobs.len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .column_spacing(1);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let status_text = format!(
        "Jobs: {} | Queued: {} | Running: {} | Done: {} | Failed: {} | Library: {} videos, {} | q=quit r=refresh",
        app.jobs.len(),
        app.count_by_status(JobStatus::Queued),
        app.count_by_status(JobStatus::Processing),
        app.count_by_status(JobStatus::Completed),
        app.count_by_status(JobStatus::Failed),
        app.videos.len(),
        format_size(app.library_bytes(), DECIMAL),
    );

    let paragraph = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(ratatui::widgets::Wrap { trim: true });

    f.render_widget(paragraph, area);
}

/// Shorten to at most `max_len` characters, marking the cut with "..."
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
