use crate::error::AppError;
use crate::models::{SectionGroup, Snapshot, UsageLevel, UsageSection};
use crate::monitor::MonitorHandle;
use crate::ui::app::{AppState, Screen};
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::time::Duration as StdDuration;

const COLOR_ACCENT: Color = Color::Cyan;
const COLOR_MUTED: Color = Color::DarkGray;
const COLOR_HEADER: Color = Color::White;
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

pub async fn run_tui(monitor: MonitorHandle) -> Result<(), AppError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let loop_result = run_loop(&mut terminal, &monitor).await;

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    loop_result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    monitor: &MonitorHandle,
) -> Result<(), AppError> {
    let mut state = AppState::default();
    let tick_rate = StdDuration::from_millis(250);
    let mut frame: usize = 0;

    monitor.start_monitoring();

    while state.running {
        let snapshot = monitor.snapshot();
        state.status = status_label(&snapshot, frame);
        frame = frame.wrapping_add(1);

        terminal.draw(|f| render(f, &state, &snapshot, Utc::now()))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                handle_key(key.code, key.modifiers, &mut state, monitor);
            }
        }
        tokio::task::yield_now().await;
    }

    Ok(())
}

fn handle_key(
    code: KeyCode,
    modifiers: KeyModifiers,
    state: &mut AppState,
    monitor: &MonitorHandle,
) {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        state.screen = Screen::ConfirmQuit;
        state.confirm_selected = 0;
        return;
    }

    match state.screen {
        Screen::Dashboard => match code {
            KeyCode::Char('q') | KeyCode::Esc => {
                state.screen = Screen::ConfirmQuit;
                state.confirm_selected = 0;
            }
            KeyCode::Char('r') | KeyCode::Enter => monitor.fetch(),
            KeyCode::Char('z') => state.compact_mode = !state.compact_mode,
            _ => {}
        },
        Screen::ConfirmQuit => match code {
            KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
                state.confirm_selected = 1 - state.confirm_selected.min(1);
            }
            KeyCode::Char('y') => state.running = false,
            KeyCode::Enter => {
                if state.confirm_selected == 1 {
                    state.running = false;
                } else {
                    state.screen = Screen::Dashboard;
                }
            }
            KeyCode::Esc | KeyCode::Char('n') => state.screen = Screen::Dashboard,
            _ => {}
        },
    }
}

fn status_label(snapshot: &Snapshot, frame: usize) -> String {
    if snapshot.is_loading {
        format!("refreshing {}", SPINNER[frame % SPINNER.len()])
    } else if snapshot.error.is_some() {
        "refresh failed".into()
    } else if snapshot.last_updated.is_some() {
        "ok".into()
    } else {
        "waiting".into()
    }
}

fn level_color(level: UsageLevel) -> Color {
    match level {
        UsageLevel::Low => Color::Green,
        UsageLevel::Elevated => Color::Yellow,
        UsageLevel::Critical => Color::Red,
    }
}

/// Text progress bar `width` cells wide.
fn usage_bar(percent: u8, width: usize) -> String {
    let filled = (usize::from(percent.min(100)) * width + 50) / 100;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

fn updated_label(last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    let elapsed = (now - last_updated?).num_seconds().max(0);
    Some(match elapsed {
        0..=59 => "Updated just now".into(),
        60..=3599 => format!("Updated {} min ago", elapsed / 60),
        3600..=86_399 => format!("Updated {} hr ago", elapsed / 3600),
        _ => format!("Updated {} days ago", elapsed / 86_400),
    })
}

fn section_lines(section: &UsageSection, bar_width: usize, compact: bool) -> Vec<Line<'static>> {
    let color = level_color(section.level());
    let mut lines = vec![Line::from(vec![
        Span::styled(
            format!("{:<24}", section.name),
            Style::default()
                .fg(COLOR_HEADER)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("{:>4}%", section.percent), Style::default().fg(color)),
    ])];
    lines.push(Line::from(Span::styled(
        usage_bar(section.percent, bar_width),
        Style::default().fg(color),
    )));
    if !section.reset_info.is_empty() {
        lines.push(Line::from(Span::styled(
            section.reset_info.clone(),
            Style::default().fg(COLOR_MUTED),
        )));
    }
    if !compact {
        lines.push(Line::from(""));
    }
    lines
}

fn body_lines(snapshot: &Snapshot, bar_width: usize, compact: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    if let Some(error) = &snapshot.error {
        lines.push(Line::from(Span::styled(
            format!("! {error}"),
            Style::default().fg(Color::Red),
        )));
        lines.push(Line::from(""));
    }

    if snapshot.sections.is_empty() {
        let placeholder = if snapshot.is_loading {
            "Loading..."
        } else {
            "No usage data yet"
        };
        lines.push(Line::from(Span::styled(
            placeholder,
            Style::default().fg(COLOR_MUTED),
        )));
        return lines;
    }

    let mut first_group = true;
    for group in SectionGroup::ALL {
        let mut members = snapshot.sections_in(group).peekable();
        if members.peek().is_none() {
            continue;
        }
        if !first_group {
            lines.push(Line::from(Span::styled(
                "─".repeat(bar_width),
                Style::default().fg(COLOR_MUTED),
            )));
        }
        first_group = false;
        for section in members {
            lines.extend(section_lines(section, bar_width, compact));
        }
    }

    lines
}

fn render(f: &mut ratatui::Frame, state: &AppState, snapshot: &Snapshot, now: DateTime<Utc>) {
    let size = f.area();
    let compact = state.compact_mode || size.height < 20;

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(size);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            " limiter ",
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" · "),
        Span::styled(
            state.status.clone(),
            Style::default().fg(level_color(snapshot.level())),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title(" Usage "));
    f.render_widget(header, root[0]);

    let bar_width = usize::from(root[1].width.saturating_sub(4)).clamp(10, 60);
    let body = Paragraph::new(body_lines(snapshot, bar_width, compact))
        .block(Block::default().borders(Borders::ALL).title(" Limits "))
        .wrap(Wrap { trim: false });
    f.render_widget(body, root[1]);

    let mut footer_spans = Vec::new();
    if let Some(updated) = updated_label(snapshot.last_updated, now) {
        footer_spans.push(Span::styled(updated, Style::default().fg(COLOR_HEADER)));
        footer_spans.push(Span::raw("  |  "));
    }
    footer_spans.push(Span::styled(
        "r refresh | z compact | q quit",
        Style::default().fg(COLOR_MUTED),
    ));
    let footer =
        Paragraph::new(Line::from(footer_spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, root[2]);

    if state.screen == Screen::ConfirmQuit {
        render_confirm(f, state);
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn render_confirm(f: &mut ratatui::Frame, state: &AppState) {
    let area = centered_rect(56, 30, f.area());
    f.render_widget(Clear, area);

    let cancel_style = if state.confirm_selected == 0 {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let confirm_style = if state.confirm_selected == 1 {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let content = Paragraph::new(vec![
        Line::from("Stop monitoring and exit limiter?"),
        Line::from(""),
        Line::from(vec![
            Span::styled("[Cancel (Esc)]", cancel_style),
            Span::raw("   "),
            Span::styled("[Quit (Enter)]", confirm_style),
        ]),
        Line::from("Use Left/Right to choose"),
    ])
    .block(Block::default().borders(Borders::ALL).title(" Confirm Quit "))
    .alignment(Alignment::Center);

    f.render_widget(content, area);
}
