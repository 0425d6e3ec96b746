use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::{Duration, Instant},
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use pillwatch_session::{CellView, SessionView};
use pillwatch_types::{
    events::{Notification, Severity},
    status::CellStatus,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};

const MAX_NOTIFICATIONS: usize = 50;

pub enum UiMessage {
    Notification(Notification),
}

struct Toast {
    notification: Notification,
    expires_at: Instant,
}

pub fn run<F>(receiver: Receiver<UiMessage>, summary: String, view: F) -> Result<()>
where
    F: Fn() -> SessionView,
{
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, summary.as_str(), view);

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn run_loop<B, F>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    summary: &str,
    view: F,
) -> Result<()>
where
    B: ratatui::backend::Backend,
    F: Fn() -> SessionView,
{
    let mut history: VecDeque<Notification> = VecDeque::with_capacity(MAX_NOTIFICATIONS);
    let mut toasts: Vec<Toast> = Vec::new();

    loop {
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Notification(notification)) => {
                    if history.len() == MAX_NOTIFICATIONS {
                        history.pop_front();
                    }
                    history.push_back(notification.clone());
                    toasts.push(Toast {
                        expires_at: Instant::now()
                            + Duration::from_millis(notification.display_ms),
                        notification,
                    });
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        let now = Instant::now();
        toasts.retain(|toast| toast.expires_at > now);

        let snapshot = view();
        terminal.draw(|f| draw(f, &snapshot, summary, &toasts, &history))?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn draw(f: &mut Frame, view: &SessionView, summary: &str, toasts: &[Toast], history: &VecDeque<Notification>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(8)].as_ref())
        .split(f.size());

    let state = if view.polling {
        Span::styled("monitoring", Style::default().fg(Color::Green))
    } else if view.master_region.is_none() {
        Span::styled("no region", Style::default().fg(Color::Red))
    } else {
        Span::styled("idle", Style::default().fg(Color::Yellow))
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Pillwatch",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        state,
        Span::raw("  "),
        Span::raw(summary),
        Span::raw("  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" to quit"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(header, chunks[0]);

    draw_grid(f, chunks[1], view);

    let items: Vec<ListItem> = toasts
        .iter()
        .rev()
        .map(|toast| {
            ListItem::new(toast.notification.message.clone())
                .style(Style::default().fg(severity_color(toast.notification.severity)))
        })
        .chain(
            history
                .iter()
                .rev()
                .skip(toasts.len())
                .map(|n| ListItem::new(n.message.clone()).style(Style::default().fg(Color::DarkGray))),
        )
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Notifications"));
    f.render_widget(list, chunks[2]);
}

fn draw_grid(f: &mut Frame, area: Rect, view: &SessionView) {
    let block = Block::default().borders(Borders::ALL).title("Organizer");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = view.cells.iter().map(|c| c.cell.row + 1).max().unwrap_or(0);
    let cols = view.cells.iter().map(|c| c.cell.col + 1).max().unwrap_or(0);
    if rows == 0 || cols == 0 {
        f.render_widget(Paragraph::new("No master region set."), inner);
        return;
    }

    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, rows as u32); rows as usize])
        .split(inner);
    for (row, row_area) in row_areas.iter().enumerate() {
        let col_areas = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Ratio(1, cols as u32); cols as usize])
            .split(*row_area);
        for (col, cell_area) in col_areas.iter().enumerate() {
            let Some(cell) = view
                .cells
                .iter()
                .find(|c| c.cell.row as usize == row && c.cell.col as usize == col)
            else {
                continue;
            };
            f.render_widget(cell_widget(cell), *cell_area);
        }
    }
}

fn cell_widget(cell: &CellView) -> Paragraph<'static> {
    let status = cell.state.status;
    let diff = cell
        .state
        .diff
        .map(|d| format!("{d:.1}%"))
        .unwrap_or_else(|| "-".into());
    Paragraph::new(vec![
        Line::from(Span::styled(
            status.as_str().to_string(),
            Style::default().fg(status_color(status)),
        )),
        Line::from(diff),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(cell.cell.label.clone()),
    )
}

fn status_color(status: CellStatus) -> Color {
    if status.is_error() {
        return Color::Red;
    }
    match status {
        CellStatus::Idle => Color::Green,
        CellStatus::Changed => Color::Yellow,
        _ => Color::DarkGray,
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Info => Color::Cyan,
        Severity::Success => Color::Green,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
    }
}
