use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Terminal;

use crate::config::RunSettings;
use crate::engine::EngineHealth;
use crate::feed::FeedStatus;
use crate::pipeline;
use crate::query::PairStats;
use crate::types::{LeaderEvent, PriceState, Statistics};

/// What one frame shows, copied out of the engine so drawing holds no lock.
struct DashView {
    health: EngineHealth,
    stats: Statistics,
    feed: FeedStatus,
    prices: Vec<(String, PriceState)>,
    pairs: Vec<PairStats>,
    leaders: Vec<LeaderEvent>,
}

struct App {
    uptime: Instant,
    should_quit: bool,
    scroll_offset: usize,
    view: Option<DashView>,
}

pub async fn run(settings: RunSettings, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, settings, duration).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    settings: RunSettings,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = pipeline::setup(&settings).await?;
    let mut app = App {
        uptime: Instant::now(),
        should_quit: false,
        scroll_offset: 0,
        view: None,
    };

    let run_duration = if duration == 0 {
        Duration::from_secs(u64::MAX / 4)
    } else {
        Duration::from_secs(duration)
    };

    while !app.should_quit && app.uptime.elapsed() < run_duration {
        let (matrix, config, mut view) = {
            let engine = pipeline.engine.lock();
            let view = DashView {
                health: engine.health(),
                stats: engine.statistics(),
                feed: pipeline.feed_status(),
                prices: engine.prices().into_iter().collect(),
                pairs: Vec::new(),
                leaders: engine.live_events(),
            };
            (engine.matrix_view(), engine.config().clone(), view)
        };
        view.prices.sort_by(|a, b| a.0.cmp(&b.0));
        view.pairs = matrix.best_pairs_with(&config, None);
        app.view = Some(view);
        terminal.draw(|f| draw(f, &app))?;

        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                        KeyCode::Up => app.scroll_offset = app.scroll_offset.saturating_sub(1),
                        KeyCode::Down => app.scroll_offset = app.scroll_offset.saturating_add(1),
                        _ => {}
                    }
                }
            }
        }
        tokio::task::yield_now().await;
    }

    pipeline.shutdown().await;
    Ok(())
}

fn draw(f: &mut ratatui::Frame, app: &App) {
    let Some(frame) = &app.view else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // header
            Constraint::Min(10),    // best pairs + prices
            Constraint::Length(10), // live leader events
        ])
        .split(f.area());

    draw_header(f, frame, chunks[0]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(chunks[1]);
    draw_best_pairs(f, frame, app.scroll_offset, middle[0]);
    draw_prices(f, frame, middle[1]);
    draw_leaders(f, frame, chunks[2]);
}

fn draw_header(f: &mut ratatui::Frame, frame: &DashView, area: Rect) {
    let feed_color = match frame.feed {
        FeedStatus::Connected => Color::Green,
        FeedStatus::Connecting => Color::Yellow,
        FeedStatus::Disconnected => Color::Red,
    };
    let header = vec![
        Span::styled(" leadlag-detect ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(format!("Ticks: {}", frame.stats.total_ticks), Style::default().fg(Color::Green)),
        Span::raw(" | "),
        Span::styled(format!("Leaders: {} live / {}", frame.health.live_leader_events, frame.stats.leader_events_detected), Style::default().fg(Color::Yellow)),
        Span::raw(" | "),
        Span::styled(format!("Divergences: {}", frame.stats.divergence_events), Style::default().fg(Color::Red)),
        Span::raw(" | "),
        Span::styled(format!("Feed: {:?}", frame.feed), Style::default().fg(feed_color)),
        Span::raw(" | "),
        Span::raw(format!("p99: {}us", frame.health.tick_latency.p99_us)),
        Span::raw(" | "),
        Span::raw(format!("Uptime: {}s", frame.health.uptime_secs)),
        Span::raw(" | "),
        Span::styled("q=quit  Up/Down=scroll", Style::default().fg(Color::DarkGray)),
    ];
    let p = Paragraph::new(Line::from(header))
        .block(Block::default().borders(Borders::ALL).title(" Causality "));
    f.render_widget(p, area);
}

fn draw_best_pairs(f: &mut ratatui::Frame, frame: &DashView, scroll: usize, area: Rect) {
    let max_visible = (area.height as usize).saturating_sub(3);
    let rows: Vec<Row> = frame
        .pairs
        .iter()
        .skip(scroll)
        .take(max_visible)
        .map(|p| {
            let color = if p.follow_rate >= 0.8 { Color::Green } else { Color::Yellow };
            Row::new(vec![
                Cell::from(format!("{} -> {}", p.leader, p.follower)),
                Cell::from(Span::styled(format!("{:.3}", p.follow_rate), Style::default().fg(color).add_modifier(Modifier::BOLD))),
                Cell::from(format!("{:.0}ms", p.avg_lag)),
                Cell::from(format!("{:.3}", p.avg_magnitude)),
                Cell::from(format!("{}/{}", p.successful_follows, p.missed_follows)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(22),
            Constraint::Length(7),
            Constraint::Length(9),
            Constraint::Length(7),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec!["PAIR", "RATE", "AVG LAG", "MAG", "HIT/MISS"])
            .style(Style::default().add_modifier(Modifier::BOLD).fg(Color::White)),
    )
    .block(Block::default().borders(Borders::ALL).title(format!(" Best Pairs ({}) ", frame.pairs.len())));
    f.render_widget(table, area);
}

fn draw_prices(f: &mut ratatui::Frame, frame: &DashView, area: Rect) {
    let rows: Vec<Row> = frame
        .prices
        .iter()
        .map(|(sym, state)| {
            let color = if state.change_percent > 0.0 {
                Color::Green
            } else if state.change_percent < 0.0 {
                Color::Red
            } else {
                Color::DarkGray
            };
            Row::new(vec![
                Cell::from(Span::styled(sym.clone(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD))),
                Cell::from(format!("{:.4}", state.price)),
                Cell::from(Span::styled(format!("{:+.3}%", state.change_percent), Style::default().fg(color))),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [Constraint::Length(10), Constraint::Min(12), Constraint::Length(9)],
    )
    .block(Block::default().borders(Borders::ALL).title(" Prices "));
    f.render_widget(table, area);
}

fn draw_leaders(f: &mut ratatui::Frame, frame: &DashView, area: Rect) {
    let max_visible = (area.height as usize).saturating_sub(3);
    let rows: Vec<Row> = frame
        .leaders
        .iter()
        .rev()
        .take(max_visible)
        .map(|e| {
            let (label, color) = match e.direction {
                crate::types::Direction::Pump => ("PUMP", Color::Green),
                crate::types::Direction::Dump => ("DUMP", Color::Red),
            };
            let age = (crate::types::now_ms() - e.timestamp).max(0) / 1000;
            Row::new(vec![
                Cell::from(Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD))),
                Cell::from(e.leader_asset.clone()),
                Cell::from(format!("{:+.2}%", e.change_percent)),
                Cell::from(format!("{}s ago", age)),
                Cell::from(format!("{} followers", e.followers_responded.len())),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(9),
            Constraint::Min(12),
        ],
    )
    .header(
        Row::new(vec!["DIR", "LEADER", "MOVE", "AGE", "RESPONSES"])
            .style(Style::default().add_modifier(Modifier::BOLD).fg(Color::White)),
    )
    .block(Block::default().borders(Borders::ALL).title(format!(" Live Leader Events ({}) ", frame.leaders.len())));
    f.render_widget(table, area);
}
