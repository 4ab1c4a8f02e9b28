mod tui_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use tui_app::{
    format_amount, format_time, is_quote, trade_outcome, trade_price, truncate, AppState, ConnectionStatus,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut market_table_state = TableState::default();
    market_table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut market_table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    market_state: &mut TableState,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(5);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, market_state))?;

        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let selected_id = market_state
                        .selected()
                        .and_then(|i| app.markets.get(i))
                        .map(|m| m.question_id.clone());

                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Char('s') | KeyCode::Char('S') => {
                            if let Some(id) = selected_id {
                                app.request_sync(client, &id).await;
                            }
                        }
                        KeyCode::Enter => {
                            if let Some(id) = selected_id {
                                app.open_market(client, &id).await;
                            }
                        }
                        KeyCode::Esc => app.close_market(),
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.markets.len().saturating_sub(1);
                            let next = market_state.selected().map_or(0, |i| (i + 1).min(max));
                            market_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = market_state
                                .selected()
                                .map_or(0, |i| i.saturating_sub(1));
                            market_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, market_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, market_state, chunks[1]);
    render_footer(f, app, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let counts = &app.health.counts;
    let sched = &app.health.scheduler;
    let queue_color = if sched.dropped > 0 { Color::Red } else { Color::White };
    let p50 = app
        .latency
        .p50_ms
        .map_or("—".to_string(), |v| format!("{v}ms p50"));

    let title_spans = vec![
        Span::styled(
            " CTF Market Indexer  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "{}q {}c {}t {} trades",
                counts.questions, counts.conditions, counts.token_pairs, counts.trades
            ),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "jobs: {} queued{} {} done {} retried {} dropped",
                sched.queued,
                if sched.running { " +1 running" } else { "" },
                sched.completed,
                sched.retried,
                sched.dropped
            ),
            Style::default().fg(queue_color),
        ),
        Span::raw("  │  "),
        Span::styled(p50, Style::default().fg(Color::White)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans))
        .block(Block::default().borders(Borders::ALL).border_style(
            Style::default().fg(Color::DarkGray),
        ));

    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, market_state: &mut TableState, area: Rect) {
    // Horizontal split: markets (55%) | detail (45%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    render_markets_table(f, app, market_state, halves[0]);
    render_detail(f, app, halves[1]);
}

fn price_cell(p: Option<&tui_app::PriceResponse>) -> Cell<'static> {
    match p {
        Some(p) => Cell::from(p.cents.clone()).style(Style::default().fg(Color::Green)),
        None => Cell::from("—").style(Style::default().fg(Color::DarkGray)),
    }
}

fn render_markets_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["#", "Market", "YES", "NO", "Trades"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .markets
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let title = if m.ancillary.title.is_empty() {
                &m.question_id
            } else {
                &m.ancillary.title
            };
            let trades_color = if m.token_pair.is_none() {
                Color::DarkGray
            } else {
                Color::Cyan
            };

            Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(title, 40)),
                price_cell(m.prices.yes.as_ref()),
                price_cell(m.prices.no.as_ref()),
                Cell::from(m.trade_count.to_string()).style(Style::default().fg(trades_color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Min(12),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(7),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                format!(" MARKETS ({}) ", app.markets.len()),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, state);
}

fn render_detail(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let Some(detail) = &app.detail else {
        let hint = Paragraph::new("Select a market and press Enter")
            .style(Style::default().fg(Color::DarkGray))
            .block(block.title(" TRADES "));
        f.render_widget(hint, area);
        return;
    };

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)])
        .split(area);

    let m = &detail.market;
    let yes = m.prices.yes.as_ref().map_or("—".to_string(), |p| p.formatted.clone());
    let no = m.prices.no.as_ref().map_or("—".to_string(), |p| p.formatted.clone());
    let tokens = m
        .token_pair
        .as_ref()
        .map_or("not registered".to_string(), |t| {
            format!("{} / {}", truncate(&t.token0, 12), truncate(&t.token1, 12))
        });
    let summary = vec![
        Line::from(Span::styled(
            m.ancillary.title.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("YES ", Style::default().fg(Color::Yellow)),
            Span::raw(yes),
            Span::raw("   "),
            Span::styled("NO ", Style::default().fg(Color::Yellow)),
            Span::raw(no),
        ]),
        Line::from(vec![
            Span::styled("condition ", Style::default().fg(Color::DarkGray)),
            Span::raw(m.condition_id.as_deref().map_or("—".to_string(), |c| truncate(c, 20))),
        ]),
        Line::from(vec![
            Span::styled("tokens ", Style::default().fg(Color::DarkGray)),
            Span::raw(tokens),
        ]),
    ];
    let paragraph = Paragraph::new(summary)
        .wrap(Wrap { trim: true })
        .block(block.clone().title(Span::styled(
            " MARKET ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )));
    f.render_widget(paragraph, parts[0]);

    let header_cells = ["Time", "Side", "Price", "Qty"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = detail
        .trades
        .iter()
        .map(|t| {
            let outcome = trade_outcome(t, &m.prices);
            let price = trade_price(t).map_or("—".to_string(), |p| format!("{p:.4}"));
            let qty = if is_quote(&t.maker_asset_id) {
                format_amount(&t.taker_amount)
            } else {
                format_amount(&t.maker_amount)
            };
            let side_color = match outcome {
                "YES" => Color::Green,
                "NO" => Color::Red,
                _ => Color::White,
            };
            Row::new(vec![
                Cell::from(format_time(&t.block_time)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(outcome).style(Style::default().fg(side_color)),
                Cell::from(price),
                Cell::from(qty),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(5),
            Constraint::Length(8),
            Constraint::Min(8),
        ],
    )
    .header(header)
    .block(block.title(Span::styled(
        format!(" TRADES ({}) ", m.trade_count),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )));

    f.render_widget(table, parts[1]);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let mut spans = vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll  "),
        Span::styled("[enter/esc] ", Style::default().fg(Color::Yellow)),
        Span::raw("open/close  "),
        Span::styled("[s] ", Style::default().fg(Color::Yellow)),
        Span::raw("sync market  "),
    ];
    match &app.notice {
        Some(n) => spans.push(Span::styled(truncate(n, 50), Style::default().fg(Color::Magenta))),
        None => spans.push(Span::styled("auto-refresh: 5s", Style::default().fg(Color::DarkGray))),
    }
    let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
