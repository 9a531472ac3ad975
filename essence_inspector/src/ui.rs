use std::collections::VecDeque;
use std::time::Instant;

use essence_runtime::{
    BalanceBoard, BoardRow, DisplayCell, DisplayPhase, EssenceKind, OwnerId, WorldSnapshot,
};
use ratatui::layout::{Constraint, Direction, Layout, Margin};
use ratatui::prelude::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use crate::app::FeedEvent;
use crate::ticker::TickerHandle;

/// One open detail panel: its own board and its own timer, released together
/// when the panel closes.
pub struct DetailView {
    pub board: BalanceBoard,
    _ticker: TickerHandle,
}

pub struct UiState {
    pub owner: OwnerId,
    pub board: BalanceBoard,
    pub detail: Option<DetailView>,
    pub selected: usize,
    pub logs: VecDeque<String>,
    pub max_logs: usize,
    pub connected: bool,
    latest_snapshot: Option<WorldSnapshot>,
    received_at: Option<Instant>,
}

impl UiState {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            board: BalanceBoard::new(owner),
            detail: None,
            selected: 0,
            logs: VecDeque::new(),
            max_logs: 8,
            connected: false,
            latest_snapshot: None,
            received_at: None,
        }
    }

    pub fn push_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Connected => self.connected = true,
            FeedEvent::Disconnected => self.connected = false,
            FeedEvent::Snapshot(snapshot) => {
                self.board.apply_snapshot(&snapshot);
                if let Some(detail) = self.detail.as_mut() {
                    detail.board.apply_snapshot(&snapshot);
                }
                self.received_at = Some(Instant::now());
                self.latest_snapshot = Some(snapshot);
            }
        }
    }

    pub fn push_log<S: Into<String>>(&mut self, line: S) {
        let mut text: String = line.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }
        self.logs.push_front(text);
        while self.logs.len() > self.max_logs {
            self.logs.pop_back();
        }
    }

    /// Extrapolation clock: the last server timestamp plus the local time
    /// since that frame arrived. Keeps counting through demo clock jumps,
    /// which run the store clock ahead of this machine's wall clock.
    pub fn now_ms(&self) -> u64 {
        match self.received_at {
            Some(received_at) => {
                self.board.server_time_ms() + received_at.elapsed().as_millis() as u64
            }
            None => 0,
        }
    }

    pub fn advance_board(&mut self) {
        let now_ms = self.now_ms();
        self.board.advance(now_ms);
    }

    pub fn advance_detail(&mut self) {
        let now_ms = self.now_ms();
        if let Some(detail) = self.detail.as_mut() {
            detail.board.advance(now_ms);
        }
    }

    pub fn detail_open(&self) -> bool {
        self.detail.is_some()
    }

    /// Opens the detail panel over a fresh board seeded from the latest
    /// frame. The panel owns the ticker handle; closing the panel drops it,
    /// which stops and joins the timer thread.
    pub fn open_detail(&mut self, ticker: TickerHandle) {
        let mut board = BalanceBoard::new(self.owner);
        if let Some(snapshot) = &self.latest_snapshot {
            board.apply_snapshot(snapshot);
        }
        self.detail = Some(DetailView {
            board,
            _ticker: ticker,
        });
    }

    pub fn close_detail(&mut self) {
        self.detail = None;
    }

    pub fn select_next(&mut self) {
        self.selected = (self.selected + 1) % EssenceKind::VARIANTS.len();
    }

    pub fn select_previous(&mut self) {
        self.selected =
            (self.selected + EssenceKind::VARIANTS.len() - 1) % EssenceKind::VARIANTS.len();
    }

    pub fn selected_kind(&self) -> EssenceKind {
        EssenceKind::VARIANTS[self.selected]
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.latest_snapshot
            .as_ref()
            .map(|snapshot| snapshot.header.tick)
    }
}

pub fn draw_ui(frame: &mut Frame, state: &UiState) {
    let mut constraints = vec![
        Constraint::Length(3),
        Constraint::Min(EssenceKind::VARIANTS.len() as u16 + 2),
    ];
    if state.detail_open() {
        constraints.push(Constraint::Length(10));
    }
    constraints.push(Constraint::Length(7));
    constraints.push(Constraint::Length(3));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(frame.size());

    draw_header(frame, chunks[0], state);
    draw_balances(frame, chunks[1], state);
    let mut next = 2;
    if let Some(detail) = &state.detail {
        draw_detail(frame, chunks[next], state, detail);
        next += 1;
    }
    draw_logs(frame, chunks[next], state);
    draw_help(frame, chunks[next + 1]);
}

fn draw_header(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Mek Forge Inspector");
    let status = if state.connected {
        Span::styled("live", Style::default().fg(Color::Green))
    } else {
        Span::styled("offline", Style::default().fg(Color::Red))
    };
    let tick_text = match state.last_tick() {
        Some(tick) => format!("tick {}", tick),
        None => "waiting for first snapshot".to_string(),
    };
    let line = Line::from(vec![
        status,
        Span::raw(format!(" | owner {} | {}", state.owner, tick_text)),
    ]);
    let text = Paragraph::new(line).wrap(Wrap { trim: true });
    frame.render_widget(block, area);
    frame.render_widget(
        text,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_balances(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Balances");
    let lines: Vec<Line> = state
        .board
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| balance_line(index == state.selected, row))
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn balance_line(selected: bool, row: &BoardRow) -> Line<'static> {
    let marker = if selected { ">" } else { " " };
    let name_style = if selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let mut spans = vec![
        Span::raw(format!("{} ", marker)),
        Span::styled(format!("{:<11}", row.kind.as_str()), name_style),
        Span::styled(format!("{:>13}", row.cell.to_string()), amount_style(row)),
    ];
    match row.params {
        Some(params) => spans.push(Span::raw(format!(
            "  {}/day  cap {}",
            params.rate_per_day, params.cap
        ))),
        None => spans.push(Span::raw("  rate unavailable")),
    }
    if row.contribution_count > 0 {
        spans.push(Span::raw(format!("  hits {}", row.contribution_count)));
    }
    if row.phase == Some(DisplayPhase::Capped) {
        spans.push(Span::styled("  CAPPED", Style::default().fg(Color::Yellow)));
    }
    Line::from(spans)
}

fn amount_style(row: &BoardRow) -> Style {
    match row.cell {
        DisplayCell::Loading => Style::default().fg(Color::DarkGray),
        DisplayCell::Degraded => Style::default().fg(Color::Red),
        DisplayCell::Value(_) => match row.phase {
            Some(DisplayPhase::Running) => Style::default().fg(Color::Green),
            Some(DisplayPhase::Capped) => Style::default().fg(Color::Yellow),
            _ => Style::default(),
        },
    }
}

fn draw_detail(frame: &mut Frame, area: Rect, state: &UiState, detail: &DetailView) {
    let kind = state.selected_kind();
    let panel = detail.board.attribution(kind);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Attribution: {}", kind.as_str()));

    let mut lines = vec![Line::from(Span::raw(format!(
        "amount {:>13}   base {}/day, hits {}, base cap {}",
        detail.board.cell(kind).to_string(),
        panel.base_rate,
        panel.contribution_count,
        panel.base_cap
    )))];
    if panel.has_buffs() {
        for row in &panel.rows {
            lines.push(Line::from(vec![
                Span::styled(
                    format!("{:<12}", row.source),
                    Style::default().fg(Color::Magenta),
                ),
                Span::raw(format!(
                    "{:<18} rate {:<16} cap {}",
                    row.name, row.rate_text, row.cap_text
                )),
            ]));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "no active buffs",
            Style::default().fg(Color::DarkGray),
        )));
    }
    match &panel.totals {
        Ok(params) => lines.push(Line::from(Span::raw(format!(
            "total {}/day, cap {}",
            params.rate_per_day, params.cap
        )))),
        Err(err) => lines.push(Line::from(Span::styled(
            format!("configuration degraded: {}", err),
            Style::default().fg(Color::Red),
        ))),
    }

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_logs(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Logs");
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|entry| Line::from(Span::raw(entry)))
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_help(frame: &mut Frame, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Keys");
    let line = Line::from(vec![
        Span::styled("q", key_style()),
        Span::raw(" quit  "),
        Span::styled("tab", key_style()),
        Span::raw(" detail  "),
        Span::styled("up/down", key_style()),
        Span::raw(" select  "),
        Span::styled("c", key_style()),
        Span::raw(" checkpoint  "),
        Span::styled("g", key_style()),
        Span::raw(" grant  "),
        Span::styled("b", key_style()),
        Span::raw(" buff  "),
        Span::styled("k", key_style()),
        Span::raw(" +1 day"),
    ]);
    let paragraph = Paragraph::new(line).wrap(Wrap { trim: true });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn key_style() -> Style {
    Style::default().fg(Color::Yellow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use essence_runtime::{BalanceState, ConfigState, Scalar, SnapshotHeader};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn demo_snapshot() -> WorldSnapshot {
        WorldSnapshot {
            header: SnapshotHeader {
                tick: 3,
                server_time_ms: 1_000,
                ..SnapshotHeader::default()
            },
            balances: vec![BalanceState {
                entity: 9,
                owner: OwnerId(1),
                kind: EssenceKind::Stone,
                amount: Scalar::from_f32(2.0),
                last_updated_ms: 1_000,
            }],
            config: Some(ConfigState {
                base_rate_per_day: Scalar::from_f32(0.1),
                base_cap: Scalar::from_i64(10),
                swap_base_cost: Scalar::from_i64(1_000),
                swap_cost_increment: Scalar::from_i64(500),
                swap_cost_max: Scalar::from_i64(10_000),
                slot_gold_costs: [Scalar::from_i64(10_000); 4],
                slot_requirement_counts: [2, 3, 4, 5],
                slot_requirement_amounts: [Scalar::from_i64(5); 4],
            }),
            ..WorldSnapshot::default()
        }
    }

    #[test]
    fn selection_wraps_both_directions() {
        let mut state = UiState::new(OwnerId(1));
        assert_eq!(state.selected_kind(), EssenceKind::Stone);
        state.select_previous();
        assert_eq!(state.selected_kind(), EssenceKind::Drill);
        state.select_next();
        assert_eq!(state.selected_kind(), EssenceKind::Stone);
    }

    #[test]
    fn log_lines_trim_newlines_and_cap_history() {
        let mut state = UiState::new(OwnerId(1));
        for index in 0..20 {
            state.push_log(format!("line {}\r\n", index));
        }
        assert_eq!(state.logs.len(), state.max_logs);
        assert_eq!(state.logs.front().map(String::as_str), Some("line 19"));
        state.push_log("\n");
        assert_eq!(state.logs.len(), state.max_logs);
    }

    #[test]
    fn detail_board_seeds_from_the_latest_frame() {
        let mut state = UiState::new(OwnerId(1));
        state.push_event(FeedEvent::Snapshot(demo_snapshot()));

        let (sender, _receiver) = channel();
        state.open_detail(TickerHandle::with_period(sender, Duration::from_millis(5)));
        let detail = state.detail.as_ref().unwrap();
        assert!(!detail.board.is_loading());
        assert_eq!(
            detail.board.cell(EssenceKind::Stone),
            DisplayCell::Value(Scalar::from_f32(2.0))
        );

        // Closing drops the panel's board and joins its timer.
        state.close_detail();
        assert!(!state.detail_open());
    }

    #[test]
    fn connection_events_toggle_the_status_flag() {
        let mut state = UiState::new(OwnerId(1));
        assert!(!state.connected);
        state.push_event(FeedEvent::Connected);
        assert!(state.connected);
        state.push_event(FeedEvent::Disconnected);
        assert!(!state.connected);
    }
}
