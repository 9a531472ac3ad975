use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode};
use essence_runtime::{EssenceKind, OwnerId, WorldSnapshot, MS_PER_DAY};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, trace};

use crate::ticker::{TickEvent, TickerHandle};
use crate::ui::{draw_ui, UiState};

/// What the snapshot pump delivers to the UI thread.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected,
    Snapshot(WorldSnapshot),
    Disconnected,
}

pub struct InspectorApp {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    ui_state: UiState,
    receiver: UnboundedReceiver<FeedEvent>,
    command_sender: Sender<ClientCommand>,
    shutdown_sender: Sender<()>,
    log_receiver: Receiver<String>,
    tick_sender: Sender<TickEvent>,
    tick_receiver: Receiver<TickEvent>,
}

impl InspectorApp {
    pub fn new(
        receiver: UnboundedReceiver<FeedEvent>,
        command_sender: Sender<ClientCommand>,
        shutdown_sender: Sender<()>,
        log_receiver: Receiver<String>,
        owner: OwnerId,
    ) -> Result<Self> {
        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        crossterm::terminal::enable_raw_mode()?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        let (tick_sender, tick_receiver) = mpsc::channel();
        Ok(Self {
            terminal,
            ui_state: UiState::new(owner),
            receiver,
            command_sender,
            shutdown_sender,
            log_receiver,
            tick_sender,
            tick_receiver,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut last_draw = Instant::now();

        loop {
            while let Ok(event) = self.receiver.try_recv() {
                self.ui_state.push_event(event);
            }

            while let Ok(line) = self.log_receiver.try_recv() {
                self.ui_state.push_log(line);
            }

            // The detail panel extrapolates on its own timer; the list board
            // only advances on the draw cadence below.
            while self.tick_receiver.try_recv().is_ok() {
                self.ui_state.advance_detail();
            }

            if last_draw.elapsed() >= Duration::from_millis(100) {
                self.ui_state.advance_board();
                self.terminal.draw(|frame| draw_ui(frame, &self.ui_state))?;
                last_draw = Instant::now();
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Tab => self.toggle_detail(),
                        KeyCode::Up => self.ui_state.select_previous(),
                        KeyCode::Down => self.ui_state.select_next(),
                        KeyCode::Char('c') => {
                            self.send(ClientCommand::Checkpoint {
                                owner: self.ui_state.owner.0,
                            });
                        }
                        KeyCode::Char('g') => {
                            let kind = self.ui_state.selected_kind();
                            self.send(ClientCommand::Grant {
                                owner: self.ui_state.owner.0,
                                kind,
                                amount: 1.0,
                            });
                        }
                        KeyCode::Char('b') => {
                            self.send(ClientCommand::Buff {
                                owner: self.ui_state.owner.0,
                                name: "inspector-boost".to_string(),
                                multiplier: 1.25,
                                cap_bonus: 0.0,
                                ttl_ms: MS_PER_DAY,
                            });
                        }
                        KeyCode::Char('k') => {
                            self.send(ClientCommand::AdvanceClock { ms: MS_PER_DAY });
                        }
                        _ => {}
                    }
                }
            }
        }

        self.terminal.show_cursor()?;
        crossterm::terminal::disable_raw_mode()?;
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    fn toggle_detail(&mut self) {
        if self.ui_state.detail_open() {
            self.ui_state.close_detail();
            trace!("detail.closed");
        } else {
            let ticker = TickerHandle::spawn(self.tick_sender.clone());
            self.ui_state.open_detail(ticker);
            trace!(kind = %self.ui_state.selected_kind(), "detail.opened");
        }
    }

    fn send(&self, command: ClientCommand) {
        if let Err(err) = self.command_sender.send(command) {
            error!("Command channel closed: {}", err);
        }
    }
}

pub fn channel() -> (UnboundedSender<FeedEvent>, UnboundedReceiver<FeedEvent>) {
    unbounded_channel()
}

#[derive(Debug, Clone)]
pub enum ClientCommand {
    Checkpoint {
        owner: u64,
    },
    Grant {
        owner: u64,
        kind: EssenceKind,
        amount: f32,
    },
    Buff {
        owner: u64,
        name: String,
        multiplier: f32,
        cap_bonus: f32,
        ttl_ms: u64,
    },
    AdvanceClock {
        ms: u64,
    },
}
