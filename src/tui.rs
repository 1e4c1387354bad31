//! Full-screen editor
//!
//! ```text
//! ┌ status: circuit | accept mode | pending | file ──────────────────────┐
//! │ buffer                         │ pending edits                       │
//! │                                ├─────────────────────────────────────┤
//! │                                │ transcript (tui-chat)               │
//! ├────────────────────────────────┴─────────────────────────────────────┤
//! │ prompt input                                                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-threaded: every tick polls the session, redraws, then waits briefly
//! for input. Backend calls never run on this thread.

use crate::session::{EditorSession, Speaker};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tui_chat::{ChatArea, ChatMessage, InputArea};

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Prompt,
    Buffer,
}

/// UI-only state; everything that matters lives in [`EditorSession`]
pub struct EditorTui {
    chat_area: ChatArea,
    input_area: InputArea,
    focus: Focus,
    shown: usize,
    should_quit: bool,
    chat_rect: Rect,
    started: Instant,
}

impl Default for EditorTui {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorTui {
    pub fn new() -> Self {
        Self {
            chat_area: ChatArea::new(),
            input_area: InputArea::new(),
            focus: Focus::Prompt,
            shown: 0,
            should_quit: false,
            chat_rect: Rect::default(),
            started: Instant::now(),
        }
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Copy transcript entries the chat widget has not seen yet
    pub fn sync_transcript(&mut self, session: &EditorSession) {
        for entry in &session.transcript()[self.shown..] {
            let sender = match &entry.speaker {
                Speaker::User => "You".to_string(),
                Speaker::Circuit(name) => format!("@{}", name),
                Speaker::System => "tunnelvision".to_string(),
            };
            self.chat_area.add_message(ChatMessage {
                sender,
                content: entry.text.clone(),
            });
        }
        self.shown = session.transcript().len();
    }

    /// Handle one key press
    pub fn on_key(&mut self, key: event::KeyEvent, session: &mut EditorSession) {
        if key.kind != event::KeyEventKind::Press {
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('c') if ctrl => {
                self.should_quit = true;
            }
            KeyCode::Esc => {
                session.cancel();
            }
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Prompt => Focus::Buffer,
                    Focus::Buffer => Focus::Prompt,
                };
            }
            KeyCode::Char('s') if ctrl => {
                if let Err(e) = session.save() {
                    tracing::warn!(error = %e, "save failed");
                    self.chat_area.add_message(ChatMessage {
                        sender: "Error".to_string(),
                        content: e.to_string(),
                    });
                }
            }
            KeyCode::Char('y') if ctrl => {
                session.accept_next();
            }
            KeyCode::Char('n') if ctrl => {
                session.reject_next();
            }
            KeyCode::Char('a') if ctrl => {
                session.accept_all();
            }
            KeyCode::Char('r') if ctrl => {
                session.reject_all();
            }
            KeyCode::Char('t') if ctrl => {
                let next = session.accept_mode().next();
                session.set_accept_mode(next);
            }
            KeyCode::PageUp => self.chat_area.scroll_up(5),
            KeyCode::PageDown => self.chat_area.scroll_down(5),
            _ => match self.focus {
                Focus::Prompt => self.on_prompt_key(key, session),
                Focus::Buffer => on_buffer_key(key, session),
            },
        }
    }

    fn on_prompt_key(&mut self, key: event::KeyEvent, session: &mut EditorSession) {
        match key.code {
            KeyCode::Enter => {
                if key.modifiers.contains(KeyModifiers::SHIFT) {
                    self.input_area.newline();
                } else {
                    let input = self.input_area.submit();
                    session.submit_prompt(&input);
                }
            }
            KeyCode::Char('j') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input_area.newline();
            }
            KeyCode::Char(c) => self.input_area.insert_char(c),
            KeyCode::Backspace => self.input_area.backspace(),
            KeyCode::Left => self.input_area.cursor_left(),
            KeyCode::Right => self.input_area.cursor_right(),
            KeyCode::Up => self.input_area.cursor_up(),
            KeyCode::Down => self.input_area.cursor_down(),
            _ => {}
        }
    }

    pub fn on_mouse(&mut self, mouse: event::MouseEvent) {
        use event::MouseEventKind;

        if mouse.column >= self.chat_rect.x
            && mouse.column < self.chat_rect.x + self.chat_rect.width
            && mouse.row >= self.chat_rect.y
            && mouse.row < self.chat_rect.y + self.chat_rect.height
        {
            match mouse.kind {
                MouseEventKind::ScrollUp => self.chat_area.scroll_up(3),
                MouseEventKind::ScrollDown => self.chat_area.scroll_down(3),
                _ => {}
            }
        }
    }

    pub fn render(&mut self, frame: &mut Frame, session: &EditorSession) {
        let size = frame.area();
        let input_height = self.input_area.calculate_display_lines(size.width);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(5),
                Constraint::Length(input_height),
            ])
            .split(size);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(rows[1]);

        let side = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(columns[1]);

        self.render_status_bar(frame, rows[0], session);
        self.render_buffer(frame, columns[0], session);
        render_pending(frame, side[0], session);

        self.chat_rect = side[1];
        self.chat_area.render(frame, side[1]);
        self.input_area.render(frame, rows[2]);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect, session: &EditorSession) {
        let file = session
            .buffer()
            .path()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "[scratch]".to_string());
        let dirty = if session.buffer().is_dirty() { " [+]" } else { "" };

        let mut spans = vec![
            Span::styled(
                " tunnelvision ",
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(
                format!("@{}", session.current_circuit()),
                Style::default().fg(Color::Yellow),
            ),
            Span::raw(" | "),
            Span::styled(
                format!("accept: {}", session.accept_mode()),
                Style::default().fg(Color::Gray),
            ),
            Span::raw(" | "),
            Span::styled(
                format!("pending: {}", session.edits().pending().len()),
                Style::default().fg(Color::Gray),
            ),
            Span::raw(" | "),
            Span::styled(format!("{}{}", file, dirty), Style::default().fg(Color::Gray)),
        ];

        if session.is_busy() {
            let dots = ".".repeat((self.started.elapsed().as_millis() / 500 % 4) as usize);
            spans.push(Span::raw(" | "));
            spans.push(Span::styled(
                format!("working{} (Esc cancels)", dots),
                Style::default().fg(Color::Magenta),
            ));
        }

        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            "Tab focus  ^Y/^N accept/reject  ^A/^R all  ^T mode  ^S save  ^Q quit",
            Style::default().fg(Color::DarkGray),
        ));

        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn render_buffer(&self, frame: &mut Frame, area: Rect, session: &EditorSession) {
        let buffer = session.buffer();
        let border = if self.focus == Focus::Buffer {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title(" buffer ");
        let inner = block.inner(area);

        let cursor = buffer.cursor();
        let height = inner.height.max(1) as usize;
        let top = cursor.row.saturating_sub(height - 1);

        let lines: Vec<Line> = buffer
            .lines()
            .iter()
            .skip(top)
            .take(height)
            .map(|l| Line::raw(l.as_str()))
            .collect();
        frame.render_widget(Paragraph::new(lines).block(block), area);

        if self.focus == Focus::Buffer {
            let x = inner.x + (cursor.col as u16).min(inner.width.saturating_sub(1));
            let y = inner.y + (cursor.row - top) as u16;
            frame.set_cursor_position((x, y));
        }
    }
}

fn on_buffer_key(key: event::KeyEvent, session: &mut EditorSession) {
    let buffer = session.buffer_mut();
    match key.code {
        KeyCode::Enter => buffer.insert_newline(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => buffer.insert_char(c),
        KeyCode::Backspace => buffer.backspace(),
        KeyCode::Left => buffer.move_left(),
        KeyCode::Right => buffer.move_right(),
        KeyCode::Up => buffer.move_up(),
        KeyCode::Down => buffer.move_down(),
        _ => {}
    }
}

fn render_pending(frame: &mut Frame, area: Rect, session: &EditorSession) {
    let items: Vec<ListItem> = session
        .edits()
        .pending()
        .iter()
        .enumerate()
        .map(|(i, edit)| {
            let preview = edit.response.lines().next().unwrap_or("");
            let style = if i == 0 {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", edit.query), style),
                Span::styled(format!("→ {}", preview), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let title = format!(" pending edits ({}) ", items.len());
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(list, area);
}

/// Run the editor until the user quits
pub fn run(session: &mut EditorSession) -> anyhow::Result<()> {
    let mut terminal = setup_terminal()?;
    let mut app = EditorTui::new();

    let result = event_loop(&mut terminal, &mut app, session);

    restore_terminal(&mut terminal)?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut EditorTui,
    session: &mut EditorSession,
) -> anyhow::Result<()> {
    while !app.should_quit() {
        session.poll();
        app.sync_transcript(session);

        terminal.draw(|frame| app.render(frame, session))?;

        if event::poll(TICK)? {
            match event::read()? {
                Event::Key(key) => {
                    app.on_key(key, session);
                    app.sync_transcript(session);
                }
                Event::Mouse(mouse) => app.on_mouse(mouse),
                _ => {}
            }
        }
    }

    session.cancel();
    Ok(())
}

/// Setup the terminal for TUI mode
pub fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore the terminal to normal mode
pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::buffer::Buffer;
    use crate::circuit::{CircuitRegistry, Router};
    use crate::edits::AcceptMode;
    use crate::tunnel::{EchoTunnel, TunnelRegistry};
    use crossterm::event::KeyEvent;
    use std::sync::Arc;

    fn session() -> EditorSession {
        let mut tunnels = TunnelRegistry::new();
        tunnels.register(Arc::new(EchoTunnel::new("echo")));
        let circuits = CircuitRegistry::with_builtins(Arc::new(tunnels));
        let bridge = Bridge::new(Arc::new(Router::new(Arc::new(circuits), "auto"))).unwrap();
        EditorSession::new(bridge, Buffer::new(), AcceptMode::Manual)
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_tab_moves_typing_into_buffer() {
        let mut session = session();
        let mut app = EditorTui::new();

        app.on_key(press(KeyCode::Tab), &mut session);
        assert_eq!(app.focus(), Focus::Buffer);
        for c in "hi".chars() {
            app.on_key(press(KeyCode::Char(c)), &mut session);
        }
        app.on_key(press(KeyCode::Enter), &mut session);
        assert_eq!(session.buffer().lines(), ["hi", ""]);
    }

    #[test]
    fn test_enter_submits_prompt() {
        let mut session = session();
        let mut app = EditorTui::new();

        app.on_key(press(KeyCode::Char('@')), &mut session);
        for c in "echo".chars() {
            app.on_key(press(KeyCode::Char(c)), &mut session);
        }
        app.on_key(press(KeyCode::Enter), &mut session);

        assert_eq!(session.current_circuit(), "echo");
        app.sync_transcript(&session);
        assert_eq!(app.shown, session.transcript().len());
    }

    #[test]
    fn test_ctrl_keys() {
        let mut session = session();
        let mut app = EditorTui::new();

        app.on_key(ctrl('t'), &mut session);
        assert_eq!(session.accept_mode(), AcceptMode::OnSave);

        assert!(!app.should_quit());
        app.on_key(ctrl('q'), &mut session);
        assert!(app.should_quit());
    }
}
