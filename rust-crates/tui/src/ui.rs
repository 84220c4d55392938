use crate::client::{
    AppSnapshot,
    HistoryCard,
    Phase,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{prelude::*, widgets::*};
use roller::{HISTORY_CAPACITY, ImageState};
use std::io::stdout;
use tokio::sync::mpsc;

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Roll,
    /// 0-based history slot
    Reroll(usize),
    RetryInit,
    Redraw,
}

#[derive(Default)]
pub struct UiState {
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Reads terminal events on a dedicated thread so the async loop never blocks
/// on stdin.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    match input_events.recv().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn interpret_event(event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key_to_event(key),
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

fn key_to_event(key: KeyEvent) -> Option<UserEvent> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(UserEvent::Quit)
        }
        KeyCode::Char('q') | KeyCode::Esc => Some(UserEvent::Quit),
        KeyCode::Char('r') | KeyCode::Enter => Some(UserEvent::Roll),
        KeyCode::Char('i') => Some(UserEvent::RetryInit),
        KeyCode::Char(c) => match c.to_digit(10) {
            Some(n) if (1..=HISTORY_CAPACITY).contains(&(n as usize)) => {
                Some(UserEvent::Reroll(n as usize - 1))
            }
            _ => None,
        },
        _ => None,
    }
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

fn ui(f: &mut Frame, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // header
            Constraint::Length(7), // history cards
            Constraint::Min(4),    // peers
            Constraint::Length(10), // status/errors + help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_history(f, chunks[1], snap);
    draw_peers(f, chunks[2], snap);
    draw_bottom(f, chunks[3], snap);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let catalog = match &snap.phase {
        Phase::Loading => String::from("Catalog: loading"),
        Phase::Failed(_) => String::from("Catalog: unavailable"),
        Phase::Ready {
            version,
            roster_len,
        } => format!("Catalog: {version} ({roster_len} champions)"),
    };
    let preload = if snap.preload_target == 0 {
        String::from("Preload: off")
    } else {
        format!("Preload: {}/{}", snap.preloaded, snap.preload_target)
    };
    let lines = vec![
        Line::from(format!(
            "{catalog} | Randomness: {} | {preload}",
            snap.randomness
        )),
        Line::from(if snap.is_busy() { "Working..." } else { "Idle" })
            .style(Style::default().fg(Color::DarkGray)),
    ];
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Champion Roll"));
    f.render_widget(widget, area);
}

fn draw_history(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, HISTORY_CAPACITY as u32); HISTORY_CAPACITY])
        .split(area);
    for (index, rect) in columns.iter().enumerate() {
        let slot = index + 1;
        let (lines, border) = match snap.history.get(index) {
            Some(card) => (card_lines(card), card_border(card, index == 0)),
            None => (
                vec![Line::styled("empty", Style::default().fg(Color::DarkGray))],
                Style::default().fg(Color::DarkGray),
            ),
        };
        let title = if index == 0 {
            format!("{slot} Latest")
        } else {
            slot.to_string()
        };
        let widget = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(title),
        );
        f.render_widget(widget, *rect);
    }
}

fn card_lines(card: &HistoryCard) -> Vec<Line<'static>> {
    vec![
        Line::styled(
            card.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        image_line(card),
    ]
}

fn image_line(card: &HistoryCard) -> Line<'static> {
    match card.image {
        ImageState::Ready => {
            Line::styled(card.image_url.clone(), Style::default().fg(Color::Green))
        }
        ImageState::Pending => {
            Line::styled("loading image...", Style::default().fg(Color::DarkGray))
        }
        ImageState::Failed => {
            Line::styled("image unavailable", Style::default().fg(Color::Red))
        }
    }
}

fn card_border(card: &HistoryCard, latest: bool) -> Style {
    match card.image {
        ImageState::Failed => Style::default().fg(Color::Red),
        _ if latest => Style::default().fg(Color::Yellow),
        _ => Style::default(),
    }
}

fn draw_peers(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines = Vec::new();
    if !snap.peer_sync {
        lines.push(Line::styled(
            "Peer sync off",
            Style::default().fg(Color::DarkGray),
        ));
    } else if snap.peers.is_empty() {
        lines.push(Line::styled(
            "No peers connected",
            Style::default().fg(Color::DarkGray),
        ));
    } else {
        for peer in &snap.peers {
            let picks = if peer.entries.is_empty() {
                String::from("no picks yet")
            } else {
                peer.entries.join(", ")
            };
            lines.push(Line::from(format!("{}: {picks}", peer.label())));
        }
    }
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Peers"));
    f.render_widget(widget, area);
}

fn draw_bottom(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    let status_widget = if snap.errors.is_empty() {
        Paragraph::new(Line::from(snap.status.clone()))
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let mut lines = vec![Line::from(snap.status.clone())];
        for e in &snap.errors {
            lines.push(Line::styled(e.clone(), Style::default().fg(Color::Red)));
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status / Errors"))
    };
    f.render_widget(status_widget, chunks[0]);

    let help = Paragraph::new(help_text(snap))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, chunks[1]);
}

fn help_text(snap: &AppSnapshot) -> &'static str {
    match snap.phase {
        Phase::Failed(_) => "i retry | q/Esc quit",
        _ => "r/Enter roll | 1/2/3 reroll slot | q/Esc quit",
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn interpret_event__maps_roll_and_quit_keys() {
        assert_eq!(interpret_event(press(KeyCode::Char('r'))), Some(UserEvent::Roll));
        assert_eq!(interpret_event(press(KeyCode::Enter)), Some(UserEvent::Roll));
        assert_eq!(interpret_event(press(KeyCode::Char('q'))), Some(UserEvent::Quit));
        assert_eq!(interpret_event(press(KeyCode::Esc)), Some(UserEvent::Quit));
        assert_eq!(
            interpret_event(press(KeyCode::Char('i'))),
            Some(UserEvent::RetryInit)
        );
    }

    #[test]
    fn interpret_event__maps_digits_to_zero_based_slots() {
        assert_eq!(
            interpret_event(press(KeyCode::Char('1'))),
            Some(UserEvent::Reroll(0))
        );
        assert_eq!(
            interpret_event(press(KeyCode::Char('3'))),
            Some(UserEvent::Reroll(2))
        );
        assert_eq!(interpret_event(press(KeyCode::Char('0'))), None);
        assert_eq!(interpret_event(press(KeyCode::Char('4'))), None);
    }

    #[test]
    fn interpret_event__ctrl_c_quits() {
        // given
        let event = Event::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));

        // then
        assert_eq!(interpret_event(event), Some(UserEvent::Quit));
        assert_eq!(interpret_event(press(KeyCode::Char('c'))), None);
    }

    #[test]
    fn interpret_event__ignores_key_release() {
        // given
        let mut key = KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;

        // then
        assert_eq!(interpret_event(Event::Key(key)), None);
        assert_eq!(interpret_event(Event::Resize(80, 24)), Some(UserEvent::Redraw));
    }

    #[test]
    fn image_line__shows_placeholder_until_ready() {
        // given
        let mut card = HistoryCard {
            slot: 1,
            name: String::from("Ahri"),
            image_url: String::from("https://ddragon.example/Ahri.png"),
            image: ImageState::Pending,
        };

        // then
        assert_eq!(image_line(&card).to_string(), "loading image...");
        card.image = ImageState::Ready;
        assert_eq!(image_line(&card).to_string(), "https://ddragon.example/Ahri.png");
        card.image = ImageState::Failed;
        assert_eq!(image_line(&card).to_string(), "image unavailable");
    }
}
