use crate::fuzz::stats::{Stats, StatsType};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use ratatui::buffer::Buffer;
use ratatui::layout::{Layout, Rect};
use ratatui::prelude::Constraint::Length;
use ratatui::prelude::Stylize;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Widget};
use ratatui::{DefaultTerminal, Frame, symbols};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tui_logger::{TuiLoggerLevelOutput, TuiLoggerWidget};

#[derive(Debug, Default)]
pub struct Ui {
    stats: Stats,
}

impl Ui {
    /// runs the application's main loop until the campaign ends
    pub(crate) fn run(&mut self, terminal: &mut DefaultTerminal, stats: &StatsType) {
        self.stats.running = true;
        while self.stats.running {
            if let Ok(stats) = stats.read() {
                self.stats.clone_from(&stats);
            }
            if terminal.draw(|frame| self.draw(frame)).is_err() {
                tracing::error!("Error showing ui");
                break;
            }
            sleep(Duration::from_millis(10));
        }
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }
}

fn format_instant(instant: Option<Instant>) -> String {
    if let Some(instant) = instant {
        format_duration(instant.elapsed())
    } else {
        "none yet".into()
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    format!("{days} days, {hours} hrs, {minutes} min, {seconds} secs")
}

fn format_number(num: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    if num >= 1_000_000 {
        format!("{:.1}M", num as f64 / 1_000_000.0)
    } else if num >= 1_000 {
        format!("{:.1}k", num as f64 / 1_000.0)
    } else {
        num.to_string()
    }
}

fn format_count(num: usize) -> String {
    format_number(u64::try_from(num).unwrap_or(u64::MAX))
}

fn format_text_row<'a>(rows: &[(&'static str, Span<'a>)]) -> Text<'a> {
    let max = rows.iter().map(|(title, _)| title.len()).max().unwrap_or_default();
    let result: Vec<Line> = rows
        .iter()
        .map(|(title, desc)| {
            Line::from(vec![
                format!("{}{title} : ", " ".repeat(max - title.len() + 1)).dark_gray(),
                desc.clone(),
            ])
        })
        .collect();
    Text::from(result)
}

impl Widget for &Ui {
    #[allow(clippy::too_many_lines)]
    fn render(self, area: Rect, buf: &mut Buffer) {
        let hor = Layout::horizontal([Length(90)]).split(area);
        let main_area = Layout::vertical([Length(3), Length(40)]).split(hor[0]);

        Paragraph::new(Text::from(vec![
            Line::from(""),
            Line::from(" upnpfuzz 0.1.0 ".bold().yellow() + self.stats.title.clone().green()),
        ]))
        .centered()
        .render(main_area[0], buf);

        let columns = Layout::vertical([Length(6), Length(5), Length(10)]).split(main_area[1]);
        let instructions = Line::from(vec!["  press q to stop  ".blue().bold()]).right_aligned();

        let row1 = Layout::horizontal([Length(60), Length(30)]).split(columns[0]);
        let row2 = Layout::horizontal([Length(35), Length(55)]).split(columns[1]);

        TuiLoggerWidget::default()
            .block(
                Block::new()
                    .borders(Borders::BOTTOM | Borders::LEFT | Borders::RIGHT)
                    .title_bottom(instructions),
            )
            .output_separator(' ')
            .output_timestamp(Some("%H:%M:%S".to_string()))
            .output_level(Some(TuiLoggerLevelOutput::Abbreviated))
            .output_target(false)
            .output_file(false)
            .output_line(false)
            .style_error(Style::default().fg(Color::Red))
            .style_warn(Style::default().fg(Color::Yellow))
            .render(columns[2], buf);

        {
            let text_rows = [
                ("run time", format_instant(self.stats.started).white()),
                ("last crash", format_instant(self.stats.last_crash).white()),
                ("phase", self.stats.phase.to_string().white()),
                ("last verdict", self.stats.verdict.clone().white()),
            ];
            let text = format_text_row(&text_rows);
            let border_set = symbols::border::Set {
                top_right: symbols::line::NORMAL.horizontal_down,
                ..symbols::border::PLAIN
            };

            Paragraph::new(text)
                .block(
                    Block::new()
                        .border_set(border_set)
                        .borders(Borders::TOP | Borders::RIGHT | Borders::LEFT)
                        .title(Line::from(" process timing ".to_string().cyan())),
                )
                .render(row1[0], buf);
        }

        {
            let text_rows = [
                ("strategy", self.stats.strategy.clone().white()),
                ("restarts", format_count(self.stats.total_restarts).white()),
                ("restart fails", format_count(self.stats.total_restart_failures).white()),
            ];
            let text = format_text_row(&text_rows);

            Paragraph::new(text)
                .block(
                    Block::new()
                        .borders(Borders::TOP | Borders::RIGHT)
                        .title(Line::from(" overall results ".to_string().cyan())),
                )
                .render(row1[1], buf);
        }

        {
            let execs = format_count(self.stats.executions_per_second.get()) + "/sec";
            let iterations = match self.stats.limit {
                Some(limit) => format!("{} / {}", format_number(self.stats.iterations), format_number(limit)),
                None => format_number(self.stats.iterations),
            };
            let text_rows = [("iterations", iterations.white()), ("exec speed", execs.white())];

            let border_set = symbols::border::Set {
                top_left: symbols::line::NORMAL.vertical_right,
                top_right: symbols::line::NORMAL.horizontal_down,
                bottom_left: symbols::line::NORMAL.vertical_right,
                bottom_right: symbols::line::NORMAL.horizontal_up,
                ..symbols::border::PLAIN
            };
            let block = Block::new()
                .border_set(border_set)
                .borders(Borders::TOP | Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
                .title_bottom(Line::from(" logs ".to_string().cyan()))
                .title(Line::from(" stage progress ".to_string().cyan()));
            let inner = block.inner(row2[0]);
            block.render(row2[0], buf);

            let parts = Layout::vertical([Length(2), Length(1)]).split(inner);
            Paragraph::new(format_text_row(&text_rows)).render(parts[0], buf);
            if let Some(progress) = self.stats.progress() {
                Gauge::default()
                    .gauge_style(Style::default().fg(Color::Green))
                    .ratio(progress)
                    .render(parts[1], buf);
            }
        }

        {
            let mut total_crashes = format_count(self.stats.total_crashes).white();
            if self.stats.total_crashes > 0 {
                total_crashes = format_count(self.stats.total_crashes).red();
            }

            let text_rows = [
                ("total crashes", total_crashes),
                ("total timeouts", format_count(self.stats.total_timeouts).white()),
                ("transport errors", format_count(self.stats.total_transport_errors).white()),
            ];
            let text = format_text_row(&text_rows);

            let border_set = symbols::border::Set {
                top_right: symbols::line::NORMAL.vertical_left,
                bottom_left: symbols::line::NORMAL.horizontal_up,
                bottom_right: symbols::line::NORMAL.vertical_left,
                ..symbols::border::PLAIN
            };

            Paragraph::new(text)
                .block(
                    Block::new()
                        .border_set(border_set)
                        .borders(Borders::TOP | Borders::RIGHT | Borders::BOTTOM)
                        .title(Line::from(" findings in depth ".to_string().cyan())),
                )
                .render(row2[1], buf);
        }
    }
}

/// Shows the dashboard until the campaign ends. `q` and Ctrl-C cancel the campaign.
pub fn show_ui(stats: &StatsType, cancel: &CancellationToken) {
    let mut terminal = ratatui::init();

    let stats_cloned = stats.clone();
    let cancel = cancel.clone();
    std::thread::spawn(move || -> std::io::Result<()> {
        loop {
            if stats_cloned.read().map(|stats| !stats.running).unwrap_or(true) {
                return Ok(());
            }
            if event::poll(Duration::from_millis(100))?
                && let Event::Key(key_event) = event::read()?
                && (key_event.code == KeyCode::Char('q')
                    || (key_event.code == KeyCode::Char('c')
                        && key_event.modifiers.contains(KeyModifiers::CONTROL)))
            {
                tracing::info!("Stopping the campaign after the current iteration");
                cancel.cancel();
            }
        }
    });
    Ui::default().run(&mut terminal, stats);
    ratatui::restore();
}
