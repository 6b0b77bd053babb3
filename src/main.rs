use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use rag::{Answer, Config, IngestReport, Pipeline, QueryResponse, ScoredChunk, VectorBackend};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "hrqa=info,rag=info";

/// Question answering over a folder of HR documents.
#[derive(Parser, Debug)]
#[command(
    name = "hrqa",
    version,
    about,
    after_help = "VECTOR_BACKEND=memory keeps the index inside one process, so it only works \
                  from the interactive UI. `ingest` and `ask` need VECTOR_BACKEND=qdrant."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index from PATH (defaults to FILE_PATH)
    Ingest { path: Option<PathBuf> },
    /// Answer a question from the indexed documents
    Ask { question: String },
    /// Show index diagnostics
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.command.is_none())?;

    let cfg = Config::from_env().context("invalid configuration")?;
    if let Some(command) = &cli.command {
        check_backend(command, cfg.vector_backend)?;
    }
    // Blocking HTTP clients must not be created on the async runtime.
    let pipeline = tokio::task::spawn_blocking(move || Pipeline::from_config(cfg))
        .await?
        .context("failed to build pipeline")?;
    let pipeline = Arc::new(pipeline);

    match cli.command {
        Some(command) => run_command(pipeline, command).await,
        None => run_tui(pipeline).await,
    }
}

/// One-shot commands run in a fresh process, so an in-memory index would be
/// empty for `ask` and lost right after `ingest`.
fn check_backend(command: &Command, backend: VectorBackend) -> anyhow::Result<()> {
    let needs_persistence = matches!(command, Command::Ingest { .. } | Command::Ask { .. });
    if needs_persistence && backend == VectorBackend::Memory {
        anyhow::bail!(
            "VECTOR_BACKEND=memory does not persist between runs; \
             use the interactive UI (run `hrqa` without a subcommand) or VECTOR_BACKEND=qdrant"
        );
    }
    Ok(())
}

fn init_tracing(to_file: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if to_file {
        // The alternate screen owns stdout/stderr while the UI runs.
        let path = std::env::var("HRQA_LOG_FILE").unwrap_or_else(|_| "hrqa.log".to_string());
        let file =
            File::create(&path).with_context(|| format!("cannot open log file {}", path))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.with_writer(io::stderr).init();
    }
    Ok(())
}

async fn run_command(pipeline: Arc<Pipeline>, command: Command) -> anyhow::Result<()> {
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let json = match command {
            Command::Ingest { path } => {
                let report = pipeline.index_corpus(path.as_deref())?;
                serde_json::to_string_pretty(&report)?
            }
            Command::Ask { question } => {
                let answer = pipeline.answer_query(&question)?;
                serde_json::to_string_pretty(&QueryResponse::from(&answer))?
            }
            Command::Status => serde_json::to_string_pretty(&pipeline.status()?)?,
        };
        Ok(json)
    })
    .await?;
    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(err) => {
            tracing::error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}

async fn run_tui(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(pipeline);
    let res = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(res?)
}

struct App {
    input: String,
    cursor: usize,
    sources: Option<String>,
    answer: Option<String>,
    pipeline: Arc<Pipeline>,
    input_mode: InputMode,
    output_focus: OutputFocus,
    sources_pane: Pane,
    answer_pane: Pane,
    is_loading: bool,
    spinner_idx: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InputMode {
    Question,
    Ingest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFocus {
    Sources,
    Answer,
}

/// Scroll state for one output pane.
#[derive(Default)]
struct Pane {
    scroll: usize,
    content_len: usize,
    view_height: usize,
    auto_scroll: bool,
}

impl Pane {
    fn max_scroll(&self) -> usize {
        self.content_len.saturating_sub(self.view_height)
    }

    fn fit(&mut self, content_len: usize, view_height: usize) {
        self.content_len = content_len;
        self.view_height = view_height;
        if self.auto_scroll {
            self.scroll = 0;
            self.auto_scroll = false;
        } else {
            self.scroll = self.scroll.min(self.max_scroll());
        }
    }
}

enum Response {
    Answer(Result<Answer, String>),
    Ingest(Result<IngestReport, String>),
}

impl App {
    fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            input: String::new(),
            cursor: 0,
            sources: None,
            answer: None,
            pipeline,
            input_mode: InputMode::Question,
            output_focus: OutputFocus::Answer,
            sources_pane: Pane::default(),
            answer_pane: Pane::default(),
            is_loading: false,
            spinner_idx: 0,
        }
    }

    fn insert_char(&mut self, c: char) {
        self.input.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    fn delete_char(&mut self) {
        if let Some(prev) = self.input[..self.cursor].chars().next_back() {
            self.cursor -= prev.len_utf8();
            self.input.remove(self.cursor);
        }
    }

    fn move_left(&mut self) {
        if let Some(prev) = self.input[..self.cursor].chars().next_back() {
            self.cursor -= prev.len_utf8();
        }
    }

    fn move_right(&mut self) {
        if let Some(next) = self.input[self.cursor..].chars().next() {
            self.cursor += next.len_utf8();
        }
    }

    fn submit(&mut self, tx: mpsc::UnboundedSender<Response>) {
        if self.is_loading {
            return;
        }
        match self.input_mode {
            InputMode::Question => {
                if self.input.trim().is_empty() {
                    return;
                }
                let question = self.input.trim().to_string();
                self.start_loading();
                let pipeline = self.pipeline.clone();
                tokio::task::spawn_blocking(move || {
                    let result = pipeline
                        .answer_query(&question)
                        .map_err(|err| err.to_string());
                    let _ = tx.send(Response::Answer(result));
                });
            }
            InputMode::Ingest => {
                let path = Some(PathBuf::from(self.input.trim()))
                    .filter(|p| !p.as_os_str().is_empty());
                self.ingest(path, tx);
            }
        }
        self.input.clear();
        self.cursor = 0;
    }

    fn ingest(&mut self, path: Option<PathBuf>, tx: mpsc::UnboundedSender<Response>) {
        if self.is_loading {
            return;
        }
        let shown = path
            .clone()
            .unwrap_or_else(|| self.pipeline.config().source_path.clone());
        self.start_loading();
        self.sources = Some(format!("Ingesting {}...", shown.display()));
        self.answer = Some("Loading, chunking and embedding documents.".to_string());
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let result = pipeline
                .index_corpus(path.as_deref())
                .map_err(|err| err.to_string());
            let _ = tx.send(Response::Ingest(result));
        });
    }

    fn start_loading(&mut self) {
        self.is_loading = true;
        self.sources = None;
        self.answer = None;
        self.sources_pane.auto_scroll = true;
        self.answer_pane.auto_scroll = true;
    }

    fn finish(&mut self, response: Response) {
        self.is_loading = false;
        match response {
            Response::Answer(Ok(answer)) => {
                self.sources = Some(format_sources(&answer.sources));
                self.answer = Some(answer.markdown);
            }
            Response::Answer(Err(err)) => {
                tracing::error!("Query failed: {}", err);
                self.sources = Some(String::new());
                self.answer = Some(format!("Error: {}", err));
            }
            Response::Ingest(Ok(report)) => {
                tracing::info!(
                    "Ingested {} chunks from {}",
                    report.chunks_written,
                    report.source.display()
                );
                self.sources = Some(format_report(&report));
                self.answer = Some(if report.chunks_written == 0 {
                    "Nothing was indexed; the previous index contents are unchanged.".to_string()
                } else {
                    "Ingestion complete. Switch to Question mode to ask.".to_string()
                });
            }
            Response::Ingest(Err(err)) => {
                tracing::error!("Ingestion failed: {}", err);
                self.sources = Some("Ingestion failed.".to_string());
                self.answer = Some(format!("Error: {}", err));
            }
        }
        self.sources_pane.auto_scroll = true;
        self.answer_pane.auto_scroll = true;
    }

    fn focused(&mut self) -> &mut Pane {
        match self.output_focus {
            OutputFocus::Sources => &mut self.sources_pane,
            OutputFocus::Answer => &mut self.answer_pane,
        }
    }

    fn scroll_up(&mut self, by: usize) {
        let pane = self.focused();
        pane.scroll = pane.scroll.saturating_sub(by);
    }

    fn scroll_down(&mut self, by: usize) {
        let pane = self.focused();
        pane.scroll = (pane.scroll + by).min(pane.max_scroll());
    }

    fn scroll_to_start(&mut self) {
        self.focused().scroll = 0;
    }

    fn scroll_to_end(&mut self) {
        let pane = self.focused();
        pane.scroll = pane.max_scroll();
    }

    fn page(&mut self) -> usize {
        self.focused().view_height.max(1)
    }

    fn toggle_mode(&mut self) {
        self.input_mode = match self.input_mode {
            InputMode::Question => InputMode::Ingest,
            InputMode::Ingest => InputMode::Question,
        };
        self.input.clear();
        self.cursor = 0;
    }
}

fn format_sources(sources: &[ScoredChunk]) -> String {
    if sources.is_empty() {
        return "No matching passages were found in the index.".to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let page = hit
                .chunk
                .metadata
                .page
                .map(|p| format!(" p.{}", p))
                .unwrap_or_default();
            format!(
                "[{}] {}{} (score {:.3})\n{}",
                i + 1,
                hit.chunk.metadata.source,
                page,
                hit.score,
                rag::preview(&hit.chunk.text, rag::SOURCE_PREVIEW_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_report(report: &IngestReport) -> String {
    let mut text = format!(
        "Source: {}\nFiles seen: {}\nDocuments: {}\nChunks written: {}",
        report.source.display(),
        report.files_seen,
        report.documents,
        report.chunks_written
    );
    if !report.failed_files.is_empty() {
        text.push_str("\n\nSkipped files:");
        for failed in &report.failed_files {
            text.push_str(&format!("\n- {}: {}", failed.path.display(), failed.error));
        }
    }
    text
}

fn inner_width(area: Rect) -> usize {
    area.width.saturating_sub(2) as usize
}

fn inner_height(area: Rect) -> usize {
    area.height.saturating_sub(2) as usize
}

/// Visible slice of the input (in chars) and the cursor column within it.
fn input_view(input: &str, cursor: usize, max_width: usize) -> (String, usize) {
    if max_width == 0 {
        return (String::new(), 0);
    }
    let len = input.chars().count();
    let cursor = input[..cursor.min(input.len())].chars().count();
    if len <= max_width {
        return (input.to_string(), cursor);
    }
    let mut start = cursor.saturating_sub(max_width / 2);
    if start + max_width > len {
        start = len - max_width;
    }
    let view = input.chars().skip(start).take(max_width).collect();
    (view, (cursor - start).min(max_width))
}

fn line_count(text: &str) -> usize {
    text.lines().count().max(1)
}

fn pane_title(name: &str, focused: bool, spinner: Option<&str>) -> String {
    let mut title = name.to_string();
    if let Some(s) = spinner {
        title.push(' ');
        title.push_str(s);
    }
    if focused {
        title.push_str(" *");
    }
    title
}

fn render_pane(
    frame: &mut ratatui::Frame,
    area: Rect,
    title: String,
    text: String,
    pane: &mut Pane,
) {
    let title_style = Style::default().fg(Color::Black).add_modifier(Modifier::BOLD);
    let block = Block::bordered()
        .title(title)
        .title_style(title_style)
        .border_style(Style::default().fg(Color::Black));

    pane.fit(line_count(&text), inner_height(area));

    let paragraph = Paragraph::new(text)
        .style(Style::default().fg(Color::Blue))
        .scroll((pane.scroll as u16, 0))
        .wrap(Wrap { trim: true })
        .block(block);
    frame.render_widget(paragraph, area);

    let mut state = ScrollbarState::new(pane.content_len).position(pane.scroll);
    let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
        .track_style(Style::default().fg(Color::DarkGray))
        .thumb_style(Style::default().fg(Color::Blue));
    frame.render_stateful_widget(
        scrollbar,
        area.inner(Margin {
            vertical: 1,
            horizontal: 0,
        }),
        &mut state,
    );
}

fn draw_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let spinner = ["|", "/", "-", "\\"];

    terminal.draw(|frame| {
        let title_style = Style::default().fg(Color::Black).add_modifier(Modifier::BOLD);
        let muted = Style::default().fg(Color::DarkGray);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(8),
                Constraint::Length(3),
                Constraint::Length(3),
            ])
            .split(frame.area());
        let output_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[0]);

        let sources_text = app.sources.clone().unwrap_or_else(|| {
            "Retrieved passages will appear here after you ask a question.".to_string()
        });
        let answer_text = if app.is_loading {
            "Working...".to_string()
        } else {
            app.answer.clone().unwrap_or_else(|| match app.input_mode {
                InputMode::Question => "Type a question below and press Enter.".to_string(),
                InputMode::Ingest => format!(
                    "Type a file or folder path and press Enter (empty uses {}).",
                    app.pipeline.config().source_path.display()
                ),
            })
        };
        let spin = app.is_loading.then(|| spinner[app.spinner_idx]);

        let sources_title =
            pane_title("Sources", app.output_focus == OutputFocus::Sources, None);
        render_pane(
            frame,
            output_chunks[0],
            sources_title,
            sources_text,
            &mut app.sources_pane,
        );
        let answer_title = pane_title("Answer", app.output_focus == OutputFocus::Answer, spin);
        render_pane(
            frame,
            output_chunks[1],
            answer_title,
            answer_text,
            &mut app.answer_pane,
        );

        let input_title = match app.input_mode {
            InputMode::Question => "Question  [Ctrl+R: Ingest]",
            InputMode::Ingest => "Ingest path",
        };
        let input_block = Block::bordered()
            .title(input_title)
            .title_style(title_style)
            .border_style(muted);
        let (view, cursor_x) = input_view(&app.input, app.cursor, inner_width(chunks[1]));
        let input = Paragraph::new(view)
            .style(muted)
            .block(input_block)
            .wrap(Wrap { trim: false });
        frame.render_widget(input, chunks[1]);
        frame.set_cursor_position((chunks[1].x + 1 + cursor_x as u16, chunks[1].y + 1));

        let help_block = Block::bordered()
            .title("Controls")
            .title_style(title_style)
            .border_style(muted);
        let help_text = match app.input_mode {
            InputMode::Question => concat!(
                "Enter: Ask | F2/Ctrl+R: Ingest | Tab: Mode | Ctrl+O: Focus | ",
                "Up/Down/PgUp/PgDn/Home/End: Scroll | Esc/Ctrl+C: Quit"
            ),
            InputMode::Ingest => concat!(
                "Enter: Ingest path | F2/Ctrl+R: Ingest default | Tab: Mode | Ctrl+O: Focus | ",
                "Up/Down/PgUp/PgDn/Home/End: Scroll | Esc/Ctrl+C: Quit"
            ),
        };
        let help = Paragraph::new(help_text)
            .style(muted)
            .wrap(Wrap { trim: true })
            .block(help_block);
        frame.render_widget(help, chunks[2]);
    })?;

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let mut events = EventStream::new();
    let mut spinner_tick = tokio::time::interval(Duration::from_millis(100));
    spinner_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    draw_ui(terminal, app)?;

    loop {
        tokio::select! {
            _ = spinner_tick.tick() => {
                if app.is_loading {
                    app.spinner_idx = (app.spinner_idx + 1) % 4;
                    draw_ui(terminal, app)?;
                }
            }
            Some(response) = rx.recv() => {
                app.finish(response);
                draw_ui(terminal, app)?;
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
                        match key.code {
                            KeyCode::Char('c') if ctrl => return Ok(()),
                            KeyCode::Char('r') if ctrl => app.ingest(None, tx.clone()),
                            KeyCode::F(2) => app.ingest(None, tx.clone()),
                            KeyCode::Esc => return Ok(()),
                            KeyCode::Enter => app.submit(tx.clone()),
                            KeyCode::Up => app.scroll_up(1),
                            KeyCode::Down => app.scroll_down(1),
                            KeyCode::PageUp => {
                                let by = app.page();
                                app.scroll_up(by);
                            }
                            KeyCode::PageDown => {
                                let by = app.page();
                                app.scroll_down(by);
                            }
                            KeyCode::Home => app.scroll_to_start(),
                            KeyCode::End => app.scroll_to_end(),
                            KeyCode::Char('o') if ctrl => {
                                app.output_focus = match app.output_focus {
                                    OutputFocus::Sources => OutputFocus::Answer,
                                    OutputFocus::Answer => OutputFocus::Sources,
                                };
                            }
                            KeyCode::Tab => app.toggle_mode(),
                            KeyCode::Left => app.move_left(),
                            KeyCode::Right => app.move_right(),
                            KeyCode::Backspace => app.delete_char(),
                            KeyCode::Char(ch) => app.insert_char(ch),
                            _ => {}
                        }
                        draw_ui(terminal, app)?;
                    }
                    Some(Ok(Event::Resize(_, _))) => draw_ui(terminal, app)?,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => {}
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag::ProviderKind;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn offline_pipeline() -> Arc<Pipeline> {
        let cfg = Config {
            embed_provider: ProviderKind::Ollama,
            llm_provider: ProviderKind::Ollama,
            embedding_dimension: 768,
            vector_backend: VectorBackend::Memory,
            ..Config::default()
        };
        Arc::new(Pipeline::from_config(cfg).unwrap())
    }

    #[test]
    fn input_view_keeps_cursor_visible() {
        assert_eq!(input_view("hello", 5, 10), ("hello".to_string(), 5));
        let (view, x) = input_view("abcdefghij", 10, 4);
        assert_eq!(view, "ghij");
        assert_eq!(x, 4);
        let (view, x) = input_view("ééééé", "éé".len(), 2);
        assert_eq!(view, "éé");
        assert_eq!(x, 1);
    }

    #[test]
    fn pane_clamps_scroll_to_content() {
        let mut pane = Pane {
            scroll: 50,
            ..Pane::default()
        };
        pane.fit(10, 4);
        assert_eq!(pane.scroll, 6);
        pane.auto_scroll = true;
        pane.fit(10, 4);
        assert_eq!(pane.scroll, 0);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["hrqa", "ask", "Who knows Python?"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Ask { question }) if question == "Who knows Python?"
        ));
        let cli = Cli::try_parse_from(["hrqa", "ingest"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Ingest { path: None })));
        assert!(Cli::try_parse_from(["hrqa"]).unwrap().command.is_none());
    }

    #[test]
    fn memory_backend_is_interactive_only() {
        let ask = Command::Ask {
            question: "Who knows Python?".to_string(),
        };
        let ingest = Command::Ingest { path: None };

        let err = check_backend(&ask, VectorBackend::Memory).unwrap_err();
        assert!(err.to_string().contains("VECTOR_BACKEND=memory"));
        assert!(check_backend(&ingest, VectorBackend::Memory).is_err());
        assert!(check_backend(&Command::Status, VectorBackend::Memory).is_ok());
        assert!(check_backend(&ask, VectorBackend::Qdrant).is_ok());
        assert!(check_backend(&ingest, VectorBackend::Qdrant).is_ok());
    }

    #[test]
    fn failed_responses_are_logged_as_errors() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let mut app = App::new(offline_pipeline());
        tracing::subscriber::with_default(subscriber, || {
            app.finish(Response::Answer(Err("model timed out".to_string())));
            app.finish(Response::Ingest(Err("no documents could be loaded".to_string())));
        });

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("ERROR"), "{text}");
        assert!(text.contains("Query failed: model timed out"), "{text}");
        assert!(text.contains("Ingestion failed: no documents could be loaded"), "{text}");
        assert_eq!(app.answer.as_deref(), Some("Error: no documents could be loaded"));
        assert!(!app.is_loading);
    }

    #[test]
    fn help_explains_memory_backend_limits() {
        use clap::CommandFactory;

        let help = Cli::command().render_help().to_string();
        assert!(help.contains("VECTOR_BACKEND=memory"));
    }
}
