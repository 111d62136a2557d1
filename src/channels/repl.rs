//! Interactive REPL channel with line editing and markdown rendering.
//!
//! The primary local interface. rustyline provides editing, history, and
//! slash-command tab completion; termimad renders replies. Input runs on a
//! dedicated thread because rustyline blocks; the async side owns the
//! agent and answers one turn at a time.

use std::borrow::Cow;

use rustyline::completion::Completer;
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Editor, Helper};
use termimad::MadSkin;
use tokio::sync::mpsc;

use crate::agent::Agent;
use crate::channels::{IncomingMessage, TurnReply};
use crate::error::ChannelError;

/// Slash commands available in the REPL.
const SLASH_COMMANDS: &[&str] = &["/help", "/address", "/attest", "/reset", "/quit", "/exit"];

const PROMPT: &str = "\x1b[1;36m\u{203A}\x1b[0m ";

/// Rustyline helper for slash-command tab completion.
struct ReplHelper;

impl Completer for ReplHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if !line.starts_with('/') {
            return Ok((0, vec![]));
        }

        let prefix = &line[..pos];
        let matches: Vec<String> = SLASH_COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| cmd.to_string())
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if !line.starts_with('/') || pos < line.len() {
            return None;
        }

        SLASH_COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && **cmd != line)
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for ReplHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{hint}\x1b[0m"))
    }
}

impl Validator for ReplHelper {}
impl Helper for ReplHelper {}

/// Build a termimad skin with our color scheme.
fn make_skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.set_headers_fg(termimad::crossterm::style::Color::Yellow);
    skin.bold.set_fg(termimad::crossterm::style::Color::White);
    skin.inline_code
        .set_fg(termimad::crossterm::style::Color::Green);
    skin.code_block
        .set_fg(termimad::crossterm::style::Color::Green);
    skin.code_block.left_margin = 2;
    skin
}

/// Get the history file path (~/.emberagent/history).
fn history_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".emberagent")
        .join("history")
}

/// Render one reply: a dim separator line, then the body through the skin.
fn render_reply(reply: &TurnReply) -> String {
    let width = crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(80);
    let skin = make_skin();
    let body = termimad::FmtText::from(&skin, &reply.text, Some(width));
    format!(
        "\x1b[90m{}\x1b[0m\n{}",
        "\u{2500}".repeat(width.min(80)),
        body
    )
}

/// REPL channel. One session, one turn at a time.
pub struct ReplChannel {
    /// Optional single message to send (for the -m flag).
    single_message: Option<String>,
}

impl ReplChannel {
    pub fn new() -> Self {
        Self {
            single_message: None,
        }
    }

    /// A REPL that sends one message, prints the reply, and exits.
    pub fn with_message(message: String) -> Self {
        Self {
            single_message: Some(message),
        }
    }

    /// Drive the agent until the user quits (`/quit` or Ctrl+D).
    pub async fn run(&self, agent: &Agent) -> Result<(), ChannelError> {
        if let Some(message) = &self.single_message {
            let reply = agent
                .handle_turn(&IncomingMessage::new("repl", "default", message))
                .await;
            println!("{}", reply.text);
            return Ok(());
        }

        let (line_tx, mut line_rx) = mpsc::channel::<String>(1);
        let (reply_tx, reply_rx) = mpsc::channel::<String>(1);

        let input = std::thread::spawn(move || input_loop(line_tx, reply_rx));

        while let Some(line) = line_rx.recv().await {
            let reply = agent
                .handle_turn(&IncomingMessage::new("repl", "default", &line))
                .await;
            if reply_tx.send(render_reply(&reply)).await.is_err() {
                break;
            }
        }

        let _ = input.join();
        Ok(())
    }
}

impl Default for ReplChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking rustyline loop. Each line goes to the agent task and the loop
/// waits for the rendered reply before prompting again, so output never
/// races the prompt.
fn input_loop(line_tx: mpsc::Sender<String>, mut reply_rx: mpsc::Receiver<String>) {
    let config = Config::builder()
        .history_ignore_dups(true)
        .expect("valid config")
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .build();

    let mut rl = match Editor::with_config(config) {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Failed to initialize line editor: {e}");
            return;
        }
    };
    rl.set_helper(Some(ReplHelper));

    let hist_path = history_path();
    if let Some(parent) = hist_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.load_history(&hist_path);

    println!("\x1b[1mEmberagent\x1b[0m  /help for commands, /quit to exit");
    println!();

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.to_lowercase().as_str() {
                    "/quit" | "/exit" => break,
                    _ => {}
                }

                if line_tx.blocking_send(line.to_string()).is_err() {
                    break;
                }
                match reply_rx.blocking_recv() {
                    Some(rendered) => println!("{rendered}"),
                    None => break,
                }
            }
            // Ctrl+C drops the current line; Ctrl+D exits.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyline::history::DefaultHistory;

    #[test]
    fn completes_slash_commands() {
        let history = DefaultHistory::new();
        let ctx = rustyline::Context::new(&history);
        let (start, matches) = ReplHelper.complete("/a", 2, &ctx).unwrap();

        assert_eq!(start, 0);
        assert!(matches.contains(&"/address".to_string()));
        assert!(matches.contains(&"/attest".to_string()));
        assert!(!matches.contains(&"/help".to_string()));
    }

    #[test]
    fn ignores_completion_for_plain_text() {
        let history = DefaultHistory::new();
        let ctx = rustyline::Context::new(&history);
        let (_, matches) = ReplHelper.complete("send 10 FLR", 11, &ctx).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn hints_the_remainder_of_a_command() {
        let history = DefaultHistory::new();
        let ctx = rustyline::Context::new(&history);

        assert_eq!(ReplHelper.hint("/add", 4, &ctx), Some("ress".to_string()));
        // No hint mid-line.
        assert_eq!(ReplHelper.hint("/add", 2, &ctx), None);
    }

    #[test]
    fn renders_reply_with_separator() {
        let rendered = render_reply(&TurnReply::text("hello"));
        assert!(rendered.contains("hello"));
        assert!(rendered.contains("\u{2500}"));
    }
}
