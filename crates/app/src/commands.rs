//! Slash commands typed into the terminal front-end.

use overlay_core::prompts::quick_prompt;
use overlay_core::ConversationLog;
use shared::agent_api::Role;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A plain chat message.
    Say(String),
    /// Pin (or unpin) the latest model reply.
    Pin,
    Pinned,
    /// Copy the latest completed reply to the clipboard.
    Copy,
    Clear,
    Save(Option<PathBuf>),
    Load(PathBuf),
    Autopilot(bool),
    Persona(String),
    Cancel,
    Hide,
    Show,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  /pin                 pin or unpin the latest reply
  /pinned              show pinned replies
  /copy                copy the latest reply
  /summarize [text]    quick prompt: Summarize
  /explain [text]      quick prompt: Explain Simply
  /actions [text]      quick prompt: Find Action Items
  /clear               clear the chat
  /save [path]         save the chat as JSON
  /load <path>         load a saved chat
  /autopilot on|off    toggle proactive observations
  /persona <name>      TARS, Cute Girl, S. Holmes, Jeeves
  /cancel              stop the current reply
  /hide, /show         hide or show replies
  /quit                exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let cmd = match name.to_ascii_lowercase().as_str() {
        "pin" => Command::Pin,
        "pinned" => Command::Pinned,
        "copy" => Command::Copy,
        "clear" => Command::Clear,
        "save" if arg.is_empty() => Command::Save(None),
        "save" => Command::Save(Some(PathBuf::from(arg))),
        "load" if arg.is_empty() => return Err("usage: /load <path>".into()),
        "load" => Command::Load(PathBuf::from(arg)),
        "autopilot" => match arg.to_ascii_lowercase().as_str() {
            "on" => Command::Autopilot(true),
            "off" => Command::Autopilot(false),
            _ => return Err("usage: /autopilot on|off".into()),
        },
        "persona" if arg.is_empty() => return Err("usage: /persona <name>".into()),
        "persona" => Command::Persona(arg.to_string()),
        "cancel" => Command::Cancel,
        "hide" => Command::Hide,
        "show" => Command::Show,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => match quick_prompt(other) {
            Some(prompt) if arg.is_empty() => Command::Say(prompt.to_string()),
            Some(prompt) => Command::Say(format!("{}: {}", prompt, arg)),
            None => return Err(format!("unknown command /{}; try /help", other)),
        },
    };
    Ok(Some(cmd))
}

/// Text of the latest settled model reply, unless it is empty or an error.
pub fn copyable_reply(log: &ConversationLog) -> Option<&str> {
    let text = log.last_of_role(Role::Model)?.text.as_str();
    if text.is_empty() || text.to_lowercase().starts_with("error") {
        return None;
    }
    Some(text)
}
