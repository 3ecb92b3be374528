mod commands;
mod terminal;

use anyhow::{Context, Result};
use commands::Command;
use overlay_core::{
    ActiveWindowContext, CommandCapture, ContextProvider, OverlayHost, PresentationSink,
    StaticContext, TICK_INTERVAL,
};
use providers::{GeminiClient, ScriptedTransport, Transport};
use shared::agent_api::Role;
use shared::settings::OverlaySettings;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use terminal::TerminalSink;
use zeroize::Zeroizing;

const API_KEY_ENV: &str = "GEMINI_API_KEY";

struct Args {
    demo: bool,
    capture: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        demo: false,
        capture: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--demo" => args.demo = true,
            "--capture" => {
                args.capture = Some(iter.next().context("--capture needs a command")?);
            }
            "-h" | "--help" => {
                println!("usage: overlay [--demo] [--capture \"<screenshot command>\"]");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }
    Ok(args)
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "Overlay Companion", "OverlayCompanion")
}

fn config_path() -> Option<PathBuf> {
    let proj = project_dirs()?;
    let _ = fs::create_dir_all(proj.config_dir());
    Some(proj.config_dir().join("settings.json"))
}

fn load_settings_or_default() -> OverlaySettings {
    if let Some(path) = config_path() {
        if path.exists() {
            match OverlaySettings::load(&path) {
                Ok(settings) => return settings,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring invalid settings"),
            }
        }
    }
    OverlaySettings::default()
}

fn save_settings(settings: &OverlaySettings) {
    if let Some(path) = config_path() {
        if let Err(e) = settings.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save settings");
        }
    }
}

fn default_chat_path() -> PathBuf {
    let name = format!("chat-{}.json", chrono::Local::now().format("%Y%m%d-%H%M%S"));
    match project_dirs() {
        Some(proj) => {
            let dir = proj.data_dir().join("chats");
            let _ = fs::create_dir_all(&dir);
            dir.join(name)
        }
        None => PathBuf::from(name),
    }
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
    clipboard.set_text(text).context("failed to copy")?;
    Ok(())
}

fn demo_transport() -> ScriptedTransport {
    ScriptedTransport::deltas([
        "Demo mode here. ",
        "Replies are scripted, ",
        "but they stream through the same relay ",
        "as a real model would.",
    ])
    .with_delay(Duration::from_millis(120))
}

/// Read stdin on its own thread so the tick loop never blocks.
fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

enum Flow {
    Continue,
    Quit,
}

fn handle_command<W: Write>(
    host: &mut OverlayHost,
    screen: &mut TerminalSink<W>,
    cmd: Command,
) -> Flow {
    let outcome = match cmd {
        Command::Say(text) => host.submit_user_turn(&text, None).map(|_| ()),
        Command::Pin => match host.log().last_of_role(Role::Model) {
            Some(turn) => {
                let (id, pinned) = (turn.id, !turn.pinned);
                host.set_pinned(id, pinned).map(|_| {
                    screen.notice(if pinned { "Pinned." } else { "Unpinned." });
                })
            }
            None => {
                screen.notice("Nothing to pin yet.");
                Ok(())
            }
        },
        Command::Pinned => {
            let view = host.log().pinned_view();
            if view.is_empty() {
                screen.notice("No pinned messages.");
            } else {
                screen.print_turns(view);
            }
            Ok(())
        }
        Command::Copy => {
            match commands::copyable_reply(host.log()) {
                Some(text) => match copy_to_clipboard(text) {
                    Ok(()) => screen.notice("Copied!"),
                    Err(e) => screen.notice(&format!("{:#}", e)),
                },
                None => screen.notice("No completed reply to copy."),
            }
            Ok(())
        }
        Command::Clear => host.clear_chat().map(|_| screen.notice("Chat cleared!")),
        Command::Save(path) => {
            let path = path.unwrap_or_else(default_chat_path);
            host.save_chat(&path)
                .map(|_| screen.notice(&format!("Saved to {}", path.display())))
        }
        Command::Load(path) => host.load_chat(&path).map(|_| {
            screen.notice(&format!("Loaded {}", path.display()));
            screen.print_turns(host.log().turns());
        }),
        Command::Autopilot(enabled) => host.set_autopilot_enabled(enabled).map(|_| {
            save_settings(host.settings());
            screen.notice(if enabled { "Autopilot on." } else { "Autopilot off." });
        }),
        Command::Persona(name) => host.set_persona(&name).map(|_| {
            save_settings(host.settings());
            screen.notice(&format!("Persona set to {}.", name));
        }),
        Command::Cancel => {
            if !host.cancel_stream() {
                screen.notice("Nothing to cancel.");
            }
            Ok(())
        }
        Command::Hide => {
            host.set_visible(false);
            screen.on_visibility_changed(false);
            Ok(())
        }
        Command::Show => {
            host.set_visible(true);
            screen.on_visibility_changed(true);
            Ok(())
        }
        Command::Help => {
            screen.notice(commands::HELP);
            Ok(())
        }
        Command::Quit => return Flow::Quit,
    };
    if let Err(e) = outcome {
        screen.notice(&e.to_string());
    }
    Flow::Continue
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = parse_args()?;
    let settings = load_settings_or_default();

    let transport: Arc<dyn Transport> = if args.demo {
        Arc::new(demo_transport())
    } else {
        Arc::new(GeminiClient::new())
    };
    let context: Box<dyn ContextProvider> = if args.demo {
        Box::new(StaticContext("App: Terminal, Title: overlay demo".into()))
    } else {
        Box::new(ActiveWindowContext)
    };
    let api_key = if args.demo {
        Zeroizing::new("demo".to_string())
    } else {
        let key = std::env::var(API_KEY_ENV).unwrap_or_default();
        if key.is_empty() {
            tracing::warn!("{} is not set; requests will fail", API_KEY_ENV);
        }
        Zeroizing::new(key)
    };

    let mut host = OverlayHost::new(settings, transport, api_key, context)?;
    if let Some(line) = args.capture.as_deref() {
        let capture = CommandCapture::from_command_line(line).context("empty --capture command")?;
        host = host.with_capture(Box::new(capture));
    }

    let lines = spawn_stdin_reader()?;
    let mut screen = terminal::stdout_sink();
    screen.notice("Overlay ready. Type a message or /help.");

    loop {
        match lines.try_recv() {
            Ok(line) => match commands::parse(&line) {
                Ok(Some(cmd)) => {
                    if let Flow::Quit = handle_command(&mut host, &mut screen, cmd) {
                        break;
                    }
                }
                Ok(None) => host.record_activity(),
                Err(usage) => screen.notice(&usage),
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                if !host.is_busy() {
                    break;
                }
            }
        }

        if let Err(e) = host.tick(&mut screen) {
            tracing::error!(error = %e, "tick failed");
        }
        thread::sleep(TICK_INTERVAL);
    }

    host.shutdown();
    Ok(())
}
