//! What the user is looking at, as far as we can tell.
//!
//! Both are best effort. Context lookups never fail; captures may,
//! and a failed capture only means the request goes out without an image.

use anyhow::{bail, Context as _, Result};
use shared::agent_api::Attachment;
use std::process::Command;

/// Context string used when nothing could be detected.
pub const NO_CONTEXT: &str = "No context detected.";

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

pub trait ContextProvider: Send {
    fn active_context(&self) -> String;
}

pub trait CaptureProvider: Send {
    fn capture(&self) -> Result<Attachment>;
}

/// A fixed context string. Used by tests and the offline demo.
#[derive(Debug, Clone)]
pub struct StaticContext(pub String);

impl ContextProvider for StaticContext {
    fn active_context(&self) -> String {
        if self.0.trim().is_empty() {
            NO_CONTEXT.to_string()
        } else {
            self.0.clone()
        }
    }
}

/// Reads the focused window's title through the platform's command line tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveWindowContext;

impl ContextProvider for ActiveWindowContext {
    fn active_context(&self) -> String {
        match active_window_title() {
            Some(title) => format!("Title: {}", title),
            None => NO_CONTEXT.to_string(),
        }
    }
}

fn run_for_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(target_os = "macos")]
fn active_window_title() -> Option<String> {
    run_for_stdout(
        "osascript",
        &[
            "-e",
            "tell application \"System Events\" to get name of first application process whose frontmost is true",
        ],
    )
}

#[cfg(target_os = "linux")]
fn active_window_title() -> Option<String> {
    run_for_stdout("xdotool", &["getactivewindow", "getwindowname"])
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn active_window_title() -> Option<String> {
    None
}

/// Runs an external screenshot tool that writes a PNG to stdout,
/// e.g. `grim -` on Wayland or `import -window root png:-` on X11.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
}

impl CommandCapture {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace-separated command line such as `"grim -"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }
}

impl CaptureProvider for CommandCapture {
    fn capture(&self) -> Result<Attachment> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("failed to run {}", self.program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !output.stdout.starts_with(PNG_MAGIC) {
            bail!("{} did not produce a PNG image", self.program);
        }
        Ok(Attachment::png("screenshot.png", output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_context_falls_back_when_blank() {
        assert_eq!(StaticContext("  ".into()).active_context(), NO_CONTEXT);
        assert_eq!(
            StaticContext("App: Code".into()).active_context(),
            "App: Code"
        );
    }

    #[test]
    fn test_active_window_never_empty() {
        assert!(!ActiveWindowContext.active_context().is_empty());
    }

    #[test]
    fn test_command_line_parsing() {
        let capture = CommandCapture::from_command_line("import -window root png:-").unwrap();
        assert_eq!(capture.program, "import");
        assert_eq!(capture.args, vec!["-window", "root", "png:-"]);
        assert!(CommandCapture::from_command_line("   ").is_none());
    }

    #[test]
    fn test_missing_capture_tool_is_an_error() {
        let capture = CommandCapture::new("definitely-not-a-screenshot-tool", Vec::<String>::new());
        assert!(capture.capture().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_png_output_is_rejected() {
        let capture = CommandCapture::new("echo", ["hello"]);
        let err = capture.capture().unwrap_err();
        assert!(err.to_string().contains("did not produce a PNG"));
    }
}
