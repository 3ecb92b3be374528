pub mod error;

pub use error::{OverlayError, OverlayResult};

pub mod settings {
    use crate::error::{OverlayError, OverlayResult};
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
    pub const DEFAULT_AUTOPILOT_INTERVALS: [u64; 5] = [120, 100, 160, 200, 300];
    /// Seconds since the last interaction inside which an autopilot fire is
    /// downgraded to a timer reset.
    pub const DEFAULT_COOLDOWN_SECS: u64 = 50;

    pub const PERSONA_PRESETS: &[(&str, &str)] = &[
        (
            "TARS",
            "You are TARS from the movie Interstellar. You are a former U.S. Marine Corps tactical robot. Your personality is witty, sarcastic, and humorous. You were programmed this way to be a better companion. Keep your answers brief, well-formatted, and to the point. Use Markdown for clarity.",
        ),
        (
            "Cute Girl",
            "You are a cute anime girl, you talk in cute style. Don't break character!",
        ),
        (
            "S. Holmes",
            "You are the detective Sherlock Holmes. Address the user formally. Your responses must be based on pure logic, deduction, and keen observation. Don't break character",
        ),
        (
            "Jeeves",
            "You are Jeeves, the consummate valet. You are discreet, impeccably polite, and hyper-competent. You address the user as 'sir' or 'madam' and your goal is to provide solutions with quiet, dignified efficiency. Your language is formal and precise. Don't break character.",
        ),
    ];

    /// Look up a persona preset by name (case-insensitive).
    pub fn persona_preset(name: &str) -> Option<&'static str> {
        PERSONA_PRESETS
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()))
            .map(|(_, text)| *text)
    }

    fn default_model() -> String {
        DEFAULT_MODEL.to_string()
    }

    fn default_persona() -> String {
        PERSONA_PRESETS[0].1.to_string()
    }

    fn default_intervals() -> Vec<u64> {
        DEFAULT_AUTOPILOT_INTERVALS.to_vec()
    }

    fn default_cooldown() -> u64 {
        DEFAULT_COOLDOWN_SECS
    }

    fn default_true() -> bool {
        true
    }

    /// The persisted settings document.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OverlaySettings {
        #[serde(default = "default_model")]
        pub model: String,
        #[serde(default = "default_persona")]
        pub persona: String,
        #[serde(default = "default_true")]
        pub autopilot_enabled: bool,
        /// Escalating idle waits, in seconds.
        #[serde(default = "default_intervals")]
        pub autopilot_intervals: Vec<u64>,
        #[serde(default = "default_cooldown")]
        pub cooldown_secs: u64,
        #[serde(default = "default_true")]
        pub share_context: bool,
    }

    impl Default for OverlaySettings {
        fn default() -> Self {
            Self {
                model: default_model(),
                persona: default_persona(),
                autopilot_enabled: true,
                autopilot_intervals: default_intervals(),
                cooldown_secs: DEFAULT_COOLDOWN_SECS,
                share_context: true,
            }
        }
    }

    impl OverlaySettings {
        pub fn validate(&self) -> OverlayResult<()> {
            if self.model.trim().is_empty() {
                return Err(OverlayError::Config("model identifier is empty".into()));
            }
            if self.autopilot_intervals.is_empty() {
                return Err(OverlayError::Config(
                    "autopilot interval list must not be empty".into(),
                ));
            }
            if let Some(bad) = self.autopilot_intervals.iter().position(|&s| s == 0) {
                return Err(OverlayError::Config(format!(
                    "autopilot interval #{} must be a positive number of seconds",
                    bad + 1
                )));
            }
            if self.cooldown_secs == 0 {
                return Err(OverlayError::Config(
                    "cooldown must be a positive number of seconds".into(),
                ));
            }
            Ok(())
        }

        pub fn autopilot_durations(&self) -> OverlayResult<Vec<Duration>> {
            self.validate()?;
            Ok(self
                .autopilot_intervals
                .iter()
                .map(|&s| Duration::from_secs(s))
                .collect())
        }

        pub fn cooldown(&self) -> Duration {
            Duration::from_secs(self.cooldown_secs)
        }

        /// Read and validate a settings document.
        pub fn load(path: &Path) -> OverlayResult<Self> {
            let bytes = fs::read(path)?;
            let settings: Self = serde_json::from_slice(&bytes)?;
            settings.validate()?;
            Ok(settings)
        }

        pub fn save(&self, path: &Path) -> OverlayResult<()> {
            self.validate()?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_vec_pretty(self)?)?;
            Ok(())
        }
    }
}

pub mod agent_api {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    pub type TurnId = Uuid;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Model,
        System,
    }

    impl Role {
        pub fn as_str(&self) -> &'static str {
            match self {
                Role::User => "user",
                Role::Model => "model",
                Role::System => "system",
            }
        }
    }

    /// Binary payload attached to a turn (e.g. a screenshot).
    ///
    /// Payload bytes are not persisted when a conversation is saved; only
    /// the label and MIME type survive a round trip.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Attachment {
        pub label: String,
        pub mime_type: String,
        #[serde(skip)]
        pub data: Vec<u8>,
    }

    impl Attachment {
        pub fn png(label: impl Into<String>, data: Vec<u8>) -> Self {
            Self {
                label: label.into(),
                mime_type: "image/png".to_string(),
                data,
            }
        }
    }

    /// One message unit in the conversation.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Turn {
        pub id: TurnId,
        pub role: Role,
        pub text: String,
        #[serde(default)]
        pub pinned: bool,
        /// Synthetic user-role prompt injected by the autopilot.
        #[serde(default)]
        pub observation: bool,
        #[serde(default)]
        pub attachments: Vec<Attachment>,
        pub timestamp: DateTime<Utc>,
    }

    impl Turn {
        fn new(role: Role, text: impl Into<String>) -> Self {
            Self {
                id: Uuid::new_v4(),
                role,
                text: text.into(),
                pinned: false,
                observation: false,
                attachments: Vec::new(),
                timestamp: Utc::now(),
            }
        }

        pub fn user(text: impl Into<String>) -> Self {
            Self::new(Role::User, text)
        }

        pub fn observation(text: impl Into<String>) -> Self {
            let mut turn = Self::new(Role::User, text);
            turn.observation = true;
            turn
        }

        pub fn model(text: impl Into<String>) -> Self {
            Self::new(Role::Model, text)
        }

        pub fn system(text: impl Into<String>) -> Self {
            Self::new(Role::System, text)
        }

        pub fn with_attachment(mut self, attachment: Attachment) -> Self {
            self.attachments.push(attachment);
            self
        }

        /// User-authored or autopilot-injected prompt that a model turn may answer.
        pub fn is_prompt(&self) -> bool {
            self.role == Role::User
        }
    }

    /// One unit pushed from a stream worker to the relay.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StreamChunk {
        Text(String),
        /// Terminal: the stream failed. The text is user-presentable.
        Error(String),
        /// Terminal: the remote stream closed normally.
        Done { stop_reason: Option<String> },
    }

    impl StreamChunk {
        pub fn is_terminal(&self) -> bool {
            !matches!(self, StreamChunk::Text(_))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::agent_api::*;
    use super::settings::*;
    use super::OverlayError;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = OverlaySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.autopilot_durations().unwrap().len(), 5);
        assert_eq!(settings.cooldown().as_secs(), 50);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let settings: OverlaySettings =
            serde_json::from_str(r#"{"model": "gemini-2.0-pro"}"#).unwrap();
        assert_eq!(settings.model, "gemini-2.0-pro");
        assert_eq!(settings.autopilot_intervals, DEFAULT_AUTOPILOT_INTERVALS.to_vec());
        assert!(settings.share_context);
    }

    #[test]
    fn test_zero_interval_is_config_error() {
        let settings = OverlaySettings {
            autopilot_intervals: vec![10, 0, 30],
            ..Default::default()
        };
        let err = settings.autopilot_durations().unwrap_err();
        assert!(matches!(err, OverlayError::Config(_)));
        assert!(err.to_string().contains("#2"));
    }

    #[test]
    fn test_empty_intervals_rejected() {
        let settings = OverlaySettings {
            autopilot_intervals: vec![],
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(OverlayError::Config(_))));
    }

    #[test]
    fn test_save_and_load_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = OverlaySettings {
            persona: "Be terse.".into(),
            autopilot_intervals: vec![5, 10],
            cooldown_secs: 3,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(OverlaySettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_load_rejects_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"cooldown_secs": 0}"#).unwrap();
        assert!(matches!(
            OverlaySettings::load(&path),
            Err(OverlayError::Config(_))
        ));
    }

    #[test]
    fn test_persona_preset_lookup() {
        assert!(persona_preset("jeeves").unwrap().starts_with("You are Jeeves"));
        assert!(persona_preset("HAL").is_none());
    }

    #[test]
    fn test_turn_serde_skips_attachment_bytes() {
        let turn = Turn::user("look").with_attachment(Attachment::png("shot", vec![1, 2, 3]));
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attachments[0].mime_type, "image/png");
        assert!(back.attachments[0].data.is_empty());
    }

    #[test]
    fn test_stream_chunk_terminal() {
        assert!(!StreamChunk::Text("x".into()).is_terminal());
        assert!(StreamChunk::Error("boom".into()).is_terminal());
        assert!(StreamChunk::Done { stop_reason: None }.is_terminal());
    }
}
