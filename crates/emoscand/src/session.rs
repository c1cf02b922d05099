/// Name used when the user leaves the name blank.
pub const DEFAULT_NAME: &str = "User";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session name already chosen: {0}")]
    AlreadyChosen(String),
}

/// The name shown in greetings. Chosen at most once per daemon session and
/// never written to disk.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    name: Option<String>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a name already chosen (e.g. from configuration).
    pub fn with_name(raw: &str) -> Self {
        Self {
            name: Some(normalize(raw)),
        }
    }

    /// Choose the session name. Blank input falls back to [`DEFAULT_NAME`].
    pub fn choose(&mut self, raw: &str) -> Result<&str, SessionError> {
        if let Some(existing) = &self.name {
            return Err(SessionError::AlreadyChosen(existing.clone()));
        }
        let name = self.name.insert(normalize(raw));
        tracing::info!(name = %name, "session name chosen");
        Ok(name.as_str())
    }

    pub fn is_chosen(&self) -> bool {
        self.name.is_some()
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
