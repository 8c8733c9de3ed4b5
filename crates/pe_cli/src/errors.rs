// crates/pe_cli/src/errors.rs
//
// Exit-code policy and the structured JSON error printed to stderr:
//   0 success, 1 file, 2 configuration, 3 session, 4 export, 5 validation.

use serde_json::{json, Value};

use pe_export::ExportError;
use pe_io::{IoError, TableError};
use pe_session::SessionError;

#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub kind: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub suggestions: Vec<String>,
}

impl Failure {
    pub fn new(code: u8, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            details: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, s: impl Into<String>) -> Self {
        self.suggestions.push(s.into());
        self
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self::new(1, "file_error", message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, "config_error", message)
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::new(3, "session_error", message)
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::new(4, "export_error", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(5, "validation_error", message)
    }

    /// The stderr document: `{"error": {code, message, details?, suggestions?}}`.
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "code": self.kind,
            "message": self.message,
        });
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        if !self.suggestions.is_empty() {
            error["suggestions"] = json!(self.suggestions);
        }
        json!({ "error": error })
    }

    pub fn print(&self) {
        eprintln!("{}", self.to_json());
    }
}

impl From<TableError> for Failure {
    fn from(e: TableError) -> Self {
        match &e {
            TableError::Open { .. } => Failure::file(e.to_string())
                .with_suggestion("check the --input path and file permissions"),
            _ => Failure::validation(e.to_string())
                .with_suggestion("run `propelo validate --input <path>` against this file first"),
        }
    }
}

impl From<IoError> for Failure {
    fn from(e: IoError) -> Self {
        match &e {
            IoError::File { .. } | IoError::AtomicWrite { .. } => Failure::file(e.to_string()),
            IoError::SessionNotFound(name) => Failure::session(e.to_string()).with_details(json!({
                "session_id": name,
            })),
            IoError::CorruptCheckpoint(_) | IoError::Json(_) => Failure::session(e.to_string()),
        }
    }
}

impl From<SessionError> for Failure {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Config(inner) => Failure::config(inner.to_string()),
            SessionError::Core(inner) => Failure::config(inner.to_string()),
            SessionError::Io(inner) => inner.into(),
            SessionError::Audit(inner) => Failure::session(inner.to_string())
                .with_suggestion("the audit journal must be repaired or archived before this session can continue"),
            SessionError::Table(inner) => inner.into(),
            SessionError::Comparison(inner) => Failure::session(inner.to_string()),
            SessionError::InvalidState(msg) => Failure::session(format!("invalid state: {msg}")),
            SessionError::AlreadyExists(name) => {
                Failure::session(format!("session {name:?} already exists"))
                    .with_suggestion(format!("resume it with `propelo resume --session-id {name}`"))
            }
        }
    }
}

impl From<ExportError> for Failure {
    fn from(e: ExportError) -> Self {
        Failure::export(e.to_string())
    }
}
