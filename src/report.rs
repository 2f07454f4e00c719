//! Purpose: Present fatal `Error`s on stderr: readable text on a TTY, one JSON line otherwise.
//! Exports: `ColorMode`, `Tone`, `Report`, `paint`, `emit`.
//! Role: CLI-only presentation layer over library errors; shared styling for notices.
//! Invariants: JSON reports keep the `{"error": {...}}` envelope; fields are additive-only.
//! Invariants: Text reports never print ANSI codes unless color is enabled.
use std::error::Error as StdError;
use std::io::{self, IsTerminal};

use clap::ValueEnum;
use serde::Serialize;

use aristream::api::{Error, ErrorKind};

const ENCODE_FAILED: &str = r#"{"error":{"kind":"Internal","message":"json encode failed"}}"#;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Tone {
    Alert,
    Note,
}

pub fn paint(label: &str, tone: Tone, enabled: bool) -> String {
    if !enabled {
        return label.to_string();
    }
    let sgr = match tone {
        Tone::Alert => 31,
        Tone::Note => 33,
    };
    format!("\u{1b}[{sgr}m{label}\u{1b}[0m")
}

#[derive(Debug, Serialize)]
pub struct Report {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: &'a Report,
}

impl Report {
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: format!("{:?}", err.kind()),
            message: err
                .message()
                .unwrap_or_else(|| default_message(err.kind()))
                .to_string(),
            hint: err.hint().map(str::to_string),
            endpoint: err.endpoint().map(str::to_string),
            path: err.path().map(str::to_string),
            causes: std::iter::successors(err.source(), |cause| (*cause).source())
                .map(ToString::to_string)
                .collect(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&Envelope { error: self })
            .unwrap_or_else(|_| ENCODE_FAILED.to_string())
    }

    pub fn to_text(&self, use_color: bool) -> String {
        let mut out = format!("{} {}", paint("error:", Tone::Alert, use_color), self.message);
        let details = [
            ("hint:", self.hint.as_deref()),
            ("endpoint:", self.endpoint.as_deref()),
            ("path:", self.path.as_deref()),
            ("caused by:", self.causes.first().map(String::as_str)),
        ];
        for (label, value) in details {
            if let Some(value) = value {
                out.push('\n');
                out.push_str(&paint(label, Tone::Note, use_color));
                out.push(' ');
                out.push_str(value);
            }
        }
        out
    }
}

pub fn emit(err: &Error, color_mode: ColorMode) {
    let report = Report::from_error(err);
    let stderr = io::stderr();
    if stderr.is_terminal() {
        eprintln!("{}", report.to_text(color_mode.use_color(true)));
    } else {
        eprintln!("{}", report.to_json());
    }
}

fn default_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Resolution => "name resolution failed",
        ErrorKind::Transport => "connection failed",
        ErrorKind::Handshake => "handshake failed",
        ErrorKind::Read => "read failed",
        ErrorKind::StreamEnded => "stream ended",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::Parse => "invalid json",
        ErrorKind::Lookup => "lookup failed",
        ErrorKind::TypeMismatch => "type mismatch",
        ErrorKind::Io => "i/o error",
    }
}
