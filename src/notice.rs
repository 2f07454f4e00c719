//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `emit_notice`.
//! Role: CLI diagnostics for events that are reported but do not stop the stream.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is additive-only.
use std::io::{self, IsTerminal};

use serde_json::{Map, Value, json};

use crate::report::{Tone, paint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub endpoint: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind,
            "endpoint": notice.endpoint,
            "message": notice.message,
            "details": Value::Object(notice.details.clone()),
        }
    })
}

pub fn emit_notice(notice: &Notice, use_color: bool) {
    if io::stderr().is_terminal() {
        eprintln!(
            "{} {} ({})",
            paint("notice:", Tone::Note, use_color),
            notice.message,
            notice.endpoint
        );
        return;
    }
    let json = serde_json::to_string(&notice_json(notice)).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}
