//! Purpose: Render indented JSON trees, optionally with ANSI color, for dumps.
//! Exports: `render`.
//! Role: Pure formatter behind `json::dump` and the CLI event printer.
//! Invariants: When color is disabled, output equals serde_json::to_string_pretty.
//! Invariants: Color only wraps tokens; layout comes from `PrettyFormatter` either way.
use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};

// 8/16-color codes only; bright variants wash out on light themes.
const KEY: &[u8] = b"36";
const STRING: &[u8] = b"32";
const NUMBER: &[u8] = b"33";
const BOOL: &[u8] = b"35";
const NULL: &[u8] = b"39";

pub fn render(value: &Value, use_color: bool) -> String {
    if !use_color {
        return serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    }
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, Painter::default());
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Wraps `PrettyFormatter`, bracketing scalar tokens with SGR codes.
#[derive(Default)]
struct Painter<'a> {
    layout: PrettyFormatter<'a>,
    in_key: bool,
}

fn paint<W, F>(out: &mut W, code: &[u8], body: F) -> io::Result<()>
where
    W: ?Sized + Write,
    F: FnOnce(&mut W) -> io::Result<()>,
{
    start(out, code)?;
    body(out)?;
    reset(out)
}

fn start<W: ?Sized + Write>(out: &mut W, code: &[u8]) -> io::Result<()> {
    out.write_all(b"\x1b[")?;
    out.write_all(code)?;
    out.write_all(b"m")
}

fn reset<W: ?Sized + Write>(out: &mut W) -> io::Result<()> {
    out.write_all(b"\x1b[0m")
}

impl Formatter for Painter<'_> {
    fn write_null<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        paint(out, NULL, |out| self.layout.write_null(out))
    }

    fn write_bool<W: ?Sized + Write>(&mut self, out: &mut W, value: bool) -> io::Result<()> {
        paint(out, BOOL, |out| self.layout.write_bool(out, value))
    }

    fn write_i64<W: ?Sized + Write>(&mut self, out: &mut W, value: i64) -> io::Result<()> {
        paint(out, NUMBER, |out| self.layout.write_i64(out, value))
    }

    fn write_u64<W: ?Sized + Write>(&mut self, out: &mut W, value: u64) -> io::Result<()> {
        paint(out, NUMBER, |out| self.layout.write_u64(out, value))
    }

    fn write_f64<W: ?Sized + Write>(&mut self, out: &mut W, value: f64) -> io::Result<()> {
        paint(out, NUMBER, |out| self.layout.write_f64(out, value))
    }

    fn write_number_str<W: ?Sized + Write>(&mut self, out: &mut W, value: &str) -> io::Result<()> {
        paint(out, NUMBER, |out| self.layout.write_number_str(out, value))
    }

    fn begin_string<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        start(out, if self.in_key { KEY } else { STRING })?;
        self.layout.begin_string(out)
    }

    fn end_string<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.end_string(out)?;
        reset(out)
    }

    fn begin_array<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.begin_array(out)
    }

    fn end_array<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.end_array(out)
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, out: &mut W, first: bool) -> io::Result<()> {
        self.layout.begin_array_value(out, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.end_array_value(out)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.begin_object(out)
    }

    fn end_object<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.end_object(out)
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, out: &mut W, first: bool) -> io::Result<()> {
        self.in_key = true;
        self.layout.begin_object_key(out, first)
    }

    fn end_object_key<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.in_key = false;
        self.layout.end_object_key(out)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.begin_object_value(out)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.layout.end_object_value(out)
    }
}
