// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Output helpers shared by the subcommands.
//!
//! Global flags are exported by `main` as `GRASP_JSON`, `GRASP_QUIET`,
//! `GRASP_VERBOSE` and `GRASP_NO_COLOR` so every command reads them the
//! same way.

use serde::Serialize;
use std::io::IsTerminal;

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

pub fn is_json() -> bool {
    flag("GRASP_JSON")
}

pub fn is_quiet() -> bool {
    flag("GRASP_QUIET")
}

pub fn is_verbose() -> bool {
    flag("GRASP_VERBOSE")
}

/// Pretty-print `value` as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("  failed to encode output: {e}"),
    }
}

/// One compact JSON line on stdout, for streamed output.
pub fn print_json_line<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("  failed to encode output: {e}"),
    }
}

/// Status symbols, colored when stderr is a terminal.
pub struct Styled {
    color: bool,
}

impl Styled {
    pub fn new() -> Self {
        Self {
            color: !flag("GRASP_NO_COLOR") && std::io::stderr().is_terminal(),
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    pub fn ok_sym(&self) -> String {
        self.paint("32", "✓")
    }

    pub fn warn_sym(&self) -> String {
        self.paint("33", "!")
    }

    pub fn err_sym(&self) -> String {
        self.paint("31", "✗")
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
