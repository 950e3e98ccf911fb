//! Terminal output for the strata binary.
//!
//! Every message renders one of two ways: styled text for a human
//! terminal (console handles NO_COLOR and piped output), or one JSON
//! object per line when `--output json` is set so scripts can consume
//! the stream. Errors go to stderr in both modes.

use std::sync::atomic::{AtomicBool, Ordering};

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use console::style;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::cli::OutputFormat;

static JSON_MODE: AtomicBool = AtomicBool::new(false);

pub fn init(format: OutputFormat) {
    if matches!(format, OutputFormat::Json) {
        JSON_MODE.store(true, Ordering::Relaxed);
    }
}

fn is_json() -> bool {
    JSON_MODE.load(Ordering::Relaxed)
}

#[derive(Clone, Copy)]
enum Level {
    Header,
    Success,
    Warning,
    Error,
    Hint,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Header | Level::Hint => "info",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

/// One machine-readable output line.
#[derive(Serialize)]
struct JsonLine<'a> {
    level: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a JsonValue>,
}

fn print_json(level: &str, message: &str, data: Option<&JsonValue>, to_stderr: bool) {
    let line = serde_json::to_string(&JsonLine {
        level,
        message,
        data,
    })
    .unwrap_or_else(|_| format!("{{\"level\":\"{level}\",\"message\":\"unprintable\"}}"));
    if to_stderr {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

fn report(level: Level, text: &str) {
    if is_json() {
        print_json(level.tag(), text, None, matches!(level, Level::Error));
        return;
    }
    match level {
        Level::Header => println!("{}", style(text).bold().cyan()),
        Level::Success => println!("{} {}", style("✓").green(), text),
        Level::Warning => println!("{} {}", style("!").yellow(), text),
        Level::Error => eprintln!("{} {}", style("✗").red(), text),
        Level::Hint => println!("{}", style(text).dim()),
    }
}

pub fn header(text: &str) {
    report(Level::Header, text);
}

pub fn success(text: &str) {
    report(Level::Success, text);
}

pub fn warning(text: &str) {
    report(Level::Warning, text);
}

pub fn error(text: &str) {
    report(Level::Error, text);
}

pub fn dim(text: &str) {
    report(Level::Hint, text);
}

pub fn json_pretty(value: &JsonValue) {
    if is_json() {
        print_json("data", "", Some(value), false);
    } else {
        let formatted = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        println!("{formatted}");
    }
}

// ── Tables ─────────────────────────────────────────────────────────

/// Create a styled table with the given header row.
pub fn table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        columns
            .iter()
            .map(|c| {
                Cell::new(c)
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold)
            })
            .collect::<Vec<_>>(),
    );
    table
}

/// Add a row, highlighting the first column.
pub fn table_row(table: &mut Table, cells: &[&str]) {
    let mut row: Vec<Cell> = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        if i == 0 {
            row.push(Cell::new(cell).fg(Color::Green));
        } else {
            row.push(Cell::new(cell));
        }
    }
    table.add_row(row);
}

/// Print a table; JSON mode emits the items array instead.
pub fn table_print<T: Serialize>(table: &Table, items: &[T]) {
    if is_json() {
        let data = serde_json::to_value(items).unwrap_or(JsonValue::Null);
        print_json("list", "", Some(&data), false);
    } else {
        println!("{table}");
    }
}
