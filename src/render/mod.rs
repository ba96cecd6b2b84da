//! Static outputs of a run: dashboard, debug page and health report.

pub mod dashboard;
pub mod debug;
pub mod health;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AppResult;
use crate::sync::FleetReport;

pub const INDEX_HTML: &str = "index.html";
pub const DEBUG_HTML: &str = "debug.html";
pub const HEALTH_JSON: &str = "health.json";
pub const HEALTH_CSV: &str = "health.csv";
pub const HEALTH_TXT: &str = "health.txt";

const STYLE: &str = "\
body{font-family:system-ui,Segoe UI,Roboto,Ubuntu,Arial,sans-serif;margin:20px}\
h1{margin:0 0 .25rem}small{color:#555}\
.card{background:#fff;border:1px solid #eee;border-radius:12px;\
box-shadow:0 1px 6px rgba(0,0,0,.04);padding:16px;margin:16px 0}\
table{border-collapse:collapse;width:100%}\
th,td{border:1px solid #ddd;padding:6px 8px;text-align:left}\
.ok{color:#1a7f37}.stale,.empty{color:#9a6700}.error,.no-data{color:#cf222e}\
code{word-break:break-all}";

/// Render every output into `docs_dir` and return the written paths.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a file cannot be
/// written.
pub fn write_all(docs_dir: &Path, report: &FleetReport) -> AppResult<Vec<PathBuf>> {
    fs::create_dir_all(docs_dir)?;

    let outputs = [
        (INDEX_HTML, dashboard::render(report)),
        (DEBUG_HTML, debug::render(report)),
        (HEALTH_JSON, health::to_json(report)?),
        (HEALTH_CSV, health::to_csv(report)?),
        (HEALTH_TXT, health::to_text(report)),
    ];

    let mut written = Vec::with_capacity(outputs.len());
    for (name, content) in outputs {
        let path = docs_dir.join(name);
        fs::write(&path, content)?;
        written.push(path);
    }

    tracing::info!(dir = %docs_dir.display(), files = written.len(), "Rendered outputs");
    Ok(written)
}

/// Escape text for HTML element and attribute content.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\"><head>\n<meta charset=\"utf-8\"/>\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"/>\n\
         <title>{}</title>\n<style>{STYLE}</style>\n</head><body>\n{body}\n</body></html>\n",
        escape(title)
    )
}

fn format_instant(t: Option<DateTime<Utc>>) -> String {
    t.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%SZ").to_string())
}

/// Display form of a metric value: numbers rounded to three decimals.
fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => ((f * 1000.0).round() / 1000.0).to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn format_optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn status_class(label: &str) -> String {
    label.replace(' ', "-")
}
