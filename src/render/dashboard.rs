use std::collections::BTreeSet;
use std::fmt::Write;

use crate::classify::DeviceType;
use crate::render::{escape, format_instant, format_optional, format_value, page, status_class};
use crate::sync::{DeviceReport, DeviceStatus, FleetReport};

/// Metric columns per type table.
const MAX_METRIC_COLUMNS: usize = 8;

#[must_use]
pub fn render(report: &FleetReport) -> String {
    let mut body = String::new();

    let _ = writeln!(body, "<h1>TTN fleet: {}</h1>", escape(&report.app_id));
    let _ = writeln!(
        body,
        "<small>Generated {} &middot; {}</small>",
        format_instant(Some(report.generated_at)),
        summary_line(report)
    );

    for note in &report.notes {
        let _ = writeln!(body, "<div class=\"card error\">{}</div>", escape(note));
    }

    body.push_str(&overview(report));

    for (device_type, ids) in &report.groups {
        let devices: Vec<&DeviceReport> = ids.iter().filter_map(|id| report.device(id)).collect();
        body.push_str(&type_table(*device_type, &devices));
    }

    body.push_str(
        "<p><a href=\"debug.html\">Debug page</a> &middot; \
         <a href=\"health.json\">health.json</a></p>",
    );

    page(&format!("TTN fleet: {}", report.app_id), &body)
}

fn summary_line(report: &FleetReport) -> String {
    DeviceStatus::ALL
        .iter()
        .map(|s| format!("{}: {}", s.label(), report.count(*s)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn overview(report: &FleetReport) -> String {
    if report.devices.is_empty() {
        return "<div class=\"card\"><p>No devices processed.</p></div>\n".to_string();
    }

    let mut html = String::from(
        "<div class=\"card\"><h2>Overview</h2><table>\n\
         <tr><th>Device</th><th>Type</th><th>Status</th><th>Records</th><th>New</th>\
         <th>In window</th><th>Last seen (UTC)</th><th>Error</th></tr>\n",
    );
    for d in &report.devices {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&d.device_id),
            d.device_type,
            status_class(d.status.label()),
            d.status,
            d.total_records,
            d.new_records,
            d.window_records,
            format_instant(d.last_seen),
            escape(d.error.as_deref().unwrap_or("")),
        );
    }
    html.push_str("</table></div>\n");
    html
}

/// Columns for a type table: the type's preferred metrics that appear, then
/// any other metric the group reports.
fn metric_columns(device_type: DeviceType, devices: &[&DeviceReport]) -> Vec<String> {
    let present: BTreeSet<&str> = devices
        .iter()
        .flat_map(|d| d.latest.keys().map(String::as_str))
        .collect();

    let preferred = device_type.preferred_metrics();
    preferred
        .iter()
        .copied()
        .filter(|m| present.contains(m))
        .chain(present.iter().copied().filter(|m| !preferred.contains(m)))
        .take(MAX_METRIC_COLUMNS)
        .map(str::to_string)
        .collect()
}

fn type_table(device_type: DeviceType, devices: &[&DeviceReport]) -> String {
    let columns = metric_columns(device_type, devices);

    let mut html = format!(
        "<div class=\"card\"><h2>{device_type}</h2><table>\n\
         <tr><th>Device</th><th>Last seen (UTC)</th>"
    );
    for c in &columns {
        let _ = write!(html, "<th>{}</th>", escape(c));
    }
    html.push_str("</tr>\n");

    for d in devices {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td>",
            escape(&d.device_id),
            format_instant(d.last_seen)
        );
        for c in &columns {
            let cell = format_optional(d.latest.get(c).map(format_value));
            let _ = write!(html, "<td>{}</td>", escape(&cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table></div>\n");
    html
}
