use std::fmt::Write;

use crate::render::{escape, format_instant, format_optional, page};
use crate::sync::FleetReport;

#[must_use]
pub fn render(report: &FleetReport) -> String {
    let mut body = String::from("<h1>Debug: pull and persist</h1>\n");
    let _ = writeln!(
        body,
        "<small>Generated {}</small>",
        format_instant(Some(report.generated_at))
    );

    for d in &report.devices {
        let _ = writeln!(
            body,
            "<div class=\"card\"><h3>{}</h3>\n\
             <p>History: {} B, Raw: {} B, Rows: {}, Requests: {}</p>",
            escape(&d.device_id),
            d.files.csv_bytes.unwrap_or(0),
            d.files.raw_bytes.unwrap_or(0),
            d.total_records,
            d.requests,
        );
        if let Some(error) = &d.error {
            let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(error));
        }

        if d.recent.is_empty() {
            body.push_str("<p><i>empty</i></p>\n");
        } else {
            body.push_str(
                "<table>\n<tr><th>received_at</th><th>f_port</th><th>rssi</th><th>snr</th>\
                 <th>payload_json</th></tr>\n",
            );
            for s in &d.recent {
                let _ = writeln!(
                    body,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
                    format_instant(s.received_at),
                    format_optional(s.f_port),
                    format_optional(s.rssi),
                    format_optional(s.snr),
                    escape(&s.payload_json),
                );
            }
            body.push_str("</table>\n");
        }
        body.push_str("</div>\n");
    }

    page("Debug", &body)
}
