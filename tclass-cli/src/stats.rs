//! Statistics display and formatting

use std::io::{self, Write};
use tclass_stream::{Report, ReportRow, ReportSink};

/// Format RTT in human-readable form
pub fn format_rtt(rtt_us: u64) -> String {
    if rtt_us == 0 {
        "N/A".to_string()
    } else if rtt_us >= 1_000_000 {
        format!("{:.2}s", rtt_us as f64 / 1_000_000.0)
    } else if rtt_us >= 1_000 {
        format!("{:.2}ms", rtt_us as f64 / 1_000.0)
    } else {
        format!("{}µs", rtt_us)
    }
}

/// Share of sent requests that came back in order, in percent
pub fn delivery_ratio(row: &ReportRow) -> f64 {
    if row.sent == 0 {
        0.0
    } else {
        row.received as f64 * 100.0 / row.sent as f64
    }
}

fn render_row(row: &ReportRow) -> String {
    format!(
        "│ {:6} │ {:8} │ {:8} │ {:8} │ {:8} │ {:8} │ {:>9} │ {:>6.1}% │",
        format!("{} {}", row.stream.family.tag(), row.stream.priority),
        row.sent,
        row.received,
        row.dropped,
        row.wrong_order,
        row.invalid,
        format_rtt(row.mean_rtt_us),
        delivery_ratio(row)
    )
}

/// Render a report as a box table
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    out.push_str("┌────────┬──────────┬──────────┬──────────┬──────────┬──────────┬───────────┬─────────┐\n");
    out.push_str("│ Class  │ Sent     │ Recv     │ Drop     │ Miss     │ Invalid  │ Mean RTT  │ Deliv.  │\n");
    out.push_str("├────────┼──────────┼──────────┼──────────┼──────────┼──────────┼───────────┼─────────┤\n");
    for row in &report.rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.push_str("└────────┴──────────┴──────────┴──────────┴──────────┴──────────┴───────────┴─────────┘\n");
    out
}

/// Prints reports as a table on stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct TableSink;

impl ReportSink for TableSink {
    fn emit(&self, report: &Report) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "\nTraffic class statistics");
        let _ = write!(stdout, "{}", render_report(report));
        let _ = stdout.flush();
    }
}
