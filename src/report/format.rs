//! Formatted terminal output for the run summary.
//!
//! We keep formatting code in one place so:
//! - the pipeline stays free of presentation details
//! - output changes are localized (and covered by snapshot tests)

use crate::report::SeriesSummary;

/// Format the full run summary (source, record counts, sizes, gap repairs, statistics).
pub fn format_summary(summary: &SeriesSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "=== streamflow - {} ({}) ===\n",
        summary.station_name, summary.station_code
    ));
    match summary.strategy {
        Some(strategy) => out.push_str(&format!("Source: {strategy} | {}\n", summary.source)),
        None => out.push_str(&format!("Source: {}\n", summary.source)),
    }
    match summary.date_range {
        Some((start, end)) => {
            let window = if summary.window_applied { "" } else { " (window ignored)" };
            out.push_str(&format!("Period: {start} .. {end}{window}\n"));
        }
        None => out.push_str("Period: (empty)\n"),
    }

    out.push_str("\nRecords:\n");
    out.push_str(&format!(
        "- before: {} ({} missing) | {}\n",
        summary.records_before,
        summary.missing_before,
        fmt_bytes(summary.bytes_before)
    ));
    out.push_str(&format!(
        "- after : {} | {}\n",
        summary.records_after,
        fmt_bytes(summary.bytes_after)
    ));
    if summary.row_errors > 0 || summary.duplicates > 0 {
        out.push_str(&format!(
            "- skipped: {} unparseable rows, {} duplicate dates\n",
            summary.row_errors, summary.duplicates
        ));
    }

    let gaps = &summary.gaps;
    out.push_str("\nGap filling:\n");
    out.push_str(&format!(
        "- forward={} backward={} interpolated={} dropped={}\n",
        gaps.forward_filled, gaps.backward_filled, gaps.interpolated, gaps.dropped
    ));

    out.push_str("\nStreamflow (m³/s):\n");
    match &summary.stats {
        Some(s) => {
            out.push_str(&format!(
                "- min={:.3} max={:.3} mean={:.3} median={:.3}\n",
                s.min, s.max, s.mean, s.median
            ));
        }
        None => out.push_str("- (no values)\n"),
    }

    out
}

fn fmt_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / (KIB * KIB))
    }
}
