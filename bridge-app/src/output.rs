//! Rendering of port lists and verification results.

use std::io::Write;

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};

use fcbridge::PortInfo;
use fcbridge::verify::{Status, VerificationReport, VerificationResult};

pub fn ports_table(ports: &[PortInfo]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["PORT", "DESCRIPTION"]);
    for port in ports {
        table.add_row(vec![port.name.clone(), port.description.clone()]);
    }
    table
}

pub fn results_table(report: &VerificationReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["SETTING", "STATUS", "ACTUAL", "EXPECTED"]);

    for result in &report.results {
        let expected = match (&result.status, &result.message) {
            (Status::Error, Some(message)) => message.clone(),
            _ => result
                .expected_value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };
        table.add_row(vec![
            result.name.clone(),
            result.status.to_string().to_uppercase(),
            result.actual_value.clone().unwrap_or_default(),
            expected,
        ]);
    }
    table
}

/// Observer for `Bridge::verify_with` that writes one line per result as the
/// controller answers. JSON output waits for the full report instead.
pub fn stream_results<W: Write + Send>(
    mut out: W,
    json: bool,
) -> impl FnMut(&VerificationResult) + Send {
    move |result| {
        if !json {
            let _ = writeln!(out, "{result}");
            let _ = out.flush();
        }
    }
}

pub fn print_report(report: &VerificationReport, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        println!("{}", results_table(report));
        println!("{report}");
    }
}
