//! Markdown and JSON renderers for run reports.

use std::fmt::Write as _;

use super::{Category, ReportCategory, ReportFormat, SyncReport};

/// Cells of the longest bar in the chart.
const BAR_WIDTH: usize = 40;

/// Render a report as pretty-printed JSON.
pub fn render_json_report(report: &SyncReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Render a report as Markdown.
#[must_use]
pub fn render_markdown_report(report: &SyncReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Registry sync report");
    let _ = writeln!(output);
    let _ = writeln!(output, "- Run: `{}`", report.run_id);
    if let Some(source) = &report.source {
        let _ = writeln!(output, "- Source: {}", escape_cell(source));
    }
    let _ = writeln!(output, "- Actor: {}", escape_cell(&report.actor));
    let _ = writeln!(output, "- Started: {}", format_millis(report.started_at));
    let _ = writeln!(
        output,
        "- Processed: {} (skipped rows: {}, duplicates collapsed: {})",
        report.processed, report.skipped, report.duplicates
    );
    let _ = writeln!(output, "- Active after run: {}", report.active_total);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output);
    let _ = writeln!(output, "| Category | Count | Share |");
    let _ = writeln!(output, "| --- | ---: | ---: |");
    for entry in &report.categories {
        let _ = writeln!(
            output,
            "| {} | {} | {:.1}% |",
            entry.category.label(),
            entry.count,
            entry.percentage
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "```text");
    output.push_str(&bar_chart(&report.categories));
    let _ = writeln!(output, "```");

    for entry in &report.categories {
        let _ = writeln!(output);
        render_category(&mut output, entry);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Conflicts ({})", report.conflicts.len());
    let _ = writeln!(output);
    if report.conflicts.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        let _ = writeln!(output, "| Identifier | Kind | Reason | Code |");
        let _ = writeln!(output, "| --- | --- | --- | --- |");
        for conflict in &report.conflicts {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                escape_cell(&conflict.identifier),
                conflict.kind,
                escape_cell(&conflict.reason),
                conflict.code.as_deref().map_or_else(String::new, escape_cell)
            );
        }
    }

    output
}

fn render_category(output: &mut String, entry: &ReportCategory) {
    let _ = writeln!(output, "## {} ({})", entry.category.label(), entry.count);
    let _ = writeln!(output);
    if entry.samples.is_empty() {
        let _ = writeln!(output, "None.");
        return;
    }

    let updated = entry.category == Category::Updated;
    if updated {
        let _ = writeln!(output, "| Identifier | Client date | Previous date | Reactivated |");
        let _ = writeln!(output, "| --- | --- | --- | --- |");
    } else {
        let _ = writeln!(output, "| Identifier | Client date |");
        let _ = writeln!(output, "| --- | --- |");
    }

    for sample in &entry.samples {
        let client_date = sample.client_date.as_deref().unwrap_or("-");
        if updated {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                escape_cell(&sample.identifier),
                client_date,
                sample.previous_date.as_deref().unwrap_or("-"),
                if sample.reactivated { "yes" } else { "no" }
            );
        } else {
            let _ = writeln!(
                output,
                "| {} | {} |",
                escape_cell(&sample.identifier),
                client_date
            );
        }
    }

    if entry.omitted > 0 {
        let _ = writeln!(output);
        let _ = writeln!(output, "_{} more not shown_", entry.omitted);
    }
}

/// Fixed-width text bar chart of the category counts.
#[must_use]
pub fn bar_chart(categories: &[ReportCategory]) -> String {
    let max = categories.iter().map(|entry| entry.count).max().unwrap_or(0);
    let label_width = categories
        .iter()
        .map(|entry| entry.category.label().len())
        .max()
        .unwrap_or(0);

    let mut output = String::new();
    for entry in categories {
        let cells = if max == 0 {
            0
        } else {
            // Non-zero counts always get at least one cell
            (entry.count * BAR_WIDTH).div_ceil(max)
        };
        let _ = writeln!(
            output,
            "{:<label_width$} | {:<bar_width$} {}",
            entry.category.label(),
            "#".repeat(cells),
            entry.count,
            bar_width = BAR_WIDTH
        );
    }
    output
}

/// Render a report based on the selected format.
pub fn render_report(report: &SyncReport, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Json => render_json_report(report),
        ReportFormat::Markdown => Ok(render_markdown_report(report)),
    }
}

/// Build a deterministic default file name for a run's report.
#[must_use]
pub fn suggested_report_file_name(format: ReportFormat, run_id: &str) -> String {
    format!("regsync-report-{run_id}.{}", format.extension())
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn format_millis(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| timestamp_ms.to_string(), |date| date.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::build_report;
    use crate::report::tests::fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn markdown_contains_summary_samples_and_conflicts() {
        let (run, result) = fixture();
        let rendered = render_markdown_report(&build_report(&run, &result));

        assert!(rendered.contains("- Run: `0190c3a1-0000-7000-8000-000000000001`"));
        assert!(rendered.contains("| Inserted | 12 | 80.0% |"));
        assert!(rendered.contains("| Updated | 1 | 6.7% |"));
        assert!(rendered.contains("## Inserted (12)"));
        assert!(rendered.contains("_2 more not shown_"));
        assert!(rendered.contains("| U1 | 2024-01-02 09:30 -06:00 | 2023-12-01 00:00 -06:00 | yes |"));
        assert!(rendered.contains("## Deactivated (0)\n\nNone."));
        assert!(rendered.contains("| X1 | insert_failed | disk \\| full | DiskFull (13) |"));
        assert!(rendered.contains("| <group> | deactivation_failed | database is locked |  |"));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let (run, result) = fixture();
        let report = build_report(&run, &result);

        let rendered = render_report(&report, ReportFormat::Json).unwrap();
        let parsed: crate::report::SyncReport = serde_json::from_str(&rendered).unwrap();

        assert_eq!(parsed, report);
    }

    #[test]
    fn bar_chart_scales_to_longest_bar() {
        let (run, result) = fixture();
        let chart = bar_chart(&build_report(&run, &result).categories);
        let lines = chart.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].matches('#').count(), BAR_WIDTH);
        // 1 of 12 still shows
        assert_eq!(lines[1].matches('#').count(), 4);
        assert_eq!(lines[3].matches('#').count(), 0);
        assert!(lines[0].starts_with("Inserted    | "));
    }

    #[test]
    fn suggested_file_name_uses_extension() {
        assert_eq!(
            suggested_report_file_name(ReportFormat::Markdown, "abc"),
            "regsync-report-abc.md"
        );
        assert_eq!(
            suggested_report_file_name(ReportFormat::Json, "abc"),
            "regsync-report-abc.json"
        );
    }
}
