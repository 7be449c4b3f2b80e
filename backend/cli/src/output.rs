//! Terminal rendering for instances and step history.

use docpipe_core::{InstanceStatus, StepRecord, StepStatus, WorkflowInstance};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Check if the terminal supports color output.
pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false))
}

/// Strip ANSI escape codes from a string.
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn paint(color: &str, text: &str, enabled: bool) -> String {
    if enabled {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

pub fn note_info(msg: &str) {
    if supports_color() {
        println!("{CYAN}{BOLD}ℹ{RESET} {msg}");
    } else {
        println!("INFO: {msg}");
    }
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        println!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        println!("WARN: {msg}");
    }
}

pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

pub fn note_success(msg: &str) {
    if supports_color() {
        println!("{GREEN}{BOLD}✓{RESET} {msg}");
    } else {
        println!("OK: {msg}");
    }
}

pub enum Align {
    Left,
    Right,
}

pub struct Column {
    pub header: String,
    pub align: Align,
    pub max_width: Option<usize>,
}

impl Column {
    pub fn left(header: impl Into<String>) -> Self {
        Self { header: header.into(), align: Align::Left, max_width: None }
    }

    pub fn right(header: impl Into<String>) -> Self {
        Self { header: header.into(), align: Align::Right, max_width: None }
    }

    pub fn max_width(mut self, width: usize) -> Self {
        self.max_width = Some(width);
        self
    }
}

/// Render a table with given columns and rows. Cells wider than a column's
/// `max_width` are truncated with an ellipsis.
pub fn render_table(columns: &[Column], rows: &[Vec<String>]) -> String {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let cell = row.get(i).map(String::as_str).unwrap_or("");
                    match col.max_width {
                        Some(max) => truncate(cell, max),
                        None => cell.to_string(),
                    }
                })
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| visible_width(&c.header)).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(visible_width(cell));
        }
    }

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| pad_cell(&col.header, widths[i], &col.align))
        .collect();
    out.push_str(&format!("  {}\n", header.join("  ").trim_end()));
    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&format!("  {}\n", sep.join("  ")));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| pad_cell(cell, widths[i], &columns[i].align))
            .collect();
        out.push_str(&format!("  {}\n", cells.join("  ").trim_end()));
    }
    out
}

fn visible_width(s: &str) -> usize {
    strip_ansi(s).chars().count()
}

fn truncate(s: &str, max: usize) -> String {
    if visible_width(s) <= max {
        return s.to_string();
    }
    let plain = strip_ansi(s);
    let kept: String = plain.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn pad_cell(s: &str, width: usize, align: &Align) -> String {
    let pad = " ".repeat(width.saturating_sub(visible_width(s)));
    match align {
        Align::Left => format!("{s}{pad}"),
        Align::Right => format!("{pad}{s}"),
    }
}

pub fn status_label(status: InstanceStatus, color: bool) -> String {
    let tint = match status {
        InstanceStatus::Running => YELLOW,
        InstanceStatus::Completed => GREEN,
        InstanceStatus::Failed => RED,
    };
    paint(tint, status.as_str(), color)
}

pub fn instance_table(instances: &[WorkflowInstance], color: bool) -> String {
    let columns = [
        Column::left("ID"),
        Column::left("Input").max_width(40),
        Column::left("Status"),
        Column::right("Step"),
        Column::left("Updated"),
        Column::left("Output / Error").max_width(60),
    ];
    let rows: Vec<Vec<String>> = instances
        .iter()
        .map(|inst| {
            let detail = match (&inst.output_ref, &inst.error) {
                (Some(output), _) => output.to_string(),
                (None, Some(error)) => error.clone(),
                (None, None) => String::new(),
            };
            vec![
                inst.id.to_string(),
                inst.input_id.to_string(),
                status_label(inst.status, color),
                format!("{}/3", inst.current_step),
                inst.updated_at.format(TIME_FORMAT).to_string(),
                detail,
            ]
        })
        .collect();
    render_table(&columns, &rows)
}

pub fn step_table(steps: &[StepRecord], color: bool) -> String {
    let columns = [
        Column::right("#"),
        Column::left("Step"),
        Column::left("Status"),
        Column::right("Attempts"),
        Column::left("Recorded"),
        Column::left("Error").max_width(60),
    ];
    let rows: Vec<Vec<String>> = steps
        .iter()
        .map(|step| {
            let status = match step.status {
                StepStatus::Completed => paint(GREEN, "completed", color),
                StepStatus::Failed => paint(RED, "failed", color),
            };
            vec![
                step.step_index.to_string(),
                step.step.to_string(),
                status,
                step.attempts.to_string(),
                step.recorded_at.format(TIME_FORMAT).to_string(),
                step.error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    render_table(&columns, &rows)
}

/// Key/value detail block for a single instance.
pub fn instance_detail(instance: &WorkflowInstance, color: bool) -> String {
    let label = |name: &str| paint(DIM, &format!("{name:<10}"), color);
    let mut out = String::new();
    out.push_str(&format!("{} {}\n", label("id"), instance.id));
    out.push_str(&format!("{} {}\n", label("input"), instance.input_id));
    out.push_str(&format!("{} {}\n", label("status"), status_label(instance.status, color)));
    out.push_str(&format!("{} {}/3\n", label("step"), instance.current_step));
    out.push_str(&format!(
        "{} {}\n",
        label("created"),
        instance.created_at.format(TIME_FORMAT)
    ));
    out.push_str(&format!(
        "{} {}\n",
        label("updated"),
        instance.updated_at.format(TIME_FORMAT)
    ));
    if let Some(output) = &instance.output_ref {
        out.push_str(&format!("{} {}\n", label("output"), output));
    }
    if let Some(error) = &instance.error {
        out.push_str(&format!("{} {}\n", label("error"), error));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use docpipe_core::{InputId, OutputReference, StepKind};
    use serde_json::json;
    use uuid::Uuid;

    fn instance(status: InstanceStatus) -> WorkflowInstance {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut inst = WorkflowInstance::new(Uuid::nil(), InputId::parse("invoice123.pdf").unwrap(), at);
        inst.status = status;
        inst
    }

    #[test]
    fn strips_ansi() {
        let colored = format!("{GREEN}hello{RESET}");
        assert_eq!(strip_ansi(&colored), "hello");
    }

    #[test]
    fn aligns_colored_cells_by_visible_width() {
        let cols = [Column::left("Name"), Column::right("Count")];
        let rows = vec![
            vec![paint(GREEN, "Alice", true), "42".to_string()],
            vec!["Bob".to_string(), "7".to_string()],
        ];
        let table = strip_ansi(&render_table(&cols, &rows));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[2], "  Alice     42");
        assert_eq!(lines[3], "  Bob        7");
    }

    #[test]
    fn truncates_to_max_width() {
        let cols = [Column::left("Error").max_width(6)];
        let table = render_table(&cols, &[vec!["connection reset".to_string()]]);
        assert!(table.contains("conne…"));
        assert!(!table.contains("connection"));
    }

    #[test]
    fn instance_table_shows_output_or_error() {
        let mut done = instance(InstanceStatus::Completed);
        done.current_step = 3;
        done.output_ref = Some(OutputReference::new("invoice123.pdf-2024-01-01T00-00-00.txt"));
        let mut failed = instance(InstanceStatus::Failed);
        failed.error = Some("step 'extract' failed".into());

        let table = instance_table(&[done, failed], false);
        assert!(table.contains("3/3"));
        assert!(table.contains("invoice123.pdf-2024-01-01T00-00-00.txt"));
        assert!(table.contains("step 'extract' failed"));
        assert!(table.contains("completed"));
    }

    #[test]
    fn step_table_lists_attempts() {
        let record = StepRecord::failed(
            Uuid::nil(),
            StepKind::Extract,
            json!({"input_id": "invoice123.pdf"}),
            3,
            "storage error: timeout",
        );
        let table = step_table(&[record], false);
        assert!(table.contains("extract"));
        assert!(table.contains("failed"));
        assert!(table.contains("storage error: timeout"));
    }

    #[test]
    fn detail_omits_missing_fields() {
        let detail = instance_detail(&instance(InstanceStatus::Running), false);
        assert!(detail.contains("invoice123.pdf"));
        assert!(!detail.contains("output"));
        assert!(!detail.contains("error"));
    }
}
