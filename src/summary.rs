use crate::task::{TaskResult, KILLED_CODE};

const HEADERS: [&str; 4] = ["Task", "FinalExitCode", "Retries", "Time(s)"];

/// Renders the final results table: `Task | FinalExitCode | Retries |
/// Time(s)`. Column widths are the max of header and any cell; a code of
/// 130 renders as `130 (Killed)`. `colorize` applies the cosmetic
/// per-row color (success white, killed gray, failure red) without
/// affecting column widths, since ANSI codes are wrapped around the
/// already-padded line.
pub fn render(results: &[TaskResult], colorize: bool) -> String {
    let rows: Vec<[String; 4]> = results.iter().map(row_cells).collect();
    let widths = column_widths(&rows);

    let mut out = String::new();
    out.push_str(&format_row(&HEADERS.map(str::to_string), &widths));
    out.push('\n');
    out.push_str(&separator(&widths));
    out.push('\n');

    for (result, cells) in results.iter().zip(&rows) {
        let line = format_row(cells, &widths);
        if colorize {
            out.push_str(&colorize_line(&line, result));
        } else {
            out.push_str(&line);
        }
        out.push('\n');
    }
    out
}

fn row_cells(r: &TaskResult) -> [String; 4] {
    let code = match r.code {
        Some(KILLED_CODE) => format!("{KILLED_CODE} (Killed)"),
        Some(c) => c.to_string(),
        None => "undefined".to_string(),
    };
    [
        r.name.clone(),
        code,
        r.retries.to_string(),
        format!("{:.2}", r.duration_ms as f64 / 1000.0),
    ]
}

fn column_widths(rows: &[[String; 4]]) -> [usize; 4] {
    let mut widths = HEADERS.map(str::len);
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    widths
}

fn format_row(cells: &[String; 4], widths: &[usize; 4]) -> String {
    cells
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn separator(widths: &[usize; 4]) -> String {
    widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-")
}

fn colorize_line(line: &str, r: &TaskResult) -> String {
    let code = match r.code {
        Some(0) => 37,
        Some(KILLED_CODE) => 90,
        Some(_) => 31,
        None => 90,
    };
    format!("\u{1b}[{code}m{line}\u{1b}[0m")
}
