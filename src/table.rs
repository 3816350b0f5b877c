use std::{borrow::Cow, fmt::Write as _};

use crate::pipeline::SheetProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// Plain-text table with a dashed rule under the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>], align: &[Align]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count().max(3)).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(flatten(cell).chars().count());
        }
    }

    let mut output = String::new();
    let header_cells: Vec<Cow<'_, str>> = headers.iter().map(|h| Cow::Borrowed(*h)).collect();
    let _ = writeln!(output, "{}", format_line(&header_cells, &widths, &[]));
    let rule: Vec<Cow<'_, str>> = widths.iter().map(|w| Cow::Owned("-".repeat(*w))).collect();
    let _ = writeln!(output, "{}", format_line(&rule, &widths, &[]));
    for row in rows {
        let cells: Vec<Cow<'_, str>> = row.iter().map(|c| flatten(c)).collect();
        let _ = writeln!(output, "{}", format_line(&cells, &widths, align));
    }
    output
}

fn format_line(cells: &[Cow<'_, str>], widths: &[usize], align: &[Align]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(idx, (cell, width))| match align.get(idx) {
            Some(Align::Right) => format!("{cell:>width$}"),
            _ => format!("{cell:<width$}"),
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

// Line breaks and tabs inside a cell would break the grid.
fn flatten(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// One line per inferred column, grouped by sheet.
pub fn render_probes(probes: &[SheetProbe]) -> String {
    let rows: Vec<Vec<String>> = probes
        .iter()
        .flat_map(|probe| {
            probe.columns.iter().map(move |column| {
                vec![
                    probe.sheet.clone(),
                    column.name.clone(),
                    column.data_type.to_string(),
                    column.data_type.sql_type().to_string(),
                    format!("{}/{}", column.non_blank, probe.rows),
                ]
            })
        })
        .collect();
    render_table(
        &["sheet", "column", "type", "sql", "filled"],
        &rows,
        &[Align::Left, Align::Left, Align::Left, Align::Left, Align::Right],
    )
}
