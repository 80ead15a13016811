//! Rendering of aggregate results.

use std::fmt;
use std::io::Write;

use anyhow::Result;
use bugetar_engine::AggregateResult;
use bugetar_query::AggregateRow;

/// Output format of `bugetar-aggregate run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table.
    Text,
    /// CSV with a header row.
    Csv,
    /// The result as JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// CSV columns, in [`AggregateRow`] field order.
const CSV_HEADER: [&str; 11] = [
    "key",
    "name",
    "county_code",
    "county_name",
    "siruta_code",
    "entity_cui",
    "population",
    "total_amount",
    "per_capita_amount",
    "amount",
    "line_count",
];

const TEXT_HEADER: [&str; 7] = ["key", "name", "county", "population", "total", "per_capita", "amount"];

/// Write a result in the given format.
pub fn write_result<W: Write>(result: &AggregateResult, format: OutputFormat, writer: &mut W) -> Result<()> {
    match format {
        OutputFormat::Text => write_text(result, writer),
        OutputFormat::Csv => write_csv(&result.rows, writer),
        OutputFormat::Json => {
            writeln!(writer, "{}", serde_json::to_string_pretty(result)?)?;
            Ok(())
        }
    }
}

fn text_cells(row: &AggregateRow) -> [String; 7] {
    [
        row.key.clone(),
        row.name.clone().unwrap_or_default(),
        row.county_code.clone().unwrap_or_default(),
        row.population.map(|p| p.to_string()).unwrap_or_default(),
        row.total_amount.round_dp(2).to_string(),
        row.per_capita_amount.round_dp(2).to_string(),
        row.amount.round_dp(2).to_string(),
    ]
}

fn write_text<W: Write>(result: &AggregateResult, writer: &mut W) -> Result<()> {
    let cells: Vec<[String; 7]> = result.rows.iter().map(text_cells).collect();

    let mut widths = TEXT_HEADER.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header = TEXT_HEADER.map(String::from);
    write_text_line(writer, &header, &widths)?;
    let rule = widths.map(|w| "-".repeat(w));
    write_text_line(writer, &rule, &widths)?;
    for row in &cells {
        write_text_line(writer, row, &widths)?;
    }

    writeln!(writer)?;
    writeln!(
        writer,
        "{} row(s) of {} group(s)",
        result.rows.len(),
        result.total_count
    )?;
    Ok(())
}

fn write_text_line<W: Write>(writer: &mut W, cells: &[String; 7], widths: &[usize; 7]) -> Result<()> {
    // Amount columns are right-aligned.
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (cell, &width))| {
            if i >= 3 {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect();
    writeln!(writer, "{}", line.join("  ").trim_end())?;
    Ok(())
}

fn write_csv<W: Write>(rows: &[AggregateRow], writer: &mut W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv.write_record(CSV_HEADER)?;
    for row in rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}
