//! Plain-text and JSON rendering of query results.

use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

use crate::api::Page;
use crate::entity::Entity;

const MAX_CELL_WIDTH: usize = 40;

/// Truncate a string to a maximum length (in chars), adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Aligned table with the entity's columns. Soft-deleted records are marked.
pub fn render_table<T: Entity>(out: &mut impl Write, records: &[T]) -> Result<()> {
  let header: Vec<String> = T::columns().iter().map(|c| c.to_string()).collect();
  let rows: Vec<Vec<String>> = records
    .iter()
    .map(|record| {
      let mut row: Vec<String> = record
        .row()
        .iter()
        .map(|cell| truncate(cell, MAX_CELL_WIDTH))
        .collect();
      if record.is_deleted() {
        if let Some(first) = row.first_mut() {
          first.push('*');
        }
      }
      row
    })
    .collect();

  let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
  for row in &rows {
    for (i, cell) in row.iter().enumerate() {
      if let Some(width) = widths.get_mut(i) {
        *width = (*width).max(cell.chars().count());
      }
    }
  }

  write_row(out, &header, &widths)?;
  for row in &rows {
    write_row(out, row, &widths)?;
  }
  if records.iter().any(|record| record.is_deleted()) {
    writeln!(out, "(* deleted)")?;
  }
  Ok(())
}

fn write_row(out: &mut impl Write, cells: &[String], widths: &[usize]) -> Result<()> {
  let line = cells
    .iter()
    .zip(widths)
    .map(|(cell, width)| format!("{:<width$}", cell, width = width))
    .collect::<Vec<_>>()
    .join("  ");
  writeln!(out, "{}", line.trim_end())?;
  Ok(())
}

/// "page 2 of 5 (97 bus models)"
pub fn page_summary<T: Entity>(page: &Page<T>) -> String {
  format!(
    "page {} of {} ({} {})",
    page.page,
    page.total_pages().max(1),
    page.total,
    plural(T::label(), page.total)
  )
}

fn plural(label: &str, count: u64) -> String {
  if count == 1 {
    label.to_string()
  } else if label.ends_with('s') {
    format!("{}es", label)
  } else {
    format!("{}s", label)
  }
}

pub fn render_page<T: Entity>(out: &mut impl Write, page: &Page<T>) -> Result<()> {
  render_table(out, &page.items)?;
  writeln!(out)?;
  writeln!(out, "{}", page_summary(page))?;
  Ok(())
}

/// One `field: value` line per top-level field.
pub fn render_record<T: Serialize>(out: &mut impl Write, record: &T) -> Result<()> {
  let value = serde_json::to_value(record)?;
  let Value::Object(fields) = value else {
    writeln!(out, "{}", display_value(&value))?;
    return Ok(());
  };

  let width = fields.keys().map(|k| k.chars().count()).max().unwrap_or(0);
  for (key, value) in &fields {
    writeln!(out, "{:>width$}: {}", key, display_value(value), width = width)?;
  }
  Ok(())
}

fn display_value(value: &Value) -> String {
  match value {
    Value::Null => "-".to_string(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

pub fn render_json<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
  serde_json::to_writer_pretty(&mut *out, value)?;
  writeln!(out)?;
  Ok(())
}
