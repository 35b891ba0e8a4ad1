//! Statement export: self-contained HTML, CSV and JSON.

use crate::error::StatementError;
use crate::statement::{Statement, StatementType};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Self-contained HTML for external PDF rendering.
    PdfHtml,
    Csv,
    Json,
}

/// A rendered export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub content: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

fn base_filename(statement: &Statement) -> String {
    let kind = match statement.statement_type {
        StatementType::Owner => "owner",
        StatementType::Customer => "customer",
        StatementType::Account => "account",
    };
    format!(
        "statement-{kind}-{}-{}",
        statement.period.start.format("%Y%m%d"),
        statement.period.end.format("%Y%m%d")
    )
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv(statement: &Statement) -> String {
    let mut out = String::new();
    out.push_str(&format!("Statement,{}\n", statement.id));
    out.push_str(&format!("Account,{}\n", statement.account_id));
    out.push_str(&format!(
        "Period,{},{}\n",
        statement.period.start.format("%Y-%m-%d"),
        statement.period.end.format("%Y-%m-%d")
    ));
    out.push_str(&format!("Currency,{}\n", statement.currency));
    out.push_str(&format!(
        "Opening Balance,{}\n",
        statement.opening_balance.format_major()
    ));
    out.push_str(&format!(
        "Closing Balance,{}\n",
        statement.closing_balance.format_major()
    ));
    out.push('\n');

    out.push_str("Date,Type,Description,Reference,Debit,Credit,Balance\n");
    for item in &statement.line_items {
        out.push_str(&format!(
            "{},{:?},{},{},{},{},{}\n",
            item.date.format("%Y-%m-%d"),
            item.entry_type,
            csv_field(&item.description),
            csv_field(&item.reference),
            item.debit.map(|m| m.format_major()).unwrap_or_default(),
            item.credit.map(|m| m.format_major()).unwrap_or_default(),
            item.balance.format_major(),
        ));
    }
    out.push('\n');

    out.push_str("Category,Total Debits,Total Credits,Net\n");
    for summary in &statement.category_summaries {
        out.push_str(&format!(
            "{:?},{},{},{}\n",
            summary.entry_type,
            summary.total_debits.format_major(),
            summary.total_credits.format_major(),
            summary.net.format_major(),
        ));
    }
    out
}

fn render_html(statement: &Statement) -> String {
    let mut rows = String::new();
    for item in &statement.line_items {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{:?}</td><td>{}</td><td>{}</td>\
             <td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>\n",
            item.date.format("%Y-%m-%d"),
            item.entry_type,
            item.description,
            item.reference,
            item.debit.map(|m| m.format_major()).unwrap_or_default(),
            item.credit.map(|m| m.format_major()).unwrap_or_default(),
            item.balance.format_major(),
        ));
    }
    let mut summaries = String::new();
    for summary in &statement.category_summaries {
        summaries.push_str(&format!(
            "<tr><td>{:?}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>\n",
            summary.entry_type,
            summary.total_debits.format_major(),
            summary.total_credits.format_major(),
            summary.net.format_major(),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Statement {id}</title>
<style>
  body {{ font-family: "Helvetica Neue", Arial, sans-serif; margin: 2rem; color: #1c2733; }}
  h1 {{ font-size: 1.4rem; }}
  table {{ border-collapse: collapse; width: 100%; margin-top: 1rem; }}
  th, td {{ border: 1px solid #d4dbe2; padding: 6px 10px; font-size: 0.85rem; }}
  th {{ background: #f2f5f8; text-align: left; }}
  td.num {{ text-align: right; font-variant-numeric: tabular-nums; }}
  .meta {{ margin-top: 0.5rem; font-size: 0.9rem; }}
</style>
</head>
<body>
<h1>Account Statement</h1>
<div class="meta">Statement {id}<br>Account {account}<br>Period {start} to {end}<br>Currency {currency}</div>
<div class="meta">Opening balance: {opening} &middot; Closing balance: {closing}<br>
Total debits: {debits} &middot; Total credits: {credits}</div>
<table>
<thead><tr><th>Date</th><th>Type</th><th>Description</th><th>Reference</th><th>Debit</th><th>Credit</th><th>Balance</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
<h1>Summary by Category</h1>
<table>
<thead><tr><th>Category</th><th>Total Debits</th><th>Total Credits</th><th>Net</th></tr></thead>
<tbody>
{summaries}</tbody>
</table>
</body>
</html>
"#,
        id = statement.id,
        account = statement.account_id,
        start = statement.period.start.format("%Y-%m-%d"),
        end = statement.period.end.format("%Y-%m-%d"),
        currency = statement.currency,
        opening = statement.opening_balance.format_major(),
        closing = statement.closing_balance.format_major(),
        debits = statement.total_debits.format_major(),
        credits = statement.total_credits.format_major(),
        rows = rows,
        summaries = summaries,
    )
}

/// Render a statement in the requested format.
pub fn export(statement: &Statement, format: ExportFormat) -> Result<ExportFile, StatementError> {
    let base = base_filename(statement);
    match format {
        ExportFormat::Json => {
            let content = serde_json::to_vec_pretty(statement)
                .map_err(|e| StatementError::Storage(e.to_string()))?;
            Ok(ExportFile {
                content,
                content_type: "application/json",
                filename: format!("{base}.json"),
            })
        }
        ExportFormat::Csv => Ok(ExportFile {
            content: render_csv(statement).into_bytes(),
            content_type: "text/csv",
            filename: format!("{base}.csv"),
        }),
        ExportFormat::PdfHtml => Ok(ExportFile {
            content: render_html(statement).into_bytes(),
            content_type: "text/html; charset=utf-8",
            filename: format!("{base}.html"),
        }),
    }
}
