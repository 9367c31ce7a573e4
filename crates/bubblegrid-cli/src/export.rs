//! Tabular export: one scan report → one appended CSV row.
//!
//! The CSV carries one column per question (`Q1..QN`); headers are written
//! when the file is new or empty, so repeated exports accumulate one row per
//! scanned sheet.

use std::path::Path;

use bubblegrid::{Answer, ScanReport};

/// Spreadsheet-style option letter for index `k` (A, B, C, ...).
pub fn option_letter(k: usize) -> char {
    (b'A' + (k as u8 % 26)) as char
}

/// Cell text for one resolved answer.
///
/// Blank questions export as `NA`; ambiguous answers list every marked
/// option joined with `|` so the grading layer can decide how to score them.
pub fn answer_cell(answer: &Answer) -> String {
    match answer {
        Answer::Choice(k) => option_letter(*k).to_string(),
        Answer::Blank => "NA".to_string(),
        Answer::Ambiguous(options) => options
            .iter()
            .map(|&k| option_letter(k).to_string())
            .collect::<Vec<_>>()
            .join("|"),
    }
}

/// Append a scan report as one CSV row, creating headers as needed.
pub fn export_report_csv(
    report: &ScanReport,
    csv_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let write_headers = match std::fs::metadata(csv_path) {
        Ok(meta) => meta.len() == 0,
        Err(_) => true,
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;
    let mut writer = csv::Writer::from_writer(file);

    if write_headers {
        let headers: Vec<String> = (1..=report.answers.len())
            .map(|q| format!("Q{}", q))
            .collect();
        writer.write_record(&headers)?;
    }

    let row: Vec<String> = report
        .answers
        .iter()
        .map(|qa| answer_cell(&qa.answer))
        .collect();
    writer.write_record(&row)?;
    writer.flush()?;
    Ok(())
}
