//! Comma-separated dataset reader.
//!
//! Reads the whole file, splits it into rows with standard double-quote
//! escaping, and maps the first seven columns of each row onto a `Record`.
//! There is no header handling: every non-blank line is data.

use crate::dataset::{DatasetError, Record};
use std::path::Path;

/// Number of leading columns that make up a record.
pub const RECORD_FIELDS: usize = 7;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Load every record from the CSV file at `path`.
pub fn load(path: &Path) -> Result<Vec<Record>, DatasetError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| DatasetError::Io(path.to_path_buf(), e))?;
    parse(&contents)
}

/// Parse CSV text into records.
///
/// All rows must have as many fields as the first row, and at least
/// `RECORD_FIELDS` of them.
pub fn parse(input: &str) -> Result<Vec<Record>, DatasetError> {
    let mut records = Vec::new();
    let mut expected = None;

    for (line, fields) in rows(input)? {
        match expected {
            None => expected = Some(fields.len()),
            Some(expected) if expected != fields.len() => {
                return Err(DatasetError::FieldCount {
                    line,
                    expected,
                    found: fields.len(),
                })
            }
            Some(_) => {}
        }

        records.push(to_record(line, fields)?);
    }

    Ok(records)
}

fn to_record(line: usize, fields: Vec<String>) -> Result<Record, DatasetError> {
    if fields.len() < RECORD_FIELDS {
        return Err(DatasetError::TooFewFields {
            line,
            found: fields.len(),
        });
    }

    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or_default();
    Ok(Record {
        positive: next(),
        tests: next(),
        date: next(),
        discharged: next(),
        expired: next(),
        admitted: next(),
        region: next(),
    })
}

/// Split input into rows of fields, tagged with their 1-based starting line.
fn rows(input: &str) -> Result<Vec<(usize, Vec<String>)>, DatasetError> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut row_start = 1;

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                QUOTE if chars.peek() == Some(&QUOTE) => {
                    chars.next();
                    field.push(QUOTE);
                }
                QUOTE => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            QUOTE if field.is_empty() => in_quotes = true,
            DELIMITER => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                end_row(&mut rows, &mut fields, &mut field, row_start);
                line += 1;
                row_start = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DatasetError::UnterminatedQuote { line: row_start });
    }
    end_row(&mut rows, &mut fields, &mut field, row_start);

    Ok(rows)
}

fn end_row(
    rows: &mut Vec<(usize, Vec<String>)>,
    fields: &mut Vec<String>,
    field: &mut String,
    line: usize,
) {
    // blank line
    if fields.is_empty() && field.is_empty() {
        return;
    }
    fields.push(std::mem::take(field));
    rows.push((line, std::mem::take(fields)));
}
