//! CSV input and output.
//!
//! Input files carry one identifier per row in the first column, with a
//! header row that is skipped. Output files carry one row per input
//! position, including failures, so the output lines up with the input.

use std::path::Path;
use std::time::Duration;

use crate::config::LookupResult;
use crate::error::LookupError;

/// Read identifiers from the first column of a CSV file. The header row is
/// skipped, surrounding whitespace is trimmed, and blank rows are dropped.
pub fn read_identifiers(path: &Path) -> Result<Vec<String>, LookupError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| LookupError::Configuration(format!("failed to open {}: {e}", path.display())))?;

    let mut identifiers = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| LookupError::Configuration(format!("malformed row in {}: {e}", path.display())))?;
        if let Some(value) = record.get(0) {
            let value = value.trim();
            if !value.is_empty() {
                identifiers.push(value.to_string());
            }
        }
    }
    Ok(identifiers)
}

/// Write results in input order. Failed rows keep their identifier and carry
/// the error kind in the `error` column with empty field columns.
pub fn write_results(path: &Path, results: &[LookupResult]) -> Result<(), LookupError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| LookupError::Configuration(format!("failed to create {}: {e}", path.display())))?;

    writer
        .write_record([
            "identifier",
            "first_surname",
            "second_surname",
            "first_name",
            "other_names",
            "status",
            "attempts",
            "error",
            "elapsed",
        ])
        .map_err(|e| LookupError::Configuration(format!("write failed: {e}")))?;

    for result in results {
        let empty = String::new();
        let (first_surname, second_surname, first_name, other_names, status) =
            match &result.fields {
                Some(fields) => (
                    &fields.first_surname,
                    &fields.second_surname,
                    &fields.first_name,
                    &fields.other_names,
                    &fields.status,
                ),
                None => (&empty, &empty, &empty, &empty, &empty),
            };
        let error = result
            .error
            .as_ref()
            .map(|e| e.kind().to_string())
            .unwrap_or_default();
        writer
            .write_record([
                result.identifier.as_str(),
                first_surname,
                second_surname,
                first_name,
                other_names,
                status,
                &result.attempts.to_string(),
                &error,
                &format_duration(result.elapsed),
            ])
            .map_err(|e| LookupError::Configuration(format!("write failed: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| LookupError::Configuration(format!("flush failed: {e}")))?;
    Ok(())
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}
