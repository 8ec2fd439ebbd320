//! Dump command implementation.

use prevail_codec::Value;
use prevail_core::dir::list_journal_files;
use prevail_core::journal::JournalLines;
use serde::Serialize;
use std::path::Path;

/// Journal entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Transaction id.
    pub id: u64,
    /// Operation name.
    pub operation: String,
    /// Decoded arguments.
    pub args: Vec<Value>,
    /// File the entry was read from.
    pub file: String,
    /// Line number within the file.
    pub line: u64,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    from_id: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = read_entries(path, from_id, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

/// Reads entries with id `>= from_id`, up to `limit` of them.
///
/// Stops with an error at the first malformed line; an unterminated final
/// line is skipped.
pub fn read_entries(
    path: &Path,
    from_id: u64,
    limit: Option<usize>,
) -> Result<Vec<EntryInfo>, Box<dyn std::error::Error>> {
    let max_entries = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    let files = list_journal_files(path)?;

    // Files before the one containing `from_id` can be skipped whole
    let start = files
        .iter()
        .rposition(|f| f.first_id.as_u64() <= from_id)
        .unwrap_or(0);

    'files: for file in &files[start..] {
        let file_name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for line in JournalLines::open(&file.path)? {
            if entries.len() >= max_entries {
                break 'files;
            }
            let line = line?;
            if !line.terminated {
                tracing::warn!(file = %file_name, line = line.number, "skipping unterminated line");
                continue;
            }
            let entry = line.parse(&file.path)?;
            if entry.id.as_u64() < from_id {
                continue;
            }
            entries.push(EntryInfo {
                id: entry.id.as_u64(),
                operation: entry.operation,
                args: entry.args,
                file: file_name.clone(),
                line: line.number,
            });
        }
    }

    Ok(entries)
}

fn print_text_output(entries: &[EntryInfo]) {
    if entries.is_empty() {
        println!("No entries found");
        return;
    }

    println!("{:<10} {:<24} ARGS", "ID", "OPERATION");
    println!("{}", "-".repeat(60));
    for entry in entries {
        let args: Vec<String> = entry.args.iter().map(prevail_codec::to_text).collect();
        println!("{:<10} {:<24} {}", entry.id, entry.operation, args.join(" "));
    }
    println!();
    println!("Total: {} entries", entries.len());
}
