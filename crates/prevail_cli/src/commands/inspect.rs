//! Inspect command implementation.

use prevail_core::dir::list_journal_files;
use prevail_core::journal::JournalLines;
use serde::Serialize;
use std::path::Path;

/// Journal directory summary.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Total size of all journal files in bytes.
    pub total_size: u64,
    /// Total number of complete lines.
    pub entry_count: u64,
    /// Lowest id found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<u64>,
    /// Highest id found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<u64>,
    /// Per-file details.
    pub files: Vec<FileStats>,
}

/// Statistics for a single journal file.
#[derive(Debug, Serialize)]
pub struct FileStats {
    /// File name.
    pub name: String,
    /// Id encoded in the file name.
    pub named_id: u64,
    /// File size in bytes.
    pub size: u64,
    /// Number of complete lines.
    pub entries: u64,
    /// Id of the last parseable entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<u64>,
    /// Whether the file ends with an unterminated line.
    pub torn_tail: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the summary without printing it.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No journal directory at {}", path.display()).into());
    }

    let mut result = InspectResult {
        path: path.display().to_string(),
        total_size: 0,
        entry_count: 0,
        first_id: None,
        last_id: None,
        files: Vec::new(),
    };

    for file in list_journal_files(path)? {
        let size = std::fs::metadata(&file.path)?.len();
        let mut stats = FileStats {
            name: file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            named_id: file.first_id.as_u64(),
            size,
            entries: 0,
            last_id: None,
            torn_tail: false,
        };

        for line in JournalLines::open(&file.path)? {
            let line = line?;
            if !line.terminated {
                stats.torn_tail = true;
                continue;
            }
            stats.entries += 1;
            if let Ok(entry) = line.parse(&file.path) {
                let id = entry.id.as_u64();
                stats.last_id = Some(id);
                result.first_id.get_or_insert(id);
                result.last_id = Some(id);
            }
        }

        result.total_size += size;
        result.entry_count += stats.entries;
        result.files.push(stats);
    }

    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Prevail Journal Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Files:      {}", result.files.len());
    println!("  Entries:    {}", result.entry_count);
    println!("  Total size: {}", format_size(result.total_size));
    match (result.first_id, result.last_id) {
        (Some(first), Some(last)) => println!("  Id range:   {first}..={last}"),
        _ => println!("  Id range:   (empty)"),
    }

    if !result.files.is_empty() {
        println!();
        println!("Files:");
        for file in &result.files {
            let last = file
                .last_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let torn = if file.torn_tail { " (torn tail)" } else { "" };
            println!(
                "  {:<24} {:>8} entries, last id {}, {}{}",
                file.name,
                file.entries,
                last,
                format_size(file.size),
                torn
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
