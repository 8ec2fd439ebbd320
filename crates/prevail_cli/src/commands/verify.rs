//! Verify command implementation.
//!
//! Applies the same checks as engine recovery, but reports every problem
//! instead of stopping at the first, and never truncates anything.

use prevail_core::dir::list_journal_files;
use prevail_core::journal::JournalLines;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of lines checked.
    pub lines_checked: u64,
    /// Number of valid entries.
    pub valid_entries: u64,
    /// Problems that would stop recovery.
    pub errors: Vec<String>,
    /// Problems recovery tolerates (gaps, a torn tail).
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

/// Runs the verify command.
pub fn run(path: &Path, strict: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying journal at {}", path.display());
    println!();

    let result = verify(path)?;

    println!("Files checked:  {}", result.files_checked);
    println!("Lines checked:  {}", result.lines_checked);
    println!("Valid entries:  {}", result.valid_entries);
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }

    println!();
    if result.is_ok(strict) {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every journal file in `path`.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let files = list_journal_files(path)?;
    let mut previous: Option<u64> = None;

    for (index, file) in files.iter().enumerate() {
        let is_last_file = index + 1 == files.len();
        let name = file.path.display();
        result.files_checked += 1;
        let mut first_in_file = true;

        for line in JournalLines::open(&file.path)? {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    result.errors.push(e.to_string());
                    break;
                }
            };
            result.lines_checked += 1;

            if !line.terminated {
                let message = format!(
                    "{name}: line {}: unterminated line ({} bytes)",
                    line.number,
                    line.text.len()
                );
                if is_last_file {
                    result.warnings.push(message);
                } else {
                    result.errors.push(message);
                }
                continue;
            }

            let entry = match line.parse(&file.path) {
                Ok(entry) => entry,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            let id = entry.id.as_u64();

            if first_in_file && id != file.first_id.as_u64() {
                result.errors.push(format!(
                    "{name}: first entry has id {id} but the file is named for id {}",
                    file.first_id.as_u64()
                ));
            }
            first_in_file = false;

            match previous {
                Some(prev) if id <= prev => {
                    result.errors.push(format!(
                        "{name}: line {}: id {id} does not follow id {prev}",
                        line.number
                    ));
                    continue;
                }
                Some(prev) if id > prev + 1 => {
                    result
                        .warnings
                        .push(format!("{name}: ids {}..{id} are missing", prev + 1));
                }
                None if id > 1 => {
                    result
                        .warnings
                        .push(format!("{name}: ids 1..{id} are missing"));
                }
                _ => {}
            }

            previous = Some(id);
            result.valid_entries += 1;
        }
    }

    Ok(result)
}
