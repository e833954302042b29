//! Dump command implementation.

use super::replay;
use serde::Serialize;
use std::path::Path;

/// One diff of a stream.
#[derive(Debug, Serialize)]
pub struct DiffInfo {
    /// Zero-based position in the stream.
    pub index: usize,
    /// Version after the diff.
    pub version: u64,
    /// Tool recorded by the diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Encoded size in bytes.
    pub bytes: u64,
    /// Libraries whose slot changed.
    pub libraries: Vec<String>,
    /// Cells whose slot changed, with `-` marking removed cells.
    pub cells: Vec<String>,
}

/// Runs the dump command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let max_diffs = limit.unwrap_or(usize::MAX);
    let mut diffs = Vec::new();
    replay(path, |step| {
        if diffs.len() >= max_diffs {
            return Ok(());
        }
        let ids = step.new.id_manager();
        let libraries = step
            .new
            .changed_libraries(step.old)
            .into_iter()
            .map(|i| {
                let name = ids.lib_id(i).and_then(|l| ids.lib_name(l)).unwrap_or_default();
                match step.new.lib_backups().get(i).and_then(Option::as_ref) {
                    Some(_) => name,
                    None => format!("-{name}"),
                }
            })
            .collect();
        let cells = step
            .new
            .changed_cells(step.old)
            .into_iter()
            .map(|i| {
                let name = ids.cell_id(i).map(|c| ids.describe_cell(c)).unwrap_or_default();
                match step.new.cell_backups().get(i).and_then(Option::as_ref) {
                    Some(_) => name,
                    None => format!("-{name}"),
                }
            })
            .collect();
        diffs.push(DiffInfo {
            index: step.index,
            version: step.new.version().as_u64(),
            tool: step.new.tool().map(str::to_string),
            bytes: step.bytes,
            libraries,
            cells,
        });
        Ok(())
    })?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&diffs)?);
        }
        _ => {
            print_text_output(&diffs);
        }
    }

    Ok(())
}

fn print_text_output(diffs: &[DiffInfo]) {
    println!("Snapshot diffs:");
    println!("===============");
    for diff in diffs {
        println!();
        println!(
            "[{}] version {} ({} bytes){}",
            diff.index,
            diff.version,
            diff.bytes,
            diff.tool.as_deref().map(|t| format!(" by {t}")).unwrap_or_default()
        );
        if !diff.libraries.is_empty() {
            println!("  Libraries: {}", diff.libraries.join(", "));
        }
        if !diff.cells.is_empty() {
            println!("  Cells:     {}", diff.cells.join(", "));
        }
    }
    println!();
    println!("Total: {} diffs", diffs.len());
}
