//! Inspect command implementation.

use super::replay;
use celldb_core::{CellBackup, GridRect, Snapshot};
use serde::Serialize;
use std::path::Path;

/// Stream inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Stream path.
    pub path: String,
    /// Stream size in bytes.
    pub size: u64,
    /// Number of diffs in the stream.
    pub diff_count: usize,
    /// Version of the final snapshot.
    pub version: u64,
    /// Tool recorded in the final snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Libraries of the final snapshot.
    pub libraries: Vec<LibraryStats>,
    /// Number of cells.
    pub cell_count: usize,
    /// Per-cell statistics (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cells: Option<Vec<CellStats>>,
}

/// Statistics for a single library.
#[derive(Debug, Serialize)]
pub struct LibraryStats {
    /// Library name.
    pub name: String,
    /// File the library was read from or saved to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Whether the library has unsaved changes.
    pub modified: bool,
}

/// Statistics for a single cell.
#[derive(Debug, Serialize)]
pub struct CellStats {
    /// Qualified cell name.
    pub name: String,
    /// Number of nodes.
    pub nodes: usize,
    /// Number of arcs.
    pub arcs: usize,
    /// Number of exports.
    pub exports: usize,
    /// Number of distinct subcells instantiated.
    pub subcells: usize,
    /// Bounds as `[min_x, min_y, max_x, max_y]` in grid units.
    pub bounds: Option<[i64; 4]>,
    /// Whether the cell has unsaved changes.
    pub modified: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_cells: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (snapshot, diff_count) = replay(path, |_| Ok(()))?;
    let ids = snapshot.id_manager();

    let libraries = snapshot
        .libraries()
        .map(|lib| LibraryStats {
            name: ids.lib_name(lib.library().lib_id()).unwrap_or_default(),
            file: lib.library().file().map(str::to_string),
            modified: lib.is_modified(),
        })
        .collect();
    let cells: Vec<CellStats> = snapshot.cells().map(|c| cell_stats(&snapshot, c)).collect();

    let result = InspectResult {
        path: path.display().to_string(),
        size: std::fs::metadata(path)?.len(),
        diff_count,
        version: snapshot.version().as_u64(),
        tool: snapshot.tool().map(str::to_string),
        libraries,
        cell_count: cells.len(),
        cells: show_cells.then_some(cells),
    };

    // Output
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

fn cell_stats(snapshot: &Snapshot, cell: &CellBackup) -> CellStats {
    let rev = cell.revision();
    CellStats {
        name: snapshot.id_manager().describe_cell(cell.cell_id()),
        nodes: rev.nodes().len(),
        arcs: rev.arcs().len(),
        exports: rev.exports().len(),
        subcells: rev.inst_counts().iter().filter(|&&n| n > 0).count(),
        bounds: snapshot
            .cell_bounds(cell.cell_id())
            .filter(|b| !b.is_empty())
            .map(|b| rect(&b)),
        modified: cell.is_modified(),
    }
}

fn rect(r: &GridRect) -> [i64; 4] {
    [r.min_x, r.min_y, r.max_x, r.max_y]
}

fn print_text_output(result: &InspectResult) {
    println!("CellDB Stream Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {} bytes", result.size);
    println!();
    println!("Snapshot:");
    println!("  Diffs:   {}", result.diff_count);
    println!("  Version: {}", result.version);
    if let Some(tool) = &result.tool {
        println!("  Tool:    {tool}");
    }
    println!();
    println!("Libraries:");
    for lib in &result.libraries {
        let marker = if lib.modified { " *" } else { "" };
        match &lib.file {
            Some(file) => println!("  {}{} ({})", lib.name, marker, file),
            None => println!("  {}{}", lib.name, marker),
        }
    }
    println!();
    println!("Cells: {}", result.cell_count);

    if let Some(cells) = &result.cells {
        for cell in cells {
            let bounds = cell.bounds.map_or_else(
                || "empty".to_string(),
                |[x1, y1, x2, y2]| format!("({x1},{y1})-({x2},{y2})"),
            );
            println!(
                "  {}: {} nodes, {} arcs, {} exports, {} subcells, bounds {}",
                cell.name, cell.nodes, cell.arcs, cell.exports, cell.subcells, bounds
            );
        }
    }
}
