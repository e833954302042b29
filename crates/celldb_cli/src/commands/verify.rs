//! Verify command implementation.

use super::replay;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of snapshots checked.
    pub snapshots_checked: usize,
    /// Number of snapshots that passed every check.
    pub valid_snapshots: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying stream at {:?}", path);
    println!();

    let mut result = VerifyResult::default();
    let replayed = replay(path, |step| {
        result.snapshots_checked += 1;
        if step.new.version() <= step.old.version() {
            result.errors.push(format!(
                "diff {}: version {} does not advance past {}",
                step.index,
                step.new.version(),
                step.old.version()
            ));
            return Ok(());
        }
        match step.new.check() {
            Ok(()) => result.valid_snapshots += 1,
            Err(e) => result
                .errors
                .push(format!("diff {} (version {}): {e}", step.index, step.new.version())),
        }
        Ok(())
    });
    if let Err(e) = replayed {
        result.errors.push(format!("stream unreadable: {e}"));
    }

    println!("  Snapshots checked: {}", result.snapshots_checked);
    println!("  Valid snapshots:   {}", result.valid_snapshots);
    for error in &result.errors {
        println!("  Error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Stream verification passed");
        Ok(())
    } else {
        println!("✗ Stream verification failed");
        Err("Verification failed".into())
    }
}
