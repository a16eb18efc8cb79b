//! Verify command implementation.

use std::path::Path;

use super::blocks::{scan_all, BlockReport};

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying storage at {}", path.display());
    println!();

    let reports = scan_all(path)?;
    if reports.is_empty() {
        println!("No block files found (this may be normal for new storage)");
    }
    for report in &reports {
        print_result(report);
    }

    let bad = reports.iter().filter(|r| !r.is_ok()).count();
    println!();
    if bad == 0 {
        println!("✓ Storage verification passed");
        Ok(())
    } else {
        println!("✗ Storage verification failed: {bad} bad block(s)");
        Err("Verification failed".into())
    }
}

fn print_result(report: &BlockReport) {
    match &report.error {
        None if report.padding > 0 => println!(
            "  block {}: {} records, {} bytes of padding",
            report.block, report.records, report.padding
        ),
        None => println!("  block {}: {} records", report.block, report.records),
        Some(err) => println!(
            "  block {}: {} valid records, first bad offset {}: {}",
            report.block, report.records, err.offset, err.reason
        ),
    }
}
