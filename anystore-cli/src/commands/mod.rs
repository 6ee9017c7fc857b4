pub mod browse;
pub mod modify;
pub mod transfer;

pub use browse::{run_cat, run_ls, run_stat};
pub use modify::{run_mkdir, run_put, run_rm};
pub use transfer::{run_copy, run_move, TransferRequest};

use anystore::BatchReport;

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Print the per-child outcome of a folder operation.
pub fn print_report(report: &BatchReport) {
    println!(
        "{}: {} succeeded, {} failed",
        report.operation,
        report.succeeded.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  FAILED {} ({}): {}", failure.path, failure.kind, failure.message);
    }
}
