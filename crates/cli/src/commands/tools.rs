//! `cadence tools` — Print the local tool catalog.

use cadence_tools::{local_catalog, CatalogEntry};

pub fn run() {
    println!("{}", render(&local_catalog()));
}

fn render(entries: &[CatalogEntry]) -> String {
    let mut out = format!("{:<18} {:<14} {:<8} {}\n", "TOOL", "OPERATION", "RISK", "NOTE");
    for entry in entries {
        out.push_str(&format!(
            "{:<18} {:<14} {:<8} {}\n",
            entry.name,
            entry.operation.to_string(),
            entry.risk.to_string(),
            entry.note
        ));
    }
    out.push_str("\nExternal tools: medium (file operations with write/delete/remove/move in the name: high)");
    out
}
