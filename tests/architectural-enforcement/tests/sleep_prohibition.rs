//! Integration Test: Sleep Prohibition
//!
//! Production code waits on I/O, channels, deadlines or `interval` ticks,
//! never on a fixed sleep. Test modules are exempt.

use architectural_enforcement::{is_sleep_call, scan, Violation};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|path, lines| {
        lines
            .iter()
            .filter(|(_, code)| is_sleep_call(code.trim_start()))
            .map(|(line, code)| Violation {
                path: path.to_path_buf(),
                line: *line,
                text: code.trim().to_string(),
            })
            .collect()
    });

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on the event instead:");
        eprintln!("  - tokio::time::timeout around the awaited future");
        eprintln!("  - tokio::time::interval for periodic work");
        eprintln!("  - tokio::time::sleep_until for a deadline inside select!");

        panic!("Found {} sleep violation(s) in production code", violations.len());
    }
}
