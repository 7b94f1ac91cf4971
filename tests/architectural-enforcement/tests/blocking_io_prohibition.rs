//! Integration Test: Blocking I/O Prohibition
//!
//! Async functions use `tokio::fs`, `tokio::net` and `tokio::io`. Blocking
//! calls are tolerated in synchronous helpers (config loading before the
//! runtime needs it, console writes) and in test modules.

use architectural_enforcement::{enclosing_fn_is_async, is_blocking_io, scan, Violation};

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = scan(|path, lines| {
        let asyncness = enclosing_fn_is_async(lines);
        lines
            .iter()
            .zip(asyncness)
            .filter(|((_, code), is_async)| *is_async == Some(true) && is_blocking_io(code))
            .map(|((line, code), _)| Violation {
                path: path.to_path_buf(),
                line: *line,
                text: code.trim().to_string(),
            })
            .collect()
    });

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async functions:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net, tokio::io or reqwest's async client.");

        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}
