//! Architectural Enforcement
//!
//! Source scanners shared by the integration tests in `tests/`:
//! - No sleep calls in production code
//! - No blocking I/O inside async functions
//!
//! Paths are resolved from the workspace root, so the tests check the real
//! crates wherever `cargo test` is run from.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["conductor/core/src", "conductor/daemon/src"];

/// A source line that breaks a rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File the line is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Trimmed line text
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every `.rs` file under `dir`
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Lines of `content` before its `#[cfg(test)]` module, comments stripped
///
/// Test modules sit at the end of a file, so everything after the first
/// `#[cfg(test)]` is test code.
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .collect()
}

/// Whether `code` calls a sleep function
///
/// `sleep_until` waits on a deadline and is allowed.
pub fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.starts_with("sleep(")
}

/// Whether `code` uses a blocking I/O API
pub fn is_blocking_io(code: &str) -> bool {
    code.contains("std::fs::")
        || code.contains("std::net::")
        || code.contains("std::process::Command")
        || code.contains("reqwest::blocking")
        || code.contains("std::io::stdin()")
        || code.contains("std::io::stdout()")
}

/// Index of the function enclosing each line: `Some(true)` for async
///
/// Tracks the most recent `fn` signature, which is enough for the flat
/// layout of this workspace.
pub fn enclosing_fn_is_async(lines: &[(usize, &str)]) -> Vec<Option<bool>> {
    let mut current = None;
    lines
        .iter()
        .map(|(_, line)| {
            let trimmed = line.trim_start();
            if let Some(pos) = trimmed.find("fn ") {
                let head = &trimmed[..pos];
                if head.split_whitespace().all(|w| {
                    matches!(w, "pub" | "pub(crate)" | "async" | "const" | "unsafe")
                }) {
                    current = Some(head.contains("async"));
                }
            }
            current
        })
        .collect()
}

/// Scan every production file with `check`
pub fn scan(check: impl Fn(&Path, &[(usize, &str)]) -> Vec<Violation>) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for path in rust_sources(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            violations.extend(check(&path, &production_lines(&content)));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_detection() {
        assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
        assert!(is_sleep_call("std::thread::sleep(d);"));
        assert!(!is_sleep_call("() = tokio::time::sleep_until(deadline) => {}"));
        assert!(!is_sleep_call("let mut ticker = tokio::time::interval(d);"));
    }

    #[test]
    fn test_test_module_is_skipped() {
        let content = "fn a() {}\n// sleep( here\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        let lines = production_lines(content);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], (2, ""));
    }

    #[test]
    fn test_async_tracking() {
        let lines = production_lines(
            "fn load() {\n    std::fs::read(p);\n}\npub async fn run() {\n    std::fs::read(p);\n}\n",
        );
        let asyncness = enclosing_fn_is_async(&lines);
        assert_eq!(asyncness[1], Some(false));
        assert_eq!(asyncness[4], Some(true));
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
