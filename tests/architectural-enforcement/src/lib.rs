//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep the async code honest:
//! - No sleep calls, in production code or in tests
//! - No blocking I/O inside async functions
//!
//! The scans are line based. They strip `//` comments, stop at the first
//! `#[cfg(test)]` of a file, and find the enclosing function by scanning
//! upwards for a `fn` header.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["parley/core/src", "parley/daemon/src"];

/// Integration test trees, relative to the workspace root
pub const TEST_DIRS: &[&str] = &["parley/core/tests"];

/// Workspace root, from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under `dir`, relative to the workspace root
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// A rule broken at one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was found
    pub reason: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.text
        )
    }
}

/// Kind of function enclosing a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// `fn`
    Sync,
    /// `async fn`
    Async,
}

/// A loaded source file
pub struct SourceFile {
    /// Path the file was read from
    pub path: PathBuf,
    /// Raw lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Read `path`, or `None` if unreadable
    pub fn load(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self::from_source(path, &content))
    }

    /// Wrap in-memory source
    pub fn from_source(path: &Path, content: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Line indexes and code (comments stripped) up to the test module
    pub fn production_code(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .take_while(|line| line.trim() != "#[cfg(test)]")
            .enumerate()
            .map(|(idx, line)| (idx, code_part(line)))
    }

    /// Line indexes and code (comments stripped) of the whole file
    pub fn all_code(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .map(|(idx, line)| (idx, code_part(line)))
    }

    /// Kind of the function enclosing line `idx`, if any
    pub fn enclosing_fn(&self, idx: usize) -> Option<FnKind> {
        for i in (0..=idx).rev() {
            let line = self.lines[i].trim();
            if let Some(kind) = fn_header(line) {
                return Some(kind);
            }
            if i < idx && (line.starts_with("mod ") || line.starts_with("impl")) {
                return None;
            }
        }
        None
    }

    /// Violation record for line `idx`
    pub fn violation(&self, idx: usize, reason: &'static str) -> Violation {
        Violation {
            path: self.path.clone(),
            line: idx + 1,
            reason,
            text: self.lines[idx].trim().to_string(),
        }
    }
}

/// Code before any `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Function kind if `line` opens a function
pub fn fn_header(line: &str) -> Option<FnKind> {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    if rest.starts_with("async fn ") {
        Some(FnKind::Async)
    } else if rest.starts_with("fn ") || rest.starts_with("const fn ") {
        Some(FnKind::Sync)
    } else {
        None
    }
}

/// Render violations for a panic message
pub fn report(title: &str, violations: &[Violation], help: &[&str]) -> String {
    let mut out = format!("\n{title}\n\n");
    for v in violations {
        out.push_str(&format!("  {v}\n"));
    }
    if !help.is_empty() {
        out.push('\n');
        for line in help {
            out.push_str(&format!("  - {line}\n"));
        }
    }
    out.push_str(&format!("\nFound {} violation(s).\n", violations.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(lines: &[&str]) -> SourceFile {
        SourceFile::from_source(Path::new("x.rs"), &lines.join("\n"))
    }

    #[test]
    fn test_fn_header_handles_visibility() {
        assert_eq!(fn_header("pub async fn send(&self) {"), Some(FnKind::Async));
        assert_eq!(fn_header("    pub(crate) fn load() {"), Some(FnKind::Sync));
        assert_eq!(fn_header("async fn main() {"), Some(FnKind::Async));
        assert_eq!(fn_header("let f = fn_ptr;"), None);
    }

    #[test]
    fn test_enclosing_fn_found_upwards() {
        let file = source(&[
            "impl Loader {",
            "    pub async fn load(&self) {",
            "        let x = 1;",
            "        std::fs::read(\"a\");",
            "    }",
            "}",
        ]);
        assert_eq!(file.enclosing_fn(3), Some(FnKind::Async));
    }

    #[test]
    fn test_enclosing_fn_stops_at_impl() {
        let file = source(&["fn a() {}", "impl X {", "    const N: u8 = 1;"]);
        assert_eq!(file.enclosing_fn(2), None);
    }

    #[test]
    fn test_production_code_stops_at_test_module() {
        let file = source(&["fn a() {}", "// note", "#[cfg(test)]", "mod tests {"]);
        let lines: Vec<_> = file.production_code().collect();
        assert_eq!(lines, vec![(0, "fn a() {}"), (1, "")]);
    }

    #[test]
    fn test_workspace_root_contains_sources() {
        assert!(!rust_files(PRODUCTION_DIRS[0]).is_empty());
    }
}
