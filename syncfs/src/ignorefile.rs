//! Ignorefile compiles `.odoignore`/`.gitignore` rules into a gitignore-style path matcher.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::Result;

/// Candidates is the ordered list of ignore-file names checked at the working directory root.
const CANDIDATES: &[&str] = &[".odoignore", ".gitignore"];

/// IgnoreMatcher wraps a compiled set of gitignore-style rules.
pub struct IgnoreMatcher(Gitignore);

impl IgnoreMatcher {
    /// Load reads the first of `.odoignore` or `.gitignore` found directly under `root`.
    ///
    /// Blank lines, comment lines (`#`), and lines starting with `.git` are discarded before
    /// compiling. If neither file exists, the returned matcher matches nothing.
    pub fn load(root: &Path) -> Result<Self> {
        for name in CANDIDATES {
            let path = root.join(name);
            if !path.is_file() {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            let mut builder = GitignoreBuilder::new(root);
            for line in contents.lines() {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(".git") {
                    continue;
                }
                builder.add_line(None, trimmed)?;
            }
            return Ok(Self(builder.build()?));
        }
        Ok(Self(GitignoreBuilder::new(root).build()?))
    }

    /// Matches reports whether the path, relative to the matcher's root, is ignored.
    pub fn matches(&self, rel: &Path, is_dir: bool) -> bool {
        self.0.matched(rel, is_dir).is_ignore()
    }
}
