use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SupertoolError};

const DIRECTIVE: &str = "@include";

/// Directories searched for `@include` files, in order. The literal path is
/// tried after all of them.
#[derive(Debug, Clone, Default)]
pub struct IncludePath {
    dirs: Vec<PathBuf>,
}

impl IncludePath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// The user include directory followed by the directory of the running binary.
    pub fn standard(include_dir: Option<PathBuf>) -> Self {
        let mut searched = Vec::new();
        if let Some(dir) = include_dir.or_else(|| dirs::home_dir().map(|h| h.join("supertool"))) {
            searched.push(dir);
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            searched.push(dir);
        }
        Self { dirs: searched }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn find(&self, name: &str) -> Result<PathBuf> {
        let mut looked_at: Vec<PathBuf> = Vec::new();
        let candidates = self
            .dirs
            .iter()
            .map(|dir| dir.join(name))
            .chain(std::iter::once(PathBuf::from(name)));
        for candidate in candidates {
            let candidate = std::path::absolute(&candidate).unwrap_or(candidate);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if !looked_at.contains(&candidate) {
                looked_at.push(candidate);
            }
        }
        let list: Vec<String> = looked_at.iter().map(|p| format!("- {}", p.display())).collect();
        Err(SupertoolError::Engine(format!(
            "Include file '{}' not found; looked at\n{}",
            name,
            list.join("\n")
        )))
    }

    /// Replaces every `@include <file>` line with the contents of the file.
    pub fn expand(&self, code: &str) -> Result<String> {
        if !code.contains(DIRECTIVE) {
            return Ok(code.to_string());
        }
        let mut out = String::with_capacity(code.len());
        for line in code.split_inclusive('\n') {
            let trimmed = line.trim_start();
            let is_directive = trimmed
                .strip_prefix(DIRECTIVE)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));
            if !is_directive {
                out.push_str(line);
                continue;
            }
            let name = trimmed[DIRECTIVE.len()..].trim();
            if name.is_empty() {
                return Err(SupertoolError::Engine(String::from("Include file name missing")));
            }
            let path = self.find(name)?;
            debug!(path = %path.display(), "included file");
            let contents = fs::read_to_string(&path)?;
            out.push_str(&contents);
            if !contents.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.txt"), "x = 1").unwrap();
        let includes = IncludePath::new(vec![dir.path().to_path_buf()]);
        let code = includes.expand("@include lib.txt\ny = x + 1\n").unwrap();
        assert_eq!(code, "x = 1\ny = x + 1\n");
    }

    #[test]
    fn missing_file_lists_locations() {
        let dir = tempfile::tempdir().unwrap();
        let includes = IncludePath::new(vec![dir.path().to_path_buf()]);
        let message = includes.expand("@include nowhere.txt").unwrap_err().to_string();
        assert!(message.starts_with("Include file 'nowhere.txt' not found; looked at\n- "));
        assert_eq!(message.lines().count(), 3);
    }

    #[test]
    fn missing_name() {
        let includes = IncludePath::default();
        let message = includes.expand("  @include   \n").unwrap_err().to_string();
        assert_eq!(message, "Include file name missing");
    }
}
