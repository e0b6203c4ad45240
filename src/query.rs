//! Stored queries and the two file encodings they are kept in.
//!
//! The block format is a sequence of `[key]` header lines, each followed by
//! the raw text of the value:
//!
//! ```text
//! [title]
//! Men
//!
//! [filter]
//! gender == 'M'
//!
//! [unwind_lists]
//! False
//! ```
//!
//! Files ending in `.json` hold the same keys as one flat JSON object of
//! strings.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::Result;

pub const SCRIPTFILE_EXTENSION: &str = ".script";

const KEYS: [&str; 10] = [
    "title",
    "category",
    "initial_statements",
    "statements",
    "filter",
    "expressions",
    "scope",
    "unwind_lists",
    "commit_changes",
    "summary_only",
];

// `[key]` for one of the known keys; other bracketed lines are value text
fn header(line: &str) -> Option<&'static str> {
    let inner = line.trim_end().strip_prefix('[')?.strip_suffix(']')?;
    KEYS.iter().find(|k| **k == inner).copied()
}

/// Which records a query runs over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    All,
    Filtered,
    #[default]
    Selected,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::All => "all",
            Scope::Filtered => "filtered",
            Scope::Selected => "selected",
        }
    }
    /// Unrecognised names fall back to `selected`.
    pub fn parse(text: &str) -> Scope {
        match text.trim() {
            "all" => Scope::All,
            "filtered" => Scope::Filtered,
            _ => Scope::Selected,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub title: String,
    pub category: String,
    pub initial_statements: String,
    pub statements: String,
    pub filter: String,
    pub expressions: String,
    pub scope: Scope,
    pub unwind_lists: bool,
    pub commit_changes: bool,
    pub summary_only: bool,
}

fn flag(value: bool) -> String {
    String::from(if value { "True" } else { "False" })
}

impl Query {
    fn to_data(&self) -> Vec<(&'static str, String)> {
        vec![
            ("title", self.title.clone()),
            ("category", self.category.clone()),
            ("initial_statements", self.initial_statements.clone()),
            ("statements", self.statements.clone()),
            ("filter", self.filter.clone()),
            ("expressions", self.expressions.clone()),
            ("scope", self.scope.as_str().to_string()),
            ("unwind_lists", flag(self.unwind_lists)),
            ("commit_changes", flag(self.commit_changes)),
            ("summary_only", flag(self.summary_only)),
        ]
    }

    fn from_data(data: &BTreeMap<String, String>) -> Query {
        let text = |key: &str| data.get(key).cloned().unwrap_or_default();
        let truth = |key: &str| data.get(key).is_some_and(|v| v == "True");
        Query {
            title: text("title"),
            category: text("category"),
            initial_statements: text("initial_statements"),
            statements: text("statements"),
            filter: text("filter"),
            expressions: text("expressions"),
            scope: data.get("scope").map(|s| Scope::parse(s)).unwrap_or_default(),
            unwind_lists: truth("unwind_lists"),
            commit_changes: truth("commit_changes"),
            summary_only: truth("summary_only"),
        }
    }
}

pub struct ScriptFile;

impl ScriptFile {
    /// A missing file loads as the default query. With `load_title`, a query
    /// without a title is named after its file.
    pub fn load(path: &Path, load_title: bool) -> Result<Query> {
        let data = if !path.exists() {
            debug!(path = %path.display(), "no such query file");
            BTreeMap::new()
        } else if is_json(path) {
            read_json(path)?
        } else {
            read_blocks(path)?
        };
        let mut query = Query::from_data(&data);
        if query.title.is_empty() && load_title {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            query.title = name.replace(SCRIPTFILE_EXTENSION, "");
        }
        Ok(query)
    }

    pub fn save(path: &Path, query: &Query) -> Result<()> {
        let data = query.to_data();
        let text = if is_json(path) {
            let object: serde_json::Map<String, serde_json::Value> = data
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                .collect();
            serde_json::to_string_pretty(&object)?
        } else {
            let mut text = String::new();
            for (key, value) in data {
                let value = value.trim();
                text.push_str(&format!("[{key}]\n{value}\n"));
                if !value.is_empty() {
                    text.push('\n');
                }
            }
            text
        };
        fs::write(path, text)?;
        debug!(path = %path.display(), "saved query");
        Ok(())
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
}

fn read_json(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    let object: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)?;
    Ok(object
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            // booleans written by other tools still load
            serde_json::Value::Bool(b) => (k, flag(b)),
            other => (k, other.to_string()),
        })
        .collect())
}

fn read_blocks(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    let mut data = BTreeMap::new();
    let mut key: Option<String> = None;
    let mut value = String::new();
    for line in text.split_inclusive('\n') {
        if let Some(found) = header(line) {
            if let Some(previous) = key.take() {
                data.insert(previous, value.trim_end().to_string());
            }
            key = Some(found.to_string());
            value.clear();
        } else {
            value.push_str(line);
        }
    }
    if let Some(previous) = key {
        data.insert(previous, value.trim_end().to_string());
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_names() {
        assert_eq!(Scope::parse("all"), Scope::All);
        assert_eq!(Scope::parse("filtered"), Scope::Filtered);
        assert_eq!(Scope::parse("whatever"), Scope::Selected);
        assert_eq!(Scope::default().to_string(), "selected");
    }

    #[test]
    fn lines_that_look_like_headers_stay_in_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.script");
        fs::write(&path, "[expressions]\n[x for x in range(3)]\n[unwind_lists]\nTrue\n").unwrap();
        let query = ScriptFile::load(&path, false).unwrap();
        assert_eq!(query.expressions, "[x for x in range(3)]");
        assert!(query.unwind_lists);
        assert_eq!(query.title, "");
    }
}
