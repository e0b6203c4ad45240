//! Custom filters: named, stored filter conditions per category namespace.
//!
//! The filter database is a JSON file. It is read at most once per process
//! and path, kept in a process-wide cache, and read again only on
//! [`FilterStore::reload`] (saving a filter reloads it).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::{self, Context};
use crate::error::{Result, SupertoolError};
use crate::proxy::Proxy;
use crate::record::Category;
use crate::script::{CallChain, Mode, Runtime, Script};
use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFilter {
    pub namespace: String,
    pub name: String,
    pub comment: String,
    pub initial_statements: String,
    pub statements: String,
    pub expression: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDatabase {
    filters: Vec<CustomFilter>,
}

impl FilterDatabase {
    /// A missing file is an empty database.
    pub fn load(path: &Path) -> Result<FilterDatabase> {
        if !path.exists() {
            debug!(path = %path.display(), "no custom filter file");
            return Ok(FilterDatabase::default());
        }
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(FilterDatabase::default());
        }
        let database: FilterDatabase = serde_json::from_str(&text)?;
        info!(path = %path.display(), filters = database.filters.len(), "loaded custom filters");
        Ok(database)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&CustomFilter> {
        self.filters
            .iter()
            .find(|f| f.namespace == namespace && f.name == name)
    }

    pub fn names(&self, namespace: &str) -> Vec<&str> {
        self.filters
            .iter()
            .filter(|f| f.namespace == namespace)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn add(&mut self, filter: CustomFilter) -> Result<()> {
        if self.get(&filter.namespace, &filter.name).is_some() {
            return Err(SupertoolError::Engine(format!(
                "Filter '{}' already exists; choose another name",
                filter.name
            )));
        }
        self.filters.push(filter);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

lazy_static! {
    static ref LOADED: RwLock<HashMap<PathBuf, Arc<FilterDatabase>>> = RwLock::new(HashMap::new());
}

/// Handle on the custom filter database at a path; without a path there are
/// no custom filters and none can be saved.
#[derive(Debug, Clone, Default)]
pub struct FilterStore {
    path: Option<PathBuf>,
}

impl FilterStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Result<Arc<FilterDatabase>> {
        let Some(path) = &self.path else {
            return Ok(Arc::new(FilterDatabase::default()));
        };
        if let Some(database) = LOADED.read()?.get(path) {
            return Ok(Arc::clone(database));
        }
        let mut loaded = LOADED.write()?;
        // another thread may have loaded it between the two locks
        if let Some(database) = loaded.get(path) {
            return Ok(Arc::clone(database));
        }
        let database = Arc::new(FilterDatabase::load(path)?);
        loaded.insert(path.clone(), Arc::clone(&database));
        Ok(database)
    }

    pub fn reload(&self) -> Result<Arc<FilterDatabase>> {
        let Some(path) = &self.path else {
            return Ok(Arc::new(FilterDatabase::default()));
        };
        let database = Arc::new(FilterDatabase::load(path)?);
        LOADED.write()?.insert(path.clone(), Arc::clone(&database));
        Ok(database)
    }

    /// Adds the filter to the file on disk, then reloads the cache.
    pub fn save_filter(&self, filter: CustomFilter) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(SupertoolError::Engine(String::from(
                "No custom filter file configured",
            )));
        };
        let mut database = FilterDatabase::load(path)?;
        let name = filter.name.clone();
        database.add(filter)?;
        database.save(path)?;
        self.reload()?;
        info!(filter = %name, "created filter");
        Ok(())
    }

    pub fn lookup(&self, category: Category, name: &str) -> Result<CustomFilter> {
        self.get()?
            .get(category.namespace(), name)
            .cloned()
            .ok_or_else(|| {
                SupertoolError::Engine(format!(
                    "Unknown filter '{}' for {}",
                    name,
                    category.namespace()
                ))
            })
    }
}

/// Runs the filter's statements and condition against a fresh proxy of the
/// record, continuing the caller's `chain`. An empty condition matches everything.
pub fn matches(runtime: &Runtime, filter: &CustomFilter, proxy: &Proxy, chain: &CallChain) -> Result<bool> {
    let category = proxy.category();
    let fresh = Proxy::load(&runtime.db, category, proxy.handle())?;
    let run = |code: &str, context: &mut Context, mode: Mode| -> Result<Value> {
        Script::compile(code, mode, &runtime.includes)?.run_in(runtime, context, chain)
    };
    let mut initial = context::build(None, Some(category), &Context::new(), None)?;
    if !filter.initial_statements.trim().is_empty() {
        run(&filter.initial_statements, &mut initial, Mode::Statements)?;
    }
    let mut bound = context::build(None, Some(category), &initial, Some(&fresh))?;
    if !filter.statements.trim().is_empty() {
        run(&filter.statements, &mut bound, Mode::Statements)?;
    }
    if filter.expression.trim().is_empty() {
        return Ok(true);
    }
    Ok(run(&filter.expression, &mut bound, Mode::Expression)?.truthy())
}
