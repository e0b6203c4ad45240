//! The record pipeline: binds each record of a scope, runs the per-record
//! statements and filter, commits, evaluates the result expression and
//! shapes the values into rows.
//!
//! [`Engine::get_values`] returns a lazy iterator. Nothing past the record
//! that produced the last pulled row is processed, so a consumer that stops
//! pulling caps the run.

use std::collections::VecDeque;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::context::{self, Context};
use crate::database::{Database, SharedTransaction};
use crate::error::{Result, SupertoolError};
use crate::proxy::Proxy;
use crate::record::{Category, Handle};
use crate::script::{Mode, Runtime, Script};
use crate::value::{format_float, Value};

// ------------- Category -------------
/// What the pipeline needs to know about a category. Without a category
/// there is no current object: no handles are enumerated and no per-record
/// pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryInfo {
    category: Option<Category>,
}

impl CategoryInfo {
    pub fn new(category: Category) -> Self {
        Self {
            category: Some(category),
        }
    }
    pub fn none() -> Self {
        Self { category: None }
    }
    pub fn category(&self) -> Option<Category> {
        self.category
    }
    /// The namespace custom filters of this category live in.
    pub fn objclass(&self) -> Option<&'static str> {
        self.category.map(|c| c.namespace())
    }
    /// Every handle of the category, in ascending order.
    pub fn all_handles(&self, db: &Database) -> Result<Vec<Handle>> {
        match self.category {
            Some(category) => db.handles(category),
            None => Ok(Vec::new()),
        }
    }
}

/// Resolves a user-facing category name (`People`, `Families`, ... or the
/// singular namespace).
pub fn get_category_info(name: &str) -> Result<CategoryInfo> {
    Category::from_name(name)
        .map(CategoryInfo::new)
        .ok_or_else(|| SupertoolError::Engine(format!("Unknown category '{}'", name)))
}

// ------------- Rows -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    /// Numbers and strings are kept, everything else is rendered.
    pub fn from_value(value: &Value) -> Cell {
        match value {
            Value::Int(i) => Cell::Int(*i),
            Value::Float(f) => Cell::Float(*f),
            Value::Str(s) => Cell::Str(s.to_string()),
            other => Cell::Str(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(x) => f.write_str(&format_float(*x)),
            Cell::Str(s) => f.write_str(s),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Cell::Empty => serializer.serialize_none(),
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(x) => serializer.serialize_f64(*x),
            Cell::Str(s) => serializer.serialize_str(s),
        }
    }
}

/// One result row: the record's gramps id, the values, the record's handle.
/// Summary rows leave the first and last cell empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
    pub fn len(&self) -> usize {
        self.cells.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
    pub fn to_strings(&self) -> Vec<String> {
        self.cells.iter().map(Cell::to_string).collect()
    }
    /// One CSV line, without the line terminator. Fields holding the
    /// delimiter, quotes or line breaks are quoted.
    pub fn to_csv(&self, delimiter: char) -> String {
        self.cells
            .iter()
            .map(|cell| {
                let text = cell.to_string();
                if text.contains(delimiter) || text.contains(['"', '\n', '\r']) {
                    format!("\"{}\"", text.replace('"', "\"\""))
                } else {
                    text
                }
            })
            .collect::<Vec<_>>()
            .join(&delimiter.to_string())
    }
}

/// Expands a result into value rows. Positions are walked right to left;
/// with `unwind` a list fans out into one row per element, so the number of
/// rows is the product of the list lengths.
pub fn shape(result: &Value, unwind: bool) -> Vec<Vec<Cell>> {
    let items = match result {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut rows: Vec<Vec<Cell>> = vec![Vec::new()];
    for value in items.iter().rev() {
        let choices: Vec<Cell> = match value {
            Value::List(list) if unwind => list.borrow().iter().map(Cell::from_value).collect(),
            other => vec![Cell::from_value(other)],
        };
        let mut next = Vec::with_capacity(rows.len() * choices.len());
        for row in &rows {
            for choice in &choices {
                let mut shaped = Vec::with_capacity(row.len() + 1);
                shaped.push(choice.clone());
                shaped.extend(row.iter().cloned());
                next.push(shaped);
            }
        }
        rows = next;
    }
    rows
}

// ------------- Engine -------------
/// Polled once per record before it is bound; returning `true` cancels.
pub type Step = Box<dyn FnMut() -> bool>;

pub struct Engine {
    runtime: Runtime,
    ui_state: Value,
    info: CategoryInfo,
    handles: Vec<Handle>,
    initial_statements: String,
    statements: String,
    filter: String,
    expressions: String,
    unwind_lists: bool,
    commit_changes: bool,
    summary_only: bool,
    step: Option<Step>,
    object_count: usize,
    total_objects: usize,
}

struct Compiled {
    statements: Option<Script>,
    filter: Option<Script>,
    expressions: Option<Script>,
}

fn compile(runtime: &Runtime, code: &str, mode: Mode) -> Result<Option<Script>> {
    if code.trim().is_empty() {
        return Ok(None);
    }
    Script::compile(code, mode, &runtime.includes).map(Some)
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Runtime,
        ui_state: Value,
        info: CategoryInfo,
        handles: Vec<Handle>,
        initial_statements: &str,
        statements: &str,
        filter: &str,
        expressions: &str,
        unwind_lists: bool,
        commit_changes: bool,
        summary_only: bool,
    ) -> Engine {
        Engine {
            runtime,
            ui_state,
            info,
            handles,
            initial_statements: initial_statements.to_string(),
            statements: statements.to_string(),
            filter: filter.to_string(),
            expressions: expressions.to_string(),
            unwind_lists,
            commit_changes,
            summary_only,
            step: None,
            object_count: 0,
            total_objects: 0,
        }
    }

    pub fn with_step(mut self, step: impl FnMut() -> bool + 'static) -> Engine {
        self.step = Some(Box::new(step));
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Records that passed the filter in the current or last run.
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Size of the scope of the current or last run.
    pub fn total_objects(&self) -> usize {
        self.total_objects
    }

    /// Compiles every fragment, runs the initial statements and returns the
    /// lazy row iterator. Commit mode needs a transaction.
    pub fn get_values(&mut self, transaction: Option<SharedTransaction>) -> Result<Rows<'_>> {
        if self.commit_changes && transaction.is_none() {
            return Err(SupertoolError::Engine(String::from(
                "Need a transaction (check 'Commit changes')",
            )));
        }
        let per_record = self.info.category().is_some();
        let compiled = Compiled {
            statements: if per_record {
                compile(&self.runtime, &self.statements, Mode::Statements)?
            } else {
                None
            },
            filter: if per_record {
                compile(&self.runtime, &self.filter, Mode::Expression)?
            } else {
                None
            },
            expressions: compile(&self.runtime, &self.expressions, Mode::Expression)?,
        };
        let initial = compile(&self.runtime, &self.initial_statements, Mode::Statements)?;

        let mut seed = Context::new();
        seed.insert(
            "trans",
            transaction.clone().map(Value::Transaction).unwrap_or(Value::None),
        );
        seed.insert("uistate", self.ui_state.clone());
        let mut template = context::build(transaction.as_ref(), self.info.category(), &seed, None)?;
        if let Some(initial) = &initial {
            initial.run(&self.runtime, &mut template)?;
        }

        self.object_count = 0;
        self.total_objects = if per_record { self.handles.len() } else { 0 };
        info!(
            category = self.info.objclass().unwrap_or("-"),
            records = self.total_objects,
            commit = self.commit_changes,
            summary = self.summary_only,
            "executing"
        );
        Ok(Rows {
            engine: self,
            transaction,
            compiled,
            template,
            phase: Phase::Records,
            position: 0,
            pending: VecDeque::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Records,
    Summary,
    Done,
}

/// Lazy row stream of one run.
pub struct Rows<'e> {
    engine: &'e mut Engine,
    transaction: Option<SharedTransaction>,
    compiled: Compiled,
    template: Context,
    phase: Phase,
    position: usize,
    pending: VecDeque<Row>,
}

impl Rows<'_> {
    pub fn object_count(&self) -> usize {
        self.engine.object_count
    }

    pub fn total_objects(&self) -> usize {
        self.engine.total_objects
    }

    fn cancelled(&mut self) -> bool {
        match &mut self.engine.step {
            Some(step) => step(),
            None => false,
        }
    }

    fn process(&mut self, category: Category, handle: Handle) -> Result<Vec<Row>> {
        let engine = &mut *self.engine;
        let runtime = &engine.runtime;
        let proxy = Proxy::load(&runtime.db, category, handle)?;
        let mut bound = context::build(self.transaction.as_ref(), Some(category), &self.template, Some(&proxy))?;

        if let Some(statements) = &self.compiled.statements {
            statements.run(runtime, &mut bound)?;
        }
        let passed = match &self.compiled.filter {
            Some(filter) => filter.run(runtime, &mut bound)?.truthy(),
            None => true,
        };
        if engine.commit_changes && proxy.commit_ok() {
            if let Some(transaction) = &self.transaction {
                proxy.commit(&mut transaction.borrow_mut())?;
            }
        }
        if !passed {
            debug!(handle, "filtered out");
            return Ok(Vec::new());
        }
        engine.object_count += 1;
        if engine.summary_only {
            return Ok(Vec::new());
        }
        let Some(expressions) = &self.compiled.expressions else {
            return Ok(Vec::new());
        };
        let result = expressions.run(runtime, &mut bound)?;
        Ok(shape(&result, engine.unwind_lists)
            .into_iter()
            .map(|values| {
                let mut cells = Vec::with_capacity(values.len() + 2);
                cells.push(Cell::Str(proxy.gramps_id().to_string()));
                cells.extend(values);
                cells.push(Cell::Int(handle as i64));
                Row::new(cells)
            })
            .collect())
    }

    fn summarize(&mut self) -> Result<Vec<Row>> {
        let Some(expressions) = &self.compiled.expressions else {
            return Ok(Vec::new());
        };
        let result = expressions.run(&self.engine.runtime, &mut self.template)?;
        Ok(shape(&result, self.engine.unwind_lists)
            .into_iter()
            .map(|values| {
                let mut cells = Vec::with_capacity(values.len() + 2);
                cells.push(Cell::Empty);
                cells.extend(values);
                cells.push(Cell::Empty);
                Row::new(cells)
            })
            .collect())
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            let produced = match self.phase {
                Phase::Done => return None,
                Phase::Records => {
                    let next = self
                        .engine
                        .info
                        .category()
                        .and_then(|c| self.engine.handles.get(self.position).map(|h| (c, *h)));
                    let Some((category, handle)) = next else {
                        self.phase = Phase::Summary;
                        continue;
                    };
                    if self.cancelled() {
                        info!(processed = self.position, "cancelled");
                        self.phase = Phase::Done;
                        return None;
                    }
                    self.position += 1;
                    self.process(category, handle)
                }
                Phase::Summary => {
                    self.phase = Phase::Done;
                    info!(
                        objects = self.engine.object_count,
                        total = self.engine.total_objects,
                        "records processed"
                    );
                    if self.engine.summary_only {
                        self.summarize()
                    } else {
                        Ok(Vec::new())
                    }
                }
            };
            match produced {
                Ok(rows) => self.pending.extend(rows),
                Err(e) => {
                    self.phase = Phase::Done;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(rows: &[Vec<Cell>]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(Cell::to_string).collect())
            .collect()
    }

    #[test]
    fn unwinding_multiplies_rows() {
        let result = Value::tuple(vec![
            Value::list(vec![Value::from("a1"), Value::from("a2")]),
            Value::list(vec![Value::from("b1"), Value::from("b2")]),
        ]);
        let rows = shape(&result, true);
        assert_eq!(
            cells(&rows),
            vec![
                vec!["a1", "b1"],
                vec!["a2", "b1"],
                vec!["a1", "b2"],
                vec!["a2", "b2"]
            ]
        );
    }

    #[test]
    fn empty_list_unwinds_to_nothing() {
        let result = Value::tuple(vec![Value::Int(1), Value::list(Vec::new())]);
        assert!(shape(&result, true).is_empty());
        assert_eq!(shape(&result, false).len(), 1);
    }

    #[test]
    fn cells_keep_numbers_and_render_the_rest() {
        let rows = shape(&Value::tuple(vec![Value::Int(1), Value::Float(2.5), Value::Bool(true), Value::Null]), false);
        assert_eq!(
            rows[0],
            vec![
                Cell::Int(1),
                Cell::Float(2.5),
                Cell::Str(String::from("True")),
                Cell::Str(String::new())
            ]
        );
    }

    #[test]
    fn csv_quotes_only_when_needed() {
        let row = Row::new(vec![
            Cell::Str(String::from("I0001")),
            Cell::Str(String::from("Smith, John")),
            Cell::Str(String::from("say \"hi\"")),
            Cell::Empty,
            Cell::Int(3),
        ]);
        assert_eq!(row.to_csv(','), "I0001,\"Smith, John\",\"say \"\"hi\"\"\",,3");
        assert_eq!(row.to_csv(';'), "I0001;Smith, John;\"say \"\"hi\"\"\";;3");
    }

    #[test]
    fn unknown_category() {
        assert_eq!(
            get_category_info("Widgets").unwrap_err().to_string(),
            "Unknown category 'Widgets'"
        );
        assert_eq!(get_category_info("People").unwrap().category(), Some(Category::Person));
    }
}
