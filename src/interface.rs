//! Running stored queries, in the foreground or on a background thread.
//!
//! The runner resolves the scope of a [`Query`] to handles, opens a
//! transaction when the query commits changes, drives the
//! [`Engine`](crate::engine::Engine) up to the row limit and reports the
//! outcome. Background runs use cooperative cancellation through a shared
//! `Arc<AtomicBool>` checked between records.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::database::SharedTransaction;
use crate::engine::{self, CategoryInfo, Engine, Row};
use crate::error::{Result, SupertoolError};
use crate::filters::CustomFilter;
use crate::query::{Query, Scope};
use crate::record::Handle;
use crate::script::Runtime;
use crate::settings::DEFAULT_ROW_LIMIT;
use crate::value::{Dict, Value};

/// Cancellation token shared with the worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Opaque query identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

impl QueryId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// The records the host has on screen: the ones the user selected and the
/// ones the current view filter lets through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub selected: Vec<Handle>,
    pub filtered: Vec<Handle>,
}

impl Selection {
    fn ui_state(&self, category: &CategoryInfo) -> Result<Value> {
        let handles = |hs: &[Handle]| Value::list(hs.iter().map(|h| Value::Int(*h as i64)).collect());
        let mut state = Dict::new();
        state.insert(
            Value::from("category"),
            category.category().map(|c| Value::from(c.name())).unwrap_or(Value::None),
        )?;
        state.insert(Value::from("selected"), handles(&self.selected))?;
        state.insert(Value::from("filtered"), handles(&self.filtered))?;
        Ok(Value::dict(state))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Empty when the rows were streamed.
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub object_count: usize,
    pub total_objects: usize,
    pub limited: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl QueryOutcome {
    pub fn status(&self) -> String {
        format!(
            "Objects: {}/{}; rows: {} ({:.2}s)",
            self.object_count,
            self.total_objects,
            self.row_count,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Handle to a running or completed background query.
pub struct QueryHandle {
    pub id: QueryId,
    cancel: CancelToken,
    started: Instant,
    join: Option<JoinHandle<Result<QueryOutcome>>>,
    pub results: Option<Receiver<Row>>, // None when rows are collected into the outcome
}
impl QueryHandle {
    /// Request cancellation. The worker stops before the next record.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    /// Waits for the query to finish.
    pub fn join(mut self) -> Result<QueryOutcome> {
        match self.join.take() {
            Some(j) => j
                .join()
                .map_err(|_| SupertoolError::Invariant(String::from("query worker panicked")))?,
            None => Err(SupertoolError::Invariant(String::from("query already joined"))),
        }
    }
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Query submission options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub stream_results: bool,
    pub timeout: Option<Duration>,
    pub row_limit: usize,
}
impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stream_results: true,
            timeout: None,
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

/// Registry managing query lifecycles.
pub struct QueryInterface {
    runtime: Runtime,
    next_id: Mutex<u64>,
    active: Arc<Mutex<HashMap<QueryId, CancelToken>>>, // for external cancellation
}

impl QueryInterface {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            next_id: Mutex::new(0),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn allocate_id(&self) -> Result<QueryId> {
        let mut g = self.next_id.lock()?;
        *g += 1;
        Ok(QueryId(*g))
    }

    /// Runs the query on the current thread and collects its rows.
    pub fn run(&self, query: &Query, selection: &Selection) -> Result<QueryOutcome> {
        let options = QueryOptions {
            stream_results: false,
            ..QueryOptions::default()
        };
        self.run_with(query, selection, &options, &CancelToken::new())
    }

    pub fn run_with(
        &self,
        query: &Query,
        selection: &Selection,
        options: &QueryOptions,
        cancel: &CancelToken,
    ) -> Result<QueryOutcome> {
        let mut rows = Vec::new();
        let mut outcome = execute(&self.runtime, query, selection, options, cancel, |row| {
            rows.push(row);
            true
        })?;
        outcome.rows = rows;
        Ok(outcome)
    }

    /// Submits the query for execution on a background thread. With
    /// `options.stream_results` rows arrive on `results` as they are produced.
    pub fn start_query(&self, query: Query, selection: Selection, options: QueryOptions) -> Result<QueryHandle> {
        let id = self.allocate_id()?;
        let cancel = CancelToken::new();
        self.active.lock()?.insert(id, cancel.clone());

        let (tx, rx) = if options.stream_results {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let runtime = self.runtime.clone();
        let active = Arc::clone(&self.active);
        let cancel_for_thread = cancel.clone();
        let join = std::thread::spawn(move || {
            let mut collected = Vec::new();
            let result = execute(&runtime, &query, &selection, &options, &cancel_for_thread, |row| match &tx {
                // a dropped receiver stops the run
                Some(tx) => tx.send(row).is_ok(),
                None => {
                    collected.push(row);
                    true
                }
            });
            if let Ok(mut active) = active.lock() {
                active.remove(&id);
            }
            result.map(|mut outcome| {
                outcome.rows = collected;
                outcome
            })
        });

        Ok(QueryHandle {
            id,
            cancel,
            started: Instant::now(),
            join: Some(join),
            results: rx,
        })
    }

    /// Runs the query over every record of `category` inside a single
    /// transaction, whether or not it commits, handing each row to `sink`.
    /// Returns the number of rows.
    pub fn generate(&self, query: &Query, category: &str, mut sink: impl FnMut(&Row) -> Result<()>) -> Result<usize> {
        let info = engine::get_category_info(category)?;
        let handles = info.all_handles(&self.runtime.db)?;
        let mut engine = Engine::new(
            self.runtime.clone(),
            Value::None,
            info,
            handles,
            &query.initial_statements,
            &query.statements,
            &query.filter,
            &query.expressions,
            query.unwind_lists,
            query.commit_changes,
            query.summary_only,
        );
        let transaction = self.runtime.db.begin("Generating values").shared();
        let written = (|| -> Result<usize> {
            let mut count = 0;
            for row in engine.get_values(Some(transaction.clone()))? {
                sink(&row?)?;
                count += 1;
            }
            Ok(count)
        })();
        let mut transaction = transaction.borrow_mut();
        match &written {
            Ok(_) => {
                self.runtime.db.finish(&mut transaction)?;
            }
            Err(_) => self.runtime.db.abort(&mut transaction)?,
        }
        written
    }

    /// Cancel a query by id.
    pub fn cancel(&self, id: QueryId) -> Result<bool> {
        match self.active.lock()?.get(&id) {
            Some(token) => {
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stores the query's filter, with its statements, as a custom filter
    /// named after the query's title.
    pub fn save_as_filter(&self, query: &Query) -> Result<CustomFilter> {
        let info = engine::get_category_info(&query.category)?;
        let namespace = info
            .objclass()
            .ok_or_else(|| SupertoolError::Engine(String::from("No category name specified")))?;
        let name = query.title.trim();
        if name.is_empty() {
            return Err(SupertoolError::Engine(String::from("Please supply a title/name")));
        }
        let condition = query.filter.trim();
        if condition.is_empty() {
            return Err(SupertoolError::Engine(String::from(
                "Please supply a filtering condition",
            )));
        }
        let filter = CustomFilter {
            namespace: namespace.to_string(),
            name: name.to_string(),
            comment: String::new(),
            initial_statements: query.initial_statements.trim().to_string(),
            statements: query.statements.trim().to_string(),
            expression: condition.to_string(),
        };
        self.runtime.filters.save_filter(filter.clone())?;
        info!(filter = %filter.name, namespace, "Created filter {}", filter.name);
        Ok(filter)
    }
}

/// The title of the transaction a committing run executes in.
pub fn transaction_title(query: &Query) -> String {
    let title = query.title.trim();
    if title.is_empty() {
        String::from("Executing SuperTool")
    } else {
        format!("Executing SuperTool ({title})")
    }
}

fn scope_handles(runtime: &Runtime, info: &CategoryInfo, query: &Query, selection: &Selection) -> Result<Vec<Handle>> {
    if info.category().is_none() {
        return Ok(Vec::new());
    }
    match query.scope {
        Scope::All => info.all_handles(&runtime.db),
        Scope::Filtered => Ok(selection.filtered.clone()),
        Scope::Selected => Ok(selection.selected.clone()),
    }
}

// Hands every row to `sink` until the limit is reached or `sink` returns false.
fn execute(
    runtime: &Runtime,
    query: &Query,
    selection: &Selection,
    options: &QueryOptions,
    cancel: &CancelToken,
    mut sink: impl FnMut(Row) -> bool,
) -> Result<QueryOutcome> {
    let started = Instant::now();
    let info = if query.category.trim().is_empty() {
        CategoryInfo::none()
    } else {
        engine::get_category_info(&query.category)?
    };
    let handles = scope_handles(runtime, &info, query, selection)?;
    let token = cancel.clone();
    let deadline = options.timeout.map(|t| started + t);
    let mut engine = Engine::new(
        runtime.clone(),
        selection.ui_state(&info)?,
        info,
        handles,
        &query.initial_statements,
        &query.statements,
        &query.filter,
        &query.expressions,
        query.unwind_lists,
        query.commit_changes,
        query.summary_only,
    )
    .with_step(move || token.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d));

    let transaction: Option<SharedTransaction> = query
        .commit_changes
        .then(|| runtime.db.begin(&transaction_title(query)).shared());

    let pulled = pull(&mut engine, transaction.clone(), options.row_limit, &mut sink);
    if let Some(transaction) = &transaction {
        let mut transaction = transaction.borrow_mut();
        match &pulled {
            Ok(_) => {
                runtime.db.finish(&mut transaction)?;
            }
            Err(e) => {
                warn!(error = %e, "run failed, rolling back");
                runtime.db.abort(&mut transaction)?;
            }
        }
    }
    let (row_count, limited) = pulled?;
    let outcome = QueryOutcome {
        rows: Vec::new(),
        row_count,
        object_count: engine.object_count(),
        total_objects: engine.total_objects(),
        limited,
        cancelled: cancel.is_cancelled(),
        elapsed: started.elapsed(),
    };
    info!(title = %query.title, status = %outcome.status(), limited, "query complete");
    Ok(outcome)
}

fn pull(
    engine: &mut Engine,
    transaction: Option<SharedTransaction>,
    limit: usize,
    sink: &mut impl FnMut(Row) -> bool,
) -> Result<(usize, bool)> {
    let mut count = 0;
    for row in engine.get_values(transaction)? {
        count += 1;
        if !sink(row?) {
            break;
        }
        if count >= limit {
            warn!(limit, "Limit of {} rows reached", limit);
            return Ok((count, true));
        }
    }
    Ok((count, false))
}
