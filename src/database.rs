//! The host database: records kept in memory behind keepers and lookups,
//! durably stored through the [`Persistor`], and changed only through
//! [`Transaction`]s.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

// used to keep the one-to-one mapping between gramps ids and handles
use bimap::BiMap;

use core::hash::BuildHasherDefault;
use std::collections::{HashMap, HashSet};
use seahash::SeaHasher;

// handle sets
use roaring::RoaringTreemap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SupertoolError};
use crate::persist::Persistor;
use crate::record::{Category, Handle, Record};

pub type HandleHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: Handle = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- Handle -------------
#[derive(Debug)]
pub struct HandleGenerator {
    lower_bound: Handle,
    retained: HashSet<Handle, HandleHasher>,
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            retained: HashSet::<Handle, HandleHasher>::default(),
        }
    }
    // Handles restored from storage or imported explicitly must never be handed out again.
    pub fn retain(&mut self, h: Handle) {
        self.retained.insert(h);
        if h > self.lower_bound {
            self.lower_bound = h;
        }
    }
    pub fn check(&self, h: Handle) -> Option<Handle> {
        self.retained.get(&h).cloned()
    }
    pub fn generate(&mut self) -> Handle {
        self.lower_bound += 1;
        self.retained.insert(self.lower_bound);
        self.lower_bound
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Records -------------
#[derive(Debug, Default)]
pub struct RecordKeeper {
    kept: HashMap<Handle, Record, HandleHasher>,
    by_category: HashMap<Category, RoaringTreemap, OtherHasher>,
    gramps_ids: HashMap<Category, BiMap<String, Handle>, OtherHasher>,
}

impl RecordKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    /// Keeps the record under the handle and returns whatever was kept there before.
    pub fn keep(&mut self, handle: Handle, record: Record) -> Option<Record> {
        let category = record.category();
        let previous = self.kept.insert(handle, record);
        if let Some(old) = &previous {
            if old.category() != category {
                if let Some(set) = self.by_category.get_mut(&old.category()) {
                    set.remove(handle);
                }
            }
            if let Some(ids) = self.gramps_ids.get_mut(&old.category()) {
                ids.remove_by_right(&handle);
            }
        }
        self.by_category.entry(category).or_default().insert(handle);
        if let Some(kept) = self.kept.get(&handle) {
            if !kept.gramps_id().is_empty() {
                self.gramps_ids
                    .entry(category)
                    .or_default()
                    .insert(kept.gramps_id().to_string(), handle);
            }
        }
        previous
    }
    /// Removes a record, returning it.
    pub fn forget(&mut self, handle: Handle) -> Option<Record> {
        let previous = self.kept.remove(&handle)?;
        if let Some(set) = self.by_category.get_mut(&previous.category()) {
            set.remove(handle);
        }
        if let Some(ids) = self.gramps_ids.get_mut(&previous.category()) {
            ids.remove_by_right(&handle);
        }
        Some(previous)
    }
    pub fn get(&self, handle: Handle) -> Option<&Record> {
        self.kept.get(&handle)
    }
    pub fn handles(&self, category: Category) -> Vec<Handle> {
        self.by_category
            .get(&category)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }
    pub fn handle_for(&self, category: Category, gramps_id: &str) -> Option<Handle> {
        self.gramps_ids
            .get(&category)
            .and_then(|ids| ids.get_by_left(gramps_id).copied())
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

// ------------- Lookups -------------
/// Maps a handle to the set of handles of records referring to it.
#[derive(Debug)]
pub struct Lookup<H = HandleHasher> {
    index: HashMap<Handle, RoaringTreemap, H>,
}
impl<H: core::hash::BuildHasher + Default> Lookup<H> {
    pub fn new() -> Self {
        Self {
            index: HashMap::<Handle, RoaringTreemap, H>::default(),
        }
    }
    pub fn insert(&mut self, key: Handle, value: Handle) {
        self.index.entry(key).or_default().insert(value);
    }
    pub fn remove(&mut self, key: Handle, value: Handle) {
        if let Some(set) = self.index.get_mut(&key) {
            set.remove(value);
            if set.is_empty() {
                self.index.remove(&key);
            }
        }
    }
    pub fn lookup(&self, key: &Handle) -> RoaringTreemap {
        self.index.get(key).cloned().unwrap_or_default()
    }
}

impl<H: core::hash::BuildHasher + Default> Default for Lookup<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Transaction -------------
/// A batch of commits. Commits are visible in memory at once; `finish` writes
/// them to storage and `abort` restores what was there before.
#[derive(Debug)]
pub struct Transaction {
    title: String,
    undo: Vec<(Handle, Option<Record>)>,
    touched: RoaringTreemap,
    closed: bool,
}

pub type SharedTransaction = Rc<RefCell<Transaction>>;

impl Transaction {
    pub fn title(&self) -> &str {
        &self.title
    }
    /// Number of distinct records committed so far.
    pub fn len(&self) -> usize {
        self.touched.len() as usize
    }
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }
    pub fn shared(self) -> SharedTransaction {
        Rc::new(RefCell::new(self))
    }
}

// ------------- Import -------------
/// One entry of an import file: a JSON array of records with explicit handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedRecord {
    pub handle: Handle,
    pub record: Record,
}

// ------------- Database -------------
pub struct Database {
    // owns a handle generator
    handle_generator: Arc<Mutex<HandleGenerator>>,
    // owns the keeper of records
    record_keeper: Arc<Mutex<RecordKeeper>>,
    // referenced handle -> referring handles
    backlink_lookup: Arc<Mutex<Lookup<HandleHasher>>>,
    // responsible for the the persistence layer
    persistor: Arc<Mutex<Persistor>>,
}

impl Database {
    pub fn new(mode: PersistenceMode) -> Result<Database> {
        let persistor = Persistor::new(&mode)?;
        let database = Database {
            handle_generator: Arc::new(Mutex::new(HandleGenerator::new())),
            record_keeper: Arc::new(Mutex::new(RecordKeeper::new())),
            backlink_lookup: Arc::new(Mutex::new(Lookup::new())),
            persistor: Arc::new(Mutex::new(persistor)),
        };
        // Restore the existing database
        let restored = database.persistor.lock()?.restore_records()?;
        let count = restored.len();
        for (handle, record) in restored {
            database.handle_generator.lock()?.retain(handle);
            database.store(handle, record)?;
        }
        if count > 0 {
            info!(records = count, "restored database");
        }
        Ok(database)
    }

    /// Adds a new record under a freshly generated handle and stores it durably.
    pub fn add(&self, record: Record) -> Result<Handle> {
        let handle = self.handle_generator.lock()?.generate();
        self.insert(handle, record)?;
        Ok(handle)
    }

    /// Adds or replaces a record under an explicit handle, outside any transaction.
    pub fn insert(&self, handle: Handle, record: Record) -> Result<()> {
        self.handle_generator.lock()?.retain(handle);
        self.persistor.lock()?.persist_record(handle, &record)?;
        self.store(handle, record)?;
        Ok(())
    }

    /// Loads records from the JSON text of an import file, replacing records
    /// kept under the same handles.
    pub fn import(&self, text: &str) -> Result<usize> {
        let entries: Vec<ImportedRecord> = serde_json::from_str(text)?;
        let count = entries.len();
        for entry in entries {
            self.insert(entry.handle, entry.record)?;
        }
        info!(records = count, "imported records");
        Ok(count)
    }

    // keeps the record and keeps the backlink index in step with its references
    fn store(&self, handle: Handle, record: Record) -> Result<Option<Record>> {
        let new_refs = record.references();
        let previous = self.record_keeper.lock()?.keep(handle, record);
        self.reindex(handle, previous.as_ref().map(|r| r.references()), &new_refs)?;
        Ok(previous)
    }

    fn reindex(&self, handle: Handle, old_refs: Option<Vec<Handle>>, new_refs: &[Handle]) -> Result<()> {
        let mut lookup = self.backlink_lookup.lock()?;
        for old in old_refs.unwrap_or_default() {
            lookup.remove(old, handle);
        }
        for new in new_refs {
            lookup.insert(*new, handle);
        }
        Ok(())
    }

    pub fn get(&self, category: Category, handle: Handle) -> Result<Record> {
        match self.record_keeper.lock()?.get(handle) {
            Some(record) if record.category() == category => Ok(record.clone()),
            _ => Err(SupertoolError::NotFound { category, handle }),
        }
    }

    /// The record under the handle, whatever its category.
    pub fn record(&self, handle: Handle) -> Result<Option<Record>> {
        Ok(self.record_keeper.lock()?.get(handle).cloned())
    }

    /// All handles of a category in ascending order.
    pub fn handles(&self, category: Category) -> Result<Vec<Handle>> {
        Ok(self.record_keeper.lock()?.handles(category))
    }

    pub fn handle_for(&self, category: Category, gramps_id: &str) -> Result<Option<Handle>> {
        Ok(self.record_keeper.lock()?.handle_for(category, gramps_id))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.record_keeper.lock()?.len())
    }

    /// Records referring to `handle`, restricted to the given categories.
    pub fn find_backlinks(&self, handle: Handle, include: &[Category]) -> Result<Vec<(Category, Handle)>> {
        let referrers = self.backlink_lookup.lock()?.lookup(&handle);
        let keeper = self.record_keeper.lock()?;
        Ok(referrers
            .iter()
            .filter_map(|h| keeper.get(h).map(|r| (r.category(), h)))
            .filter(|(category, _)| include.contains(category))
            .collect())
    }

    pub fn begin(&self, title: &str) -> Transaction {
        debug!(title, "transaction begun");
        Transaction {
            title: title.to_string(),
            undo: Vec::new(),
            touched: RoaringTreemap::new(),
            closed: false,
        }
    }

    /// Replaces the record under `handle` as part of the transaction.
    pub fn commit(&self, transaction: &mut Transaction, handle: Handle, record: Record) -> Result<()> {
        if transaction.closed {
            return Err(SupertoolError::Engine(format!(
                "Transaction '{}' is already closed",
                transaction.title
            )));
        }
        if self.handle_generator.lock()?.check(handle).is_none() {
            return Err(SupertoolError::NotFound {
                category: record.category(),
                handle,
            });
        }
        let previous = self.store(handle, record)?;
        transaction.undo.push((handle, previous));
        transaction.touched.insert(handle);
        debug!(handle, title = %transaction.title, "record committed");
        Ok(())
    }

    /// Writes every record touched by the transaction to storage. When storage
    /// refuses the write the transaction is rolled back in memory as well.
    pub fn finish(&self, transaction: &mut Transaction) -> Result<usize> {
        if transaction.closed {
            return Ok(0);
        }
        let records: Vec<(Handle, Record)> = {
            let keeper = self.record_keeper.lock()?;
            transaction
                .touched
                .iter()
                .filter_map(|h| keeper.get(h).map(|r| (h, r.clone())))
                .collect()
        };
        let persisted = self.persistor.lock()?.persist_records(&records);
        if let Err(e) = persisted {
            error!(title = %transaction.title, error = %e, "transaction could not be persisted");
            self.rollback(transaction)?;
            return Err(e);
        }
        transaction.closed = true;
        transaction.undo.clear();
        info!(title = %transaction.title, records = records.len(), "transaction finished");
        Ok(records.len())
    }

    /// Restores every record the transaction touched to its state before the transaction.
    pub fn abort(&self, transaction: &mut Transaction) -> Result<()> {
        if transaction.closed {
            return Ok(());
        }
        self.rollback(transaction)?;
        warn!(title = %transaction.title, "transaction aborted");
        Ok(())
    }

    // undoes the commits newest first and closes the transaction
    fn rollback(&self, transaction: &mut Transaction) -> Result<()> {
        while let Some((handle, previous)) = transaction.undo.pop() {
            match previous {
                Some(record) => {
                    self.store(handle, record)?;
                }
                None => {
                    let removed = self.record_keeper.lock()?.forget(handle);
                    self.reindex(handle, removed.map(|r| r.references()), &[])?;
                }
            }
        }
        transaction.closed = true;
        Ok(())
    }
}
