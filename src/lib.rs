//! SuperTool – a query and scripting engine for genealogy databases.
//!
//! A query is a handful of small script fragments evaluated against the
//! records of one category (people, families, events, places, sources,
//! citations, repositories, notes or media):
//! * the *initial statements* run once and seed every record's bindings,
//! * the *statements* run per record and may change it,
//! * the *filter* decides whether a record contributes,
//! * the *expressions* produce the values of the record's result rows.
//!
//! Records are reached through proxies ([`proxy::Proxy`]) whose attributes
//! (`name`, `birth.date.year`, `father.parent_families`, ...) are computed
//! from the host database. Missing relationships yield [`value::Value::Null`],
//! which absorbs further attribute access so chained paths never fail.
//!
//! ## Modules
//! * [`record`] – Native records, categories and genealogical dates.
//! * [`database`] – The host database: keepers, backlinks and transactions.
//! * [`persist`] – SQLite persistence & restoration layer.
//! * [`value`] – Dynamic values of the script language.
//! * [`proxy`] – Per-category attribute registries over records.
//! * [`context`] – Building the bindings a fragment is evaluated in.
//! * [`script`] – The script language: layout, grammar, interpreter, builtins.
//! * [`filters`] – Stored custom filters, usable from scripts.
//! * [`engine`] – The per-record pipeline and result shaping.
//! * [`query`] – Stored queries in block or JSON files.
//! * [`settings`] – Layered configuration.
//! * [`interface`] – Foreground and background query runs with cancellation.
//! * [`server`] – HTTP endpoint for running queries.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use supertool::database::{Database, PersistenceMode};
//! use supertool::filters::FilterStore;
//! use supertool::interface::{QueryInterface, Selection};
//! use supertool::query::{Query, Scope};
//! use supertool::record::{Gender, Name, Person, Record};
//! use supertool::script::{IncludePath, Runtime};
//!
//! let db = Arc::new(Database::new(PersistenceMode::InMemory).unwrap());
//! db.add(Record::Person(Person {
//!     gramps_id: "I0001".into(),
//!     gender: Gender::Female,
//!     primary_name: Name::new("Anna", "Berg"),
//!     ..Person::default()
//! }))
//! .unwrap();
//! let runtime = Runtime::new(db, FilterStore::default(), IncludePath::new(Vec::new()));
//! let query = Query {
//!     category: "People".into(),
//!     expressions: "name, gender".into(),
//!     scope: Scope::All,
//!     ..Query::default()
//! };
//! let outcome = QueryInterface::new(runtime).run(&query, &Selection::default()).unwrap();
//! assert_eq!(outcome.rows[0].to_strings(), vec!["I0001", "Berg, Anna", "F", "1"]);
//! ```

pub mod context;
pub mod database;
pub mod engine;
pub mod error;
pub mod filters;
pub mod interface;
pub mod persist;
pub mod proxy;
pub mod query;
pub mod record;
pub mod script;
pub mod server;
pub mod settings;
pub mod value;
