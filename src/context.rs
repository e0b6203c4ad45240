//! The evaluation context: every name a script can see while a record is
//! processed.

use std::collections::HashMap;

use crate::database::{OtherHasher, SharedTransaction};
use crate::error::Result;
use crate::proxy::{registry, Proxy};
use crate::record::Category;
use crate::script::builtins;
use crate::value::{Module, TypeRef, Value};

pub type Bindings = HashMap<String, Value, OtherHasher>;

#[derive(Clone, Default)]
pub struct Context {
    bindings: Bindings,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
    pub fn insert(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
    pub fn len(&self) -> usize {
        self.bindings.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
    /// Layers `other` on top; its bindings win.
    pub fn extend(&mut self, other: &Context) {
        for (name, value) in &other.bindings {
            self.bindings.insert(name.clone(), value.clone());
        }
    }
}

const TYPE_NAMES: &[(&str, TypeRef)] = &[
    ("Person", TypeRef::Category(Category::Person)),
    ("Family", TypeRef::Category(Category::Family)),
    ("Event", TypeRef::Category(Category::Event)),
    ("Place", TypeRef::Category(Category::Place)),
    ("Citation", TypeRef::Category(Category::Citation)),
    ("Source", TypeRef::Category(Category::Source)),
    ("Repository", TypeRef::Category(Category::Repository)),
    ("Note", TypeRef::Category(Category::Note)),
    ("Media", TypeRef::Category(Category::Media)),
    ("NameType", TypeRef::NameType),
    ("PlaceType", TypeRef::PlaceType),
    ("EventType", TypeRef::EventType),
];

/// Builds the context for one evaluation. Layers, later ones winning:
/// helpers and type names, the proxy's attributes, `self`, `filter`,
/// `trans`, `injected`, and finally `env`, the context itself. The database
/// behind `db` and `filter` is the one of the running [`Runtime`](crate::script::Runtime).
pub fn build(
    transaction: Option<&SharedTransaction>,
    category: Option<Category>,
    injected: &Context,
    proxy: Option<&Proxy>,
) -> Result<Context> {
    let mut context = Context::new();
    for (name, func) in builtins::HELPERS {
        context.insert(name, Value::builtin(*name, *func));
    }
    context.insert("re", Value::Module(Module::Re));
    context.insert("db", Value::Module(Module::Db));
    context.insert("collections", Value::Module(Module::Collections));
    for (name, type_ref) in TYPE_NAMES {
        context.insert(name, Value::Type(*type_ref));
    }
    if let Some(proxy) = proxy {
        for def in registry(proxy.category()) {
            context.insert(def.name, (def.get)(proxy)?);
        }
        context.insert("self", Value::Proxy(proxy.clone()));
    }
    if let Some(category) = category.or(proxy.map(Proxy::category)) {
        context.insert("filter", Value::FilterLookup(category));
    }
    if let Some(transaction) = transaction {
        context.insert("trans", Value::Transaction(transaction.clone()));
    }
    context.extend(injected);
    context.insert("env", Value::Env);
    Ok(context)
}
