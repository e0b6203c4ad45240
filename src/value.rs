//! Dynamic values of the script language.
//!
//! `Value::Null` is the null-safe reference: the stand-in for a relationship
//! that is not there. It absorbs attribute access, calls, indexing and
//! addition, iterates as empty, is falsy, renders as `""` and compares false.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::context::Bindings;
use crate::database::SharedTransaction;
use crate::error::{Result, SupertoolError};
use crate::filters::CustomFilter;
use crate::proxy::Proxy;
use crate::record::{Category, Date, Handle};
use crate::script::ast::FunctionDef;
use crate::script::interpreter::Interpreter;

#[derive(Clone)]
pub enum Value {
    None,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Date(Date),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Proxy(Proxy),
    Builtin(Builtin),
    Function(Rc<Function>),
    Method(Rc<Method>),
    Module(Module),
    Type(TypeRef),
    /// `filter`, bound to the namespace of the current category.
    FilterLookup(Category),
    Filter(Rc<CustomFilter>),
    Transaction(SharedTransaction),
    Match(Rc<RegexMatch>),
    /// A part of a record that is not a record itself, such as a name.
    Object(Rc<Object>),
    /// `env`, the namespace of the running script.
    Env,
}

// ------------- Callables -------------
pub type BuiltinFn = fn(&mut Interpreter<'_>, Arguments) -> Result<Value>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// A user defined function or lambda. Defaults are evaluated when defined;
/// `captured` holds the locals of the enclosing function, if any.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub captured: Option<Bindings>,
}

/// A method looked up on a value, waiting to be called.
pub struct Method {
    pub receiver: Value,
    pub name: Rc<str>,
}

/// Result of a successful `re.match` or `re.search`. Group 0 is the whole match.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    pub groups: Vec<Option<String>>,
    pub start: usize,
    pub end: usize,
}

/// Read-only fields with a fixed text form.
pub struct Object {
    pub kind: &'static str,
    pub fields: Vec<(&'static str, Value)>,
    pub text: String,
}

impl Object {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Re,
    Db,
    Collections,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    Category(Category),
    NameType,
    PlaceType,
    EventType,
}

const PERSON_CONSTANTS: &[(&str, &str)] = &[("MALE", "M"), ("FEMALE", "F"), ("UNKNOWN", "U")];
const NAME_TYPES: &[(&str, &str)] = &[
    ("BIRTH", "Birth Name"),
    ("MARRIED", "Married Name"),
    ("AKA", "Also Known As"),
    ("UNKNOWN", "Unknown"),
];
const PLACE_TYPES: &[(&str, &str)] = &[
    ("COUNTRY", "Country"),
    ("STATE", "State"),
    ("COUNTY", "County"),
    ("CITY", "City"),
    ("PARISH", "Parish"),
    ("LOCALITY", "Locality"),
    ("STREET", "Street"),
    ("PROVINCE", "Province"),
    ("REGION", "Region"),
    ("DEPARTMENT", "Department"),
    ("NEIGHBORHOOD", "Neighborhood"),
    ("DISTRICT", "District"),
    ("BOROUGH", "Borough"),
    ("MUNICIPALITY", "Municipality"),
    ("TOWN", "Town"),
    ("VILLAGE", "Village"),
    ("HAMLET", "Hamlet"),
    ("FARM", "Farm"),
    ("BUILDING", "Building"),
    ("NUMBER", "Number"),
    ("UNKNOWN", "Unknown"),
];
const EVENT_TYPES: &[(&str, &str)] = &[
    ("BIRTH", "Birth"),
    ("DEATH", "Death"),
    ("BAPTISM", "Baptism"),
    ("CHRISTEN", "Christening"),
    ("BURIAL", "Burial"),
    ("CREMATION", "Cremation"),
    ("MARRIAGE", "Marriage"),
    ("ENGAGEMENT", "Engagement"),
    ("DIVORCE", "Divorce"),
    ("CENSUS", "Census"),
    ("RESIDENCE", "Residence"),
    ("OCCUPATION", "Occupation"),
    ("EMIGRATION", "Emigration"),
    ("IMMIGRATION", "Immigration"),
    ("EDUCATION", "Education"),
    ("GRADUATION", "Graduation"),
    ("PROBATE", "Probate"),
    ("CONFIRMATION", "Confirmation"),
    ("UNKNOWN", "Unknown"),
];

impl TypeRef {
    pub fn name(&self) -> &'static str {
        match self {
            TypeRef::Category(c) => c.namespace(),
            TypeRef::NameType => "NameType",
            TypeRef::PlaceType => "PlaceType",
            TypeRef::EventType => "EventType",
        }
    }
    pub fn constant(&self, name: &str) -> Option<Value> {
        let table = match self {
            TypeRef::Category(Category::Person) => PERSON_CONSTANTS,
            TypeRef::Category(_) => &[],
            TypeRef::NameType => NAME_TYPES,
            TypeRef::PlaceType => PLACE_TYPES,
            TypeRef::EventType => EVENT_TYPES,
        };
        table
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| Value::from(*v))
    }
}

// ------------- Arguments -------------
#[derive(Default)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.positional.len()
    }
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }
    /// Checks the positional count and rejects keywords not in `keywords`.
    pub fn expect(&self, name: &str, min: usize, max: usize, keywords: &[&str]) -> Result<()> {
        let n = self.positional.len();
        if n < min || n > max {
            let wanted = if min == max {
                format!("{min}")
            } else {
                format!("from {min} to {max}")
            };
            return Err(SupertoolError::Type(format!(
                "{name}() takes {wanted} positional arguments but {n} were given"
            )));
        }
        if let Some((k, _)) = self.keywords.iter().find(|(k, _)| !keywords.contains(&k.as_str())) {
            return Err(SupertoolError::Type(format!(
                "{name}() got an unexpected keyword argument '{k}'"
            )));
        }
        Ok(())
    }
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
    /// Positional argument `index`, else the keyword `name`.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.get(index).or_else(|| self.keyword(name))
    }
}

// ------------- Dict -------------
/// Hashable form of a value, used as dictionary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Date(Date),
    Tuple(Vec<Key>),
    Object(Category, Handle),
}

impl Key {
    pub fn from_value(value: &Value) -> Result<Key> {
        Ok(match value {
            Value::None | Value::Null => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Key::Int(*f as i64),
            Value::Str(s) => Key::Str(Rc::clone(s)),
            Value::Date(d) => Key::Date(*d),
            Value::Tuple(items) => Key::Tuple(items.iter().map(Key::from_value).collect::<Result<_>>()?),
            Value::Proxy(p) => Key::Object(p.category(), p.handle()),
            other => {
                return Err(SupertoolError::Type(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )));
            }
        })
    }
}

/// Insertion keeps the original key value so keys come back as they went in.
#[derive(Default, Clone)]
pub struct Dict {
    entries: BTreeMap<Key, (Value, Value)>,
    default_factory: Option<Value>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }
    /// A `defaultdict`: reading a missing key stores and returns `factory()`.
    pub fn with_default(factory: Value) -> Self {
        Self {
            entries: BTreeMap::new(),
            default_factory: Some(factory),
        }
    }
    pub fn default_factory(&self) -> Option<&Value> {
        self.default_factory.as_ref()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        Ok(self.entries.get(&Key::from_value(key)?).map(|(_, v)| v.clone()))
    }
    pub fn contains(&self, key: &Value) -> Result<bool> {
        Ok(self.entries.contains_key(&Key::from_value(key)?))
    }
    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        self.entries.insert(Key::from_value(&key)?, (key, value));
        Ok(())
    }
    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>> {
        Ok(self.entries.remove(&Key::from_value(key)?).map(|(_, v)| v))
    }
    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }
    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }
    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }
}

// ------------- Value -------------
impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }
    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }
    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }
    pub fn builtin(name: &'static str, func: BuiltinFn) -> Value {
        Value::Builtin(Builtin { name, func })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Null => "NullProxy",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Date(_) => "Date",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Proxy(p) => p.category().namespace(),
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Function(_) => "function",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
            Value::Type(_) => "type",
            Value::FilterLookup(_) | Value::Filter(_) => "filter",
            Value::Transaction(_) => "transaction",
            Value::Match(_) => "Match",
            Value::Object(o) => o.kind,
            Value::Env => "dict",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The quoted form used inside containers and by `repr`.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => {
                let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
                let mut out = String::with_capacity(s.len() + 2);
                out.push(quote);
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c if c == quote => {
                            out.push('\\');
                            out.push(c);
                        }
                        c => out.push(c),
                    }
                }
                out.push(quote);
                out
            }
            other => other.to_string(),
        }
    }

    // ------------- Comparison -------------
    /// Equality as `==` sees it.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || sequence_equals(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => sequence_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.items().iter().all(|(k, v)| {
                        matches!(b.get(k), Ok(Some(w)) if v.equals(&w))
                    })
            }
            (Value::Proxy(a), Value::Proxy(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::FilterLookup(a), Value::FilterLookup(b)) => a == b,
            (Value::Transaction(a), Value::Transaction(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Object(a), Value::Object(b)) => {
                a.kind == b.kind
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|((n, x), (m, y))| n == m && x.equals(y))
            }
            (Value::Env, Value::Env) => true,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering for `<`, `<=`, `>` and `>=`. `None` means the comparison is
    /// false whichever way it is asked, as for the null reference.
    pub fn compare(&self, other: &Value, op: &str) -> Result<Option<Ordering>> {
        let ordering = match (self, other) {
            (Value::Null, _) | (_, Value::Null) => return Ok(None),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Date(a), Value::Int(y)) => a.cmp(&Date::new(*y as i32, 0, 0)),
            (Value::Int(y), Value::Date(b)) => Date::new(*y as i32, 0, 0).cmp(b),
            (Value::Date(_), _) | (_, Value::Date(_)) => return Ok(None),
            (Value::List(a), Value::List(b)) => compare_sequences(&a.borrow(), &b.borrow(), op)?,
            (Value::Tuple(a), Value::Tuple(b)) => compare_sequences(a, b, op)?,
            (Value::Proxy(a), Value::Proxy(b)) => a.cmp(b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => match x.partial_cmp(&y) {
                    Some(o) => o,
                    None => return Ok(None),
                },
                _ => {
                    return Err(SupertoolError::Type(format!(
                        "'{}' not supported between instances of '{}' and '{}'",
                        op,
                        a.type_name(),
                        b.type_name()
                    )));
                }
            },
        };
        Ok(Some(ordering))
    }

    // values of different ranks never compare with each other when sorting
    fn sort_rank(&self) -> u8 {
        match self {
            Value::None | Value::Null => 0,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Date(_) => 1,
            Value::Str(_) => 2,
            Value::Tuple(_) => 3,
            Value::List(_) => 4,
            Value::Proxy(_) => 5,
            _ => 6,
        }
    }

    // dates sort among numbers by their year, after a number of the same value
    fn numeric_sort_key(&self) -> Option<(f64, Option<Date>)> {
        match self {
            Value::Bool(b) => Some((*b as i64 as f64, None)),
            Value::Int(i) => Some((*i as f64, None)),
            Value::Float(f) => Some((*f, None)),
            Value::Date(d) => Some((d.year as f64, Some(*d))),
            _ => None,
        }
    }

    /// Total ordering used by `sorted`, `min` and `max`. `None` and the null
    /// reference sort before everything else, then numbers and dates, strings,
    /// tuples, lists and records.
    pub fn sort_order(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => sort_sequences(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => sort_sequences(a, b),
            (Value::Proxy(a), Value::Proxy(b)) => a.cmp(b),
            (a, b) => match (a.numeric_sort_key(), b.numeric_sort_key()) {
                (Some((x, dx)), Some((y, dy))) => x.total_cmp(&y).then_with(|| dx.cmp(&dy)),
                _ => a.sort_rank().cmp(&b.sort_rank()),
            },
        }
    }

    /// Fails the way `<` would when `keys` mix types that do not order
    /// against each other. `None` and the null reference mix with anything.
    pub fn check_sortable(keys: &[Value]) -> Result<()> {
        let mut first: Option<&Value> = None;
        for key in keys.iter().filter(|k| k.sort_rank() != 0) {
            match first {
                None => first = Some(key),
                Some(seen) if seen.sort_rank() != key.sort_rank() || key.sort_rank() == 6 => {
                    return Err(SupertoolError::Type(format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        key.type_name(),
                        seen.type_name()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// `self in container`
    pub fn contained_in(&self, container: &Value) -> Result<bool> {
        match container {
            Value::Null => Ok(false),
            Value::Str(haystack) => match self {
                Value::Str(needle) => Ok(haystack.contains(&**needle)),
                other => Err(SupertoolError::Type(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(self))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(self))),
            Value::Dict(d) => d.borrow().contains(self),
            other => Err(SupertoolError::Type(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    // ------------- Arithmetic -------------
    pub fn add(&self, other: &Value) -> Result<Value> {
        Ok(match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Value::Null,
            (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(*b).ok_or_else(|| overflow("integer addition"))?),
            (Value::Str(a), Value::Str(b)) => Value::from(format!("{a}{b}")),
            (Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Value::list(items)
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                Value::tuple(a.iter().chain(b.iter()).cloned().collect())
            }
            (Value::Date(d), Value::Int(years)) => Value::Date(d.add_years(*years)),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => number(a, b, x + y),
                _ => return Err(unsupported("+", a, b)),
            },
        })
    }

    pub fn sub(&self, other: &Value) -> Result<Value> {
        Ok(match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Value::Int(0),
            (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_sub(*b).ok_or_else(|| overflow("integer subtraction"))?),
            (Value::Date(a), Value::Date(b)) => Value::Int(a.years_since(b)),
            (Value::Date(d), Value::Int(years)) => Value::Date(d.add_years(years.saturating_neg())),
            (Value::Date(_), _) => Value::Null,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => number(a, b, x - y),
                _ => return Err(unsupported("-", a, b)),
            },
        })
    }

    pub fn mul(&self, other: &Value) -> Result<Value> {
        Ok(match (self, other) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_mul(*b).ok_or_else(|| overflow("integer multiplication"))?),
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                let count = repeat_count(s.len(), *n)?;
                Value::from(s.repeat(count))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
                let items = items.borrow();
                let count = repeat_count(items.len(), *n)?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Value::list(out)
            }
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => number(a, b, x * y),
                _ => return Err(unsupported("*", a, b)),
            },
        })
    }

    pub fn div(&self, other: &Value) -> Result<Value> {
        match (self.as_number(), other.as_number()) {
            (Some(_), Some(y)) if y == 0.0 => Err(zero_division()),
            (Some(x), Some(y)) => Ok(Value::Float(x / y)),
            _ => Err(unsupported("/", self, other)),
        }
    }

    pub fn floordiv(&self, other: &Value) -> Result<Value> {
        match (self.as_int(), other.as_int()) {
            (Some(_), Some(0)) => Err(zero_division()),
            (Some(a), Some(b)) => {
                let (q, r) = a
                    .checked_div_euclid(b)
                    .zip(a.checked_rem_euclid(b))
                    .ok_or_else(|| overflow("integer division"))?;
                Ok(Value::Int(q - if r != 0 && b < 0 { 1 } else { 0 }))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(_), Some(y)) if y == 0.0 => Err(zero_division()),
                (Some(x), Some(y)) => Ok(Value::Float((x / y).floor())),
                _ => Err(unsupported("//", self, other)),
            },
        }
    }

    pub fn modulo(&self, other: &Value) -> Result<Value> {
        match (self.as_int(), other.as_int()) {
            (Some(_), Some(0)) => Err(zero_division()),
            (Some(a), Some(b)) => {
                let r = a.checked_rem(b).ok_or_else(|| overflow("integer modulo"))?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(_), Some(y)) if y == 0.0 => Err(zero_division()),
                (Some(x), Some(y)) => Ok(Value::Float(x - y * (x / y).floor())),
                _ => Err(unsupported("%", self, other)),
            },
        }
    }

    pub fn neg(&self) -> Result<Value> {
        match self {
            Value::Int(i) => Ok(Value::Int(i.checked_neg().ok_or_else(|| overflow("integer negation"))?)),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Null => Ok(Value::Null),
            other => Err(SupertoolError::Type(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        }
    }
}

fn sort_sequences(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.sort_order(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

fn sequence_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn compare_sequences(a: &[Value], b: &[Value], op: &str) -> Result<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if x.equals(y) {
            continue;
        }
        return Ok(x.compare(y, op)?.unwrap_or(Ordering::Equal));
    }
    Ok(a.len().cmp(&b.len()))
}

// int op int stays an int, anything involving a float becomes a float
fn number(a: &Value, b: &Value, result: f64) -> Value {
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        Value::Float(result)
    } else {
        Value::Int(result as i64)
    }
}

fn unsupported(op: &str, a: &Value, b: &Value) -> SupertoolError {
    SupertoolError::Type(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

/// Longest string or list a script may build by repetition.
pub const MAX_SEQUENCE_LEN: usize = 1 << 26;

pub fn overflow(what: &str) -> SupertoolError {
    SupertoolError::Script(format!("OverflowError: {what} result too large"))
}

pub fn memory_error() -> SupertoolError {
    SupertoolError::Script(String::from("MemoryError"))
}

// number of repetitions for `seq * n`, refusing results past MAX_SEQUENCE_LEN
fn repeat_count(len: usize, n: i64) -> Result<usize> {
    let count = usize::try_from(n.max(0)).map_err(|_| memory_error())?;
    match len.checked_mul(count) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(count),
        _ => Err(memory_error()),
    }
}

fn zero_division() -> SupertoolError {
    SupertoolError::Script(String::from("ZeroDivisionError: division by zero"))
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        String::from("nan")
    } else if f.is_infinite() {
        String::from(if f > 0.0 { "inf" } else { "-inf" })
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{d}"),
            Value::List(items) => write_sequence(f, "[", &items.borrow(), "]"),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0].repr()),
            Value::Tuple(items) => write_sequence(f, "(", items, ")"),
            Value::Dict(d) => {
                let parts: Vec<String> = d
                    .borrow()
                    .items()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Proxy(p) => write!(f, "{p}"),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name),
            Value::Function(func) => write!(f, "<function {}>", func.def.name),
            Value::Method(m) => write!(f, "<method {} of {}>", m.name, m.receiver.type_name()),
            Value::Module(Module::Re) => f.write_str("<module 're'>"),
            Value::Module(Module::Db) => f.write_str("<database>"),
            Value::Module(Module::Collections) => f.write_str("<module 'collections'>"),
            Value::Type(t) => write!(f, "<class '{}'>", t.name()),
            Value::FilterLookup(c) => write!(f, "<filter lookup {}>", c.namespace()),
            Value::Filter(filter) => write!(f, "<filter '{}'>", filter.name),
            Value::Transaction(t) => write!(f, "<transaction '{}'>", t.borrow().title()),
            Value::Match(m) => write!(
                f,
                "<re.Match object; span=({}, {}), match={}>",
                m.start,
                m.end,
                Value::from(m.groups.first().cloned().flatten().unwrap_or_default()).repr()
            ),
            Value::Object(o) => f.write_str(&o.text),
            Value::Env => f.write_str("<env>"),
        }
    }
}

fn write_sequence(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    let parts: Vec<String> = items.iter().map(Value::repr).collect();
    write!(f, "{}{}{}", open, parts.join(", "), close)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<Date> for Value {
    fn from(d: Date) -> Self {
        Value::Date(d)
    }
}
impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}
impl From<Option<Proxy>> for Value {
    fn from(p: Option<Proxy>) -> Self {
        p.map(Value::Proxy).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_absorbs_arithmetic() {
        assert!(matches!(Value::Null.add(&Value::Int(1)).unwrap(), Value::Null));
        assert!(matches!(Value::Int(1).add(&Value::Null).unwrap(), Value::Null));
        assert!(matches!(Value::Null.sub(&Value::Int(5)).unwrap(), Value::Int(0)));
        assert!(!Value::Null.truthy());
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn null_comparisons_are_false() {
        assert_eq!(Value::Null.compare(&Value::Int(3), "<").unwrap(), None);
        assert_eq!(Value::Int(3).compare(&Value::Null, ">").unwrap(), None);
        assert_eq!(Value::Null.sort_order(&Value::from("x")), Ordering::Less);
    }

    #[test]
    fn sort_order_is_total_across_kinds() {
        let mut values = vec![Value::from("b"), Value::Int(2), Value::Null, Value::Float(f64::NAN), Value::Int(1)];
        values.sort_by(|a, b| a.sort_order(b));
        assert!(matches!(values[0], Value::Null));
        assert!(matches!(values[4], Value::Str(_)));
        assert!(Value::check_sortable(&[Value::Null, Value::Int(1), Value::Float(0.5)]).is_ok());
        let error = Value::check_sortable(&[Value::Int(1), Value::from("a")]).unwrap_err();
        assert_eq!(error.to_string(), "TypeError: '<' not supported between instances of 'str' and 'int'");
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert_eq!(
            Value::Int(i64::MAX).add(&Value::Int(1)).unwrap_err().to_string(),
            "OverflowError: integer addition result too large"
        );
        assert!(Value::Int(i64::MIN).floordiv(&Value::Int(-1)).is_err());
        assert_eq!(Value::from("ab").mul(&Value::Int(i64::MAX)).unwrap_err().to_string(), "MemoryError");
    }

    #[test]
    fn dates_compare_with_years() {
        let date = Value::Date(Date::new(1850, 3, 1));
        assert_eq!(date.compare(&Value::Int(1900), "<").unwrap(), Some(Ordering::Less));
        let later = Value::Date(Date::new(1900, 2, 28));
        assert!(matches!(later.sub(&date).unwrap(), Value::Int(49)));
        assert!(matches!(date.add(&Value::Int(10)).unwrap(), Value::Date(d) if d.year == 1860));
    }

    #[test]
    fn python_style_rendering() {
        let v = Value::tuple(vec![Value::from("a"), Value::Int(1), Value::Float(2.0), Value::Bool(true)]);
        assert_eq!(v.to_string(), "('a', 1, 2.0, True)");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        assert_eq!(Value::None.to_string(), "None");
    }

    #[test]
    fn integer_division_floors() {
        assert!(matches!(Value::Int(-7).floordiv(&Value::Int(2)).unwrap(), Value::Int(-4)));
        assert!(matches!(Value::Int(-7).modulo(&Value::Int(2)).unwrap(), Value::Int(1)));
        assert!(Value::Int(1).div(&Value::Int(0)).is_err());
    }
}
