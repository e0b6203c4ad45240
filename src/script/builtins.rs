//! Built-in functions, helper functions and methods of the built-in types.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Mutex;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

use crate::error::{Result, SupertoolError};
use crate::proxy::Proxy;
use crate::record::{Category, Date, DateModifier};
use crate::script::interpreter::Interpreter;
use crate::value::{
    memory_error, overflow, Arguments, BuiltinFn, Dict, Module, RegexMatch, TypeRef, Value, MAX_SEQUENCE_LEN,
};

type Interp<'i, 'a> = &'i mut Interpreter<'a>;

/// Helpers placed in every evaluation context.
pub const HELPERS: &[(&str, BuiltinFn)] = &[
    ("uniq", uniq),
    ("makedate", makedate),
    ("Date", makedate),
    ("today", today),
    ("size", size),
    ("len", size),
    ("flatten", flatten),
    ("DummyTxn", dummy_txn),
    ("commit", commit),
    ("defaultdict", defaultdict),
];

/// Fallback names, resolved when neither a frame nor the context binds them.
const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("str", to_str),
    ("repr", repr),
    ("int", to_int),
    ("float", to_float),
    ("bool", to_bool),
    ("list", to_list),
    ("tuple", to_tuple),
    ("dict", to_dict),
    ("sorted", sorted),
    ("reversed", reversed),
    ("sum", sum),
    ("min", min),
    ("max", max),
    ("abs", abs),
    ("round", round),
    ("range", range),
    ("enumerate", enumerate),
    ("zip", zip),
    ("any", any),
    ("all", all),
    ("isinstance", isinstance),
    ("print", print),
    ("Exception", exception),
    ("map", map),
    ("getattr", getattr),
    ("hasattr", hasattr),
];

pub fn lookup(name: &str) -> Option<Value> {
    BUILTINS
        .iter()
        .chain(HELPERS.iter())
        .find(|(n, _)| *n == name)
        .map(|(n, f)| Value::builtin(n, *f))
}

fn no_transaction() -> SupertoolError {
    SupertoolError::Engine(String::from("Need a transaction (check 'Commit changes')"))
}

fn value_error(message: String) -> SupertoolError {
    SupertoolError::Script(format!("ValueError: {message}"))
}

fn expect_str<'v>(function: &str, value: &'v Value) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        SupertoolError::Type(format!(
            "{function}() argument must be str, not {}",
            value.type_name()
        ))
    })
}

fn expect_int(function: &str, value: &Value) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        SupertoolError::Type(format!(
            "{function}() argument must be int, not {}",
            value.type_name()
        ))
    })
}

/// Materializes anything iterable. The null reference iterates as empty.
pub fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        Value::Dict(d) => Ok(d.borrow().keys()),
        other => Err(SupertoolError::Type(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

// ------------- Helpers -------------
fn uniq(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("uniq", 1, 1, &[])?;
    let mut seen: Vec<Value> = Vec::new();
    for item in iterate(&args.positional[0])? {
        if !seen.iter().any(|s| s.equals(&item)) {
            seen.push(item);
        }
    }
    Ok(Value::list(seen))
}

fn makedate(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("makedate", 1, 4, &["year", "month", "day", "about"])?;
    let part = |index: usize, name: &str| -> Result<i64> {
        match args.arg(index, name) {
            Some(v) => expect_int("makedate", v),
            None => Ok(0),
        }
    };
    let year = match args.arg(0, "year") {
        Some(v) => expect_int("makedate", v)?,
        None => return Err(SupertoolError::Type(String::from("makedate() missing required argument: 'year'"))),
    };
    let month = part(1, "month")?;
    let day = part(2, "day")?;
    if !(0..=12).contains(&month) || !(0..=31).contains(&day) {
        return Err(value_error(format!("invalid date {year}-{month}-{day}")));
    }
    let mut date = Date::new(year as i32, month as u32, day as u32);
    if args.arg(3, "about").is_some_and(Value::truthy) {
        date = date.with_modifier(DateModifier::About);
    }
    Ok(Value::Date(date))
}

fn today(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("today", 0, 0, &[])?;
    Ok(Value::Date(Date::today()))
}

fn size(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("len", 1, 1, &[])?;
    let n = match &args.positional[0] {
        Value::Env => interp.global_names().len(),
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(d) => d.borrow().len(),
        Value::Null => 0,
        other => {
            return Err(SupertoolError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(n as i64))
}

fn flatten(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("flatten", 1, 1, &[])?;
    let mut out = Vec::new();
    for sublist in iterate(&args.positional[0])? {
        out.extend(iterate(&sublist)?);
    }
    Ok(Value::list(out))
}

fn dummy_txn(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("DummyTxn", 1, 1, &[])?;
    match &args.positional[0] {
        txn @ Value::Transaction(_) => Ok(txn.clone()),
        _ => Err(no_transaction()),
    }
}

fn commit(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("commit", 1, 2, &["txn"])?;
    let txn = args
        .arg(1, "txn")
        .cloned()
        .or_else(|| interp.global("trans").cloned());
    let Some(Value::Transaction(txn)) = txn else {
        return Err(no_transaction());
    };
    match &args.positional[0] {
        Value::Proxy(proxy) => {
            proxy.commit(&mut txn.borrow_mut())?;
            Ok(Value::None)
        }
        Value::Null => Ok(Value::None),
        other => Err(SupertoolError::Type(format!(
            "commit() expects a record, not {}",
            other.type_name()
        ))),
    }
}

// ------------- Conversions -------------
fn to_str(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("str", 0, 1, &[])?;
    Ok(Value::from(args.get(0).map(|v| v.to_string()).unwrap_or_default()))
}

fn repr(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("repr", 1, 1, &[])?;
    Ok(Value::from(args.positional[0].repr()))
}

fn to_int(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("int", 0, 1, &[])?;
    match args.get(0) {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        Some(Value::Float(f)) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Some(Value::Str(s)) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| value_error(format!("invalid literal for int() with base 10: {}", Value::Str(Rc::clone(s)).repr()))),
        Some(other) => Err(SupertoolError::Type(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("float", 0, 1, &[])?;
    match args.get(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
        Some(Value::Bool(b)) => Ok(Value::Float(*b as i64 as f64)),
        Some(Value::Float(f)) => Ok(Value::Float(*f)),
        Some(Value::Str(s)) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                _ => text.parse::<f64>().ok(),
            };
            parsed
                .map(Value::Float)
                .ok_or_else(|| value_error(format!("could not convert string to float: {}", Value::Str(Rc::clone(s)).repr())))
        }
        Some(other) => Err(SupertoolError::Type(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_bool(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("bool", 0, 1, &[])?;
    Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
}

fn to_list(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("list", 0, 1, &[])?;
    match args.get(0) {
        Some(v) => Ok(Value::list(interp.iterate(v)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn to_tuple(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("tuple", 0, 1, &[])?;
    match args.get(0) {
        Some(v) => Ok(Value::tuple(iterate(v)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn pairs_into(dict: &mut Dict, source: &Value) -> Result<()> {
    if let Value::Dict(other) = source {
        for (k, v) in other.borrow().items() {
            dict.insert(k, v)?;
        }
        return Ok(());
    }
    for item in iterate(source)? {
        let pair = iterate(&item)?;
        if pair.len() != 2 {
            return Err(value_error(format!(
                "dictionary update sequence element has length {}; 2 is required",
                pair.len()
            )));
        }
        let mut pair = pair.into_iter();
        if let (Some(k), Some(v)) = (pair.next(), pair.next()) {
            dict.insert(k, v)?;
        }
    }
    Ok(())
}

fn to_dict(_: Interp, args: Arguments) -> Result<Value> {
    if args.len() > 1 {
        return Err(SupertoolError::Type(format!(
            "dict expected at most 1 argument, got {}",
            args.len()
        )));
    }
    let mut dict = Dict::new();
    if let Some(source) = args.get(0) {
        pairs_into(&mut dict, source)?;
    }
    for (k, v) in args.keywords {
        dict.insert(Value::from(k), v)?;
    }
    Ok(Value::dict(dict))
}

// ------------- Sequences -------------
/// Stable sort by `key` (or the values themselves). `reverse` keeps equal
/// elements in their original order.
fn sort_values(interp: Interp, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> Result<Vec<Value>> {
    let keys = match key {
        Some(key) if !matches!(key, Value::None) => items
            .iter()
            .map(|v| interp.call(key, Arguments::new(vec![v.clone()])))
            .collect::<Result<Vec<_>>>()?,
        _ => items.clone(),
    };
    Value::check_sortable(&keys)?;
    let mut keyed: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    keyed.sort_by(|(a, _), (b, _)| if reverse { b.sort_order(a) } else { a.sort_order(b) });
    Ok(keyed.into_iter().map(|(_, v)| v).collect())
}

fn sorted(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("sorted", 1, 1, &["key", "reverse"])?;
    let items = interp.iterate(&args.positional[0])?;
    let reverse = args.keyword("reverse").is_some_and(Value::truthy);
    Ok(Value::list(sort_values(interp, items, args.keyword("key"), reverse)?))
}

fn reversed(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("reversed", 1, 1, &[])?;
    let mut items = iterate(&args.positional[0])?;
    items.reverse();
    Ok(Value::list(items))
}

fn sum(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("sum", 1, 2, &["start"])?;
    let start = args.arg(1, "start").cloned().unwrap_or(Value::Int(0));
    iterate(&args.positional[0])?
        .iter()
        .try_fold(start, |total, item| total.add(item))
}

fn extreme(interp: Interp, args: Arguments, name: &str, wanted: Ordering) -> Result<Value> {
    args.expect(name, 1, usize::MAX, &["key", "default"])?;
    let items = if args.len() == 1 {
        iterate(&args.positional[0])?
    } else {
        args.positional.clone()
    };
    let key = args.keyword("key").filter(|k| !matches!(k, Value::None));
    let keys = match key {
        Some(key) => items
            .iter()
            .map(|item| interp.call(key, Arguments::new(vec![item.clone()])))
            .collect::<Result<Vec<_>>>()?,
        None => items.clone(),
    };
    Value::check_sortable(&keys)?;
    let mut best: Option<(Value, Value)> = None;
    for (k, item) in keys.into_iter().zip(items) {
        let replace = match &best {
            None => true,
            Some((best_key, _)) => k.sort_order(best_key) == wanted,
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, args.keyword("default")) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(value_error(format!("{name}() arg is an empty sequence"))),
    }
}

fn min(interp: Interp, args: Arguments) -> Result<Value> {
    extreme(interp, args, "min", Ordering::Less)
}

fn max(interp: Interp, args: Arguments) -> Result<Value> {
    extreme(interp, args, "max", Ordering::Greater)
}

fn abs(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("abs", 1, 1, &[])?;
    match &args.positional[0] {
        Value::Int(i) => Ok(Value::Int(i.checked_abs().ok_or_else(|| overflow("integer absolute value"))?)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Null => Ok(Value::Null),
        other => Err(SupertoolError::Type(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn round(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("round", 1, 2, &["ndigits"])?;
    let digits = match args.arg(1, "ndigits") {
        None | Some(Value::None) => None,
        Some(v) => Some(expect_int("round", v)?),
    };
    match (&args.positional[0], digits) {
        (Value::Int(i), _) => Ok(Value::Int(*i)),
        (Value::Bool(b), _) => Ok(Value::Int(*b as i64)),
        (Value::Float(f), None) => Ok(Value::Int(f.round_ties_even() as i64)),
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(n as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (other, _) => Err(SupertoolError::Type(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn range(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("range", 1, 3, &[])?;
    let numbers = args
        .positional
        .iter()
        .map(|v| expect_int("range", v))
        .collect::<Result<Vec<_>>>()?;
    let (start, stop, step) = match numbers.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
    };
    if step == 0 {
        return Err(value_error(String::from("range() arg 3 must not be zero")));
    }
    let span = if step > 0 { stop as i128 - start as i128 } else { start as i128 - stop as i128 };
    let len = if span <= 0 { 0 } else { (span - 1) / (step as i128).abs() + 1 };
    if len > MAX_SEQUENCE_LEN as i128 {
        return Err(memory_error());
    }
    let out = (0..len)
        .map(|k| Value::Int((start as i128 + k * step as i128) as i64))
        .collect();
    Ok(Value::list(out))
}

fn enumerate(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("enumerate", 1, 2, &["start"])?;
    let start = match args.arg(1, "start") {
        Some(v) => expect_int("enumerate", v)?,
        None => 0,
    };
    let items = iterate(&args.positional[0])?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let n = start.checked_add(i as i64).ok_or_else(|| overflow("enumerate"))?;
            Ok(Value::tuple(vec![Value::Int(n), v]))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::list(items))
}

fn zip(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("zip", 0, usize::MAX, &[])?;
    let columns = args.positional.iter().map(iterate).collect::<Result<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let items = (0..rows)
        .map(|r| Value::tuple(columns.iter().map(|c| c[r].clone()).collect()))
        .collect();
    Ok(Value::list(items))
}

fn any(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("any", 1, 1, &[])?;
    Ok(Value::Bool(iterate(&args.positional[0])?.iter().any(Value::truthy)))
}

fn all(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("all", 1, 1, &[])?;
    Ok(Value::Bool(iterate(&args.positional[0])?.iter().all(Value::truthy)))
}

fn map(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("map", 2, usize::MAX, &[])?;
    let function = &args.positional[0];
    let columns = args.positional[1..].iter().map(iterate).collect::<Result<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for r in 0..rows {
        let call_args = columns.iter().map(|c| c[r].clone()).collect();
        out.push(interp.call(function, Arguments::new(call_args))?);
    }
    Ok(Value::list(out))
}

// ------------- Introspection -------------
fn instance_of(value: &Value, class: &Value) -> Result<bool> {
    Ok(match class {
        Value::Type(TypeRef::Category(category)) => {
            matches!(value, Value::Proxy(p) if p.category() == *category)
        }
        Value::Type(_) => false,
        Value::Builtin(b) => match b.name {
            "str" => matches!(value, Value::Str(_)),
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "makedate" | "Date" => matches!(value, Value::Date(_)),
            _ => false,
        },
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if instance_of(value, class)? {
                    return Ok(true);
                }
            }
            false
        }
        other => {
            return Err(SupertoolError::Type(format!(
                "isinstance() arg 2 must be a type or tuple of types, not {}",
                other.type_name()
            )));
        }
    })
}

fn isinstance(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("isinstance", 2, 2, &[])?;
    Ok(Value::Bool(instance_of(&args.positional[0], &args.positional[1])?))
}

fn getattr(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("getattr", 2, 3, &[])?;
    let name = expect_str("getattr", &args.positional[1])?;
    match interp.get_attribute(&args.positional[0], name) {
        Ok(value) => Ok(value),
        Err(_) if args.len() == 3 => Ok(args.positional[2].clone()),
        Err(e) => Err(e),
    }
}

fn hasattr(interp: Interp, args: Arguments) -> Result<Value> {
    args.expect("hasattr", 2, 2, &[])?;
    let name = expect_str("hasattr", &args.positional[1])?;
    Ok(Value::Bool(interp.get_attribute(&args.positional[0], name).is_ok()))
}

fn print(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("print", 0, usize::MAX, &["sep", "end"])?;
    let sep = args.keyword("sep").map(|v| v.to_string()).unwrap_or_else(|| String::from(" "));
    let line: Vec<String> = args.positional.iter().map(|v| v.to_string()).collect();
    info!(target: "script", "{}", line.join(&sep));
    Ok(Value::None)
}

fn exception(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("Exception", 0, 1, &[])?;
    Ok(Value::from(args.get(0).map(|v| v.to_string()).unwrap_or_default()))
}

// ------------- Methods -------------
const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "startswith", "endswith", "split", "replace", "join",
    "find", "format", "title", "capitalize", "count", "isdigit",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "sort", "count", "index", "remove", "insert", "reverse", "copy",
];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "setdefault", "pop", "update", "copy"];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const RE_METHODS: &[&str] = &["match", "search", "sub", "findall", "split"];
const MATCH_METHODS: &[&str] = &["group", "groups", "start", "end"];
const ENV_METHODS: &[&str] = &["get", "keys", "values", "items", "setdefault"];

pub fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Dict(_) => DICT_METHODS.contains(&name),
        Value::Tuple(_) => TUPLE_METHODS.contains(&name),
        Value::Module(Module::Re) => RE_METHODS.contains(&name),
        Value::Module(Module::Db) => db_lookup(name).is_some(),
        Value::Match(_) => MATCH_METHODS.contains(&name),
        Value::Env => ENV_METHODS.contains(&name),
        Value::Object(o) => name.strip_prefix("get_").is_some_and(|field| o.field(field).is_some()),
        Value::Proxy(p) => p.has_method(name),
        _ => false,
    }
}

pub fn call_method(interp: Interp, receiver: &Value, name: &str, args: Arguments) -> Result<Value> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Dict(_) => dict_method(receiver, name, args),
        Value::Tuple(items) => sequence_method(items, name, args),
        Value::Module(Module::Re) => re_method(interp, name, args),
        Value::Module(Module::Db) => db_method(interp, name, args),
        Value::Match(m) => match_method(m, name, args),
        Value::Env => env_method(interp, name, args),
        Value::Object(o) => {
            args.expect(name, 0, 0, &[])?;
            name.strip_prefix("get_")
                .and_then(|field| o.field(field))
                .cloned()
                .ok_or_else(|| SupertoolError::attribute(o.kind, name))
        }
        Value::Proxy(p) => p.call_method(name, &args),
        other => Err(SupertoolError::attribute(other.type_name(), name)),
    }
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn affixes(function: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Tuple(items) => items
            .iter()
            .map(|v| expect_str(function, v).map(str::to_string))
            .collect(),
        other => Ok(vec![expect_str(function, other)?.to_string()]),
    }
}

fn str_method(s: &str, name: &str, args: Arguments) -> Result<Value> {
    let strip_set = |args: &Arguments| -> Result<Option<Vec<char>>> {
        match args.get(0) {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(expect_str(name, v)?.chars().collect())),
        }
    };
    Ok(match name {
        "upper" => Value::from(s.to_uppercase()),
        "lower" => Value::from(s.to_lowercase()),
        "strip" | "lstrip" | "rstrip" => {
            args.expect(name, 0, 1, &[])?;
            let chars = strip_set(&args)?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Value::from(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            })
        }
        "startswith" | "endswith" => {
            args.expect(name, 1, 1, &[])?;
            let candidates = affixes(name, &args.positional[0])?;
            let found = candidates.iter().any(|a| {
                if name == "startswith" {
                    s.starts_with(a.as_str())
                } else {
                    s.ends_with(a.as_str())
                }
            });
            Value::Bool(found)
        }
        "split" => {
            args.expect(name, 0, 2, &["sep", "maxsplit"])?;
            let maxsplit = match args.arg(1, "maxsplit") {
                Some(v) => expect_int(name, v)?,
                None => -1,
            };
            let parts: Vec<Value> = match args.arg(0, "sep") {
                None | Some(Value::None) => {
                    let words = s.split_whitespace();
                    if maxsplit < 0 {
                        words.map(Value::from).collect()
                    } else {
                        let mut out: Vec<Value> = Vec::new();
                        let mut rest = s.trim_start();
                        while !rest.is_empty() {
                            if out.len() as i64 == maxsplit {
                                out.push(Value::from(rest));
                                break;
                            }
                            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                            out.push(Value::from(&rest[..end]));
                            rest = rest[end..].trim_start();
                        }
                        out
                    }
                }
                Some(sep) => {
                    let sep = expect_str(name, sep)?;
                    if sep.is_empty() {
                        return Err(value_error(String::from("empty separator")));
                    }
                    if maxsplit < 0 {
                        s.split(sep).map(Value::from).collect()
                    } else {
                        s.splitn(maxsplit as usize + 1, sep).map(Value::from).collect()
                    }
                }
            };
            Value::list(parts)
        }
        "replace" => {
            args.expect(name, 2, 3, &[])?;
            let old = expect_str(name, &args.positional[0])?;
            let new = expect_str(name, &args.positional[1])?;
            match args.get(2) {
                Some(count) => Value::from(s.replacen(old, new, expect_int(name, count)?.max(0) as usize)),
                None => Value::from(s.replace(old, new)),
            }
        }
        "join" => {
            args.expect(name, 1, 1, &[])?;
            let parts = iterate(&args.positional[0])?
                .iter()
                .map(|v| match v {
                    Value::Str(part) => Ok(part.to_string()),
                    other => Err(SupertoolError::Type(format!(
                        "sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Value::from(parts.join(s))
        }
        "find" => {
            args.expect(name, 1, 1, &[])?;
            let needle = expect_str(name, &args.positional[0])?;
            Value::Int(s.find(needle).map(|b| char_index(s, b)).unwrap_or(-1))
        }
        "count" => {
            args.expect(name, 1, 1, &[])?;
            let needle = expect_str(name, &args.positional[0])?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Value::Int(n as i64)
        }
        "format" => Value::from(format_string(s, &args)?),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Value::from(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            Value::from(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect::<String>(),
                None => String::new(),
            })
        }
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        _ => return Err(SupertoolError::attribute("str", name)),
    })
}

// `{}`, `{0}` and `{name}` fields with an optional `!r` and format spec
fn format_string(template: &str, args: &Arguments) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(value_error(String::from("expected '}' before end of string"))),
                    }
                }
                let (field, spec) = match field.split_once(':') {
                    Some((f, s)) => (f.to_string(), s.to_string()),
                    None => (field, String::new()),
                };
                let (field, conversion) = match field.split_once('!') {
                    Some((f, c)) => (f.to_string(), Some(c.to_string())),
                    None => (field, None),
                };
                let value = if field.is_empty() {
                    auto += 1;
                    args.get(auto - 1)
                } else if let Ok(i) = field.parse::<usize>() {
                    args.get(i)
                } else {
                    args.keyword(&field)
                };
                let value = value.ok_or_else(|| {
                    SupertoolError::Script(format!("IndexError: Replacement index {field} out of range"))
                })?;
                let value = match conversion.as_deref() {
                    Some("r") => Value::from(value.repr()),
                    _ => value.clone(),
                };
                out.push_str(&apply_spec(&value, &spec)?);
            }
            '}' => return Err(value_error(String::from("Single '}' encountered in format string"))),
            c => out.push(c),
        }
    }
    Ok(out)
}

// widths and precisions beyond MAX_SEQUENCE_LEN would only exhaust memory
fn format_digit(acc: usize, digit: u32) -> Result<usize> {
    acc.checked_mul(10)
        .and_then(|v| v.checked_add(digit as usize))
        .filter(|v| *v <= MAX_SEQUENCE_LEN)
        .ok_or_else(|| value_error(String::from("Too many decimal digits in format string")))
}

fn apply_spec(value: &Value, spec: &str) -> Result<String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if matches!(chars[0], '<' | '>' | '^') {
        align = Some(chars[0]);
        i = 1;
    }
    if chars.get(i) == Some(&'0') && align.is_none() {
        fill = '0';
        align = Some('>');
        i += 1;
    }
    let mut width = 0usize;
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        width = format_digit(width, d)?;
        i += 1;
    }
    let mut precision = None;
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut p = 0usize;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            p = format_digit(p, d)?;
            i += 1;
        }
        precision = Some(p);
    }
    let kind = chars.get(i).copied();
    let number = match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    };
    let body = match (kind, number) {
        (Some('f' | 'F'), Some(x)) => format!("{:.*}", precision.unwrap_or(6), x),
        (Some('%'), Some(x)) => format!("{:.*}%", precision.unwrap_or(6), x * 100.0),
        (Some('d'), Some(_)) => match value.as_int() {
            Some(n) => n.to_string(),
            None => return Err(value_error(format!("Unknown format code 'd' for object of type '{}'", value.type_name()))),
        },
        (None, Some(x)) if precision.is_some() && matches!(value, Value::Float(_)) => {
            format!("{:.*}", precision.unwrap_or(6), x)
        }
        (Some('s') | None, _) => {
            let text = value.to_string();
            match precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (Some(k), _) => {
            return Err(value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                k,
                value.type_name()
            )));
        }
    };
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let align = align.unwrap_or(if number.is_some() { '>' } else { '<' });
    let repeat = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
    Ok(match align {
        '>' => format!("{}{}", repeat(pad), body),
        '^' => format!("{}{}{}", repeat(pad / 2), body, repeat(pad - pad / 2)),
        _ => format!("{}{}", body, repeat(pad)),
    })
}

fn position(items: &[Value], needle: &Value, kind: &str) -> Result<Value> {
    items
        .iter()
        .position(|v| v.equals(needle))
        .map(|i| Value::Int(i as i64))
        .ok_or_else(|| value_error(format!("{} is not in {kind}", needle.repr())))
}

fn sequence_method(items: &[Value], name: &str, args: Arguments) -> Result<Value> {
    args.expect(name, 1, 1, &[])?;
    let needle = &args.positional[0];
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| v.equals(needle)).count() as i64)),
        "index" => position(items, needle, "tuple"),
        _ => Err(SupertoolError::attribute("tuple", name)),
    }
}

fn list_method(interp: Interp, receiver: &Value, name: &str, args: Arguments) -> Result<Value> {
    let Value::List(list) = receiver else {
        return Err(SupertoolError::attribute(receiver.type_name(), name));
    };
    match name {
        "append" => {
            args.expect(name, 1, 1, &[])?;
            list.borrow_mut().push(args.positional[0].clone());
        }
        "extend" => {
            args.expect(name, 1, 1, &[])?;
            let extra = iterate(&args.positional[0])?;
            list.borrow_mut().extend(extra);
        }
        "insert" => {
            args.expect(name, 2, 2, &[])?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let i = expect_int(name, &args.positional[0])?;
            let i = if i < 0 { i.saturating_add(len).max(0) } else { i.min(len) };
            items.insert(i as usize, args.positional[1].clone());
        }
        "pop" => {
            args.expect(name, 0, 1, &[])?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let i = match args.get(0) {
                Some(v) => expect_int(name, v)?,
                None => -1,
            };
            let i = if i < 0 { i.saturating_add(len) } else { i };
            if !(0..len).contains(&i) {
                return Err(SupertoolError::Script(String::from("IndexError: pop index out of range")));
            }
            return Ok(items.remove(i as usize));
        }
        "remove" => {
            args.expect(name, 1, 1, &[])?;
            let mut items = list.borrow_mut();
            match items.iter().position(|v| v.equals(&args.positional[0])) {
                Some(i) => {
                    items.remove(i);
                }
                None => return Err(value_error(String::from("list.remove(x): x not in list"))),
            }
        }
        "sort" => {
            args.expect(name, 0, 0, &["key", "reverse"])?;
            let items = list.borrow().clone();
            let reverse = args.keyword("reverse").is_some_and(Value::truthy);
            let sorted = sort_values(interp, items, args.keyword("key"), reverse)?;
            *list.borrow_mut() = sorted;
        }
        "reverse" => {
            args.expect(name, 0, 0, &[])?;
            list.borrow_mut().reverse();
        }
        "copy" => {
            args.expect(name, 0, 0, &[])?;
            return Ok(Value::list(list.borrow().clone()));
        }
        "count" | "index" => {
            args.expect(name, 1, 1, &[])?;
            let items = list.borrow();
            let needle = &args.positional[0];
            return if name == "count" {
                Ok(Value::Int(items.iter().filter(|v| v.equals(needle)).count() as i64))
            } else {
                position(&items, needle, "list")
            };
        }
        _ => return Err(SupertoolError::attribute("list", name)),
    }
    Ok(Value::None)
}

fn env_method(interp: Interp, name: &str, args: Arguments) -> Result<Value> {
    match name {
        "get" | "setdefault" => {
            args.expect(name, 1, 2, &[])?;
            let key = expect_str(name, &args.positional[0])?;
            if let Some(value) = interp.global(key) {
                return Ok(value.clone());
            }
            let fallback = args.get(1).cloned().unwrap_or(Value::None);
            if name == "setdefault" {
                interp.set_global(key, fallback.clone());
            }
            Ok(fallback)
        }
        "keys" => Ok(Value::list(interp.global_names().into_iter().map(Value::from).collect())),
        "values" | "items" => {
            let mut out = Vec::new();
            for key in interp.global_names() {
                let value = interp.global(&key).cloned().unwrap_or(Value::None);
                out.push(if name == "values" { value } else { Value::tuple(vec![Value::from(key), value]) });
            }
            Ok(Value::list(out))
        }
        _ => Err(SupertoolError::attribute("dict", name)),
    }
}

// ------------- Collections -------------
fn callable(value: &Value) -> bool {
    matches!(
        value,
        Value::Builtin(_) | Value::Function(_) | Value::Method(_) | Value::Filter(_) | Value::FilterLookup(_)
    )
}

/// Attributes of the `collections` module.
pub fn collections_member(name: &str) -> Option<Value> {
    match name {
        "defaultdict" => Some(Value::builtin("defaultdict", defaultdict)),
        "OrderedDict" => Some(Value::builtin("OrderedDict", to_dict)),
        _ => None,
    }
}

/// `defaultdict(factory[, pairs])`; `None` as the factory gives a plain dict.
fn defaultdict(_: Interp, args: Arguments) -> Result<Value> {
    args.expect("defaultdict", 0, 2, &[])?;
    let mut dict = match args.get(0) {
        None | Some(Value::None) => Dict::new(),
        Some(factory) if callable(factory) => Dict::with_default(factory.clone()),
        Some(other) => {
            return Err(SupertoolError::Type(format!(
                "first argument must be callable or None, not {}",
                other.type_name()
            )));
        }
    };
    if let Some(source) = args.get(1) {
        pairs_into(&mut dict, source)?;
    }
    Ok(Value::dict(dict))
}

fn dict_method(receiver: &Value, name: &str, args: Arguments) -> Result<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(SupertoolError::attribute(receiver.type_name(), name));
    };
    match name {
        "get" => {
            args.expect(name, 1, 2, &[])?;
            let found = dict.borrow().get(&args.positional[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::list(dict.borrow().keys())),
        "values" => Ok(Value::list(dict.borrow().values())),
        "items" => Ok(Value::list(
            dict.borrow()
                .items()
                .into_iter()
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .collect(),
        )),
        "setdefault" => {
            args.expect(name, 1, 2, &[])?;
            let key = &args.positional[0];
            let existing = dict.borrow().get(key)?;
            match existing {
                Some(value) => Ok(value),
                None => {
                    let value = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(key.clone(), value.clone())?;
                    Ok(value)
                }
            }
        }
        "pop" => {
            args.expect(name, 1, 2, &[])?;
            let removed = dict.borrow_mut().remove(&args.positional[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(SupertoolError::Script(format!(
                    "KeyError: {}",
                    args.positional[0].repr()
                ))),
            }
        }
        "update" => {
            args.expect(name, 0, 1, &[])?;
            let mut updated = dict.borrow().clone();
            if let Some(source) = args.get(0) {
                pairs_into(&mut updated, source)?;
            }
            for (k, v) in args.keywords {
                updated.insert(Value::from(k), v)?;
            }
            *dict.borrow_mut() = updated;
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(dict.borrow().clone())),
        _ => Err(SupertoolError::attribute("dict", name)),
    }
}

// ------------- re -------------
lazy_static! {
    static ref REGEX_CACHE: Mutex<HashMap<String, Regex>> = Mutex::new(HashMap::new());
}

fn regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock()?;
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(pattern).map_err(|e| SupertoolError::Script(format!("re.error: {e}")))?;
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

// `\1` and `\g<name>` become `${1}` and `${name}`; a literal `$` is escaped
fn replacement(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    chars.next();
                    let mut group = String::new();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '>' {
                                break;
                            }
                            group.push(c);
                        }
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn to_match(text: &str, captures: &regex::Captures<'_>) -> Value {
    let whole = captures.get(0);
    Value::Match(Rc::new(RegexMatch {
        groups: captures.iter().map(|g| g.map(|m| m.as_str().to_string())).collect(),
        start: whole.map(|m| char_index(text, m.start()) as usize).unwrap_or(0),
        end: whole.map(|m| char_index(text, m.end()) as usize).unwrap_or(0),
    }))
}

fn re_method(interp: Interp, name: &str, args: Arguments) -> Result<Value> {
    let function = format!("re.{name}");
    match name {
        "match" | "search" => {
            args.expect(&function, 2, 3, &["flags"])?;
            let regex = regex(expect_str(&function, &args.positional[0])?)?;
            let text = match &args.positional[1] {
                Value::Null => return Ok(Value::None),
                v => expect_str(&function, v)?,
            };
            Ok(match regex.captures(text) {
                Some(c) if name == "search" || c.get(0).is_some_and(|m| m.start() == 0) => to_match(text, &c),
                _ => Value::None,
            })
        }
        "findall" => {
            args.expect(&function, 2, 3, &["flags"])?;
            let regex = regex(expect_str(&function, &args.positional[0])?)?;
            let text = match &args.positional[1] {
                Value::Null => return Ok(Value::list(Vec::new())),
                v => expect_str(&function, v)?,
            };
            let groups = regex.captures_len() - 1;
            let found = regex
                .captures_iter(text)
                .map(|c| {
                    let group = |i: usize| Value::from(c.get(i).map(|m| m.as_str()).unwrap_or(""));
                    match groups {
                        0 => group(0),
                        1 => group(1),
                        n => Value::tuple((1..=n).map(group).collect()),
                    }
                })
                .collect();
            Ok(Value::list(found))
        }
        "sub" => {
            args.expect(&function, 3, 4, &["count", "flags"])?;
            let regex = regex(expect_str(&function, &args.positional[0])?)?;
            let text = expect_str(&function, &args.positional[2])?;
            let limit = match args.arg(3, "count") {
                Some(v) => expect_int(&function, v)?.max(0) as usize,
                None => 0,
            };
            match &args.positional[1] {
                Value::Str(template) => {
                    let template = replacement(template);
                    Ok(Value::from(regex.replacen(text, limit, template.as_str()).into_owned()))
                }
                callback => {
                    let mut out = String::with_capacity(text.len());
                    let mut last = 0;
                    for (n, c) in regex.captures_iter(text).enumerate() {
                        if limit > 0 && n >= limit {
                            break;
                        }
                        let Some(m) = c.get(0) else { continue };
                        out.push_str(&text[last..m.start()]);
                        let replaced = interp.call(callback, Arguments::new(vec![to_match(text, &c)]))?;
                        out.push_str(&replaced.to_string());
                        last = m.end();
                    }
                    out.push_str(&text[last..]);
                    Ok(Value::from(out))
                }
            }
        }
        "split" => {
            args.expect(&function, 2, 3, &["maxsplit", "flags"])?;
            let regex = regex(expect_str(&function, &args.positional[0])?)?;
            let text = expect_str(&function, &args.positional[1])?;
            let parts = match args.arg(2, "maxsplit") {
                Some(v) if expect_int(&function, v)? > 0 => regex
                    .splitn(text, expect_int(&function, v)? as usize + 1)
                    .map(Value::from)
                    .collect(),
                _ => regex.split(text).map(Value::from).collect(),
            };
            Ok(Value::list(parts))
        }
        _ => Err(SupertoolError::attribute("module", name)),
    }
}

fn match_method(m: &RegexMatch, name: &str, args: Arguments) -> Result<Value> {
    let group = |index: &Value| -> Result<Value> {
        let i = expect_int("group", index)?;
        usize::try_from(i)
            .ok()
            .and_then(|i| m.groups.get(i))
            .map(|g| g.clone().map(Value::from).unwrap_or(Value::None))
            .ok_or_else(|| SupertoolError::Script(String::from("IndexError: no such group")))
    };
    match name {
        "group" => match args.positional.as_slice() {
            [] => group(&Value::Int(0)),
            [one] => group(one),
            many => Ok(Value::tuple(many.iter().map(group).collect::<Result<_>>()?)),
        },
        "groups" => Ok(Value::tuple(
            m.groups
                .iter()
                .skip(1)
                .map(|g| g.clone().map(Value::from).unwrap_or(Value::None))
                .collect(),
        )),
        "start" => Ok(Value::Int(m.start as i64)),
        "end" => Ok(Value::Int(m.end as i64)),
        _ => Err(SupertoolError::attribute("Match", name)),
    }
}

// ------------- db -------------
enum DbLookup {
    GrampsId(Category),
    Handle(Category),
}

// `person`, `get_person_from_gramps_id` and `get_person_from_handle`
fn db_lookup(name: &str) -> Option<DbLookup> {
    if let Some(rest) = name.strip_prefix("get_") {
        let (category, key) = rest.split_once("_from_")?;
        let category = Category::from_name(category)?;
        return match key {
            "gramps_id" => Some(DbLookup::GrampsId(category)),
            "handle" => Some(DbLookup::Handle(category)),
            _ => None,
        };
    }
    Category::from_name(name).map(DbLookup::GrampsId)
}

fn db_method(interp: Interp, name: &str, args: Arguments) -> Result<Value> {
    let lookup = db_lookup(name).ok_or_else(|| SupertoolError::attribute("database", name))?;
    args.expect(name, 1, 1, &[])?;
    let db = &interp.runtime().db;
    let (category, handle) = match lookup {
        DbLookup::GrampsId(category) => {
            let id = expect_str(name, &args.positional[0])?;
            (category, db.handle_for(category, id)?)
        }
        DbLookup::Handle(category) => {
            let handle = expect_int(name, &args.positional[0])?;
            let exists = db
                .record(handle as u64)?
                .is_some_and(|r| r.category() == category);
            (category, exists.then_some(handle as u64))
        }
    };
    match handle {
        Some(handle) => Ok(Value::Proxy(Proxy::load(db, category, handle)?)),
        None => Ok(Value::Null),
    }
}
