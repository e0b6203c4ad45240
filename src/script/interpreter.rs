use std::rc::Rc;

use crate::context::{Bindings, Context};
use crate::error::{Result, SupertoolError};
use crate::filters;
use crate::record::Handle;
use crate::script::Runtime;
use crate::script::ast::*;
use crate::script::builtins;
use crate::value::{Arguments, Function, Method, Module, Value};

// deep enough for real scripts, shallow enough not to overflow the native stack
const MAX_DEPTH: usize = 64;

/// Where a run sits inside the scripts that started it: the call depth so far
/// and the custom filters being applied, each with the record it applies to.
#[derive(Debug, Clone, Default)]
pub struct CallChain {
    depth: usize,
    filters: Vec<(String, Handle)>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Evaluates statements and expressions against a context. Names resolve
/// through the innermost function frame, then the context, then the builtins.
pub struct Interpreter<'a> {
    runtime: &'a Runtime,
    globals: &'a mut Context,
    frames: Vec<Bindings>,
    chain: CallChain,
}

impl<'a> Interpreter<'a> {
    pub fn new(runtime: &'a Runtime, globals: &'a mut Context) -> Self {
        Self {
            runtime,
            globals,
            frames: Vec::new(),
            chain: CallChain::default(),
        }
    }

    pub fn with_chain(mut self, chain: CallChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn execute(&mut self, statements: &[Statement]) -> Result<()> {
        match self.exec_block(statements)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(outside("'return' outside function")),
            Flow::Break => Err(outside("'break' outside loop")),
            Flow::Continue => Err(outside("'continue' not properly in loop")),
        }
    }

    fn exec_block(&mut self, statements: &[Statement]) -> Result<Flow> {
        for statement in statements {
            let flow = self.exec(statement)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, statement: &Statement) -> Result<Flow> {
        match statement {
            Statement::Expr(expr) => {
                self.evaluate(expr)?;
            }
            Statement::Assign(targets, expr) => {
                let value = self.evaluate(expr)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            Statement::AugAssign(target, op, expr) => {
                let current = self.evaluate_target(target)?;
                let operand = self.evaluate(expr)?;
                let updated = match (&current, op, &operand) {
                    // lists grow in place so every holder of the list sees the change
                    (Value::List(items), BinaryOp::Add, _) => {
                        let extra = self.iterate(&operand)?;
                        items.borrow_mut().extend(extra);
                        current.clone()
                    }
                    _ => binary(*op, &current, &operand)?,
                };
                self.assign(target, updated)?;
            }
            Statement::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.evaluate(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            Statement::For { target, iter, body } => {
                let items = {
                    let iterable = self.evaluate(iter)?;
                    self.iterate(&iterable)?
                };
                for item in items {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
            }
            Statement::While { test, body } => {
                while self.evaluate(test)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
            }
            Statement::Def(def) => {
                let function = self.make_function(def)?;
                self.assign(&Target::Name(def.name.clone()), function)?;
            }
            Statement::Return(expr) => {
                let value = match expr {
                    Some(e) => self.evaluate(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Statement::Raise(expr) => {
                let value = self.evaluate(expr)?;
                return Err(SupertoolError::Raised(value.to_string()));
            }
            Statement::Pass => {}
            Statement::Break => return Ok(Flow::Break),
            Statement::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Result<Value> {
        let defaults = def
            .params
            .iter()
            .map(|p| p.default.as_ref().map(|d| self.evaluate(d)).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Function(Rc::new(Function {
            def: Rc::clone(def),
            defaults,
            captured: self.frames.last().cloned(),
        })))
    }

    // ------------- Names -------------
    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| SupertoolError::Name(name.to_string()))
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.insert(name.to_string(), value);
            }
            None => self.globals.insert(name, value),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => self.bind(name, value),
            Target::Attribute(object, name) => {
                let object = self.evaluate(object)?;
                self.set_attribute(&object, name, &value)?;
            }
            Target::Index(object, index) => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                self.store_item(&object, &index, value)?;
            }
            Target::Tuple(targets) => {
                let items = self.iterate(&value)?;
                if items.len() != targets.len() {
                    return Err(SupertoolError::Script(format!(
                        "ValueError: expected {} values to unpack, got {}",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn evaluate_target(&mut self, target: &Target) -> Result<Value> {
        match target {
            Target::Name(name) => self.lookup(name),
            Target::Attribute(object, name) => {
                let object = self.evaluate(object)?;
                self.get_attribute(&object, name)
            }
            Target::Index(object, index) => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                self.subscript(&object, &index)
            }
            Target::Tuple(_) => Err(SupertoolError::Syntax {
                message: String::from("illegal expression for augmented assignment"),
                line: None,
                col: None,
            }),
        }
    }

    // ------------- Expressions -------------
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(Rc::clone(s)),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::Attribute(object, name) => {
                let object = self.evaluate(object)?;
                self.get_attribute(&object, name)
            }
            Expr::Index(object, index) => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                self.subscript(&object, &index)
            }
            Expr::Slice(object, lower, upper) => {
                let object = self.evaluate(object)?;
                let lower = lower.as_ref().map(|e| self.evaluate(e)).transpose()?;
                let upper = upper.as_ref().map(|e| self.evaluate(e)).transpose()?;
                slice(&object, lower.as_ref(), upper.as_ref())
            }
            Expr::Call(callee, arguments) => {
                let callee = self.evaluate(callee)?;
                let mut args = Arguments::default();
                for argument in arguments {
                    let value = self.evaluate(&argument.value)?;
                    match &argument.name {
                        Some(name) => args.keywords.push((name.clone(), value)),
                        None => args.positional.push(value),
                    }
                }
                self.call(&callee, args)
            }
            Expr::Unary(op, operand) => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => match value {
                        Value::Int(_) | Value::Float(_) | Value::Null => Ok(value),
                        Value::Bool(b) => Ok(Value::Int(b as i64)),
                        other => Err(SupertoolError::Type(format!(
                            "bad operand type for unary +: '{}'",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.evaluate(lhs)?;
                let rhs = self.evaluate(rhs)?;
                binary(*op, &lhs, &rhs)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.evaluate(first)?;
                for (op, expr) in rest {
                    let right = self.evaluate(expr)?;
                    let holds = match (op, &right) {
                        (CompareOp::In, Value::Env) => self.env_contains(&left),
                        (CompareOp::NotIn, Value::Env) => !self.env_contains(&left),
                        _ => compare(*op, &left, &right)?,
                    };
                    if !holds {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(lhs, rhs) => {
                let left = self.evaluate(lhs)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.evaluate(rhs)
            }
            Expr::Or(lhs, rhs) => {
                let left = self.evaluate(lhs)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.evaluate(rhs)
            }
            Expr::Conditional { test, body, orelse } => {
                if self.evaluate(test)?.truthy() {
                    self.evaluate(body)
                } else {
                    self.evaluate(orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::List(items) => {
                let values = items.iter().map(|e| self.evaluate(e)).collect::<Result<Vec<_>>>()?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => {
                let values = items.iter().map(|e| self.evaluate(e)).collect::<Result<Vec<_>>>()?;
                Ok(Value::tuple(values))
            }
            Expr::Dict(items) => {
                let mut dict = crate::value::Dict::new();
                for (k, v) in items {
                    let key = self.evaluate(k)?;
                    let value = self.evaluate(v)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::Comprehension(element, clauses) => {
                // comprehension variables live in their own frame
                let frame = self.frames.last().cloned().unwrap_or_default();
                self.frames.push(frame);
                let mut out = Vec::new();
                let result = self.comprehend(element, clauses, &mut out);
                self.frames.pop();
                result?;
                Ok(Value::list(out))
            }
            Expr::Paren(inner) => self.evaluate(inner),
        }
    }

    fn comprehend(&mut self, element: &Expr, clauses: &[Clause], out: &mut Vec<Value>) -> Result<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            out.push(self.evaluate(element)?);
            return Ok(());
        };
        let iterable = self.evaluate(&clause.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.assign(&clause.target, item)?;
            for condition in &clause.conditions {
                if !self.evaluate(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(element, rest, out)?;
        }
        Ok(())
    }

    // ------------- Calls -------------
    pub fn call(&mut self, callee: &Value, args: Arguments) -> Result<Value> {
        match callee {
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Function(function) => self.call_function(function, args),
            Value::Method(method) => builtins::call_method(self, &method.receiver, &method.name, args),
            Value::Null => Ok(Value::Null),
            Value::FilterLookup(category) => {
                args.expect("filter", 1, 1, &[])?;
                let name = match &args.positional[0] {
                    Value::Str(s) => s.to_string(),
                    other => {
                        return Err(SupertoolError::Type(format!(
                            "filter name must be a str, not {}",
                            other.type_name()
                        )));
                    }
                };
                let filter = self.runtime.filters.lookup(*category, &name)?;
                Ok(Value::Filter(Rc::new(filter)))
            }
            Value::Filter(filter) => {
                args.expect("filter", 1, 1, &[])?;
                match &args.positional[0] {
                    Value::Proxy(proxy) => {
                        // the same filter on the same record can only recurse forever
                        let entry = (filter.name.clone(), proxy.handle());
                        if self.chain.depth >= MAX_DEPTH || self.chain.filters.contains(&entry) {
                            return Err(recursion_error());
                        }
                        let mut chain = self.chain.clone();
                        chain.depth += 1;
                        chain.filters.push(entry);
                        Ok(Value::Bool(filters::matches(self.runtime, filter, proxy, &chain)?))
                    }
                    Value::Null => Ok(Value::Bool(false)),
                    other => Err(SupertoolError::Type(format!(
                        "filters apply to records, not {}",
                        other.type_name()
                    ))),
                }
            }
            Value::Type(t) => Err(SupertoolError::Type(format!(
                "cannot create '{}' instances",
                t.name()
            ))),
            other => Err(SupertoolError::Type(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Arguments) -> Result<Value> {
        let def = &function.def;
        if args.positional.len() > def.params.len() {
            return Err(SupertoolError::Type(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                args.positional.len()
            )));
        }
        let mut frame = function.captured.clone().unwrap_or_default();
        let mut positional = args.positional.into_iter();
        for (i, param) in def.params.iter().enumerate() {
            let value = match positional.next() {
                Some(v) => v,
                None => match args.keywords.iter().find(|(k, _)| *k == param.name) {
                    Some((_, v)) => v.clone(),
                    None => match function.defaults.get(i).cloned().flatten() {
                        Some(v) => v,
                        None => {
                            return Err(SupertoolError::Type(format!(
                                "{}() missing required argument: '{}'",
                                def.name, param.name
                            )));
                        }
                    },
                },
            };
            frame.insert(param.name.clone(), value);
        }
        if let Some((k, _)) = args
            .keywords
            .iter()
            .find(|(k, _)| !def.params.iter().any(|p| p.name == *k))
        {
            return Err(SupertoolError::Type(format!(
                "{}() got an unexpected keyword argument '{}'",
                def.name, k
            )));
        }
        if self.chain.depth >= MAX_DEPTH {
            return Err(recursion_error());
        }
        self.chain.depth += 1;
        self.frames.push(frame);
        let result = match &def.body {
            Body::Expr(expr) => self.evaluate(expr),
            Body::Block(statements) => match self.exec_block(statements) {
                Ok(Flow::Return(v)) => Ok(v),
                Ok(Flow::Normal) => Ok(Value::None),
                Ok(Flow::Break) => Err(outside("'break' outside loop")),
                Ok(Flow::Continue) => Err(outside("'continue' not properly in loop")),
                Err(e) => Err(e),
            },
        };
        self.frames.pop();
        self.chain.depth -= 1;
        result
    }

    // ------------- Attributes -------------
    pub fn get_attribute(&mut self, object: &Value, name: &str) -> Result<Value> {
        match object {
            Value::Null => Ok(Value::Null),
            Value::Proxy(proxy) => match proxy.attribute(name)? {
                Some(value) => Ok(value),
                None if proxy.has_method(name) => Ok(method(object, name)),
                None => Err(SupertoolError::attribute(proxy.namespace(), name)),
            },
            Value::Date(date) => match name {
                "year" => Ok(Value::Int(date.year as i64)),
                "month" => Ok(Value::Int(date.month as i64)),
                "day" => Ok(Value::Int(date.day as i64)),
                "modifier" => Ok(Value::from(format!("{:?}", date.modifier).to_lowercase())),
                _ => Err(SupertoolError::attribute("Date", name)),
            },
            Value::Type(t) => t.constant(name).ok_or_else(|| {
                SupertoolError::Script(format!(
                    "AttributeError: type object '{}' has no attribute '{}'",
                    t.name(),
                    name
                ))
            }),
            Value::Module(Module::Db) if name == "name" => Ok(Value::from("database")),
            Value::Module(Module::Collections) => builtins::collections_member(name)
                .ok_or_else(|| SupertoolError::attribute("module", name)),
            Value::Object(o) => match o.field(name) {
                Some(value) => Ok(value.clone()),
                None if builtins::has_method(object, name) => Ok(method(object, name)),
                None => Err(SupertoolError::attribute(o.kind, name)),
            },
            Value::Transaction(txn) if name == "title" => Ok(Value::from(txn.borrow().title())),
            other if builtins::has_method(other, name) => Ok(method(other, name)),
            other => Err(SupertoolError::attribute(other.type_name(), name)),
        }
    }

    fn set_attribute(&mut self, object: &Value, name: &str, value: &Value) -> Result<()> {
        match object {
            Value::Proxy(proxy) => proxy.set_attribute(name, value),
            Value::Null => Ok(()),
            other => Err(SupertoolError::attribute(other.type_name(), name)),
        }
    }

    /// Materializes anything iterable; `env` yields the names it binds.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>> {
        match value {
            Value::Env => Ok(self.global_names().into_iter().map(Value::from).collect()),
            other => builtins::iterate(other),
        }
    }

    // ------------- Subscripts -------------
    /// `object[index]`. A dict with a default factory stores the factory's
    /// value under a missing key; `env` reads the script's own names.
    pub fn subscript(&mut self, object: &Value, index: &Value) -> Result<Value> {
        match object {
            Value::Env => {
                let name = env_name(index)?;
                self.globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SupertoolError::Script(format!("KeyError: {}", index.repr())))
            }
            Value::Dict(dict) => {
                let factory = {
                    let dict = dict.borrow();
                    match dict.default_factory() {
                        Some(factory) if !dict.contains(index)? => Some(factory.clone()),
                        _ => None,
                    }
                };
                match factory {
                    Some(factory) => {
                        let value = self.call(&factory, Arguments::default())?;
                        dict.borrow_mut().insert(index.clone(), value.clone())?;
                        Ok(value)
                    }
                    None => get_item(object, index),
                }
            }
            other => get_item(other, index),
        }
    }

    fn store_item(&mut self, object: &Value, index: &Value, value: Value) -> Result<()> {
        match object {
            Value::Env => {
                let name = env_name(index)?;
                self.globals.insert(name, value);
                Ok(())
            }
            other => set_item(other, index, value),
        }
    }

    // ------------- Env -------------
    pub(crate) fn global_names(&self) -> Vec<String> {
        self.globals.names().into_iter().map(String::from).collect()
    }

    pub(crate) fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name, value);
    }

    fn env_contains(&self, name: &Value) -> bool {
        name.as_str().is_some_and(|n| self.globals.contains(n))
    }
}

fn env_name(index: &Value) -> Result<&str> {
    index.as_str().ok_or_else(|| {
        SupertoolError::Type(format!("env keys must be str, not {}", index.type_name()))
    })
}

fn method(receiver: &Value, name: &str) -> Value {
    Value::Method(Rc::new(Method {
        receiver: receiver.clone(),
        name: Rc::from(name),
    }))
}

fn outside(message: &str) -> SupertoolError {
    SupertoolError::Syntax {
        message: message.to_string(),
        line: None,
        col: None,
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => lhs.add(rhs),
        BinaryOp::Sub => lhs.sub(rhs),
        BinaryOp::Mul => lhs.mul(rhs),
        BinaryOp::Div => lhs.div(rhs),
        BinaryOp::FloorDiv => lhs.floordiv(rhs),
        BinaryOp::Mod => lhs.modulo(rhs),
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool> {
    use std::cmp::Ordering::*;
    Ok(match op {
        CompareOp::Eq => lhs.equals(rhs),
        CompareOp::Ne => !lhs.equals(rhs),
        CompareOp::Lt => lhs.compare(rhs, op.symbol())? == Some(Less),
        CompareOp::Le => matches!(lhs.compare(rhs, op.symbol())?, Some(Less | Equal)),
        CompareOp::Gt => lhs.compare(rhs, op.symbol())? == Some(Greater),
        CompareOp::Ge => matches!(lhs.compare(rhs, op.symbol())?, Some(Greater | Equal)),
        CompareOp::In => lhs.contained_in(rhs)?,
        CompareOp::NotIn => !lhs.contained_in(rhs)?,
        CompareOp::Is => identical(lhs, rhs),
        CompareOp::IsNot => !identical(lhs, rhs),
    })
}

fn identical(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::None, Value::None) | (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Int(_), Value::Int(_)) | (Value::Str(_), Value::Str(_)) | (Value::Proxy(_), Value::Proxy(_)) => {
            lhs.equals(rhs)
        }
        (Value::Type(a), Value::Type(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

// ------------- Indexing -------------
fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index.saturating_add(len) } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn recursion_error() -> SupertoolError {
    SupertoolError::Script(String::from("RecursionError: maximum recursion depth exceeded"))
}

fn index_error(kind: &str) -> SupertoolError {
    SupertoolError::Script(format!("IndexError: {kind} index out of range"))
}

fn integer_index(object: &Value, index: &Value) -> Result<i64> {
    index.as_int().ok_or_else(|| {
        SupertoolError::Type(format!(
            "{} indices must be integers, not {}",
            object.type_name(),
            index.type_name()
        ))
    })
}

pub(crate) fn get_item(object: &Value, index: &Value) -> Result<Value> {
    match object {
        Value::Null => Ok(Value::Null),
        Value::List(items) => {
            let items = items.borrow();
            let i = integer_index(object, index)?;
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| index_error("list"))
        }
        Value::Tuple(items) => {
            let i = integer_index(object, index)?;
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| index_error("tuple"))
        }
        Value::Str(s) => {
            let i = integer_index(object, index)?;
            let chars: Vec<char> = s.chars().collect();
            normalize(i, chars.len())
                .map(|i| Value::from(chars[i].to_string()))
                .ok_or_else(|| index_error("string"))
        }
        Value::Dict(dict) => dict
            .borrow()
            .get(index)?
            .ok_or_else(|| SupertoolError::Script(format!("KeyError: {}", index.repr()))),
        other => Err(SupertoolError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(object: &Value, index: &Value, value: Value) -> Result<()> {
    match object {
        Value::List(items) => {
            let i = integer_index(object, index)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            match normalize(i, len) {
                Some(i) => {
                    items[i] = value;
                    Ok(())
                }
                None => Err(SupertoolError::Script(String::from(
                    "IndexError: list assignment index out of range",
                ))),
            }
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index.clone(), value),
        other => Err(SupertoolError::Type(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bounds(len: usize, lower: Option<&Value>, upper: Option<&Value>) -> Result<(usize, usize)> {
    let clamp = |v: Option<&Value>, default: usize| -> Result<usize> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = v.as_int().ok_or_else(|| {
                    SupertoolError::Type(String::from("slice indices must be integers or None"))
                })?;
                let len = len as i64;
                let i = if i < 0 { i.saturating_add(len).max(0) } else { i.min(len) };
                Ok(i as usize)
            }
        }
    };
    let start = clamp(lower, 0)?;
    let end = clamp(upper, len)?;
    Ok((start, end.max(start)))
}

fn slice(object: &Value, lower: Option<&Value>, upper: Option<&Value>) -> Result<Value> {
    match object {
        Value::Null => Ok(Value::Null),
        Value::List(items) => {
            let items = items.borrow();
            let (start, end) = slice_bounds(items.len(), lower, upper)?;
            Ok(Value::list(items[start..end].to_vec()))
        }
        Value::Tuple(items) => {
            let (start, end) = slice_bounds(items.len(), lower, upper)?;
            Ok(Value::tuple(items[start..end].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), lower, upper)?;
            Ok(Value::from(chars[start..end].iter().collect::<String>()))
        }
        other => Err(SupertoolError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}
