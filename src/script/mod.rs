//! The script language: a small, sandboxed Python-like language evaluated
//! against an evaluation [`Context`].
//!
//! Source goes through the include expansion (statements only), the layout
//! pass that turns indentation into explicit block markers, the pest grammar
//! and finally the tree-walking [`interpreter::Interpreter`].

pub mod ast;
pub mod builtins;
pub mod include;
pub mod interpreter;
pub mod layout;
pub mod parser;

use std::sync::Arc;

use crate::context::Context;
use crate::database::Database;
use crate::error::Result;
use crate::filters::FilterStore;
use crate::value::Value;

pub use include::IncludePath;
pub use interpreter::CallChain;
use interpreter::Interpreter;

/// What a script needs besides its context: the database behind the proxies,
/// the custom filters and the include search path.
#[derive(Clone)]
pub struct Runtime {
    pub db: Arc<Database>,
    pub filters: FilterStore,
    pub includes: IncludePath,
}

impl Runtime {
    pub fn new(db: Arc<Database>, filters: FilterStore, includes: IncludePath) -> Self {
        Self { db, filters, includes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Statements,
    Expression,
}

#[derive(Debug, Clone)]
enum Compiled {
    Statements(Vec<ast::Statement>),
    Expression(ast::Expr),
}

/// A compiled fragment, ready to run any number of times.
#[derive(Debug, Clone)]
pub struct Script {
    compiled: Compiled,
}

impl Script {
    pub fn compile(code: &str, mode: Mode, includes: &IncludePath) -> Result<Script> {
        let compiled = match mode {
            Mode::Statements => {
                let code = includes.expand(code)?;
                let laid_out = layout::layout(&code)?;
                Compiled::Statements(parser::parse_program(&laid_out)?)
            }
            Mode::Expression => Compiled::Expression(parser::parse_expression(&code.replace('\n', " "))?),
        };
        Ok(Script { compiled })
    }

    pub fn mode(&self) -> Mode {
        match self.compiled {
            Compiled::Statements(_) => Mode::Statements,
            Compiled::Expression(_) => Mode::Expression,
        }
    }

    /// Statements yield `None`; an expression yields its value.
    pub fn run(&self, runtime: &Runtime, context: &mut Context) -> Result<Value> {
        self.run_in(runtime, context, &CallChain::default())
    }

    /// Runs as part of the call chain of another script, as custom filters do.
    pub fn run_in(&self, runtime: &Runtime, context: &mut Context, chain: &CallChain) -> Result<Value> {
        let mut interpreter = Interpreter::new(runtime, context).with_chain(chain.clone());
        match &self.compiled {
            Compiled::Statements(statements) => {
                interpreter.execute(statements)?;
                Ok(Value::None)
            }
            Compiled::Expression(expr) => interpreter.evaluate(expr),
        }
    }
}

/// Compiles and runs `code` once.
pub fn run(code: &str, context: &mut Context, mode: Mode, runtime: &Runtime) -> Result<Value> {
    Script::compile(code, mode, &runtime.includes)?.run(runtime, context)
}
