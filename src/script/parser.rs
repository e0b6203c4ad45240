//! pest grammar to AST.

use std::rc::Rc;

use lazy_static::lazy_static;
use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

use crate::error::{Result, SupertoolError};
use crate::script::ast::*;
use crate::script::layout::{DEDENT, INDENT, NEWLINE};

#[derive(Parser)]
#[grammar = "script/grammar.pest"]
pub struct ScriptParser;

lazy_static! {
    static ref PRATT: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left)
            | Op::infix(Rule::in_op, Assoc::Left)
            | Op::infix(Rule::not_in, Assoc::Left)
            | Op::infix(Rule::is_op, Assoc::Left)
            | Op::infix(Rule::is_not, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::floordiv, Assoc::Left)
            | Op::infix(Rule::modulo, Assoc::Left))
        .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos));
}

/// Parses statements that have been through the layout pass.
pub fn parse_program(text: &str) -> Result<Vec<Statement>> {
    let mut pairs = ScriptParser::parse(Rule::program, text).map_err(syntax_error)?;
    let program = pairs
        .next()
        .ok_or_else(|| SupertoolError::Invariant(String::from("empty parse of program")))?;
    let mut statements = Vec::new();
    for pair in program.into_inner() {
        build_statement(pair, &mut statements)?;
    }
    Ok(statements)
}

pub fn parse_expression(text: &str) -> Result<Expr> {
    let mut pairs = ScriptParser::parse(Rule::expression, text).map_err(syntax_error)?;
    let expression = pairs
        .next()
        .ok_or_else(|| SupertoolError::Invariant(String::from("empty parse of expression")))?;
    let list = expression
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr_list)
        .ok_or_else(|| SupertoolError::Invariant(String::from("expression without body")))?;
    build_expr_list(list)
}

fn syntax_error(e: pest::error::Error<Rule>) -> SupertoolError {
    let (line, col) = match e.line_col {
        LineColLocation::Pos((l, c)) => (l, c),
        LineColLocation::Span((l, c), _) => (l, c),
    };
    let e = e.renamed_rules(|rule| match rule {
        Rule::NL => String::from("end of line"),
        Rule::INDENT => String::from("indented block"),
        Rule::DEDENT => String::from("end of block"),
        Rule::EOI => String::from("end of input"),
        other => format!("{other:?}"),
    });
    let message: String = e
        .to_string()
        .chars()
        .filter(|c| *c != NEWLINE && *c != INDENT && *c != DEDENT)
        .collect();
    SupertoolError::Syntax {
        message: format!("invalid syntax at line {line}, column {col}\n{message}"),
        line: Some(line),
        col: Some(col),
    }
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_if
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_for
            | Rule::kw_in
            | Rule::kw_while
            | Rule::kw_def
            | Rule::kw_return
            | Rule::kw_raise
            | Rule::kw_lambda
    )
}

// inner pairs without the keyword tokens
fn parts(pair: Pair<'_, Rule>) -> Vec<Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule())).collect()
}

fn unexpected(pair: &Pair<'_, Rule>) -> SupertoolError {
    SupertoolError::Invariant(format!(
        "unexpected {:?} at '{}'",
        pair.as_rule(),
        pair.as_str()
    ))
}

// ------------- Statements -------------
fn build_statement(pair: Pair<'_, Rule>, out: &mut Vec<Statement>) -> Result<()> {
    match pair.as_rule() {
        Rule::simple_line => {
            for simple in pair.into_inner() {
                out.push(build_simple(simple)?);
            }
        }
        Rule::if_stmt => {
            let mut branches = Vec::new();
            let mut orelse = Vec::new();
            let mut items = parts(pair).into_iter();
            if let (Some(test), Some(block)) = (items.next(), items.next()) {
                branches.push((build_expr(test)?, build_block(block)?));
            }
            for clause in items {
                match clause.as_rule() {
                    Rule::elif_clause => {
                        let mut inner = parts(clause).into_iter();
                        if let (Some(test), Some(block)) = (inner.next(), inner.next()) {
                            branches.push((build_expr(test)?, build_block(block)?));
                        }
                    }
                    Rule::else_clause => {
                        if let Some(block) = parts(clause).into_iter().next() {
                            orelse = build_block(block)?;
                        }
                    }
                    _ => return Err(unexpected(&clause)),
                }
            }
            out.push(Statement::If { branches, orelse });
        }
        Rule::for_stmt => {
            let items = parts(pair);
            let [target, iter, block] = take3(items)?;
            out.push(Statement::For {
                target: build_target_list(target)?,
                iter: build_expr_list(iter)?,
                body: build_block(block)?,
            });
        }
        Rule::while_stmt => {
            let mut items = parts(pair).into_iter();
            match (items.next(), items.next()) {
                (Some(test), Some(block)) => out.push(Statement::While {
                    test: build_expr(test)?,
                    body: build_block(block)?,
                }),
                _ => return Err(SupertoolError::Invariant(String::from("malformed while"))),
            }
        }
        Rule::def_stmt => {
            let mut name = String::new();
            let mut params = Vec::new();
            let mut body = Vec::new();
            for item in parts(pair) {
                match item.as_rule() {
                    Rule::identifier => name = item.as_str().to_string(),
                    Rule::param_list => params = build_params(item)?,
                    Rule::block => body = build_block(item)?,
                    _ => return Err(unexpected(&item)),
                }
            }
            out.push(Statement::Def(Rc::new(FunctionDef {
                name,
                params,
                body: Body::Block(body),
            })));
        }
        Rule::EOI => {}
        _ => return Err(unexpected(&pair)),
    }
    Ok(())
}

fn take3(items: Vec<Pair<'_, Rule>>) -> Result<[Pair<'_, Rule>; 3]> {
    items
        .try_into()
        .map_err(|_| SupertoolError::Invariant(String::from("expected three parts")))
}

fn build_block(pair: Pair<'_, Rule>) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for item in pair.into_inner() {
        build_statement(item, &mut statements)?;
    }
    Ok(statements)
}

fn build_params(pair: Pair<'_, Rule>) -> Result<Vec<Param>> {
    pair.into_inner()
        .map(|param| {
            let mut inner = param.into_inner();
            let name = inner
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            let default = inner.next().map(build_expr).transpose()?;
            Ok(Param { name, default })
        })
        .collect()
}

fn build_simple(pair: Pair<'_, Rule>) -> Result<Statement> {
    Ok(match pair.as_rule() {
        Rule::pass_stmt => Statement::Pass,
        Rule::break_stmt => Statement::Break,
        Rule::continue_stmt => Statement::Continue,
        Rule::return_stmt => {
            Statement::Return(parts(pair).into_iter().next().map(build_expr_list).transpose()?)
        }
        Rule::raise_stmt => match parts(pair).into_iter().next() {
            Some(e) => Statement::Raise(build_expr(e)?),
            None => return Err(SupertoolError::Invariant(String::from("raise without value"))),
        },
        Rule::aug_assign => {
            let [target, op, value] = take3(parts(pair))?;
            let op = match op.as_str() {
                "+=" => BinaryOp::Add,
                "-=" => BinaryOp::Sub,
                "*=" => BinaryOp::Mul,
                "/=" => BinaryOp::Div,
                "//=" => BinaryOp::FloorDiv,
                _ => BinaryOp::Mod,
            };
            Statement::AugAssign(build_target(target)?, op, build_expr_list(value)?)
        }
        Rule::assign => {
            let mut items = parts(pair);
            let value = items
                .pop()
                .ok_or_else(|| SupertoolError::Invariant(String::from("assignment without value")))?;
            let targets = items
                .into_iter()
                .map(build_target_list)
                .collect::<Result<Vec<_>>>()?;
            Statement::Assign(targets, build_expr_list(value)?)
        }
        Rule::expr_stmt => match pair.into_inner().next() {
            Some(list) => Statement::Expr(build_expr_list(list)?),
            None => Statement::Pass,
        },
        _ => return Err(unexpected(&pair)),
    })
}

// ------------- Targets -------------
fn build_target_list(pair: Pair<'_, Rule>) -> Result<Target> {
    let mut targets = pair
        .into_inner()
        .map(build_target)
        .collect::<Result<Vec<_>>>()?;
    if targets.len() == 1 {
        Ok(targets.remove(0))
    } else {
        Ok(Target::Tuple(targets))
    }
}

fn build_target(pair: Pair<'_, Rule>) -> Result<Target> {
    let span = pair.as_str().to_string();
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| SupertoolError::Invariant(String::from("empty target")))?;
    match inner.as_rule() {
        Rule::target_list => build_target_list(inner),
        Rule::target => build_target(inner),
        Rule::postfix => expr_to_target(build_postfix(inner)?, &span),
        _ => Err(unexpected(&inner)),
    }
}

fn expr_to_target(expr: Expr, span: &str) -> Result<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Attribute(object, name) => Ok(Target::Attribute(*object, name)),
        Expr::Index(object, index) => Ok(Target::Index(*object, *index)),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|e| expr_to_target(e, span))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::Paren(inner) => expr_to_target(*inner, span),
        _ => Err(SupertoolError::Syntax {
            message: format!("cannot assign to '{span}'"),
            line: None,
            col: None,
        }),
    }
}

// ------------- Expressions -------------
fn build_expr_list(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut trailing = false;
    let mut exprs = Vec::new();
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::trailing_comma => trailing = true,
            _ => exprs.push(build_expr(item)?),
        }
    }
    if exprs.len() == 1 && !trailing {
        Ok(exprs.remove(0))
    } else {
        Ok(Expr::Tuple(exprs))
    }
}

fn build_expr(pair: Pair<'_, Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::lambda => {
            let mut params = Vec::new();
            let mut body = None;
            for item in parts(pair) {
                match item.as_rule() {
                    Rule::param_list => params = build_params(item)?,
                    _ => body = Some(build_expr(item)?),
                }
            }
            let body = body.ok_or_else(|| SupertoolError::Invariant(String::from("lambda without body")))?;
            Ok(Expr::Lambda(Rc::new(FunctionDef {
                name: String::from("<lambda>"),
                params,
                body: Body::Expr(body),
            })))
        }
        Rule::conditional => {
            let mut items = parts(pair).into_iter();
            let body = match items.next() {
                Some(first) => build_disjunction(first)?,
                None => return Err(SupertoolError::Invariant(String::from("empty expression"))),
            };
            match (items.next(), items.next()) {
                (Some(test), Some(orelse)) => Ok(Expr::Conditional {
                    test: Box::new(build_disjunction(test)?),
                    body: Box::new(body),
                    orelse: Box::new(build_expr(orelse)?),
                }),
                _ => Ok(body),
            }
        }
        Rule::disjunction => build_disjunction(pair),
        Rule::expr_list => build_expr_list(pair),
        _ => Err(unexpected(&pair)),
    }
}

fn build_disjunction(pair: Pair<'_, Rule>) -> Result<Expr> {
    PRATT
        .map_primary(build_postfix)
        .map_prefix(|op, rhs| {
            let op = match op.as_rule() {
                Rule::not_op => UnaryOp::Not,
                Rule::neg => UnaryOp::Neg,
                _ => UnaryOp::Pos,
            };
            Ok(Expr::Unary(op, Box::new(rhs?)))
        })
        .map_infix(|lhs, op, rhs| {
            let (lhs, rhs) = (lhs?, rhs?);
            let compare = match op.as_rule() {
                Rule::or_op => return Ok(Expr::Or(Box::new(lhs), Box::new(rhs))),
                Rule::and_op => return Ok(Expr::And(Box::new(lhs), Box::new(rhs))),
                Rule::add => return Ok(Expr::Binary(BinaryOp::Add, Box::new(lhs), Box::new(rhs))),
                Rule::sub => return Ok(Expr::Binary(BinaryOp::Sub, Box::new(lhs), Box::new(rhs))),
                Rule::mul => return Ok(Expr::Binary(BinaryOp::Mul, Box::new(lhs), Box::new(rhs))),
                Rule::div => return Ok(Expr::Binary(BinaryOp::Div, Box::new(lhs), Box::new(rhs))),
                Rule::floordiv => {
                    return Ok(Expr::Binary(BinaryOp::FloorDiv, Box::new(lhs), Box::new(rhs)));
                }
                Rule::modulo => return Ok(Expr::Binary(BinaryOp::Mod, Box::new(lhs), Box::new(rhs))),
                Rule::eq => CompareOp::Eq,
                Rule::ne => CompareOp::Ne,
                Rule::lt => CompareOp::Lt,
                Rule::le => CompareOp::Le,
                Rule::gt => CompareOp::Gt,
                Rule::ge => CompareOp::Ge,
                Rule::in_op => CompareOp::In,
                Rule::not_in => CompareOp::NotIn,
                Rule::is_op => CompareOp::Is,
                Rule::is_not => CompareOp::IsNot,
                _ => return Err(unexpected(&op)),
            };
            Ok(match lhs {
                Expr::Compare(first, mut rest) => {
                    rest.push((compare, rhs));
                    Expr::Compare(first, rest)
                }
                lhs => Expr::Compare(Box::new(lhs), vec![(compare, rhs)]),
            })
        })
        .parse(pair.into_inner())
}

fn build_postfix(pair: Pair<'_, Rule>) -> Result<Expr> {
    if pair.as_rule() != Rule::postfix {
        return Err(unexpected(&pair));
    }
    let mut items = pair.into_inner();
    let mut expr = match items.next() {
        Some(primary) => build_primary(primary)?,
        None => return Err(SupertoolError::Invariant(String::from("empty postfix"))),
    };
    for trailer in items {
        expr = match trailer.as_rule() {
            Rule::attribute => {
                let name = trailer
                    .into_inner()
                    .next()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                Expr::Attribute(Box::new(expr), name)
            }
            Rule::call => {
                let arguments = trailer
                    .into_inner()
                    .map(build_argument)
                    .collect::<Result<Vec<_>>>()?;
                Expr::Call(Box::new(expr), arguments)
            }
            Rule::index => {
                let inner = trailer
                    .into_inner()
                    .next()
                    .ok_or_else(|| SupertoolError::Invariant(String::from("empty index")))?;
                match inner.as_rule() {
                    Rule::slice => {
                        let mut bounds = inner.into_inner().map(|part| {
                            part.into_inner()
                                .next()
                                .map(|e| build_expr(e).map(Box::new))
                                .transpose()
                        });
                        let lower = bounds.next().transpose()?.flatten();
                        let upper = bounds.next().transpose()?.flatten();
                        Expr::Slice(Box::new(expr), lower, upper)
                    }
                    _ => Expr::Index(Box::new(expr), Box::new(build_expr_list(inner)?)),
                }
            }
            _ => return Err(unexpected(&trailer)),
        };
    }
    Ok(expr)
}

fn build_argument(pair: Pair<'_, Rule>) -> Result<Argument> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| SupertoolError::Invariant(String::from("empty argument")))?;
    match inner.as_rule() {
        Rule::keyword_arg => {
            let mut items = inner.into_inner();
            let name = items.next().map(|p| p.as_str().to_string());
            let value = match items.next() {
                Some(e) => build_expr(e)?,
                None => return Err(SupertoolError::Invariant(String::from("keyword without value"))),
            };
            Ok(Argument { name, value })
        }
        Rule::generator_arg => Ok(Argument {
            name: None,
            value: build_comprehension(inner)?,
        }),
        _ => Ok(Argument {
            name: None,
            value: build_expr(inner)?,
        }),
    }
}

fn build_comprehension(pair: Pair<'_, Rule>) -> Result<Expr> {
    let mut items = pair.into_inner();
    let element = match items.next() {
        Some(e) => build_expr(e)?,
        None => return Err(SupertoolError::Invariant(String::from("empty comprehension"))),
    };
    let mut clauses = Vec::new();
    for comp_for in items {
        let mut inner = parts(comp_for).into_iter();
        let (target, iter) = match (inner.next(), inner.next()) {
            (Some(t), Some(i)) => (build_target_list(t)?, build_disjunction(i)?),
            _ => return Err(SupertoolError::Invariant(String::from("malformed for clause"))),
        };
        let conditions = inner
            .map(|comp_if| match parts(comp_if).into_iter().next() {
                Some(test) => build_disjunction(test),
                None => Err(SupertoolError::Invariant(String::from("empty if clause"))),
            })
            .collect::<Result<Vec<_>>>()?;
        clauses.push(Clause {
            target,
            iter,
            conditions,
        });
    }
    Ok(Expr::Comprehension(Box::new(element), clauses))
}

fn build_primary(pair: Pair<'_, Rule>) -> Result<Expr> {
    Ok(match pair.as_rule() {
        Rule::integer => match pair.as_str().parse::<i64>() {
            Ok(i) => Expr::Literal(Literal::Int(i)),
            Err(_) => Expr::Literal(Literal::Float(pair.as_str().parse::<f64>().unwrap_or(f64::INFINITY))),
        },
        Rule::float => match pair.as_str().parse::<f64>() {
            Ok(f) => Expr::Literal(Literal::Float(f)),
            Err(e) => {
                return Err(SupertoolError::Syntax {
                    message: format!("invalid number '{}': {e}", pair.as_str()),
                    line: Some(pair.line_col().0),
                    col: Some(pair.line_col().1),
                });
            }
        },
        Rule::string => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Expr::Literal(Literal::Str(Rc::from(unescape(text))))
        }
        Rule::raw_string => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Expr::Literal(Literal::Str(Rc::from(text)))
        }
        Rule::true_lit => Expr::Literal(Literal::Bool(true)),
        Rule::false_lit => Expr::Literal(Literal::Bool(false)),
        Rule::none_lit => Expr::Literal(Literal::None),
        Rule::identifier => Expr::Name(pair.as_str().to_string()),
        Rule::list => Expr::List(pair.into_inner().map(build_expr).collect::<Result<_>>()?),
        Rule::tuple => Expr::Tuple(pair.into_inner().map(build_expr).collect::<Result<_>>()?),
        Rule::group => {
            let inner = match pair.into_inner().next() {
                Some(e) => build_expr(e)?,
                None => return Err(SupertoolError::Invariant(String::from("empty group"))),
            };
            Expr::Paren(Box::new(inner))
        }
        Rule::dict => {
            let mut items = Vec::new();
            for item in pair.into_inner() {
                let mut kv = item.into_inner();
                match (kv.next(), kv.next()) {
                    (Some(k), Some(v)) => items.push((build_expr(k)?, build_expr(v)?)),
                    _ => return Err(SupertoolError::Invariant(String::from("malformed dict item"))),
                }
            }
            Expr::Dict(items)
        }
        Rule::list_comp => build_comprehension(pair)?,
        Rule::generator => build_comprehension(pair)?,
        _ => return Err(unexpected(&pair)),
    })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::layout::layout;

    fn program(text: &str) -> Vec<Statement> {
        parse_program(&layout(text).unwrap()).unwrap()
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        let statements = program("passed = True\nformat = 1\nnothing = not passed\n");
        assert_eq!(statements.len(), 3);
        assert!(matches!(&statements[0], Statement::Assign(..)));
    }

    #[test]
    fn blocks_and_else() {
        let statements = program("if a:\n    b = 1\nelif c:\n    b = 2\nelse:\n    b = 3\n");
        match &statements[0] {
            Statement::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn precedence() {
        let expr = parse_expression("not a == b and c or d").unwrap();
        assert!(matches!(expr, Expr::Or(..)));
        let expr = parse_expression("1 + 2 * -3").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::Add, ..)));
        let expr = parse_expression("x not in y").unwrap();
        assert!(matches!(expr, Expr::Compare(_, ref rest) if rest[0].0 == CompareOp::NotIn));
    }

    #[test]
    fn bare_commas_make_a_tuple() {
        assert!(matches!(parse_expression("name, gender").unwrap(), Expr::Tuple(ref t) if t.len() == 2));
        assert!(matches!(parse_expression("(1,2,3)").unwrap(), Expr::Tuple(ref t) if t.len() == 3));
    }

    #[test]
    fn comprehensions_and_calls() {
        let expr = parse_expression("sorted([p.name for p in children if p.gender == 'F'], key=lambda n: n)").unwrap();
        assert!(matches!(expr, Expr::Call(_, ref args) if args.len() == 2 && args[1].name.as_deref() == Some("key")));
        assert!(parse_expression("sum(e.date.year for e in events)").is_ok());
    }

    #[test]
    fn syntax_errors_carry_position() {
        let err = parse_expression("name ==").unwrap_err();
        assert!(matches!(err, SupertoolError::Syntax { line: Some(1), .. }));
    }
}
