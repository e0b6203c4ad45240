mod common;

use std::fs;

use common::*;
use supertool::context::{self, Context};
use supertool::error::SupertoolError;
use supertool::query::Query;
use supertool::script::{self, IncludePath, Mode, Runtime};
use supertool::value::Value;

fn fresh() -> (Runtime, Context) {
    let db = family_tree();
    let context = context::build(None, None, &Context::new(), None).expect("context");
    (runtime(&db), context)
}

fn eval(code: &str) -> String {
    let (runtime, mut context) = fresh();
    script::run(code, &mut context, Mode::Expression, &runtime)
        .expect("evaluates")
        .to_string()
}

#[test]
fn missing_relationships_read_as_empty() {
    let db = family_tree();
    let outcome = run(
        &db,
        &people("birth.place.enclosed_by[0].name, death.date.year - birth.date.year, len(death.place.citations)"),
    );
    assert_eq!(
        texts(&outcome.rows),
        vec![
            vec!["I0001", "Sweden", "80", "0", "20"],
            vec!["I0002", "", "0", "0", "21"],
            vec!["I0003", "", "0", "0", "22"],
        ]
    );
}

#[test]
fn null_is_falsy_and_iterates_as_empty() {
    let db = family_tree();
    let query = Query {
        filter: "birth.place".into(),
        ..people("[n for n in death.place.notes], birth.place.name")
    };
    let outcome = run(&db, &query);
    assert_eq!(texts(&outcome.rows), vec![vec!["I0001", "[]", "Uppsala", "20"]]);
}

#[test]
fn relationships_reach_across_records() {
    let db = family_tree();
    let query = Query {
        category: "Families".into(),
        ..people("father.name, mother.gender, [c.birth.date.year for c in children], father.notes[0].text")
    };
    let outcome = run(&db, &query);
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["F0001", "Smith, John", "F", "[1925]", "From the parish register", "30"]]
    );

    let places = run(
        &db,
        &Query {
            category: "Places".into(),
            ..people("longname, [p.name for p in encloses]")
        },
    );
    assert_eq!(
        texts(&places.rows),
        vec![vec!["P0001", "Sweden", "['Uppsala']", "1"], vec!["P0002", "Uppsala, Sweden", "[]", "2"]]
    );
}

#[test]
fn builtins_and_helpers() {
    assert_eq!(eval("[x * 2 for x in range(5) if x % 2 == 0]"), "[0, 4, 8]");
    assert_eq!(eval("sorted(['b', 'A', 'c'], key=lambda s: s.lower())"), "['A', 'b', 'c']");
    assert_eq!(eval("'{}-{:03d}'.format('x', 7)"), "x-007");
    assert_eq!(eval(r"re.sub(r'(\w+) (\w+)', r'\2 \1', 'John Smith')"), "Smith John");
    assert_eq!(eval("uniq([3, 1, 3, 2, 1])"), "[3, 1, 2]");
    assert_eq!(eval("flatten([[1], [], [2, 3]])"), "[1, 2, 3]");
    assert_eq!(eval("makedate(2000, 1, 1) - makedate(1950, 6, 1)"), "49");
    assert_eq!(eval("makedate(1900, 5) < makedate(1900, 6), makedate(1900) > 1899"), "(True, True)");
    assert_eq!(eval("(makedate(1900, 5, 1) + 10).year"), "1910");
    assert_eq!(eval("'genealogy'[1:4], len({'a': 1})"), "('ene', 1)");
}

#[test]
fn statements_share_the_context() {
    let (runtime, mut context) = fresh();
    let code = "
def fact(n, acc=1):
    if n <= 1:
        return acc
    return fact(n - 1, acc * n)

total = 0
i = 0
while True:
    i += 1
    if i > 4: break
    total += i
a, b = (1, 2)
names = {'john': 'Smith'}
names.setdefault('mary', 'Jones')
";
    script::run(code, &mut context, Mode::Statements, &runtime).expect("runs");
    let value = script::run("fact(5), total, a + b, sorted(names.keys())", &mut context, Mode::Expression, &runtime)
        .expect("evaluates");
    assert_eq!(value.to_string(), "(120, 10, 3, ['john', 'mary'])");
    assert!(matches!(context.get("total"), Some(Value::Int(10))));
}

#[test]
fn expressions_may_span_lines() {
    assert_eq!(eval("(1 +\n 2,\n 'x')"), "(3, 'x')");
}

#[test]
fn includes_are_expanded() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("helpers.script"), "def double(x):\n    return x * 2\n").unwrap();
    let db = family_tree();
    let runtime = Runtime::new(
        db,
        Default::default(),
        IncludePath::new(vec![dir.path().to_path_buf()]),
    );
    let mut context = Context::new();
    script::run("@include helpers.script\ny = double(21)", &mut context, Mode::Statements, &runtime).unwrap();
    assert!(matches!(context.get("y"), Some(Value::Int(42))));

    let error = script::run("@include missing.script", &mut context, Mode::Statements, &runtime).unwrap_err();
    let text = error.to_string();
    assert!(text.starts_with("Include file 'missing.script' not found; looked at\n- "), "{text}");
    assert!(text.contains(&dir.path().join("missing.script").display().to_string()));

    let error = script::run("@include", &mut context, Mode::Statements, &runtime).unwrap_err();
    assert_eq!(error.to_string(), "Include file name missing");
}

#[test]
fn diagnostics_are_shortened() {
    let (runtime, mut context) = fresh();
    let error = script::run("x = (1,\ny = 2", &mut context, Mode::Statements, &runtime).unwrap_err();
    assert!(matches!(error, SupertoolError::Syntax { .. }));
    let diagnostic = error.diagnostic();
    assert!(diagnostic.lines().count() <= 3);
    assert!(error.to_string().starts_with("SyntaxError"));

    let error = script::run("undefined_name + 1", &mut context, Mode::Expression, &runtime).unwrap_err();
    assert_eq!(error.diagnostic(), "NameError: name 'undefined_name' is not defined");

    let error = script::run("raise Exception('bad data')", &mut context, Mode::Statements, &runtime).unwrap_err();
    assert_eq!(error.diagnostic(), "bad data");
}

#[test]
fn injected_bindings_shadow_attributes() {
    let db = family_tree();
    let query = Query {
        initial_statements: "name = 'hidden'".into(),
        ..people("name, self.gramps_id")
    };
    let outcome = run(&db, &query);
    assert_eq!(outcome.rows[0].to_strings(), vec!["I0001", "hidden", "I0001", "20"]);
}

#[test]
fn sorting_places_null_first_among_many_values() {
    let db = family_tree();
    let query = Query {
        statements: "vals = [x if x % 3 else death.place for x in range(30, 0, -1)]".into(),
        filter: "gramps_id == 'I0001'".into(),
        ..people("len(sorted(vals)), sorted(vals)[10:14], max(vals), sorted(vals, reverse=True)[0]")
    };
    let outcome = run(&db, &query);
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["I0001", "30", "[1, 2, 4, 5]", "29", "29", "20"]]
    );

    assert_eq!(eval("sorted([3, None, 1.5, True])"), "[None, True, 1.5, 3]");

    let (runtime, mut context) = fresh();
    let error = script::run("sorted([1, 'a', 2])", &mut context, Mode::Expression, &runtime).unwrap_err();
    assert_eq!(error.to_string(), "TypeError: '<' not supported between instances of 'str' and 'int'");
}

#[test]
fn integer_edges_raise_instead_of_crashing() {
    let (runtime, mut context) = fresh();
    let mut failure = |code: &str| {
        script::run(code, &mut context, Mode::Expression, &runtime)
            .unwrap_err()
            .diagnostic()
    };
    assert_eq!(failure("len([1, 2] * 9223372036854775807)"), "MemoryError");
    assert_eq!(failure("len('ab' * 9223372036854775807)"), "MemoryError");
    assert_eq!(failure("-(-9223372036854775807 - 1)"), "OverflowError: integer negation result too large");
    assert_eq!(failure("9223372036854775807 + 1"), "OverflowError: integer addition result too large");
    assert_eq!(failure("(-9223372036854775807 - 1) // -1"), "OverflowError: integer division result too large");
    assert_eq!(failure("abs(-9223372036854775807 - 1)"), "OverflowError: integer absolute value result too large");
    assert_eq!(failure("len(range(0, 9223372036854775807))"), "MemoryError");
    assert_eq!(
        failure("'{:99999999999999999999}'.format(1)"),
        "ValueError: Too many decimal digits in format string"
    );
    assert_eq!(eval("range(9223372036854775800, 9223372036854775807, 10)"), "[9223372036854775800]");
    assert_eq!(eval("[1, 2, 3][-9223372036854775807 - 1:]"), "[1, 2, 3]");
}

#[test]
fn env_is_the_live_namespace() {
    let (runtime, mut context) = fresh();
    script::run(
        "env['count'] = 3\nseen = 'count' in env\nmissing = env.get('nothing', 'fallback')",
        &mut context,
        Mode::Statements,
        &runtime,
    )
    .expect("runs");
    let value = script::run("count, seen, missing, 'env' in env", &mut context, Mode::Expression, &runtime)
        .expect("evaluates");
    assert_eq!(value.to_string(), "(3, True, 'fallback', True)");
}

#[test]
fn defaultdict_groups_records_in_a_summary() {
    let db = family_tree();
    let query = Query {
        initial_statements: "groups = defaultdict(list)\ncounts = collections.defaultdict(int)".into(),
        statements: "groups[gender].append(name)\ncounts[gender] += 1".into(),
        summary_only: true,
        ..people("sorted(groups.keys()), groups['M'], counts['M'], counts['F'], len(groups['U'])")
    };
    let outcome = run(&db, &query);
    assert_eq!(
        texts(&outcome.rows),
        vec![vec!["", "['F', 'M']", "['Smith, John', 'Smith, Tom']", "2", "1", "0", ""]]
    );
}

#[test]
fn names_and_event_references_are_objects() {
    let db = family_tree();
    let query = Query {
        filter: "gramps_id == 'I0001'".into(),
        ..people("[n.surname for n in nameobjs], nameobjs[0].get_first_name(), nameobjs[0]")
    };
    assert_eq!(
        texts(&run(&db, &query).rows),
        vec![vec!["I0001", "['Smith']", "John", "Smith, John", "20"]]
    );

    let events = Query {
        category: "Events".into(),
        filter: "refs".into(),
        ..people("[(r.role, r.referrer.gramps_id, r.ref) for r in refs]")
    };
    assert_eq!(
        texts(&run(&db, &events).rows),
        vec![
            vec!["E0001", "[('Primary', 'I0001', 10)]", "10"],
            vec!["E0002", "[('Primary', 'I0003', 11)]", "11"],
            vec!["E0003", "[('Primary', 'I0001', 12)]", "12"],
        ]
    );
}
