/// Expression evaluation for passage templates.
///
/// Templates depend only on the `Evaluator` trait. `ExpressionEvaluator` is
/// the built-in implementation: template code runs as Rhai script with
/// `passage`, `story` and the story's helpers in scope.
use std::cell::RefCell;
use std::rc::Rc;

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, ParseErrorType, Position, FLOAT, INT};
use serde_json::{Number, Value};

use crate::core::template::TemplateError;
use crate::schema::helpers::HelperContext;
use crate::schema::passage::{Passage, PassageId};
use crate::schema::save::StateBag;
use crate::schema::story::Story;

/// Nesting limit for template expressions (and for function bodies).
const MAX_EXPR_DEPTH: usize = 32;
const MAX_FUNCTION_EXPR_DEPTH: usize = 16;

/// Data a template is expanded against.
pub struct Scope<'a> {
    pub passage: &'a Passage,
    pub story: &'a Story,
    pub state: &'a mut StateBag,
    pub history: &'a [PassageId],
    pub checkpoint: &'a str,
}

/// Evaluates the code embedded in a template.
pub trait Evaluator {
    /// Evaluate an expression to a value.
    fn evaluate(&self, expr: &str, scope: &mut Scope<'_>) -> Result<Value, TemplateError>;

    /// Run a statement for its side effects.
    fn execute(&self, statement: &str, scope: &mut Scope<'_>) -> Result<(), TemplateError>;
}

/// JS-like truthiness: `null`, `false`, `0`, `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text a value contributes when interpolated.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => display_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

fn display_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Integral results stay integers so they save and print as `3`, not `3.0`.
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Runs template code as Rhai script.
///
/// `passage` is a constant map, `story` a map whose `state` entry is written
/// back to the story state after every run. Each story helper is callable
/// by name with up to eight arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl Evaluator for ExpressionEvaluator {
    fn evaluate(&self, expr: &str, scope: &mut Scope<'_>) -> Result<Value, TemplateError> {
        let value = run_script(expr, scope, true)?;
        from_dynamic(value).map_err(|message| expression_error(expr, message))
    }

    fn execute(&self, statement: &str, scope: &mut Scope<'_>) -> Result<(), TemplateError> {
        run_script(statement, scope, false).map(|_| ())
    }
}

fn run_script(
    script: &str,
    scope: &mut Scope<'_>,
    is_expression: bool,
) -> Result<Dynamic, TemplateError> {
    let calls = Rc::new(HelperCalls::new(scope));
    let engine = script_engine(&calls);

    let mut vars = rhai::Scope::new();
    vars.push_constant_dynamic("passage", passage_map(scope.passage));
    vars.push_dynamic("story", story_map(scope));

    let result = if is_expression {
        engine.eval_with_scope::<Dynamic>(&mut vars, &format!("({})", script))
    } else {
        engine
            .run_with_scope(&mut vars, script)
            .map(|()| Dynamic::UNIT)
    };

    if let Some(failure) = calls.failure.take() {
        return Err(failure);
    }
    let value = result.map_err(|error| script_error(script, *error))?;

    let mut state = written_state(script, &vars)?;
    calls.apply_writes(&mut state);
    *scope.state = state;
    Ok(value)
}

fn script_engine(calls: &Rc<HelperCalls>) -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH);

    // Rhai functions have a fixed arity; register every helper at each
    // arity so variadic helpers like `either` work.
    macro_rules! register_arities {
        ($name:expr, $( ( $($arg:ident),* ) ),+ $(,)?) => {
            $(
                let shared = Rc::clone(calls);
                let helper = $name.to_string();
                engine.register_fn(
                    $name,
                    move |$($arg: Dynamic),*| -> Result<Dynamic, Box<EvalAltResult>> {
                        shared.call(&helper, vec![$($arg),*])
                    },
                );
            )+
        };
    }

    for name in calls.story.helpers().names() {
        register_arities!(
            name,
            (),
            (a),
            (a, b),
            (a, b, c),
            (a, b, c, d),
            (a, b, c, d, e),
            (a, b, c, d, e, f),
            (a, b, c, d, e, f, g),
            (a, b, c, d, e, f, g, h),
        );
    }
    engine
}

/// What helper calls made from a script run against.
///
/// Helpers see the state as it was when the script started; their writes
/// are laid over the script's own assignments once it finishes.
struct HelperCalls {
    story: Story,
    passage: Passage,
    history: Vec<PassageId>,
    before: StateBag,
    state: RefCell<StateBag>,
    failure: RefCell<Option<TemplateError>>,
}

impl HelperCalls {
    fn new(scope: &Scope<'_>) -> Self {
        Self {
            story: scope.story.clone(),
            passage: scope.passage.clone(),
            history: scope.history.to_vec(),
            before: scope.state.clone(),
            state: RefCell::new(scope.state.clone()),
            failure: RefCell::new(None),
        }
    }

    fn call(&self, name: &str, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(from_dynamic(arg).map_err(runtime_error)?);
        }
        let Some(helper) = self.story.helpers().get(name) else {
            return Err(Box::new(EvalAltResult::ErrorFunctionNotFound(
                name.to_string(),
                Position::NONE,
            )));
        };

        let mut state = self.state.borrow_mut();
        let mut ctx = HelperContext {
            story: &self.story,
            passage: &self.passage,
            state: &mut *state,
            history: &self.history,
        };
        match helper(&mut ctx, &values) {
            Ok(value) => Ok(to_dynamic(&value)),
            Err(source) => {
                let message = source.to_string();
                *self.failure.borrow_mut() = Some(TemplateError::Helper {
                    name: name.to_string(),
                    source,
                });
                Err(runtime_error(message))
            }
        }
    }

    fn apply_writes(&self, state: &mut StateBag) {
        let after = self.state.take();
        for (key, value) in &after {
            if self.before.get(key) != Some(value) {
                state.insert(key.clone(), value.clone());
            }
        }
        for key in self.before.keys() {
            if !after.contains_key(key) {
                state.remove(key);
            }
        }
    }
}

fn passage_map(passage: &Passage) -> Dynamic {
    let mut map = Map::new();
    map.insert("id".into(), Dynamic::from_int(INT::from(passage.id.0)));
    map.insert("name".into(), Dynamic::from(passage.name.clone()));
    map.insert(
        "tags".into(),
        Dynamic::from_array(passage.tags.iter().cloned().map(Dynamic::from).collect()),
    );
    map.insert("source".into(), Dynamic::from(passage.source.clone()));
    Dynamic::from_map(map)
}

fn story_map(scope: &Scope<'_>) -> Dynamic {
    let story = scope.story;
    let mut map = Map::new();
    map.insert("name".into(), Dynamic::from(story.name.clone()));
    map.insert("ifid".into(), story.ifid.clone().map_or(Dynamic::UNIT, Dynamic::from));
    map.insert("creator".into(), story.creator.clone().map_or(Dynamic::UNIT, Dynamic::from));
    map.insert("start".into(), Dynamic::from_int(INT::from(story.start().0)));
    map.insert("state".into(), state_map(scope.state));
    map.insert(
        "history".into(),
        Dynamic::from_array(
            scope
                .history
                .iter()
                .map(|id| Dynamic::from_int(INT::from(id.0)))
                .collect(),
        ),
    );
    map.insert("checkpoint".into(), Dynamic::from(scope.checkpoint.to_string()));
    map.insert("config".into(), to_dynamic(&story.config().to_json()));
    Dynamic::from_map(map)
}

fn state_map(state: &StateBag) -> Dynamic {
    let mut map = Map::new();
    for (key, value) in state {
        map.insert(key.as_str().into(), to_dynamic(value));
    }
    Dynamic::from_map(map)
}

/// Read `story.state` back out of the script scope.
fn written_state(script: &str, vars: &rhai::Scope<'_>) -> Result<StateBag, TemplateError> {
    let state = vars
        .get_value::<Map>("story")
        .and_then(|mut story| story.remove("state"))
        .ok_or_else(|| TemplateError::InvalidAssignment("story".to_string()))?;
    let Some(state) = state.try_cast::<Map>() else {
        return Err(TemplateError::InvalidAssignment("story.state".to_string()));
    };

    let mut bag = StateBag::new();
    for (key, value) in state {
        let value = from_dynamic(value).map_err(|message| expression_error(script, message))?;
        bag.insert(key.to_string(), value);
    }
    Ok(bag)
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from_int(i),
            None => Dynamic::from_float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Object(obj) => {
            let mut map = Map::new();
            for (key, value) in obj {
                map.insert(key.as_str().into(), to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Result<Value, String> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if value.is::<bool>() {
        return Ok(Value::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(Value::from(value.cast::<INT>()));
    }
    if value.is::<FLOAT>() {
        return Ok(number_value(value.cast::<FLOAT>()));
    }
    if value.is::<char>() {
        return Ok(Value::String(value.cast::<char>().to_string()));
    }
    if value.is::<ImmutableString>() {
        return Ok(Value::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut items = Vec::with_capacity(array.len());
        for item in array {
            items.push(from_dynamic(item)?);
        }
        return Ok(Value::Array(items));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut obj = serde_json::Map::new();
        for (key, value) in map {
            obj.insert(key.to_string(), from_dynamic(value)?);
        }
        return Ok(Value::Object(obj));
    }
    Err(format!("unsupported value of type {}", value.type_name()))
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE))
}

fn expression_error(expr: &str, message: String) -> TemplateError {
    TemplateError::Expression {
        expr: expr.trim().to_string(),
        message,
    }
}

fn script_error(script: &str, error: EvalAltResult) -> TemplateError {
    match error {
        EvalAltResult::ErrorVariableNotFound(name, _)
        | EvalAltResult::ErrorParsing(ParseErrorType::VariableUndefined(name), _) => {
            TemplateError::UnknownIdentifier(name)
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            TemplateError::UnknownHelper(helper_name(&signature).to_string())
        }
        EvalAltResult::ErrorAssignmentToConstant(name, _)
        | EvalAltResult::ErrorParsing(ParseErrorType::AssignmentToConstant(name), _) => {
            TemplateError::InvalidAssignment(name)
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => script_error(script, *inner),
        other => expression_error(script, other.to_string()),
    }
}

/// `fly (i64, string)` → `fly`
fn helper_name(signature: &str) -> &str {
    signature.split('(').next().unwrap_or(signature).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        Story::builder("Eval Story")
            .start(PassageId(1))
            .passage(Passage::new(PassageId(1), "Start", ["checkpoint"], "text"))
            .passage(Passage::new(PassageId(2), "Room", Vec::<String>::new(), ""))
            .helper("double", |_, args| {
                let n = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(Value::from(n * 2))
            })
            .helper("give", |ctx, args| {
                let item = args.first().cloned().unwrap_or(Value::Null);
                ctx.state.insert("item".to_string(), item);
                Ok(Value::Null)
            })
            .build()
            .unwrap()
    }

    fn with_scope<T>(state: &mut StateBag, f: impl FnOnce(&mut Scope<'_>) -> T) -> T {
        let story = story();
        let passage = story.passage(PassageId(1)).unwrap().clone();
        let history = [PassageId(1)];
        let mut scope = Scope {
            passage: &passage,
            story: &story,
            state,
            history: &history,
            checkpoint: "Start",
        };
        f(&mut scope)
    }

    fn evaluate(expr: &str, state: &mut StateBag) -> Result<Value, TemplateError> {
        with_scope(state, |scope| ExpressionEvaluator.evaluate(expr, scope))
    }

    fn execute(statement: &str, state: &mut StateBag) -> Result<(), TemplateError> {
        with_scope(state, |scope| ExpressionEvaluator.execute(statement, scope))
    }

    #[test]
    fn literals_and_arithmetic() {
        let mut state = StateBag::new();
        assert_eq!(evaluate("1 + 2 * 3", &mut state).unwrap(), Value::from(7));
        assert_eq!(evaluate("(1 + 2) * 3", &mut state).unwrap(), Value::from(9));
        assert_eq!(evaluate("7 % 4", &mut state).unwrap(), Value::from(3));
        assert_eq!(evaluate(r#""a" + 1"#, &mut state).unwrap(), Value::from("a1"));
        assert_eq!(evaluate("2.5 * 2.0", &mut state).unwrap(), Value::from(5));
        assert_eq!(evaluate("[1, \"x\"]", &mut state).unwrap(), serde_json::json!([1, "x"]));
    }

    #[test]
    fn passage_and_story_roots() {
        let mut state = StateBag::new();
        assert_eq!(evaluate("passage.name", &mut state).unwrap(), Value::from("Start"));
        assert_eq!(evaluate("passage.tags[0]", &mut state).unwrap(), Value::from("checkpoint"));
        assert_eq!(evaluate("story.name", &mut state).unwrap(), Value::from("Eval Story"));
        assert_eq!(evaluate("story.history.len()", &mut state).unwrap(), Value::from(1));
        assert_eq!(evaluate("story.checkpoint", &mut state).unwrap(), Value::from("Start"));
        assert_eq!(evaluate("story.ifid", &mut state).unwrap(), Value::Null);
    }

    #[test]
    fn missing_state_is_null() {
        let mut state = StateBag::new();
        assert_eq!(evaluate("story.state.gold", &mut state).unwrap(), Value::Null);
    }

    #[test]
    fn comparisons_and_logic() {
        let mut state = StateBag::new();
        state.insert("gold".to_string(), Value::from(5));
        assert_eq!(evaluate("story.state.gold >= 5", &mut state).unwrap(), Value::Bool(true));
        assert_eq!(evaluate("story.state.gold == 5", &mut state).unwrap(), Value::Bool(true));
        assert_eq!(
            evaluate(r#""b" > "a" && 1 < 2"#, &mut state).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            evaluate(r#"if story.state.gold > 3 { "rich" } else { "poor" }"#, &mut state).unwrap(),
            Value::from("rich")
        );
    }

    #[test]
    fn helpers_are_called_by_name() {
        let mut state = StateBag::new();
        assert_eq!(evaluate("double(21)", &mut state).unwrap(), Value::from(42));
        assert_eq!(evaluate(r#"visited("Start")"#, &mut state).unwrap(), Value::from(1));
        assert_eq!(evaluate("visited()", &mut state).unwrap(), Value::from(1));
        assert_eq!(evaluate("has_visited(2)", &mut state).unwrap(), Value::Bool(false));
        evaluate(r#"give("lamp")"#, &mut state).unwrap();
        assert_eq!(state.get("item"), Some(&Value::from("lamp")));
    }

    #[test]
    fn helper_writes_survive_script_assignments() {
        let mut state = StateBag::new();
        execute(r#"story.state.gold = 3; give("rope")"#, &mut state).unwrap();
        assert_eq!(state["gold"], Value::from(3));
        assert_eq!(state["item"], Value::from("rope"));
    }

    #[test]
    fn helper_failures_keep_their_source() {
        let mut state = StateBag::new();
        let err = evaluate(r#"has_visited("Start", "Room")"#, &mut state).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Helper { ref name, source: crate::schema::helpers::HelperError::Arity { got: 2, .. } }
                if name == "has_visited"
        ));
    }

    #[test]
    fn unknown_names_are_errors() {
        let mut state = StateBag::new();
        assert!(matches!(
            evaluate("player.hp", &mut state),
            Err(TemplateError::UnknownIdentifier(name)) if name == "player"
        ));
        assert!(matches!(
            evaluate("fly()", &mut state),
            Err(TemplateError::UnknownHelper(name)) if name == "fly"
        ));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut state = StateBag::new();
        assert!(matches!(
            evaluate("1 +", &mut state),
            Err(TemplateError::Expression { .. })
        ));
        assert!(evaluate(r#""open"#, &mut state).is_err());
        assert!(evaluate("1 / 0", &mut state).is_err());
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let mut state = StateBag::new();
        let expr = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(
            evaluate(&expr, &mut state),
            Err(TemplateError::Expression { .. })
        ));
    }

    #[test]
    fn assignments_write_state() {
        let mut state = StateBag::new();
        execute("story.state.gold = 10", &mut state).unwrap();
        execute("story.state.gold += 5", &mut state).unwrap();
        execute(r#"story.state.bag = #{ items: ["rope"] }"#, &mut state).unwrap();
        execute(r#"story.state.bag.items.push("torch")"#, &mut state).unwrap();
        execute(r#"story.state["door open"] = true"#, &mut state).unwrap();
        assert_eq!(state["gold"], Value::from(15));
        assert_eq!(state["bag"]["items"], serde_json::json!(["rope", "torch"]));
        assert_eq!(state["door open"], Value::Bool(true));
    }

    #[test]
    fn local_variables_do_not_leak() {
        let mut state = StateBag::new();
        execute("let total = 2 + 2; story.state.total = total", &mut state).unwrap();
        assert_eq!(state["total"], Value::from(4));
        assert!(matches!(
            evaluate("total", &mut state),
            Err(TemplateError::UnknownIdentifier(name)) if name == "total"
        ));
    }

    #[test]
    fn replacing_state_is_rejected() {
        let mut state = StateBag::new();
        state.insert("gold".to_string(), Value::from(1));
        let result = execute("story.state = 1", &mut state);
        assert!(matches!(result, Err(TemplateError::InvalidAssignment(ref path)) if path == "story.state"));
        assert_eq!(state["gold"], Value::from(1));
    }

    #[test]
    fn display_values() {
        assert_eq!(display_value(&Value::Null), "");
        assert_eq!(display_value(&Value::from(3)), "3");
        assert_eq!(display_value(&Value::from(2.5)), "2.5");
        assert_eq!(display_value(&serde_json::json!([1, "a"])), "1,a");
        assert!(!truthy(&Value::from("")));
        assert!(truthy(&serde_json::json!({})));
    }

    #[test]
    fn helper_names_from_signatures() {
        assert_eq!(helper_name("fly ()"), "fly");
        assert_eq!(helper_name("fly (i64, string)"), "fly");
    }
}
