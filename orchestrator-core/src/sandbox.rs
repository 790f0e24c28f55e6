//! Restricted execution environment for `scriptTask` scripts.
//!
//! Scripts run against a fresh `rhai::Engine` per call: no filesystem,
//! network, or process functions are ever registered on it, `eval` is
//! disabled, and operation/recursion/collection-size ceilings bound
//! runaway scripts. Two bindings are exposed, `data` (the workflow's
//! shared state) and `task_data` (scoped to this task); a script may
//! mutate either and may optionally assign a `result` variable to
//! report a value back to the caller.

use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};

const MAX_OPERATIONS: u64 = 200_000;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_STRING_SIZE: usize = 64 * 1024;
const MAX_COLLECTION_SIZE: usize = 10_000;

#[derive(Debug)]
pub struct ScriptOutcome {
    pub data: Map<String, Value>,
    pub result: Option<Value>,
}

/// Run `script` with `data` and `task_data` bound in scope. Returns
/// the (possibly mutated) `data` map and an optional `result` value.
/// Errors are plain detail strings; the caller is responsible for
/// wrapping them with task identity, matching the message shape this
/// engine has always produced for script failures.
pub fn run_script(
    script: &str,
    data: &Map<String, Value>,
    task_data: &Map<String, Value>,
) -> Result<ScriptOutcome, String> {
    if script.trim().is_empty() {
        return Err("missing script".to_string());
    }

    let engine = build_engine();
    let mut scope = Scope::new();

    let data_dynamic = to_dynamic(data)?;
    let task_data_dynamic = to_dynamic(task_data)?;
    scope.push("data", data_dynamic);
    scope.push("task_data", task_data_dynamic);
    scope.push("result", Dynamic::UNIT);

    engine
        .run_with_scope(&mut scope, script)
        .map_err(|err| format!("runtime error: {err}"))?;

    let updated_data: Dynamic = scope
        .get_value("data")
        .ok_or_else(|| "runtime error: data binding lost".to_string())?;
    let data_value = from_dynamic(updated_data)?;
    let data = match data_value {
        Value::Object(map) => map,
        _ => return Err("runtime error: data must remain an object".to_string()),
    };

    let result = match scope.get_value::<Dynamic>("result") {
        Some(d) if !d.is_unit() => Some(from_dynamic(d)?),
        _ => None,
    };

    Ok(ScriptOutcome { data, result })
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.disable_symbol("eval");
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_COLLECTION_SIZE);
    engine.set_max_map_size(MAX_COLLECTION_SIZE);
    engine
}

fn to_dynamic(map: &Map<String, Value>) -> Result<Dynamic, String> {
    rhai::serde::to_dynamic(&Value::Object(map.clone()))
        .map_err(|err| format!("compile error: {err}"))
}

fn from_dynamic(value: Dynamic) -> Result<Value, String> {
    rhai::serde::from_dynamic(&value).map_err(|err| format!("runtime error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutates_workflow_data() {
        let data = json!({"count": 1}).as_object().unwrap().clone();
        let task_data = Map::new();
        let outcome = run_script("data.count = data.count + 1;", &data, &task_data).unwrap();
        assert_eq!(outcome.data.get("count").unwrap(), &json!(2));
        assert!(outcome.result.is_none());
    }

    #[test]
    fn reports_result_variable() {
        let data = json!({"a": 2, "b": 3}).as_object().unwrap().clone();
        let task_data = Map::new();
        let outcome = run_script("result = data.a + data.b;", &data, &task_data).unwrap();
        assert_eq!(outcome.result, Some(json!(5)));
    }

    #[test]
    fn rejects_empty_script() {
        let err = run_script("   ", &Map::new(), &Map::new()).unwrap_err();
        assert_eq!(err, "missing script");
    }

    #[test]
    fn runtime_errors_are_reported() {
        let err = run_script("data.x.y.z;", &Map::new(), &Map::new()).unwrap_err();
        assert!(err.starts_with("runtime error:"));
    }

    #[test]
    fn eval_is_disabled() {
        let err = run_script("eval(\"1+1\");", &Map::new(), &Map::new()).unwrap_err();
        assert!(err.starts_with("runtime error:"));
    }
}
