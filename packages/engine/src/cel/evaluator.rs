use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use cel::Program;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::errors::validation_error;
use crate::functions::{FunctionProvider, SharedFunctionProvider, SystemFunctionProvider};
use crate::StrataError;

use super::context::build_context_with_functions;
use super::value::cel_to_json;

#[derive(Debug)]
struct CompiledProgram {
    program: Program,
}

/// Evaluates CEL expressions, caching compiled programs by source text.
#[derive(Default)]
pub struct CelEvaluator {
    programs: RwLock<HashMap<String, Arc<CompiledProgram>>>,
}

impl CelEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &self,
        expression: &str,
        variables: &JsonMap<String, JsonValue>,
    ) -> Result<JsonValue, StrataError> {
        let functions = SharedFunctionProvider::new(SystemFunctionProvider);
        self.evaluate_with_functions(expression, variables, functions)
    }

    pub fn evaluate_with_functions<P>(
        &self,
        expression: &str,
        variables: &JsonMap<String, JsonValue>,
        functions: SharedFunctionProvider<P>,
    ) -> Result<JsonValue, StrataError>
    where
        P: FunctionProvider + Send + 'static,
    {
        let compiled = self.compile(expression)?;
        let context = build_context_with_functions(variables, functions)?;
        let value = compiled.program.execute(&context).map_err(|err| {
            validation_error(&format!(
                "failed to evaluate CEL expression '{expression}': {err}"
            ))
        })?;
        cel_to_json(&value)
    }

    /// Compiles `expression` without evaluating it.
    pub fn check(&self, expression: &str) -> Result<(), StrataError> {
        self.compile(expression).map(|_| ())
    }

    fn compile(&self, expression: &str) -> Result<Arc<CompiledProgram>, StrataError> {
        if let Some(existing) = self
            .programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(expression)
            .cloned()
        {
            return Ok(existing);
        }

        let program = Program::compile(expression).map_err(|err| {
            validation_error(&format!(
                "failed to parse CEL expression '{expression}': {err}"
            ))
        })?;
        let compiled = Arc::new(CompiledProgram { program });

        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(expression.to_string(), compiled.clone());

        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::CelEvaluator;
    use crate::functions::{RuntimeFunctionProvider, SharedFunctionProvider};
    use serde_json::{json, Map as JsonMap, Value as JsonValue};

    #[test]
    fn evaluates_with_variables() {
        let evaluator = CelEvaluator::new();
        let mut context = JsonMap::new();
        context.insert("name".to_string(), json!("sample"));
        let value = evaluator
            .evaluate("name + '-slug'", &context)
            .expect("evaluate CEL");
        assert_eq!(value, JsonValue::String("sample-slug".to_string()));
    }

    #[test]
    fn reports_parse_and_runtime_errors() {
        let evaluator = CelEvaluator::new();
        let err = evaluator
            .evaluate("strata_uuid_v7(", &JsonMap::new())
            .expect_err("expected parse error");
        assert!(err.to_string().contains("failed to parse CEL expression"));

        let err = evaluator
            .evaluate("1 / 0", &JsonMap::new())
            .expect_err("expected runtime error");
        assert!(err.to_string().contains("failed to evaluate CEL expression"));
    }

    #[test]
    fn deterministic_functions_are_reproducible() {
        let evaluator = CelEvaluator::new();
        let functions = SharedFunctionProvider::new(RuntimeFunctionProvider::new(true));
        let value = evaluator
            .evaluate_with_functions("strata_timestamp()", &JsonMap::new(), functions)
            .expect("evaluate CEL");
        assert_eq!(value, json!("1970-01-01T00:00:00.000Z"));
    }

    #[test]
    fn caches_compiled_programs() {
        let evaluator = CelEvaluator::new();
        let mut context = JsonMap::new();
        context.insert("name".to_string(), json!("x"));

        for _ in 0..2 {
            evaluator
                .evaluate("name + '-slug'", &context)
                .expect("evaluation");
        }

        let size = evaluator.programs.read().expect("lock").len();
        assert_eq!(size, 1);
    }
}
