use cel::Context;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::functions::{FunctionProvider, SharedFunctionProvider};
use crate::StrataError;

use super::value::json_to_cel;

/// Builds an evaluation context exposing `strata_uuid_v7()` and
/// `strata_timestamp()` backed by `functions`, plus one variable per entry.
pub(crate) fn build_context_with_functions<P>(
    variables: &JsonMap<String, JsonValue>,
    functions: SharedFunctionProvider<P>,
) -> Result<Context<'static>, StrataError>
where
    P: FunctionProvider + Send + 'static,
{
    let mut context = Context::default();

    let uuid_functions = functions.clone();
    context.add_function("strata_uuid_v7", move || uuid_functions.call_uuid_v7());
    let timestamp_functions = functions;
    context.add_function("strata_timestamp", move || {
        timestamp_functions.call_timestamp()
    });

    for (name, value) in variables {
        let cel_value = json_to_cel(value)?;
        context.add_variable_from_value(name.clone(), cel_value);
    }

    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::build_context_with_functions;
    use crate::functions::{RuntimeFunctionProvider, SharedFunctionProvider};
    use cel::Program;
    use serde_json::Map as JsonMap;

    #[test]
    fn registered_functions_use_the_shared_provider() {
        let functions = SharedFunctionProvider::new(RuntimeFunctionProvider::new(true));
        let context =
            build_context_with_functions(&JsonMap::new(), functions.clone()).expect("context");
        let program = Program::compile("strata_uuid_v7()").expect("compile CEL");
        let value = program.execute(&context).expect("execute CEL");
        assert_eq!(
            value.json().expect("to json"),
            serde_json::json!("01920000-0000-7000-8000-000000000000")
        );
        assert_eq!(functions.with_lock(|provider| provider.next_sequence()), 1);
    }

    #[test]
    fn errors_on_unknown_variables() {
        let functions = SharedFunctionProvider::new(RuntimeFunctionProvider::new(false));
        let context = build_context_with_functions(&JsonMap::new(), functions).expect("context");
        let program = Program::compile("missing_var == null").expect("compile CEL");
        let err = program
            .execute(&context)
            .expect_err("execute CEL should fail");
        assert!(err.to_string().contains("Undeclared reference"));
    }
}
