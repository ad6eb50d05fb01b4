mod context;
mod evaluator;
mod value;

pub use evaluator::CelEvaluator;
pub(crate) use value::{cel_to_json, json_to_cel};
