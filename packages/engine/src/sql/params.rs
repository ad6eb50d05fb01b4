use std::collections::HashMap;

use super::ast::{Expr, Statement};
use super::tokenizer::{tokenize, Placeholder, TokenKind};
use super::visit::visit_statement_exprs_mut;
use crate::errors::planning_error;
use crate::{StrataError, Value};

/// Ordinal progression for bare `?` across the statements of one script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PlaceholderState {
    next_ordinal: usize,
}

impl PlaceholderState {
    pub(crate) fn new() -> Self {
        Self { next_ordinal: 0 }
    }
}

/// A statement whose placeholders were renumbered to dense `?1..?N`.
#[derive(Debug, Clone)]
pub(crate) struct BoundStatement {
    pub(crate) statement: Statement,
    pub(crate) params: Vec<Value>,
}

/// Renumbers every placeholder in `statement` to an explicit dense index and
/// selects the parameters it uses. Placeholders that repeat a source index
/// share one dense index, so rewrites may duplicate placeholder nodes freely.
pub(crate) fn bind_statement(
    mut statement: Statement,
    params: &[Value],
    state: &mut PlaceholderState,
) -> Result<BoundStatement, StrataError> {
    let mut binder = Binder {
        params_len: params.len(),
        state,
        source_to_dense: HashMap::new(),
        used_source_indices: Vec::new(),
    };

    if let Statement::Passthrough(sql) = &statement {
        let rewritten = binder.bind_passthrough(sql)?;
        statement = Statement::Passthrough(rewritten);
    } else {
        visit_statement_exprs_mut(&mut statement, &mut |expr| {
            if let Expr::Placeholder(placeholder) = expr {
                let dense = binder.bind(placeholder)?;
                *placeholder = Placeholder::Positional(Some(dense));
            }
            Ok(())
        })?;
    }

    let bound_params = binder
        .used_source_indices
        .iter()
        .map(|source_index| params[*source_index].clone())
        .collect();
    Ok(BoundStatement {
        statement,
        params: bound_params,
    })
}

struct Binder<'a> {
    params_len: usize,
    state: &'a mut PlaceholderState,
    source_to_dense: HashMap<usize, usize>,
    used_source_indices: Vec<usize>,
}

impl Binder<'_> {
    /// Returns the 1-based dense index for `placeholder`.
    fn bind(&mut self, placeholder: &Placeholder) -> Result<u32, StrataError> {
        let source_index = resolve_placeholder_index(placeholder, self.params_len, self.state)?;
        let dense_index = match self.source_to_dense.get(&source_index) {
            Some(existing) => *existing,
            None => {
                let dense_index = self.used_source_indices.len();
                self.used_source_indices.push(source_index);
                self.source_to_dense.insert(source_index, dense_index);
                dense_index
            }
        };
        u32::try_from(dense_index + 1)
            .map_err(|_| planning_error("too many SQL parameters in one statement"))
    }

    fn bind_passthrough(&mut self, sql: &str) -> Result<String, StrataError> {
        let mut out = String::with_capacity(sql.len());
        let mut cursor = 0;
        for token in tokenize(sql) {
            let TokenKind::Placeholder(placeholder) = &token.kind else {
                continue;
            };
            let dense = self.bind(placeholder)?;
            out.push_str(&sql[cursor..token.span.start]);
            out.push_str(&format!("?{dense}"));
            cursor = token.span.end;
        }
        out.push_str(&sql[cursor..]);
        Ok(out)
    }
}

pub(crate) fn resolve_placeholder_index(
    placeholder: &Placeholder,
    params_len: usize,
    state: &mut PlaceholderState,
) -> Result<usize, StrataError> {
    let source_index = match placeholder {
        Placeholder::Positional(None) => {
            let source_index = state.next_ordinal;
            state.next_ordinal += 1;
            source_index
        }
        Placeholder::Positional(Some(index)) => {
            let parsed = one_based(*index as usize, placeholder)?;
            state.next_ordinal = state.next_ordinal.max(parsed);
            parsed - 1
        }
        Placeholder::Dollar(name) => {
            let parsed = name
                .parse::<usize>()
                .map_err(|_| unsupported_placeholder(placeholder))?;
            let parsed = one_based(parsed, placeholder)?;
            state.next_ordinal = state.next_ordinal.max(parsed);
            parsed - 1
        }
        Placeholder::Colon(_) | Placeholder::At(_) => {
            return Err(unsupported_placeholder(placeholder))
        }
    };

    if source_index >= params_len {
        return Err(planning_error(&format!(
            "placeholder '{placeholder}' references parameter {} but only {} parameters were provided",
            source_index + 1,
            params_len
        )));
    }

    Ok(source_index)
}

fn one_based(index: usize, placeholder: &Placeholder) -> Result<usize, StrataError> {
    if index == 0 {
        return Err(planning_error(&format!(
            "invalid placeholder index in '{placeholder}'"
        )));
    }
    Ok(index)
}

fn unsupported_placeholder(placeholder: &Placeholder) -> StrataError {
    planning_error(&format!(
        "unsupported SQL placeholder format '{placeholder}'; use ?, ?N or $N"
    ))
}
