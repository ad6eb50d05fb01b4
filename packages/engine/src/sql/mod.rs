//! SQL front end: tokenizer, parser, statement tree, printer and the
//! walkers the rewrite passes are built on.

pub mod ast;
pub(crate) mod build;
mod params;
pub mod parser;
mod printer;
pub mod tokenizer;
pub(crate) mod visit;

pub(crate) use params::{bind_statement, BoundStatement, PlaceholderState};
pub use parser::{parse_expr, parse_query, parse_statement, parse_statements, ParseError};
pub use printer::{quote_identifier, quote_string};
pub use tokenizer::{tokenize, Token, TokenKind};
