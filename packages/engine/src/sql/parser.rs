//! Recursive-descent parser with a Pratt expression core.
//!
//! SELECT (with CTEs, joins, subqueries and set operations), INSERT, UPDATE
//! and DELETE parse into structured nodes. Every other statement becomes
//! `Statement::Passthrough` holding its exact source text.

use thiserror::Error;

use super::ast::*;
use super::tokenizer::{tokenize_lossless, Keyword, Punct, Span, Token, TokenKind};
use crate::errors;
use crate::StrataError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at byte {offset})")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl From<ParseError> for StrataError {
    fn from(err: ParseError) -> Self {
        errors::parse_error(&err.to_string())
    }
}

// Binding powers, higher binds tighter. (left, right) for infix operators.
mod bp {
    pub const OR: (u8, u8) = (1, 2);
    pub const AND: (u8, u8) = (3, 4);
    pub const NOT_PREFIX: u8 = 5;
    pub const EQUALITY: (u8, u8) = (7, 8);
    pub const COMPARISON: (u8, u8) = (9, 10);
    pub const BITWISE: (u8, u8) = (13, 14);
    pub const ADD: (u8, u8) = (15, 16);
    pub const MUL: (u8, u8) = (17, 18);
    pub const CONCAT: (u8, u8) = (19, 20);
    pub const COLLATE: u8 = 21;
    pub const UNARY: u8 = 23;
    pub const JSON: (u8, u8) = (25, 26);
}

pub fn parse_statements(sql: &str) -> Result<Vec<Statement>, ParseError> {
    let tokens = tokenize_lossless(sql);
    let mut statements = Vec::new();
    for chunk in split_statements(tokens) {
        let mut parser = Parser::new(sql, chunk);
        statements.push(parser.parse_statement()?);
    }
    Ok(statements)
}

pub fn parse_statement(sql: &str) -> Result<Statement, ParseError> {
    let mut statements = parse_statements(sql)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        count => Err(ParseError {
            message: format!("expected exactly one statement, found {count}"),
            offset: 0,
        }),
    }
}

pub fn parse_query(sql: &str) -> Result<Query, ParseError> {
    match parse_statement(sql)? {
        Statement::Query(query) => Ok(*query),
        _ => Err(ParseError {
            message: "expected a query".to_string(),
            offset: 0,
        }),
    }
}

pub fn parse_expr(sql: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(sql, tokenize_lossless(sql));
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Splits at top-level `;`. Trigger bodies (`BEGIN ... END`) stay whole.
fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut chunks = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut block_depth = 0usize;
    for token in tokens {
        match &token.kind {
            TokenKind::Punct(Punct::Semicolon) if block_depth == 0 => {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                continue;
            }
            TokenKind::Identifier(word)
                if word.eq_ignore_ascii_case("begin") && is_trigger_definition(&current) =>
            {
                block_depth += 1;
            }
            TokenKind::Keyword(Keyword::Case) if block_depth > 0 => block_depth += 1,
            TokenKind::Keyword(Keyword::End) if block_depth > 0 => block_depth -= 1,
            _ => {}
        }
        current.push(token);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn is_trigger_definition(tokens: &[Token]) -> bool {
    let starts_with_create = matches!(
        tokens.first().map(|token| &token.kind),
        Some(TokenKind::Identifier(word)) if word.eq_ignore_ascii_case("create")
    );
    starts_with_create
        && tokens.iter().any(|token| {
            matches!(&token.kind, TokenKind::Identifier(word) if word.eq_ignore_ascii_case("trigger"))
        })
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    // ── Token helpers ───────────────────────────────────────────────────

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|token| &token.kind)
    }

    fn peek_nth(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|token| &token.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|token| token.span.start)
            .unwrap_or_else(|| self.source.len())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(token) => self.error(format!(
                "expected {expected}, found `{}`",
                token.text(self.source)
            )),
            None => self.error(format!("expected {expected}, found end of input")),
        }
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(TokenKind::Keyword(k)) if *k == keyword)
    }

    fn at_keyword_nth(&self, offset: usize, keyword: Keyword) -> bool {
        matches!(self.peek_nth(offset), Some(TokenKind::Keyword(k)) if *k == keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword.as_str()))
        }
    }

    fn at_punct(&self, punct: Punct) -> bool {
        matches!(self.peek(), Some(TokenKind::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.at_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct, display: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(display))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.pos < self.tokens.len() {
            return Err(self.unexpected("end of statement"));
        }
        Ok(())
    }

    fn at_query_start(&self, offset: usize) -> bool {
        matches!(
            self.peek_nth(offset),
            Some(TokenKind::Keyword(Keyword::Select | Keyword::With | Keyword::Values))
        )
    }

    fn at_identifier(&self) -> bool {
        match self.peek() {
            Some(TokenKind::Identifier(_)) | Some(TokenKind::QuotedIdentifier(_)) => true,
            Some(TokenKind::Keyword(keyword)) => keyword.is_non_reserved(),
            _ => false,
        }
    }

    fn parse_identifier(&mut self) -> Result<Ident, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Identifier(value)) => {
                self.pos += 1;
                Ok(Ident::new(value))
            }
            Some(TokenKind::QuotedIdentifier(value)) => {
                self.pos += 1;
                Ok(Ident::quoted(value))
            }
            Some(TokenKind::Keyword(keyword)) if keyword.is_non_reserved() => {
                self.pos += 1;
                Ok(Ident::new(keyword.as_str().to_ascii_lowercase()))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn parse_object_name(&mut self) -> Result<ObjectName, ParseError> {
        let mut parts = vec![self.parse_identifier()?];
        while self.at_punct(Punct::Dot) {
            self.pos += 1;
            parts.push(self.parse_identifier()?);
        }
        Ok(ObjectName(parts))
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<Ident>, ParseError> {
        self.expect_punct(Punct::LParen, "(")?;
        let mut idents = vec![self.parse_identifier()?];
        while self.eat_punct(Punct::Comma) {
            idents.push(self.parse_identifier()?);
        }
        self.expect_punct(Punct::RParen, ")")?;
        Ok(idents)
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let statement = match self.peek().cloned() {
            Some(TokenKind::Keyword(Keyword::With)) if self.with_prefixes_write() => {
                let text = self.remaining_text();
                self.pos = self.tokens.len();
                Statement::Passthrough(text)
            }
            Some(TokenKind::Keyword(Keyword::Select | Keyword::With | Keyword::Values))
            | Some(TokenKind::Punct(Punct::LParen)) => {
                Statement::Query(Box::new(self.parse_query()?))
            }
            Some(TokenKind::Keyword(Keyword::Insert | Keyword::Replace)) => {
                Statement::Insert(self.parse_insert()?)
            }
            Some(TokenKind::Keyword(Keyword::Update)) => Statement::Update(self.parse_update()?),
            Some(TokenKind::Keyword(Keyword::Delete)) => Statement::Delete(self.parse_delete()?),
            _ => {
                let text = self.remaining_text();
                self.pos = self.tokens.len();
                Statement::Passthrough(text)
            }
        };
        self.expect_end()?;
        Ok(statement)
    }

    /// Whether the `WITH` clause at the cursor is followed by INSERT, UPDATE
    /// or DELETE. Leaves the cursor where it was.
    fn with_prefixes_write(&mut self) -> bool {
        let start = self.pos;
        let mut follows_write = false;
        if self.eat_keyword(Keyword::With) {
            self.eat_keyword(Keyword::Recursive);
            let mut ctes_parsed = self.parse_cte().is_ok();
            while ctes_parsed && self.eat_punct(Punct::Comma) {
                ctes_parsed = self.parse_cte().is_ok();
            }
            follows_write = ctes_parsed
                && matches!(
                    self.peek(),
                    Some(TokenKind::Keyword(
                        Keyword::Insert | Keyword::Replace | Keyword::Update | Keyword::Delete
                    ))
                );
        }
        self.pos = start;
        follows_write
    }

    fn remaining_text(&self) -> String {
        let start = self.tokens.get(self.pos).map(|token| token.span);
        let end = self.tokens.last().map(|token| token.span);
        match (start, end) {
            (Some(Span { start, .. }), Some(Span { end, .. })) => {
                self.source[start..end].to_string()
            }
            _ => String::new(),
        }
    }

    fn parse_query(&mut self) -> Result<Query, ParseError> {
        let with = if self.eat_keyword(Keyword::With) {
            let recursive = self.eat_keyword(Keyword::Recursive);
            let mut ctes = vec![self.parse_cte()?];
            while self.eat_punct(Punct::Comma) {
                ctes.push(self.parse_cte()?);
            }
            Some(With { recursive, ctes })
        } else {
            None
        };

        let body = self.parse_set_expr()?;
        let mut query = Query::from_body(body);
        query.with = with;

        if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            query.order_by = self.parse_order_by_list()?;
        }
        if self.eat_keyword(Keyword::Limit) {
            let first = self.parse_expr()?;
            if self.eat_punct(Punct::Comma) {
                // SQLite `LIMIT offset, count`.
                query.offset = Some(first);
                query.limit = Some(self.parse_expr()?);
            } else {
                query.limit = Some(first);
                if self.eat_keyword(Keyword::Offset) {
                    query.offset = Some(self.parse_expr()?);
                }
            }
        }
        Ok(query)
    }

    fn parse_cte(&mut self) -> Result<Cte, ParseError> {
        let name = self.parse_identifier()?;
        let columns = if self.at_punct(Punct::LParen) {
            self.parse_identifier_list()?
        } else {
            Vec::new()
        };
        self.expect_keyword(Keyword::As)?;
        self.expect_punct(Punct::LParen, "(")?;
        let query = self.parse_query()?;
        self.expect_punct(Punct::RParen, ")")?;
        Ok(Cte {
            name,
            columns,
            query: Box::new(query),
        })
    }

    fn parse_set_expr(&mut self) -> Result<SetExpr, ParseError> {
        let mut left = self.parse_set_operand()?;
        loop {
            let op = if self.eat_keyword(Keyword::Union) {
                SetOperator::Union
            } else if self.eat_keyword(Keyword::Intersect) {
                SetOperator::Intersect
            } else if self.eat_keyword(Keyword::Except) {
                SetOperator::Except
            } else {
                break;
            };
            let all = self.eat_keyword(Keyword::All);
            let right = self.parse_set_operand()?;
            left = SetExpr::SetOperation {
                op,
                all,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_set_operand(&mut self) -> Result<SetExpr, ParseError> {
        if self.at_keyword(Keyword::Select) {
            return Ok(SetExpr::Select(Box::new(self.parse_select()?)));
        }
        if self.eat_keyword(Keyword::Values) {
            return Ok(SetExpr::Values(self.parse_values_rows()?));
        }
        if self.at_punct(Punct::LParen) {
            self.pos += 1;
            let query = self.parse_query()?;
            self.expect_punct(Punct::RParen, ")")?;
            return Ok(SetExpr::Query(Box::new(query)));
        }
        Err(self.unexpected("SELECT or VALUES"))
    }

    fn parse_values_rows(&mut self) -> Result<Values, ParseError> {
        let mut rows = Vec::new();
        loop {
            self.expect_punct(Punct::LParen, "(")?;
            let mut row = vec![self.parse_expr()?];
            while self.eat_punct(Punct::Comma) {
                row.push(self.parse_expr()?);
            }
            self.expect_punct(Punct::RParen, ")")?;
            rows.push(row);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Values { rows })
    }

    fn parse_select(&mut self) -> Result<Select, ParseError> {
        self.expect_keyword(Keyword::Select)?;
        let mut select = Select::default();
        if self.eat_keyword(Keyword::Distinct) {
            select.distinct = true;
        } else {
            self.eat_keyword(Keyword::All);
        }

        select.projection.push(self.parse_select_item()?);
        while self.eat_punct(Punct::Comma) {
            select.projection.push(self.parse_select_item()?);
        }

        if self.eat_keyword(Keyword::From) {
            select.from.push(self.parse_table_with_joins()?);
            while self.eat_punct(Punct::Comma) {
                select.from.push(self.parse_table_with_joins()?);
            }
        }
        if self.eat_keyword(Keyword::Where) {
            select.selection = Some(self.parse_expr()?);
        }
        if self.eat_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            select.group_by.push(self.parse_expr()?);
            while self.eat_punct(Punct::Comma) {
                select.group_by.push(self.parse_expr()?);
            }
        }
        if self.eat_keyword(Keyword::Having) {
            select.having = Some(self.parse_expr()?);
        }
        if self.at_keyword(Keyword::Window) {
            return Err(self.error("named WINDOW clauses are not supported"));
        }
        Ok(select)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, ParseError> {
        if self.eat_punct(Punct::Star) {
            return Ok(SelectItem::Wildcard);
        }
        let qualified_wildcard = matches!(
            self.peek(),
            Some(TokenKind::Identifier(_)) | Some(TokenKind::QuotedIdentifier(_))
        ) && matches!(self.peek_nth(1), Some(TokenKind::Punct(Punct::Dot)))
            && matches!(self.peek_nth(2), Some(TokenKind::Punct(Punct::Star)));
        if qualified_wildcard {
            let table = self.parse_identifier()?;
            self.pos += 2;
            return Ok(SelectItem::QualifiedWildcard(table));
        }

        let expr = self.parse_expr()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_optional_alias(&mut self) -> Result<Option<Ident>, ParseError> {
        if self.eat_keyword(Keyword::As) {
            if let Some(TokenKind::String(value)) = self.peek().cloned() {
                self.pos += 1;
                return Ok(Some(Ident::quoted(value)));
            }
            return Ok(Some(self.parse_identifier()?));
        }
        match self.peek() {
            Some(TokenKind::Identifier(_)) | Some(TokenKind::QuotedIdentifier(_)) => {
                Ok(Some(self.parse_identifier()?))
            }
            _ => Ok(None),
        }
    }

    fn parse_order_by_list(&mut self) -> Result<Vec<OrderByExpr>, ParseError> {
        let mut items = vec![self.parse_order_by_expr()?];
        while self.eat_punct(Punct::Comma) {
            items.push(self.parse_order_by_expr()?);
        }
        Ok(items)
    }

    fn parse_order_by_expr(&mut self) -> Result<OrderByExpr, ParseError> {
        let expr = self.parse_expr()?;
        let asc = if self.eat_keyword(Keyword::Asc) {
            Some(true)
        } else if self.eat_keyword(Keyword::Desc) {
            Some(false)
        } else {
            None
        };
        let nulls_first = if self.eat_keyword(Keyword::Nulls) {
            if self.eat_keyword(Keyword::First) {
                Some(true)
            } else {
                self.expect_keyword(Keyword::Last)?;
                Some(false)
            }
        } else {
            None
        };
        Ok(OrderByExpr {
            expr,
            asc,
            nulls_first,
        })
    }

    fn parse_table_with_joins(&mut self) -> Result<TableWithJoins, ParseError> {
        let relation = self.parse_table_factor()?;
        let mut joins = Vec::new();
        loop {
            let natural = self.eat_keyword(Keyword::Natural);
            let operator = if self.eat_keyword(Keyword::Join) {
                JoinOperator::Inner
            } else if self.eat_keyword(Keyword::Inner) {
                self.expect_keyword(Keyword::Join)?;
                JoinOperator::Inner
            } else if self.eat_keyword(Keyword::Left) {
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinOperator::Left
            } else if self.eat_keyword(Keyword::Right) {
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinOperator::Right
            } else if self.eat_keyword(Keyword::Full) {
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinOperator::Full
            } else if self.eat_keyword(Keyword::Cross) {
                self.expect_keyword(Keyword::Join)?;
                JoinOperator::Cross
            } else if natural {
                return Err(self.unexpected("JOIN"));
            } else {
                break;
            };

            let relation = self.parse_table_factor()?;
            let constraint = if natural {
                JoinConstraint::Natural
            } else if self.eat_keyword(Keyword::On) {
                JoinConstraint::On(self.parse_expr()?)
            } else if self.eat_keyword(Keyword::Using) {
                JoinConstraint::Using(self.parse_identifier_list()?)
            } else {
                JoinConstraint::None
            };
            joins.push(Join {
                operator,
                relation,
                constraint,
            });
        }
        Ok(TableWithJoins { relation, joins })
    }

    fn parse_table_factor(&mut self) -> Result<TableFactor, ParseError> {
        if self.at_punct(Punct::LParen) {
            self.pos += 1;
            if self.at_query_start(0) || (self.at_punct(Punct::LParen) && self.at_query_start(1)) {
                let subquery = self.parse_query()?;
                self.expect_punct(Punct::RParen, ")")?;
                let alias = self.parse_table_alias()?;
                return Ok(TableFactor::Derived {
                    subquery: Box::new(subquery),
                    alias,
                });
            }
            let inner = self.parse_table_with_joins()?;
            self.expect_punct(Punct::RParen, ")")?;
            return Ok(TableFactor::NestedJoin(Box::new(inner)));
        }

        let name = self.parse_object_name()?;
        if self.eat_punct(Punct::LParen) {
            let mut args = Vec::new();
            if !self.at_punct(Punct::RParen) {
                args.push(self.parse_expr()?);
                while self.eat_punct(Punct::Comma) {
                    args.push(self.parse_expr()?);
                }
            }
            self.expect_punct(Punct::RParen, ")")?;
            let alias = self.parse_table_alias()?;
            return Ok(TableFactor::Function { name, args, alias });
        }
        let alias = self.parse_table_alias()?;
        Ok(TableFactor::Table { name, alias })
    }

    fn parse_table_alias(&mut self) -> Result<Option<TableAlias>, ParseError> {
        let name = if self.eat_keyword(Keyword::As) {
            self.parse_identifier()?
        } else if matches!(
            self.peek(),
            Some(TokenKind::Identifier(_)) | Some(TokenKind::QuotedIdentifier(_))
        ) {
            self.parse_identifier()?
        } else {
            return Ok(None);
        };
        Ok(Some(TableAlias {
            name,
            columns: Vec::new(),
        }))
    }

    fn parse_conflict_resolution(&mut self) -> Result<Option<ConflictResolution>, ParseError> {
        if !self.eat_keyword(Keyword::Or) {
            return Ok(None);
        }
        let resolution = match self.next().map(|token| token.kind) {
            Some(TokenKind::Keyword(Keyword::Replace)) => ConflictResolution::Replace,
            Some(TokenKind::Keyword(Keyword::Ignore)) => ConflictResolution::Ignore,
            Some(TokenKind::Keyword(Keyword::Abort)) => ConflictResolution::Abort,
            Some(TokenKind::Keyword(Keyword::Fail)) => ConflictResolution::Fail,
            Some(TokenKind::Keyword(Keyword::Rollback)) => ConflictResolution::Rollback,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected("conflict resolution"));
            }
        };
        Ok(Some(resolution))
    }

    fn parse_insert(&mut self) -> Result<Insert, ParseError> {
        let or = if self.eat_keyword(Keyword::Replace) {
            Some(ConflictResolution::Replace)
        } else {
            self.expect_keyword(Keyword::Insert)?;
            self.parse_conflict_resolution()?
        };
        self.expect_keyword(Keyword::Into)?;
        let table = self.parse_object_name()?;
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        let columns = if self.at_punct(Punct::LParen) && !self.at_query_start(1) {
            self.parse_identifier_list()?
        } else {
            Vec::new()
        };

        let source = if self.eat_keyword(Keyword::Default) {
            self.expect_keyword(Keyword::Values)?;
            InsertSource::DefaultValues
        } else {
            InsertSource::Query(Box::new(self.parse_query()?))
        };

        let on_conflict = if self.at_keyword(Keyword::On) && self.at_keyword_nth(1, Keyword::Conflict)
        {
            self.pos += 2;
            Some(self.parse_on_conflict()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;
        Ok(Insert {
            or,
            table,
            alias,
            columns,
            source,
            on_conflict,
            returning,
        })
    }

    fn parse_on_conflict(&mut self) -> Result<OnConflict, ParseError> {
        let target = if self.at_punct(Punct::LParen) {
            self.parse_identifier_list()?
        } else {
            Vec::new()
        };
        self.expect_keyword(Keyword::Do)?;
        let action = if self.eat_keyword(Keyword::Nothing) {
            ConflictAction::DoNothing
        } else {
            self.expect_keyword(Keyword::Update)?;
            self.expect_keyword(Keyword::Set)?;
            let assignments = self.parse_assignments()?;
            let selection = if self.eat_keyword(Keyword::Where) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            ConflictAction::DoUpdate {
                assignments,
                selection,
            }
        };
        Ok(OnConflict { target, action })
    }

    fn parse_assignments(&mut self) -> Result<Vec<Assignment>, ParseError> {
        let mut assignments = Vec::new();
        loop {
            let column = self.parse_identifier()?;
            self.expect_punct(Punct::Eq, "=")?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { column, value });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(assignments)
    }

    fn parse_returning(&mut self) -> Result<Vec<SelectItem>, ParseError> {
        if !self.eat_keyword(Keyword::Returning) {
            return Ok(Vec::new());
        }
        let mut items = vec![self.parse_select_item()?];
        while self.eat_punct(Punct::Comma) {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_update(&mut self) -> Result<Update, ParseError> {
        self.expect_keyword(Keyword::Update)?;
        if self.parse_conflict_resolution()?.is_some() {
            return Err(self.error("UPDATE OR <resolution> is not supported"));
        }
        let table = self.parse_object_name()?;
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        self.expect_keyword(Keyword::Set)?;
        let assignments = self.parse_assignments()?;
        if self.at_keyword(Keyword::From) {
            return Err(self.error("UPDATE ... FROM is not supported"));
        }
        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;
        Ok(Update {
            table,
            alias,
            assignments,
            selection,
            returning,
        })
    }

    fn parse_delete(&mut self) -> Result<Delete, ParseError> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let table = self.parse_object_name()?;
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let returning = self.parse_returning()?;
        Ok(Delete {
            table,
            alias,
            selection,
            returning,
        })
    }

    // ── Expressions (Pratt core) ────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_prefix()?;
        loop {
            if let Some(l_bp) = self.postfix_bp() {
                if l_bp < min_bp {
                    break;
                }
                lhs = self.parse_postfix(lhs)?;
                continue;
            }
            if let Some((l_bp, r_bp)) = self.infix_bp() {
                if l_bp < min_bp {
                    break;
                }
                lhs = self.parse_infix(lhs, r_bp)?;
                continue;
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(self.unexpected("expression"));
        };
        match token.kind {
            TokenKind::Number(raw) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Number(raw)))
            }
            TokenKind::String(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::String(value)))
            }
            TokenKind::Blob(hex) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Blob(hex)))
            }
            TokenKind::Placeholder(placeholder) => {
                self.pos += 1;
                Ok(Expr::Placeholder(placeholder))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Null))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Boolean(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Boolean(false)))
            }
            TokenKind::Punct(Punct::Minus) => {
                self.pos += 1;
                let expr = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Minus,
                    expr: Box::new(expr),
                })
            }
            TokenKind::Punct(Punct::Plus) => {
                self.pos += 1;
                let expr = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Plus,
                    expr: Box::new(expr),
                })
            }
            TokenKind::Punct(Punct::Tilde) => {
                self.pos += 1;
                let expr = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    expr: Box::new(expr),
                })
            }
            TokenKind::Keyword(Keyword::Not) => {
                self.pos += 1;
                if self.eat_keyword(Keyword::Exists) {
                    let subquery = self.parse_parenthesized_query()?;
                    return Ok(Expr::Exists {
                        subquery: Box::new(subquery),
                        negated: true,
                    });
                }
                let expr = self.parse_expr_bp(bp::NOT_PREFIX)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            TokenKind::Keyword(Keyword::Exists) => {
                self.pos += 1;
                let subquery = self.parse_parenthesized_query()?;
                Ok(Expr::Exists {
                    subquery: Box::new(subquery),
                    negated: false,
                })
            }
            TokenKind::Keyword(Keyword::Case) => {
                self.pos += 1;
                self.parse_case()
            }
            TokenKind::Keyword(Keyword::Cast) => {
                self.pos += 1;
                self.parse_cast()
            }
            TokenKind::Punct(Punct::LParen) => {
                if self.at_query_start(1) {
                    let subquery = self.parse_parenthesized_query()?;
                    return Ok(Expr::Subquery(Box::new(subquery)));
                }
                self.pos += 1;
                let first = self.parse_expr()?;
                if self.eat_punct(Punct::Comma) {
                    let mut items = vec![first, self.parse_expr()?];
                    while self.eat_punct(Punct::Comma) {
                        items.push(self.parse_expr()?);
                    }
                    self.expect_punct(Punct::RParen, ")")?;
                    return Ok(Expr::Tuple(items));
                }
                self.expect_punct(Punct::RParen, ")")?;
                Ok(Expr::Nested(Box::new(first)))
            }
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_) => {
                self.parse_identifier_expr()
            }
            TokenKind::Keyword(keyword) if keyword.is_non_reserved() => {
                self.parse_identifier_expr()
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_parenthesized_query(&mut self) -> Result<Query, ParseError> {
        self.expect_punct(Punct::LParen, "(")?;
        let query = self.parse_query()?;
        self.expect_punct(Punct::RParen, ")")?;
        Ok(query)
    }

    fn parse_identifier_expr(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_identifier()?;
        if self.at_punct(Punct::LParen) {
            return self.parse_function_call(first);
        }
        if !self.at_punct(Punct::Dot) {
            return Ok(Expr::Identifier(first));
        }
        let mut parts = vec![first];
        while self.eat_punct(Punct::Dot) {
            parts.push(self.parse_identifier()?);
        }
        Ok(Expr::CompoundIdentifier(parts))
    }

    fn parse_function_call(&mut self, name: Ident) -> Result<Expr, ParseError> {
        self.expect_punct(Punct::LParen, "(")?;
        let args = if self.eat_punct(Punct::Star) {
            FunctionArgs::Star
        } else {
            let distinct = self.eat_keyword(Keyword::Distinct);
            let mut args = Vec::new();
            if !self.at_punct(Punct::RParen) {
                args.push(self.parse_expr()?);
                while self.eat_punct(Punct::Comma) {
                    args.push(self.parse_expr()?);
                }
            }
            FunctionArgs::List { distinct, args }
        };
        self.expect_punct(Punct::RParen, ")")?;

        let over = if self.eat_keyword(Keyword::Over) {
            self.expect_punct(Punct::LParen, "(")?;
            let mut window = WindowSpec::default();
            if self.eat_keyword(Keyword::Partition) {
                self.expect_keyword(Keyword::By)?;
                window.partition_by.push(self.parse_expr()?);
                while self.eat_punct(Punct::Comma) {
                    window.partition_by.push(self.parse_expr()?);
                }
            }
            if self.eat_keyword(Keyword::Order) {
                self.expect_keyword(Keyword::By)?;
                window.order_by = self.parse_order_by_list()?;
            }
            self.expect_punct(Punct::RParen, ")")?;
            Some(window)
        } else {
            None
        };

        Ok(Expr::Function(Function { name, args, over }))
    }

    fn parse_case(&mut self) -> Result<Expr, ParseError> {
        let operand = if self.at_keyword(Keyword::When) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let mut branches = Vec::new();
        while self.eat_keyword(Keyword::When) {
            let condition = self.parse_expr()?;
            self.expect_keyword(Keyword::Then)?;
            let result = self.parse_expr()?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.unexpected("WHEN"));
        }
        let else_result = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_keyword(Keyword::End)?;
        Ok(Expr::Case {
            operand,
            branches,
            else_result,
        })
    }

    fn parse_cast(&mut self) -> Result<Expr, ParseError> {
        self.expect_punct(Punct::LParen, "(")?;
        let expr = self.parse_expr()?;
        self.expect_keyword(Keyword::As)?;
        let start = self.offset();
        let mut depth = 0usize;
        let mut end = start;
        while let Some(token) = self.tokens.get(self.pos) {
            match token.kind {
                TokenKind::Punct(Punct::LParen) => depth += 1,
                TokenKind::Punct(Punct::RParen) if depth == 0 => break,
                TokenKind::Punct(Punct::RParen) => depth -= 1,
                _ => {}
            }
            end = token.span.end;
            self.pos += 1;
        }
        if end == start {
            return Err(self.unexpected("type name"));
        }
        let data_type = self.source[start..end].to_string();
        self.expect_punct(Punct::RParen, ")")?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }

    fn postfix_bp(&self) -> Option<u8> {
        match self.peek() {
            Some(TokenKind::Keyword(Keyword::Collate)) => Some(bp::COLLATE),
            Some(TokenKind::Keyword(Keyword::Isnull | Keyword::Notnull)) => Some(bp::EQUALITY.0),
            Some(TokenKind::Keyword(Keyword::Not)) if self.at_keyword_nth(1, Keyword::Null) => {
                Some(bp::EQUALITY.0)
            }
            _ => None,
        }
    }

    fn parse_postfix(&mut self, lhs: Expr) -> Result<Expr, ParseError> {
        if self.eat_keyword(Keyword::Collate) {
            let collation = self.parse_identifier()?;
            return Ok(Expr::Collate {
                expr: Box::new(lhs),
                collation,
            });
        }
        if self.eat_keyword(Keyword::Isnull) {
            return Ok(Expr::IsNull {
                expr: Box::new(lhs),
                negated: false,
            });
        }
        if self.eat_keyword(Keyword::Notnull) {
            return Ok(Expr::IsNull {
                expr: Box::new(lhs),
                negated: true,
            });
        }
        self.expect_keyword(Keyword::Not)?;
        self.expect_keyword(Keyword::Null)?;
        Ok(Expr::IsNull {
            expr: Box::new(lhs),
            negated: true,
        })
    }

    fn infix_bp(&self) -> Option<(u8, u8)> {
        match self.peek()? {
            TokenKind::Keyword(Keyword::Or) => Some(bp::OR),
            TokenKind::Keyword(Keyword::And) => Some(bp::AND),
            TokenKind::Keyword(
                Keyword::Is | Keyword::In | Keyword::Like | Keyword::Glob | Keyword::Between,
            ) => Some(bp::EQUALITY),
            TokenKind::Keyword(Keyword::Not)
                if matches!(
                    self.peek_nth(1),
                    Some(TokenKind::Keyword(
                        Keyword::In | Keyword::Like | Keyword::Glob | Keyword::Between
                    ))
                ) =>
            {
                Some(bp::EQUALITY)
            }
            TokenKind::Punct(punct) => match punct {
                Punct::Eq | Punct::NotEq => Some(bp::EQUALITY),
                Punct::Lt | Punct::LtEq | Punct::Gt | Punct::GtEq => Some(bp::COMPARISON),
                Punct::Ampersand | Punct::Pipe | Punct::ShiftLeft | Punct::ShiftRight => {
                    Some(bp::BITWISE)
                }
                Punct::Plus | Punct::Minus => Some(bp::ADD),
                Punct::Star | Punct::Slash | Punct::Percent => Some(bp::MUL),
                Punct::Concat => Some(bp::CONCAT),
                Punct::Arrow | Punct::LongArrow => Some(bp::JSON),
                _ => None,
            },
            // `a -1` lexes as identifier then signed number; treat as subtraction.
            TokenKind::Number(raw) if raw.starts_with('-') => Some(bp::ADD),
            _ => None,
        }
    }

    fn parse_infix(&mut self, lhs: Expr, r_bp: u8) -> Result<Expr, ParseError> {
        let Some(token) = self.next() else {
            return Err(self.unexpected("operator"));
        };
        let op = match token.kind {
            TokenKind::Keyword(Keyword::Or) => BinaryOp::Or,
            TokenKind::Keyword(Keyword::And) => BinaryOp::And,
            TokenKind::Keyword(Keyword::Is) => {
                let negated = self.eat_keyword(Keyword::Not);
                if self.eat_keyword(Keyword::Null) {
                    return Ok(Expr::IsNull {
                        expr: Box::new(lhs),
                        negated,
                    });
                }
                let rhs = self.parse_expr_bp(r_bp)?;
                return Ok(Expr::Is {
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                    negated,
                });
            }
            TokenKind::Keyword(Keyword::Not) => {
                let Some(next) = self.next() else {
                    return Err(self.unexpected("IN, LIKE, GLOB or BETWEEN"));
                };
                return match next.kind {
                    TokenKind::Keyword(Keyword::In) => self.parse_in(lhs, true),
                    TokenKind::Keyword(Keyword::Like) => self.parse_like(lhs, LikeOp::Like, true),
                    TokenKind::Keyword(Keyword::Glob) => self.parse_like(lhs, LikeOp::Glob, true),
                    TokenKind::Keyword(Keyword::Between) => self.parse_between(lhs, true),
                    _ => Err(self.unexpected("IN, LIKE, GLOB or BETWEEN")),
                };
            }
            TokenKind::Keyword(Keyword::In) => return self.parse_in(lhs, false),
            TokenKind::Keyword(Keyword::Like) => return self.parse_like(lhs, LikeOp::Like, false),
            TokenKind::Keyword(Keyword::Glob) => return self.parse_like(lhs, LikeOp::Glob, false),
            TokenKind::Keyword(Keyword::Between) => return self.parse_between(lhs, false),
            TokenKind::Number(raw) => {
                let magnitude = raw.trim_start_matches('-').to_string();
                return Ok(Expr::Binary {
                    left: Box::new(lhs),
                    op: BinaryOp::Minus,
                    right: Box::new(self.continue_operand(
                        Expr::Literal(Literal::Number(magnitude)),
                        r_bp,
                    )?),
                });
            }
            TokenKind::Punct(punct) => match punct {
                Punct::Eq => BinaryOp::Eq,
                Punct::NotEq => BinaryOp::NotEq,
                Punct::Lt => BinaryOp::Lt,
                Punct::LtEq => BinaryOp::LtEq,
                Punct::Gt => BinaryOp::Gt,
                Punct::GtEq => BinaryOp::GtEq,
                Punct::Ampersand => BinaryOp::BitAnd,
                Punct::Pipe => BinaryOp::BitOr,
                Punct::ShiftLeft => BinaryOp::ShiftLeft,
                Punct::ShiftRight => BinaryOp::ShiftRight,
                Punct::Plus => BinaryOp::Plus,
                Punct::Minus => BinaryOp::Minus,
                Punct::Star => BinaryOp::Multiply,
                Punct::Slash => BinaryOp::Divide,
                Punct::Percent => BinaryOp::Modulo,
                Punct::Concat => BinaryOp::Concat,
                Punct::Arrow => BinaryOp::Arrow,
                Punct::LongArrow => BinaryOp::LongArrow,
                _ => return Err(self.error("unexpected operator")),
            },
            _ => return Err(self.error("unexpected operator")),
        };
        let rhs = self.parse_expr_bp(r_bp)?;
        Ok(Expr::Binary {
            left: Box::new(lhs),
            op,
            right: Box::new(rhs),
        })
    }

    /// Continues an operand that was split off a signed number token.
    fn continue_operand(&mut self, mut lhs: Expr, min_bp: u8) -> Result<Expr, ParseError> {
        loop {
            if let Some(l_bp) = self.postfix_bp() {
                if l_bp < min_bp {
                    break;
                }
                lhs = self.parse_postfix(lhs)?;
                continue;
            }
            if let Some((l_bp, r_bp)) = self.infix_bp() {
                if l_bp < min_bp {
                    break;
                }
                lhs = self.parse_infix(lhs, r_bp)?;
                continue;
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_in(&mut self, lhs: Expr, negated: bool) -> Result<Expr, ParseError> {
        self.expect_punct(Punct::LParen, "(")?;
        if self.at_query_start(0) {
            let subquery = self.parse_query()?;
            self.expect_punct(Punct::RParen, ")")?;
            return Ok(Expr::InSubquery {
                expr: Box::new(lhs),
                subquery: Box::new(subquery),
                negated,
            });
        }
        let mut list = Vec::new();
        if !self.at_punct(Punct::RParen) {
            list.push(self.parse_expr()?);
            while self.eat_punct(Punct::Comma) {
                list.push(self.parse_expr()?);
            }
        }
        self.expect_punct(Punct::RParen, ")")?;
        Ok(Expr::InList {
            expr: Box::new(lhs),
            list,
            negated,
        })
    }

    fn parse_like(&mut self, lhs: Expr, op: LikeOp, negated: bool) -> Result<Expr, ParseError> {
        let pattern = self.parse_expr_bp(bp::EQUALITY.1)?;
        let escape = if self.eat_keyword(Keyword::Escape) {
            Some(Box::new(self.parse_expr_bp(bp::EQUALITY.1)?))
        } else {
            None
        };
        Ok(Expr::Like {
            expr: Box::new(lhs),
            negated,
            op,
            pattern: Box::new(pattern),
            escape,
        })
    }

    fn parse_between(&mut self, lhs: Expr, negated: bool) -> Result<Expr, ParseError> {
        let low = self.parse_expr_bp(bp::NOT_PREFIX)?;
        self.expect_keyword(Keyword::And)?;
        let high = self.parse_expr_bp(bp::NOT_PREFIX)?;
        Ok(Expr::Between {
            expr: Box::new(lhs),
            negated,
            low: Box::new(low),
            high: Box::new(high),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_expr, parse_query, parse_statement, parse_statements};
    use crate::sql::ast::*;

    fn roundtrip(sql: &str) -> String {
        parse_statement(sql).expect("parse").to_string()
    }

    #[test]
    fn parses_select_with_joins_aliases_and_where() {
        let query = parse_query(
            "SELECT s.entity_id, k.value AS v FROM state AS s LEFT JOIN key_value k ON k.key = s.entity_id WHERE s.schema_key = 'x'",
        )
        .expect("parse");
        let SetExpr::Select(select) = &query.body else {
            panic!("expected select body");
        };
        assert_eq!(select.projection.len(), 2);
        let TableFactor::Table { name, alias } = &select.from[0].relation else {
            panic!("expected table");
        };
        assert_eq!(name.base_name(), "state");
        assert_eq!(alias.as_ref().map(|a| a.name.value.as_str()), Some("s"));
        assert_eq!(select.from[0].joins[0].operator, JoinOperator::Left);
        assert!(select.selection.is_some());
    }

    #[test]
    fn parses_ctes_set_operations_and_subqueries() {
        let query = parse_query(
            "WITH recent AS (SELECT entity_id FROM state) \
             SELECT entity_id FROM recent UNION ALL SELECT entity_id FROM (SELECT entity_id FROM state_by_version) AS sub \
             ORDER BY entity_id LIMIT 10 OFFSET 2",
        )
        .expect("parse");
        assert_eq!(query.with.as_ref().map(|w| w.ctes.len()), Some(1));
        assert!(matches!(
            query.body,
            SetExpr::SetOperation {
                op: SetOperator::Union,
                all: true,
                ..
            }
        ));
        assert_eq!(query.order_by.len(), 1);
        assert!(query.limit.is_some() && query.offset.is_some());
    }

    #[test]
    fn write_statements_parse_into_structured_nodes() {
        let Statement::Insert(insert) = parse_statement(
            "INSERT INTO key_value (key, value) VALUES ('a', '1'), ('b', '2') ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .expect("parse insert") else {
            panic!("expected insert");
        };
        assert_eq!(insert.columns.len(), 2);
        assert!(matches!(
            insert.on_conflict.as_ref().map(|c| &c.action),
            Some(ConflictAction::DoUpdate { .. })
        ));

        let Statement::Update(update) =
            parse_statement("UPDATE key_value SET value = ?1 WHERE key = ?2").expect("parse update")
        else {
            panic!("expected update");
        };
        assert_eq!(update.assignments[0].column.value, "value");

        assert!(matches!(
            parse_statement("DELETE FROM key_value WHERE key = 'a'").expect("parse delete"),
            Statement::Delete(_)
        ));
    }

    #[test]
    fn unknown_statement_shapes_pass_through_verbatim() {
        let statements =
            parse_statements("CREATE TABLE t (a TEXT); PRAGMA foreign_keys = ON").expect("parse");
        assert_eq!(
            statements,
            vec![
                Statement::Passthrough("CREATE TABLE t (a TEXT)".to_string()),
                Statement::Passthrough("PRAGMA foreign_keys = ON".to_string()),
            ]
        );
    }

    #[test]
    fn trigger_bodies_are_not_split() {
        let statements = parse_statements(
            "CREATE TRIGGER trg AFTER INSERT ON t BEGIN INSERT INTO u VALUES (1); DELETE FROM v; END; SELECT 1",
        )
        .expect("parse");
        assert_eq!(statements.len(), 2);
        assert!(matches!(&statements[0], Statement::Passthrough(sql) if sql.ends_with("END")));
    }

    #[test]
    fn operator_precedence_follows_sqlite() {
        let expr = parse_expr("a = 1 OR b = 2 AND NOT c = 3").expect("parse");
        let Expr::Binary { op, right, .. } = &expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Or);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn printer_roundtrips_parsed_queries() {
        assert_eq!(
            roundtrip("select a , b from t where a in (1,2) and b between 1 and 2"),
            "SELECT a, b FROM t WHERE a IN (1, 2) AND b BETWEEN 1 AND 2"
        );
        assert_eq!(
            roundtrip("SELECT count(*) , row_number() over (partition by a order by b desc) FROM t"),
            "SELECT count(*), row_number() OVER (PARTITION BY a ORDER BY b DESC) FROM t"
        );
        assert_eq!(
            roundtrip("SELECT json_extract(c, '$.k') ->> '$.x', CAST(a AS INTEGER) FROM t LIMIT -1"),
            "SELECT json_extract(c, '$.k') ->> '$.x', CAST(a AS INTEGER) FROM t LIMIT -1"
        );
        assert_eq!(
            roundtrip("SELECT * FROM t WHERE a IS NOT NULL AND b NOT LIKE 'x%' AND EXISTS (SELECT 1)"),
            "SELECT * FROM t WHERE a IS NOT NULL AND b NOT LIKE 'x%' AND EXISTS (SELECT 1)"
        );
    }

    #[test]
    fn keywords_are_usable_as_identifiers_when_non_reserved() {
        let expr = parse_expr("replace(first, 'a', 'b')").expect("parse");
        assert!(matches!(expr, Expr::Function(_)));
    }

    #[test]
    fn structurally_invalid_input_is_a_parse_error() {
        let err = parse_statement("SELECT FROM WHERE").expect_err("should fail");
        assert!(err.message.contains("expected expression"));
        assert!(parse_statement("SELECT (1").is_err());
        assert!(parse_statement("UPDATE t SET").is_err());
    }

    #[test]
    fn subtraction_with_unspaced_number() {
        let expr = parse_expr("a -1 * 2").expect("parse");
        assert_eq!(expr.to_string(), "a - 1 * 2");
    }

    #[test]
    fn cte_prefixed_writes_pass_through_whole() {
        let sql = "WITH doomed AS (SELECT id FROM scratch WHERE id > 1) \
                   DELETE FROM scratch WHERE id IN (SELECT id FROM doomed)";
        assert_eq!(
            parse_statement(sql).expect("parse"),
            Statement::Passthrough(sql.to_string())
        );

        let query = parse_statement("WITH x AS (SELECT 1 AS n) SELECT n FROM x").expect("parse");
        assert!(matches!(query, Statement::Query(_)));
    }

    #[test]
    fn unknown_characters_reject_the_statement() {
        let error = parse_statement("SELECT a ! b FROM t").expect_err("`!` is not an operator");
        assert!(error.message.contains('!'), "{}", error.message);
        assert!(parse_expr("a ! b").is_err());
    }
}
