use std::fmt::{self, Display, Formatter, Write};

use super::ast::*;
use super::tokenizer::{Keyword, Placeholder};

fn comma_separated<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

pub fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && Keyword::lookup(value).is_none()
}

impl Display for Ident {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.quoted || !is_plain_identifier(&self.value) {
            f.write_str(&quote_identifier(&self.value))
        } else {
            f.write_str(&self.value)
        }
    }
}

impl Display for ObjectName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (index, part) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_char('.')?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Query(query) => write!(f, "{query}"),
            Statement::Insert(insert) => write!(f, "{insert}"),
            Statement::Update(update) => write!(f, "{update}"),
            Statement::Delete(delete) => write!(f, "{delete}"),
            Statement::Passthrough(sql) => f.write_str(sql),
        }
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(with) = &self.with {
            f.write_str("WITH ")?;
            if with.recursive {
                f.write_str("RECURSIVE ")?;
            }
            comma_separated(f, &with.ctes)?;
            f.write_char(' ')?;
        }
        write!(f, "{}", self.body)?;
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            comma_separated(f, &self.order_by)?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

impl Display for Cte {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.columns.is_empty() {
            f.write_char('(')?;
            comma_separated(f, &self.columns)?;
            f.write_char(')')?;
        }
        write!(f, " AS ({})", self.query)
    }
}

impl Display for SetExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SetExpr::Select(select) => write!(f, "{select}"),
            SetExpr::Query(query) => write!(f, "({query})"),
            SetExpr::SetOperation {
                op,
                all,
                left,
                right,
            } => {
                let keyword = match op {
                    SetOperator::Union => "UNION",
                    SetOperator::Intersect => "INTERSECT",
                    SetOperator::Except => "EXCEPT",
                };
                write!(f, "{left} {keyword}")?;
                if *all {
                    f.write_str(" ALL")?;
                }
                write!(f, " {right}")
            }
            SetExpr::Values(values) => write!(f, "{values}"),
        }
    }
}

impl Display for Values {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("VALUES ")?;
        for (index, row) in self.rows.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            f.write_char('(')?;
            comma_separated(f, row)?;
            f.write_char(')')?;
        }
        Ok(())
    }
}

impl Display for Select {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        comma_separated(f, &self.projection)?;
        if !self.from.is_empty() {
            f.write_str(" FROM ")?;
            comma_separated(f, &self.from)?;
        }
        if let Some(selection) = &self.selection {
            write!(f, " WHERE {selection}")?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            comma_separated(f, &self.group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {having}")?;
        }
        Ok(())
    }
}

impl Display for SelectItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Expr { expr, alias } => {
                write!(f, "{expr}")?;
                if let Some(alias) = alias {
                    write!(f, " AS {alias}")?;
                }
                Ok(())
            }
            SelectItem::Wildcard => f.write_char('*'),
            SelectItem::QualifiedWildcard(table) => write!(f, "{table}.*"),
        }
    }
}

impl Display for TableWithJoins {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relation)?;
        for join in &self.joins {
            write!(f, "{join}")?;
        }
        Ok(())
    }
}

impl Display for TableAlias {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, " AS {}", self.name)?;
        if !self.columns.is_empty() {
            f.write_char('(')?;
            comma_separated(f, &self.columns)?;
            f.write_char(')')?;
        }
        Ok(())
    }
}

impl Display for TableFactor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TableFactor::Table { name, alias } => {
                write!(f, "{name}")?;
                if let Some(alias) = alias {
                    write!(f, "{alias}")?;
                }
                Ok(())
            }
            TableFactor::Derived { subquery, alias } => {
                write!(f, "({subquery})")?;
                if let Some(alias) = alias {
                    write!(f, "{alias}")?;
                }
                Ok(())
            }
            TableFactor::Function { name, args, alias } => {
                write!(f, "{name}(")?;
                comma_separated(f, args)?;
                f.write_char(')')?;
                if let Some(alias) = alias {
                    write!(f, "{alias}")?;
                }
                Ok(())
            }
            TableFactor::NestedJoin(inner) => write!(f, "({inner})"),
        }
    }
}

impl Display for Join {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let natural = matches!(self.constraint, JoinConstraint::Natural);
        let keyword = match self.operator {
            JoinOperator::Inner => "JOIN",
            JoinOperator::Left => "LEFT JOIN",
            JoinOperator::Right => "RIGHT JOIN",
            JoinOperator::Full => "FULL JOIN",
            JoinOperator::Cross => "CROSS JOIN",
        };
        if natural {
            write!(f, " NATURAL {keyword} {}", self.relation)?;
        } else {
            write!(f, " {keyword} {}", self.relation)?;
        }
        match &self.constraint {
            JoinConstraint::On(expr) => write!(f, " ON {expr}"),
            JoinConstraint::Using(columns) => {
                f.write_str(" USING (")?;
                comma_separated(f, columns)?;
                f.write_char(')')
            }
            JoinConstraint::Natural | JoinConstraint::None => Ok(()),
        }
    }
}

impl Display for OrderByExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        match self.asc {
            Some(true) => f.write_str(" ASC")?,
            Some(false) => f.write_str(" DESC")?,
            None => {}
        }
        match self.nulls_first {
            Some(true) => f.write_str(" NULLS FIRST")?,
            Some(false) => f.write_str(" NULLS LAST")?,
            None => {}
        }
        Ok(())
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Boolean(true) => f.write_str("TRUE"),
            Literal::Boolean(false) => f.write_str("FALSE"),
            Literal::Number(raw) => f.write_str(raw),
            Literal::String(value) => f.write_str(&quote_string(value)),
            Literal::Blob(hex) => write!(f, "X'{hex}'"),
        }
    }
}

impl Display for Placeholder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Positional(None) => f.write_char('?'),
            Placeholder::Positional(Some(index)) => write!(f, "?{index}"),
            Placeholder::Colon(name) => write!(f, ":{name}"),
            Placeholder::At(name) => write!(f, "@{name}"),
            Placeholder::Dollar(name) => write!(f, "${name}"),
        }
    }
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Concat => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Arrow => "->",
            BinaryOp::LongArrow => "->>",
        }
    }

    /// SQLite binding strength, higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::NotEq => 4,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => 5,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 6,
            BinaryOp::Plus | BinaryOp::Minus => 7,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 8,
            BinaryOp::Concat => 9,
            BinaryOp::Arrow | BinaryOp::LongArrow => 11,
        }
    }
}

/// Precedence of an expression when it appears as an operand.
fn expr_precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => op.precedence(),
        Expr::Unary {
            op: UnaryOp::Not, ..
        } => 3,
        Expr::IsNull { .. }
        | Expr::Is { .. }
        | Expr::InList { .. }
        | Expr::InSubquery { .. }
        | Expr::Between { .. }
        | Expr::Like { .. } => 4,
        Expr::Collate { .. } => 10,
        Expr::Unary { .. } => 10,
        _ => u8::MAX,
    }
}

struct Operand<'a> {
    expr: &'a Expr,
    parent: u8,
    /// Right operands of left-associative operators need parentheses on ties.
    strict: bool,
}

impl Display for Operand<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let own = expr_precedence(self.expr);
        let wrap = own < self.parent || (self.strict && own == self.parent);
        if wrap {
            write!(f, "({})", self.expr)
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

fn operand(expr: &Expr, parent: u8) -> Operand<'_> {
    Operand {
        expr,
        parent,
        strict: false,
    }
}

fn right_operand(expr: &Expr, parent: u8) -> Operand<'_> {
    Operand {
        expr,
        parent,
        strict: true,
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Identifier(ident) => write!(f, "{ident}"),
            Expr::CompoundIdentifier(parts) => {
                for (index, part) in parts.iter().enumerate() {
                    if index > 0 {
                        f.write_char('.')?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Expr::Literal(literal) => write!(f, "{literal}"),
            Expr::Placeholder(placeholder) => write!(f, "{placeholder}"),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {}", operand(expr, 3)),
                UnaryOp::Minus => write!(f, "-{}", operand(expr, 10)),
                UnaryOp::Plus => write!(f, "+{}", operand(expr, 10)),
                UnaryOp::BitNot => write!(f, "~{}", operand(expr, 10)),
            },
            Expr::Binary { left, op, right } => {
                let precedence = op.precedence();
                write!(
                    f,
                    "{} {} {}",
                    operand(left, precedence),
                    op.as_str(),
                    right_operand(right, precedence)
                )
            }
            Expr::IsNull { expr, negated } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                write!(f, "{} {keyword}", right_operand(expr, 4))
            }
            Expr::Is {
                left,
                right,
                negated,
            } => {
                let keyword = if *negated { "IS NOT" } else { "IS" };
                write!(
                    f,
                    "{} {keyword} {}",
                    right_operand(left, 4),
                    right_operand(right, 4)
                )
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{} {keyword} (", right_operand(expr, 4))?;
                comma_separated(f, list)?;
                f.write_char(')')
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{} {keyword} ({subquery})", right_operand(expr, 4))
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let keyword = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                write!(
                    f,
                    "{} {keyword} {} AND {}",
                    right_operand(expr, 4),
                    right_operand(low, 4),
                    right_operand(high, 4)
                )
            }
            Expr::Like {
                expr,
                negated,
                op,
                pattern,
                escape,
            } => {
                let keyword = match op {
                    LikeOp::Like => "LIKE",
                    LikeOp::Glob => "GLOB",
                };
                let not = if *negated { "NOT " } else { "" };
                write!(
                    f,
                    "{} {not}{keyword} {}",
                    right_operand(expr, 4),
                    right_operand(pattern, 4)
                )?;
                if let Some(escape) = escape {
                    write!(f, " ESCAPE {}", right_operand(escape, 4))?;
                }
                Ok(())
            }
            Expr::Case {
                operand: case_operand,
                branches,
                else_result,
            } => {
                f.write_str("CASE")?;
                if let Some(case_operand) = case_operand {
                    write!(f, " {case_operand}")?;
                }
                for (condition, result) in branches {
                    write!(f, " WHEN {condition} THEN {result}")?;
                }
                if let Some(else_result) = else_result {
                    write!(f, " ELSE {else_result}")?;
                }
                f.write_str(" END")
            }
            Expr::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type})"),
            Expr::Exists { subquery, negated } => {
                if *negated {
                    f.write_str("NOT ")?;
                }
                write!(f, "EXISTS ({subquery})")
            }
            Expr::Subquery(query) => write!(f, "({query})"),
            Expr::Function(function) => write!(f, "{function}"),
            Expr::Nested(inner) => write!(f, "({inner})"),
            Expr::Tuple(items) => {
                f.write_char('(')?;
                comma_separated(f, items)?;
                f.write_char(')')
            }
            Expr::Collate { expr, collation } => {
                write!(f, "{} COLLATE {collation}", operand(expr, 10))
            }
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Function names print bare; SQLite resolves them case-insensitively.
        write!(f, "{}(", self.name.value)?;
        match &self.args {
            FunctionArgs::Star => f.write_char('*')?,
            FunctionArgs::List { distinct, args } => {
                if *distinct {
                    f.write_str("DISTINCT ")?;
                }
                comma_separated(f, args)?;
            }
        }
        f.write_char(')')?;
        if let Some(over) = &self.over {
            f.write_str(" OVER (")?;
            let mut wrote = false;
            if !over.partition_by.is_empty() {
                f.write_str("PARTITION BY ")?;
                comma_separated(f, &over.partition_by)?;
                wrote = true;
            }
            if !over.order_by.is_empty() {
                if wrote {
                    f.write_char(' ')?;
                }
                f.write_str("ORDER BY ")?;
                comma_separated(f, &over.order_by)?;
            }
            f.write_char(')')?;
        }
        Ok(())
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.value)
    }
}

fn write_returning(f: &mut Formatter<'_>, returning: &[SelectItem]) -> fmt::Result {
    if !returning.is_empty() {
        f.write_str(" RETURNING ")?;
        comma_separated(f, returning)?;
    }
    Ok(())
}

impl Display for Insert {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("INSERT ")?;
        if let Some(or) = self.or {
            let keyword = match or {
                ConflictResolution::Replace => "REPLACE",
                ConflictResolution::Ignore => "IGNORE",
                ConflictResolution::Abort => "ABORT",
                ConflictResolution::Fail => "FAIL",
                ConflictResolution::Rollback => "ROLLBACK",
            };
            write!(f, "OR {keyword} ")?;
        }
        write!(f, "INTO {}", self.table)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        if !self.columns.is_empty() {
            f.write_str(" (")?;
            comma_separated(f, &self.columns)?;
            f.write_char(')')?;
        }
        match &self.source {
            InsertSource::Query(query) => write!(f, " {query}")?,
            InsertSource::DefaultValues => f.write_str(" DEFAULT VALUES")?,
        }
        if let Some(on_conflict) = &self.on_conflict {
            f.write_str(" ON CONFLICT")?;
            if !on_conflict.target.is_empty() {
                f.write_str(" (")?;
                comma_separated(f, &on_conflict.target)?;
                f.write_char(')')?;
            }
            match &on_conflict.action {
                ConflictAction::DoNothing => f.write_str(" DO NOTHING")?,
                ConflictAction::DoUpdate {
                    assignments,
                    selection,
                } => {
                    f.write_str(" DO UPDATE SET ")?;
                    comma_separated(f, assignments)?;
                    if let Some(selection) = selection {
                        write!(f, " WHERE {selection}")?;
                    }
                }
            }
        }
        write_returning(f, &self.returning)
    }
}

impl Display for Update {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {}", self.table)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        f.write_str(" SET ")?;
        comma_separated(f, &self.assignments)?;
        if let Some(selection) = &self.selection {
            write!(f, " WHERE {selection}")?;
        }
        write_returning(f, &self.returning)
    }
}

impl Display for Delete {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        if let Some(selection) = &self.selection {
            write!(f, " WHERE {selection}")?;
        }
        write_returning(f, &self.returning)
    }
}

#[cfg(test)]
mod tests {
    use crate::sql::build::{and, col, eq, lit_str, or};

    #[test]
    fn parenthesizes_lower_precedence_operands() {
        let expr = and(
            or(eq(col("a"), lit_str("x")), eq(col("b"), lit_str("y"))),
            eq(col("c"), lit_str("z")),
        );
        assert_eq!(expr.to_string(), "(a = 'x' OR b = 'y') AND c = 'z'");
    }

    #[test]
    fn quotes_keywords_and_special_identifiers() {
        assert_eq!(col("from").to_string(), "\"from\"");
        assert_eq!(col("has space").to_string(), "\"has space\"");
        assert_eq!(col("plain_name").to_string(), "plain_name");
    }

    #[test]
    fn escapes_string_literals() {
        assert_eq!(lit_str("it's").to_string(), "'it''s'");
    }
}
