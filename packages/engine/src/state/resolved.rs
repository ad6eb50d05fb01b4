//! Builds the resolved-state query: one candidate branch per tier, ranked per
//! key by (tier priority, inheritance depth), first live candidate wins.

use std::collections::BTreeSet;

use crate::sql::ast::*;
use crate::sql::build::*;

use super::inheritance::ClosureEdge;
use super::keys::{resolved_pk_sql, TierTag};
use super::tables::{
    cache_table_name, CHANGE_TABLE, TRANSACTION_TABLE, UNTRACKED_TABLE, VERSION_CLOSURE_CTE,
    WRITER_TABLE,
};

/// Columns of the `state` / `state_by_version` relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateColumn {
    EntityId,
    SchemaKey,
    FileId,
    VersionId,
    PluginKey,
    SnapshotContent,
    SchemaVersion,
    CreatedAt,
    UpdatedAt,
    InheritedFromVersionId,
    ChangeId,
    Untracked,
    CommitId,
    Metadata,
    WriterKey,
    /// Hidden; only produced when referenced by name.
    Pk,
}

impl StateColumn {
    pub const VISIBLE: [StateColumn; 15] = [
        StateColumn::EntityId,
        StateColumn::SchemaKey,
        StateColumn::FileId,
        StateColumn::VersionId,
        StateColumn::PluginKey,
        StateColumn::SnapshotContent,
        StateColumn::SchemaVersion,
        StateColumn::CreatedAt,
        StateColumn::UpdatedAt,
        StateColumn::InheritedFromVersionId,
        StateColumn::ChangeId,
        StateColumn::Untracked,
        StateColumn::CommitId,
        StateColumn::Metadata,
        StateColumn::WriterKey,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StateColumn::EntityId => "entity_id",
            StateColumn::SchemaKey => "schema_key",
            StateColumn::FileId => "file_id",
            StateColumn::VersionId => "version_id",
            StateColumn::PluginKey => "plugin_key",
            StateColumn::SnapshotContent => "snapshot_content",
            StateColumn::SchemaVersion => "schema_version",
            StateColumn::CreatedAt => "created_at",
            StateColumn::UpdatedAt => "updated_at",
            StateColumn::InheritedFromVersionId => "inherited_from_version_id",
            StateColumn::ChangeId => "change_id",
            StateColumn::Untracked => "untracked",
            StateColumn::CommitId => "commit_id",
            StateColumn::Metadata => "metadata",
            StateColumn::WriterKey => "writer_key",
            StateColumn::Pk => "_pk",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name == "_pk" {
            return Some(StateColumn::Pk);
        }
        Self::VISIBLE.into_iter().find(|column| column.name() == name)
    }

    /// Columns that partition the ranking; filters on them commute with it.
    fn is_partition_key(self) -> bool {
        matches!(
            self,
            StateColumn::EntityId
                | StateColumn::SchemaKey
                | StateColumn::FileId
                | StateColumn::VersionId
        )
    }
}

/// `column IN (values)` where every value is a literal or placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct PushdownPredicate {
    pub column: StateColumn,
    pub values: Vec<Expr>,
}

impl PushdownPredicate {
    fn to_expr(&self, target: Expr) -> Expr {
        match self.values.as_slice() {
            [single] => eq(target, single.clone()),
            values => in_list(target, values.to_vec()),
        }
    }

    fn literal_values(&self) -> Option<BTreeSet<String>> {
        self.values
            .iter()
            .map(|value| match value {
                Expr::Literal(Literal::String(text)) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedStateRequest<'a> {
    /// Schema keys whose cache tables participate.
    pub cache_schema_keys: &'a [String],
    /// Closure edges; empty disables the inherited tiers.
    pub closure: &'a [ClosureEdge],
    /// Whether the transaction tiers can hold rows.
    pub include_transaction: bool,
    /// Output columns, in output order.
    pub columns: &'a [StateColumn],
    pub pushdown: &'a [PushdownPredicate],
}

#[derive(Debug, Clone, Copy)]
enum Source<'a> {
    Transaction,
    Untracked,
    Cache(&'a str),
}

impl Source<'_> {
    fn alias(self) -> &'static str {
        match self {
            Source::Transaction => "t",
            Source::Untracked => "u",
            Source::Cache(_) => "c",
        }
    }

    fn table(self) -> String {
        match self {
            Source::Transaction => TRANSACTION_TABLE.to_string(),
            Source::Untracked => UNTRACKED_TABLE.to_string(),
            Source::Cache(schema_key) => cache_table_name(schema_key),
        }
    }
}

const CANDIDATE_ALIAS: &str = "candidates";
const RANKED_ALIAS: &str = "ranked";
const CLOSURE_ALIAS: &str = "vc";
const CHANGE_ALIAS: &str = "ch";
const WRITER_ALIAS: &str = "sw";

const TIER_RANK: &str = "tier_rank";
const DEPTH: &str = "depth";
const IS_TOMBSTONE: &str = "is_tombstone";
const TIER_TAG: &str = "tier_tag";
const ROW_NUMBER: &str = "rn";

/// The resolved rows for `request`, with exactly `request.columns` as output.
pub fn build_resolved_state_query(request: &ResolvedStateRequest<'_>) -> Query {
    let closure = filter_closure(request.closure, request.pushdown);
    let has_cache = !request.cache_schema_keys.is_empty();
    let wants = |column: StateColumn| request.columns.contains(&column);
    let join_change = has_cache && wants(StateColumn::Metadata);
    let join_writer = has_cache && wants(StateColumn::WriterKey);

    let candidate_columns = candidate_columns(request, join_change, join_writer);

    let mut branches = Vec::new();
    let mut push = |tier: TierTag, source: Source<'_>| {
        branches.push(SetExpr::Select(Box::new(branch_select(
            tier,
            source,
            &candidate_columns,
            request.pushdown,
        ))));
    };
    if request.include_transaction {
        push(TierTag::Transaction, Source::Transaction);
    }
    push(TierTag::Untracked, Source::Untracked);
    for schema_key in request.cache_schema_keys {
        push(TierTag::Cached, Source::Cache(schema_key));
    }
    if !closure.is_empty() {
        for schema_key in request.cache_schema_keys {
            push(TierTag::InheritedCached, Source::Cache(schema_key));
        }
        push(TierTag::InheritedUntracked, Source::Untracked);
        if request.include_transaction {
            push(TierTag::InheritedTransaction, Source::Transaction);
        }
    }

    let mut candidates = match union_all(branches) {
        Some(body) => Query::from_body(body),
        None => select_query(Select::default()),
    };
    if !closure.is_empty() {
        candidates.with = Some(With {
            recursive: false,
            ctes: vec![closure_cte(&closure)],
        });
    }

    let ranked = select_query(Select {
        projection: vec![
            SelectItem::QualifiedWildcard(ident(CANDIDATE_ALIAS)),
            item(row_number_over_key(), ROW_NUMBER),
        ],
        from: vec![from(derived(candidates, CANDIDATE_ALIAS))],
        ..Select::default()
    });

    let mut outer_from = from(derived(ranked, RANKED_ALIAS));
    if join_change {
        outer_from.joins.push(left_join(
            table(CHANGE_TABLE, Some(CHANGE_ALIAS)),
            eq(qcol(CHANGE_ALIAS, "id"), qcol(RANKED_ALIAS, "change_id")),
        ));
    }
    if join_writer {
        let on = and_all([
            eq(qcol(WRITER_ALIAS, "entity_id"), qcol(RANKED_ALIAS, "entity_id")),
            eq(qcol(WRITER_ALIAS, "schema_key"), qcol(RANKED_ALIAS, "schema_key")),
            eq(qcol(WRITER_ALIAS, "file_id"), qcol(RANKED_ALIAS, "file_id")),
            eq(
                qcol(WRITER_ALIAS, "version_id"),
                func(
                    "coalesce",
                    vec![
                        qcol(RANKED_ALIAS, "inherited_from_version_id"),
                        qcol(RANKED_ALIAS, "version_id"),
                    ],
                ),
            ),
        ]);
        if let Some(on) = on {
            outer_from
                .joins
                .push(left_join(table(WRITER_TABLE, Some(WRITER_ALIAS)), on));
        }
    }

    let mut filters = vec![
        eq(qcol(RANKED_ALIAS, ROW_NUMBER), lit_int(1)),
        eq(qcol(RANKED_ALIAS, IS_TOMBSTONE), lit_int(0)),
    ];
    filters.extend(
        request
            .pushdown
            .iter()
            .filter(|predicate| !predicate.column.is_partition_key())
            .map(|predicate| predicate.to_expr(qcol(RANKED_ALIAS, predicate.column.name()))),
    );

    let projection = request
        .columns
        .iter()
        .map(|column| item(outer_column(*column, join_change, join_writer), column.name()))
        .collect();

    select_query(Select {
        projection,
        from: vec![outer_from],
        selection: and_all(filters),
        ..Select::default()
    })
}

/// Drops closure edges whose version cannot satisfy a literal version filter.
fn filter_closure(closure: &[ClosureEdge], pushdown: &[PushdownPredicate]) -> Vec<ClosureEdge> {
    let literal_sets: Option<Vec<BTreeSet<String>>> = pushdown
        .iter()
        .filter(|predicate| predicate.column == StateColumn::VersionId)
        .map(PushdownPredicate::literal_values)
        .collect();
    let Some(literal_sets) = literal_sets else {
        return closure.to_vec();
    };
    closure
        .iter()
        .filter(|edge| literal_sets.iter().all(|set| set.contains(&edge.version_id)))
        .cloned()
        .collect()
}

fn candidate_columns(
    request: &ResolvedStateRequest<'_>,
    join_change: bool,
    join_writer: bool,
) -> Vec<&'static str> {
    let mut needed: BTreeSet<StateColumn> = BTreeSet::from([
        StateColumn::EntityId,
        StateColumn::SchemaKey,
        StateColumn::FileId,
        StateColumn::VersionId,
    ]);
    let mut with_tag = false;
    for column in request.columns {
        match column {
            StateColumn::Pk => with_tag = true,
            other => {
                needed.insert(*other);
            }
        }
    }
    if join_change {
        needed.insert(StateColumn::ChangeId);
    }
    if join_writer {
        needed.insert(StateColumn::InheritedFromVersionId);
    }
    for predicate in request.pushdown {
        if !predicate.column.is_partition_key() {
            needed.insert(predicate.column);
        }
    }

    let mut columns: Vec<&'static str> = needed.into_iter().map(StateColumn::name).collect();
    columns.extend([TIER_RANK, DEPTH, IS_TOMBSTONE]);
    if with_tag {
        columns.push(TIER_TAG);
    }
    columns
}

fn branch_select(
    tier: TierTag,
    source: Source<'_>,
    columns: &[&'static str],
    pushdown: &[PushdownPredicate],
) -> Select {
    let src = source.alias();
    let mut relation = from(table(&source.table(), Some(src)));
    if tier.is_inherited() {
        relation.joins.push(inner_join(
            table(VERSION_CLOSURE_CTE, Some(CLOSURE_ALIAS)),
            eq(
                qcol(CLOSURE_ALIAS, "ancestor_version_id"),
                qcol(src, "version_id"),
            ),
        ));
    }

    let mut filters = Vec::new();
    if !matches!(source, Source::Transaction) {
        filters.push(consistent_tombstone_filter(src));
    }
    for predicate in pushdown
        .iter()
        .filter(|predicate| predicate.column.is_partition_key())
    {
        filters.push(predicate.to_expr(tier_column_expr(tier, source, predicate.column.name())));
    }

    Select {
        projection: columns
            .iter()
            .map(|name| item(tier_column_expr(tier, source, name), name))
            .collect(),
        from: vec![relation],
        selection: and_all(filters),
        ..Select::default()
    }
}

/// A live row carries content; a tombstone carries none. Rows in any other
/// shape are ignored.
fn consistent_tombstone_filter(src: &str) -> Expr {
    Expr::Nested(Box::new(or(
        Expr::Nested(Box::new(and(
            eq(qcol(src, IS_TOMBSTONE), lit_int(0)),
            is_not_null(qcol(src, "snapshot_content")),
        ))),
        Expr::Nested(Box::new(and(
            eq(qcol(src, IS_TOMBSTONE), lit_int(1)),
            is_null(qcol(src, "snapshot_content")),
        ))),
    )))
}

fn tier_column_expr(tier: TierTag, source: Source<'_>, name: &str) -> Expr {
    let src = source.alias();
    let inherited = tier.is_inherited();
    match name {
        "version_id" if inherited => qcol(CLOSURE_ALIAS, "version_id"),
        "inherited_from_version_id" if inherited => qcol(src, "version_id"),
        "inherited_from_version_id" => null(),
        "change_id" => match source {
            Source::Untracked => null(),
            _ => qcol(src, "change_id"),
        },
        "untracked" => match source {
            Source::Untracked => lit_int(1),
            _ => lit_int(0),
        },
        "commit_id" => match source {
            Source::Transaction => lit_str("pending"),
            Source::Untracked => lit_str("untracked"),
            Source::Cache(_) => qcol(src, "commit_id"),
        },
        "metadata" | "writer_key" => match source {
            Source::Cache(_) => null(),
            _ => qcol(src, name),
        },
        TIER_RANK => lit_int(tier.rank()),
        DEPTH if inherited => qcol(CLOSURE_ALIAS, DEPTH),
        DEPTH => lit_int(0),
        IS_TOMBSTONE => match source {
            Source::Transaction => {
                case_when(is_null(qcol(src, "snapshot_content")), lit_int(1), lit_int(0))
            }
            _ => qcol(src, IS_TOMBSTONE),
        },
        TIER_TAG => lit_str(tier.as_str()),
        other => qcol(src, other),
    }
}

fn row_number_over_key() -> Expr {
    let key = ["entity_id", "schema_key", "file_id", "version_id"]
        .into_iter()
        .map(|name| qcol(CANDIDATE_ALIAS, name))
        .collect();
    Expr::Function(Function {
        name: ident("row_number"),
        args: FunctionArgs::List {
            distinct: false,
            args: Vec::new(),
        },
        over: Some(WindowSpec {
            partition_by: key,
            order_by: vec![
                order_asc(qcol(CANDIDATE_ALIAS, TIER_RANK)),
                order_asc(qcol(CANDIDATE_ALIAS, DEPTH)),
            ],
        }),
    })
}

fn outer_column(column: StateColumn, join_change: bool, join_writer: bool) -> Expr {
    let from_cache = || {
        in_list(
            qcol(RANKED_ALIAS, TIER_RANK),
            vec![
                lit_int(TierTag::Cached.rank()),
                lit_int(TierTag::InheritedCached.rank()),
            ],
        )
    };
    match column {
        StateColumn::Metadata if join_change => case_when(
            from_cache(),
            qcol(CHANGE_ALIAS, "metadata"),
            qcol(RANKED_ALIAS, "metadata"),
        ),
        StateColumn::WriterKey if join_writer => case_when(
            from_cache(),
            qcol(WRITER_ALIAS, "writer_key"),
            qcol(RANKED_ALIAS, "writer_key"),
        ),
        StateColumn::Pk => resolved_pk_sql(
            qcol(RANKED_ALIAS, TIER_TAG),
            qcol(RANKED_ALIAS, "file_id"),
            qcol(RANKED_ALIAS, "entity_id"),
            qcol(RANKED_ALIAS, "version_id"),
        ),
        other => qcol(RANKED_ALIAS, other.name()),
    }
}

fn closure_cte(closure: &[ClosureEdge]) -> Cte {
    let rows = closure
        .iter()
        .map(|edge| {
            vec![
                lit_str(&edge.version_id),
                lit_str(&edge.ancestor_version_id),
                lit_int(edge.depth as i64),
            ]
        })
        .collect();
    Cte {
        name: ident(VERSION_CLOSURE_CTE),
        columns: vec![ident("version_id"), ident("ancestor_version_id"), ident(DEPTH)],
        query: Box::new(Query::from_body(SetExpr::Values(Values { rows }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(version: &str, ancestor: &str, depth: usize) -> ClosureEdge {
        ClosureEdge {
            version_id: version.to_string(),
            ancestor_version_id: ancestor.to_string(),
            depth,
        }
    }

    fn request<'a>(
        cache: &'a [String],
        closure: &'a [ClosureEdge],
        columns: &'a [StateColumn],
        pushdown: &'a [PushdownPredicate],
    ) -> ResolvedStateRequest<'a> {
        ResolvedStateRequest {
            cache_schema_keys: cache,
            closure,
            include_transaction: true,
            columns,
            pushdown,
        }
    }

    #[test]
    fn emits_one_branch_per_tier_and_cache_table() {
        let cache = vec!["x".to_string(), "y".to_string()];
        let closure = vec![edge("main", "global", 1)];
        let sql = build_resolved_state_query(&request(
            &cache,
            &closure,
            &StateColumn::VISIBLE,
            &[],
        ))
        .to_string();
        for rank in 1..=6 {
            assert!(sql.contains(&format!("{rank} AS tier_rank")), "{sql}");
        }
        assert!(!sql.contains("AS tier_tag"));
        assert_eq!(sql.matches("FROM strata_internal_state_cache_v1_x AS c").count(), 2);
        assert_eq!(sql.matches("FROM strata_internal_transaction_state AS t").count(), 2);
        assert!(sql.contains(
            "WITH strata_version_closure(version_id, ancestor_version_id, depth) AS (VALUES ('main', 'global', 1))"
        ));
        assert!(sql.contains("LEFT JOIN strata_internal_change AS ch ON ch.id = ranked.change_id"));
        assert!(sql.contains("LEFT JOIN strata_internal_state_writer AS sw"));
        assert!(sql.contains("WHERE ranked.rn = 1 AND ranked.is_tombstone = 0"));
    }

    #[test]
    fn omits_transaction_and_inherited_tiers_when_possible() {
        let cache = vec!["x".to_string()];
        let mut req = request(&cache, &[], &[StateColumn::EntityId], &[]);
        req.include_transaction = false;
        let sql = build_resolved_state_query(&req).to_string();
        assert!(!sql.contains("strata_internal_transaction_state"));
        assert!(!sql.contains("strata_version_closure"));
        assert!(!sql.contains("strata_internal_change"));
        assert!(!sql.contains("snapshot_content AS snapshot_content"));
    }

    #[test]
    fn pushes_partition_predicates_into_branches_only() {
        let cache = vec!["x".to_string()];
        let closure = vec![edge("main", "global", 1), edge("feature", "global", 1)];
        let pushdown = vec![
            PushdownPredicate {
                column: StateColumn::VersionId,
                values: vec![Expr::Literal(Literal::String("main".to_string()))],
            },
            PushdownPredicate {
                column: StateColumn::PluginKey,
                values: vec![Expr::Placeholder(crate::sql::tokenizer::Placeholder::Positional(Some(1)))],
            },
        ];
        let sql = build_resolved_state_query(&request(
            &cache,
            &closure,
            &[StateColumn::EntityId],
            &pushdown,
        ))
        .to_string();
        assert!(sql.contains("t.version_id = 'main'"));
        assert!(sql.contains("vc.version_id = 'main'"));
        assert!(sql.contains("ranked.plugin_key = ?1"));
        assert!(!sql.contains("t.plugin_key = ?1"));
        assert!(sql.contains("VALUES ('main', 'global', 1))"));
        assert!(!sql.contains("'feature'"));
    }

    #[test]
    fn hidden_pk_is_built_from_the_tier_tag() {
        let sql = build_resolved_state_query(&request(&[], &[], &[StateColumn::Pk], &[])).to_string();
        assert!(sql.contains("'U' AS tier_tag"));
        assert!(sql.contains("ranked.tier_tag || '~'"));
        assert!(sql.ends_with("WHERE ranked.rn = 1 AND ranked.is_tombstone = 0"));
    }

    #[test]
    fn column_names_round_trip() {
        for column in StateColumn::VISIBLE {
            assert_eq!(StateColumn::from_name(column.name()), Some(column));
        }
        assert_eq!(StateColumn::from_name("_PK"), Some(StateColumn::Pk));
        assert_eq!(StateColumn::from_name("nope"), None);
    }
}
