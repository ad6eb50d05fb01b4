//! Identifier encodings: resolved-row primary keys and composite entity ids.

use crate::sql::ast::{BinaryOp, Expr};
use crate::sql::build::{binary, func, lit_str};

const PK_SEPARATOR: char = '~';
const ENTITY_ID_SEPARATOR: &str = "::";

/// The tier a resolved row was sourced from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TierTag {
    Transaction,
    Untracked,
    Cached,
    InheritedCached,
    InheritedUntracked,
    InheritedTransaction,
}

impl TierTag {
    pub const ALL: [TierTag; 6] = [
        TierTag::Transaction,
        TierTag::Untracked,
        TierTag::Cached,
        TierTag::InheritedCached,
        TierTag::InheritedUntracked,
        TierTag::InheritedTransaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TierTag::Transaction => "T",
            TierTag::Untracked => "U",
            TierTag::Cached => "C",
            TierTag::InheritedCached => "CI",
            TierTag::InheritedUntracked => "UI",
            TierTag::InheritedTransaction => "TI",
        }
    }

    /// 1 is the highest priority.
    pub fn rank(self) -> i64 {
        match self {
            TierTag::Transaction => 1,
            TierTag::Untracked => 2,
            TierTag::Cached => 3,
            TierTag::InheritedCached => 4,
            TierTag::InheritedUntracked => 5,
            TierTag::InheritedTransaction => 6,
        }
    }

    pub fn is_inherited(self) -> bool {
        matches!(
            self,
            TierTag::InheritedCached | TierTag::InheritedUntracked | TierTag::InheritedTransaction
        )
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.as_str() == tag)
    }
}

/// Escapes `%` and `~` so a part can never contain the separator.
pub fn encode_pk_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for ch in part.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '~' => out.push_str("%7E"),
            other => out.push(other),
        }
    }
    out
}

fn decode_pk_part(part: &str) -> String {
    part.replace("%7E", "~").replace("%25", "%")
}

/// `<tier>~<file_id>~<entity_id>~<version_id>` with each part escaped.
pub fn resolved_pk(tier: TierTag, file_id: &str, entity_id: &str, version_id: &str) -> String {
    format!(
        "{}{PK_SEPARATOR}{}{PK_SEPARATOR}{}{PK_SEPARATOR}{}",
        tier.as_str(),
        encode_pk_part(file_id),
        encode_pk_part(entity_id),
        encode_pk_part(version_id)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPk {
    pub tier: TierTag,
    pub file_id: String,
    pub entity_id: String,
    pub version_id: String,
}

pub fn parse_resolved_pk(pk: &str) -> Option<ResolvedPk> {
    let mut parts = pk.split(PK_SEPARATOR);
    let tier = TierTag::from_tag(parts.next()?)?;
    let file_id = decode_pk_part(parts.next()?);
    let entity_id = decode_pk_part(parts.next()?);
    let version_id = decode_pk_part(parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(ResolvedPk {
        tier,
        file_id,
        entity_id,
        version_id,
    })
}

/// SQL producing the same text as [`encode_pk_part`] for `expr`.
pub(crate) fn pk_part_sql(expr: Expr) -> Expr {
    let percent = func("replace", vec![expr, lit_str("%"), lit_str("%25")]);
    func("replace", vec![percent, lit_str("~"), lit_str("%7E")])
}

/// SQL producing the same text as [`resolved_pk`].
pub(crate) fn resolved_pk_sql(tier_tag: Expr, file_id: Expr, entity_id: Expr, version_id: Expr) -> Expr {
    let separator = || lit_str("~");
    [
        separator(),
        pk_part_sql(file_id),
        separator(),
        pk_part_sql(entity_id),
        separator(),
        pk_part_sql(version_id),
    ]
    .into_iter()
    .fold(tier_tag, |acc, next| binary(acc, BinaryOp::Concat, next))
}

/// Joins primary-key values into one entity id. Single-part keys are used
/// verbatim; multi-part keys escape `%` and `:` in every part first.
pub fn composite_entity_id(parts: &[String]) -> String {
    match parts {
        [single] => single.clone(),
        _ => parts
            .iter()
            .map(|part| part.replace('%', "%25").replace(':', "%3A"))
            .collect::<Vec<_>>()
            .join(ENTITY_ID_SEPARATOR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_pk_escapes_separators() {
        assert_eq!(
            resolved_pk(TierTag::InheritedCached, "f~1", "e%2", "v"),
            "CI~f%7E1~e%252~v"
        );
        assert_ne!(
            resolved_pk(TierTag::Cached, "a~b", "c", "d"),
            resolved_pk(TierTag::Cached, "a", "b~c", "d")
        );
    }

    #[test]
    fn resolved_pk_parses_back() {
        let pk = resolved_pk(TierTag::Untracked, "file~%", "entity", "main");
        assert_eq!(
            parse_resolved_pk(&pk),
            Some(ResolvedPk {
                tier: TierTag::Untracked,
                file_id: "file~%".to_string(),
                entity_id: "entity".to_string(),
                version_id: "main".to_string(),
            })
        );
        assert_eq!(parse_resolved_pk("X~a~b~c"), None);
        assert_eq!(parse_resolved_pk("T~a~b"), None);
    }

    #[test]
    fn pk_sql_mirrors_rust_encoding() {
        let sql = resolved_pk_sql(
            lit_str("C"),
            lit_str("f"),
            lit_str("e"),
            lit_str("v"),
        )
        .to_string();
        assert_eq!(
            sql,
            "'C' || '~' || replace(replace('f', '%', '%25'), '~', '%7E') || '~' || replace(replace('e', '%', '%25'), '~', '%7E') || '~' || replace(replace('v', '%', '%25'), '~', '%7E')"
        );
    }

    #[test]
    fn composite_ids_join_and_escape_multi_part_keys() {
        assert_eq!(
            composite_entity_id(&["cat1".to_string(), "id1".to_string()]),
            "cat1::id1"
        );
        assert_eq!(composite_entity_id(&["a:b".to_string()]), "a:b");
        assert_eq!(
            composite_entity_id(&["a:b".to_string(), "c".to_string()]),
            "a%3Ab::c"
        );
        assert_ne!(
            composite_entity_id(&["a::b".to_string(), "c".to_string()]),
            composite_entity_id(&["a".to_string(), "b::c".to_string()])
        );
    }
}
