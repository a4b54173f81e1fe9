//! Filter operator grammar.

use crate::error::{OrmError, OrmResult};
use crate::ident;

/// Comparison operators accepted after `__` in a filter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Exact,
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
    In,
    IsNull,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
}

impl FilterOp {
    /// Every accepted suffix, in the order used by error messages.
    pub const SUFFIXES: &'static [&'static str] = &[
        "gt",
        "gte",
        "lt",
        "lte",
        "ne",
        "in",
        "isnull",
        "contains",
        "icontains",
        "startswith",
        "istartswith",
        "endswith",
        "iendswith",
    ];

    /// Parse a suffix; `None` means plain equality.
    pub fn parse(suffix: Option<&str>) -> OrmResult<Self> {
        let Some(suffix) = suffix else {
            return Ok(FilterOp::Exact);
        };
        Ok(match suffix {
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "ne" => FilterOp::Ne,
            "in" => FilterOp::In,
            "isnull" => FilterOp::IsNull,
            "contains" => FilterOp::Contains,
            "icontains" => FilterOp::IContains,
            "startswith" => FilterOp::StartsWith,
            "istartswith" => FilterOp::IStartsWith,
            "endswith" => FilterOp::EndsWith,
            "iendswith" => FilterOp::IEndsWith,
            other => return Err(OrmError::unsupported(other, "filter", Self::SUFFIXES)),
        })
    }

    /// SQL operator for binary comparisons.
    pub(crate) fn sql_operator(self) -> &'static str {
        match self {
            FilterOp::Exact => "=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Ne => "!=",
            FilterOp::In => "IN",
            FilterOp::IsNull => "IS NULL",
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => "LIKE",
            FilterOp::IContains | FilterOp::IStartsWith | FilterOp::IEndsWith => "ILIKE",
        }
    }

    pub(crate) fn is_pattern(self) -> bool {
        matches!(
            self,
            FilterOp::Contains
                | FilterOp::IContains
                | FilterOp::StartsWith
                | FilterOp::IStartsWith
                | FilterOp::EndsWith
                | FilterOp::IEndsWith
        )
    }

    /// Wrap an escaped needle with `%` on the sides this operator matches.
    pub(crate) fn pattern(self, needle: &str) -> String {
        let escaped = escape_like(needle);
        match self {
            FilterOp::StartsWith | FilterOp::IStartsWith => format!("{escaped}%"),
            FilterOp::EndsWith | FilterOp::IEndsWith => format!("%{escaped}"),
            _ => format!("%{escaped}%"),
        }
    }
}

/// Escape LIKE metacharacters with the default backslash escape.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Split `column__op` into a validated column and an optional suffix.
pub fn split_key(key: &str) -> OrmResult<(&str, Option<&str>)> {
    let (column, suffix) = match key.split_once("__") {
        Some((column, suffix)) => (column, Some(suffix)),
        None => (key, None),
    };
    ident::check_part(column)?;
    Ok((column, suffix))
}
