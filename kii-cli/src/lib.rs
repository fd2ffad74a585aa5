//! Argument parsing for the `kii` command-line tool.
//!
//! Kept in a library so the parsing rules, and the lookups commands share,
//! can be tested on their own.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use kii_cloud::{Clause, Entity, KiiClient, KiiFile, Query, Site};
use serde_json::Value;

/// Comparison operators accepted in `--where` filters, longest first so
/// `>=` is not read as `>`.
const OPERATORS: &[&str] = &["!=", ">=", "<=", "^=", "=", ">", "<"];

/// Reads a command-line value as JSON when it parses, otherwise as a string.
///
/// `42` is a number, `true` a boolean, `"42"` the string `42`, and `hello`
/// the string `hello`.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parses a `key=value` field assignment.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("field name missing in {raw:?}");
    }
    Ok((key.to_string(), parse_value(value)))
}

/// Parses one filter such as `age>=18`, `name^=ali` or `done=false`.
pub fn parse_filter(raw: &str) -> Result<Clause> {
    let (at, op) = OPERATORS
        .iter()
        .filter_map(|op| raw.find(op).map(|at| (at, *op)))
        .min_by_key(|(at, op)| (*at, usize::MAX - op.len()))
        .with_context(|| format!("no comparison operator in filter {raw:?}"))?;

    let field = raw[..at].trim();
    let operand = raw[at + op.len()..].trim();
    if field.is_empty() {
        bail!("field name missing in filter {raw:?}");
    }

    let clause = match op {
        "=" => Clause::equals(field, parse_value(operand)),
        "!=" => Clause::not_equals(field, parse_value(operand)),
        ">" => Clause::greater_than(field, parse_value(operand)),
        ">=" => Clause::greater_than_or_equal(field, parse_value(operand)),
        "<" => Clause::less_than(field, parse_value(operand)),
        "<=" => Clause::less_than_or_equal(field, parse_value(operand)),
        "^=" => Clause::starts_with(field, operand),
        _ => unreachable!("operator list and match arms agree"),
    };
    Ok(clause)
}

/// Builds a query from `--where`, `--sort` and `--limit` arguments.
///
/// Several filters are combined with AND. A sort field prefixed with `-`
/// sorts descending.
pub fn build_query(filters: &[String], sort: Option<&str>, limit: Option<u32>) -> Result<Query> {
    let mut clauses = filters
        .iter()
        .map(|f| parse_filter(f))
        .collect::<Result<Vec<_>>>()?;
    let clause = match clauses.len() {
        0 => Clause::all(),
        1 => clauses.remove(0),
        _ => Clause::and(clauses),
    };

    let mut query = Query::with_clause(clause);
    match sort {
        Some(field) if field.starts_with('-') => query.sort_by_desc(&field[1..]),
        Some(field) => query.sort_by_asc(field),
        None => {}
    }
    if let Some(limit) = limit {
        query.set_limit(limit);
    }
    query.validate().context("invalid query")?;
    Ok(query)
}

/// Resolves `--site` and `--base-url`; an explicit base URL wins.
pub fn resolve_site(site: &str, base_url: Option<&str>) -> Result<Site> {
    if let Some(url) = base_url {
        return Ok(Site::Custom(url.to_string()));
    }
    site.parse::<Site>()
        .with_context(|| format!("unknown site {site:?} (expected us, jp, cn, sg or a URL)"))
}

/// Parses a publish expiry: an RFC 3339 timestamp, or a lifetime such as
/// `30m`, `12h` or `7d` counted from `now`.
pub fn parse_expiry(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let split = raw.char_indices().last().map_or(0, |(at, _)| at);
    let (amount, unit) = raw.split_at(split);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("expected an RFC 3339 time or a lifetime like 12h, got {raw:?}"))?;
    if amount <= 0 {
        bail!("expiry lifetime must be positive, got {raw:?}");
    }
    let lifetime = match unit {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => bail!("unknown lifetime unit in {raw:?} (use m, h or d)"),
    };
    Ok(now + lifetime)
}

/// A file handle with its trash state and body size loaded from the server.
///
/// Trash, restore, shred and publish check the trash state locally, so a
/// handle built from a bare URI has to be refreshed first.
pub fn fetch_file(client: &KiiClient, uri: &str) -> Result<KiiFile> {
    let mut file = client.file_with_uri(uri)?;
    file.refresh_blocking()
        .with_context(|| format!("cannot fetch {uri}"))?;
    Ok(file)
}
