// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pattern detection and textual rewrites applied by the query rewriter.
//!
//! Everything here works on normalized text (single spaces, no trailing `;`)
//! and leaves the statement untouched when no pattern is recognized.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Optimizer hint prepended to a rewritten statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Hint {
    /// Identifier-equality predicate (`id = ?`, `user_id = 42`)
    IndexLookup,
    /// Time-range predicate (`BETWEEN`, or `<`/`>` on a time-like column)
    RangeScan,
}

impl Hint {
    #[must_use]
    pub fn as_comment(self) -> &'static str {
        match self {
            Self::IndexLookup => "/*+ INDEX_LOOKUP */",
            Self::RangeScan => "/*+ RANGE_SCAN */",
        }
    }
}

// Column compared to a literal or placeholder, never to another column
static ID_EQUALITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:\w+\.)?(?:id|\w+_id)\s*=\s*(?:\?|\$\d+|:\w+|'[^']*'|-?\d+)")
        .expect("id equality pattern is valid")
});

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bBETWEEN\b|\b(?:\w+\.)?(?:\w+_at|\w*time\w*|\w*date\w*)\s*(?:<=|>=|<|>)")
        .expect("time range pattern is valid")
});

static FROM_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFROM (.+?)( (?:WHERE|GROUP BY|ORDER BY|HAVING|LIMIT)\b|$)")
        .expect("from clause pattern is valid")
});

static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^WHERE (.+?)( (?:GROUP BY|ORDER BY|HAVING|LIMIT)\b|$)")
        .expect("where clause pattern is valid")
});

static AND_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i) AND ").expect("and pattern is valid"));

static COLUMN_EQUALITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)\.\w+ ?= ?(\w+)\.\w+$").expect("column equality pattern is valid")
});

static NON_CONJUNCTIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(?:OR|BETWEEN)\b").expect("or/between pattern is valid"));

/// Collapse runs of whitespace outside string literals and drop trailing `;`.
#[must_use]
pub fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut pending_space = false;

    for c in sql.trim().chars() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c == '\'' {
            in_literal = true;
        }
        out.push(c);
    }

    while out.ends_with(';') {
        out.pop();
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
    }
    out
}

/// Hints that apply to a normalized statement, in a fixed order.
#[must_use]
pub fn detect(sql: &str) -> Vec<Hint> {
    let mut hints = Vec::new();
    if ID_EQUALITY.is_match(sql) {
        hints.push(Hint::IndexLookup);
    }
    if TIME_RANGE.is_match(sql) {
        hints.push(Hint::RangeScan);
    }
    hints
}

/// Statements that never modify the store.
#[must_use]
pub fn is_read_only(sql: &str) -> bool {
    let first = sql
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase();
    let reads = matches!(first.as_str(), "SELECT" | "WITH" | "SHOW" | "EXPLAIN");
    reads && !sql.to_ascii_uppercase().contains(" FOR UPDATE")
}

/// Alias a table reference is addressed by (`users u` → `u`, `users` → `users`).
fn alias_of(table_ref: &str) -> &str {
    table_ref.split_whitespace().last().unwrap_or(table_ref)
}

/// Turn an implicit cross product (`FROM a x, b y WHERE x.k = y.k`) into
/// explicit joins.
///
/// Each comma-joined table after the first becomes `JOIN .. ON` when a
/// top-level `alias.col = alias.col` conjunct links it to an earlier table;
/// otherwise it becomes `CROSS JOIN`. Join predicates move from `WHERE` to
/// `ON`; remaining conjuncts stay in `WHERE` in their original order. When the
/// `WHERE` clause contains `OR` (or `BETWEEN`, whose `AND` isn't a conjunction)
/// no predicates are moved.
///
/// Returns `None` when there is nothing to rewrite.
#[must_use]
pub fn explicit_joins(sql: &str) -> Option<String> {
    let caps = FROM_CLAUSE.captures(sql)?;
    let from = caps.get(1)?;
    let tables: Vec<&str> = from.as_str().split(',').map(str::trim).collect();
    let joinable = |t: &&str| !t.is_empty() && !t.contains('(') && !t.to_ascii_uppercase().contains("JOIN");
    if tables.len() < 2 || !tables.iter().all(joinable) {
        return None;
    }

    let head = &sql[..from.start()];
    let tail = sql[from.end()..].trim_start();

    // Split the WHERE clause (if any) from whatever follows it
    let (mut conjuncts, rest): (Vec<String>, &str) = match WHERE_CLAUSE.captures(tail) {
        Some(w) => {
            let body = w.get(1).map_or("", |m| m.as_str());
            let rest = w.get(2).map_or("", |m| &tail[m.start()..]);
            let parts = if NON_CONJUNCTIVE.is_match(body) || body.contains('(') {
                vec![body.to_string()]
            } else {
                AND_SPLIT.split(body).map(|s| s.trim().to_string()).collect()
            };
            (parts, rest.trim_start())
        }
        None => (Vec::new(), tail),
    };

    let mut joined = tables[0].to_string();
    let mut seen: Vec<&str> = vec![alias_of(tables[0])];

    for table in &tables[1..] {
        let alias = alias_of(table);
        let link = conjuncts.iter().position(|c| {
            COLUMN_EQUALITY.captures(c).is_some_and(|m| {
                let (left, right) = (&m[1], &m[2]);
                (left == alias && seen.contains(&right)) || (right == alias && seen.contains(&left))
            })
        });
        match link {
            Some(idx) => {
                let on = conjuncts.remove(idx);
                joined.push_str(&format!(" JOIN {} ON {}", table, on));
            }
            None => joined.push_str(&format!(" CROSS JOIN {}", table)),
        }
        seen.push(alias);
    }

    let mut out = format!("{}{}", head, joined);
    if !conjuncts.is_empty() {
        out.push_str(" WHERE ");
        out.push_str(&conjuncts.join(" AND "));
    }
    if !rest.is_empty() {
        out.push(' ');
        out.push_str(rest);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  SELECT *\n  FROM users\t WHERE id = ? ;  "), "SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_normalize_preserves_literals() {
        assert_eq!(normalize("SELECT 'a   b'  FROM t"), "SELECT 'a   b' FROM t");
    }

    #[test]
    fn test_detect_id_lookup() {
        assert_eq!(detect("SELECT * FROM users WHERE id = ?"), vec![Hint::IndexLookup]);
        assert_eq!(detect("SELECT * FROM orders o WHERE o.user_id = 42"), vec![Hint::IndexLookup]);
    }

    #[test]
    fn test_join_predicate_is_not_id_lookup() {
        assert!(detect("SELECT * FROM a JOIN b ON a.id = b.a_id").is_empty());
    }

    #[test]
    fn test_detect_time_range() {
        assert_eq!(
            detect("SELECT * FROM events WHERE created_at > ? AND created_at < ?"),
            vec![Hint::RangeScan]
        );
        assert_eq!(detect("SELECT * FROM logs WHERE ts BETWEEN ? AND ?"), vec![Hint::RangeScan]);
    }

    #[test]
    fn test_detect_both() {
        assert_eq!(
            detect("SELECT * FROM events WHERE account_id = ? AND event_date >= ?"),
            vec![Hint::IndexLookup, Hint::RangeScan]
        );
    }

    #[test]
    fn test_no_pattern_no_hint() {
        assert!(detect("SELECT name FROM users WHERE status = 'active'").is_empty());
    }

    #[test]
    fn test_read_only_detection() {
        assert!(is_read_only("SELECT 1"));
        assert!(is_read_only("with recent AS (SELECT 1) SELECT * FROM recent"));
        assert!(is_read_only("EXPLAIN SELECT 1"));
        assert!(!is_read_only("UPDATE users SET name = ?"));
        assert!(!is_read_only("SELECT * FROM jobs WHERE id = ? FOR UPDATE"));
        assert!(!is_read_only(""));
    }

    #[test]
    fn test_implicit_join_becomes_explicit() {
        let out = explicit_joins("SELECT * FROM users u, orders o WHERE u.id = o.user_id AND o.total > ?").unwrap();
        assert_eq!(out, "SELECT * FROM users u JOIN orders o ON u.id = o.user_id WHERE o.total > ?");
    }

    #[test]
    fn test_join_predicate_only_drops_where() {
        let out = explicit_joins("SELECT * FROM users u, orders o WHERE o.user_id = u.id ORDER BY u.name").unwrap();
        assert_eq!(out, "SELECT * FROM users u JOIN orders o ON o.user_id = u.id ORDER BY u.name");
    }

    #[test]
    fn test_no_join_predicate_becomes_cross_join() {
        let out = explicit_joins("SELECT * FROM colors, sizes").unwrap();
        assert_eq!(out, "SELECT * FROM colors CROSS JOIN sizes");
    }

    #[test]
    fn test_or_clause_left_in_where() {
        let out = explicit_joins("SELECT * FROM a x, b y WHERE x.k = y.k OR x.z = 1").unwrap();
        assert_eq!(out, "SELECT * FROM a x CROSS JOIN b y WHERE x.k = y.k OR x.z = 1");
    }

    #[test]
    fn test_single_table_untouched() {
        assert!(explicit_joins("SELECT * FROM users WHERE id = ?").is_none());
        assert!(explicit_joins("SELECT * FROM a JOIN b ON a.id = b.a_id").is_none());
        assert!(explicit_joins("INSERT INTO t (a, b) VALUES (?, ?)").is_none());
    }
}
