//! Dialect-specific identifier quoting, time-stamp arithmetic, text search,
//! and row-limiting syntax (spec §4.9 "Dialect dispatch").

/// Target SQL dialects named in spec §4.9.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite/PostgreSQL-style ANSI SQL.
    Ansi,
    /// Oracle, paged via `ROWNUM`.
    Oracle,
    /// SQL Server, paged via `OFFSET … FETCH FIRST …`.
    SqlServer,
}

impl Dialect {
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::SqlServer => format!("[{}]", ident),
            Dialect::Ansi | Dialect::Oracle => format!("\"{}\"", ident),
        }
    }

    /// Rebases a time-stamp column to seconds since the Unix epoch (spec
    /// §6 "Time stamps emitted as `julianday(x) * 86400 − epoch_offset` or
    /// equivalent").
    pub fn epoch_seconds(&self, column_expr: &str) -> String {
        match self {
            Dialect::Ansi => format!("(julianday({}) - 2440587.5) * 86400.0", column_expr),
            Dialect::Oracle => format!("(CAST({} AS DATE) - DATE '1970-01-01') * 86400", column_expr),
            Dialect::SqlServer => format!("CAST(DATEDIFF(SECOND, '1970-01-01', {}) AS FLOAT)", column_expr),
        }
    }

    /// A boolean predicate testing whether `text_expr` contains `word`
    /// (spec §4.9 "`CONTAINS` for text").
    pub fn contains(&self, text_expr: &str, word: &str) -> String {
        let escaped = word.replace('\'', "''");
        match self {
            Dialect::Ansi => format!("{} LIKE '%{}%'", text_expr, escaped),
            Dialect::Oracle | Dialect::SqlServer => format!("CONTAINS({}, '{}') > 0", text_expr, escaped),
        }
    }

    /// Wraps `query` (a `SELECT` with no trailing semicolon) so that it
    /// returns at most `n` rows, using each dialect's own paging syntax
    /// (spec §4.9 "LIMIT variants").
    pub fn limit(&self, query: &str, n: u64) -> String {
        match self {
            Dialect::Ansi => format!("{} LIMIT {}", query, n),
            Dialect::Oracle => format!("SELECT * FROM ({}) WHERE ROWNUM <= {}", query, n),
            Dialect::SqlServer => format!("{} OFFSET 0 ROWS FETCH FIRST {} ROWS ONLY", query, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_dialect_quotes_its_own_way() {
        assert_eq!(Dialect::Ansi.quote_ident("jk"), "\"jk\"");
        assert_eq!(Dialect::SqlServer.quote_ident("jk"), "[jk]");
    }

    #[test]
    fn limit_uses_dialect_specific_paging() {
        assert!(Dialect::Ansi.limit("SELECT 1", 10).ends_with("LIMIT 10"));
        assert!(Dialect::Oracle.limit("SELECT 1", 10).contains("ROWNUM <= 10"));
        assert!(Dialect::SqlServer.limit("SELECT 1", 10).contains("FETCH FIRST 10 ROWS ONLY"));
    }
}
