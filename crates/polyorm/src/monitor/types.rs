use std::fmt;
use std::time::Duration;

use crate::dialect::Dialect;
use crate::driver::DriverResult;
use crate::error::{OrmError, OrmResult};

/// Statement category, used by counters and by hooks that filter statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Select,
    /// INSERT, plus REPLACE and MERGE upserts
    Insert,
    Update,
    Delete,
    /// START/BEGIN/COMMIT/ROLLBACK, savepoints and SET TRANSACTION
    Transaction,
    /// CREATE/ALTER/DROP/TRUNCATE
    Schema,
    Other,
}

impl QueryType {
    pub(crate) const COUNT: usize = 7;

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Insert => "insert",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
            QueryType::Transaction => "transaction",
            QueryType::Schema => "schema",
            QueryType::Other => "other",
        }
    }

    /// Classify a statement by its leading keyword.
    ///
    /// Comments, quoted text and placeholders are skipped. A `WITH` statement
    /// is classified by the first data keyword outside the CTE bodies.
    pub fn from_sql(sql: &str) -> Self {
        let mut words = Words::new(sql);
        let Some((first, _)) = words.next() else {
            return QueryType::Other;
        };

        if first.eq_ignore_ascii_case("WITH") {
            return words
                .filter(|&(_, depth)| depth == 0)
                .find_map(|(word, _)| Self::data_statement(word))
                .unwrap_or(QueryType::Select);
        }
        if let Some(kind) = Self::data_statement(first) {
            return kind;
        }

        let upper = first.to_ascii_uppercase();
        match upper.as_str() {
            "START" | "BEGIN" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "END" | "SAVE" => {
                QueryType::Transaction
            }
            "SET" => match words.next() {
                Some((next, _)) if next.eq_ignore_ascii_case("TRANSACTION") => QueryType::Transaction,
                _ => QueryType::Other,
            },
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "COMMENT" => QueryType::Schema,
            _ => QueryType::Other,
        }
    }

    fn data_statement(word: &str) -> Option<Self> {
        let upper = word.to_ascii_uppercase();
        match upper.as_str() {
            "SELECT" | "VALUES" => Some(QueryType::Select),
            "INSERT" | "REPLACE" | "MERGE" | "UPSERT" => Some(QueryType::Insert),
            "UPDATE" => Some(QueryType::Update),
            "DELETE" => Some(QueryType::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bare words of a statement with their parenthesis depth.
struct Words<'a> {
    sql: &'a str,
    pos: usize,
    depth: u32,
}

impl<'a> Words<'a> {
    fn new(sql: &'a str) -> Self {
        Self { sql, pos: 0, depth: 0 }
    }
}

impl<'a> Iterator for Words<'a> {
    type Item = (&'a str, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.sql.len() {
            let rest = &self.sql[self.pos..];
            let byte = rest.as_bytes()[0];
            if rest.starts_with("--") {
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/*") {
                self.pos += rest[2..].find("*/").map_or(rest.len(), |end| end + 4);
            } else if let Some(close) = closing_quote(byte) {
                self.pos += quoted_len(rest, close);
            } else if byte == b'(' {
                self.depth += 1;
                self.pos += 1;
            } else if byte == b')' {
                self.depth = self.depth.saturating_sub(1);
                self.pos += 1;
            } else if byte.is_ascii_alphabetic() || byte == b'_' {
                let len = word_len(rest);
                self.pos += len;
                return Some((&rest[..len], self.depth));
            } else if byte.is_ascii_digit() || matches!(byte, b'$' | b'@' | b':' | b'?') {
                // Numbers and placeholders.
                self.pos += 1 + word_len(&rest[1..]);
            } else {
                self.pos += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
        None
    }
}

fn word_len(text: &str) -> usize {
    text.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len())
}

fn closing_quote(byte: u8) -> Option<char> {
    match byte {
        b'\'' => Some('\''),
        b'"' => Some('"'),
        b'`' => Some('`'),
        b'[' => Some(']'),
        _ => None,
    }
}

/// Length of a quoted run starting at `text[0]`; doubled quotes are escapes.
fn quoted_len(text: &str, close: char) -> usize {
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((index, c)) = chars.next() {
        if c != close {
            continue;
        }
        if chars.peek().is_some_and(|&(_, next)| next == close) {
            chars.next();
            continue;
        }
        return index + c.len_utf8();
    }
    text.len()
}

/// What monitors and hooks know about a statement.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// SQL sent to the driver, after hooks ran.
    pub sql: String,
    /// SQL as the builder or caller produced it.
    pub original_sql: String,
    pub param_count: usize,
    pub query_type: QueryType,
    pub dialect: Dialect,
    pub runner_id: u64,
    /// 0 outside a transaction
    pub transaction_depth: usize,
}

impl QueryContext {
    pub fn new(dialect: Dialect, sql: &str, param_count: usize) -> Self {
        Self {
            sql: sql.to_string(),
            original_sql: sql.to_string(),
            param_count,
            query_type: QueryType::from_sql(sql),
            dialect,
            runner_id: 0,
            transaction_depth: 0,
        }
    }

    pub fn on_runner(mut self, runner_id: u64, transaction_depth: usize) -> Self {
        self.runner_id = runner_id;
        self.transaction_depth = transaction_depth;
        self
    }

    pub fn is_rewritten(&self) -> bool {
        self.sql != self.original_sql
    }

    pub(crate) fn rewrite(&mut self, sql: String) {
        self.query_type = QueryType::from_sql(&sql);
        self.sql = sql;
    }
}

const MAX_ERROR_BYTES: usize = 512;

/// How a statement ended.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(usize),
    Affected(u64),
    /// Message clipped to 512 bytes
    Error(String),
}

impl QueryOutcome {
    pub fn of(result: &OrmResult<DriverResult>) -> Self {
        match result {
            Ok(r) => match r.affected {
                Some(affected) if r.rows.is_empty() => QueryOutcome::Affected(affected),
                _ => QueryOutcome::Rows(r.rows.len()),
            },
            Err(OrmError::Timeout(after)) => QueryOutcome::error(format!("timeout after {after:?}")),
            Err(err) => QueryOutcome::error(err.to_string()),
        }
    }

    pub fn error(message: String) -> Self {
        QueryOutcome::Error(super::clip(&message, Some(MAX_ERROR_BYTES)).into_owned())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutcome::Rows(n) => write!(f, "{n} rows"),
            QueryOutcome::Affected(n) => write!(f, "{n} affected"),
            QueryOutcome::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Receives timing for every statement a runner executes.
///
/// Monitors only see events while monitoring is enabled on the data source.
pub trait QueryMonitor: Send + Sync {
    fn on_query_start(&self, _ctx: &QueryContext) {}

    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, outcome: &QueryOutcome);

    /// Statement crossed `max_query_execution_time`.
    fn on_slow_query(&self, _ctx: &QueryContext, _duration: Duration) {}
}

/// Decision returned by [`QueryHook::before_query`].
#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    Continue,
    /// Send this SQL instead. Parameters are passed through unchanged.
    Rewrite(String),
    /// Fail with [`OrmError::Aborted`](crate::OrmError::Aborted) before the driver sees the statement.
    Abort(String),
}

/// Inspects, rewrites or vetoes statements. Hooks run whether or not monitoring is enabled.
pub trait QueryHook: Send + Sync {
    fn before_query(&self, _ctx: &QueryContext) -> HookAction {
        HookAction::Continue
    }

    /// Runs before monitors receive the completion event.
    fn after_query(&self, _ctx: &QueryContext, _duration: Duration, _outcome: &QueryOutcome) {}
}
