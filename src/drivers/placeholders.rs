//! Rewrites `@Name` parameter references in SQL text to positional
//! placeholders.

use crate::error::{Result, SqlHelperError};
use crate::types::{Command, SqlValue};

/// Positional placeholder style of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
    /// SQL Server RPC placeholders like `@P1`.
    Mssql,
}

impl PlaceholderStyle {
    fn render(self, position: usize) -> String {
        match self {
            PlaceholderStyle::Postgres => format!("${}", position),
            PlaceholderStyle::Mssql => format!("@P{}", position),
        }
    }
}

#[derive(Clone, Copy)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Bracketed,
    LineComment,
    BlockComment(usize),
}

/// Parameter name without its leading `@`.
pub fn bare_name(name: &str) -> &str {
    name.trim_start_matches('@')
}

/// Rewrites every `@Name` outside quotes and comments to a positional
/// placeholder. Returns the rewritten SQL and the distinct names in
/// placeholder order; repeated names share one position.
///
/// `@@IDENTITY`-style system variables are left alone.
pub fn translate_named(sql: &str, style: PlaceholderStyle) -> (String, Vec<String>) {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut names: Vec<String> = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;
    let mut copied = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                // brackets quote identifiers in T-SQL and subscript arrays in PostgreSQL
                b'[' if style == PlaceholderStyle::Mssql => state = State::Bracketed,
                b'-' if bytes.get(idx + 1) == Some(&b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'@' if bytes.get(idx + 1) == Some(&b'@') => {
                    // system variable, skip both markers and the name
                    idx += 2;
                    while idx < bytes.len() && is_ident(bytes[idx]) {
                        idx += 1;
                    }
                    continue;
                }
                b'@' => {
                    let start = idx + 1;
                    let mut end = start;
                    while end < bytes.len() && is_ident(bytes[end]) {
                        end += 1;
                    }
                    if end > start {
                        let name = &sql[start..end];
                        let position = match names.iter().position(|n| n == name) {
                            Some(p) => p + 1,
                            None => {
                                names.push(name.to_string());
                                names.len()
                            }
                        };
                        out.push_str(&sql[copied..idx]);
                        out.push_str(&style.render(position));
                        copied = end;
                        idx = end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Bracketed => {
                if b == b']' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if b == b'/' && bytes.get(idx + 1) == Some(&b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    out.push_str(&sql[copied..]);
    (out, names)
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Looks up the input value for each placeholder name of a text command.
///
/// Names compare without the leading `@` and ignoring ASCII case, the way
/// SQL Server resolves them. A name with no bound value is an error.
pub fn positional_values(command: &Command, names: &[String]) -> Result<Vec<SqlValue>> {
    names
        .iter()
        .map(|name| {
            command
                .inputs()
                .find(|p| bare_name(&p.name).eq_ignore_ascii_case(name))
                .map(|p| p.value.clone())
                .ok_or_else(|| {
                    SqlHelperError::QueryFailed(format!("no value bound for parameter @{}", name))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Parameter;

    #[test]
    fn test_translate_postgres() {
        let (sql, names) = translate_named(
            "SELECT * FROM users WHERE id = @Id AND name = @Name OR alias = @Name",
            PlaceholderStyle::Postgres,
        );
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE id = $1 AND name = $2 OR alias = $2"
        );
        assert_eq!(names, ["Id", "Name"]);
    }

    #[test]
    fn test_translate_mssql() {
        let (sql, names) =
            translate_named("UPDATE t SET a = @A WHERE b = @B", PlaceholderStyle::Mssql);
        assert_eq!(sql, "UPDATE t SET a = @P1 WHERE b = @P2");
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn test_translate_skips_literals_and_comments() {
        let (sql, names) = translate_named(
            "SELECT '@notparam', \"@col\", [@x] -- @comment\n/* @block */ FROM t WHERE a = @A AND @@ROWCOUNT > 0",
            PlaceholderStyle::Mssql,
        );
        assert_eq!(
            sql,
            "SELECT '@notparam', \"@col\", [@x] -- @comment\n/* @block */ FROM t WHERE a = @P1 AND @@ROWCOUNT > 0"
        );
        assert_eq!(names, ["A"]);
    }

    #[test]
    fn test_translate_postgres_array_subscript() {
        let (sql, names) = translate_named(
            "SELECT tags[@Idx], tags[1:@Upper] FROM posts WHERE id = @Id",
            PlaceholderStyle::Postgres,
        );
        assert_eq!(sql, "SELECT tags[$1], tags[1:$2] FROM posts WHERE id = $3");
        assert_eq!(names, ["Idx", "Upper", "Id"]);
    }

    #[test]
    fn test_positional_values() {
        let mut command = Command::text("SELECT @a, @B");
        command
            .parameters
            .push(Parameter::input("@b", SqlValue::Int32(2)));
        command
            .parameters
            .push(Parameter::input("A", SqlValue::Int32(1)));

        let values = positional_values(&command, &["a".to_string(), "B".to_string()]).unwrap();
        assert_eq!(values, [SqlValue::Int32(1), SqlValue::Int32(2)]);

        assert!(positional_values(&command, &["missing".to_string()]).is_err());
    }
}
