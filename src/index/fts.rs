use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{Connection, params};

use crate::error::{GraphError, Result};
use crate::models::EntityId;

pub const MAX_QUERY_BYTES: usize = 1000;
pub const MAX_QUERY_TOKENS: usize = 100;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static SQL_LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--[^\n]*").unwrap());
static SQL_BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

const SQL_KEYWORDS: [&str; 14] = [
    "select", "insert", "update", "delete", "drop", "union", "where", "from", "exec", "execute",
    "create", "alter", "table", "pragma",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Term { text: String, prefix: bool },
    Phrase(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

/// Sanitize a user-supplied full-text query down to the narrow grammar we
/// pass to FTS5: terms, phrases, prefix `*`, AND/OR/NOT, grouping. Column
/// filters, NEAR, leading negation, HTML, SQL comments and keywords,
/// zero-width and directional Unicode are stripped; diacritics fold to
/// ASCII; unbalanced quotes or parens reject the query outright.
pub fn sanitize_query(raw: &str) -> Result<String> {
    if raw.len() > MAX_QUERY_BYTES {
        return Err(GraphError::Validation(format!(
            "fts query exceeds {MAX_QUERY_BYTES} bytes"
        )));
    }

    let mut text = HTML_TAG.replace_all(raw, " ").into_owned();
    text = SQL_BLOCK_COMMENT.replace_all(&text, " ").into_owned();
    text = SQL_LINE_COMMENT.replace_all(&text, " ").into_owned();
    let text: String = text
        .chars()
        .filter(|c| !is_invisible(*c))
        .map(fold_char)
        .collect();

    if text.matches('"').count() % 2 != 0 {
        return Err(GraphError::Validation("unbalanced quotes in fts query".into()));
    }
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(GraphError::Validation(
                        "unbalanced parentheses in fts query".into(),
                    ));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(GraphError::Validation(
            "unbalanced parentheses in fts query".into(),
        ));
    }

    let tokens = tokenize(&text);
    let tokens = normalize_operators(tokens);
    if tokens.len() > MAX_QUERY_TOKENS {
        return Err(GraphError::Validation(format!(
            "fts query exceeds {MAX_QUERY_TOKENS} tokens"
        )));
    }
    if !tokens
        .iter()
        .any(|t| matches!(t, Token::Term { .. } | Token::Phrase(_)))
    {
        return Err(GraphError::Validation("empty fts query".into()));
    }

    Ok(render(&tokens))
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
            | '\u{061C}'
    )
}

/// Fold common Latin diacritics to their ASCII base letter.
fn fold_char(c: char) -> char {
    match c {
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'è'..='ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ì'..='ï' | 'ī' | 'ĭ' | 'į' => 'i',
        'ò'..='ö' | 'ō' | 'ŏ' | 'ő' | 'ø' => 'o',
        'ù'..='ü' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ý' | 'ÿ' => 'y',
        'ś' | 'ş' | 'š' => 's',
        'ź' | 'ż' | 'ž' => 'z',
        'ď' | 'đ' | 'ð' => 'd',
        'ĝ' | 'ğ' | 'ġ' => 'g',
        'ţ' | 'ť' => 't',
        'ŕ' | 'ř' => 'r',
        'ĺ' | 'ļ' | 'ľ' | 'ł' => 'l',
        'À'..='Å' => 'A',
        'È'..='Ë' => 'E',
        'Ì'..='Ï' => 'I',
        'Ò'..='Ö' | 'Ø' => 'O',
        'Ù'..='Ü' => 'U',
        'Ç' => 'C',
        'Ñ' => 'N',
        'Ý' => 'Y',
        _ => c,
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '"' => {
                let mut phrase = String::new();
                for pc in chars.by_ref() {
                    if pc == '"' {
                        break;
                    }
                    phrase.push(pc);
                }
                let cleaned: String = phrase
                    .chars()
                    .map(|pc| if is_word_char(pc) { pc } else { ' ' })
                    .collect();
                let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
                if !cleaned.is_empty() {
                    tokens.push(Token::Phrase(cleaned));
                }
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&nc) = chars.peek() {
                    if nc.is_whitespace() || nc == '(' || nc == ')' || nc == '"' {
                        break;
                    }
                    word.push(nc);
                    chars.next();
                }
                push_word(&mut tokens, &word);
            }
        }
    }
    tokens
}

fn push_word(tokens: &mut Vec<Token>, word: &str) {
    match word.to_ascii_uppercase().as_str() {
        "AND" => {
            tokens.push(Token::And);
            return;
        }
        "OR" => {
            tokens.push(Token::Or);
            return;
        }
        "NOT" => {
            tokens.push(Token::Not);
            return;
        }
        upper if upper == "NEAR" || upper.starts_with("NEAR/") => return,
        _ => {}
    }

    // A column filter (`field:term`) decays to its parts as plain terms;
    // leading negation decays to the bare term.
    for part in word.split(':') {
        let part = part.trim_start_matches('-');
        let prefix = part.ends_with('*');
        let cleaned: String = part.chars().filter(|c| is_word_char(*c)).collect();
        if cleaned.is_empty() || SQL_KEYWORDS.contains(&cleaned.to_lowercase().as_str()) {
            continue;
        }
        tokens.push(Token::Term {
            text: cleaned,
            prefix,
        });
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Drop operators that have nothing to operate on: leading AND/OR/NOT, runs
/// of operators, and trailing operators.
fn normalize_operators(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::And | Token::Or | Token::Not => {
                let has_operand = matches!(
                    out.last(),
                    Some(Token::Term { .. }) | Some(Token::Phrase(_)) | Some(Token::Close)
                );
                // NOT additionally binds to the right in FTS5 (a NOT b), so a
                // leading NOT has no left operand and is dropped.
                if has_operand {
                    out.push(token);
                }
            }
            other => out.push(other),
        }
    }
    while matches!(out.last(), Some(Token::And) | Some(Token::Or) | Some(Token::Not)) {
        out.pop();
    }
    out
}

fn render(tokens: &[Token]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Term { text, prefix } => {
                if *prefix {
                    parts.push(format!("\"{text}\"*"));
                } else {
                    parts.push(format!("\"{text}\""));
                }
            }
            Token::Phrase(p) => parts.push(format!("\"{p}\"")),
            Token::And => parts.push("AND".into()),
            Token::Or => parts.push("OR".into()),
            Token::Not => parts.push("NOT".into()),
            Token::Open => parts.push("(".into()),
            Token::Close => parts.push(")".into()),
        }
    }
    parts.join(" ")
}

// ── Document maintenance ──

pub(crate) fn upsert_document(
    conn: &Connection,
    subject: &EntityId,
    predicate: &str,
    content: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM fts_documents WHERE subject = ?1 AND predicate = ?2",
        params![subject.as_str(), predicate],
    )?;
    conn.execute(
        "INSERT INTO fts_documents (subject, predicate, content) VALUES (?1, ?2, ?3)",
        params![subject.as_str(), predicate, content],
    )?;
    Ok(())
}

pub(crate) fn delete_document(
    conn: &Connection,
    subject: &EntityId,
    predicate: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM fts_documents WHERE subject = ?1 AND predicate = ?2",
        params![subject.as_str(), predicate],
    )?;
    Ok(())
}

/// Full-text search, optionally restricted to a single predicate. The query
/// is sanitized before it reaches FTS5.
pub(crate) fn search(
    conn: &Connection,
    query: &str,
    predicate: Option<&str>,
    limit: usize,
) -> Result<Vec<EntityId>> {
    let sanitized = sanitize_query(query)?;
    let mut stmt = conn.prepare_cached(
        "SELECT subject FROM fts_documents \
         WHERE fts_documents MATCH ?1 AND (?2 IS NULL OR predicate = ?2) \
         GROUP BY subject ORDER BY min(rank) LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![sanitized, predicate, limit as i64], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(EntityId::from_trusted).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_boolean_grammar() {
        let out = sanitize_query("alice AND (bob OR carol) NOT dave").unwrap();
        assert_eq!(out, "\"alice\" AND ( \"bob\" OR \"carol\" ) NOT \"dave\"");
    }

    #[test]
    fn test_preserves_phrase_and_prefix() {
        let out = sanitize_query("\"graph database\" quer*").unwrap();
        assert_eq!(out, "\"graph database\" \"quer\"*");
    }

    #[test]
    fn test_strips_column_filter() {
        let out = sanitize_query("title:alice").unwrap();
        assert!(!out.contains(':'), "column filter survived: {out}");
        assert!(out.contains("\"title\""));
        assert!(out.contains("\"alice\""));
    }

    #[test]
    fn test_rejects_unbalanced_quotes_and_parens() {
        assert!(sanitize_query("\"unterminated").is_err());
        assert!(sanitize_query("(open").is_err());
        assert!(sanitize_query("close)").is_err());
    }

    #[test]
    fn test_strips_sql_comments_and_keywords() {
        let out = sanitize_query("alice -- DROP TABLE users").unwrap();
        assert!(!out.contains("--"));
        assert!(!out.to_lowercase().contains("drop"));

        let out = sanitize_query("alice /* UNION SELECT */ bob").unwrap();
        assert_eq!(out, "\"alice\" \"bob\"");
    }

    #[test]
    fn test_strips_html() {
        let out = sanitize_query("<script>alert(1)</script> alice").unwrap();
        assert!(!out.contains('<'));
        assert!(out.contains("\"alice\""));
    }

    #[test]
    fn test_folds_diacritics_and_invisibles() {
        let out = sanitize_query("caf\u{e9} z\u{200B}ero").unwrap();
        assert!(out.contains("\"cafe\""));
        assert!(out.contains("\"zero\""));
    }

    #[test]
    fn test_drops_leading_negation_and_near() {
        let out = sanitize_query("NOT alice").unwrap();
        assert_eq!(out, "\"alice\"");
        let out = sanitize_query("-alice bob").unwrap();
        assert_eq!(out, "\"alice\" \"bob\"");
        let out = sanitize_query("alice NEAR/3 bob").unwrap();
        assert_eq!(out, "\"alice\" \"bob\"");
    }

    #[test]
    fn test_length_and_token_limits() {
        assert!(sanitize_query(&"x".repeat(1001)).is_err());
        let many = (0..101).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ");
        assert!(sanitize_query(&many).is_err());
    }

    #[test]
    fn test_rejects_query_with_no_terms() {
        assert!(sanitize_query("AND OR NOT").is_err());
        assert!(sanitize_query("   ").is_err());
    }
}
