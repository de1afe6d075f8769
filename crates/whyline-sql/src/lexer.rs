//! Literal- and comment-aware scanning
//!
//! Uses the sqlparser tokenizer to blank out string literals and comments so
//! that keywords, semicolons and table names inside them are not seen by the
//! pattern checks. Identifiers (quoted or not) are kept verbatim.
//!
//! The masked text is byte-aligned with the input: every match found in it
//! sits at the same offsets in the original statement, so rewrites can be
//! located on the mask and applied to the original.

use crate::error::SqlValidationError;
use sqlparser::dialect::{BigQueryDialect, Dialect, DuckDbDialect};
use sqlparser::tokenizer::{Location, Token, Tokenizer, Whitespace};
use whyline_core::Engine;

/// Tokenizer dialect for an engine
pub fn sql_dialect(engine: Engine) -> Box<dyn Dialect> {
    match engine {
        Engine::DuckDb => Box::new(DuckDbDialect {}),
        Engine::BigQuery => Box::new(BigQueryDialect {}),
    }
}

fn is_string_literal(token: &Token) -> bool {
    matches!(
        token,
        Token::SingleQuotedString(_)
            | Token::DoubleQuotedString(_)
            | Token::TripleSingleQuotedString(_)
            | Token::TripleDoubleQuotedString(_)
            | Token::SingleQuotedByteStringLiteral(_)
            | Token::DoubleQuotedByteStringLiteral(_)
            | Token::TripleSingleQuotedByteStringLiteral(_)
            | Token::TripleDoubleQuotedByteStringLiteral(_)
            | Token::SingleQuotedRawStringLiteral(_)
            | Token::DoubleQuotedRawStringLiteral(_)
            | Token::TripleSingleQuotedRawStringLiteral(_)
            | Token::TripleDoubleQuotedRawStringLiteral(_)
            | Token::NationalStringLiteral(_)
            | Token::EscapedStringLiteral(_)
            | Token::UnicodeStringLiteral(_)
            | Token::HexStringLiteral(_)
            | Token::DollarQuotedString(_)
    )
}

fn is_comment(token: &Token) -> bool {
    matches!(
        token,
        Token::Whitespace(Whitespace::SingleLineComment { .. } | Whitespace::MultiLineComment(_))
    )
}

/// Byte offset of a 1-based tokenizer location
fn byte_offset(sql: &str, line_starts: &[usize], location: Location) -> usize {
    let line = usize::try_from(location.line.saturating_sub(1)).unwrap_or(usize::MAX);
    let column = usize::try_from(location.column.saturating_sub(1)).unwrap_or(usize::MAX);

    let Some(&start) = line_starts.get(line) else {
        return sql.len();
    };
    sql[start..]
        .char_indices()
        .nth(column)
        .map_or(sql.len(), |(offset, _)| start + offset)
}

/// Byte ranges of string literals and comments in `sql`, in source order
pub fn literal_and_comment_spans(sql: &str, engine: Engine) -> Result<Vec<(usize, usize)>, SqlValidationError> {
    let dialect = sql_dialect(engine);
    let tokens = Tokenizer::new(&*dialect, sql)
        .tokenize_with_location()
        .map_err(|e| SqlValidationError::Tokenize(e.to_string()))?;

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    Ok(tokens
        .iter()
        .filter(|t| is_string_literal(&t.token) || is_comment(&t.token))
        .map(|t| {
            (
                byte_offset(sql, &line_starts, t.span.start),
                byte_offset(sql, &line_starts, t.span.end),
            )
        })
        .collect())
}

/// `sql` with literal and comment contents replaced by spaces
///
/// Quote characters bounding a literal and line breaks are kept. The result
/// has the same byte length as the input.
pub fn mask_literals_and_comments(sql: &str, engine: Engine) -> Result<String, SqlValidationError> {
    let spans = literal_and_comment_spans(sql, engine)?;

    let mut masked = String::with_capacity(sql.len());
    let mut last = 0;
    for (start, end) in spans {
        if start < last || end > sql.len() {
            continue;
        }
        masked.push_str(&sql[last..start]);

        let span = &sql[start..end];
        let final_char = span.char_indices().last().map_or(0, |(i, _)| i);
        for (i, c) in span.char_indices() {
            let bounding_quote = (i == 0 || i == final_char) && matches!(c, '\'' | '"');
            if bounding_quote || c == '\n' {
                masked.push(c);
            } else {
                masked.extend(std::iter::repeat(' ').take(c.len_utf8()));
            }
        }
        last = end;
    }
    masked.push_str(&sql[last..]);

    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strings_are_blanked() {
        let masked = mask_literals_and_comments("SELECT 'a; DROP TABLE x' AS s FROM mart_a", Engine::DuckDb).unwrap();
        assert_eq!(masked, "SELECT '               ' AS s FROM mart_a");
    }

    #[test]
    fn comments_are_blanked() {
        let sql = "-- delete me\nSELECT 1 /* ; */ FROM mart_a";
        let masked = mask_literals_and_comments(sql, Engine::DuckDb).unwrap();
        assert!(!masked.contains("delete"));
        assert!(!masked.contains(';'));
        assert_eq!(masked, "            \nSELECT 1         FROM mart_a");
    }

    #[test]
    fn mask_is_byte_aligned_with_multibyte_text() {
        let sql = "SELECT 'café; drop' AS s,\n  -- ünïcode\n  x FROM mart_a WHERE y = 'ß'";
        let masked = mask_literals_and_comments(sql, Engine::DuckDb).unwrap();
        assert_eq!(masked.len(), sql.len());
        assert_eq!(masked.find("FROM mart_a"), sql.find("FROM mart_a"));
        assert!(!masked.contains("drop"));
    }

    #[test]
    fn backticked_identifiers_survive_bigquery_scan() {
        let sql = "SELECT * FROM `whyline-denver.mart_denver.mart_a` WHERE stop_id = \"x\"";
        let masked = mask_literals_and_comments(sql, Engine::BigQuery).unwrap();
        assert_eq!(
            masked,
            "SELECT * FROM `whyline-denver.mart_denver.mart_a` WHERE stop_id = \" \""
        );
    }

    #[test]
    fn spans_point_at_literals() {
        let sql = "SELECT 'a' FROM t -- c";
        let spans = literal_and_comment_spans(sql, Engine::DuckDb).unwrap();
        assert_eq!(spans, vec![(7, 10), (18, 22)]);
        assert_eq!(&sql[spans[0].0..spans[0].1], "'a'");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = mask_literals_and_comments("SELECT 'oops FROM mart_a", Engine::DuckDb).unwrap_err();
        assert_eq!(err.code(), "SQL_TOKENIZE_ERROR");
    }
}
