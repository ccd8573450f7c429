//! Parser for pattern expressions.
//!
//! `parse` is a pure function from (raw expression, kind) to a compiled
//! [`MatchSpec`]. Glob compilation lives in [`super::glob`]; this module adds
//! regex compilation and the compound predicate grammar:
//!
//! ```text
//! compound  := predicate (('AND' | '&&') predicate)*
//! predicate := ('name' | 'path') ('GLOB' | 'MATCHES') string
//!            | 'size' ('>' | '>=' | '<' | '<=') size
//!            | 'modified' ('>' | '>=' | '<' | '<=') date
//!            | 'ext' 'IN' '[' string (',' string)* ']'
//!            | 'ext' '==' string
//! size      := number unit?          e.g. 512, 10KB, 1.5MB
//! date      := string                'YYYY-MM-DD' or RFC 3339
//! string    := '...' | "..."         escapes: \' \" \\
//! ```

use chrono::{DateTime, NaiveDate};
use regex::RegexBuilder;
use std::collections::BTreeSet;

use crate::error::ParseError;

use super::ast::{
    ComparisonOp, CompoundSpec, ExpressionKind, Field, MatchScope, MatchSpec, Predicate,
    RegexSpec, Value,
};
use super::glob::GlobProgram;

/// Whether file systems on this platform compare names case-insensitively
pub fn native_case_sensitive() -> bool {
    !cfg!(any(target_os = "macos", target_os = "windows"))
}

/// Options that affect compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub case_sensitive: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            case_sensitive: native_case_sensitive(),
        }
    }
}

/// Parse an expression with the platform's native case sensitivity
pub fn parse(raw: &str, kind: ExpressionKind) -> Result<MatchSpec, ParseError> {
    parse_with(raw, kind, ParseOptions::default())
}

/// Parse an expression with explicit options
pub fn parse_with(
    raw: &str,
    kind: ExpressionKind,
    options: ParseOptions,
) -> Result<MatchSpec, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyExpression);
    }

    match kind {
        ExpressionKind::Glob => GlobProgram::compile(raw, options.case_sensitive).map(MatchSpec::Glob),
        ExpressionKind::Regex => compile_regex(raw, options.case_sensitive).map(MatchSpec::Regex),
        ExpressionKind::Compound => {
            let predicates = parse_predicates(raw, options)?;
            Ok(MatchSpec::Compound(CompoundSpec { predicates }))
        }
    }
}

/// Parse a list of predicates in the compound grammar (rule extra conditions)
pub fn parse_predicates(raw: &str, options: ParseOptions) -> Result<Vec<Predicate>, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyExpression);
    }
    let tokens = tokenize(raw)?;
    let mut parser = PredicateParser {
        tokens,
        index: 0,
        end: raw.chars().count(),
        options,
    };
    parser.parse_all()
}

fn compile_regex(raw: &str, case_sensitive: bool) -> Result<RegexSpec, ParseError> {
    let regex = RegexBuilder::new(raw)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| ParseError::InvalidSyntax {
            message: regex_error_message(&e),
            position: None,
        })?;

    let capture_names = regex
        .capture_names()
        .flatten()
        .map(|name| name.to_string())
        .collect();

    let catch_all = matches!(raw, ".*" | "^.*" | ".*$" | "^.*$" | ".+" | "^.+$" | "^.+" | ".+$");

    Ok(RegexSpec {
        regex,
        scope: MatchScope::for_expression(raw),
        capture_names,
        catch_all,
    })
}

fn regex_error_message(err: &regex::Error) -> String {
    match err {
        // Syntax errors render the expression with a caret; keep the last line
        regex::Error::Syntax(text) => text
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or(text.as_str())
            .trim()
            .to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(String),
    Op(String),
    LBracket,
    RBracket,
    Comma,
    And,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(raw: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let kind = match c {
            '[' => {
                i += 1;
                TokenKind::LBracket
            }
            ']' => {
                i += 1;
                TokenKind::RBracket
            }
            ',' => {
                i += 1;
                TokenKind::Comma
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                i += 2;
                TokenKind::And
            }
            '!' => {
                return Err(ParseError::syntax("negated comparisons are not supported", start));
            }
            '=' | '<' | '>' => {
                let mut op = c.to_string();
                i += 1;
                if chars.get(i) == Some(&'=') {
                    op.push('=');
                    i += 1;
                }
                TokenKind::Op(op)
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::syntax("unterminated string", start)),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => match chars.get(i + 1) {
                            Some(&esc) if esc == '\'' || esc == '"' || esc == '\\' => {
                                value.push(esc);
                                i += 2;
                            }
                            Some(&esc) => {
                                return Err(ParseError::InvalidEscape {
                                    sequence: format!("\\{}", esc),
                                    position: i,
                                })
                            }
                            None => {
                                return Err(ParseError::InvalidEscape {
                                    sequence: "\\".to_string(),
                                    position: i,
                                })
                            }
                        },
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                TokenKind::Str(value)
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                TokenKind::Number(chars[start..i].iter().collect())
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word.eq_ignore_ascii_case("and") {
                    TokenKind::And
                } else {
                    TokenKind::Ident(word)
                }
            }
            other => {
                return Err(ParseError::syntax(
                    format!("unexpected character '{}'", other),
                    start,
                ))
            }
        };

        tokens.push(Token {
            kind,
            position: start,
        });
    }

    Ok(tokens)
}

struct PredicateParser {
    tokens: Vec<Token>,
    index: usize,
    end: usize,
    options: ParseOptions,
}

impl PredicateParser {
    fn parse_all(&mut self) -> Result<Vec<Predicate>, ParseError> {
        let mut predicates = vec![self.predicate()?];
        while let Some(token) = self.next() {
            if token.kind != TokenKind::And {
                return Err(ParseError::syntax("expected AND", token.position));
            }
            predicates.push(self.predicate()?);
        }
        Ok(predicates)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect_next(&mut self, what: &str) -> Result<Token, ParseError> {
        self.next()
            .ok_or_else(|| ParseError::syntax(format!("expected {}", what), self.end))
    }

    fn predicate(&mut self) -> Result<Predicate, ParseError> {
        let token = self.expect_next("a field")?;
        let field = match &token.kind {
            TokenKind::Ident(name) => Field::from_str(name).ok_or_else(|| {
                ParseError::syntax(format!("unknown field '{}'", name), token.position)
            })?,
            _ => return Err(ParseError::syntax("expected a field", token.position)),
        };

        let op_token = self.expect_next("an operator")?;
        let op = match &op_token.kind {
            TokenKind::Op(s) | TokenKind::Ident(s) => ComparisonOp::from_str(s),
            _ => None,
        }
        .ok_or_else(|| ParseError::syntax("expected an operator", op_token.position))?;

        let value_token = self.expect_next("a value")?;
        let value_position = value_token.position;
        let value = self.value(value_token)?;

        self.build(field, op, value, op_token.position, value_position)
    }

    fn value(&mut self, token: Token) -> Result<Value, ParseError> {
        match token.kind {
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Number(raw) => {
                if let Ok(n) = raw.parse::<f64>() {
                    Ok(Value::Number(n))
                } else {
                    crate::utils::parse_size(&raw)
                        .map(Value::SizeBytes)
                        .ok_or_else(|| {
                            ParseError::syntax(format!("invalid size '{}'", raw), token.position)
                        })
                }
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                loop {
                    let item = self.expect_next("']'")?;
                    match item.kind {
                        TokenKind::RBracket if items.is_empty() => break,
                        TokenKind::Str(s) => items.push(Value::String(s)),
                        TokenKind::Ident(s) => items.push(Value::String(s)),
                        _ => return Err(ParseError::syntax("expected a string", item.position)),
                    }
                    let sep = self.expect_next("']'")?;
                    match sep.kind {
                        TokenKind::Comma => continue,
                        TokenKind::RBracket => break,
                        _ => return Err(ParseError::syntax("expected ',' or ']'", sep.position)),
                    }
                }
                Ok(Value::Array(items))
            }
            _ => Err(ParseError::syntax("expected a value", token.position)),
        }
    }

    fn build(
        &self,
        field: Field,
        op: ComparisonOp,
        value: Value,
        op_position: usize,
        value_position: usize,
    ) -> Result<Predicate, ParseError> {
        let unsupported = || {
            ParseError::syntax(
                format!("operator not supported for field '{}'", field.canonical_name()),
                op_position,
            )
        };
        let offset = |err: ParseError| shift_position(err, value_position + 1);

        match field {
            Field::FileName | Field::FilePath => {
                let raw = value
                    .as_string()
                    .ok_or_else(|| ParseError::syntax("expected a string", value_position))?;
                // `path` predicates always see the relative path
                let raw = match (field, MatchScope::for_expression(&raw)) {
                    (Field::FilePath, MatchScope::Name) if op == ComparisonOp::Glob => {
                        format!("**/{}", raw)
                    }
                    _ => raw,
                };
                match op {
                    ComparisonOp::Glob => GlobProgram::compile(&raw, self.options.case_sensitive)
                        .map(Predicate::NameGlob)
                        .map_err(offset),
                    ComparisonOp::Matches => compile_regex(&raw, self.options.case_sensitive)
                        .map(|mut spec| {
                            if field == Field::FilePath {
                                spec.scope = MatchScope::Path;
                            }
                            Predicate::NameRegex(spec)
                        }),
                    _ => Err(unsupported()),
                }
            }
            Field::FileSize => {
                let bytes = value
                    .as_bytes()
                    .ok_or_else(|| ParseError::syntax("expected a size", value_position))?;
                match op {
                    ComparisonOp::Gt => Ok(Predicate::MinSize { bytes, inclusive: false }),
                    ComparisonOp::Gte => Ok(Predicate::MinSize { bytes, inclusive: true }),
                    ComparisonOp::Lt => Ok(Predicate::MaxSize { bytes, inclusive: false }),
                    ComparisonOp::Lte => Ok(Predicate::MaxSize { bytes, inclusive: true }),
                    _ => Err(unsupported()),
                }
            }
            Field::FileModifiedAt => {
                let at_ms = parse_timestamp(&value).ok_or_else(|| {
                    ParseError::syntax("expected a date (YYYY-MM-DD or RFC 3339)", value_position)
                })?;
                match op {
                    ComparisonOp::Gt => Ok(Predicate::ModifiedAfter { at_ms, inclusive: false }),
                    ComparisonOp::Gte => Ok(Predicate::ModifiedAfter { at_ms, inclusive: true }),
                    ComparisonOp::Lt => Ok(Predicate::ModifiedBefore { at_ms, inclusive: false }),
                    ComparisonOp::Lte => Ok(Predicate::ModifiedBefore { at_ms, inclusive: true }),
                    _ => Err(unsupported()),
                }
            }
            Field::FileExt => {
                let items: Vec<String> = match (op, &value) {
                    (ComparisonOp::In, Value::Array(items)) => {
                        items.iter().filter_map(Value::as_string).collect()
                    }
                    (ComparisonOp::Eq, Value::String(s)) => vec![s.clone()],
                    (ComparisonOp::In | ComparisonOp::Eq, _) => {
                        return Err(ParseError::syntax("expected a list of extensions", value_position))
                    }
                    _ => return Err(unsupported()),
                };
                if items.is_empty() {
                    return Err(ParseError::syntax("extension set is empty", value_position));
                }
                let set: BTreeSet<String> = items
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_lowercase())
                    .collect();
                Ok(Predicate::ExtensionIn(set))
            }
        }
    }
}

/// Positions inside a quoted sub-expression are reported relative to the
/// whole compound expression
fn shift_position(err: ParseError, by: usize) -> ParseError {
    match err {
        ParseError::InvalidSyntax { message, position } => ParseError::InvalidSyntax {
            message,
            position: position.map(|p| p + by),
        },
        ParseError::InvalidEscape { sequence, position } => ParseError::InvalidEscape {
            sequence,
            position: position + by,
        },
        ParseError::EmptyExpression => ParseError::EmptyExpression,
    }
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(ms) => Some(*ms as i64),
        Value::String(s) => {
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensitive() -> ParseOptions {
        ParseOptions {
            case_sensitive: true,
        }
    }

    fn compound(raw: &str) -> Vec<Predicate> {
        match parse_with(raw, ExpressionKind::Compound, sensitive()).unwrap() {
            MatchSpec::Compound(spec) => spec.predicates,
            other => panic!("expected compound, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_empty_expression_rejected_for_every_kind() {
        for kind in [ExpressionKind::Glob, ExpressionKind::Regex, ExpressionKind::Compound] {
            assert_eq!(parse("   ", kind).unwrap_err(), ParseError::EmptyExpression);
        }
    }

    #[test]
    fn test_parse_glob_and_regex() {
        let spec = parse_with("*.{ext}", ExpressionKind::Glob, sensitive()).unwrap();
        assert_eq!(spec.kind(), ExpressionKind::Glob);
        assert_eq!(spec.capture_names(), vec!["ext".to_string()]);

        let spec = parse_with(r"^IMG_(?P<num>\d+)\.jpg$", ExpressionKind::Regex, sensitive()).unwrap();
        assert_eq!(spec.capture_names(), vec!["num".to_string()]);
        assert!(!spec.is_catch_all());
        assert!(parse_with(".*", ExpressionKind::Regex, sensitive())
            .unwrap()
            .is_catch_all());
    }

    #[test]
    fn test_invalid_regex() {
        let err = parse("(unclosed", ExpressionKind::Regex).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSyntax { position: None, .. }));
    }

    #[test]
    fn test_compound_predicates() {
        let predicates = compound(
            "name GLOB '*.jpg' AND size >= 10KB && size < 5MB AND ext IN ['JPG', '.jpeg'] \
             AND modified > '2024-01-01' AND modified <= '2024-12-31T23:59:59Z'",
        );
        let kinds: Vec<&str> = predicates.iter().map(Predicate::kind_name).collect();
        assert_eq!(
            kinds,
            vec![
                "name-pattern",
                "min-size",
                "max-size",
                "extension-in-set",
                "modified-after",
                "modified-before"
            ]
        );
        match &predicates[1] {
            Predicate::MinSize { bytes, inclusive } => {
                assert_eq!(*bytes, 10 * 1024);
                assert!(*inclusive);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &predicates[3] {
            Predicate::ExtensionIn(set) => {
                assert!(set.contains("jpg"));
                assert!(set.contains("jpeg"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &predicates[4] {
            Predicate::ModifiedAfter { at_ms, inclusive } => {
                assert_eq!(*at_ms, 1_704_067_200_000);
                assert!(!*inclusive);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compound_errors_carry_positions() {
        let err = parse_with("colour == 'red'", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert_eq!(err, ParseError::syntax("unknown field 'colour'", 0));

        let err = parse_with("size > 10KB name", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert_eq!(err, ParseError::syntax("expected AND", 12));

        let err = parse_with("size >", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert_eq!(err, ParseError::syntax("expected a value", 6));

        let err = parse_with("ext GLOB 'a'", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSyntax { position: Some(4), .. }));

        let err = parse_with("size != 10", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert_eq!(err, ParseError::syntax("negated comparisons are not supported", 5));
    }

    #[test]
    fn test_compound_escapes() {
        let predicates = compound(r"name GLOB 'it\'s*'");
        match &predicates[0] {
            Predicate::NameGlob(glob) => assert!(glob.is_match("it's here")),
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_with(r"name GLOB 'a\n'", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidEscape {
                sequence: r"\n".to_string(),
                position: 12
            }
        );

        // Glob escape errors inside the quoted string point into the whole expression
        let err = parse_with(r"name GLOB 'a\\q'", ExpressionKind::Compound, sensitive()).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidEscape {
                sequence: r"\q".to_string(),
                position: 12
            }
        );
    }

    #[test]
    fn test_compound_catch_all() {
        let spec = parse_with("name GLOB '*'", ExpressionKind::Compound, sensitive()).unwrap();
        assert!(spec.is_catch_all());
        let spec = parse_with("name GLOB '*' AND size > 1KB", ExpressionKind::Compound, sensitive()).unwrap();
        assert!(!spec.is_catch_all());
    }
}
