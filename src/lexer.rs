//! Tokenizer shared by the prefix, infix and postfix front-ends.
//!
//! Lexing is dictionary-driven: operator glyphs are not hardcoded but
//! supplied by the caller (normally [`OperatorDictionary::lexer_glyphs`],
//! which yields punctuation glyphs sorted longest-first so that maximal
//! munch picks `<=>` over `<=` over `<`). Everything else - literals,
//! symbols, brackets, modifiers - has fixed syntax.
//!
//! [`OperatorDictionary::lexer_glyphs`]: crate::operators::OperatorDictionary::lexer_glyphs

use std::fmt;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::char,
    combinator::{opt, recognize},
    error::ErrorKind,
    sequence::pair,
};
use num_bigint::BigInt;

use crate::{Error, ParseError, ParseErrorKind};

/// One lexed token. Numeric literals are unsigned; a leading minus always
/// lexes as the `-` operator and is folded into constants where a
/// construct needs that (pattern literals).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(BigInt),
    Float(f64),
    Str(String),
    Symbol(String),
    /// A symbol immediately followed by `(`: the call-head shorthand.
    /// The bracket itself is left in the stream.
    SymbolWithArgs(String),
    Operator(String),
    LeftBracket(char),
    RightBracket(char),
    Comma,
    /// `#` (quote), `@` (reference) or `$` (interpolate).
    Modifier(char),
    /// `name$argc` or `name$argc,retc`: a symbol carrying explicit
    /// argument/return counts. Only the postfix front-end accepts these.
    ArityName {
        name: String,
        argc: usize,
        retc: Option<usize>,
    },
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Symbol(name) => f.write_str(name),
            Token::SymbolWithArgs(name) => write!(f, "{name}("),
            Token::Operator(glyph) => f.write_str(glyph),
            Token::LeftBracket(c) | Token::RightBracket(c) => write!(f, "{c}"),
            Token::Comma => f.write_str(","),
            Token::Modifier(c) => write!(f, "{c}"),
            Token::ArityName { name, argc, retc } => match retc {
                Some(retc) => write!(f, "{name}${argc},{retc}"),
                None => write!(f, "{name}${argc}"),
            },
        }
    }
}

/// Tokenize a whole source string. `glyphs` is the registered operator
/// glyph set, sorted longest-first; unknown punctuation is a parse error.
pub fn tokenize(source: &str, glyphs: &[String]) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut rest = source.trim_start();
    while !rest.is_empty() {
        let (next, token) =
            lex_token(rest, glyphs).map_err(|e| Error::ParseError(lex_error(source, e)))?;
        tokens.push(token);
        rest = next.trim_start();
    }
    Ok(tokens)
}

/// Convert a nom lexing error into a positioned [`ParseError`].
fn lex_error(source: &str, err: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::Digit | ErrorKind::HexDigit | ErrorKind::Float => {
                    (ParseErrorKind::InvalidLiteral, "malformed number literal")
                }
                ErrorKind::Verify => (
                    ParseErrorKind::InvalidLiteral,
                    "number radix out of range (2-36)",
                ),
                ErrorKind::Char => (
                    ParseErrorKind::Incomplete,
                    "unterminated string literal",
                ),
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidLiteral,
                    "invalid escape sequence in string literal",
                ),
                _ => (ParseErrorKind::InvalidSyntax, "unexpected character"),
            };
            let found = source[offset..].chars().next().map(|c| c.to_string());
            ParseError::with_context_and_found(kind, message, source, offset, found)
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "incomplete input")
        }
    }
}

fn lex_token<'a>(input: &'a str, glyphs: &[String]) -> IResult<&'a str, Token> {
    let Some(first) = input.chars().next() else {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Eof,
        )));
    };
    match first {
        '"' => lex_string(input),
        c if c.is_ascii_digit() => lex_number(input),
        c if c.is_ascii_alphabetic() || c == '_' => lex_symbolish(input),
        '(' | '[' | '{' => Ok((&input[1..], Token::LeftBracket(first))),
        ')' | ']' | '}' => Ok((&input[1..], Token::RightBracket(first))),
        ',' => Ok((&input[1..], Token::Comma)),
        '#' | '@' | '$' => Ok((&input[1..], Token::Modifier(first))),
        _ => lex_operator(input, glyphs),
    }
}

/// Longest-prefix match over the dictionary's glyph set. The list is
/// pre-sorted longest-first, so the first hit is the maximal munch.
fn lex_operator<'a>(input: &'a str, glyphs: &[String]) -> IResult<&'a str, Token> {
    for glyph in glyphs {
        if let Some(rest) = input.strip_prefix(glyph.as_str()) {
            return Ok((rest, Token::Operator(glyph.clone())));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        ErrorKind::Tag,
    )))
}

/// A symbol, possibly carrying a `$argc[,retc]` arity suffix or serving
/// as a call head when `(` follows with no space.
fn lex_symbolish(input: &str) -> IResult<&str, Token> {
    let (rest, name) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)?;
    if let Some(after) = rest.strip_prefix('$') {
        if after.starts_with(|c: char| c.is_ascii_digit()) {
            return lex_arity_suffix(name, after);
        }
    }
    if rest.starts_with('(') {
        return Ok((rest, Token::SymbolWithArgs(name.to_string())));
    }
    Ok((rest, Token::Symbol(name.to_string())))
}

fn lex_arity_suffix<'a>(name: &str, input: &'a str) -> IResult<&'a str, Token> {
    let (mut rest, argc) = lex_count(input)?;
    let mut retc = None;
    if let Some(after) = rest.strip_prefix(',') {
        if after.starts_with(|c: char| c.is_ascii_digit()) {
            let (next, count) = lex_count(after)?;
            retc = Some(count);
            rest = next;
        }
    }
    Ok((
        rest,
        Token::ArityName {
            name: name.to_string(),
            argc,
            retc,
        },
    ))
}

fn lex_count(input: &str) -> IResult<&str, usize> {
    let (rest, digits) = take_while1(|c: char| c.is_ascii_digit()).parse(input)?;
    match digits.parse::<usize>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        ))),
    }
}

/// Numeric literals, most specific form first: `0x`/`0o`/`0b` prefixed
/// integers, `radix#digits` quoted integers, floats, decimal integers.
fn lex_number(input: &str) -> IResult<&str, Token> {
    alt((lex_prefixed_int, lex_radix_int, lex_float, lex_decimal_int)).parse(input)
}

fn lex_prefixed_int(input: &str) -> IResult<&str, Token> {
    let (rest, _) = char('0').parse(input)?;
    let (rest, marker) = alt((
        char('x'),
        char('X'),
        char('o'),
        char('O'),
        char('b'),
        char('B'),
    ))
    .parse(rest)?;
    let radix = match marker.to_ascii_lowercase() {
        'x' => 16,
        'o' => 8,
        _ => 2,
    };
    let (rest, digits) = take_while1(|c: char| c.is_ascii_alphanumeric()).parse(rest)?;
    match BigInt::parse_bytes(digits.as_bytes(), radix) {
        Some(n) => Ok((rest, Token::Int(n))),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        ))),
    }
}

fn lex_radix_int(input: &str) -> IResult<&str, Token> {
    let (rest, radix_digits) = take_while1(|c: char| c.is_ascii_digit()).parse(input)?;
    let (rest, _) = char('#').parse(rest)?;
    let (rest, digits) = take_while1(|c: char| c.is_ascii_alphanumeric()).parse(rest)?;
    let radix = match radix_digits.parse::<u32>() {
        Ok(r) if (2..=36).contains(&r) => r,
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                ErrorKind::Verify,
            )));
        }
    };
    match BigInt::parse_bytes(digits.as_bytes(), radix) {
        Some(n) => Ok((rest, Token::Int(n))),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        ))),
    }
}

/// `digits.digits[exp]` or `digits exp`. A trailing dot with no fraction
/// is not a float; `1.` lexes as the integer 1 followed by `.`.
fn lex_float(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize(pair(
        take_while1(|c: char| c.is_ascii_digit()),
        alt((
            recognize(pair(
                pair(char('.'), take_while1(|c: char| c.is_ascii_digit())),
                opt(exponent),
            )),
            exponent,
        )),
    ))
    .parse(input)?;
    match text.parse::<f64>() {
        Ok(x) => Ok((rest, Token::Float(x))),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::Float,
        ))),
    }
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        pair(alt((char('e'), char('E'))), opt(alt((char('+'), char('-'))))),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)
}

fn lex_decimal_int(input: &str) -> IResult<&str, Token> {
    let (rest, digits) = take_while1(|c: char| c.is_ascii_digit()).parse(input)?;
    match BigInt::parse_bytes(digits.as_bytes(), 10) {
        Some(n) => Ok((rest, Token::Int(n))),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        ))),
    }
}

fn lex_string(input: &str) -> IResult<&str, Token> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();
    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Token::Str(text))),
            Some('\\') => {
                match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            remaining,
                            ErrorKind::Escaped,
                        )));
                    }
                    None => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            remaining,
                            ErrorKind::Char,
                        )));
                    }
                }
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    remaining,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    /// A representative glyph set, longest-first as the dictionary
    /// delivers it.
    fn glyphs() -> Vec<String> {
        ["<=>", "**", "<=", ">=", "==", "&&", "?.", "+", "-", "*", "/", "<", ">", ".", "?", ":"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn lex(source: &str) -> Vec<Token> {
        tokenize(source, &glyphs()).unwrap()
    }

    fn lex_err(source: &str) -> ParseError {
        match tokenize(source, &glyphs()) {
            Err(Error::ParseError(e)) => e,
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    fn int(n: i64) -> Token {
        Token::Int(BigInt::from(n))
    }

    fn sym(name: &str) -> Token {
        Token::Symbol(name.into())
    }

    fn op(glyph: &str) -> Token {
        Token::Operator(glyph.into())
    }

    #[test]
    fn integer_literal_forms() {
        assert_eq!(lex("42"), vec![int(42)]);
        assert_eq!(lex("0x1A"), vec![int(26)]);
        assert_eq!(lex("0o17"), vec![int(15)]);
        assert_eq!(lex("0b101"), vec![int(5)]);
        assert_eq!(lex("16#ff"), vec![int(255)]);
        assert_eq!(lex("36#zz"), vec![int(1295)]);
        assert_eq!(lex("2#1011"), vec![int(11)]);
    }

    #[test]
    fn bad_integer_literals_are_rejected() {
        assert_eq!(lex_err("2#192").kind, ParseErrorKind::InvalidLiteral);
        assert_eq!(lex_err("0xg1").kind, ParseErrorKind::InvalidLiteral);
        let e = lex_err("99#1");
        assert_eq!(e.kind, ParseErrorKind::InvalidLiteral);
        assert!(e.message.contains("radix"));
    }

    #[test]
    fn float_literal_forms() {
        assert_eq!(lex("1.5"), vec![Token::Float(1.5)]);
        assert_eq!(lex("1e3"), vec![Token::Float(1000.0)]);
        assert_eq!(lex("2.5e-1"), vec![Token::Float(0.25)]);
        assert_eq!(lex("7.0E+2"), vec![Token::Float(700.0)]);
    }

    #[test]
    fn trailing_dot_is_not_a_float() {
        assert_eq!(lex("1."), vec![int(1), op(".")]);
        assert_eq!(lex(".5"), vec![op("."), int(5)]);
    }

    #[test]
    fn string_literals_and_escapes() {
        assert_eq!(lex(r#""hello""#), vec![Token::Str("hello".into())]);
        assert_eq!(
            lex(r#""a\nb\t\"c\\""#),
            vec![Token::Str("a\nb\t\"c\\".into())]
        );
        assert_eq!(lex_err(r#""open"#).kind, ParseErrorKind::Incomplete);
        assert_eq!(lex_err(r#""bad\q""#).kind, ParseErrorKind::InvalidLiteral);
    }

    #[test]
    fn symbols_and_call_heads() {
        assert_eq!(lex("foo_1"), vec![sym("foo_1")]);
        assert_eq!(
            lex("f(x)"),
            vec![
                Token::SymbolWithArgs("f".into()),
                Token::LeftBracket('('),
                sym("x"),
                Token::RightBracket(')'),
            ]
        );
        // a space breaks the call-head shorthand
        assert_eq!(
            lex("f (x)"),
            vec![
                sym("f"),
                Token::LeftBracket('('),
                sym("x"),
                Token::RightBracket(')'),
            ]
        );
    }

    #[test]
    fn arity_suffixes() {
        assert_eq!(
            lex("dup$2"),
            vec![Token::ArityName {
                name: "dup".into(),
                argc: 2,
                retc: None,
            }]
        );
        assert_eq!(
            lex("sum$3,1"),
            vec![Token::ArityName {
                name: "sum".into(),
                argc: 3,
                retc: Some(1),
            }]
        );
        // a comma not followed by digits stays a separator
        assert_eq!(
            lex("f$2,x"),
            vec![
                Token::ArityName {
                    name: "f".into(),
                    argc: 2,
                    retc: None,
                },
                Token::Comma,
                sym("x"),
            ]
        );
        // `$` not followed by digits is the interpolation modifier
        assert_eq!(lex("f$x"), vec![sym("f"), Token::Modifier('$'), sym("x")]);
    }

    #[test]
    fn operators_munch_maximally() {
        assert_eq!(lex("a<=>b"), vec![sym("a"), op("<=>"), sym("b")]);
        assert_eq!(lex("1<=2"), vec![int(1), op("<="), int(2)]);
        assert_eq!(lex("2**3"), vec![int(2), op("**"), int(3)]);
        assert_eq!(lex("a?.b"), vec![sym("a"), op("?."), sym("b")]);
        assert_eq!(lex("a ? b"), vec![sym("a"), op("?"), sym("b")]);
    }

    #[test]
    fn modifiers_lex_standalone() {
        assert_eq!(lex("#x"), vec![Token::Modifier('#'), sym("x")]);
        assert_eq!(lex("@+"), vec![Token::Modifier('@'), op("+")]);
        assert_eq!(
            lex(r#"$"hi {x}""#),
            vec![Token::Modifier('$'), Token::Str("hi {x}".into())]
        );
        // `#` after digits is the radix form, after whitespace a quote
        assert_eq!(lex("2 #x"), vec![int(2), Token::Modifier('#'), sym("x")]);
    }

    #[test]
    fn adjacent_literal_and_symbol_stay_separate_tokens() {
        assert_eq!(lex("5I"), vec![int(5), sym("I")]);
        assert_eq!(lex("2 PI"), vec![int(2), sym("PI")]);
    }

    #[test]
    fn brackets_and_commas() {
        assert_eq!(
            lex("[1, 2]"),
            vec![
                Token::LeftBracket('['),
                int(1),
                Token::Comma,
                int(2),
                Token::RightBracket(']'),
            ]
        );
        assert_eq!(
            lex("{1 2}"),
            vec![Token::LeftBracket('{'), int(1), int(2), Token::RightBracket('}')]
        );
    }

    #[test]
    fn full_expression_token_stream() {
        assert_eq!(
            lex("1 + 2 * f(3.5)"),
            vec![
                int(1),
                op("+"),
                int(2),
                op("*"),
                Token::SymbolWithArgs("f".into()),
                Token::LeftBracket('('),
                Token::Float(3.5),
                Token::RightBracket(')'),
            ]
        );
    }

    #[test]
    fn unknown_characters_are_positioned_errors() {
        let e = lex_err("1 + ;");
        assert_eq!(e.kind, ParseErrorKind::InvalidSyntax);
        assert_eq!(e.found.as_deref(), Some(";"));
        assert!(e.context.is_some());
    }

    #[test]
    fn token_display_round_trips_surface_text() {
        assert_eq!(int(42).to_string(), "42");
        assert_eq!(op("<=>").to_string(), "<=>");
        assert_eq!(Token::Str("a\"b".into()).to_string(), "\"a\\\"b\"");
        assert_eq!(
            Token::ArityName {
                name: "f".into(),
                argc: 2,
                retc: Some(1),
            }
            .to_string(),
            "f$2,1"
        );
    }
}
