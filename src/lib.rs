//! CalcXP - Embeddable typed expression engine
//!
//! This crate provides a small calculator/scripting language a host application
//! can embed over a fixed set of value types: arbitrary-precision integers,
//! floats, complex numbers, booleans, strings, symbols, pairs, compiled code,
//! callables, and host-defined composite objects.
//!
//! ## Three notations, one engine
//!
//! The same expression can be written in any of three syntaxes, all compiled
//! to the same linear instruction list and executed against the same frame:
//!
//! ```text
//! infix:    1 + 2 * 3
//! prefix:   (+ 1 (* 2 3))
//! postfix:  1 2 3 * +
//! ```
//!
//! ## Typed dispatch
//!
//! Binary operators resolve through a type domain: a symmetric coercion table
//! widens operands along the numeric tower (bool -> int -> float -> complex),
//! an explicit variant table handles heterogeneous pairs such as
//! `"ab" * 3 == "ababab"`, and a per-operator default handler catches the rest.
//! The resolution order (coerced, then variant, then default, then error) is
//! part of the language's observable semantics.
//!
//! ## Modules
//!
//! - `value`: typed values, pairs, symbols, compiled code
//! - `domain`: the type registry - converters, coercion rules, truthiness
//! - `composite`: capability traits host objects implement
//! - `operators`: operator dictionary and dispatch tables
//! - `lexer`: tokenizer shared by all three front-ends
//! - `parser`: prefix and infix AST front-ends
//! - `postfix`: single-pass postfix compiler
//! - `forms`: special forms (if, let family, lambda, match, delay)
//! - `exec`: instructions, frames, the execution loop
//! - `natives`: declarative native-function binding
//! - `printer`: configurable str/repr rendering
//! - `stdlib`: the built-in constants, functions, and operators
//! - `engine`: the assembled engine a host interacts with

use std::fmt;

/// Maximum parsing depth to prevent stack overflow attacks
/// This limits deeply nested brackets and expressions in all three front-ends
pub const MAX_PARSE_DEPTH: usize = 32;

/// Maximum callable nesting depth during execution
/// Set higher than parse depth to allow recursive user functions room to work
pub const MAX_CALL_DEPTH: usize = 64;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string)
    Incomplete,
    /// A bracket without a matching partner, or mismatched bracket kinds
    UnmatchedBracket,
    /// A numeric or string literal that cannot be turned into a value
    InvalidLiteral,
    /// A marker operator (`=`, `->`, `\`, juxtaposition) used where no
    /// construct consumes it
    MisplacedOperator,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        Self::with_context_and_found(kind, message, input, error_offset, None)
    }

    /// Create a ParseError with context and found token
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Show some context before the error position as well
        let context_start = error_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        // Replace newlines with visible markers for better error display
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Argument-count requirement of a callable or operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// This many arguments or more
    AtLeast(usize),
    /// An inclusive range of argument counts
    Range(usize, usize),
}

impl Arity {
    /// Check whether a concrete argument count satisfies this requirement.
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(lo, hi) => count >= lo && count <= hi,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(lo, hi) => write!(f, "{lo} to {hi}"),
        }
    }
}

/// Error types for the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    TypeError(String),
    ArityError {
        expected: Arity,
        got: usize,
        context: Option<String>,
    },
    ExecutionError(String),
    UnboundSymbol(String),
}

impl Error {
    /// Create an ArityError for an exact expected count without context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected: Arity::Exact(expected),
            got,
            context: None,
        }
    }

    /// Create an ArityError with a named context (function, operator, block)
    pub fn arity_error_in(expected: Arity, got: usize, context: impl Into<String>) -> Self {
        Error::ArityError {
            expected,
            got,
            context: Some(context.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Error::ArityError {
                expected,
                got,
                context,
            } => match context {
                Some(ctx) => write!(
                    f,
                    "ArityError: {ctx}: expected {expected} values, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: expected {expected} arguments but got {got}"
                ),
            },
            Error::ExecutionError(msg) => write!(f, "ExecutionError: {msg}"),
            Error::UnboundSymbol(name) => write!(f, "Unbound symbol: {name}"),
        }
    }
}

pub mod composite;
pub mod domain;
pub mod engine;
pub mod exec;
pub mod forms;
pub mod lexer;
pub mod natives;
pub mod operators;
pub mod parser;
pub mod postfix;
pub mod printer;
pub mod stdlib;
pub mod value;
