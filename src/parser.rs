//! Prefix and infix front-ends.
//!
//! Both notations parse into the same closed [`ExprNode`] sum type and
//! share one flattening pass that lowers nodes to instructions. Special
//! forms (`if`, the `let` family, `match`, `delay`) are recognized on call
//! nodes during flattening; marker operators (`=`, `->`, `\`, the
//! juxtaposition markers) must be consumed by the construct that owns them
//! or flattening reports a parse error.

use std::rc::Rc;

use crate::domain::TypeDomain;
use crate::exec::{ExecutableList, Instruction};
use crate::forms::{LetKind, MatchClause, ParamList, Pattern, Segment};
use crate::lexer::Token;
use crate::operators::{BinaryOperator, OpAssoc, OperatorDictionary, UnaryOperator};
use crate::printer::PrintCfgHandle;
use crate::value::{Code, Payload, TypeTag, TypedValue};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Binding strength of unary operators: tighter than any multiplicative
/// operator but looser than `**`, so `-a ** b` negates the whole power
/// while `-a * b` negates only `a`.
const UNARY_PRECEDENCE: u32 = 165;

/// The lazy binary operators and the shorting functions their right
/// operands are routed through as Code thunks.
fn shorting_fn(glyph: &str) -> Option<&'static str> {
    match glyph {
        "&&" => Some("and-then"),
        "||" => Some("or-else"),
        "??" => Some("non-null"),
        _ => None,
    }
}

/// Parse tree shared by the prefix and infix front-ends.
#[derive(Debug)]
pub enum ExprNode {
    /// A literal or quoted value.
    Value(TypedValue),
    /// A bare symbol; flattens to a call with unknown argument count so
    /// plain value bindings push themselves.
    Symbol(String),
    /// `@name`: push the bound value without invoking it.
    SymbolGet(String),
    Call {
        name: String,
        args: Vec<ExprNode>,
    },
    UnaryOp {
        op: Rc<UnaryOperator>,
        operand: Box<ExprNode>,
    },
    BinaryOp {
        op: Rc<BinaryOperator>,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    /// `( … )`: grouping and argument packs. Flattens its items in order,
    /// so a one-element pack is plain grouping.
    ArgPack(Vec<ExprNode>),
    /// `[ … ]`: a list literal in value position, an index in
    /// juxtaposition position, bindings/patterns inside forms.
    SquareList(Vec<ExprNode>),
    /// `{ … }`: the interior compiled to a Code value.
    CodeBlock(Vec<ExprNode>),
    Interpolate(Rc<[Segment]>),
}

/// Compile an infix token stream into an executable list.
pub fn parse_infix(
    tokens: &[Token],
    domain: &Rc<TypeDomain>,
    ops: &Rc<OperatorDictionary>,
    print_cfg: &PrintCfgHandle,
) -> Result<ExecutableList, Error> {
    let mut parser = SourceParser::new(tokens, domain, ops, print_cfg);
    let node = parser.parse_expr(0, 0)?;
    parser.expect_end()?;
    parser.compile_node(node)
}

/// Compile a prefix (s-expression) token stream into an executable list.
pub fn parse_prefix(
    tokens: &[Token],
    domain: &Rc<TypeDomain>,
    ops: &Rc<OperatorDictionary>,
    print_cfg: &PrintCfgHandle,
) -> Result<ExecutableList, Error> {
    let mut parser = SourceParser::new(tokens, domain, ops, print_cfg);
    let node = parser.parse_sexpr(0)?;
    parser.expect_end()?;
    parser.compile_node(node)
}

pub(crate) fn check_parse_depth(depth: usize) -> Result<(), Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::TooDeeplyNested,
            format!("expression nesting exceeds {MAX_PARSE_DEPTH} levels"),
        )));
    }
    Ok(())
}

/// Quote a single token into a value: literals stay values, symbols and
/// operator glyphs become symbol values. Structural tokens cannot be
/// quoted.
pub(crate) fn quote_token(token: &Token, domain: &Rc<TypeDomain>) -> Option<TypedValue> {
    match token {
        Token::Int(n) => Some(domain.int(n.clone())),
        Token::Float(x) => Some(domain.float(*x)),
        Token::Str(s) => Some(domain.string(s.as_str())),
        Token::Symbol(name) | Token::SymbolWithArgs(name) => Some(domain.sym(name)),
        Token::Operator(glyph) => Some(domain.sym(glyph)),
        _ => None,
    }
}

pub(crate) fn syntax_error(message: impl Into<String>) -> Error {
    Error::ParseError(ParseError::from_message(
        ParseErrorKind::InvalidSyntax,
        message,
    ))
}

pub(crate) fn found_error(kind: ParseErrorKind, message: impl Into<String>, token: &Token) -> Error {
    Error::ParseError(ParseError::new(
        kind,
        message,
        None,
        Some(token.to_string()),
    ))
}

pub(crate) fn incomplete_error(message: impl Into<String>) -> Error {
    Error::ParseError(ParseError::from_message(
        ParseErrorKind::Incomplete,
        message,
    ))
}

pub(crate) fn misplaced_error(message: impl Into<String>) -> Error {
    Error::ParseError(ParseError::from_message(
        ParseErrorKind::MisplacedOperator,
        message,
    ))
}

pub(crate) fn unmatched_error(message: impl Into<String>) -> Error {
    Error::ParseError(ParseError::from_message(
        ParseErrorKind::UnmatchedBracket,
        message,
    ))
}

/// Quote the interior of an already-opened `#( … )` bracket into a nested
/// list value, advancing `pos` past the closing paren. Commas are ignored,
/// nested parens recurse, everything else quotes as a single token.
pub(crate) fn quote_bracket(
    tokens: &[Token],
    pos: &mut usize,
    domain: &Rc<TypeDomain>,
    depth: usize,
) -> Result<TypedValue, Error> {
    check_parse_depth(depth)?;
    let mut items = Vec::new();
    loop {
        let token = tokens.get(*pos);
        *pos += 1;
        match token {
            Some(Token::RightBracket(')')) => return Ok(domain.list(items)),
            Some(Token::LeftBracket('(')) => {
                items.push(quote_bracket(tokens, pos, domain, depth + 1)?)
            }
            Some(Token::Comma) => {}
            Some(token) => match quote_token(token, domain) {
                Some(value) => items.push(value),
                None => {
                    return Err(found_error(
                        ParseErrorKind::InvalidSyntax,
                        "this token cannot be quoted",
                        token,
                    ));
                }
            },
            None => return Err(unmatched_error("missing closing ')' in quoted list")),
        }
    }
}

fn param_error() -> Error {
    syntax_error("lambda parameters must be symbols, with an optional trailing '\\rest'")
}

/// Does this token begin an operand? Drives juxtaposition detection.
fn starts_operand(token: &Token) -> bool {
    matches!(
        token,
        Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Symbol(_)
            | Token::SymbolWithArgs(_)
            | Token::LeftBracket(_)
            | Token::Modifier(_)
    )
}

fn is_numeric_literal(node: &ExprNode) -> bool {
    matches!(node, ExprNode::Value(v) if matches!(v.tag(), TypeTag::Int | TypeTag::Float))
}

struct SourceParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    domain: &'a Rc<TypeDomain>,
    ops: &'a Rc<OperatorDictionary>,
    print_cfg: &'a PrintCfgHandle,
}

impl<'a> SourceParser<'a> {
    fn new(
        tokens: &'a [Token],
        domain: &'a Rc<TypeDomain>,
        ops: &'a Rc<OperatorDictionary>,
        print_cfg: &'a PrintCfgHandle,
    ) -> Self {
        SourceParser {
            tokens,
            pos: 0,
            domain,
            ops,
            print_cfg,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<(), Error> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(found_error(
                ParseErrorKind::TrailingContent,
                "unexpected input after a complete expression",
                token,
            )),
        }
    }

    // ---- infix ----

    /// Precedence climbing over the dictionary's binary operators, with
    /// juxtaposition inserted wherever two operands sit side by side.
    fn parse_expr(&mut self, min_prec: u32, depth: usize) -> Result<ExprNode, Error> {
        check_parse_depth(depth)?;
        let mut left = self.parse_unary(depth)?;
        loop {
            match self.peek() {
                Some(Token::Operator(glyph)) => {
                    let Some(op) = self.ops.binary(glyph).cloned() else {
                        break;
                    };
                    if op.precedence() < min_prec {
                        break;
                    }
                    self.pos += 1;
                    let next_min = match op.assoc() {
                        OpAssoc::Left => op.precedence() + 1,
                        OpAssoc::Right => op.precedence(),
                    };
                    let right = self.parse_expr(next_min, depth + 1)?;
                    left = self.combine_binary(&op, left, right)?;
                }
                Some(token) if starts_operand(token) => {
                    let Some(prec) = self.ops.default_binary().map(|op| op.precedence()) else {
                        break;
                    };
                    if prec < min_prec {
                        break;
                    }
                    let right = self.parse_expr(prec + 1, depth + 1)?;
                    left = self.make_juxtaposition(left, right, false)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self, depth: usize) -> Result<ExprNode, Error> {
        check_parse_depth(depth)?;
        if let Some(Token::Operator(glyph)) = self.peek() {
            let Some(op) = self.ops.unary(glyph).cloned() else {
                return Err(syntax_error(format!(
                    "expected an expression, found operator '{glyph}'"
                )));
            };
            self.pos += 1;
            let operand = self.parse_expr(UNARY_PRECEDENCE, depth + 1)?;
            return Ok(ExprNode::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> Result<ExprNode, Error> {
        check_parse_depth(depth)?;
        let Some(token) = self.next() else {
            return Err(incomplete_error("unexpected end of input"));
        };
        match token {
            Token::Int(n) => Ok(ExprNode::Value(self.domain.int(n.clone()))),
            Token::Float(x) => Ok(ExprNode::Value(self.domain.float(*x))),
            Token::Str(s) => Ok(ExprNode::Value(self.domain.string(s.as_str()))),
            Token::Symbol(name) => Ok(ExprNode::Symbol(name.clone())),
            Token::SymbolWithArgs(name) => {
                self.expect_left('(')?;
                let args = self.parse_list_items(')', depth)?;
                Ok(ExprNode::Call {
                    name: name.clone(),
                    args,
                })
            }
            Token::LeftBracket('(') => Ok(ExprNode::ArgPack(self.parse_list_items(')', depth)?)),
            Token::LeftBracket('[') => {
                Ok(ExprNode::SquareList(self.parse_list_items(']', depth)?))
            }
            Token::LeftBracket('{') => Ok(ExprNode::CodeBlock(self.parse_list_items('}', depth)?)),
            Token::Modifier('#') => self.parse_quote(depth),
            Token::Modifier('@') => self.parse_reference(),
            Token::Modifier('$') => self.parse_interpolation(),
            Token::ArityName { .. } => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "arity suffixes are only available in postfix notation",
                token,
            )),
            _ => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "expected an expression",
                token,
            )),
        }
    }

    /// Comma-separated expressions up to the closing bracket.
    fn parse_list_items(&mut self, close: char, depth: usize) -> Result<Vec<ExprNode>, Error> {
        let mut items = Vec::new();
        if matches!(self.peek(), Some(Token::RightBracket(c)) if *c == close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr(0, depth + 1)?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RightBracket(c)) if *c == close => break,
                Some(token) => {
                    return Err(found_error(
                        ParseErrorKind::UnmatchedBracket,
                        format!("expected ',' or '{close}'"),
                        token,
                    ));
                }
                None => return Err(unmatched_error(format!("missing closing '{close}'"))),
            }
        }
        Ok(items)
    }

    fn expect_left(&mut self, bracket: char) -> Result<(), Error> {
        match self.next() {
            Some(Token::LeftBracket(c)) if *c == bracket => Ok(()),
            Some(token) => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                format!("expected '{bracket}'"),
                token,
            )),
            None => Err(incomplete_error(format!("expected '{bracket}'"))),
        }
    }

    // ---- prefix ----

    fn parse_sexpr(&mut self, depth: usize) -> Result<ExprNode, Error> {
        check_parse_depth(depth)?;
        let Some(token) = self.next() else {
            return Err(incomplete_error("unexpected end of input"));
        };
        match token {
            Token::LeftBracket('(') => self.parse_sexpr_call(depth),
            Token::Int(n) => Ok(ExprNode::Value(self.domain.int(n.clone()))),
            Token::Float(x) => Ok(ExprNode::Value(self.domain.float(*x))),
            Token::Str(s) => Ok(ExprNode::Value(self.domain.string(s.as_str()))),
            Token::Symbol(name) => Ok(ExprNode::Symbol(name.clone())),
            Token::SymbolWithArgs(name) => {
                self.expect_left('(')?;
                let args = self.parse_sexpr_items(')', depth)?;
                Ok(ExprNode::Call {
                    name: name.clone(),
                    args,
                })
            }
            Token::LeftBracket('[') => {
                Ok(ExprNode::SquareList(self.parse_sexpr_items(']', depth)?))
            }
            Token::LeftBracket('{') => Ok(ExprNode::CodeBlock(self.parse_sexpr_items('}', depth)?)),
            Token::Modifier('#') => self.parse_quote(depth),
            Token::Modifier('@') => self.parse_reference(),
            Token::Modifier('$') => self.parse_interpolation(),
            Token::Operator(glyph) => {
                // an operator outside head position applies its unary form
                let Some(op) = self.ops.unary(glyph).cloned() else {
                    return Err(syntax_error(format!(
                        "operator '{glyph}' cannot start an expression"
                    )));
                };
                let operand = self.parse_sexpr(depth + 1)?;
                Ok(ExprNode::UnaryOp {
                    op,
                    operand: Box::new(operand),
                })
            }
            Token::ArityName { .. } => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "arity suffixes are only available in postfix notation",
                token,
            )),
            _ => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "expected an expression",
                token,
            )),
        }
    }

    /// The interior of `( … )`: an operator head folds its arguments, a
    /// symbol head is a call, anything else is a computed head applied
    /// through `apply`.
    fn parse_sexpr_call(&mut self, depth: usize) -> Result<ExprNode, Error> {
        match self.peek() {
            Some(Token::RightBracket(')')) => {
                self.pos += 1;
                Ok(ExprNode::ArgPack(Vec::new()))
            }
            Some(Token::Operator(glyph)) => {
                self.pos += 1;
                let args = self.parse_sexpr_items(')', depth)?;
                self.fold_operator(glyph, args)
            }
            Some(Token::Symbol(name)) => {
                self.pos += 1;
                let args = self.parse_sexpr_items(')', depth)?;
                Ok(ExprNode::Call {
                    name: name.clone(),
                    args,
                })
            }
            _ => {
                let head = self.parse_sexpr(depth + 1)?;
                let rest = self.parse_sexpr_items(')', depth)?;
                let mut args = Vec::with_capacity(rest.len() + 1);
                args.push(head);
                args.extend(rest);
                Ok(ExprNode::Call {
                    name: "apply".into(),
                    args,
                })
            }
        }
    }

    /// Whitespace-separated prefix items up to the closing bracket;
    /// commas are permitted separators and otherwise ignored.
    fn parse_sexpr_items(&mut self, close: char, depth: usize) -> Result<Vec<ExprNode>, Error> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RightBracket(c)) if *c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(Token::Comma) => {
                    self.pos += 1;
                }
                Some(_) => items.push(self.parse_sexpr(depth + 1)?),
                None => return Err(unmatched_error(format!("missing closing '{close}'"))),
            }
        }
    }

    /// Fold `(op a b c …)` through the operator: left-associative
    /// operators fold `((a op b) op c)`, right-associative ones
    /// `(a op (b op c))`; a single argument applies the unary form.
    fn fold_operator(&self, glyph: &str, mut args: Vec<ExprNode>) -> Result<ExprNode, Error> {
        if args.is_empty() {
            return Err(syntax_error(format!(
                "operator '{glyph}' needs at least one argument"
            )));
        }
        if args.len() == 1 {
            let Some(op) = self.ops.unary(glyph).cloned() else {
                return Err(syntax_error(format!("operator '{glyph}' has no unary form")));
            };
            let operand = args.remove(0);
            return Ok(ExprNode::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        let Some(op) = self.ops.binary(glyph).cloned() else {
            return Err(syntax_error(format!("operator '{glyph}' has no binary form")));
        };
        match op.assoc() {
            OpAssoc::Left => {
                let mut iter = args.into_iter();
                let mut acc = iter.next().ok_or_else(|| syntax_error("empty operator form"))?;
                for arg in iter {
                    acc = self.combine_binary(&op, acc, arg)?;
                }
                Ok(acc)
            }
            OpAssoc::Right => {
                let mut iter = args.into_iter().rev();
                let mut acc = iter.next().ok_or_else(|| syntax_error("empty operator form"))?;
                for arg in iter {
                    acc = self.combine_binary(&op, arg, acc)?;
                }
                Ok(acc)
            }
        }
    }

    // ---- shared construction ----

    /// Build a binary node, routing the juxtaposition markers to their
    /// rewrite and turning the right side of member access into a symbol
    /// value.
    fn combine_binary(
        &self,
        op: &Rc<BinaryOperator>,
        left: ExprNode,
        right: ExprNode,
    ) -> Result<ExprNode, Error> {
        if let Some(default_op) = self.ops.default_binary() {
            if Rc::ptr_eq(op, default_op) {
                return self.make_juxtaposition(left, right, false);
            }
        }
        if op.is_marker() && op.glyph() == "?" {
            return self.make_juxtaposition(left, right, true);
        }
        let right = if matches!(op.glyph(), "." | "?.") {
            match right {
                ExprNode::Symbol(name) => ExprNode::Value(self.domain.sym(&name)),
                other => other,
            }
        } else {
            right
        };
        Ok(ExprNode::BinaryOp {
            op: op.clone(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Adjacent operands with no operator between them. A bracketed list
    /// on the right is an index, an argument pack after a non-numeric
    /// left side is function application, anything else is implicit
    /// multiplication (which the null-aware form rejects).
    fn make_juxtaposition(
        &self,
        left: ExprNode,
        right: ExprNode,
        null_aware: bool,
    ) -> Result<ExprNode, Error> {
        match right {
            ExprNode::SquareList(items) => {
                if items.len() != 1 {
                    return Err(syntax_error("index brackets take exactly one expression"));
                }
                let name = if null_aware { "slice?" } else { "slice" };
                let mut args = Vec::with_capacity(2);
                args.push(left);
                args.extend(items);
                Ok(ExprNode::Call {
                    name: name.into(),
                    args,
                })
            }
            ExprNode::ArgPack(items) if !is_numeric_literal(&left) => {
                let name = if null_aware { "apply?" } else { "apply" };
                let mut args = Vec::with_capacity(items.len() + 1);
                args.push(left);
                args.extend(items);
                Ok(ExprNode::Call {
                    name: name.into(),
                    args,
                })
            }
            right => {
                if null_aware {
                    return Err(misplaced_error(
                        "'?' requires an index or argument pack on its right side",
                    ));
                }
                let Some(mul) = self.ops.binary("*").cloned() else {
                    return Err(misplaced_error(
                        "adjacent expressions need an operator between them",
                    ));
                };
                Ok(ExprNode::BinaryOp {
                    op: mul,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }

    fn parse_quote(&mut self, depth: usize) -> Result<ExprNode, Error> {
        check_parse_depth(depth)?;
        match self.next() {
            Some(Token::LeftBracket('(')) => Ok(ExprNode::Value(self.quote_list(depth)?)),
            Some(token) => match quote_token(token, self.domain) {
                Some(value) => Ok(ExprNode::Value(value)),
                None => Err(found_error(
                    ParseErrorKind::InvalidSyntax,
                    "this token cannot be quoted",
                    token,
                )),
            },
            None => Err(incomplete_error("'#' needs a token to quote")),
        }
    }

    fn quote_list(&mut self, depth: usize) -> Result<TypedValue, Error> {
        quote_bracket(self.tokens, &mut self.pos, self.domain, depth)
    }

    fn parse_reference(&mut self) -> Result<ExprNode, Error> {
        match self.next() {
            Some(Token::Symbol(name) | Token::SymbolWithArgs(name)) => {
                Ok(ExprNode::SymbolGet(name.clone()))
            }
            Some(Token::Operator(glyph)) => match self.ops.wrap(glyph) {
                Some(wrapped) => Ok(ExprNode::Value(self.domain.callable(Rc::new(wrapped)))),
                None => Err(syntax_error(format!("unknown operator '{glyph}'"))),
            },
            Some(token) => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "'@' needs a symbol or operator to reference",
                token,
            )),
            None => Err(incomplete_error("'@' needs a symbol or operator to reference")),
        }
    }

    fn parse_interpolation(&mut self) -> Result<ExprNode, Error> {
        match self.next() {
            Some(Token::Str(text)) => {
                let segments = Segment::split(text)?;
                Ok(ExprNode::Interpolate(segments.into()))
            }
            Some(token) => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "'$' must be followed by a string literal",
                token,
            )),
            None => Err(incomplete_error("'$' must be followed by a string literal")),
        }
    }

    // ---- flattening ----

    fn compile_node(&self, node: ExprNode) -> Result<ExecutableList, Error> {
        let mut instrs = Vec::new();
        self.flatten(node, &mut instrs)?;
        Ok(ExecutableList::new(instrs))
    }

    fn code_rc(&self, node: ExprNode) -> Result<Rc<Code>, Error> {
        let mut instrs = Vec::new();
        self.flatten(node, &mut instrs)?;
        Ok(Rc::new(Code::new(ExecutableList::new(instrs))))
    }

    fn flatten(&self, node: ExprNode, out: &mut Vec<Instruction>) -> Result<(), Error> {
        match node {
            ExprNode::Value(value) => out.push(Instruction::Push(value)),
            ExprNode::Symbol(name) => out.push(Instruction::SymbolCall {
                name: Rc::from(name),
                argc: None,
                retc: Some(1),
            }),
            ExprNode::SymbolGet(name) => out.push(Instruction::SymbolGet(Rc::from(name))),
            ExprNode::Call { name, args } => self.flatten_call(name, args, out)?,
            ExprNode::UnaryOp { op, operand } => {
                if op.is_marker() {
                    return Err(misplaced_error(format!(
                        "operator '{}' cannot be used in this context",
                        op.glyph()
                    )));
                }
                self.flatten(*operand, out)?;
                out.push(Instruction::UnaryOp(op));
            }
            ExprNode::BinaryOp { op, left, right } => {
                if let Some(name) = shorting_fn(op.glyph()) {
                    self.flatten(*left, out)?;
                    let thunk = self.code_rc(*right)?;
                    out.push(Instruction::Push(self.domain.create(Payload::Code(thunk))));
                    out.push(Instruction::SymbolCall {
                        name: Rc::from(name),
                        argc: Some(2),
                        retc: Some(1),
                    });
                } else if op.is_marker() {
                    return match op.glyph() {
                        "->" => {
                            let params = self.compile_params(*left)?;
                            let body = self.code_rc(*right)?;
                            out.push(Instruction::MakeClosure {
                                params: Rc::new(params),
                                body,
                            });
                            Ok(())
                        }
                        "=" => Err(misplaced_error(
                            "operator '=' can only appear in binding lists",
                        )),
                        other => Err(misplaced_error(format!(
                            "operator '{other}' cannot be used in this context"
                        ))),
                    };
                } else {
                    self.flatten(*left, out)?;
                    self.flatten(*right, out)?;
                    out.push(Instruction::BinaryOp(op));
                }
            }
            ExprNode::ArgPack(items) => {
                for item in items {
                    self.flatten(item, out)?;
                }
            }
            ExprNode::SquareList(items) => {
                let argc = items.len();
                for item in items {
                    self.flatten(item, out)?;
                }
                out.push(Instruction::SymbolCall {
                    name: Rc::from("list"),
                    argc: Some(argc),
                    retc: Some(1),
                });
            }
            ExprNode::CodeBlock(items) => {
                let mut instrs = Vec::new();
                for item in items {
                    self.flatten(item, &mut instrs)?;
                }
                let code = Rc::new(Code::new(ExecutableList::new(instrs)));
                out.push(Instruction::Push(self.domain.create(Payload::Code(code))));
            }
            ExprNode::Interpolate(segments) => out.push(Instruction::Interpolate {
                segments,
                config: self.print_cfg.clone(),
            }),
        }
        Ok(())
    }

    /// Calls with a form head compile to their dedicated instructions;
    /// everything else is a plain symbol call with known argument count.
    fn flatten_call(
        &self,
        name: String,
        args: Vec<ExprNode>,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Error> {
        match name.as_str() {
            "if" => {
                let Ok([cond, then_arm, else_arm]) = <[ExprNode; 3]>::try_from(args) else {
                    return Err(syntax_error("if requires a condition and two branches"));
                };
                self.flatten(cond, out)?;
                out.push(Instruction::Branch {
                    then_body: self.code_rc(then_arm)?,
                    else_body: self.code_rc(else_arm)?,
                });
                Ok(())
            }
            "let" => self.flatten_let(LetKind::Parallel, args, out),
            "letseq" => self.flatten_let(LetKind::Sequential, args, out),
            "letrec" => self.flatten_let(LetKind::Recursive, args, out),
            "match" => {
                let mut clauses = Vec::new();
                for arg in args {
                    self.collect_clauses(arg, &mut clauses)?;
                }
                if clauses.is_empty() {
                    return Err(syntax_error(
                        "match requires at least one 'pattern -> body' clause",
                    ));
                }
                out.push(Instruction::MakeMatcher {
                    clauses: clauses.into(),
                });
                Ok(())
            }
            "delay" => {
                let Ok([body]) = <[ExprNode; 1]>::try_from(args) else {
                    return Err(syntax_error("delay takes exactly one expression"));
                };
                out.push(Instruction::MakePromise {
                    body: self.code_rc(body)?,
                });
                Ok(())
            }
            _ => {
                let argc = args.len();
                for arg in args {
                    self.flatten(arg, out)?;
                }
                out.push(Instruction::SymbolCall {
                    name: Rc::from(name),
                    argc: Some(argc),
                    retc: Some(1),
                });
                Ok(())
            }
        }
    }

    fn flatten_let(
        &self,
        kind: LetKind,
        args: Vec<ExprNode>,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Error> {
        let Ok([bindings_node, body]) = <[ExprNode; 2]>::try_from(args) else {
            return Err(syntax_error("let requires a binding list and a body"));
        };
        let ExprNode::SquareList(entries) = bindings_node else {
            return Err(syntax_error("let bindings must be written in square brackets"));
        };
        let mut bindings = Vec::with_capacity(entries.len());
        for entry in entries {
            let ExprNode::BinaryOp { op, left, right } = entry else {
                return Err(syntax_error("let bindings must look like 'name = expression'"));
            };
            if !matches!(op.glyph(), "=" | ":") {
                return Err(syntax_error("let bindings must look like 'name = expression'"));
            }
            let ExprNode::Symbol(name) = *left else {
                return Err(syntax_error("binding names must be plain symbols"));
            };
            bindings.push((Rc::from(name), self.code_rc(*right)?));
        }
        out.push(Instruction::LetScope {
            kind,
            bindings: bindings.into(),
            body: self.code_rc(body)?,
        });
        Ok(())
    }

    /// `\` chains contribute every clause they join; each leaf must be a
    /// `pattern -> body` arrow.
    fn collect_clauses(
        &self,
        node: ExprNode,
        clauses: &mut Vec<MatchClause>,
    ) -> Result<(), Error> {
        match node {
            ExprNode::BinaryOp { op, left, right } if op.glyph() == "\\" => {
                self.collect_clauses(*left, clauses)?;
                self.collect_clauses(*right, clauses)
            }
            ExprNode::BinaryOp { op, left, right } if op.glyph() == "->" => {
                clauses.push(MatchClause {
                    pattern: self.compile_pattern(*left)?,
                    body: self.code_rc(*right)?,
                });
                Ok(())
            }
            _ => Err(syntax_error("match clauses must look like 'pattern -> body'")),
        }
    }

    fn compile_pattern(&self, node: ExprNode) -> Result<Pattern, Error> {
        match node {
            ExprNode::Value(value) => Ok(Pattern::Literal(value)),
            ExprNode::Symbol(name) if name == "_" => Ok(Pattern::Wildcard),
            ExprNode::Symbol(name) => Ok(Pattern::Bind(Rc::from(name))),
            ExprNode::UnaryOp { op, operand } if op.glyph() == "-" => {
                let ExprNode::Value(value) = *operand else {
                    return Err(syntax_error("patterns must be built from constants"));
                };
                match op.apply(&value) {
                    Ok(folded) => Ok(Pattern::Literal(folded)),
                    Err(_) => Err(syntax_error("patterns must be built from constants")),
                }
            }
            ExprNode::BinaryOp { op, left, right } if op.glyph() == ":" => Ok(Pattern::Cons(
                Box::new(self.compile_pattern(*left)?),
                Box::new(self.compile_pattern(*right)?),
            )),
            ExprNode::SquareList(items) => {
                let mut patterns = Vec::with_capacity(items.len());
                for item in items {
                    patterns.push(self.compile_pattern(item)?);
                }
                Ok(Pattern::List(patterns))
            }
            _ => Err(syntax_error("unsupported pattern")),
        }
    }

    /// Lambda parameters: a bare symbol, `\rest` alone, or a pack/list of
    /// symbols whose last entry may be `\rest` (or `name \ rest`).
    fn compile_params(&self, node: ExprNode) -> Result<ParamList, Error> {
        match node {
            ExprNode::Symbol(name) => Ok(ParamList {
                required: vec![Rc::from(name)],
                rest: None,
            }),
            ExprNode::UnaryOp { op, operand } if op.glyph() == "\\" => {
                let ExprNode::Symbol(name) = *operand else {
                    return Err(param_error());
                };
                Ok(ParamList {
                    required: Vec::new(),
                    rest: Some(Rc::from(name)),
                })
            }
            ExprNode::ArgPack(items) | ExprNode::SquareList(items) => {
                let mut required = Vec::new();
                let mut rest = None;
                for item in items {
                    if rest.is_some() {
                        return Err(syntax_error("the rest parameter must come last"));
                    }
                    match item {
                        ExprNode::Symbol(name) => required.push(Rc::from(name)),
                        ExprNode::UnaryOp { op, operand } if op.glyph() == "\\" => {
                            let ExprNode::Symbol(name) = *operand else {
                                return Err(param_error());
                            };
                            rest = Some(Rc::from(name));
                        }
                        ExprNode::BinaryOp { op, left, right } if op.glyph() == "\\" => {
                            let ExprNode::Symbol(req) = *left else {
                                return Err(param_error());
                            };
                            let ExprNode::Symbol(rest_name) = *right else {
                                return Err(param_error());
                            };
                            required.push(Rc::from(req));
                            rest = Some(Rc::from(rest_name));
                        }
                        _ => return Err(param_error()),
                    }
                }
                Ok(ParamList { required, rest })
            }
            _ => Err(param_error()),
        }
    }
}
