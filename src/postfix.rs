//! Postfix front-end.
//!
//! One pass over the token stream, no tree: every token compiles directly
//! to instructions against the open code builder. `{ … }` suspends the
//! current builder and collects the interior into a Code value; the
//! modifiers consume their following token inline. Bare symbols call with
//! unknown counts, so stack effects stay in the writer's hands; the
//! `name$argc,retc` suffix pins them down.

use std::rc::Rc;

use crate::domain::TypeDomain;
use crate::exec::{ExecutableList, Instruction};
use crate::forms::Segment;
use crate::lexer::Token;
use crate::operators::OperatorDictionary;
use crate::parser::{
    check_parse_depth, found_error, incomplete_error, misplaced_error, quote_bracket,
    quote_token, syntax_error, unmatched_error,
};
use crate::printer::PrintCfgHandle;
use crate::value::{Code, Payload};
use crate::{Error, ParseErrorKind};

/// Compile a postfix token stream into an executable list.
pub fn parse_postfix(
    tokens: &[Token],
    domain: &Rc<TypeDomain>,
    ops: &Rc<OperatorDictionary>,
    print_cfg: &PrintCfgHandle,
) -> Result<ExecutableList, Error> {
    let compiler = PostfixCompiler {
        tokens,
        pos: 0,
        domain,
        ops,
        print_cfg,
        out: Vec::new(),
        pending: Vec::new(),
    };
    compiler.run()
}

struct PostfixCompiler<'a> {
    tokens: &'a [Token],
    pos: usize,
    domain: &'a Rc<TypeDomain>,
    ops: &'a Rc<OperatorDictionary>,
    print_cfg: &'a PrintCfgHandle,
    /// Instructions of the innermost open code builder.
    out: Vec<Instruction>,
    /// Builders suspended by an open `{`.
    pending: Vec<Vec<Instruction>>,
}

impl<'a> PostfixCompiler<'a> {
    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn emit(&mut self, instr: Instruction) {
        self.out.push(instr);
    }

    fn run(mut self) -> Result<ExecutableList, Error> {
        while let Some(token) = self.next() {
            self.compile_token(token)?;
        }
        if !self.pending.is_empty() {
            return Err(unmatched_error("missing closing '}'"));
        }
        Ok(ExecutableList::new(self.out))
    }

    fn compile_token(&mut self, token: &Token) -> Result<(), Error> {
        match token {
            Token::Int(n) => self.emit(Instruction::Push(self.domain.int(n.clone()))),
            Token::Float(x) => self.emit(Instruction::Push(self.domain.float(*x))),
            Token::Str(s) => self.emit(Instruction::Push(self.domain.string(s.as_str()))),
            Token::Symbol(name) | Token::SymbolWithArgs(name) => {
                self.emit(Instruction::SymbolCall {
                    name: Rc::from(name.as_str()),
                    argc: None,
                    retc: None,
                });
            }
            Token::ArityName { name, argc, retc } => self.emit(Instruction::SymbolCall {
                name: Rc::from(name.as_str()),
                argc: Some(*argc),
                retc: *retc,
            }),
            Token::Operator(glyph) => self.compile_operator(glyph)?,
            Token::Modifier('#') => self.compile_quote()?,
            Token::Modifier('@') => self.compile_reference()?,
            Token::Modifier('$') => self.compile_interpolation()?,
            Token::LeftBracket('{') => {
                check_parse_depth(self.pending.len())?;
                self.pending.push(std::mem::take(&mut self.out));
            }
            Token::RightBracket('}') => {
                let Some(outer) = self.pending.pop() else {
                    return Err(unmatched_error("'}' without a matching '{'"));
                };
                let inner = std::mem::replace(&mut self.out, outer);
                let code = Rc::new(Code::new(ExecutableList::new(inner)));
                self.emit(Instruction::Push(self.domain.create(Payload::Code(code))));
            }
            Token::LeftBracket(_) | Token::RightBracket(_) => {
                return Err(found_error(
                    ParseErrorKind::InvalidSyntax,
                    "only '{' '}' brackets are available in postfix notation",
                    token,
                ));
            }
            Token::Comma => {}
            Token::Modifier(m) => {
                return Err(syntax_error(format!("unknown modifier '{m}'")));
            }
        }
        Ok(())
    }

    /// Binary form wins for glyphs carrying both; unary-only glyphs apply
    /// the unary form. Markers have no postfix meaning.
    fn compile_operator(&mut self, glyph: &str) -> Result<(), Error> {
        if let Some(op) = self.ops.binary(glyph).cloned() {
            if op.is_marker() {
                return Err(misplaced_error(format!(
                    "operator '{glyph}' cannot be used in postfix notation"
                )));
            }
            self.emit(Instruction::BinaryOp(op));
            return Ok(());
        }
        if let Some(op) = self.ops.unary(glyph).cloned() {
            if op.is_marker() {
                return Err(misplaced_error(format!(
                    "operator '{glyph}' cannot be used in postfix notation"
                )));
            }
            self.emit(Instruction::UnaryOp(op));
            return Ok(());
        }
        Err(syntax_error(format!("unknown operator '{glyph}'")))
    }

    fn compile_quote(&mut self) -> Result<(), Error> {
        match self.next() {
            Some(Token::LeftBracket('(')) => {
                let value = quote_bracket(self.tokens, &mut self.pos, self.domain, 0)?;
                self.emit(Instruction::Push(value));
                Ok(())
            }
            Some(token) => match quote_token(token, self.domain) {
                Some(value) => {
                    self.emit(Instruction::Push(value));
                    Ok(())
                }
                None => Err(found_error(
                    ParseErrorKind::InvalidSyntax,
                    "this token cannot be quoted",
                    token,
                )),
            },
            None => Err(incomplete_error("'#' needs a token to quote")),
        }
    }

    fn compile_reference(&mut self) -> Result<(), Error> {
        match self.next() {
            Some(Token::Symbol(name) | Token::SymbolWithArgs(name)) => {
                self.emit(Instruction::SymbolGet(Rc::from(name.as_str())));
                Ok(())
            }
            Some(Token::Operator(glyph)) => match self.ops.wrap(glyph) {
                Some(wrapped) => {
                    let value = self.domain.callable(Rc::new(wrapped));
                    self.emit(Instruction::Push(value));
                    Ok(())
                }
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

    fn compile_interpolation(&mut self) -> Result<(), Error> {
        match self.next() {
            Some(Token::Str(text)) => {
                let segments = Segment::split(text)?;
                self.emit(Instruction::Interpolate {
                    segments: segments.into(),
                    config: self.print_cfg.clone(),
                });
                Ok(())
            }
            Some(token) => Err(found_error(
                ParseErrorKind::InvalidSyntax,
                "'$' must be followed by a string literal",
                token,
            )),
            None => Err(incomplete_error("'$' must be followed by a string literal")),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use std::cell::RefCell;

    use num_bigint::BigInt;

    use crate::domain::DomainBuilder;
    use crate::exec::{Frame, SymbolMap};
    use crate::lexer::tokenize;
    use crate::operators::{BinaryBuilder, BinaryOperator, OpAssoc, UnaryBuilder};
    use crate::printer::PrintConfig;
    use crate::value::{TypeTag, TypedValue};
    use crate::ParseError;

    fn int_add(a: &BigInt, b: &BigInt) -> BigInt {
        a + b
    }

    fn int_sub(a: &BigInt, b: &BigInt) -> BigInt {
        a - b
    }

    fn int_mul(a: &BigInt, b: &BigInt) -> BigInt {
        a * b
    }

    fn int_neg(n: &BigInt) -> BigInt {
        -n
    }

    struct TestSetup {
        domain: Rc<TypeDomain>,
        ops: Rc<OperatorDictionary>,
        cfg: PrintCfgHandle,
        glyphs: Vec<String>,
    }

    impl TestSetup {
        fn new() -> Self {
            let mut b = DomainBuilder::new();
            for tag in [
                TypeTag::Null,
                TypeTag::Bool,
                TypeTag::Int,
                TypeTag::Str,
                TypeTag::Sym,
                TypeTag::Pair,
                TypeTag::Code,
                TypeTag::Callable,
            ] {
                b.register_type(tag);
            }
            let domain = Rc::new(b.build());

            let mut dict = OperatorDictionary::new();
            dict.register_binary(
                BinaryBuilder::new("+", 150)
                    .coerced::<BigInt, _, _>(int_add)
                    .build(),
            );
            dict.register_binary(
                BinaryBuilder::new("-", 150)
                    .coerced::<BigInt, _, _>(int_sub)
                    .build(),
            );
            dict.register_binary(
                BinaryBuilder::new("*", 160)
                    .coerced::<BigInt, _, _>(int_mul)
                    .build(),
            );
            dict.register_binary(BinaryOperator::marker("=", 10, OpAssoc::Left));
            dict.register_unary(UnaryBuilder::new("-").simple::<BigInt, _, _>(int_neg).build());
            dict.register_unary(UnaryBuilder::new("!").build());
            let ops = Rc::new(dict);

            let glyphs = ops.lexer_glyphs();
            TestSetup {
                domain,
                ops,
                cfg: Rc::new(RefCell::new(PrintConfig::default())),
                glyphs,
            }
        }

        fn compile(&self, source: &str) -> Result<ExecutableList, Error> {
            let tokens = tokenize(source, &self.glyphs)?;
            parse_postfix(&tokens, &self.domain, &self.ops, &self.cfg)
        }

        fn shapes(&self, source: &str) -> Vec<String> {
            self.compile(source)
                .unwrap()
                .instructions()
                .iter()
                .map(describe)
                .collect()
        }

        fn run(&self, source: &str) -> Result<TypedValue, Error> {
            let list = self.compile(source)?;
            let mut frame = Frame::new(self.domain.clone(), SymbolMap::root());
            list.execute(&mut frame)?;
            frame.single_result()
        }

        fn parse_error(&self, source: &str) -> ParseError {
            match self.compile(source) {
                Err(Error::ParseError(e)) => e,
                other => panic!("expected a parse error for {source:?}, got {other:?}"),
            }
        }
    }

    fn describe(instr: &Instruction) -> String {
        match instr {
            Instruction::Push(v) => format!("push {}", v.repr()),
            Instruction::SymbolGet(name) => format!("get {name}"),
            Instruction::SymbolCall { name, argc, .. } => match argc {
                Some(n) => format!("call {name}/{n}"),
                None => format!("call {name}"),
            },
            Instruction::BinaryOp(op) => format!("binop {}", op.glyph()),
            Instruction::UnaryOp(op) => format!("unop {}", op.glyph()),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn literals_and_operators_compile_in_stream_order() {
        let t = TestSetup::new();
        assert_eq!(t.shapes("1 2 +"), ["push 1", "push 2", "binop +"]);
        assert_eq!(
            t.shapes("2 3 * 4 +"),
            ["push 2", "push 3", "binop *", "push 4", "binop +"]
        );
    }

    #[test]
    fn executes_stack_arithmetic() {
        let t = TestSetup::new();
        assert_eq!(t.run("1 2 +").unwrap(), t.domain.int(3));
        assert_eq!(t.run("2 3 * 4 +").unwrap(), t.domain.int(10));
    }

    #[test]
    fn unary_only_glyphs_apply_the_unary_form() {
        let t = TestSetup::new();
        assert_eq!(t.shapes("5 !"), ["push 5", "unop !"]);
        // '-' has a binary form in the dictionary, so it stays binary
        assert_eq!(t.shapes("1 2 -").last().unwrap(), "binop -");
    }

    #[test]
    fn bare_symbols_call_with_unknown_counts() {
        let t = TestSetup::new();
        let list = t.compile("x").unwrap();
        match &list.instructions()[0] {
            Instruction::SymbolCall { name, argc, retc } => {
                assert_eq!(&**name, "x");
                assert_eq!(*argc, None);
                assert_eq!(*retc, None);
            }
            other => panic!("unexpected instruction {other:?}"),
        }
    }

    #[test]
    fn arity_suffixes_pin_the_counts() {
        let t = TestSetup::new();
        let list = t.compile("1 2 sum$2,1").unwrap();
        match &list.instructions()[2] {
            Instruction::SymbolCall { name, argc, retc } => {
                assert_eq!(&**name, "sum");
                assert_eq!(*argc, Some(2));
                assert_eq!(*retc, Some(1));
            }
            other => panic!("unexpected instruction {other:?}"),
        }
        let list = t.compile("roll$3").unwrap();
        match &list.instructions()[0] {
            Instruction::SymbolCall { argc, retc, .. } => {
                assert_eq!(*argc, Some(3));
                assert_eq!(*retc, None);
            }
            other => panic!("unexpected instruction {other:?}"),
        }
    }

    #[test]
    fn code_brackets_nest() {
        let t = TestSetup::new();
        assert_eq!(t.shapes("{1 2 +}"), ["push <code>"]);
        assert_eq!(t.shapes("{{1}}"), ["push <code>"]);
        assert_eq!(t.run("{1 2 +}").unwrap().tag(), TypeTag::Code);
    }

    #[test]
    fn quotes_references_and_interpolation() {
        let t = TestSetup::new();
        assert_eq!(t.shapes("#x 5"), ["push #x", "push 5"]);
        assert_eq!(t.shapes("#(a 1)"), ["push [#a, 1]"]);
        assert_eq!(t.shapes("@x"), ["get x"]);
        assert_eq!(t.shapes("@+"), ["push <callable:+>"]);
        assert_eq!(t.shapes("$\"v={v}\"").len(), 1);
    }

    #[test]
    fn commas_are_ignored() {
        let t = TestSetup::new();
        assert_eq!(t.shapes("1, 2 +"), ["push 1", "push 2", "binop +"]);
    }

    #[test]
    fn markers_and_brackets_are_rejected() {
        let t = TestSetup::new();
        assert_eq!(
            t.parse_error("x 1 =").kind,
            crate::ParseErrorKind::MisplacedOperator
        );
        assert_eq!(
            t.parse_error("(1)").kind,
            crate::ParseErrorKind::InvalidSyntax
        );
        assert_eq!(
            t.parse_error("[1]").kind,
            crate::ParseErrorKind::InvalidSyntax
        );
    }

    #[test]
    fn unbalanced_code_brackets_are_reported() {
        let t = TestSetup::new();
        assert_eq!(
            t.parse_error("{1").kind,
            crate::ParseErrorKind::UnmatchedBracket
        );
        assert_eq!(
            t.parse_error("}").kind,
            crate::ParseErrorKind::UnmatchedBracket
        );
        let deep = "{".repeat(40);
        assert_eq!(
            t.parse_error(&deep).kind,
            crate::ParseErrorKind::TooDeeplyNested
        );
    }
}
