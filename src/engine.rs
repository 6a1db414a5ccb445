//! One-stop interpreter assembly.
//!
//! [`Engine`] wires the stock domain, operator dictionary and global
//! library together behind one shared printer configuration, and exposes
//! compile and eval entry points for the three source syntaxes. The
//! tables are fixed once the engine exists; hosts extend the global scope
//! before evaluating.

use std::cell::RefCell;
use std::rc::Rc;

use crate::domain::TypeDomain;
use crate::exec::{Callable, ExecutableList, Frame, SymbolMap};
use crate::lexer;
use crate::natives::NativeFn;
use crate::operators::OperatorDictionary;
use crate::printer::{self, PrintCfgHandle, PrintConfig};
use crate::value::TypedValue;
use crate::{Error, parser, postfix, stdlib};

/// Which front-end reads the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExprSyntax {
    Prefix,
    Infix,
    Postfix,
}

/// A ready-to-use interpreter over the stock environment.
pub struct Engine {
    domain: Rc<TypeDomain>,
    ops: Rc<OperatorDictionary>,
    globals: Rc<SymbolMap>,
    print_cfg: PrintCfgHandle,
    lexer_glyphs: Vec<String>,
}

impl Engine {
    pub fn new() -> Self {
        let print_cfg: PrintCfgHandle = Rc::new(RefCell::new(PrintConfig::default()));
        let domain = stdlib::build_domain();
        let ops = Rc::new(stdlib::build_operators(&print_cfg));
        let globals = stdlib::build_globals(&domain, &ops, &print_cfg);
        let lexer_glyphs = ops.lexer_glyphs();
        Engine {
            domain,
            ops,
            globals,
            print_cfg,
            lexer_glyphs,
        }
    }

    pub fn domain(&self) -> &Rc<TypeDomain> {
        &self.domain
    }

    pub fn operators(&self) -> &Rc<OperatorDictionary> {
        &self.ops
    }

    /// Compile source text without running it.
    pub fn compile(&self, source: &str, syntax: ExprSyntax) -> Result<ExecutableList, Error> {
        let tokens = lexer::tokenize(source, &self.lexer_glyphs)?;
        match syntax {
            ExprSyntax::Prefix => {
                parser::parse_prefix(&tokens, &self.domain, &self.ops, &self.print_cfg)
            }
            ExprSyntax::Infix => {
                parser::parse_infix(&tokens, &self.domain, &self.ops, &self.print_cfg)
            }
            ExprSyntax::Postfix => {
                postfix::parse_postfix(&tokens, &self.domain, &self.ops, &self.print_cfg)
            }
        }
    }

    /// A fresh frame whose scope chains to the global library. Results of
    /// execution are whatever values the program leaves on its stack.
    pub fn new_frame(&self) -> Frame {
        Frame::new(self.domain.clone(), SymbolMap::child(&self.globals))
    }

    /// Compile and run in a fresh frame, expecting exactly one result.
    pub fn eval(&self, source: &str, syntax: ExprSyntax) -> Result<TypedValue, Error> {
        let compiled = self.compile(source, syntax)?;
        let mut frame = self.new_frame();
        compiled.execute(&mut frame)?;
        frame.single_result()
    }

    pub fn eval_infix(&self, source: &str) -> Result<TypedValue, Error> {
        self.eval(source, ExprSyntax::Infix)
    }

    pub fn eval_prefix(&self, source: &str) -> Result<TypedValue, Error> {
        self.eval(source, ExprSyntax::Prefix)
    }

    pub fn eval_postfix(&self, source: &str) -> Result<TypedValue, Error> {
        self.eval(source, ExprSyntax::Postfix)
    }

    /// Add or replace a global binding. Intended for host setup before
    /// evaluation starts.
    pub fn register_global(&self, name: impl Into<Rc<str>>, value: TypedValue) {
        self.globals.define(name, value);
    }

    /// Register a native function under its own name.
    pub fn register_native(&self, native: NativeFn) {
        let name = native.name().to_owned();
        self.globals
            .define(name, self.domain.callable(Rc::new(native)));
    }

    pub fn print_config(&self) -> PrintConfig {
        self.print_cfg.borrow().clone()
    }

    pub fn set_print_config(&self, cfg: PrintConfig) {
        *self.print_cfg.borrow_mut() = cfg;
    }

    /// Render a value in its re-readable form under the current printer
    /// settings.
    pub fn render(&self, value: &TypedValue) -> String {
        printer::render_repr(value, &self.print_cfg.borrow())
    }

    /// Render a value as display text under the current printer settings.
    pub fn render_str(&self, value: &TypedValue) -> String {
        printer::render_str(value, &self.print_cfg.borrow())
    }

    /// Every binding visible from the global scope, shadowing resolved.
    pub fn global_bindings(&self) -> Vec<(String, TypedValue)> {
        self.globals.collect_bindings()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
