//! Frames, instructions, and the execution loop.
//!
//! Compilation lowers every front-end to one [`ExecutableList`], a flat
//! vector over the closed [`Instruction`] sum. Execution walks the list
//! against a [`Frame`] - a scope handle plus a value stack - pushing and
//! popping values per instruction. There are no jumps: control flow is
//! expressed through [`Code`] values executed by branch instructions,
//! closures, and the shorting builtins.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::domain::TypeDomain;
use crate::forms::{self, LetKind, MatchClause, ParamList, Segment};
use crate::operators::{BinaryOperator, UnaryOperator};
use crate::printer::PrintCfgHandle;
use crate::value::{Code, Payload, TypedValue};
use crate::{Arity, Error, MAX_CALL_DEPTH};

/// One link of the lexical scope chain. Lookup walks toward the root;
/// definition always writes the local table. Interior mutability is what
/// lets `letrec` initializers and global registration see bindings made
/// after a scope handle was captured.
pub struct SymbolMap {
    vars: RefCell<HashMap<Rc<str>, TypedValue>>,
    parent: Option<Rc<SymbolMap>>,
}

impl SymbolMap {
    pub fn root() -> Rc<Self> {
        Rc::new(SymbolMap {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<SymbolMap>) -> Rc<Self> {
        Rc::new(SymbolMap {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    /// Resolve a name through the scope chain.
    pub fn lookup(&self, name: &str) -> Option<TypedValue> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Bind a name in this scope, shadowing any outer binding.
    pub fn define(&self, name: impl Into<Rc<str>>, value: TypedValue) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    /// Whether this scope (not its parents) already binds the name.
    pub fn defines_locally(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// All bindings visible from this scope, innermost shadowing outer.
    pub fn collect_bindings(&self) -> Vec<(String, TypedValue)> {
        let mut seen: HashMap<String, TypedValue> = HashMap::new();
        let mut cursor = Some(self);
        let mut chain: Vec<&SymbolMap> = Vec::new();
        while let Some(scope) = cursor {
            chain.push(scope);
            cursor = scope.parent.as_deref();
        }
        // Outer scopes first so inner definitions overwrite them.
        for scope in chain.into_iter().rev() {
            for (k, v) in scope.vars.borrow().iter() {
                seen.insert(k.to_string(), v.clone());
            }
        }
        let mut out: Vec<_> = seen.into_iter().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// An evaluation scope: symbol table plus value stack. Results of an
/// execution are whatever values the instruction list leaves on the stack.
pub struct Frame {
    domain: Rc<TypeDomain>,
    scope: Rc<SymbolMap>,
    stack: Vec<TypedValue>,
}

impl Frame {
    pub fn new(domain: Rc<TypeDomain>, scope: Rc<SymbolMap>) -> Self {
        Frame {
            domain,
            scope,
            stack: Vec::new(),
        }
    }

    pub fn domain(&self) -> &Rc<TypeDomain> {
        &self.domain
    }

    pub fn scope(&self) -> &Rc<SymbolMap> {
        &self.scope
    }

    pub fn push(&mut self, value: TypedValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<TypedValue, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::ExecutionError("value stack underflow".into()))
    }

    /// Pop the top `n` values, preserving their push order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<TypedValue>, Error> {
        if self.stack.len() < n {
            return Err(Error::ExecutionError(format!(
                "value stack underflow: need {n} values, have {}",
                self.stack.len()
            )));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub fn stack(&self) -> &[TypedValue] {
        &self.stack
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Consume the frame, yielding the values left on its stack.
    pub fn into_results(self) -> Vec<TypedValue> {
        self.stack
    }

    /// Expect exactly one value on the stack and take it.
    pub fn single_result(&mut self) -> Result<TypedValue, Error> {
        if self.stack.len() != 1 {
            return Err(Error::arity_error_in(
                Arity::Exact(1),
                self.stack.len(),
                "execution result",
            ));
        }
        self.pop()
    }
}

/// Anything invocable from the language: native functions, closures,
/// promises, matchers, wrapped operators, callable host objects.
///
/// Arguments arrive on top of `frame`'s stack; implementations pop what
/// they consume and push what they produce. `argc`/`retc` are the
/// statically known argument and result counts - either may be absent
/// (top-level calls, bare postfix symbols), in which case the callable
/// applies its natural arity or fails if it has none.
pub trait Callable {
    /// Name used in error messages and printed forms.
    fn name(&self) -> &str;

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error>;
}

/// Guard recursive execution depth.
pub(crate) fn check_depth(depth: usize) -> Result<(), Error> {
    if depth >= MAX_CALL_DEPTH {
        return Err(Error::ExecutionError(format!(
            "maximum call depth exceeded (limit: {MAX_CALL_DEPTH})"
        )));
    }
    Ok(())
}

/// Validate a produced-value count against a known expectation.
pub(crate) fn validate_returns(
    retc: Option<usize>,
    produced: usize,
    what: &str,
) -> Result<(), Error> {
    match retc {
        Some(expected) if expected != produced => {
            Err(Error::arity_error_in(Arity::Exact(expected), produced, what))
        }
        _ => Ok(()),
    }
}

/// The closed instruction set. Everything any front-end can express
/// lowers to these.
#[derive(Debug)]
pub enum Instruction {
    /// Push a literal value.
    Push(TypedValue),
    /// Push the value bound to a symbol.
    SymbolGet(Rc<str>),
    /// Resolve a symbol and invoke it (or push it, for plain values
    /// invoked without arguments).
    SymbolCall {
        name: Rc<str>,
        argc: Option<usize>,
        retc: Option<usize>,
    },
    /// Pop two operands and apply a binary operator.
    BinaryOp(Rc<BinaryOperator>),
    /// Pop one operand and apply a unary operator.
    UnaryOp(Rc<UnaryOperator>),
    /// Pop a condition and execute one of two bodies by its truthiness.
    Branch {
        then_body: Rc<Code>,
        else_body: Rc<Code>,
    },
    /// Evaluate initializers and run a body in a child scope.
    LetScope {
        kind: LetKind,
        bindings: Rc<[(Rc<str>, Rc<Code>)]>,
        body: Rc<Code>,
    },
    /// Capture the current scope into a closure value.
    MakeClosure {
        params: Rc<ParamList>,
        body: Rc<Code>,
    },
    /// Capture the current scope into a pattern-matching callable.
    MakeMatcher { clauses: Rc<[MatchClause]> },
    /// Capture the current scope into a memoized zero-argument promise.
    MakePromise { body: Rc<Code> },
    /// Build a string from literal text and symbol lookups.
    Interpolate {
        segments: Rc<[Segment]>,
        config: PrintCfgHandle,
    },
}

/// A compiled, linear program.
#[derive(Debug, Default)]
pub struct ExecutableList {
    instrs: Vec<Instruction>,
}

impl ExecutableList {
    pub fn new(instrs: Vec<Instruction>) -> Self {
        ExecutableList { instrs }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }

    /// Run against a frame. Values produced are left on the frame's stack.
    pub fn execute(&self, frame: &mut Frame) -> Result<(), Error> {
        self.execute_at_depth(frame, 0)
    }

    pub(crate) fn execute_at_depth(&self, frame: &mut Frame, depth: usize) -> Result<(), Error> {
        check_depth(depth)?;
        for instr in &self.instrs {
            match instr {
                Instruction::Push(value) => frame.push(value.clone()),
                Instruction::SymbolGet(name) => {
                    let value = frame
                        .scope
                        .lookup(name)
                        .ok_or_else(|| Error::UnboundSymbol(name.to_string()))?;
                    frame.push(value);
                }
                Instruction::SymbolCall { name, argc, retc } => {
                    let value = frame
                        .scope
                        .lookup(name)
                        .ok_or_else(|| Error::UnboundSymbol(name.to_string()))?;
                    invoke_value(&value, frame, *argc, *retc, depth)?;
                }
                Instruction::BinaryOp(op) => {
                    let right = frame.pop()?;
                    let left = frame.pop()?;
                    let result = op.apply(&left, &right)?;
                    frame.push(result);
                }
                Instruction::UnaryOp(op) => {
                    let operand = frame.pop()?;
                    let result = op.apply(&operand)?;
                    frame.push(result);
                }
                Instruction::Branch {
                    then_body,
                    else_body,
                } => {
                    let cond = frame.pop()?;
                    let chosen = if cond.is_truthy()? { then_body } else { else_body };
                    chosen.body().execute_at_depth(frame, depth + 1)?;
                }
                Instruction::LetScope {
                    kind,
                    bindings,
                    body,
                } => forms::execute_let(*kind, bindings, body, frame, depth)?,
                Instruction::MakeClosure { params, body } => {
                    let closure = forms::Closure::capture(params, body, frame);
                    let value = frame.domain.callable(Rc::new(closure));
                    frame.push(value);
                }
                Instruction::MakeMatcher { clauses } => {
                    let matcher = forms::Matcher::capture(clauses, frame);
                    let value = frame.domain.callable(Rc::new(matcher));
                    frame.push(value);
                }
                Instruction::MakePromise { body } => {
                    let promise = forms::Promise::capture(body, frame);
                    let value = frame.domain.callable(Rc::new(promise));
                    frame.push(value);
                }
                Instruction::Interpolate { segments, config } => {
                    let text = forms::interpolate(segments, &config.borrow(), frame)?;
                    let value = frame.domain.string(text);
                    frame.push(value);
                }
            }
        }
        Ok(())
    }
}

/// Invoke a resolved symbol value. Callables dispatch through their own
/// arity handling; plain values invoked with no (or zero) arguments push
/// themselves, which is what makes constants usable as bare symbols.
pub(crate) fn invoke_value(
    value: &TypedValue,
    frame: &mut Frame,
    argc: Option<usize>,
    retc: Option<usize>,
    depth: usize,
) -> Result<(), Error> {
    let callable = match value.payload() {
        Payload::Callable(c) => Some(c.clone()),
        Payload::Object(o) => o.as_callable(),
        _ => None,
    };
    match callable {
        Some(c) => c.call(frame, argc, retc, depth + 1),
        None => match argc {
            None | Some(0) => {
                validate_returns(retc, 1, "value symbol")?;
                frame.push(value.clone());
                Ok(())
            }
            Some(n) => Err(Error::TypeError(format!(
                "{} of type {} is not callable (called with {n} arguments)",
                value.repr(),
                value.tag()
            ))),
        },
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("<code>")
    }
}
