//! Special forms and the callables they compile to.
//!
//! The front-ends recognize `if`, the `let` family, `match`, `delay` and
//! lambda markers at parse time and lower them to dedicated instructions.
//! This module holds both halves: the compiled shapes those instructions
//! carry (parameter lists, binding groups, match clauses, interpolation
//! segments) and the runtime callables that close over the scope active
//! when the instruction executed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::domain::TypeDomain;
use crate::exec::{check_depth, validate_returns, Callable, Frame, SymbolMap};
use crate::printer::{render_str, PrintConfig};
use crate::value::{Code, TypedValue};
use crate::{Arity, Error, ParseError, ParseErrorKind};

/// Evaluation discipline of a `let` binding group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetKind {
    /// All initializers evaluate in the enclosing scope; bindings become
    /// visible together afterwards.
    Parallel,
    /// Each initializer sees the bindings established before it.
    Sequential,
    /// Initializers evaluate inside the new scope itself, so closures may
    /// refer to any sibling defined by the time they are invoked.
    Recursive,
}

/// Parameter shape of a lambda: required names in order, plus an optional
/// rest name that collects surplus arguments into a list.
#[derive(Debug)]
pub struct ParamList {
    pub required: Vec<Rc<str>>,
    pub rest: Option<Rc<str>>,
}

impl ParamList {
    pub fn arity(&self) -> Arity {
        if self.rest.is_some() {
            Arity::AtLeast(self.required.len())
        } else {
            Arity::Exact(self.required.len())
        }
    }
}

/// One `pattern -> body` alternative of a matcher.
#[derive(Debug)]
pub struct MatchClause {
    pub pattern: Pattern,
    pub body: Rc<Code>,
}

/// A destructuring pattern. Binding patterns collect names even when an
/// enclosing pattern later fails; bindings are only installed once the
/// whole clause has matched.
#[derive(Debug)]
pub enum Pattern {
    /// Matches by structural equality with a constant.
    Literal(TypedValue),
    /// `_`: matches anything, binds nothing.
    Wildcard,
    /// A name: matches anything and binds the value to it.
    Bind(Rc<str>),
    /// `head : tail` over a pair.
    Cons(Box<Pattern>, Box<Pattern>),
    /// `[p1, ..., pn]`: a proper list of exactly n elements. The empty
    /// list pattern matches null.
    List(Vec<Pattern>),
}

impl Pattern {
    fn matches(&self, value: &TypedValue, bindings: &mut Vec<(Rc<str>, TypedValue)>) -> bool {
        match self {
            Pattern::Literal(constant) => constant == value,
            Pattern::Wildcard => true,
            Pattern::Bind(name) => {
                bindings.push((name.clone(), value.clone()));
                true
            }
            Pattern::Cons(head, tail) => match value.as_pair() {
                Ok(pair) => {
                    head.matches(&pair.head, bindings) && tail.matches(&pair.tail, bindings)
                }
                Err(_) => false,
            },
            Pattern::List(items) => {
                let Ok(pair) = value.as_pair() else {
                    return items.is_empty() && value.is_null();
                };
                let Ok(elements) = pair.collect_proper("match pattern") else {
                    return false;
                };
                elements.len() == items.len()
                    && items
                        .iter()
                        .zip(&elements)
                        .all(|(pattern, element)| pattern.matches(element, bindings))
            }
        }
    }
}

/// A compiled piece of an interpolated string: literal text, or a symbol
/// whose value is looked up and rendered at execution time.
#[derive(Debug, Clone)]
pub enum Segment {
    Text(String),
    Lookup(Rc<str>),
}

impl Segment {
    /// Split interpolation source into segments. `{name}` becomes a
    /// lookup; `{{` and `}}` escape literal braces.
    pub fn split(text: &str) -> Result<Vec<Segment>, Error> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(Error::ParseError(ParseError::from_message(
                                    ParseErrorKind::Incomplete,
                                    "unterminated '{' in interpolated string",
                                )));
                            }
                        }
                    }
                    if name.is_empty() {
                        return Err(Error::ParseError(ParseError::from_message(
                            ParseErrorKind::InvalidSyntax,
                            "empty placeholder in interpolated string",
                        )));
                    }
                    segments.push(Segment::Lookup(Rc::from(name)));
                }
                '}' => {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(Error::ParseError(ParseError::from_message(
                            ParseErrorKind::InvalidSyntax,
                            "unmatched '}' in interpolated string",
                        )));
                    }
                }
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }
        Ok(segments)
    }
}

/// Render compiled segments against the current scope.
pub(crate) fn interpolate(
    segments: &[Segment],
    cfg: &PrintConfig,
    frame: &Frame,
) -> Result<String, Error> {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Lookup(name) => {
                let value = frame
                    .scope()
                    .lookup(name)
                    .ok_or_else(|| Error::UnboundSymbol(name.to_string()))?;
                out.push_str(&render_str(&value, cfg));
            }
        }
    }
    Ok(out)
}

/// Run a code body in the given scope on a fresh substack and take its
/// single result. `what` names the construct for error messages.
pub(crate) fn eval_single(
    body: &Rc<Code>,
    scope: &Rc<SymbolMap>,
    domain: &Rc<TypeDomain>,
    depth: usize,
    what: &str,
) -> Result<TypedValue, Error> {
    let mut inner = Frame::new(domain.clone(), scope.clone());
    body.body().execute_at_depth(&mut inner, depth + 1)?;
    if inner.stack_len() != 1 {
        return Err(Error::arity_error_in(
            Arity::Exact(1),
            inner.stack_len(),
            what,
        ));
    }
    inner.pop()
}

/// Execute a `let`/`letseq`/`letrec` binding group and its body. Values
/// the body produces are appended to the caller's stack.
pub(crate) fn execute_let(
    kind: LetKind,
    bindings: &[(Rc<str>, Rc<Code>)],
    body: &Rc<Code>,
    frame: &mut Frame,
    depth: usize,
) -> Result<(), Error> {
    check_depth(depth)?;
    let domain = frame.domain().clone();
    let scope = match kind {
        LetKind::Parallel => {
            let mut values = Vec::with_capacity(bindings.len());
            for (name, init) in bindings {
                values.push((name.clone(), eval_single(init, frame.scope(), &domain, depth, name)?));
            }
            let child = SymbolMap::child(frame.scope());
            for (name, value) in values {
                child.define(name, value);
            }
            child
        }
        LetKind::Sequential => {
            let mut scope = frame.scope().clone();
            for (name, init) in bindings {
                let value = eval_single(init, &scope, &domain, depth, name)?;
                let next = SymbolMap::child(&scope);
                next.define(name.clone(), value);
                scope = next;
            }
            scope
        }
        LetKind::Recursive => {
            let child = SymbolMap::child(frame.scope());
            for (name, init) in bindings {
                let value = eval_single(init, &child, &domain, depth, name)?;
                child.define(name.clone(), value);
            }
            child
        }
    };
    let mut inner = Frame::new(domain, scope);
    body.body().execute_at_depth(&mut inner, depth + 1)?;
    for value in inner.into_results() {
        frame.push(value);
    }
    Ok(())
}

/// A lambda bound to the scope it was defined in.
pub struct Closure {
    params: Rc<ParamList>,
    body: Rc<Code>,
    scope: Rc<SymbolMap>,
}

impl Closure {
    pub(crate) fn capture(params: &Rc<ParamList>, body: &Rc<Code>, frame: &Frame) -> Closure {
        Closure {
            params: params.clone(),
            body: body.clone(),
            scope: frame.scope().clone(),
        }
    }
}

impl Callable for Closure {
    fn name(&self) -> &str {
        "<lambda>"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        let arity = self.params.arity();
        let argc = match argc {
            Some(n) => n,
            None => match arity {
                Arity::Exact(n) => n,
                _ => {
                    return Err(Error::ExecutionError(
                        "<lambda>: argument count required for variadic call".into(),
                    ));
                }
            },
        };
        if !arity.accepts(argc) {
            return Err(Error::arity_error_in(arity, argc, "<lambda>"));
        }
        let mut args = frame.pop_n(argc)?;
        let surplus = args.split_off(self.params.required.len());
        let scope = SymbolMap::child(&self.scope);
        for (name, value) in self.params.required.iter().zip(args) {
            scope.define(name.clone(), value);
        }
        if let Some(rest) = &self.params.rest {
            scope.define(rest.clone(), frame.domain().list(surplus));
        }
        let mut inner = Frame::new(frame.domain().clone(), scope);
        self.body.body().execute_at_depth(&mut inner, depth + 1)?;
        validate_returns(retc, inner.stack_len(), "<lambda>")?;
        for value in inner.into_results() {
            frame.push(value);
        }
        Ok(())
    }
}

/// A delayed computation. The first call runs the body in its captured
/// scope and caches the single result; later calls push the cached value
/// without re-running anything.
pub struct Promise {
    body: Rc<Code>,
    scope: Rc<SymbolMap>,
    cache: RefCell<Option<TypedValue>>,
}

impl Promise {
    pub(crate) fn capture(body: &Rc<Code>, frame: &Frame) -> Promise {
        Promise {
            body: body.clone(),
            scope: frame.scope().clone(),
            cache: RefCell::new(None),
        }
    }
}

impl Callable for Promise {
    fn name(&self) -> &str {
        "<promise>"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        if let Some(n) = argc {
            if n != 0 {
                return Err(Error::arity_error_in(Arity::Exact(0), n, "<promise>"));
            }
        }
        let cached = self.cache.borrow().clone();
        let value = match cached {
            Some(value) => value,
            None => {
                let value = eval_single(&self.body, &self.scope, frame.domain(), depth, "<promise>")?;
                self.cache.replace(Some(value.clone()));
                value
            }
        };
        frame.push(value);
        validate_returns(retc, 1, "<promise>")
    }
}

/// A pattern-matching callable of one argument. Clauses are tried in
/// order; the first matching pattern binds its names in a child of the
/// captured scope and runs its body there.
pub struct Matcher {
    clauses: Rc<[MatchClause]>,
    scope: Rc<SymbolMap>,
}

impl Matcher {
    pub(crate) fn capture(clauses: &Rc<[MatchClause]>, frame: &Frame) -> Matcher {
        Matcher {
            clauses: clauses.clone(),
            scope: frame.scope().clone(),
        }
    }
}

impl Callable for Matcher {
    fn name(&self) -> &str {
        "<match>"
    }

    fn call(
        &self,
        frame: &mut Frame,
        argc: Option<usize>,
        retc: Option<usize>,
        depth: usize,
    ) -> Result<(), Error> {
        check_depth(depth)?;
        if let Some(n) = argc {
            if n != 1 {
                return Err(Error::arity_error_in(Arity::Exact(1), n, "<match>"));
            }
        }
        let scrutinee = frame.pop()?;
        for clause in self.clauses.iter() {
            let mut bindings = Vec::new();
            if !clause.pattern.matches(&scrutinee, &mut bindings) {
                continue;
            }
            let scope = SymbolMap::child(&self.scope);
            for (name, value) in bindings {
                scope.define(name, value);
            }
            let mut inner = Frame::new(frame.domain().clone(), scope);
            clause.body.body().execute_at_depth(&mut inner, depth + 1)?;
            validate_returns(retc, inner.stack_len(), "<match>")?;
            for value in inner.into_results() {
                frame.push(value);
            }
            return Ok(());
        }
        Err(Error::ExecutionError(format!(
            "no match for {}",
            scrutinee.repr()
        )))
    }
}
