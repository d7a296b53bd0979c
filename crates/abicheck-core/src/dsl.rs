//! The compatibility DSL (§4.7): a closed, hand-written expression language
//! for `expected.py`-shaped predicate scripts. Not a general-purpose
//! language subset — no loops, no assignment, no function definitions beyond
//! the bindings the engine supplies.
//!
//! A predicate is a sequence of top-level statements, each either an
//! `if`/`elif`/`else` block or a bare `raise ExpectFailure(...)`/`raise
//! SkipBuild(...)` call. Conditions compare `v(major, minor)` calls and
//! bound identifiers (`compile_version`, `exec_version`, ...), test feature-set
//! membership (`'t' in compile_features`), and combine with `and`/`or`/`not`/`^`.

use std::collections::HashSet;

use abicheck_types::{DslOutcome, Version};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("evaluation error: {0}")]
    Eval(String),
}

fn parse_err(line: usize, message: impl Into<String>) -> DslError {
    DslError::Parse {
        line,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(i64),
    Symbol(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone)]
struct PosTok {
    tok: Tok,
    line: usize,
}

fn lex(src: &str) -> Result<Vec<PosTok>, DslError> {
    let mut out = Vec::new();
    let mut indents = vec![0usize];

    for (idx, raw_line) in src.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim_end();
        let stripped = trimmed.trim_start();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let indent = trimmed.len() - stripped.len();
        let current = *indents.last().unwrap();
        if indent > current {
            indents.push(indent);
            out.push(PosTok {
                tok: Tok::Indent,
                line: line_no,
            });
        } else {
            while indent < *indents.last().unwrap() {
                indents.pop();
                out.push(PosTok {
                    tok: Tok::Dedent,
                    line: line_no,
                });
            }
            if indent != *indents.last().unwrap() {
                return Err(parse_err(line_no, "inconsistent indentation"));
            }
        }

        lex_line(stripped, line_no, &mut out)?;
        out.push(PosTok {
            tok: Tok::Newline,
            line: line_no,
        });
    }

    while indents.len() > 1 {
        indents.pop();
        out.push(PosTok {
            tok: Tok::Dedent,
            line: src.lines().count() + 1,
        });
    }
    out.push(PosTok {
        tok: Tok::Eof,
        line: src.lines().count() + 1,
    });
    Ok(out)
}

fn lex_line(line: &str, line_no: usize, out: &mut Vec<PosTok>) -> Result<(), DslError> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && bytes[j] as char != quote {
                j += 1;
            }
            if j >= bytes.len() {
                return Err(parse_err(line_no, "unterminated string literal"));
            }
            out.push(PosTok {
                tok: Tok::Str(line[start..j].to_string()),
                line: line_no,
            });
            i = j + 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            let num: i64 = line[start..i].parse().map_err(|_| parse_err(line_no, "bad number literal"))?;
            out.push(PosTok {
                tok: Tok::Num(num),
                line: line_no,
            });
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] as char == '_') {
                i += 1;
            }
            out.push(PosTok {
                tok: Tok::Ident(line[start..i].to_string()),
                line: line_no,
            });
            continue;
        }

        let two = if i + 1 < bytes.len() { &line[i..i + 2] } else { "" };
        if matches!(two, "<=" | ">=" | "==" | "!=") {
            out.push(PosTok {
                tok: Tok::Symbol(match two {
                    "<=" => "<=",
                    ">=" => ">=",
                    "==" => "==",
                    _ => "!=",
                }),
                line: line_no,
            });
            i += 2;
            continue;
        }

        let sym = match c {
            '(' => "(",
            ')' => ")",
            ':' => ":",
            ',' => ",",
            '<' => "<",
            '>' => ">",
            '^' => "^",
            _ => return Err(parse_err(line_no, format!("unexpected character {c:?}"))),
        };
        out.push(PosTok {
            tok: Tok::Symbol(sym),
            line: line_no,
        });
        i += 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ValueExpr {
    Ident(String),
    Call { func: String, args: Vec<ValueExpr> },
    Num(i64),
}

#[derive(Debug, Clone, PartialEq)]
enum BoolExpr {
    Compare { op: &'static str, lhs: ValueExpr, rhs: ValueExpr },
    /// A Python-style chained comparison, `a < b < c`, true iff every
    /// consecutive pair satisfies its operator.
    Chain { values: Vec<ValueExpr>, ops: Vec<&'static str> },
    MembershipIn { item: String, set: String },
    /// A bare boolean identifier, e.g. `is_limited_api`.
    BoolIdent(String),
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Xor(Box<BoolExpr>, Box<BoolExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum RaiseKind {
    ExpectFailure,
    SkipBuild,
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    If {
        branches: Vec<(BoolExpr, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
    },
    Raise { kind: RaiseKind, reason: String },
    /// A no-op, for branches that intentionally accept the default outcome.
    Pass,
}

/// A parsed predicate script, ready to evaluate against an [`Env`].
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    statements: Vec<Stmt>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    toks: &'a [PosTok],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn line(&self) -> usize {
        self.toks[self.pos].line
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_symbol(&mut self, sym: &'static str) -> Result<(), DslError> {
        if self.peek() == &Tok::Symbol(sym) {
            self.advance();
            Ok(())
        } else {
            Err(parse_err(self.line(), format!("expected {sym:?}")))
        }
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), DslError> {
        if let Tok::Ident(s) = self.peek() {
            if s == word {
                self.advance();
                return Ok(());
            }
        }
        Err(parse_err(self.line(), format!("expected {word:?}")))
    }

    fn at_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == word)
    }

    fn skip_newlines(&mut self) {
        while self.peek() == &Tok::Newline {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, DslError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while self.peek() != &Tok::Eof {
            stmts.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, DslError> {
        self.expect_symbol(":")?;
        self.skip_newlines();
        if self.peek() != &Tok::Indent {
            return Err(parse_err(self.line(), "expected an indented block"));
        }
        self.advance();
        self.skip_newlines();
        let mut stmts = Vec::new();
        while self.peek() != &Tok::Dedent && self.peek() != &Tok::Eof {
            stmts.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        if self.peek() == &Tok::Dedent {
            self.advance();
        }
        self.skip_newlines();
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, DslError> {
        if self.at_ident("if") {
            self.advance();
            let mut branches = Vec::new();
            let cond = self.parse_or()?;
            let body = self.parse_block()?;
            branches.push((cond, body));

            while self.at_ident("elif") {
                self.advance();
                let cond = self.parse_or()?;
                let body = self.parse_block()?;
                branches.push((cond, body));
            }

            let else_branch = if self.at_ident("else") {
                self.advance();
                Some(self.parse_block()?)
            } else {
                None
            };

            Ok(Stmt::If { branches, else_branch })
        } else if self.at_ident("raise") {
            self.advance();
            let kind = match self.advance() {
                Tok::Ident(s) if s == "ExpectFailure" => RaiseKind::ExpectFailure,
                Tok::Ident(s) if s == "SkipBuild" => RaiseKind::SkipBuild,
                _ => return Err(parse_err(self.line(), "expected ExpectFailure or SkipBuild")),
            };
            self.expect_symbol("(")?;
            let reason = match self.advance() {
                Tok::Str(s) => s,
                _ => return Err(parse_err(self.line(), "expected a string literal reason")),
            };
            self.expect_symbol(")")?;
            Ok(Stmt::Raise { kind, reason })
        } else if self.at_ident("pass") {
            self.advance();
            Ok(Stmt::Pass)
        } else {
            Err(parse_err(self.line(), "expected 'if', 'raise', or 'pass'"))
        }
    }

    fn parse_or(&mut self) -> Result<BoolExpr, DslError> {
        let mut lhs = self.parse_xor()?;
        while self.at_ident("or") {
            self.advance();
            let rhs = self.parse_xor()?;
            lhs = BoolExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<BoolExpr, DslError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == &Tok::Symbol("^") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = BoolExpr::Xor(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<BoolExpr, DslError> {
        let mut lhs = self.parse_not()?;
        while self.at_ident("and") {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = BoolExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<BoolExpr, DslError> {
        if self.at_ident("not") {
            self.advance();
            return Ok(BoolExpr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_bool_atom()
    }

    fn parse_bool_atom(&mut self) -> Result<BoolExpr, DslError> {
        if self.peek() == &Tok::Symbol("(") {
            self.advance();
            let inner = self.parse_or()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }

        if let Tok::Str(item) = self.peek().clone() {
            self.advance();
            self.expect_ident("in")?;
            let set = match self.advance() {
                Tok::Ident(s) => s,
                _ => return Err(parse_err(self.line(), "expected an identifier after 'in'")),
            };
            return Ok(BoolExpr::MembershipIn { item, set });
        }

        let first = self.parse_value()?;
        let mut values = vec![first];
        let mut ops: Vec<&'static str> = Vec::new();
        loop {
            match self.peek() {
                Tok::Symbol(s @ ("<" | "<=" | ">" | ">=" | "==" | "!=")) => {
                    let s = *s;
                    self.advance();
                    values.push(self.parse_value()?);
                    ops.push(s);
                }
                _ => break,
            }
        }
        if ops.is_empty() {
            return match values.into_iter().next() {
                Some(ValueExpr::Ident(name)) => Ok(BoolExpr::BoolIdent(name)),
                _ => Err(parse_err(self.line(), "expected a comparison operator")),
            };
        }
        if ops.len() == 1 {
            Ok(BoolExpr::Compare {
                op: ops[0],
                lhs: values[0].clone(),
                rhs: values[1].clone(),
            })
        } else {
            Ok(BoolExpr::Chain { values, ops })
        }
    }

    fn parse_value(&mut self) -> Result<ValueExpr, DslError> {
        match self.advance() {
            Tok::Ident(name) => {
                if self.peek() == &Tok::Symbol("(") {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != &Tok::Symbol(")") {
                        args.push(self.parse_value()?);
                        while self.peek() == &Tok::Symbol(",") {
                            self.advance();
                            args.push(self.parse_value()?);
                        }
                    }
                    self.expect_symbol(")")?;
                    Ok(ValueExpr::Call { func: name, args })
                } else {
                    Ok(ValueExpr::Ident(name))
                }
            }
            Tok::Num(n) => Ok(ValueExpr::Num(n)),
            _ => Err(parse_err(self.line(), "expected a value expression")),
        }
    }
}

/// Parse an `expected.py`-shaped predicate script.
pub fn parse(src: &str) -> Result<Program, DslError> {
    let toks = lex(src)?;
    let mut parser = Parser { toks: &toks, pos: 0 };
    let statements = parser.parse_program()?;
    Ok(Program { statements })
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// The bindings a predicate script evaluates against (§4.7).
#[derive(Debug, Clone)]
pub struct Env {
    pub compile_version: Version,
    pub exec_version: Version,
    pub compile_features: HashSet<char>,
    pub exec_features: HashSet<char>,
    pub is_limited_api: bool,
    pub limited_api: Option<Version>,
}

impl Program {
    /// Run the predicate to completion. Returns [`DslOutcome::Normal`] if no
    /// `raise` statement fired.
    pub fn evaluate(&self, env: &Env) -> Result<DslOutcome, DslError> {
        match exec_block(&self.statements, env)? {
            Some(outcome) => Ok(outcome),
            None => Ok(DslOutcome::Normal),
        }
    }
}

fn exec_block(stmts: &[Stmt], env: &Env) -> Result<Option<DslOutcome>, DslError> {
    for stmt in stmts {
        match stmt {
            Stmt::Raise { kind, reason } => {
                return Ok(Some(match kind {
                    RaiseKind::ExpectFailure => DslOutcome::ExpectFailure(reason.clone()),
                    RaiseKind::SkipBuild => DslOutcome::SkipBuild(reason.clone()),
                }));
            }
            Stmt::If { branches, else_branch } => {
                let mut matched = false;
                for (cond, body) in branches {
                    if eval_bool(cond, env)? {
                        matched = true;
                        if let Some(outcome) = exec_block(body, env)? {
                            return Ok(Some(outcome));
                        }
                        break;
                    }
                }
                if !matched {
                    if let Some(else_body) = else_branch {
                        if let Some(outcome) = exec_block(else_body, env)? {
                            return Ok(Some(outcome));
                        }
                    }
                }
            }
            Stmt::Pass => {}
        }
    }
    Ok(None)
}

fn eval_bool(expr: &BoolExpr, env: &Env) -> Result<bool, DslError> {
    Ok(match expr {
        BoolExpr::Compare { op, lhs, rhs } => {
            let l = eval_value(lhs, env)?;
            let r = eval_value(rhs, env)?;
            match *op {
                "<" => l < r,
                "<=" => l <= r,
                ">" => l > r,
                ">=" => l >= r,
                "==" => l == r,
                "!=" => l != r,
                _ => unreachable!("lexer only emits known comparison operators"),
            }
        }
        BoolExpr::Chain { values, ops } => {
            let evaled: Vec<Version> = values.iter().map(|v| eval_value(v, env)).collect::<Result<_, _>>()?;
            ops.iter().zip(evaled.windows(2)).all(|(op, pair)| {
                let (l, r) = (pair[0], pair[1]);
                match *op {
                    "<" => l < r,
                    "<=" => l <= r,
                    ">" => l > r,
                    ">=" => l >= r,
                    "==" => l == r,
                    "!=" => l != r,
                    _ => unreachable!("lexer only emits known comparison operators"),
                }
            })
        }
        BoolExpr::BoolIdent(name) => match name.as_str() {
            "is_limited_api" => env.is_limited_api,
            other => return Err(DslError::Eval(format!("identifier {other:?} is not boolean-valued"))),
        },
        BoolExpr::MembershipIn { item, set } => {
            let c = item.chars().next().ok_or_else(|| DslError::Eval("empty membership string".into()))?;
            let features = lookup_feature_set(set, env)?;
            features.contains(&c)
        }
        BoolExpr::Not(inner) => !eval_bool(inner, env)?,
        BoolExpr::And(a, b) => eval_bool(a, env)? && eval_bool(b, env)?,
        BoolExpr::Or(a, b) => eval_bool(a, env)? || eval_bool(b, env)?,
        BoolExpr::Xor(a, b) => eval_bool(a, env)? ^ eval_bool(b, env)?,
    })
}

fn lookup_feature_set<'a>(name: &str, env: &'a Env) -> Result<&'a HashSet<char>, DslError> {
    match name {
        "compile_features" => Ok(&env.compile_features),
        "exec_features" => Ok(&env.exec_features),
        other => Err(DslError::Eval(format!("unknown feature set {other:?}"))),
    }
}

fn eval_value(expr: &ValueExpr, env: &Env) -> Result<Version, DslError> {
    match expr {
        ValueExpr::Ident(name) => match name.as_str() {
            "compile_version" => Ok(env.compile_version),
            "exec_version" => Ok(env.exec_version),
            "limited_api" => env
                .limited_api
                .ok_or_else(|| DslError::Eval("limited_api is null for an unrestricted compile option".into())),
            other => Err(DslError::Eval(format!("unknown identifier {other:?}"))),
        },
        ValueExpr::Call { func, args } => {
            if func != "v" {
                return Err(DslError::Eval(format!("unknown function {func:?}")));
            }
            if args.len() != 2 {
                return Err(DslError::Eval("v() takes exactly (major, minor)".into()));
            }
            let major = eval_num(&args[0])?;
            let minor = eval_num(&args[1])?;
            Ok(Version::of(major, minor))
        }
        ValueExpr::Num(_) => Err(DslError::Eval("a bare number is not a version".into())),
    }
}

fn eval_num(expr: &ValueExpr) -> Result<u32, DslError> {
    match expr {
        ValueExpr::Num(n) if *n >= 0 => Ok(*n as u32),
        _ => Err(DslError::Eval("expected a non-negative integer literal".into())),
    }
}

fn default_env() -> Env {
    Env {
        compile_version: Version::of(3, 13),
        exec_version: Version::of(3, 13),
        compile_features: HashSet::new(),
        exec_features: HashSet::new(),
        is_limited_api: false,
        limited_api: None,
    }
}
