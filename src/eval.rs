// Copyright 2018 The Produce-rs Project Developers. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::fmt;

use super::utils::shell_quote_join;

/// A value produced by evaluating an embedded expression.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match *self {
            Value::Str(ref s) => !s.is_empty(),
            Value::Int(n) => n != 0,
            Value::Bool(b) => b,
            Value::List(ref items) => !items.is_empty(),
        }
    }

    /// The string inserted into a template for this value: strings verbatim,
    /// sequences as shell-quoted whitespace-joined tokens.
    pub fn to_insertion_string(&self) -> String {
        match *self {
            Value::Str(ref s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => if b { "True" } else { "False" }.to_owned(),
            Value::List(ref items) => {
                let rendered: Vec<String> =
                    items.iter().map(|v| v.to_insertion_string()).collect();
                shell_quote_join(rendered.iter().map(|s| s.as_str()))
            }
        }
    }
}

/// A scope for variable lookups during interpolation and instantiation.
#[derive(Clone, Default)]
pub struct Env {
    bindings: HashMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn lookup_variable(&self, var: &str) -> Option<&Value> {
        self.bindings.get(var)
    }

    pub fn add_binding(&mut self, var: &str, value: Value) {
        self.bindings.insert(var.to_owned(), value);
    }

    pub fn bindings(&self) -> &HashMap<String, Value> {
        &self.bindings
    }
}

/// Evaluation failure.  The interpolator's closing-brace discovery depends
/// on syntax errors being distinguishable from everything else.
#[derive(Clone, PartialEq)]
pub enum EvalError {
    Syntax(String),
    Name(String),
    Other(String),
}

impl EvalError {
    pub fn is_syntax(&self) -> bool {
        match *self {
            EvalError::Syntax(_) => true,
            _ => false,
        }
    }

    pub fn is_name(&self) -> bool {
        match *self {
            EvalError::Name(_) => true,
            _ => false,
        }
    }

    pub fn message(&self) -> &str {
        match *self {
            EvalError::Syntax(ref m) | EvalError::Name(ref m) | EvalError::Other(ref m) => m,
        }
    }
}

impl fmt::Debug for EvalError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EvalError::Syntax(ref m) => write!(formatter, "SyntaxError({})", m),
            EvalError::Name(ref m) => write!(formatter, "NameError({})", m),
            EvalError::Other(ref m) => write!(formatter, "EvalError({})", m),
        }
    }
}

/// The engine only needs these two entry points from an expression
/// implementation; anything satisfying them can host the `%{...}` holes.
pub trait Evaluator {
    fn evaluate(&self, expr: &str, env: &Env) -> Result<Value, EvalError>;

    /// Execute a block of prelude code, adding any bindings it defines
    /// to |env|.
    fn run_prelude(&self, code: &str, env: &mut Env) -> Result<(), EvalError>;
}

// ---------------------------------------------------------------------------
// ScriptEvaluator: a restricted expression language.
//
// Literals (integers, quoted strings, True/False, lists, tuples), names,
// arithmetic, comparisons, boolean operators, indexing and a fixed set of
// functions.  The prelude is a sequence of `name = expression` lines.
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Debug)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() {
            let mut number = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                number.push(d);
                chars.next();
            }
            let value = number
                .parse::<i64>()
                .map_err(|_| EvalError::Syntax(format!("integer literal too large: {}", number)))?;
            tokens.push(Token::Int(value));
        } else if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if !is_ident_char(d) {
                    break;
                }
                ident.push(d);
                chars.next();
            }
            tokens.push(Token::Ident(ident));
        } else if c == '\'' || c == '"' {
            let quote = c;
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next() {
                    None => {
                        return Err(EvalError::Syntax("unterminated string literal".to_owned()));
                    }
                    Some(d) if d == quote => break,
                    Some('\\') => match chars.next() {
                        None => {
                            return Err(EvalError::Syntax(
                                "unterminated string literal".to_owned(),
                            ));
                        }
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some(other) => literal.push(other),
                    },
                    Some(d) => literal.push(d),
                }
            }
            tokens.push(Token::Str(literal));
        } else {
            chars.next();
            let op = match c {
                '=' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        "=="
                    } else {
                        return Err(EvalError::Syntax("unexpected '='".to_owned()));
                    }
                }
                '!' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        "!="
                    } else {
                        return Err(EvalError::Syntax("unexpected '!'".to_owned()));
                    }
                }
                '<' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        "<="
                    } else {
                        "<"
                    }
                }
                '>' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        ">="
                    } else {
                        ">"
                    }
                }
                '+' => "+",
                '-' => "-",
                '*' => "*",
                '/' => "/",
                '%' => "%",
                ',' => ",",
                '(' => "(",
                ')' => ")",
                '[' => "[",
                ']' => "]",
                other => {
                    return Err(EvalError::Syntax(format!("unexpected character '{}'", other)));
                }
            };
            tokens.push(Token::Op(op));
        }
    }

    Ok(tokens)
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Debug)]
enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Name(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if let Some(&Token::Op(found)) = self.peek() {
            if found == op {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_op(&mut self, op: &str) -> Result<(), EvalError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!("expected '{}'", op)))
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if let Some(&Token::Ident(ref found)) = self.peek() {
            if found == word {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    /// Top level: a comma-separated tuple.  A single element stays itself;
    /// two or more (or a trailing comma) make a sequence.
    fn parse_tuple(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_or()?;
        if !self.eat_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        loop {
            match self.peek() {
                None | Some(&Token::Op(")")) | Some(&Token::Op("]")) => break,
                _ => {}
            }
            items.push(self.parse_or()?);
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(Expr::List(items))
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat_keyword("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(&Token::Op("==")) => Some(BinOp::Eq),
            Some(&Token::Op("!=")) => Some(BinOp::Ne),
            Some(&Token::Op("<")) => Some(BinOp::Lt),
            Some(&Token::Op("<=")) => Some(BinOp::Le),
            Some(&Token::Op(">")) => Some(BinOp::Gt),
            Some(&Token::Op(">=")) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.parse_additive()?;
            return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(&Token::Op("+")) => BinOp::Add,
                Some(&Token::Op("-")) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(&Token::Op("*")) => BinOp::Mul,
                Some(&Token::Op("/")) => BinOp::Div,
                Some(&Token::Op("%")) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat_op("-") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_atom()?;
        while self.eat_op("[") {
            let index = self.parse_tuple()?;
            self.expect_op("]")?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            None => Err(EvalError::Syntax("unexpected end of expression".to_owned())),
            Some(&Token::Int(n)) => Ok(Expr::Int(n)),
            Some(&Token::Str(ref s)) => Ok(Expr::Str(s.clone())),
            Some(&Token::Ident(ref name)) => {
                if name == "True" {
                    return Ok(Expr::Bool(true));
                }
                if name == "False" {
                    return Ok(Expr::Bool(false));
                }
                if self.eat_op("(") {
                    let mut args = Vec::new();
                    if !self.eat_op(")") {
                        loop {
                            args.push(self.parse_or()?);
                            if self.eat_op(",") {
                                continue;
                            }
                            self.expect_op(")")?;
                            break;
                        }
                    }
                    return Ok(Expr::Call(name.clone(), args));
                }
                Ok(Expr::Name(name.clone()))
            }
            Some(&Token::Op("(")) => {
                let inner = self.parse_tuple()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Some(&Token::Op("[")) => {
                let mut items = Vec::new();
                if !self.eat_op("]") {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat_op(",") {
                            if self.eat_op("]") {
                                break;
                            }
                            continue;
                        }
                        self.expect_op("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(other) => Err(EvalError::Syntax(format!("unexpected token {:?}", other))),
        }
    }
}

fn parse(input: &str) -> Result<Expr, EvalError> {
    let tokens = lex(input)?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_tuple()?;
    if parser.pos != tokens.len() {
        return Err(EvalError::Syntax(format!(
            "unexpected token {:?} after expression",
            tokens[parser.pos]
        )));
    }
    Ok(expr)
}

fn eval_index(value: &Value, index: &Value) -> Result<Value, EvalError> {
    let i = match *index {
        Value::Int(i) => i,
        ref other => {
            return Err(EvalError::Other(format!(
                "index must be an integer, got {:?}",
                other
            )));
        }
    };
    match *value {
        Value::Str(ref s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let effective = if i < 0 { i + len } else { i };
            if effective < 0 || effective >= len {
                return Err(EvalError::Other(format!("string index {} out of range", i)));
            }
            Ok(Value::Str(chars[effective as usize].to_string()))
        }
        Value::List(ref items) => {
            let len = items.len() as i64;
            let effective = if i < 0 { i + len } else { i };
            if effective < 0 || effective >= len {
                return Err(EvalError::Other(format!("list index {} out of range", i)));
            }
            Ok(items[effective as usize].clone())
        }
        ref other => Err(EvalError::Other(format!("{:?} is not indexable", other))),
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let arity = |n: usize| -> Result<(), EvalError> {
        if args.len() != n {
            Err(EvalError::Other(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )))
        } else {
            Ok(())
        }
    };

    let as_str = |v: &Value| -> Result<String, EvalError> {
        match *v {
            Value::Str(ref s) => Ok(s.clone()),
            ref other => Err(EvalError::Other(format!(
                "{}() expects a string, got {:?}",
                name, other
            ))),
        }
    };

    match name {
        "len" => {
            arity(1)?;
            match args[0] {
                Value::Str(ref s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(ref items) => Ok(Value::Int(items.len() as i64)),
                ref other => Err(EvalError::Other(format!("len() of {:?}", other))),
            }
        }
        "str" => {
            arity(1)?;
            Ok(Value::Str(args[0].to_insertion_string()))
        }
        "int" => {
            arity(1)?;
            match args[0] {
                Value::Int(n) => Ok(Value::Int(n)),
                Value::Bool(b) => Ok(Value::Int(b as i64)),
                Value::Str(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| EvalError::Other(format!("int() of '{}'", s))),
                ref other => Err(EvalError::Other(format!("int() of {:?}", other))),
            }
        }
        "split" => {
            arity(1)?;
            let s = as_str(&args[0])?;
            Ok(Value::List(
                s.split_whitespace()
                    .map(|w| Value::Str(w.to_owned()))
                    .collect(),
            ))
        }
        "join" => {
            arity(2)?;
            let sep = as_str(&args[1])?;
            match args[0] {
                Value::List(ref items) => {
                    let parts: Vec<String> =
                        items.iter().map(|v| v.to_insertion_string()).collect();
                    Ok(Value::Str(parts.join(&sep)))
                }
                ref other => Err(EvalError::Other(format!("join() of {:?}", other))),
            }
        }
        "strip" => {
            arity(1)?;
            Ok(Value::Str(as_str(&args[0])?.trim().to_owned()))
        }
        "replace" => {
            arity(3)?;
            let s = as_str(&args[0])?;
            let from = as_str(&args[1])?;
            let to = as_str(&args[2])?;
            Ok(Value::Str(s.replace(&from, &to)))
        }
        "basename" => {
            arity(1)?;
            let s = as_str(&args[0])?;
            Ok(Value::Str(
                s.rsplit('/').next().unwrap_or("").to_owned(),
            ))
        }
        "dirname" => {
            arity(1)?;
            let s = as_str(&args[0])?;
            match s.rfind('/') {
                Some(pos) => Ok(Value::Str(s[..pos].to_owned())),
                None => Ok(Value::Str(String::new())),
            }
        }
        _ => Err(EvalError::Name(format!(
            "function '{}' is not defined",
            name
        ))),
    }
}

fn eval_expr(expr: &Expr, env: &Env) -> Result<Value, EvalError> {
    match *expr {
        Expr::Int(n) => Ok(Value::Int(n)),
        Expr::Str(ref s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(b)),
        Expr::Name(ref name) => match env.lookup_variable(name) {
            Some(value) => Ok(value.clone()),
            None => Err(EvalError::Name(format!("name '{}' is not defined", name))),
        },
        Expr::List(ref items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(item, env)?);
            }
            Ok(Value::List(values))
        }
        Expr::Not(ref operand) => Ok(Value::Bool(!eval_expr(operand, env)?.truthy())),
        Expr::Neg(ref operand) => match eval_expr(operand, env)? {
            Value::Int(n) => Ok(Value::Int(-n)),
            other => Err(EvalError::Other(format!("cannot negate {:?}", other))),
        },
        Expr::Binary(op, ref lhs, ref rhs) => {
            // Both operands always evaluate; the sublanguage has no
            // side effects, so short-circuiting buys nothing.
            let left = eval_expr(lhs, env)?;
            let right = eval_expr(rhs, env)?;
            eval_binary(op, left, right)
        }
        Expr::Index(ref base, ref index) => {
            let value = eval_expr(base, env)?;
            let index = eval_expr(index, env)?;
            eval_index(&value, &index)
        }
        Expr::Call(ref name, ref args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, env)?);
            }
            call_builtin(name, &values)
        }
    }
}

fn eval_binary(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinOp::And => Ok(Value::Bool(left.truthy() && right.truthy())),
        BinOp::Or => Ok(Value::Bool(left.truthy() || right.truthy())),
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Add => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => Err(EvalError::Other(format!("cannot add {:?} and {:?}", a, b))),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => match (left, right) {
            (Value::Int(a), Value::Int(b)) => match op {
                BinOp::Sub => Ok(Value::Int(a - b)),
                BinOp::Mul => Ok(Value::Int(a * b)),
                BinOp::Div => {
                    if b == 0 {
                        Err(EvalError::Other("division by zero".to_owned()))
                    } else {
                        Ok(Value::Int(a / b))
                    }
                }
                BinOp::Mod => {
                    if b == 0 {
                        Err(EvalError::Other("division by zero".to_owned()))
                    } else {
                        Ok(Value::Int(a % b))
                    }
                }
                _ => unreachable!(),
            },
            (a, b) => Err(EvalError::Other(format!(
                "unsupported operand types: {:?} and {:?}",
                a, b
            ))),
        },
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&left, &right) {
                (&Value::Int(a), &Value::Int(b)) => a.cmp(&b),
                (&Value::Str(ref a), &Value::Str(ref b)) => a.cmp(b),
                _ => {
                    return Err(EvalError::Other(format!(
                        "cannot order {:?} and {:?}",
                        left, right
                    )));
                }
            };
            let result = match op {
                BinOp::Lt => ordering == std::cmp::Ordering::Less,
                BinOp::Le => ordering != std::cmp::Ordering::Greater,
                BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

/// The stock expression implementation.
pub struct ScriptEvaluator {}

impl ScriptEvaluator {
    pub fn new() -> Self {
        ScriptEvaluator {}
    }
}

impl Evaluator for ScriptEvaluator {
    fn evaluate(&self, expr: &str, env: &Env) -> Result<Value, EvalError> {
        let parsed = parse(expr)?;
        eval_expr(&parsed, env)
    }

    fn run_prelude(&self, code: &str, env: &mut Env) -> Result<(), EvalError> {
        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let eq = line.find('=').ok_or_else(|| {
                EvalError::Syntax(format!("expected assignment in prelude: {}", line))
            })?;
            let name = line[..eq].trim();
            let rhs = &line[eq + 1..];
            if name.is_empty()
                || !name.chars().next().map(is_ident_start).unwrap_or(false)
                || !name.chars().all(is_ident_char)
                || rhs.starts_with('=')
            {
                return Err(EvalError::Syntax(format!(
                    "expected assignment in prelude: {}",
                    line
                )));
            }

            let value = self.evaluate(rhs, env)?;
            env.add_binding(name, value);
        }
        Ok(())
    }
}
