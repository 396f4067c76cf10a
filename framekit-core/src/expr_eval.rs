//! 式評価エンジン
//!
//! 変数パス（`name.field`、`ptr->field`、`arr[0]`）と、
//! それにレジスタ（`$rip`）・保存済みの結果（`$0`）・整数・`*`・`&` を加えた式を評価します。

use crate::errors::EvalError;
use crate::value::Value;
use framekit_symbols::{TypeInfo, ValueType, Variable};
use framekit_target::{StackFrame, Target};
use std::fmt;
use std::sync::Arc;

/// 式の抽象構文木
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// 変数名: `x`
    Variable(String),
    /// レジスタ: `$rip`
    Register(String),
    /// 保存済みの結果: `$0`
    Result(String),
    /// 整数: `42`, `0x10`
    Literal(u64),
    /// メンバーアクセス: `obj.field`, `ptr->field`
    Member {
        base: Box<Expression>,
        field: String,
        arrow: bool,
    },
    /// インデックスアクセス: `arr[0]`
    Index { base: Box<Expression>, index: u64 },
    /// 間接参照: `*ptr`
    Deref(Box<Expression>),
    /// アドレス: `&x`
    AddressOf(Box<Expression>),
}

impl Expression {
    /// 変数を起点とするパスかどうか
    pub fn is_variable_path(&self) -> bool {
        match self {
            Expression::Variable(_) => true,
            Expression::Member { base, .. } | Expression::Index { base, .. } => base.is_variable_path(),
            Expression::Deref(inner) | Expression::AddressOf(inner) => inner.is_variable_path(),
            Expression::Register(_) | Expression::Result(_) | Expression::Literal(_) => false,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Variable(name) => f.write_str(name),
            Expression::Register(name) => write!(f, "${}", name),
            Expression::Result(name) => f.write_str(name),
            Expression::Literal(n) => write!(f, "{}", n),
            Expression::Member { base, field, arrow } => {
                write!(f, "{}{}{}", base, if *arrow { "->" } else { "." }, field)
            }
            Expression::Index { base, index } => write!(f, "{}[{}]", base, index),
            Expression::Deref(inner) => write!(f, "*{}", inner),
            Expression::AddressOf(inner) => write!(f, "&{}", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Dollar(String),
    Int(u64),
    Dot,
    Arrow,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Star,
    Amp,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '&' => {
                tokens.push(Token::Amp);
                i += 1;
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(EvalError::Syntax("expected a name after '$'".to_string()));
                }
                tokens.push(Token::Dollar(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = crate::parse::parse_integer(&text)
                    .ok_or_else(|| EvalError::Syntax(format!("invalid integer '{}'", text)))?;
                tokens.push(Token::Int(value));
            }
            c if is_ident(c) => {
                let start = i;
                // `module::NAME` のようなパスも1つの識別子として扱う
                while i < chars.len() {
                    if is_ident(chars[i]) {
                        i += 1;
                    } else if chars[i] == ':' && chars.get(i + 1) == Some(&':') {
                        i += 2;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(EvalError::Syntax(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(EvalError::Syntax(format!("expected {:?}, found {:?}", expected, token))),
            None => Err(EvalError::Syntax(format!("expected {:?}", expected))),
        }
    }

    fn unary(&mut self) -> Result<Expression, EvalError> {
        match self.peek() {
            Some(Token::Star) => {
                self.pos += 1;
                Ok(Expression::Deref(Box::new(self.unary()?)))
            }
            Some(Token::Amp) => {
                self.pos += 1;
                Ok(Expression::AddressOf(Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expression, EvalError> {
        let mut expr = self.primary()?;

        loop {
            match self.peek() {
                Some(Token::Dot) | Some(Token::Arrow) => {
                    let arrow = self.next() == Some(Token::Arrow);
                    let field = match self.next() {
                        Some(Token::Ident(name)) => name,
                        // タプルのフィールド `t.0`
                        Some(Token::Int(n)) => n.to_string(),
                        _ => return Err(EvalError::Syntax("expected a member name".to_string())),
                    };
                    expr = Expression::Member {
                        base: Box::new(expr),
                        field,
                        arrow,
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = match self.next() {
                        Some(Token::Int(n)) => n,
                        _ => return Err(EvalError::Syntax("expected an integer index".to_string())),
                    };
                    self.expect(Token::RBracket)?;
                    expr = Expression::Index {
                        base: Box::new(expr),
                        index,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expression, EvalError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Expression::Variable(name)),
            Some(Token::Dollar(name)) if name.chars().all(|c| c.is_ascii_digit()) => {
                Ok(Expression::Result(format!("${}", name)))
            }
            Some(Token::Dollar(name)) => Ok(Expression::Register(name)),
            Some(Token::Int(n)) => Ok(Expression::Literal(n)),
            Some(Token::LParen) => {
                let expr = self.unary()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(token) => Err(EvalError::Syntax(format!("unexpected {:?}", token))),
            None => Err(EvalError::Syntax("empty expression".to_string())),
        }
    }
}

/// 式をパースする
pub fn parse_expression(input: &str) -> Result<Expression, EvalError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let expr = parser.unary()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(EvalError::Syntax(format!("unexpected {:?} after expression", token))),
    }
}

/// メンバーアクセスの規則
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// `.` をポインタに使うとエラー（参照は自動で辿る）
    Strict,
    /// `.` はポインタも自動で辿る
    Lenient,
}

/// 式評価器
pub struct ExpressionEvaluator<'a> {
    frame: &'a StackFrame,
    target: &'a Target,
    mode: PathMode,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(frame: &'a StackFrame, target: &'a Target, mode: PathMode) -> Self {
        Self { frame, target, mode }
    }

    /// 式を評価する
    pub fn evaluate(&self, expr: &Expression) -> Result<Value, EvalError> {
        if self.mode == PathMode::Strict && !expr.is_variable_path() {
            return Err(EvalError::NotAVariablePath(expr.to_string()));
        }
        self.eval(expr)
    }

    fn eval(&self, expr: &Expression) -> Result<Value, EvalError> {
        match expr {
            Expression::Variable(name) => self.eval_variable(name),
            Expression::Register(name) => self.eval_register(name),
            Expression::Result(name) => self.eval_result(name),
            Expression::Literal(n) => Ok(Value::from_data(
                n.to_string(),
                TypeInfo::primitive("u64", 8),
                ValueType::ConstResult,
                None,
                n.to_le_bytes().to_vec(),
                self.target.memory(),
                self.target.settings().max_children,
            )),
            Expression::Member { base, field, arrow } => self.eval_member(base, field, *arrow),
            Expression::Index { base, index } => self.eval_index(base, *index),
            Expression::Deref(inner) => {
                let value = available(self.eval(inner)?, inner)?;
                if !is_pointer_like(&value) {
                    return Err(EvalError::NotDereferenceable(inner.to_string()));
                }
                available(value.dereference(), expr)
            }
            Expression::AddressOf(inner) => {
                let value = self.eval(inner)?;
                if value.address().is_none() {
                    return Err(EvalError::NoAddress(inner.to_string()));
                }
                Ok(value.address_of())
            }
        }
    }

    /// 変数を探す
    ///
    /// pcを含むブロックから外側へ（インライン関数の境界まで）、続いてコンパイルユニットの変数を探します。
    fn find_variable(&self, name: &str) -> Option<Arc<Variable>> {
        let mut vars = Vec::new();
        if let Some(block) = self.frame.current_block() {
            block.append_variables(true, true, &mut vars);
        }
        if let Some(found) = vars.into_iter().find(|v| v.name == name) {
            return Some(found);
        }

        self.frame
            .variable_list()
            .into_iter()
            .filter(|v| matches!(v.scope, ValueType::VariableGlobal | ValueType::VariableStatic))
            .find(|v| v.name == name)
    }

    fn eval_variable(&self, name: &str) -> Result<Value, EvalError> {
        let var = self
            .find_variable(name)
            .ok_or_else(|| EvalError::UndeclaredIdentifier(name.to_string()))?;
        Ok(Value::from_variable(self.frame, self.target, &var))
    }

    fn eval_register(&self, name: &str) -> Result<Value, EvalError> {
        let registers = self.frame.registers();
        let info = registers
            .find_register(name)
            .ok_or_else(|| EvalError::UnknownRegister(name.to_string()))?;
        let raw = registers.read_by_name(info.name).ok_or_else(|| EvalError::Unavailable {
            name: format!("${}", info.name),
            reason: "register unavailable in this frame".to_string(),
        })?;
        Ok(Value::register(info.name, info.size as u64, raw, self.target.memory()))
    }

    fn eval_result(&self, name: &str) -> Result<Value, EvalError> {
        let result = self
            .target
            .persistent_result(name)
            .ok_or_else(|| EvalError::UnknownResult(name.to_string()))?;
        Ok(Value::from_data(
            result.name,
            result.type_info,
            ValueType::ConstResult,
            None,
            result.data,
            self.target.memory(),
            self.target.settings().max_children,
        ))
    }

    fn eval_member(&self, base: &Expression, field: &str, arrow: bool) -> Result<Value, EvalError> {
        let value = available(self.eval(base)?, base)?;
        let type_info = value.type_info().cloned().unwrap_or(TypeInfo::Unknown);

        let container = match (&type_info, arrow) {
            (TypeInfo::Pointer { .. } | TypeInfo::Reference { .. }, true) => value.dereference(),
            (_, true) => {
                return Err(EvalError::NotAPointer {
                    base: base.to_string(),
                    field: field.to_string(),
                })
            }
            (TypeInfo::Pointer { .. }, false) if self.mode == PathMode::Strict => {
                return Err(EvalError::PointerMemberAccess {
                    base: base.to_string(),
                    field: field.to_string(),
                })
            }
            (TypeInfo::Pointer { .. } | TypeInfo::Reference { .. }, false) => value.dereference(),
            _ => value,
        };
        let container = available(container, base)?;

        let member = container.child_member_with_name(field);
        if !member.is_valid() {
            return Err(EvalError::NoMember {
                field: field.to_string(),
                type_name: container.type_name().unwrap_or_default(),
            });
        }
        Ok(member)
    }

    fn eval_index(&self, base: &Expression, index: u64) -> Result<Value, EvalError> {
        let value = available(self.eval(base)?, base)?;
        let type_info = value.type_info().cloned().unwrap_or(TypeInfo::Unknown);

        match &type_info {
            TypeInfo::Array { length: Some(len), .. } if index >= *len => Err(EvalError::IndexOutOfBounds {
                index,
                type_name: type_info.name(),
            }),
            TypeInfo::Array { element_type: Some(_), .. } | TypeInfo::Pointer { pointee_type: Some(_), .. } => {
                let element = value.element_at(index);
                available(element, base)
            }
            _ => Err(EvalError::NotIndexable(base.to_string())),
        }
    }
}

fn is_pointer_like(value: &Value) -> bool {
    value.type_info().is_some_and(|t| t.is_pointer_like())
}

/// 読み取れない値をエラーにする
fn available(value: Value, expr: &Expression) -> Result<Value, EvalError> {
    if value.is_valid() && value.data().is_some() {
        return Ok(value);
    }
    if value.is_valid() && value.value_type() == ValueType::RegisterSet {
        return Ok(value);
    }
    Err(EvalError::Unavailable {
        name: expr.to_string(),
        reason: value.error().unwrap_or("value unavailable").to_string(),
    })
}

/// 変数パスを評価する
pub fn value_for_variable_path(frame: &StackFrame, target: &Target, path: &str) -> Result<Value, EvalError> {
    let expr = parse_expression(path)?;
    ExpressionEvaluator::new(frame, target, PathMode::Strict).evaluate(&expr)
}

/// 式を評価し、結果を `$N` として保存する
pub fn evaluate_expression(frame: &StackFrame, target: &Target, text: &str) -> Result<Value, EvalError> {
    let expr = parse_expression(text)?;
    let value = ExpressionEvaluator::new(frame, target, PathMode::Lenient).evaluate(&expr)?;
    let value = available(value, &expr)?;

    let type_info = value.type_info().cloned().unwrap_or(TypeInfo::Unknown);
    let data = value.data().map(|d| d.to_vec()).unwrap_or_default();
    let result = target.add_persistent_result(type_info.clone(), data.clone());

    Ok(Value::from_data(
        result.name,
        type_info,
        ValueType::ConstResult,
        value.address(),
        data,
        target.memory(),
        target.settings().max_children,
    ))
}
