//! Expression grammar for step parameters, `Output` templates, and
//! `Condition`/`Edge` conditions (spec.md §4.8).
//!
//! References: `${stepId.output.path}`, `${stepId.error}`, `${input.path}`,
//! `${execution.id}`, `${workflow.id}`. Operators: `== != < <= > >= && || !`.
//! Literals: strings, numbers, booleans, `null`. Calls: `fn:name(arg, ...)`
//! with built-ins `uppercase, lowercase, timestamp, uuid, jsonPath, format`.
//! Evaluation is pure - it reads `ExprContext` and never mutates anything.

use archflow_schemas::{Execution, LocalStepId, Workflow};
use chrono::Utc;
use serde_json::Value;

use crate::error::EngineError;

/// Everything an expression may read.
pub struct ExprContext<'a> {
    pub workflow: &'a Workflow,
    pub execution: &'a Execution,
    pub input: &'a Value,
}

impl<'a> ExprContext<'a> {
    pub fn new(workflow: &'a Workflow, execution: &'a Execution, input: &'a Value) -> Self {
        Self { workflow, execution, input }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ref(String),
    Lit(Value),
    Op(&'static str),
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Ref(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    Literal(Value),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Tokenize the raw expression text. `${...}` spans become a single
/// [`Token::Ref`] carrying the unparsed inner text; everything outside is
/// whitespace, operators, parens, or bare literals.
fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '$' && chars.get(i + 1) == Some(&'{') {
            let start = i + 2;
            let mut depth = 1;
            let mut j = start;
            while j < chars.len() && depth > 0 {
                match chars[j] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth > 0 {
                    j += 1;
                }
            }
            if depth != 0 {
                return Err(EngineError::Expression(format!("unterminated '${{' in: {input}")));
            }
            let inner: String = chars[start..j].iter().collect();
            tokens.push(Token::Ref(inner));
            i = j + 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Op("!"));
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(">="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op("<"));
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(">"));
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut j = i + 1;
                let mut s = String::new();
                while j < chars.len() && chars[j] != quote {
                    s.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(EngineError::Expression(format!("unterminated string literal in: {input}")));
                }
                tokens.push(Token::Lit(Value::String(s)));
                i = j + 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && !"()!<>=&|".contains(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(EngineError::Expression(format!("unexpected character '{c}' in: {input}")));
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Token::Lit(bare_literal(&word)?));
            }
        }
    }
    Ok(tokens)
}

fn bare_literal(word: &str) -> Result<Value, EngineError> {
    match word {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        "null" => Ok(Value::Null),
        _ => word
            .parse::<f64>()
            .map(|n| serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null))
            .map_err(|_| EngineError::Expression(format!("not a literal: '{word}'"))),
    }
}

/// Split `s` on top-level commas (ignoring commas nested inside `(`/`)` or
/// quotes) - used for `fn:name(arg, arg, ...)` argument lists.
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut current = String::new();
    for c in s.chars() {
        match in_quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    in_quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth -= 1;
                    current.push(c);
                }
                ',' if depth == 0 => {
                    parts.push(current.trim().to_string());
                    current = String::new();
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parse the inner text of a single `${...}` span into a reference or call.
fn parse_ref_inner(inner: &str) -> Result<Expr, EngineError> {
    let inner = inner.trim();
    if let Some(rest) = inner.strip_prefix("fn:") {
        let open = rest
            .find('(')
            .ok_or_else(|| EngineError::Expression(format!("malformed call: fn:{rest}")))?;
        let name = rest[..open].trim().to_string();
        let close = rest
            .rfind(')')
            .ok_or_else(|| EngineError::Expression(format!("malformed call: fn:{rest}")))?;
        let arg_str = &rest[open + 1..close];
        let args = split_top_level_commas(arg_str)
            .into_iter()
            .filter(|a| !a.is_empty())
            .map(|a| parse_arg(&a))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::Call { name, args });
    }
    if inner.starts_with('"') || inner.starts_with('\'') {
        return parse_arg(inner);
    }
    Ok(Expr::Ref(inner.split('.').map(str::to_string).collect()))
}

/// Parse a single `fn:` call argument: a nested call, a quoted string, a
/// bare literal, or a dotted reference path (written without the `${}`
/// wrapper since we are already inside one).
fn parse_arg(raw: &str) -> Result<Expr, EngineError> {
    let raw = raw.trim();
    if raw.starts_with("fn:") {
        return parse_ref_inner(raw);
    }
    if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
    {
        return Ok(Expr::Literal(Value::String(raw[1..raw.len() - 1].to_string())));
    }
    if let Ok(lit) = bare_literal(raw) {
        return Ok(Expr::Literal(lit));
    }
    Ok(Expr::Ref(raw.split('.').map(str::to_string).collect()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Op("||"))) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Op("&&"))) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EngineError> {
        if matches!(self.peek(), Some(Token::Op("!"))) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, EngineError> {
        let lhs = self.parse_atom()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => Some(BinOp::Eq),
            Some(Token::Op("!=")) => Some(BinOp::Ne),
            Some(Token::Op("<")) => Some(BinOp::Lt),
            Some(Token::Op("<=")) => Some(BinOp::Le),
            Some(Token::Op(">")) => Some(BinOp::Gt),
            Some(Token::Op(">=")) => Some(BinOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let rhs = self.parse_atom()?;
                Ok(Expr::Binary(Box::new(lhs), op, Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, EngineError> {
        match self.advance() {
            Some(Token::Ref(inner)) => parse_ref_inner(&inner),
            Some(Token::Lit(v)) => Ok(Expr::Literal(v)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EngineError::Expression("expected ')'".to_string())),
                }
            }
            other => Err(EngineError::Expression(format!("unexpected token: {other:?}"))),
        }
    }
}

pub fn parse(input: &str) -> Result<Expr, EngineError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::Expression(format!("trailing tokens in expression: {input}")));
    }
    Ok(expr)
}

fn json_navigate<'a>(mut value: &'a Value, path: &[String]) -> Value {
    for segment in path {
        value = match value {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    value.clone()
}

fn resolve_ref(path: &[String], ctx: &ExprContext) -> Result<Value, EngineError> {
    let head = path
        .first()
        .ok_or_else(|| EngineError::Expression("empty reference".to_string()))?;
    match head.as_str() {
        "input" => Ok(json_navigate(ctx.input, &path[1..])),
        "execution" => match path.get(1).map(String::as_str) {
            Some("id") => Ok(Value::String(ctx.execution.id.to_string())),
            _ => Err(EngineError::Expression(format!("unsupported execution reference: {}", path.join(".")))),
        },
        "workflow" => match path.get(1).map(String::as_str) {
            Some("id") => Ok(Value::String(ctx.workflow.id.to_string())),
            _ => Err(EngineError::Expression(format!("unsupported workflow reference: {}", path.join(".")))),
        },
        step_id => {
            let local = LocalStepId::new(step_id);
            match path.get(1).map(String::as_str) {
                Some("output") => {
                    let output = ctx
                        .execution
                        .completed_output(&local)
                        .cloned()
                        .unwrap_or(Value::Null);
                    Ok(json_navigate(&output, &path[2..]))
                }
                Some("error") => {
                    let message = ctx
                        .execution
                        .step_results
                        .get(&local)
                        .and_then(|r| r.errors.last())
                        .map(|e| e.message.clone())
                        .unwrap_or_default();
                    Ok(Value::String(message))
                }
                _ => Err(EngineError::Expression(format!("unsupported reference: {}", path.join(".")))),
            }
        }
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, EngineError> {
    match name {
        "uppercase" => Ok(Value::String(as_string(args.first())?.to_uppercase())),
        "lowercase" => Ok(Value::String(as_string(args.first())?.to_lowercase())),
        "timestamp" => Ok(Value::String(Utc::now().to_rfc3339())),
        "uuid" => Ok(Value::String(uuid::Uuid::now_v7().to_string())),
        "jsonPath" => {
            let value = args.first().cloned().unwrap_or(Value::Null);
            let path = as_string(args.get(1))?;
            let segments: Vec<String> = path
                .trim_start_matches('$')
                .trim_start_matches('.')
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            Ok(json_navigate(&value, &segments))
        }
        "format" => {
            let template = as_string(args.first())?;
            let mut out = String::new();
            let mut rest_args = args[1.min(args.len())..].iter();
            let mut chars = template.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '{' && chars.peek() == Some(&'}') {
                    chars.next();
                    out.push_str(&value_to_string(rest_args.next().unwrap_or(&Value::Null)));
                } else {
                    out.push(c);
                }
            }
            Ok(Value::String(out))
        }
        other => Err(EngineError::Expression(format!("unknown builtin: fn:{other}"))),
    }
}

fn as_string(v: Option<&Value>) -> Result<String, EngineError> {
    match v {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(value_to_string(other)),
        None => Err(EngineError::Expression("missing argument".to_string())),
    }
}

pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(lhs: &Value, op: BinOp, rhs: &Value) -> Result<Value, EngineError> {
    let ordering = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => value_to_string(lhs).partial_cmp(&value_to_string(rhs)),
    };
    let result = match op {
        BinOp::Eq => lhs == rhs,
        BinOp::Ne => lhs != rhs,
        BinOp::Lt => ordering == Some(std::cmp::Ordering::Less),
        BinOp::Le => matches!(ordering, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        BinOp::Gt => ordering == Some(std::cmp::Ordering::Greater),
        BinOp::Ge => matches!(ordering, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        BinOp::And | BinOp::Or => unreachable!(),
    };
    Ok(Value::Bool(result))
}

pub fn eval(expr: &Expr, ctx: &ExprContext) -> Result<Value, EngineError> {
    match expr {
        Expr::Ref(path) => resolve_ref(path, ctx),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, ctx)?))),
        Expr::Call { name, args } => {
            let values = args.iter().map(|a| eval(a, ctx)).collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, &values)
        }
        Expr::Binary(lhs, BinOp::And, rhs) => {
            let l = truthy(&eval(lhs, ctx)?);
            if !l {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, ctx)?)))
        }
        Expr::Binary(lhs, BinOp::Or, rhs) => {
            let l = truthy(&eval(lhs, ctx)?);
            if l {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, ctx)?)))
        }
        Expr::Binary(lhs, op, rhs) => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            compare(&l, *op, &r)
        }
    }
}

/// Evaluate a `Condition` step / `Edge.condition` expression to a bool.
pub fn evaluate_condition(expression: &str, ctx: &ExprContext) -> Result<bool, EngineError> {
    let expr = parse(expression)?;
    Ok(truthy(&eval(&expr, ctx)?))
}

/// Render an `Output` step template (or an `Llm`/`Tool`/`DeterministicAgent`
/// step's string parameter) by substituting every `${...}` span with its
/// evaluated, stringified value. Text outside `${...}` is copied verbatim.
pub fn render_template(template: &str, ctx: &ExprContext) -> Result<String, EngineError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            let start = i + 2;
            let mut depth = 1;
            let mut j = start;
            while j < chars.len() && depth > 0 {
                match chars[j] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth > 0 {
                    j += 1;
                }
            }
            if depth != 0 {
                return Err(EngineError::Expression(format!("unterminated '${{' in: {template}")));
            }
            let inner: String = chars[start..j].iter().collect();
            let expr = parse_ref_inner(&inner)?;
            let value = eval(&expr, ctx)?;
            out.push_str(&value_to_string(&value));
            i = j + 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::{StepResult, WorkflowConfiguration, WorkflowId, WorkflowMetadata};
    use std::collections::HashMap;

    fn sample_workflow() -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata {
                name: "sample".into(),
                description: String::new(),
                version: "1".into(),
                author: None,
                category: None,
                tags: vec![],
            },
            entry: LocalStepId::new("a"),
            steps: vec![],
            edges: vec![],
            configuration: WorkflowConfiguration::default(),
            variables: HashMap::new(),
        }
    }

    #[test]
    fn renders_input_reference() {
        let workflow = sample_workflow();
        let execution = Execution::new(workflow.id);
        let input = serde_json::json!({"name": "John"});
        let ctx = ExprContext::new(&workflow, &execution, &input);
        let rendered = render_template("Welcome ${input.name}", &ctx).unwrap();
        assert_eq!(rendered, "Welcome John");
    }

    #[test]
    fn evaluates_numeric_comparison_against_step_output() {
        let workflow = sample_workflow();
        let mut execution = Execution::new(workflow.id);
        execution.step_results.insert(
            LocalStepId::new("score"),
            StepResult::completed(serde_json::json!({"value": 0.8}), Default::default()),
        );
        let input = Value::Null;
        let ctx = ExprContext::new(&workflow, &execution, &input);
        assert!(evaluate_condition("${score.output.value} > 0.5", &ctx).unwrap());
        assert!(!evaluate_condition("${score.output.value} <= 0.5", &ctx).unwrap());
    }

    #[test]
    fn evaluates_logical_combinations() {
        let workflow = sample_workflow();
        let mut execution = Execution::new(workflow.id);
        execution.step_results.insert(
            LocalStepId::new("a"),
            StepResult::completed(serde_json::json!({"ok": true}), Default::default()),
        );
        let input = Value::Null;
        let ctx = ExprContext::new(&workflow, &execution, &input);
        assert!(evaluate_condition("${a.output.ok} == true && !(1 > 2)", &ctx).unwrap());
    }

    #[test]
    fn builtin_uppercase_and_format() {
        let workflow = sample_workflow();
        let execution = Execution::new(workflow.id);
        let input = serde_json::json!({"name": "john"});
        let ctx = ExprContext::new(&workflow, &execution, &input);
        assert_eq!(render_template("${fn:uppercase(input.name)}", &ctx).unwrap(), "JOHN");
        assert_eq!(
            render_template("${fn:format('hi {}', input.name)}", &ctx).unwrap(),
            "hi john"
        );
    }

    #[test]
    fn error_reference_binds_last_step_error() {
        let workflow = sample_workflow();
        let mut execution = Execution::new(workflow.id);
        execution.step_results.insert(
            LocalStepId::new("risky"),
            StepResult::failed(
                vec![archflow_schemas::StepError {
                    kind: "internal".to_string(),
                    message: "boom".to_string(),
                    attempt: 1,
                }],
                Default::default(),
            ),
        );
        let input = Value::Null;
        let ctx = ExprContext::new(&workflow, &execution, &input);
        assert_eq!(
            render_template("${risky.error}", &ctx).unwrap(),
            "boom"
        );
    }
}
