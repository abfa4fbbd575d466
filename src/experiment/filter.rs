//! Filter predicate language used by rooms and experiment groups.
//!
//! Expressions are boolean combinations of `feature OP literal` comparisons:
//!
//! ```text
//! country = 'US' and (age >= 18 or vip = 'true') and tier in ['a', 'b']
//! ```
//!
//! Supported operators: `=` `==` `!=` `<` `<=` `>` `>=` `in` `not in`
//! `contains`, combined with `and` / `or` / `not` and parentheses. Features
//! are looked up in the request's filter parameters plus the implicit
//! `__uid__` and `__scene__` fields. A comparison on an undefined feature
//! evaluates to false.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Num(f64),
    Str(String),
    List(Vec<Literal>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Cmp {
        feature: String,
        op: CmpOp,
        literal: Literal,
    },
}

impl FilterExpr {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(t) => Err(FilterError::UnexpectedToken(format!("{:?}", t))),
        }
    }

    pub fn evaluate(&self, features: &Map<String, Value>) -> bool {
        match self {
            FilterExpr::And(a, b) => a.evaluate(features) && b.evaluate(features),
            FilterExpr::Or(a, b) => a.evaluate(features) || b.evaluate(features),
            FilterExpr::Not(inner) => !inner.evaluate(features),
            FilterExpr::Cmp {
                feature,
                op,
                literal,
            } => {
                let value = match features.get(feature) {
                    Some(v) => v,
                    None => return false,
                };
                eval_cmp(value, *op, literal)
            }
        }
    }
}

fn eval_cmp(value: &Value, op: CmpOp, literal: &Literal) -> bool {
    match op {
        CmpOp::Eq => literal_eq(value, literal),
        CmpOp::Ne => !literal_eq(value, literal),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (value.as_f64(), literal) {
                (Some(v), Literal::Num(n)) => v.partial_cmp(n),
                _ => match (value.as_str(), literal) {
                    (Some(v), Literal::Str(s)) => Some(v.cmp(s.as_str())),
                    _ => None,
                },
            };
            match ordering {
                Some(ord) => match op {
                    CmpOp::Lt => ord.is_lt(),
                    CmpOp::Le => ord.is_le(),
                    CmpOp::Gt => ord.is_gt(),
                    CmpOp::Ge => ord.is_ge(),
                    _ => unreachable!(),
                },
                None => false,
            }
        }
        CmpOp::In => match literal {
            Literal::List(items) => items.iter().any(|item| literal_eq(value, item)),
            other => literal_eq(value, other),
        },
        CmpOp::NotIn => match literal {
            Literal::List(items) => !items.iter().any(|item| literal_eq(value, item)),
            other => !literal_eq(value, other),
        },
        CmpOp::Contains => match (value, literal) {
            (Value::String(s), Literal::Str(needle)) => s.contains(needle.as_str()),
            (Value::Array(items), lit) => items.iter().any(|item| literal_eq(item, lit)),
            _ => false,
        },
    }
}

fn literal_eq(value: &Value, literal: &Literal) -> bool {
    match literal {
        Literal::Num(n) => value.as_f64().map(|v| v == *n).unwrap_or(false),
        Literal::Str(s) => match value {
            Value::String(v) => v == s,
            Value::Bool(b) => s == if *b { "true" } else { "false" },
            _ => false,
        },
        Literal::List(_) => false,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    i += 1;
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(FilterError::UnexpectedChar('!', i));
                }
            }
            '<' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 1;
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 1;
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(FilterError::UnterminatedString);
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| FilterError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(FilterError::UnexpectedChar(other, i)),
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(word))
    }

    fn parse_or(&mut self) -> Result<FilterExpr, FilterError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.next();
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, FilterError> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.next();
            let right = self.parse_unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, FilterError> {
        if self.peek_keyword("not") {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<FilterExpr, FilterError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let expr = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    Some(t) => Err(FilterError::UnexpectedToken(format!("{:?}", t))),
                    None => Err(FilterError::UnexpectedEnd),
                }
            }
            Some(Token::Ident(_)) => self.parse_comparison(),
            Some(t) => Err(FilterError::UnexpectedToken(format!("{:?}", t))),
            None => Err(FilterError::UnexpectedEnd),
        }
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr, FilterError> {
        let feature = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(t) => return Err(FilterError::UnexpectedToken(format!("{:?}", t))),
            None => return Err(FilterError::UnexpectedEnd),
        };
        let op = match self.next() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("in") => CmpOp::In,
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("contains") => CmpOp::Contains,
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("not") => {
                match self.next() {
                    Some(Token::Ident(next)) if next.eq_ignore_ascii_case("in") => CmpOp::NotIn,
                    Some(t) => return Err(FilterError::UnexpectedToken(format!("{:?}", t))),
                    None => return Err(FilterError::UnexpectedEnd),
                }
            }
            Some(t) => return Err(FilterError::UnexpectedToken(format!("{:?}", t))),
            None => return Err(FilterError::UnexpectedEnd),
        };
        let literal = if matches!(op, CmpOp::In | CmpOp::NotIn) {
            self.parse_list()?
        } else {
            self.parse_literal()?
        };
        Ok(FilterExpr::Cmp {
            feature,
            op,
            literal,
        })
    }

    fn parse_list(&mut self) -> Result<Literal, FilterError> {
        let closing = match self.next() {
            Some(Token::LBracket) => Token::RBracket,
            Some(Token::LParen) => Token::RParen,
            Some(t) => return Err(FilterError::UnexpectedToken(format!("{:?}", t))),
            None => return Err(FilterError::UnexpectedEnd),
        };
        let mut items = Vec::new();
        loop {
            items.push(self.parse_literal()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(t) if t == closing => break,
                Some(t) => return Err(FilterError::UnexpectedToken(format!("{:?}", t))),
                None => return Err(FilterError::UnexpectedEnd),
            }
        }
        Ok(Literal::List(items))
    }

    fn parse_literal(&mut self) -> Result<Literal, FilterError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Literal::Num(n)),
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            // Bare words in literal position are treated as strings, so
            // provider-authored filters like `country = US` still parse.
            Some(Token::Ident(s)) => Ok(Literal::Str(s)),
            Some(t) => Err(FilterError::UnexpectedToken(format!("{:?}", t))),
            None => Err(FilterError::UnexpectedEnd),
        }
    }
}
