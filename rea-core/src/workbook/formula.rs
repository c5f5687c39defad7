//! Formula text → expression tree.
//!
//! Grammar, loosest to tightest binding:
//! comparison (`= <> < <= > >=`), concatenation (`&`), additive (`+ -`),
//! multiplicative (`* /`), exponent (`^`, left-associative like Excel),
//! prefix sign, primary.

use std::fmt;

use thiserror::Error;

use crate::engine::{CellAddr, RangeAddr};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct FormulaParseError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Cell {
        sheet: Option<String>,
        addr: CellAddr,
    },
    Range {
        sheet: Option<String>,
        range: RangeAddr,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    QuotedSheet(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Colon,
    Bang,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Ident(s) => f.write_str(s),
            Self::QuotedSheet(s) => write!(f, "'{s}'"),
            Self::Op(op) => f.write_str(op),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
            Self::Colon => f.write_str(":"),
            Self::Bang => f.write_str("!"),
        }
    }
}

/// Parse formula text. A leading `=` is optional.
///
/// # Errors
///
/// Returns [`FormulaParseError`] on lexical or syntax errors.
pub fn parse_formula(text: &str) -> Result<Expr, FormulaParseError> {
    let body = text.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    let tokens = tokenize(body)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.comparison()?;
    if let Some((token, offset)) = parser.tokens.get(parser.pos) {
        return Err(FormulaParseError {
            message: format!("unexpected `{token}`"),
            offset: *offset,
        });
    }
    Ok(expr)
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, FormulaParseError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&(offset, ch)) = chars.get(i) {
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '!' => Some(Token::Bang),
            '+' => Some(Token::Op("+")),
            '-' => Some(Token::Op("-")),
            '*' => Some(Token::Op("*")),
            '/' => Some(Token::Op("/")),
            '^' => Some(Token::Op("^")),
            '&' => Some(Token::Op("&")),
            '=' => Some(Token::Op("=")),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((token, offset));
            i += 1;
            continue;
        }

        match ch {
            '<' | '>' => {
                let next = chars.get(i + 1).map(|&(_, c)| c);
                let op = match (ch, next) {
                    ('<', Some('=')) => "<=",
                    ('<', Some('>')) => "<>",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                i += op.len();
                tokens.push((Token::Op(op), offset));
            }
            '"' | '\'' => {
                let (text, next) = read_quoted(&chars, i, ch)?;
                i = next;
                let token = if ch == '"' {
                    Token::Text(text)
                } else {
                    Token::QuotedSheet(text)
                };
                tokens.push((token, offset));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|&(_, c)| c.is_ascii_digit() || c == '.')
                {
                    i += 1;
                }
                // Exponent part: 1e-7, 2.5E3
                if chars.get(i).is_some_and(|&(_, c)| c == 'e' || c == 'E') {
                    let mut j = i + 1;
                    if chars.get(j).is_some_and(|&(_, c)| c == '+' || c == '-') {
                        j += 1;
                    }
                    if chars.get(j).is_some_and(|&(_, c)| c.is_ascii_digit()) {
                        i = j;
                        while chars.get(i).is_some_and(|&(_, c)| c.is_ascii_digit()) {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                let value = text.parse::<f64>().map_err(|_| FormulaParseError {
                    message: format!("invalid number `{text}`"),
                    offset,
                })?;
                tokens.push((Token::Number(value), offset));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while chars.get(i).is_some_and(|&(_, c)| {
                    c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
                }) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                tokens.push((Token::Ident(text), offset));
            }
            other => {
                return Err(FormulaParseError {
                    message: format!("unexpected character `{other}`"),
                    offset,
                });
            }
        }
    }

    Ok(tokens)
}

/// Read a quoted run starting at `start`; a doubled quote is an escaped quote.
fn read_quoted(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), FormulaParseError> {
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            Some(&(_, c)) if c == quote => {
                if chars.get(i + 1).is_some_and(|&(_, n)| n == quote) {
                    out.push(quote);
                    i += 2;
                } else {
                    return Ok((out, i + 1));
                }
            }
            Some(&(_, c)) => {
                out.push(c);
                i += 1;
            }
            None => {
                return Err(FormulaParseError {
                    message: "unterminated quoted text".to_string(),
                    offset: chars.get(start).map_or(0, |&(o, _)| o),
                });
            }
        }
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |(_, o)| *o)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> FormulaParseError {
        FormulaParseError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FormulaParseError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(self.error(format!("expected `{expected}`, found `{t}`"))),
            None => Err(self.error(format!("expected `{expected}`"))),
        }
    }

    fn binary_loop(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, FormulaParseError>,
    ) -> Result<Expr, FormulaParseError> {
        let mut lhs = next(self)?;
        while let Some(Token::Op(op)) = self.peek() {
            let Some(&(_, bin)) = ops.iter().find(|(sym, _)| sym == op) else {
                break;
            };
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(bin, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, FormulaParseError> {
        self.binary_loop(
            &[
                ("=", BinaryOp::Eq),
                ("<>", BinaryOp::Ne),
                ("<", BinaryOp::Lt),
                ("<=", BinaryOp::Le),
                (">", BinaryOp::Gt),
                (">=", BinaryOp::Ge),
            ],
            Self::concat,
        )
    }

    fn concat(&mut self) -> Result<Expr, FormulaParseError> {
        self.binary_loop(&[("&", BinaryOp::Concat)], Self::additive)
    }

    fn additive(&mut self) -> Result<Expr, FormulaParseError> {
        self.binary_loop(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, FormulaParseError> {
        self.binary_loop(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div)],
            Self::power,
        )
    }

    fn power(&mut self) -> Result<Expr, FormulaParseError> {
        self.binary_loop(&[("^", BinaryOp::Pow)], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, FormulaParseError> {
        match self.peek() {
            Some(Token::Op("-")) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Token::Op("+")) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaParseError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::QuotedSheet(sheet)) => {
                self.expect(&Token::Bang)?;
                self.reference(Some(sheet))
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    return Ok(Expr::Call(name.to_ascii_uppercase(), args));
                }
                if self.peek() == Some(&Token::Bang) {
                    self.pos += 1;
                    return self.reference(Some(name));
                }
                if name.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Bool(true));
                }
                if name.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Bool(false));
                }
                self.pos -= 1;
                self.reference(None)
            }
            Some(t) => Err(self.error(format!("unexpected `{t}`"))),
            None => Err(self.error("unexpected end of formula")),
        }
    }

    fn reference(&mut self, sheet: Option<String>) -> Result<Expr, FormulaParseError> {
        let start = self.cell_token()?;
        if self.peek() == Some(&Token::Colon) {
            self.pos += 1;
            let end = self.cell_token()?;
            return Ok(Expr::Range {
                sheet,
                range: RangeAddr::new(start, end),
            });
        }
        Ok(Expr::Cell { sheet, addr: start })
    }

    fn cell_token(&mut self) -> Result<CellAddr, FormulaParseError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Ident(text)) => CellAddr::parse(&text).map_err(|_| FormulaParseError {
                message: format!("unknown name `{text}`"),
                offset,
            }),
            Some(t) => Err(FormulaParseError {
                message: format!("expected a cell reference, found `{t}`"),
                offset,
            }),
            None => Err(self.error("expected a cell reference")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, FormulaParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.comparison()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RParen) => return Ok(args),
                Some(t) => return Err(self.error(format!("expected `,` or `)`, found `{t}`"))),
                None => return Err(self.error("unclosed function call")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str) -> Expr {
        Expr::Cell {
            sheet: None,
            addr: CellAddr::parse(text).unwrap(),
        }
    }

    #[test]
    fn respects_operator_precedence() {
        let expr = parse_formula("=1+2*3^2").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Number(1.0)),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Number(2.0)),
                    Box::new(Expr::Binary(
                        BinaryOp::Pow,
                        Box::new(Expr::Number(3.0)),
                        Box::new(Expr::Number(2.0)),
                    )),
                )),
            )
        );
    }

    #[test]
    fn parses_references_ranges_and_calls() {
        let expr = parse_formula("=SUM(B2:B4, 'Model Data'!$C$1) / b1").unwrap();
        let Expr::Binary(BinaryOp::Div, lhs, rhs) = expr else {
            panic!("expected division");
        };
        assert_eq!(*rhs, cell("B1"));
        let Expr::Call(name, args) = *lhs else {
            panic!("expected call");
        };
        assert_eq!(name, "SUM");
        assert_eq!(
            args[0],
            Expr::Range {
                sheet: None,
                range: RangeAddr::parse("B2:B4").unwrap()
            }
        );
        assert_eq!(
            args[1],
            Expr::Cell {
                sheet: Some("Model Data".into()),
                addr: CellAddr::new(0, 2)
            }
        );
    }

    #[test]
    fn parses_comparisons_text_and_booleans() {
        let expr = parse_formula(r#"=IF(E4>=1, "PASS", "FA""IL")"#).unwrap();
        let Expr::Call(_, args) = expr else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expr::Binary(BinaryOp::Ge, _, _)));
        assert_eq!(args[2], Expr::Text("FA\"IL".into()));
        assert_eq!(parse_formula("TRUE").unwrap(), Expr::Bool(true));
        assert_eq!(
            parse_formula("=Sheet2!A1").unwrap(),
            Expr::Cell {
                sheet: Some("Sheet2".into()),
                addr: CellAddr::new(0, 0)
            }
        );
    }

    #[test]
    fn parses_scientific_numbers_and_unary_minus() {
        assert_eq!(
            parse_formula("=-1.5e-3").unwrap(),
            Expr::Unary(UnaryOp::Neg, Box::new(Expr::Number(0.0015)))
        );
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(parse_formula("=1+").is_err());
        assert!(parse_formula("=SUM(1,2").is_err());
        assert!(parse_formula("=(1+2))").is_err());
        assert!(parse_formula("=\"open").is_err());
        assert!(parse_formula("=foo").is_err());
        assert!(parse_formula("=1 # 2").is_err());
    }
}
