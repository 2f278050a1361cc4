//! FILENAME: parser/src/parser.rs
//! PURPOSE: Pratt (precedence-climbing) parser converting a token stream into
//! an AST.
//! CONTEXT: Second stage of the compilation pipeline. Formula, space and
//! debug-marker tokens are filtered out before parsing; the remaining stream
//! must be consumed entirely or parsing fails.
//!
//! BINDING POWERS:
//! ```text
//!   parenthesized expression  5
//!   argument separator        3
//!   function arguments       10
//!   + -                      15   (unary minus parses as 0 - expr at 15)
//!   * /                      20
//!   : (range)                25   (binds tighter than any arithmetic)
//! ```

use crate::ast::{Ast, BinaryOperator};
use crate::token::{Token, TokenType};

const PAREN_POWER: u8 = 5;
/// Commas never bind as infix operators; the power is kept for the grammar
/// table's completeness.
#[allow(dead_code)]
const ARG_SEPARATOR_POWER: u8 = 3;
const FUNCTION_ARG_POWER: u8 = 10;
const ADDITIVE_POWER: u8 = 15;
const MULTIPLICATIVE_POWER: u8 = 20;
const RANGE_POWER: u8 = 25;

/// Parser errors. The variants mirror the distinct ways a token stream can
/// fail to form a single complete expression.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseError {
    /// A `(` without its matching `)`, or a stray `)`.
    UnmatchedParen { position: usize },
    /// A Function token not followed by a parenthesized argument list.
    InvalidFunctionCall { name: String, position: usize },
    /// The expression ended but tokens remain.
    TrailingTokens { position: usize },
    /// A token that cannot start or continue an expression at this point.
    UnexpectedToken { value: String, position: usize },
    /// The stream ended mid-expression.
    UnexpectedEnd,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnmatchedParen { position } => {
                write!(f, "Unmatched parenthesis at {}", position)
            }
            ParseError::InvalidFunctionCall { name, position } => {
                write!(f, "Invalid call of function {} at {}", name, position)
            }
            ParseError::TrailingTokens { position } => {
                write!(f, "Unexpected trailing tokens at {}", position)
            }
            ParseError::UnexpectedToken { value, position } => {
                write!(f, "Unexpected token {:?} at {}", value, position)
            }
            ParseError::UnexpectedEnd => write!(f, "Unexpected end of formula"),
        }
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// The parser holds the filtered token stream and a cursor into it.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Creates a parser over a raw token stream. Formula markers, debug
    /// markers and whitespace carry no grammar and are dropped here.
    pub fn new(tokens: &[Token]) -> Self {
        let tokens = tokens
            .iter()
            .filter(|t| {
                !matches!(
                    t.token_type,
                    TokenType::Formula | TokenType::Space | TokenType::Debugger
                )
            })
            .cloned()
            .collect();
        Parser { tokens, pos: 0 }
    }

    /// Parses the entire stream into a single expression.
    pub fn parse(&mut self) -> ParseResult<Ast> {
        let ast = self.parse_expression(0)?;
        if let Some(token) = self.peek() {
            // A leftover `)` is an unmatched paren, anything else is trailing
            // garbage after a complete expression.
            if token.token_type == TokenType::RightParen {
                return Err(ParseError::UnmatchedParen {
                    position: token.start,
                });
            }
            return Err(ParseError::TrailingTokens {
                position: token.start,
            });
        }
        Ok(ast)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Precedence climbing: parse a prefix expression, then keep absorbing
    /// infix operators whose binding power exceeds `min_power`.
    fn parse_expression(&mut self, min_power: u8) -> ParseResult<Ast> {
        let mut left = self.parse_prefix()?;

        while let Some(token) = self.peek() {
            if token.token_type != TokenType::Operator {
                break;
            }
            let Some((op, power)) = infix_operator(&token.value) else {
                break;
            };
            if power <= min_power {
                break;
            }
            self.advance();
            // Same power on the right makes the operator left-associative.
            let right = self.parse_expression(power)?;
            left = Ast::Operation {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Ast> {
        let token = self.advance().ok_or(ParseError::UnexpectedEnd)?;

        match token.token_type {
            TokenType::Number => Ok(Ast::Number(parse_number(&token.value))),
            TokenType::String => Ok(Ast::Str(unquote(&token.value))),
            TokenType::Boolean => Ok(Ast::Boolean(token.value.eq_ignore_ascii_case("TRUE"))),
            TokenType::Variable => Ok(Ast::Variable(token.value.clone())),
            TokenType::Function => self.parse_function_call(token),
            TokenType::LeftParen => {
                let inner = self.parse_expression(PAREN_POWER)?;
                match self.advance() {
                    Some(t) if t.token_type == TokenType::RightParen => Ok(inner),
                    _ => Err(ParseError::UnmatchedParen {
                        position: token.start,
                    }),
                }
            }
            TokenType::Operator if token.value == "-" => {
                // Unary minus: lowered to 0 - expr, parsed at additive power.
                let operand = self.parse_expression(ADDITIVE_POWER)?;
                Ok(Ast::Operation {
                    op: BinaryOperator::Subtract,
                    left: Box::new(Ast::Number(0.0)),
                    right: Box::new(operand),
                })
            }
            _ => Err(ParseError::UnexpectedToken {
                value: token.value.clone(),
                position: token.start,
            }),
        }
    }

    /// Parses `NAME ( args? )` after the Function token was consumed.
    fn parse_function_call(&mut self, name_token: Token) -> ParseResult<Ast> {
        let name = name_token.value.clone();

        match self.peek() {
            Some(t) if t.token_type == TokenType::LeftParen => {
                self.advance();
            }
            _ => {
                return Err(ParseError::InvalidFunctionCall {
                    name,
                    position: name_token.start,
                })
            }
        }

        let mut args = Vec::new();

        if let Some(t) = self.peek() {
            if t.token_type == TokenType::RightParen {
                self.advance();
                return Ok(Ast::FunctionCall { name, args });
            }
        }

        loop {
            args.push(self.parse_expression(FUNCTION_ARG_POWER)?);
            match self.advance() {
                Some(t) if t.token_type == TokenType::Comma => continue,
                Some(t) if t.token_type == TokenType::RightParen => break,
                Some(t) => {
                    return Err(ParseError::InvalidFunctionCall {
                        name,
                        position: t.start,
                    })
                }
                None => {
                    return Err(ParseError::UnmatchedParen {
                        position: name_token.start,
                    })
                }
            }
        }

        Ok(Ast::FunctionCall { name, args })
    }
}

/// Operator and binding power of an infix token, None for anything the
/// grammar does not treat as infix.
fn infix_operator(value: &str) -> Option<(BinaryOperator, u8)> {
    match value {
        "+" => Some((BinaryOperator::Add, ADDITIVE_POWER)),
        "-" => Some((BinaryOperator::Subtract, ADDITIVE_POWER)),
        "*" => Some((BinaryOperator::Multiply, MULTIPLICATIVE_POWER)),
        "/" => Some((BinaryOperator::Divide, MULTIPLICATIVE_POWER)),
        ":" => Some((BinaryOperator::Range, RANGE_POWER)),
        _ => None,
    }
}

fn parse_number(value: &str) -> f64 {
    // The tokenizer guarantees `\d+(\.\d+)?`, which always parses.
    value.parse::<f64>().unwrap_or(0.0)
}

/// Strips the surrounding quotes and resolves backslash-escaped quotes of the
/// active quote character.
fn unquote(value: &str) -> String {
    let quote = value.as_bytes()[0] as char;
    let inner = &value[1..value.len() - 1];
    let escaped = format!("\\{}", quote);
    inner.replace(&escaped, &quote.to_string())
}

/// Errors that can stop a formula from compiling: either the tokenizer or
/// the parser refused the input.
#[derive(Debug, PartialEq, Clone)]
pub enum FormulaSyntaxError {
    Tokenize(crate::lexer::TokenizeError),
    Parse(ParseError),
}

impl std::fmt::Display for FormulaSyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormulaSyntaxError::Tokenize(e) => write!(f, "{}", e),
            FormulaSyntaxError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FormulaSyntaxError {}

impl From<crate::lexer::TokenizeError> for FormulaSyntaxError {
    fn from(e: crate::lexer::TokenizeError) -> Self {
        FormulaSyntaxError::Tokenize(e)
    }
}

impl From<ParseError> for FormulaSyntaxError {
    fn from(e: ParseError) -> Self {
        FormulaSyntaxError::Parse(e)
    }
}

/// Convenience: tokenize and parse in one call.
pub fn parse(
    input: &str,
    is_function: &dyn Fn(&str) -> bool,
) -> Result<Ast, FormulaSyntaxError> {
    let tokens = crate::lexer::tokenize(input, is_function)?;
    Ok(Parser::new(&tokens).parse()?)
}
