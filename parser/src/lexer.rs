//! FILENAME: parser/src/lexer.rs
//! PURPOSE: Scans a raw formula string and produces a stream of span-carrying
//! tokens.
//! CONTEXT: This is the first stage of the compilation pipeline. Rules are
//! tried in a fixed priority order at each position: formula marker, debug
//! marker, whitespace, punctuation, operators, numbers, quoted strings,
//! boolean literals, and finally bare identifiers. An identifier is
//! classified as a Function token when the injected registry predicate
//! recognizes it, otherwise it is a Variable (cell or range reference).
//!
//! The tokenizer is lossless: every character of the input belongs to exactly
//! one token, so concatenating token values reproduces the input string.

use crate::token::{Token, TokenType};

/// Error produced when no tokenizer rule matches the next character, or a
/// quoted string never terminates.
#[derive(Debug, PartialEq, Clone)]
pub struct TokenizeError {
    /// Byte offset at which scanning failed.
    pub position: usize,
    pub message: String,
}

impl TokenizeError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        TokenizeError {
            position,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tokenize error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizes a complete formula string.
///
/// `is_function` decides whether a bare identifier names a registered
/// function; it is injected so this crate stays independent of the engine's
/// function registry.
pub fn tokenize(
    input: &str,
    is_function: &dyn Fn(&str) -> bool,
) -> Result<Vec<Token>, TokenizeError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;

        let token = match ch {
            '=' => Token::new(TokenType::Formula, pos, "="),
            '?' => Token::new(TokenType::Debugger, pos, "?"),
            c if c.is_ascii_whitespace() => read_space(input, pos),
            ',' => Token::new(TokenType::Comma, pos, ","),
            '(' => Token::new(TokenType::LeftParen, pos, "("),
            ')' => Token::new(TokenType::RightParen, pos, ")"),
            '+' | '-' | '*' | '/' | ':' => {
                Token::new(TokenType::Operator, pos, ch.to_string())
            }
            c if c.is_ascii_digit() => read_number(input, pos),
            '"' | '\'' => read_string(input, pos)?,
            c if is_word_char(c) => read_word(input, pos, is_function),
            c => {
                return Err(TokenizeError::new(
                    pos,
                    format!("Unexpected character: {:?}", c),
                ))
            }
        };

        pos = token.end;
        tokens.push(token);
    }

    Ok(tokens)
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Reads a run of whitespace into a single Space token.
fn read_space(input: &str, start: usize) -> Token {
    let rest = &input[start..];
    let len = rest
        .bytes()
        .take_while(|b| (*b as char).is_ascii_whitespace())
        .count();
    Token::new(TokenType::Space, start, &rest[..len])
}

/// Reads a number matching `\d+(\.\d+)?`.
fn read_number(input: &str, start: usize) -> Token {
    let bytes = input.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end] as char).is_ascii_digit() {
        end += 1;
    }
    // Accept a fractional part only if at least one digit follows the dot.
    if end < bytes.len()
        && bytes[end] == b'.'
        && end + 1 < bytes.len()
        && (bytes[end + 1] as char).is_ascii_digit()
    {
        end += 1;
        while end < bytes.len() && (bytes[end] as char).is_ascii_digit() {
            end += 1;
        }
    }
    Token::new(TokenType::Number, start, &input[start..end])
}

/// Reads a single- or double-quoted string literal. The closing quote is
/// accepted unless the previous character was a backslash.
fn read_string(input: &str, start: usize) -> Result<Token, TokenizeError> {
    let bytes = input.as_bytes();
    let quote = bytes[start];
    let mut end = start + 1;

    while end < bytes.len() {
        if bytes[end] == quote && bytes[end - 1] != b'\\' {
            return Ok(Token::new(
                TokenType::String,
                start,
                &input[start..=end],
            ));
        }
        end += 1;
    }

    Err(TokenizeError::new(start, "Unterminated string literal"))
}

/// Reads a boolean literal or identifier. TRUE/FALSE are matched
/// case-insensitively before falling through to identifier classification,
/// but only at a word boundary so that references like `TRUEX` stay
/// variables.
fn read_word(input: &str, start: usize, is_function: &dyn Fn(&str) -> bool) -> Token {
    let rest = &input[start..];
    let len = rest.bytes().take_while(|b| is_word_char(*b as char)).count();
    let word = &rest[..len];

    if word.eq_ignore_ascii_case("TRUE") || word.eq_ignore_ascii_case("FALSE") {
        return Token::new(TokenType::Boolean, start, word);
    }

    let token_type = if is_function(word) {
        TokenType::Function
    } else {
        TokenType::Variable
    };
    Token::new(token_type, start, word)
}
