//! Shell command-line tokenizer.
//!
//! Splits on unquoted whitespace. Single quotes take everything literally,
//! double quotes allow `\"` and `\\` escapes, and a backslash outside quotes
//! escapes the next character.

use std::fmt;

/// Tokenizer failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// A quote was opened but never closed
    UnterminatedQuote(char),
    /// The line ends with a lone backslash
    TrailingBackslash,
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedQuote(q) => write!(f, "unterminated {q} quote"),
            Self::TrailingBackslash => f.write_str("trailing backslash"),
        }
    }
}

impl std::error::Error for TokenizeError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Between,
    Word,
    Single,
    Double,
}

/// Split a line into tokens
pub fn tokenize(line: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (state, c) {
            (State::Between, c) if c.is_whitespace() => {}
            (State::Word, c) if c.is_whitespace() => {
                tokens.push(std::mem::take(&mut current));
                state = State::Between;
            }
            (State::Between | State::Word, '\'') => state = State::Single,
            (State::Between | State::Word, '"') => state = State::Double,
            (State::Between | State::Word, '\\') => {
                current.push(chars.next().ok_or(TokenizeError::TrailingBackslash)?);
                state = State::Word;
            }
            (State::Between | State::Word, c) => {
                current.push(c);
                state = State::Word;
            }
            (State::Single, '\'') | (State::Double, '"') => state = State::Word,
            (State::Double, '\\') => match chars.next() {
                Some(next @ ('"' | '\\')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => return Err(TokenizeError::UnterminatedQuote('"')),
            },
            (State::Single | State::Double, c) => current.push(c),
        }
    }

    match state {
        State::Single => Err(TokenizeError::UnterminatedQuote('\'')),
        State::Double => Err(TokenizeError::UnterminatedQuote('"')),
        State::Word => {
            tokens.push(current);
            Ok(tokens)
        }
        State::Between => Ok(tokens),
    }
}
