//! Tokenizer for primitive expressions.
//!
//! Expressions are scanned once into a flat list of tokens holding byte offsets into the source
//! text. Quoted literals are single tokens, so parentheses, commas and keywords inside quotes are
//! never seen by the parser or the rewriter.

use crate::parser::ParseError;

/// Deepest allowed nesting of alternating quotes, e.g. `"a 'b' c"`.
const MAX_QUOTE_DEPTH: usize = 2;

/// Kind of a token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// Identifier: a letter or `_` followed by letters, digits or `_`.
    Ident,
    /// Quoted literal, quotes included.
    Literal,
    /// `(`
    Open,
    /// `)`
    Close,
    /// `,`
    Comma,
    /// Any other single character.
    Other,
}

/// A token and its byte span `[start, end)` in the source text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Returns the source text covered by the token.
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

/// Split an expression into tokens.
///
/// # Arguments
///
/// * `expr`: Expression text
pub fn tokenize(expr: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '(' => TokenKind::Open,
            ')' => TokenKind::Close,
            ',' => TokenKind::Comma,
            '\'' | '"' => {
                scan_literal(c, start, &mut chars)?;
                TokenKind::Literal
            }
            c if c.is_alphabetic() || c == '_' => {
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                TokenKind::Ident
            }
            _ => TokenKind::Other,
        };
        let end = chars.peek().map_or(expr.len(), |&(index, _)| index);
        tokens.push(Token { kind, start, end });
    }
    Ok(tokens)
}

/// Consume a quoted literal whose opening quote has already been read.
///
/// A quote equal to the innermost open one closes it, the other kind opens a nested level.
fn scan_literal<I>(
    opening: char,
    position: usize,
    chars: &mut std::iter::Peekable<I>,
) -> Result<(), ParseError>
where
    I: Iterator<Item = (usize, char)>,
{
    let mut stack = vec![opening];
    for (index, c) in chars.by_ref() {
        if c != '\'' && c != '"' {
            continue;
        }
        if stack.last() == Some(&c) {
            stack.pop();
            if stack.is_empty() {
                return Ok(());
            }
        } else if stack.len() < MAX_QUOTE_DEPTH {
            stack.push(c);
        } else {
            return Err(ParseError::Quote { position: index });
        }
    }
    Err(ParseError::Quote { position })
}

/// Check that every `(` has a matching `)`.
pub fn check_balance(tokens: &[Token]) -> Result<(), ParseError> {
    let mut open = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Open => open.push(token.start),
            TokenKind::Close => {
                if open.pop().is_none() {
                    return Err(ParseError::Unbalanced {
                        position: token.start,
                    });
                }
            }
            _ => (),
        }
    }
    match open.pop() {
        Some(position) => Err(ParseError::Unbalanced { position }),
        None => Ok(()),
    }
}

/// Returns the index of the `)` token matching the `(` token at `open`.
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0_usize;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Open => depth += 1,
            TokenKind::Close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => (),
        }
    }
    None
}
