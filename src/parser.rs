//! Expression parser.
//!
//! Turns an expression such as `oph_sum('oph_double','oph_double',oph_abs(...,measure))` into a
//! [PrimitiveTree]. Only identifiers carrying the primitive prefix are treated as calls; every
//! other token is argument text.

use crate::lexer::{self, Token, TokenKind};
use crate::primitive::{PrimitiveCall, PrimitiveTree};
use crate::types::TYPE_PREFIX;

use thiserror::Error;

/// Primitives used internally by the framework. They may not appear in user expressions.
pub const RESERVED_PRIMITIVES: [&str; 6] = [
    "oph_compress",
    "oph_uncompress",
    "oph_id",
    "oph_id2",
    "oph_id_to_index",
    "oph_id_to_index2",
];

/// Expression syntax error
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    /// Expression contains no tokens
    #[error("expression is empty")]
    Empty,

    /// A primitive name without an argument list
    #[error("primitive {name} at position {position} must be followed by '('")]
    UnexpectedBrace { name: String, position: usize },

    /// Parenthesis without a partner
    #[error("unbalanced parenthesis at position {position}")]
    Unbalanced { position: usize },

    /// Mixed, unterminated or too deeply nested quotes
    #[error("invalid quoting at position {position}")]
    Quote { position: usize },

    /// Empty argument in an argument list
    #[error("primitive {name} has {parsed} arguments but {expected} were delimited")]
    ArgumentCountMismatch {
        name: String,
        expected: usize,
        parsed: usize,
    },

    /// Framework-internal primitive used in an expression
    #[error("primitive {name} is reserved")]
    ReservedPrimitive { name: String },
}

/// Whether `name` carries the primitive/type prefix.
pub fn has_prefix(name: &str) -> bool {
    name.get(..TYPE_PREFIX.len())
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(TYPE_PREFIX))
        && name.len() > TYPE_PREFIX.len()
}

/// Whether `name` is a reserved primitive.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_PRIMITIVES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Strip quote characters and surrounding whitespace from an argument.
pub fn unquote(param: &str) -> String {
    param
        .chars()
        .filter(|c| *c != '\'' && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Returns the token indices of all primitive names, checking each is followed by `(`.
pub(crate) fn call_sites(expr: &str, tokens: &[Token]) -> Result<Vec<usize>, ParseError> {
    let mut sites = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Ident || !has_prefix(token.text(expr)) {
            continue;
        }
        match tokens.get(index + 1) {
            Some(next) if next.kind == TokenKind::Open => sites.push(index),
            _ => {
                return Err(ParseError::UnexpectedBrace {
                    name: token.text(expr).to_string(),
                    position: token.start,
                })
            }
        }
    }
    Ok(sites)
}

/// Parse an expression into a tree of primitive calls.
///
/// # Arguments
///
/// * `expr`: Expression text
/// * `measure_keyword`: Keyword standing for the measure
/// * `dimension_keyword`: Keyword standing for the dimension values
pub fn parse(
    expr: &str,
    measure_keyword: &str,
    dimension_keyword: &str,
) -> Result<PrimitiveTree, ParseError> {
    let tokens = lexer::tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    lexer::check_balance(&tokens)?;
    let sites = call_sites(expr, &tokens)?;
    if let Some(&reserved) = sites
        .iter()
        .find(|&&site| is_reserved(tokens[site].text(expr)))
    {
        return Err(ParseError::ReservedPrimitive {
            name: tokens[reserved].text(expr).to_string(),
        });
    }

    let parser = Parser {
        src: expr,
        tokens: &tokens,
        measure_keyword,
        dimension_keyword,
    };
    let mut tree = PrimitiveTree::new();
    parser.scan(0, tokens.len(), None, &mut tree)?;
    Ok(tree)
}

struct Parser<'a> {
    src: &'a str,
    tokens: &'a [Token],
    measure_keyword: &'a str,
    dimension_keyword: &'a str,
}

impl Parser<'_> {
    /// Find calls in tokens `[from, to)` and add them, and their nested calls, to the tree.
    fn scan(
        &self,
        from: usize,
        to: usize,
        parent: Option<usize>,
        tree: &mut PrimitiveTree,
    ) -> Result<(), ParseError> {
        let mut index = from;
        while index < to {
            let token = self.tokens[index];
            if token.kind != TokenKind::Ident || !has_prefix(token.text(self.src)) {
                index += 1;
                continue;
            }
            let open = index + 1;
            let close = lexer::matching_close(self.tokens, open).ok_or(ParseError::Unbalanced {
                position: self.tokens[open].start,
            })?;
            let name = token.text(self.src);
            let params = self.arguments(name, open, close)?;
            let call = self.call(name, params, parent);
            let position = tree.push(call);
            self.scan(open + 1, close, Some(position), tree)?;
            index = close + 1;
        }
        Ok(())
    }

    /// Split the tokens between `open` and `close` on top-level commas.
    fn arguments(&self, name: &str, open: usize, close: usize) -> Result<Vec<String>, ParseError> {
        if close == open + 1 {
            return Ok(vec![]);
        }
        let mut params = Vec::new();
        let mut delimited = 1;
        let mut depth = 0_usize;
        let mut segment = open + 1;
        for index in open + 1..close {
            match self.tokens[index].kind {
                TokenKind::Open => depth += 1,
                TokenKind::Close => depth -= 1,
                TokenKind::Comma if depth == 0 => {
                    self.push_segment(&mut params, segment, index);
                    delimited += 1;
                    segment = index + 1;
                }
                _ => (),
            }
        }
        self.push_segment(&mut params, segment, close);
        if params.len() < delimited {
            return Err(ParseError::ArgumentCountMismatch {
                name: name.to_string(),
                expected: delimited,
                parsed: params.len(),
            });
        }
        Ok(params)
    }

    fn push_segment(&self, params: &mut Vec<String>, from: usize, to: usize) {
        if from < to {
            let start = self.tokens[from].start;
            let end = self.tokens[to - 1].end;
            params.push(self.src[start..end].to_string());
        }
    }

    fn call(&self, name: &str, params: Vec<String>, parent: Option<usize>) -> PrimitiveCall {
        let declared = |position: usize| {
            params
                .get(position)
                .map(|param| unquote(param))
                .filter(|param| has_prefix(param))
                .map(|param| param.to_ascii_lowercase())
        };
        let input_datatype = declared(0);
        let output_datatype = declared(1);
        let check_datatype = params
            .iter()
            .any(|param| param == self.measure_keyword || param == self.dimension_keyword);
        let mut call = PrimitiveCall::new(name, params, parent);
        call.input_datatype = input_datatype;
        call.output_datatype = output_datatype;
        call.check_datatype = check_datatype;
        call
    }
}
