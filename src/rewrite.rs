//! Textual rewriting of expressions before they are handed to the storage connector.
//!
//! Every function here works on the token stream, so text inside quoted literals is never
//! touched and only whole identifiers match a keyword.

use crate::lexer::{self, TokenKind};
use crate::parser::{self, ParseError};
use crate::types::DataType;

/// Primitive that decompresses a stored measure.
pub const UNCOMPRESS_PRIMITIVE: &str = "oph_uncompress";

/// Primitive that compresses a produced measure.
pub const COMPRESS_PRIMITIVE: &str = "oph_compress";

/// Bound-parameter placeholder understood by the storage connector.
pub const PLACEHOLDER: &str = "?";

/// Replace every occurrence of `keyword` with `replacement`.
///
/// Returns the new text and the number of replacements.
pub fn replace_keyword(
    expr: &str,
    keyword: &str,
    replacement: &str,
) -> Result<(String, usize), ParseError> {
    let tokens = lexer::tokenize(expr)?;
    let mut result = String::with_capacity(expr.len());
    let mut copied = 0;
    let mut count = 0;
    for token in tokens
        .iter()
        .filter(|token| token.kind == TokenKind::Ident && token.text(expr) == keyword)
    {
        result.push_str(&expr[copied..token.start]);
        result.push_str(replacement);
        copied = token.end;
        count += 1;
    }
    result.push_str(&expr[copied..]);
    Ok((result, count))
}

/// Count the occurrences of `keyword`.
pub fn count_keyword(expr: &str, keyword: &str) -> Result<usize, ParseError> {
    let tokens = lexer::tokenize(expr)?;
    Ok(tokens
        .iter()
        .filter(|token| token.kind == TokenKind::Ident && token.text(expr) == keyword)
        .count())
}

/// Insert `'<type>','<type>',` right after the opening parenthesis of every primitive call.
///
/// # Arguments
///
/// * `expr`: Expression text
/// * `dtype`: Type declared as both input and output of every call
pub fn inject_datatypes(expr: &str, dtype: DataType) -> Result<String, ParseError> {
    let tokens = lexer::tokenize(expr)?;
    let sites = parser::call_sites(expr, &tokens)?;
    let mut result = String::with_capacity(expr.len() + sites.len() * 32);
    let mut copied = 0;
    for site in sites {
        let open = tokens[site + 1];
        let empty = tokens
            .get(site + 2)
            .map_or(false, |next| next.kind == TokenKind::Close);
        result.push_str(&expr[copied..open.end]);
        result.push_str(&format!("'{dtype}','{dtype}'"));
        if !empty {
            result.push(',');
        }
        copied = open.end;
    }
    result.push_str(&expr[copied..]);
    Ok(result)
}

/// Wrap an expression in a call to `primitive` with empty type arguments.
fn wrap(primitive: &str, expr: &str) -> String {
    format!("{primitive}('','',{expr})")
}

/// Options for [rewrite_measure].
#[derive(Clone, Copy, Debug)]
pub struct MeasureRewrite<'a> {
    /// Keyword standing for the measure
    pub measure_keyword: &'a str,
    /// Keyword standing for the dimension values
    pub dimension_keyword: &'a str,
    /// Whether the stored measure is compressed
    pub input_compressed: bool,
    /// Whether the produced measure must be compressed
    pub output_compressed: bool,
}

/// Result of [rewrite_measure].
#[derive(Clone, Debug, PartialEq)]
pub struct RewrittenQuery {
    /// Final text handed to the storage connector
    pub query: String,
    /// Number of dimension placeholders, each bound to the dimension array
    pub dim_ref_count: usize,
}

/// Rewrite a measure expression into the text run against each fragment.
///
/// * the measure keyword is wrapped in a decompression call if the input is compressed;
/// * the dimension keyword becomes a bound-parameter placeholder;
/// * the whole result is wrapped in a compression call if the output is compressed.
pub fn rewrite_measure(
    expr: &str,
    options: &MeasureRewrite,
) -> Result<RewrittenQuery, ParseError> {
    let mut query = expr.to_string();
    if options.input_compressed {
        let uncompressed = wrap(UNCOMPRESS_PRIMITIVE, options.measure_keyword);
        (query, _) = replace_keyword(&query, options.measure_keyword, &uncompressed)?;
    }
    let (mut query, dim_ref_count) =
        replace_keyword(&query, options.dimension_keyword, PLACEHOLDER)?;
    if options.output_compressed {
        query = wrap(COMPRESS_PRIMITIVE, &query);
    }
    Ok(RewrittenQuery {
        query,
        dim_ref_count,
    })
}
