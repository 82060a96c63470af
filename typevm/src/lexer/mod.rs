//! Lexer implementation using logos

mod token;

pub use token::Token;

use crate::ast::Span;
use crate::error::{CompileError, Result};
use logos::Logos;

/// Tokenize source code
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => {
                return Err(CompileError::lexer(
                    format!("unexpected character: {:?}", lexer.slice()),
                    span,
                ));
            }
        }
    }

    Ok(tokens)
}

/// Tokenize a fragment that starts at byte `offset` of the enclosing source.
pub fn tokenize_at(fragment: &str, offset: usize) -> Result<Vec<(Token, Span)>> {
    match tokenize(fragment) {
        Ok(tokens) => Ok(tokens
            .into_iter()
            .map(|(token, span)| (token, span.shift(offset)))
            .collect()),
        Err(CompileError::Lexer { message, span }) => {
            Err(CompileError::lexer(message, span.shift(offset)))
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_keywords_and_idents() {
        assert_eq!(
            kinds("type function const class extends string"),
            vec![
                Token::Type,
                Token::Function,
                Token::Const,
                Token::Class,
                Token::Extends,
                Token::Ident("string".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_keyword_prefix_is_ident() {
        assert_eq!(kinds("types"), vec![Token::Ident("types".to_string())]);
    }

    #[test]
    fn test_tokenize_number_and_bigint() {
        assert_eq!(
            kinds("42 1.5 10n"),
            vec![
                Token::NumberLit("42".to_string()),
                Token::NumberLit("1.5".to_string()),
                Token::BigIntLit("10".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_strings() {
        assert_eq!(
            kinds(r#""a\"b" 'c'"#),
            vec![Token::StringLit("a\"b".to_string()), Token::StringLit("c".to_string())]
        );
    }

    #[test]
    fn test_tokenize_template() {
        let tokens = tokenize("`a${T}b`").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].0, Token::Template("a${T}b".to_string()));
        assert_eq!(tokens[0].1, Span::new(0, 8));
    }

    #[test]
    fn test_tokenize_punctuation() {
        assert_eq!(
            kinds("... => | ? :"),
            vec![Token::Ellipsis, Token::FatArrow, Token::Pipe, Token::Question, Token::Colon]
        );
    }

    #[test]
    fn test_tokenize_nested_generics_close_separately() {
        assert_eq!(
            kinds("A<B<C>>"),
            vec![
                Token::Ident("A".to_string()),
                Token::Lt,
                Token::Ident("B".to_string()),
                Token::Lt,
                Token::Ident("C".to_string()),
                Token::Gt,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn test_tokenize_skips_comments() {
        assert_eq!(kinds("// line\n/* block */ a"), vec![Token::Ident("a".to_string())]);
    }

    #[test]
    fn test_tokenize_error_span() {
        let err = tokenize("type A = #").unwrap_err();
        assert_eq!(err.span(), Some(Span::new(9, 10)));
    }

    #[test]
    fn test_tokenize_at_shifts_spans() {
        let tokens = tokenize_at("T", 12).unwrap();
        assert_eq!(tokens[0].1, Span::new(12, 13));
    }
}
