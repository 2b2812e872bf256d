use crate::error::SchemaError;
use logos::Logos;
use std::fmt;

/// Tokens of the content pattern language, e.g. `heading paragraph+ (list | quote)*`
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token<'src> {
    // Node kind or group name
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_-]*", |lex| lex.slice())]
    Name(&'src str),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<usize>().ok())]
    Number(usize),

    #[token("+")]
    Plus,

    #[token("*")]
    Star,

    #[token("?")]
    Question,

    #[token("|")]
    Pipe,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,
}

impl<'src> fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(s) => write!(f, "name '{}'", s),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Plus => write!(f, "+"),
            Token::Star => write!(f, "*"),
            Token::Question => write!(f, "?"),
            Token::Pipe => write!(f, "|"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
        }
    }
}

/// Tokenize a content pattern. Unlike the lenient lexers used for source
/// text, an unknown character is an error: a pattern is either well formed
/// or rejected when the schema is built.
pub fn tokenize(source: &str) -> Result<Vec<(Token<'_>, std::ops::Range<usize>)>, SchemaError> {
    Token::lexer(source)
        .spanned()
        .map(|(result, span)| match result {
            Ok(token) => Ok((token, span)),
            Err(()) => Err(SchemaError::Lexer {
                pattern: source.to_string(),
                pos: span.start,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_quantifiers() {
        let tokens = tokenize("heading paragraph+ list_item* code-block?").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|(t, _)| t).collect();

        assert_eq!(
            kinds,
            vec![
                Token::Name("heading"),
                Token::Name("paragraph"),
                Token::Plus,
                Token::Name("list_item"),
                Token::Star,
                Token::Name("code-block"),
                Token::Question,
            ]
        );
    }

    #[test]
    fn test_ranges_and_groups() {
        let tokens = tokenize("(a | b){2,3}").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|(t, _)| t).collect();

        assert_eq!(
            kinds,
            vec![
                Token::LParen,
                Token::Name("a"),
                Token::Pipe,
                Token::Name("b"),
                Token::RParen,
                Token::LBrace,
                Token::Number(2),
                Token::Comma,
                Token::Number(3),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_unknown_character_is_error() {
        let err = tokenize("block & inline").unwrap_err();
        assert!(matches!(err, SchemaError::Lexer { pos: 6, .. }));
    }
}
