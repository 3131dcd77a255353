//! Lexer: tokenizes Lucene query strings
//!
//! Produces a stream of tokens that the parser consumes. Handles bare terms
//! (with `*`/`?` wildcards and backslash escapes), quoted phrases, boolean
//! keywords and their symbolic forms, grouping and range brackets.

use crate::errors::{QueryError, QueryResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// Raw text for terms (escapes kept), unescaped content for phrases
    pub text: String,
    /// 0-based character offset in the query
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    /// Text to show in an error message.
    pub fn display_text(&self) -> String {
        match self.kind {
            TokenKind::Eof => "<end of query>".to_string(),
            TokenKind::Phrase => format!("\"{}\"", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Token types
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Operators
    And,
    Or,
    Not,
    To,

    // Values
    Term,
    Phrase,

    // Structural
    Colon,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,

    // End of input
    Eof,
}

impl TokenKind {
    pub fn is_binary_operator(&self) -> bool {
        matches!(self, TokenKind::And | TokenKind::Or)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
            Self::To => write!(f, "TO"),
            Self::Term => write!(f, "term"),
            Self::Phrase => write!(f, "quoted phrase"),
            Self::Colon => write!(f, ":"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::OpenBracket => write!(f, "["),
            Self::CloseBracket => write!(f, "]"),
            Self::OpenBrace => write!(f, "{{"),
            Self::CloseBrace => write!(f, "}}"),
            Self::Eof => write!(f, "end of query"),
        }
    }
}

/// Lexer for Lucene query strings
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    /// Create a new lexer from a query string
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> QueryResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.pos));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> QueryResult<Token> {
        let ch = self.input[self.pos];
        let start = self.pos;

        let single = |kind: TokenKind| Token::new(kind, ch.to_string(), start);
        match ch {
            '(' => {
                self.pos += 1;
                Ok(single(TokenKind::OpenParen))
            }
            ')' => {
                self.pos += 1;
                Ok(single(TokenKind::CloseParen))
            }
            '[' => {
                self.pos += 1;
                Ok(single(TokenKind::OpenBracket))
            }
            ']' => {
                self.pos += 1;
                Ok(single(TokenKind::CloseBracket))
            }
            '{' => {
                self.pos += 1;
                Ok(single(TokenKind::OpenBrace))
            }
            '}' => {
                self.pos += 1;
                Ok(single(TokenKind::CloseBrace))
            }
            ':' => {
                self.pos += 1;
                Ok(single(TokenKind::Colon))
            }
            '!' => {
                self.pos += 1;
                Ok(single(TokenKind::Not))
            }
            '&' | '|' => {
                if self.peek_at(1) == Some(ch) {
                    self.pos += 2;
                    let kind = if ch == '&' {
                        TokenKind::And
                    } else {
                        TokenKind::Or
                    };
                    Ok(Token::new(kind, format!("{}{}", ch, ch), start))
                } else {
                    Err(QueryError::UnexpectedToken {
                        found: ch.to_string(),
                        position: start,
                        expected: format!("'{}{}'", ch, ch),
                    })
                }
            }
            '+' | '-' if !self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                Err(QueryError::UnexpectedToken {
                    found: ch.to_string(),
                    position: start,
                    expected: "AND, OR or NOT instead of a prefix operator".into(),
                })
            }
            '"' => self.read_phrase(),
            _ => self.read_term(),
        }
    }

    fn read_phrase(&mut self) -> QueryResult<Token> {
        let start = self.pos;
        self.pos += 1; // skip opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != '"' {
            if self.input[self.pos] == '\\' {
                match self.peek_at(1) {
                    Some(escaped) => {
                        text.push(escaped);
                        self.pos += 2;
                    }
                    None => return Err(QueryError::DanglingEscape { position: self.pos }),
                }
            } else {
                text.push(self.input[self.pos]);
                self.pos += 1;
            }
        }

        if self.pos >= self.input.len() {
            return Err(QueryError::UnterminatedPhrase { position: start });
        }

        self.pos += 1; // skip closing quote
        Ok(Token::new(TokenKind::Phrase, text, start))
    }

    fn read_term(&mut self) -> QueryResult<Token> {
        let start = self.pos;
        let mut text = String::new();

        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch == '\\' {
                match self.peek_at(1) {
                    Some(escaped) => {
                        text.push('\\');
                        text.push(escaped);
                        self.pos += 2;
                        continue;
                    }
                    None => return Err(QueryError::DanglingEscape { position: self.pos }),
                }
            }
            if ch.is_whitespace() || is_structural(ch) || self.at_symbolic_operator() {
                break;
            }
            if is_reserved(ch) {
                return Err(QueryError::ReservedSyntax {
                    token: ch.to_string(),
                    position: self.pos,
                });
            }
            text.push(ch);
            self.pos += 1;
        }

        let kind = match text.as_str() {
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "NOT" => TokenKind::Not,
            "TO" => TokenKind::To,
            _ => TokenKind::Term,
        };

        Ok(Token::new(kind, text, start))
    }

    fn at_symbolic_operator(&self) -> bool {
        matches!(
            (self.peek_at(0), self.peek_at(1)),
            (Some('&'), Some('&')) | (Some('|'), Some('|'))
        )
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}

fn is_structural(ch: char) -> bool {
    matches!(ch, '(' | ')' | '[' | ']' | '{' | '}' | ':' | '"')
}

/// Lucene operators with no counterpart in the AST: fuzzy `~`, boost `^`,
/// regex `/.../` and the `>`, `<`, `=` comparisons.
fn is_reserved(ch: char) -> bool {
    matches!(ch, '~' | '^' | '/' | '>' | '<' | '=')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_field_value_tokens() {
        let tokens = Lexer::new("process.name:vssadmin.exe").tokenize().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Term);
        assert_eq!(tokens[0].text, "process.name");
        assert_eq!(tokens[1].kind, TokenKind::Colon);
        assert_eq!(tokens[1].position, 12);
        assert_eq!(tokens[2].text, "vssadmin.exe");
        assert_eq!(tokens[3].kind, TokenKind::Eof);
        assert_eq!(tokens[3].position, 25);
    }

    #[test]
    fn test_symbolic_operators() {
        assert_eq!(
            kinds("a:1 && !b:2 || c"),
            vec![
                TokenKind::Term,
                TokenKind::Colon,
                TokenKind::Term,
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Term,
                TokenKind::Colon,
                TokenKind::Term,
                TokenKind::Or,
                TokenKind::Term,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_escapes_stay_in_term() {
        let tokens = Lexer::new(r"path:C\:\\Windows\\*").tokenize().unwrap();
        assert_eq!(tokens[2].text, r"C\:\\Windows\\*");
    }

    #[test]
    fn test_phrase_unescapes() {
        let tokens = Lexer::new(r#"msg:"say \"hi\"""#).tokenize().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Phrase);
        assert_eq!(tokens[2].text, r#"say "hi""#);
    }

    #[test]
    fn test_lowercase_keywords_are_terms() {
        assert_eq!(kinds("and"), vec![TokenKind::Term, TokenKind::Eof]);
    }

    #[test]
    fn test_unterminated_phrase() {
        let err = Lexer::new("msg:\"open").tokenize().unwrap_err();
        assert_eq!(err, QueryError::UnterminatedPhrase { position: 4 });
    }

    #[test]
    fn test_single_ampersand_rejected() {
        let err = Lexer::new("a & b").tokenize().unwrap_err();
        assert_eq!(err.position(), 2);
    }

    #[test]
    fn test_reserved_syntax_rejected_unless_escaped() {
        let cases = [
            ("process.name:cmd.exe~", "~", 20),
            ("process.name:cmd.exe^2", "^", 20),
            ("url.path:/admin.*/", "/", 9),
            ("bytes:>100", ">", 6),
            ("bytes:<=100", "<", 6),
            ("\"some phrase\"~2", "~", 13),
        ];
        for (input, token, position) in cases {
            let err = Lexer::new(input).tokenize().unwrap_err();
            assert_eq!(
                err,
                QueryError::ReservedSyntax {
                    token: token.to_string(),
                    position
                },
                "{}",
                input
            );
        }

        let tokens = Lexer::new(r"url.path:\/admin\/login").tokenize().unwrap();
        assert_eq!(tokens[2].text, r"\/admin\/login");
    }

    #[test]
    fn test_prefix_operator_rejected_but_negative_number_allowed() {
        assert!(Lexer::new("-process.name:x").tokenize().is_err());
        assert!(Lexer::new("code:-1").tokenize().is_ok());
    }
}
