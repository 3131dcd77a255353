//! Parser: recursive descent parser for Lucene query strings
//!
//! Consumes tokens from the lexer and produces a [`Query`] AST. The parser
//! fails closed on constructs whose meaning depends on engine defaults:
//! adjacent clauses without an operator, and `AND`/`OR` mixed at one nesting
//! level without parentheses, are both rejected.

use serde::{Deserialize, Serialize};

use crate::ast::{Bound, Pattern, Query, Range, Value};
use crate::errors::{QueryError, QueryResult};
use crate::lexer::{Lexer, Token, TokenKind};

const MAX_DEPTH: usize = 64;

/// Operator usage in a parsed query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCounts {
    pub and: usize,
    pub or: usize,
    pub not: usize,
    pub wildcard: usize,
}

/// Parser output: the AST plus operator statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedQuery {
    pub ast: Query,
    pub operators: OperatorCounts,
}

/// Parser for Lucene query strings
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    counts: OperatorCounts,
}

impl Parser {
    /// Parse a query string into an AST
    pub fn parse(input: &str) -> QueryResult<ParsedQuery> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Self {
            tokens,
            pos: 0,
            depth: 0,
            counts: OperatorCounts::default(),
        };

        if parser.check(TokenKind::Eof) {
            return Err(QueryError::Empty);
        }

        let ast = parser.parse_expr(None)?;
        if !parser.check(TokenKind::Eof) {
            // Only a stray ')' can stop parse_expr before end of input.
            let tok = parser.peek();
            return Err(QueryError::UnexpectedToken {
                found: tok.display_text(),
                position: tok.position,
                expected: "end of query".into(),
            });
        }

        Ok(ParsedQuery {
            ast,
            operators: parser.counts,
        })
    }

    /// Groups and negations share one nesting limit.
    fn descend(&mut self) -> QueryResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let tok = self.peek();
            return Err(QueryError::UnexpectedToken {
                found: tok.display_text(),
                position: tok.position,
                expected: format!("at most {} levels of nesting", MAX_DEPTH),
            });
        }
        Ok(())
    }

    fn parse_expr(&mut self, field: Option<&str>) -> QueryResult<Query> {
        self.descend()?;

        let mut clauses = vec![self.parse_unary(field)?];
        let mut operator: Option<TokenKind> = None;

        loop {
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::And | TokenKind::Or => {
                    if let Some(op) = &operator {
                        if *op != tok.kind {
                            return Err(QueryError::MixedOperators {
                                token: tok.text,
                                position: tok.position,
                            });
                        }
                    }
                    if tok.kind == TokenKind::And {
                        self.counts.and += 1;
                    } else {
                        self.counts.or += 1;
                    }
                    operator = Some(tok.kind);
                    self.advance();
                    clauses.push(self.parse_unary(field)?);
                }
                TokenKind::CloseParen | TokenKind::Eof => break,
                TokenKind::Term
                | TokenKind::Phrase
                | TokenKind::Not
                | TokenKind::OpenParen
                | TokenKind::OpenBracket
                | TokenKind::OpenBrace => {
                    return Err(QueryError::ImplicitOperator {
                        token: tok.display_text(),
                        position: tok.position,
                    });
                }
                _ => {
                    return Err(QueryError::UnexpectedToken {
                        found: tok.display_text(),
                        position: tok.position,
                        expected: "AND, OR or end of clause".into(),
                    });
                }
            }
        }

        self.depth -= 1;
        if clauses.len() == 1 {
            return Ok(clauses.remove(0));
        }
        Ok(match operator {
            Some(TokenKind::Or) => Query::Or { clauses },
            _ => Query::And { clauses },
        })
    }

    fn parse_unary(&mut self, field: Option<&str>) -> QueryResult<Query> {
        if self.check(TokenKind::Not) {
            self.descend()?;
            self.advance();
            self.counts.not += 1;
            let clause = self.parse_unary(field)?;
            self.depth -= 1;
            return Ok(Query::Not {
                clause: Box::new(clause),
            });
        }
        self.parse_primary(field)
    }

    fn parse_primary(&mut self, field: Option<&str>) -> QueryResult<Query> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_expr(field)?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Term if self.peek_kind_at(1) == TokenKind::Colon => {
                if field.is_some() {
                    let colon = &self.tokens[self.pos + 1];
                    return Err(QueryError::UnexpectedToken {
                        found: colon.text.clone(),
                        position: colon.position,
                        expected: "a value inside the field group".into(),
                    });
                }
                let name = field_name(&tok)?;
                self.advance();
                self.advance();
                self.parse_field_value(&name)
            }
            TokenKind::Term => {
                self.advance();
                let value = Value::from_raw_term(&tok.text);
                if value.is_wildcard() {
                    self.counts.wildcard += 1;
                }
                Ok(Query::term(field, value))
            }
            TokenKind::Phrase => {
                self.advance();
                Ok(Query::term(field, Value::Phrase(tok.text)))
            }
            TokenKind::OpenBracket | TokenKind::OpenBrace => match field {
                Some(name) => {
                    let range = self.parse_range()?;
                    Ok(Query::term(Some(name), Value::Range(range)))
                }
                None => Err(QueryError::UnexpectedToken {
                    found: tok.display_text(),
                    position: tok.position,
                    expected: "a field name before a range".into(),
                }),
            },
            TokenKind::Eof => Err(QueryError::UnexpectedEof {
                position: tok.position,
                expected: "a term, phrase or '('".into(),
            }),
            _ => Err(QueryError::UnexpectedToken {
                found: tok.display_text(),
                position: tok.position,
                expected: "a term, phrase or '('".into(),
            }),
        }
    }

    fn parse_field_value(&mut self, name: &str) -> QueryResult<Query> {
        match self.peek_kind() {
            TokenKind::Term
            | TokenKind::Phrase
            | TokenKind::OpenParen
            | TokenKind::OpenBracket
            | TokenKind::OpenBrace => self.parse_primary(Some(name)),
            TokenKind::Eof => Err(QueryError::UnexpectedEof {
                position: self.peek().position,
                expected: format!("a value for field '{}'", name),
            }),
            _ => {
                let tok = self.peek();
                Err(QueryError::UnexpectedToken {
                    found: tok.display_text(),
                    position: tok.position,
                    expected: format!("a value for field '{}'", name),
                })
            }
        }
    }

    fn parse_range(&mut self) -> QueryResult<Range> {
        let open = self.advance().clone();
        let lower_inclusive = open.kind == TokenKind::OpenBracket;
        let lower = self.parse_bound()?;
        self.expect(TokenKind::To)?;
        let upper = self.parse_bound()?;

        let close = self.peek().clone();
        let upper_inclusive = match close.kind {
            TokenKind::CloseBracket => true,
            TokenKind::CloseBrace => false,
            TokenKind::Eof => {
                return Err(QueryError::UnexpectedEof {
                    position: close.position,
                    expected: "']' or '}'".into(),
                })
            }
            _ => {
                return Err(QueryError::UnexpectedToken {
                    found: close.display_text(),
                    position: close.position,
                    expected: "']' or '}'".into(),
                })
            }
        };
        self.advance();

        Ok(Range {
            lower: Bound {
                value: lower,
                inclusive: lower_inclusive,
            },
            upper: Bound {
                value: upper,
                inclusive: upper_inclusive,
            },
        })
    }

    fn parse_bound(&mut self) -> QueryResult<Option<String>> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Term => {
                self.advance();
                if tok.text == "*" {
                    Ok(None)
                } else {
                    Ok(Some(Pattern::from_raw(&tok.text).literal()))
                }
            }
            TokenKind::Phrase => {
                self.advance();
                Ok(Some(tok.text))
            }
            TokenKind::Eof => Err(QueryError::UnexpectedEof {
                position: tok.position,
                expected: "a range bound".into(),
            }),
            _ => Err(QueryError::UnexpectedToken {
                found: tok.display_text(),
                position: tok.position,
                expected: "a range bound".into(),
            }),
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind.clone()
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        self.tokens[idx].kind.clone()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn expect(&mut self, kind: TokenKind) -> QueryResult<&Token> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(QueryError::UnexpectedEof {
                position: self.peek().position,
                expected: format!("'{}'", kind),
            })
        } else {
            let tok = self.peek();
            Err(QueryError::UnexpectedToken {
                found: tok.display_text(),
                position: tok.position,
                expected: format!("'{}'", kind),
            })
        }
    }
}

fn field_name(tok: &Token) -> QueryResult<String> {
    let pattern = Pattern::from_raw(&tok.text);
    if pattern.has_wildcards() {
        return Err(QueryError::InvalidFieldName {
            field: tok.text.clone(),
            position: tok.position,
        });
    }
    Ok(pattern.literal())
}
