//! Message predicates: plain substring, or a small boolean grammar.
//!
//! ```text
//! or    := and ( "OR" and )*
//! and   := unary ( ["AND"] unary )*        adjacent terms AND implicitly
//! unary := "NOT" unary | primary
//! primary := term | "\"phrase\"" | "(" or ")"
//! ```
//!
//! The grammar only engages when the query contains an upper-case `AND`,
//! `OR` or `NOT` keyword, a parenthesis or a double quote. Anything else,
//! including a query the grammar rejects or one nested deeper than
//! [`MAX_DEPTH`], is matched as one case-insensitive substring.

/// Deepest nesting of parentheses and `NOT`s the grammar accepts.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageQuery {
    /// Lower-cased needle.
    Substring(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Lower-cased term.
    Term(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Term(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl MessageQuery {
    /// `None` for an empty or whitespace-only query.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let tokens = tokenize(input);
        let uses_grammar =
            input.contains('"') || tokens.iter().any(|t| !matches!(t, Token::Term(_)));
        if uses_grammar {
            let mut parser = Parser { tokens: &tokens, pos: 0, depth: 0 };
            if let Some(expr) = parser.parse_or() {
                if parser.pos == tokens.len() {
                    return Some(MessageQuery::Expr(expr));
                }
            }
            tracing::debug!(query = input, "query grammar rejected; using substring match");
        }
        Some(MessageQuery::Substring(input.to_lowercase()))
    }

    /// Case-insensitive match against `text`.
    pub fn matches(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        match self {
            MessageQuery::Substring(needle) => haystack.contains(needle.as_str()),
            MessageQuery::Expr(expr) => expr.eval(&haystack),
        }
    }
}

impl Expr {
    fn eval(&self, haystack: &str) -> bool {
        match self {
            Expr::Term(term) => haystack.contains(term.as_str()),
            Expr::Not(inner) => !inner.eval(haystack),
            Expr::And(parts) => parts.iter().all(|p| p.eval(haystack)),
            Expr::Or(parts) => parts.iter().any(|p| p.eval(haystack)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let phrase: String = chars.by_ref().take_while(|&c| c != '"').collect();
                if !phrase.is_empty() {
                    tokens.push(Token::Term(phrase.to_lowercase()));
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Term(word.to_lowercase()),
                });
            }
        }
    }
    tokens
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn descend(&mut self) -> Option<()> {
        self.depth += 1;
        (self.depth <= MAX_DEPTH).then_some(())
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Some(if parts.len() == 1 { parts.remove(0) } else { Expr::Or(parts) })
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut parts = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    parts.push(self.parse_unary()?);
                }
                Some(Token::Term(_) | Token::Not | Token::LParen) => {
                    parts.push(self.parse_unary()?);
                }
                _ => break,
            }
        }
        Some(if parts.len() == 1 { parts.remove(0) } else { Expr::And(parts) })
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Some(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        match self.peek()?.clone() {
            Token::Term(term) => {
                self.pos += 1;
                Some(Expr::Term(term))
            }
            Token::LParen => {
                self.pos += 1;
                self.descend()?;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return None;
                }
                self.pos += 1;
                self.depth -= 1;
                Some(inner)
            }
            Token::And | Token::Or | Token::Not | Token::RParen => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn q(input: &str) -> MessageQuery {
        MessageQuery::parse(input).unwrap()
    }

    #[test]
    fn empty_query_is_none() {
        assert!(MessageQuery::parse("  ").is_none());
    }

    #[test]
    fn plain_text_is_a_single_substring() {
        assert_eq!(q("Connection Refused"), MessageQuery::Substring("connection refused".into()));
        assert!(q("connection refused").matches("ERROR: Connection refused by peer"));
        assert!(!q("connection refused").matches("refused connection"));
    }

    #[test]
    fn lower_case_keywords_are_plain_text() {
        assert!(matches!(q("cats and dogs"), MessageQuery::Substring(_)));
    }

    #[rstest]
    #[case("timeout AND db", "db timeout after 30s", true)]
    #[case("timeout AND db", "timeout talking to cache", false)]
    #[case("timeout OR refused", "connection refused", true)]
    #[case("NOT healthz", "GET /healthz 200", false)]
    #[case("NOT healthz", "GET /users 200", true)]
    #[case("error NOT retry", "error: giving up", true)]
    #[case("error NOT retry", "error: will retry", false)]
    #[case("(db OR cache) AND timeout", "cache timeout", true)]
    #[case("(db OR cache) AND timeout", "queue timeout", false)]
    #[case("\"connection reset\" OR eof", "Connection reset by peer", true)]
    #[case("a OR b AND c", "a", true)]
    #[case("a OR b AND c", "b", false)]
    fn grammar_cases(#[case] query: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(q(query).matches(text), expected, "{query} vs {text}");
    }

    #[test]
    fn malformed_grammar_falls_back_to_substring() {
        let query = q("timeout AND");
        assert_eq!(query, MessageQuery::Substring("timeout and".into()));
        assert!(query.matches("TIMEOUT AND more"));
        assert!(matches!(q("(unbalanced"), MessageQuery::Substring(_)));
    }

    #[test]
    fn precedence_not_over_and_over_or() {
        assert_eq!(
            q("a OR NOT b c"),
            MessageQuery::Expr(Expr::Or(vec![
                Expr::Term("a".into()),
                Expr::And(vec![Expr::Not(Box::new(Expr::Term("b".into()))), Expr::Term("c".into())]),
            ]))
        );
    }

    #[test]
    fn quoted_phrase_alone_matches_without_quotes() {
        let query = q("\"Connection Reset\"");
        assert_eq!(query, MessageQuery::Expr(Expr::Term("connection reset".into())));
        assert!(query.matches("read: connection reset by peer"));
        assert!(!query.matches("connection was reset"));
    }

    fn nested(depth: usize) -> String {
        format!("{}a{}", "(".repeat(depth), ")".repeat(depth))
    }

    #[rstest]
    #[case(nested(MAX_DEPTH), true)]
    #[case(nested(MAX_DEPTH + 1), false)]
    #[case(nested(20_000), false)]
    #[case(format!("{}a", "NOT ".repeat(20_000)), false)]
    fn nesting_is_capped(#[case] input: String, #[case] uses_grammar: bool) {
        let query = q(&input);
        assert_eq!(matches!(query, MessageQuery::Expr(_)), uses_grammar, "depth cap");
        if !uses_grammar {
            assert_eq!(query, MessageQuery::Substring(input.to_lowercase()));
        }
    }

    #[test]
    fn deep_nesting_falls_back_on_a_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| MessageQuery::parse(&nested(20_000)))
            .unwrap();
        assert!(matches!(handle.join().unwrap(), Some(MessageQuery::Substring(_))));
    }
}
