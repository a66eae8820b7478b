//! Tokenizer for CIL source text.
//!
//! The lexer walks the whole buffer and hands out one [`Token`] at a time.
//! Comments run from `;` to the end of the line; `;;*` at the start of a
//! line introduces a high-level-language line mark instead. Quoted strings
//! keep their quotes so the parser can tell them apart from symbols.

/// Kinds of token produced by [`Lexer::next_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    Symbol,
    QString,
    Comment,
    HllLineMark,
    Newline,
    Eof,
    Unknown,
}

/// One token. `line` is the line counter after the token was consumed, so
/// a newline token already reports the following line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub value: &'a str,
    pub line: u32,
}

const LINE_MARK: &str = ";;*";

fn is_symbol_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"[]./@=*-_$%+!|&^:~`#{}'<>?,".contains(&b)
}

/// Restartable tokenizer over one compilation unit.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || matches!(self.bytes()[self.pos - 1], b'\n' | b'\r')
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(u8) -> bool) -> &'a str {
        let bytes = self.bytes();
        let mut end = start;
        while end < bytes.len() && pred(bytes[end]) {
            end += 1;
        }
        self.pos = end;
        &self.src[start..end]
    }

    fn token(&self, kind: TokenKind, value: &'a str) -> Token<'a> {
        Token {
            kind,
            value,
            line: self.line,
        }
    }

    /// Returns the next token; after the end of input it keeps returning `Eof`.
    pub fn next_token(&mut self) -> Token<'a> {
        let bytes = self.bytes();
        while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b'\t') {
            self.pos += 1;
        }
        let start = self.pos;
        let Some(&b) = bytes.get(start) else {
            return self.token(TokenKind::Eof, "");
        };

        match b {
            b'\n' | b'\r' => {
                self.pos += 1;
                if b == b'\r' && bytes.get(self.pos) == Some(&b'\n') {
                    self.pos += 1;
                }
                self.line += 1;
                self.token(TokenKind::Newline, &self.src[start..self.pos])
            }
            b'(' => {
                self.pos += 1;
                self.token(TokenKind::OpenParen, "(")
            }
            b')' => {
                self.pos += 1;
                self.token(TokenKind::CloseParen, ")")
            }
            b';' if self.at_line_start() && self.src[start..].starts_with(LINE_MARK) => {
                self.pos += LINE_MARK.len();
                self.token(TokenKind::HllLineMark, LINE_MARK)
            }
            b';' => {
                let value = self.take_while(start, |c| !matches!(c, b'\n' | b'\r'));
                self.token(TokenKind::Comment, value)
            }
            b'"' => {
                let body = &bytes[start + 1..];
                match body.iter().position(|&c| matches!(c, b'"' | b'\n' | b'\0')) {
                    Some(end) if body[end] == b'"' => {
                        self.pos = start + end + 2;
                        self.token(TokenKind::QString, &self.src[start..self.pos])
                    }
                    _ => self.unknown(start),
                }
            }
            c if is_symbol_byte(c) => {
                let value = self.take_while(start, is_symbol_byte);
                self.token(TokenKind::Symbol, value)
            }
            _ => self.unknown(start),
        }
    }

    fn unknown(&mut self, start: usize) -> Token<'a> {
        let width = self.src[start..].chars().next().map_or(1, char::len_utf8);
        self.pos = start + width;
        self.token(TokenKind::Unknown, &self.src[start..self.pos])
    }
}

/// Collects every token up to and including `Eof`.
pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_statement() {
        use TokenKind::*;
        assert_eq!(
            kinds("(allow t self (file (read)))\n"),
            vec![
                OpenParen, Symbol, Symbol, Symbol, OpenParen, Symbol, OpenParen, Symbol,
                CloseParen, CloseParen, CloseParen, Newline, Eof
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let tokens = tokenize("(a) ; trailing (b)\n(c)");
        let comment = tokens.iter().find(|t| t.kind == TokenKind::Comment).unwrap();
        assert_eq!(comment.value, "; trailing (b)");
        assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::OpenParen).count(), 2);
    }

    #[test]
    fn line_marks_only_at_line_start() {
        let tokens = tokenize(";;* lms 10 foo.te\n(a) ;;* not a mark\n");
        assert_eq!(tokens[0].kind, TokenKind::HllLineMark);
        assert_eq!(tokens[1].value, "lms");
        assert!(tokens.iter().skip(1).all(|t| t.kind != TokenKind::HllLineMark));
    }

    #[test]
    fn quoted_strings_keep_quotes() {
        let tokens = tokenize("(filecon \"/usr/bin(/.*)?\" file ctx)");
        assert_eq!(tokens[2].kind, TokenKind::QString);
        assert_eq!(tokens[2].value, "\"/usr/bin(/.*)?\"");
        let empty = tokenize("\"\"");
        assert_eq!(empty[0].kind, TokenKind::QString);
        assert_eq!(empty[0].value, "\"\"");
    }

    #[test]
    fn unterminated_quote_is_unknown() {
        let tokens = tokenize("\"abc\n");
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].value, "\"");
    }

    #[test]
    fn newline_tokens_carry_the_next_line() {
        let tokens = tokenize("a\r\nb\rc\n");
        let lines: Vec<_> = tokens.iter().map(|t| (t.kind, t.line)).collect();
        assert_eq!(lines[0], (TokenKind::Symbol, 1));
        assert_eq!(lines[1], (TokenKind::Newline, 2));
        assert_eq!(lines[2], (TokenKind::Symbol, 2));
        assert_eq!(lines[4], (TokenKind::Symbol, 3));
        assert_eq!(lines[5], (TokenKind::Newline, 4));
    }

    #[test]
    fn invalid_characters_are_unknown() {
        let tokens = tokenize("(a \u{e9})");
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(tokens[2].value, "\u{e9}");
        assert_eq!(tokens[3].kind, TokenKind::CloseParen);
    }

    #[derive(Debug, Clone)]
    enum Piece {
        Open,
        Close,
        Sym(String),
        Quoted(String),
        Comment(String),
    }

    fn piece() -> impl Strategy<Value = Piece> {
        prop_oneof![
            Just(Piece::Open),
            Just(Piece::Close),
            "[a-z][a-z0-9_.-]{0,8}".prop_map(Piece::Sym),
            "[a-z /.*]{0,8}".prop_map(Piece::Quoted),
            "[a-z ()]{0,8}".prop_map(Piece::Comment),
        ]
    }

    proptest! {
        #[test]
        fn meaningful_tokens_round_trip(pieces in proptest::collection::vec(piece(), 0..40)) {
            let mut src = String::new();
            let mut expected = Vec::new();
            for p in &pieces {
                match p {
                    Piece::Open => {
                        src.push('(');
                        expected.push("(".to_string());
                    }
                    Piece::Close => {
                        src.push(')');
                        expected.push(")".to_string());
                    }
                    Piece::Sym(s) => {
                        src.push_str(&format!(" {s} "));
                        expected.push(s.clone());
                    }
                    Piece::Quoted(s) => {
                        src.push_str(&format!(" \"{s}\" "));
                        expected.push(format!("\"{s}\""));
                    }
                    Piece::Comment(c) => src.push_str(&format!(" ;{c}\n")),
                }
            }
            let got: Vec<String> = tokenize(&src)
                .into_iter()
                .filter(|t| {
                    matches!(
                        t.kind,
                        TokenKind::OpenParen | TokenKind::CloseParen | TokenKind::Symbol | TokenKind::QString
                    )
                })
                .map(|t| t.value.to_string())
                .collect();
            prop_assert_eq!(got, expected);
        }
    }
}
