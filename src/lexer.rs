//! 文法検証とコマンド構築で共有するトークナイザ。
//!
//! 区別するのは演算子（`|`, `&`, `&&`, `<`, `>`, `>>`, `;`）とそれ以外のワードだけ。
//! ワードは空白と演算子文字を含まない最長の連続部分で、入力をそのまま借用する（ゼロコピー）。
//! クォートは演算子も空白も保護しない。クォート除去は [`parser`](crate::parser) の仕事。

/// トークン。ワードは入力文字列のスライス。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Word(&'a str),
    Pipe,      // |
    Amp,       // &
    AndAnd,    // &&
    Less,      // <
    Great,     // >
    GreatGreat, // >>
    Semi,      // ;
}

impl Token<'_> {
    /// リダイレクト演算子（`<`, `>`, `>>`）か。
    pub fn is_redirect(&self) -> bool {
        matches!(self, Token::Less | Token::Great | Token::GreatGreat)
    }
}

/// 演算子の先頭になりうる文字か。
fn is_operator_byte(b: u8) -> bool {
    matches!(b, b'|' | b'&' | b'<' | b'>' | b';')
}

/// 入力文字列をトークン列に変換するイテレータ。
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + offset).copied()
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace();
        let b = self.peek_at(0)?;

        // 2 文字演算子を先に判定する
        let (token, width) = match (b, self.peek_at(1)) {
            (b'&', Some(b'&')) => (Token::AndAnd, 2),
            (b'>', Some(b'>')) => (Token::GreatGreat, 2),
            (b'|', _) => (Token::Pipe, 1),
            (b'&', _) => (Token::Amp, 1),
            (b'<', _) => (Token::Less, 1),
            (b'>', _) => (Token::Great, 1),
            (b';', _) => (Token::Semi, 1),
            _ => {
                let bytes = self.input.as_bytes();
                let start = self.pos;
                while self.pos < bytes.len()
                    && !bytes[self.pos].is_ascii_whitespace()
                    && !is_operator_byte(bytes[self.pos])
                {
                    self.pos += 1;
                }
                return Some(Token::Word(&self.input[start..self.pos]));
            }
        };
        self.pos += width;
        Some(token)
    }
}

/// 入力全体をトークン化する。
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    Lexer::new(input).collect()
}
