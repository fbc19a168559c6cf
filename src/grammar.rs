//! 文法検証: 入力行が実行可能な形かどうかを副作用なしで判定する。
//!
//! ```text
//! line     := group ( sep group )* "&"?
//! sep      := ";" | "&&" | "&"
//! group    := stage ( "|" stage )*
//! stage    := NAME ( NAME | redirect )*
//! redirect := ("<" | ">" | ">>") NAME
//! ```
//!
//! 検証に失敗した行は分解も実行もされない。呼び出し側は `Invalid Syntax!` を表示する。

use crate::error::ShellError;
use crate::lexer::{self, Token};

/// トークン列上の再帰下降パーサー。位置を進めるだけで何も構築しない。
struct Validator<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Validator<'t, 'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn line(&mut self) -> bool {
        if !self.group() {
            return false;
        }
        loop {
            match self.peek() {
                Some(Token::Semi) | Some(Token::AndAnd) => {
                    self.bump();
                    if !self.group() {
                        return false;
                    }
                }
                Some(Token::Amp) => {
                    self.bump();
                    // 行末の `&` は直前のグループをバックグラウンドにするだけ
                    if self.at_end() {
                        return true;
                    }
                    if !self.group() {
                        return false;
                    }
                }
                _ => return self.at_end(),
            }
        }
    }

    fn group(&mut self) -> bool {
        if !self.stage() {
            return false;
        }
        while let Some(Token::Pipe) = self.peek() {
            self.bump();
            if !self.stage() {
                return false;
            }
        }
        true
    }

    fn stage(&mut self) -> bool {
        if !matches!(self.peek(), Some(Token::Word(_))) {
            return false;
        }
        self.bump();
        loop {
            match self.peek() {
                Some(Token::Word(_)) => self.bump(),
                Some(t) if t.is_redirect() => {
                    self.bump();
                    if !matches!(self.peek(), Some(Token::Word(_))) {
                        return false;
                    }
                    self.bump();
                }
                _ => return true,
            }
        }
    }
}

/// トークン列が文法に適合するか。
pub fn is_valid_tokens(tokens: &[Token<'_>]) -> bool {
    Validator { tokens, pos: 0 }.line()
}

/// 入力行が文法に適合するか。
pub fn is_valid(line: &str) -> bool {
    is_valid_tokens(&lexer::tokenize(line))
}

/// [`is_valid`] の `Result` 版。
pub fn validate(line: &str) -> Result<(), ShellError> {
    if is_valid(line) {
        Ok(())
    } else {
        log::trace!("rejected line: {:?}", line);
        Err(ShellError::Syntax)
    }
}
