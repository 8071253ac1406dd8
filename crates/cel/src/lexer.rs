//! Tokenizer for the CEL expression subset.

use crate::error::Issue;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Unsigned magnitude of a decimal/hex literal; sign folding happens in the parser.
    Int(u64),
    Uint(u64),
    Double(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    /// Byte offset into the source.
    pub pos: usize,
}

const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "else", "for", "function", "if", "import", "let", "loop", "package",
    "namespace", "return", "var", "void", "while",
];

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self { Self { src, bytes: src.as_bytes(), pos: 0 } }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Issue> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let Some(c) = self.peek() else {
                out.push(Token { tok: Tok::Eof, pos: start });
                return Ok(out);
            };
            let tok = match c {
                b'0'..=b'9' => self.number()?,
                b'.' if self.peek_at(1).map_or(false, |d| d.is_ascii_digit()) => self.number()?,
                b'"' | b'\'' => self.string(false)?,
                b'r' | b'R' if matches!(self.peek_at(1), Some(b'"') | Some(b'\'')) => {
                    self.pos += 1;
                    self.string(true)?
                }
                b'b' | b'B' if matches!(self.peek_at(1), Some(b'"') | Some(b'\'')) => {
                    return Err(Issue::at(self.src, start, "Syntax error: bytes literals are not supported"));
                }
                c if c == b'_' || c.is_ascii_alphabetic() => self.ident()?,
                _ => self.punct()?,
            };
            out.push(Token { tok, pos: start });
        }
    }

    fn peek(&self) -> Option<u8> { self.bytes.get(self.pos).copied() }
    fn peek_at(&self, n: usize) -> Option<u8> { self.bytes.get(self.pos + n).copied() }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else if c == b'/' && self.peek_at(1) == Some(b'/') {
                while let Some(c) = self.peek() {
                    if c == b'\n' { break; }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> Result<Tok, Issue> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() { self.pos += 1; } else { break; }
        }
        let word = &self.src[start..self.pos];
        Ok(match word {
            "true" => Tok::True,
            "false" => Tok::False,
            "null" => Tok::Null,
            "in" => Tok::In,
            w if RESERVED.contains(&w) => {
                return Err(Issue::at(self.src, start, format!("Syntax error: reserved identifier: {}", w)));
            }
            w => Tok::Ident(w.to_string()),
        })
    }

    fn number(&mut self) -> Result<Tok, Issue> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits = self.pos;
            while self.peek().map_or(false, |c| c.is_ascii_hexdigit()) { self.pos += 1; }
            let v = u64::from_str_radix(&self.src[digits..self.pos], 16)
                .map_err(|_| Issue::at(self.src, start, "Syntax error: invalid hex literal"))?;
            return Ok(self.int_suffix(v));
        }
        let mut is_double = false;
        while self.peek().map_or(false, |c| c.is_ascii_digit()) { self.pos += 1; }
        if self.peek() == Some(b'.') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            is_double = true;
            self.pos += 1;
            while self.peek().map_or(false, |c| c.is_ascii_digit()) { self.pos += 1; }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) { self.pos += 1; }
            if self.peek().map_or(false, |c| c.is_ascii_digit()) {
                is_double = true;
                while self.peek().map_or(false, |c| c.is_ascii_digit()) { self.pos += 1; }
            } else {
                self.pos = save;
            }
        }
        let text = &self.src[start..self.pos];
        if is_double {
            let v = text.parse::<f64>().map_err(|_| Issue::at(self.src, start, "Syntax error: invalid double literal"))?;
            return Ok(Tok::Double(v));
        }
        let v = text.parse::<u64>().map_err(|_| Issue::at(self.src, start, "Syntax error: integer literal out of range"))?;
        Ok(self.int_suffix(v))
    }

    fn int_suffix(&mut self, v: u64) -> Tok {
        if matches!(self.peek(), Some(b'u') | Some(b'U')) {
            self.pos += 1;
            Tok::Uint(v)
        } else {
            Tok::Int(v)
        }
    }

    fn string(&mut self, raw: bool) -> Result<Tok, Issue> {
        let start = self.pos;
        let Some(quote) = self.peek() else {
            return Err(Issue::at(self.src, start, "Syntax error: unterminated string"));
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(Issue::at(self.src, start, "Syntax error: unterminated string"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == b'\n' && !triple {
                return Err(Issue::at(self.src, start, "Syntax error: unterminated string"));
            }
            if c == b'\\' && !raw {
                self.pos += 1;
                out.push(self.escape(start)?);
                continue;
            }
            let ch = self.src[self.pos..].chars().next().unwrap_or('\u{FFFD}');
            out.push(ch);
            self.pos += ch.len_utf8();
        }
        Ok(Tok::Str(out))
    }

    fn escape(&mut self, start: usize) -> Result<char, Issue> {
        let bad = |s: &Self| Issue::at(s.src, start, "Syntax error: invalid escape sequence");
        let Some(c) = self.peek() else { return Err(bad(self)) };
        self.pos += 1;
        let simple = match c {
            b'\\' => Some('\\'),
            b'"' => Some('"'),
            b'\'' => Some('\''),
            b'`' => Some('`'),
            b'?' => Some('?'),
            b'n' => Some('\n'),
            b'r' => Some('\r'),
            b't' => Some('\t'),
            b'a' => Some('\u{07}'),
            b'b' => Some('\u{08}'),
            b'f' => Some('\u{0C}'),
            b'v' => Some('\u{0B}'),
            _ => None,
        };
        if let Some(ch) = simple {
            return Ok(ch);
        }
        let (digits, radix) = match c {
            b'x' | b'X' => (2, 16),
            b'u' => (4, 16),
            b'U' => (8, 16),
            b'0'..=b'3' => {
                self.pos -= 1;
                (3, 8)
            }
            _ => return Err(bad(self)),
        };
        let end = self.pos + digits;
        let text = self.src.get(self.pos..end).ok_or_else(|| bad(self))?;
        let code = u32::from_str_radix(text, radix).map_err(|_| bad(self))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| bad(self))
    }

    fn punct(&mut self) -> Result<Tok, Issue> {
        let start = self.pos;
        let two = (self.peek(), self.peek_at(1));
        let (tok, len) = match two {
            (Some(b'='), Some(b'=')) => (Tok::EqEq, 2),
            (Some(b'!'), Some(b'=')) => (Tok::NotEq, 2),
            (Some(b'<'), Some(b'=')) => (Tok::Le, 2),
            (Some(b'>'), Some(b'=')) => (Tok::Ge, 2),
            (Some(b'&'), Some(b'&')) => (Tok::AndAnd, 2),
            (Some(b'|'), Some(b'|')) => (Tok::OrOr, 2),
            (Some(b'('), _) => (Tok::LParen, 1),
            (Some(b')'), _) => (Tok::RParen, 1),
            (Some(b'['), _) => (Tok::LBracket, 1),
            (Some(b']'), _) => (Tok::RBracket, 1),
            (Some(b'{'), _) => (Tok::LBrace, 1),
            (Some(b'}'), _) => (Tok::RBrace, 1),
            (Some(b'.'), _) => (Tok::Dot, 1),
            (Some(b','), _) => (Tok::Comma, 1),
            (Some(b':'), _) => (Tok::Colon, 1),
            (Some(b'?'), _) => (Tok::Question, 1),
            (Some(b'+'), _) => (Tok::Plus, 1),
            (Some(b'-'), _) => (Tok::Minus, 1),
            (Some(b'*'), _) => (Tok::Star, 1),
            (Some(b'/'), _) => (Tok::Slash, 1),
            (Some(b'%'), _) => (Tok::Percent, 1),
            (Some(b'!'), _) => (Tok::Bang, 1),
            (Some(b'<'), _) => (Tok::Lt, 1),
            (Some(b'>'), _) => (Tok::Gt, 1),
            _ => {
                let ch = self.src[start..].chars().next().unwrap_or('?');
                return Err(Issue::at(self.src, start, format!("Syntax error: token recognition error at: '{}'", ch)));
            }
        };
        self.pos += len;
        Ok(tok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new(src).tokenize().expect("ok").into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn lexes_numbers_and_operators() {
        assert_eq!(
            toks("1 + 2u * 0x10 >= 1.5e1"),
            vec![Tok::Int(1), Tok::Plus, Tok::Uint(2), Tok::Star, Tok::Int(16), Tok::Ge, Tok::Double(15.0), Tok::Eof]
        );
    }

    #[test]
    fn lexes_string_forms() {
        assert_eq!(toks(r#""a\tb""#), vec![Tok::Str("a\tb".into()), Tok::Eof]);
        assert_eq!(toks(r#"r'^1\.(14|15)\.\d+$'"#), vec![Tok::Str(r"^1\.(14|15)\.\d+$".into()), Tok::Eof]);
        assert_eq!(toks("'''x\n'y'''"), vec![Tok::Str("x\n'y".into()), Tok::Eof]);
        assert_eq!(toks(r#"'é\101'"#), vec![Tok::Str("éA".into()), Tok::Eof]);
    }

    #[test]
    fn rejects_reserved_and_unterminated() {
        assert!(Lexer::new("var").tokenize().is_err());
        assert!(Lexer::new("'abc").tokenize().is_err());
        assert!(Lexer::new("a # b").tokenize().is_err());
    }
}
