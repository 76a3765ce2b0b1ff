/// A token yielded by [`WordStrBuf`]: the token text plus how many
/// delimiter characters followed it on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub trailing: usize,
}

/// The line buffer the outer interpreter reads tokens from.
///
/// Input is kept as typed. Case folding only applies to word names (see
/// [`FaStr`](crate::fastr::FaStr)), so string literals keep their case.
pub struct WordStrBuf {
    buf: String,
    capacity: usize,
    cur: usize,
    holding: Holding,
}

#[derive(Clone, Copy)]
enum Holding {
    None,
    Word { start: usize, len: usize, trailing: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    /// The line does not fit in the input buffer.
    TooLong,
    /// The line contains non-ascii text.
    NotAscii,
    /// A string literal was not terminated on this line.
    Unterminated,
}

impl WordStrBuf {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            capacity,
            cur: 0,
            holding: Holding::None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill(&mut self, input: &str) -> Result<(), InputError> {
        if input.len() > self.capacity {
            return Err(InputError::TooLong);
        }
        if !input.is_ascii() {
            return Err(InputError::NotAscii);
        }
        self.buf.clear();
        self.buf.push_str(input);
        self.cur = 0;
        self.holding = Holding::None;
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    // Move `self.cur` to the next non-whitespace character.
    //
    // Returns `None` if we hit the end.
    fn next_nonwhitespace(&mut self) -> Option<usize> {
        while self.cur < self.buf.len() {
            if !self.bytes()[self.cur].is_ascii_whitespace() {
                return Some(self.cur);
            }
            self.cur += 1;
        }
        None
    }

    /// Move to the next whitespace delimited token, if any.
    pub fn advance(&mut self) {
        self.holding = Holding::None;

        let start = match self.next_nonwhitespace() {
            Some(s) => s,
            None => return,
        };
        let len_total = self.buf.len();
        while self.cur < len_total && !self.bytes()[self.cur].is_ascii_whitespace() {
            self.cur += 1;
        }
        let end = self.cur;
        let trailing = self.bytes()[end..]
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.holding = Holding::Word {
            start,
            len: end - start,
            trailing,
        };
    }

    /// Consume raw text up to (not including) `delim`, skipping the single
    /// separator character that follows the word that started the literal.
    ///
    /// The cursor is left just past the delimiter.
    pub fn advance_until(&mut self, delim: u8) -> Result<&str, InputError> {
        self.holding = Holding::None;
        let len_total = self.buf.len();
        if self.cur < len_total && self.bytes()[self.cur].is_ascii_whitespace() {
            self.cur += 1;
        }
        let start = self.cur;
        let rel = self.bytes()[start..]
            .iter()
            .position(|b| *b == delim)
            .ok_or(InputError::Unterminated)?;
        let end = start + rel;
        self.cur = end + 1;
        Ok(&self.buf[start..end])
    }

    /// Discard everything left on the line.
    pub fn skip_line(&mut self) {
        self.cur = self.buf.len();
        self.holding = Holding::None;
    }

    pub fn cur_word(&self) -> Option<&str> {
        self.cur_token().map(|t| t.text)
    }

    pub fn cur_token(&self) -> Option<Token<'_>> {
        match self.holding {
            Holding::Word {
                start,
                len,
                trailing,
            } => Some(Token {
                text: &self.buf[start..start + len],
                trailing,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::{InputError, Token, WordStrBuf};

    #[test]
    fn tokens() {
        let mut buf = WordStrBuf::new(64);
        buf.fill("  : Star  42 emit ;").unwrap();
        let mut words = vec![];
        loop {
            buf.advance();
            match buf.cur_word() {
                Some(w) => words.push(w.to_string()),
                None => break,
            }
        }
        assert_eq!(words, vec![":", "Star", "42", "emit", ";"]);
    }

    #[test]
    fn trailing_delims() {
        let mut buf = WordStrBuf::new(64);
        buf.fill("a   b").unwrap();
        buf.advance();
        assert_eq!(buf.cur_token(), Some(Token { text: "a", trailing: 3 }));
        buf.advance();
        assert_eq!(buf.cur_token(), Some(Token { text: "b", trailing: 0 }));
    }

    #[test]
    fn string_literal() {
        let mut buf = WordStrBuf::new(64);
        buf.fill(r#"." Hello World" cr"#).unwrap();
        buf.advance();
        assert_eq!(buf.cur_word(), Some(r#".""#));
        assert_eq!(buf.advance_until(b'"'), Ok("Hello World"));
        assert_eq!(buf.cur_word(), None);
        buf.advance();
        assert_eq!(buf.cur_word(), Some("cr"));

        buf.fill(r#"s" nope"#).unwrap();
        buf.advance();
        assert_eq!(buf.advance_until(b'"'), Err(InputError::Unterminated));
    }

    #[test]
    fn fill_limits() {
        let mut buf = WordStrBuf::new(4);
        assert_eq!(buf.fill("12345"), Err(InputError::TooLong));
        assert_eq!(buf.fill("ü"), Err(InputError::NotAscii));
        buf.fill("1 2").unwrap();
        buf.advance();
        buf.skip_line();
        buf.advance();
        assert_eq!(buf.cur_word(), None);
    }
}
