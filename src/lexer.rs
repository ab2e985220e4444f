//! Lexical analysis: splitting a raw command line into shell tokens.

use std::fmt;

/// A token produced by scanning one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quoting and escapes already decoded.
    Word(String),
    /// The pipe operator, `|`.
    Pipe,
    /// Truncating stdout redirection, `>` or `1>`.
    RedirectOut,
    /// Appending stdout redirection, `>>` or `1>>`.
    RedirectAppend,
    /// Truncating stderr redirection, `2>`.
    RedirectErr,
    /// Appending stderr redirection, `2>>`.
    RedirectErrAppend,
}

/// Errors that can occur while scanning a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    /// A `'` span was still open at end of input.
    UnterminatedSingleQuote,
    /// A `"` span was still open at end of input.
    UnterminatedDoubleQuote,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedSingleQuote => write!(f, "unterminated single quote"),
            LexError::UnterminatedDoubleQuote => write!(f, "unterminated double quote"),
        }
    }
}

impl std::error::Error for LexError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Start,
    InWord,
    InSingleQuote,
    InDoubleQuote,
}

struct LexerFsm {
    input: Vec<u8>,
    pos: usize,
    state: LexState,
    /// Decoded bytes of the word being accumulated.
    buf: Vec<u8>,
    /// Whether the current word contained a quoted span. An empty quoted
    /// word (`''`) is still a word.
    quoted: bool,
    tokens: Vec<Token>,
}

impl LexerFsm {
    fn new(line: &str) -> Self {
        LexerFsm {
            input: line.as_bytes().to_vec(),
            pos: 0,
            state: LexState::Start,
            buf: Vec::new(),
            quoted: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while let Some(b) = self.next_byte() {
            match self.state {
                LexState::Start => self.handle_start(b),
                LexState::InWord => self.handle_word(b),
                LexState::InSingleQuote => self.handle_single_quote(b),
                LexState::InDoubleQuote => self.handle_double_quote(b),
            }
        }

        match self.state {
            LexState::InSingleQuote => return Err(LexError::UnterminatedSingleQuote),
            LexState::InDoubleQuote => return Err(LexError::UnterminatedDoubleQuote),
            _ => {}
        }

        self.flush_word();
        Ok(self.tokens)
    }

    fn next_byte(&mut self) -> Option<u8> {
        let b = self.input.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Emit the accumulated word, if there is one.
    fn flush_word(&mut self) {
        if !self.buf.is_empty() || self.quoted {
            let text = String::from_utf8_lossy(&self.buf).into_owned();
            self.tokens.push(Token::Word(text));
            self.buf.clear();
        }
        self.quoted = false;
    }

    /// Emit `>` or `>>`, consuming the second `>` when present.
    fn push_out_redirect(&mut self) {
        if self.peek_byte() == Some(b'>') {
            self.pos += 1;
            self.tokens.push(Token::RedirectAppend);
        } else {
            self.tokens.push(Token::RedirectOut);
        }
    }

    /// Emit `2>` or `2>>`, with the leading `2` already consumed.
    fn push_err_redirect(&mut self) {
        self.pos += 1; // the `>`
        if self.peek_byte() == Some(b'>') {
            self.pos += 1;
            self.tokens.push(Token::RedirectErrAppend);
        } else {
            self.tokens.push(Token::RedirectErr);
        }
    }

    fn handle_start(&mut self, b: u8) {
        match b {
            b' ' | b'\t' => {}
            b'|' => self.tokens.push(Token::Pipe),
            b'>' => self.push_out_redirect(),
            // A digit only introduces a redirection at the start of a token
            // and when immediately followed by `>`; otherwise it is an
            // ordinary word byte.
            b'1' if self.peek_byte() == Some(b'>') => {
                self.pos += 1;
                self.push_out_redirect();
            }
            b'2' if self.peek_byte() == Some(b'>') => {
                self.push_err_redirect();
            }
            b'\'' => {
                self.quoted = true;
                self.state = LexState::InSingleQuote;
            }
            b'"' => {
                self.quoted = true;
                self.state = LexState::InDoubleQuote;
            }
            b'\\' => {
                self.handle_unquoted_backslash();
            }
            other => {
                self.buf.push(other);
                self.state = LexState::InWord;
            }
        }
    }

    fn handle_word(&mut self, b: u8) {
        match b {
            b' ' | b'\t' => {
                self.flush_word();
                self.state = LexState::Start;
            }
            b'|' => {
                self.flush_word();
                self.tokens.push(Token::Pipe);
                self.state = LexState::Start;
            }
            b'>' => {
                self.flush_word();
                self.push_out_redirect();
                self.state = LexState::Start;
            }
            b'\'' => {
                self.quoted = true;
                self.state = LexState::InSingleQuote;
            }
            b'"' => {
                self.quoted = true;
                self.state = LexState::InDoubleQuote;
            }
            b'\\' => self.handle_unquoted_backslash(),
            other => self.buf.push(other),
        }
    }

    /// Outside quotes, `\` makes the following byte literal; a backslash
    /// before a newline is a line continuation and both bytes vanish; a
    /// trailing backslash is dropped.
    fn handle_unquoted_backslash(&mut self) {
        match self.next_byte() {
            Some(b'\n') => {}
            Some(other) => {
                self.buf.push(other);
                if self.state == LexState::Start {
                    self.state = LexState::InWord;
                }
            }
            None => {}
        }
    }

    fn handle_single_quote(&mut self, b: u8) {
        match b {
            b'\'' => self.state = LexState::InWord,
            other => self.buf.push(other),
        }
    }

    fn handle_double_quote(&mut self, b: u8) {
        match b {
            b'"' => self.state = LexState::InWord,
            b'\\' => match self.peek_byte() {
                // Only these five bytes are escapable inside double quotes;
                // a backslash-newline pair disappears entirely.
                Some(c @ (b'$' | b'`' | b'"' | b'\\')) => {
                    self.pos += 1;
                    self.buf.push(c);
                }
                Some(b'\n') => {
                    self.pos += 1;
                }
                _ => self.buf.push(b'\\'),
            },
            other => self.buf.push(other),
        }
    }
}

/// Split one input line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<Token>, LexError> {
    let tokens = LexerFsm::new(line).run()?;
    tracing::debug!(count = tokens.len(), "tokenized line");
    Ok(tokens)
}
