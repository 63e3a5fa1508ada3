//! Shell statement parser
//!
//! A hand-written recursive descent parser for the POSIX shell subset used in
//! task bodies. Unsupported constructs are rejected with a positioned error
//! instead of being silently misread.

use crate::error::{ShellError, ShellResult};
use crate::shell::ast::*;

const RESERVED_WORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "for", "while", "until", "do", "done", "case", "esac",
    "function", "select",
];

/// Parse shell source. `name` identifies the source in error messages.
pub fn parse(source: &str, name: &str) -> ShellResult<Script> {
    let mut parser = Parser::new(source, name);
    parser.parse_list(Terminator::Eof)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Eof,
    Paren,
    Brace,
}

struct Parser<'a> {
    name: &'a str,
    chars: Vec<char>,
    pos: usize,
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\r'
}

fn is_meta(c: char) -> bool {
    is_blank(c) || matches!(c, '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn push_literal(parts: &mut Vec<WordPart>, text: &str, quoted: bool) {
    if let Some(WordPart::Literal {
        text: last,
        quoted: last_quoted,
    }) = parts.last_mut()
    {
        if *last_quoted == quoted {
            last.push_str(text);
            return;
        }
    }
    parts.push(WordPart::Literal {
        text: text.to_string(),
        quoted,
    });
}

impl<'a> Parser<'a> {
    fn new(source: &str, name: &'a str) -> Self {
        Parser {
            name,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn eat(&mut self, text: &str) -> bool {
        let len = text.chars().count();
        if self.pos + len > self.chars.len() {
            return false;
        }
        if text.chars().zip(&self.chars[self.pos..]).all(|(a, b)| a == *b) {
            self.pos += len;
            true
        } else {
            false
        }
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ShellError {
        let pos = pos.min(self.chars.len());
        let before = &self.chars[..pos];
        let line = before.iter().filter(|c| **c == '\n').count() + 1;
        let column = match before.iter().rposition(|c| *c == '\n') {
            Some(idx) => pos - idx,
            None => pos + 1,
        };
        ShellError::Parse {
            name: self.name.to_string(),
            line,
            column,
            message: message.into(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ShellError {
        self.error_at(self.pos, message)
    }

    fn line_at(&self, pos: usize) -> usize {
        self.chars[..pos].iter().filter(|c| **c == '\n').count() + 1
    }

    /// Skip blanks, line continuations and comments, stopping at newlines
    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(c) if is_blank(c) => self.pos += 1,
                Some('\\') if self.peek_at(1) == Some('\n') => self.pos += 2,
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn skip_linebreaks(&mut self) {
        loop {
            self.skip_blanks();
            if self.peek() == Some('\n') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_separators(&mut self) {
        loop {
            self.skip_blanks();
            match self.peek() {
                Some('\n') | Some(';') => self.pos += 1,
                _ => break,
            }
        }
    }

    /// Whether the next character is `c` standing alone as a word
    fn at_reserved_char(&self, c: char) -> bool {
        self.peek() == Some(c) && self.peek_at(1).map_or(true, |n| is_meta(n))
    }

    fn parse_list(&mut self, term: Terminator) -> ShellResult<Script> {
        let mut stmts = Vec::new();

        loop {
            self.skip_separators();
            match term {
                Terminator::Eof if self.at_end() => break,
                Terminator::Paren if self.peek() == Some(')') => break,
                Terminator::Brace if self.at_reserved_char('}') => break,
                Terminator::Paren if self.at_end() => return Err(self.error("expected ')'")),
                Terminator::Brace if self.at_end() => return Err(self.error("expected '}'")),
                _ => {}
            }

            let start = self.pos;
            let list = self.parse_and_or()?;
            let text: String = self.chars[start..self.pos].iter().collect();
            stmts.push(Stmt {
                list,
                text: text.trim().to_string(),
                line: self.line_at(start),
            });

            self.skip_blanks();
            match self.peek() {
                None | Some('\n') | Some(';') => {}
                Some(')') if term == Terminator::Paren => {}
                Some('&') => return Err(self.error("background jobs are not supported")),
                Some(c) => return Err(self.error(format!("unexpected '{}'", c))),
            }
        }

        Ok(Script { stmts })
    }

    fn parse_and_or(&mut self) -> ShellResult<AndOrList> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();

        loop {
            self.skip_blanks();
            let connector = if self.eat("&&") {
                Connector::And
            } else if self.eat("||") {
                Connector::Or
            } else {
                break;
            };
            self.skip_linebreaks();
            rest.push((connector, self.parse_pipeline()?));
        }

        Ok(AndOrList { first, rest })
    }

    fn parse_pipeline(&mut self) -> ShellResult<Pipeline> {
        self.skip_blanks();
        let negated = self.at_reserved_char('!');
        if negated {
            self.pos += 1;
        }

        let mut commands = vec![self.parse_command()?];
        loop {
            self.skip_blanks();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                self.pos += 1;
                self.skip_linebreaks();
                commands.push(self.parse_command()?);
            } else {
                break;
            }
        }

        Ok(Pipeline { negated, commands })
    }

    fn parse_command(&mut self) -> ShellResult<Command> {
        self.skip_blanks();
        match self.peek() {
            Some('(') => {
                if self.peek_at(1) == Some('(') {
                    return Err(self.error("arithmetic commands are not supported"));
                }
                self.pos += 1;
                let script = self.parse_list(Terminator::Paren)?;
                self.pos += 1;
                let redirects = self.parse_trailing_redirects()?;
                Ok(Command::Subshell(script, redirects))
            }
            Some('{') if self.at_reserved_char('{') => {
                self.pos += 1;
                let script = self.parse_list(Terminator::Brace)?;
                self.pos += 1;
                let redirects = self.parse_trailing_redirects()?;
                Ok(Command::Group(script, redirects))
            }
            _ => self.parse_simple().map(Command::Simple),
        }
    }

    fn parse_trailing_redirects(&mut self) -> ShellResult<Vec<Redirect>> {
        let mut redirects = Vec::new();
        loop {
            self.skip_blanks();
            match self.try_parse_redirect()? {
                Some(redirect) => redirects.push(redirect),
                None => break,
            }
        }
        Ok(redirects)
    }

    fn parse_simple(&mut self) -> ShellResult<SimpleCommand> {
        let start = self.pos;
        let mut cmd = SimpleCommand::default();

        loop {
            self.skip_blanks();
            match self.peek() {
                None | Some('\n') | Some(';') | Some('|') | Some(')') => break,
                Some('&') if self.peek_at(1) != Some('>') => break,
                Some('(') => return Err(self.error("unexpected '('")),
                _ => {}
            }

            if let Some(redirect) = self.try_parse_redirect()? {
                cmd.redirects.push(redirect);
                continue;
            }

            let word_start = self.pos;
            let word = self.parse_word(false)?;

            if cmd.words.is_empty() {
                if let Some(assign) = split_assignment(&word) {
                    cmd.assigns.push(assign);
                    continue;
                }
                if let Some(text) = word.as_plain_literal() {
                    if RESERVED_WORDS.contains(&text.as_str()) {
                        return Err(self.error_at(
                            word_start,
                            format!("'{}' is not supported in task commands", text),
                        ));
                    }
                }
            }
            cmd.words.push(word);
        }

        if cmd.words.is_empty() && cmd.assigns.is_empty() && cmd.redirects.is_empty() {
            return Err(self.error_at(start, "expected a command"));
        }

        Ok(cmd)
    }

    fn try_parse_redirect(&mut self) -> ShellResult<Option<Redirect>> {
        let save = self.pos;
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if !digits.is_empty() && !matches!(self.peek(), Some('<') | Some('>')) {
            self.pos = save;
            return Ok(None);
        }
        let explicit_fd = if digits.is_empty() {
            None
        } else {
            Some(digits.parse::<u32>().map_err(|_| self.error("bad file descriptor"))?)
        };

        let (fd, op) = match self.peek() {
            Some('&') if self.peek_at(1) == Some('>') => {
                self.pos += 2;
                if self.peek() == Some('>') {
                    return Err(self.error("'&>>' is not supported"));
                }
                (1, RedirectOp::WriteBoth)
            }
            Some('>') => {
                self.pos += 1;
                let op = if self.eat(">") {
                    RedirectOp::Append
                } else if self.eat("&") {
                    RedirectOp::Duplicate
                } else {
                    self.eat("|");
                    RedirectOp::Write
                };
                (explicit_fd.unwrap_or(1), op)
            }
            Some('<') => {
                self.pos += 1;
                if self.peek() == Some('<') {
                    return Err(self.error("here-documents are not supported"));
                }
                if self.peek() == Some('&') {
                    return Err(self.error("'<&' is not supported"));
                }
                (explicit_fd.unwrap_or(0), RedirectOp::Read)
            }
            _ => {
                self.pos = save;
                return Ok(None);
            }
        };

        self.skip_blanks();
        let target_start = self.pos;
        let target = self.parse_word(false)?;
        if target.parts.is_empty() {
            return Err(self.error_at(target_start, "missing redirection target"));
        }
        if op == RedirectOp::Duplicate && target.as_plain_literal().map_or(true, |t| t.parse::<u32>().is_err()) {
            return Err(self.error_at(target_start, "'>&' expects a file descriptor number"));
        }

        Ok(Some(Redirect { fd, op, target }))
    }

    /// Parse one word. Inside `${name:-...}` only `}` ends the word.
    fn parse_word(&mut self, in_brace: bool) -> ShellResult<Word> {
        let mut parts = Vec::new();

        loop {
            let c = match self.peek() {
                None => break,
                Some(c) => c,
            };
            if in_brace {
                if c == '}' {
                    break;
                }
            } else if is_meta(c) {
                break;
            }

            match c {
                '\\' => match self.peek_at(1) {
                    Some('\n') => self.pos += 2,
                    Some(next) => {
                        push_literal(&mut parts, &next.to_string(), true);
                        self.pos += 2;
                    }
                    None => {
                        push_literal(&mut parts, "\\", false);
                        self.pos += 1;
                    }
                },
                '\'' => {
                    let start = self.pos;
                    self.pos += 1;
                    let mut text = String::new();
                    loop {
                        match self.peek() {
                            None => return Err(self.error_at(start, "unterminated single quote")),
                            Some('\'') => {
                                self.pos += 1;
                                break;
                            }
                            Some(ch) => {
                                text.push(ch);
                                self.pos += 1;
                            }
                        }
                    }
                    push_literal(&mut parts, &text, true);
                }
                '"' => self.parse_double_quoted(&mut parts)?,
                '$' => {
                    let part = self.parse_dollar(false)?;
                    match part {
                        WordPart::Literal { text, quoted } => push_literal(&mut parts, &text, quoted),
                        other => parts.push(other),
                    }
                }
                '`' => {
                    return Err(self.error("backtick substitution is not supported, use $(...)"));
                }
                other => {
                    push_literal(&mut parts, &other.to_string(), false);
                    self.pos += 1;
                }
            }
        }

        Ok(Word { parts })
    }

    fn parse_double_quoted(&mut self, parts: &mut Vec<WordPart>) -> ShellResult<()> {
        let start = self.pos;
        self.pos += 1;
        push_literal(parts, "", true);

        loop {
            match self.peek() {
                None => return Err(self.error_at(start, "unterminated double quote")),
                Some('"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some('\\') => match self.peek_at(1) {
                    Some('\n') => self.pos += 2,
                    Some(next @ ('$' | '`' | '"' | '\\')) => {
                        push_literal(parts, &next.to_string(), true);
                        self.pos += 2;
                    }
                    _ => {
                        push_literal(parts, "\\", true);
                        self.pos += 1;
                    }
                },
                Some('$') => {
                    let part = self.parse_dollar(true)?;
                    match part {
                        WordPart::Literal { text, .. } => push_literal(parts, &text, true),
                        other => parts.push(other),
                    }
                }
                Some('`') => {
                    return Err(self.error("backtick substitution is not supported, use $(...)"));
                }
                Some(c) => {
                    push_literal(parts, &c.to_string(), true);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        if self.peek() == Some('?') {
            self.pos += 1;
            return "?".to_string();
        }
        if !self.peek().map_or(false, is_name_start) {
            return name;
        }
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        name
    }

    fn parse_dollar(&mut self, quoted: bool) -> ShellResult<WordPart> {
        let start = self.pos;
        match self.peek_at(1) {
            Some('{') => {
                self.pos += 2;
                let name = self.read_name();
                if name.is_empty() {
                    return Err(self.error_at(start, "bad substitution"));
                }
                if self.eat("}") {
                    return Ok(WordPart::Param {
                        name,
                        default: None,
                        quoted,
                    });
                }
                if self.eat(":-") {
                    let default = self.parse_word(true)?;
                    if !self.eat("}") {
                        return Err(self.error_at(start, "unterminated parameter expansion"));
                    }
                    return Ok(WordPart::Param {
                        name,
                        default: Some(default),
                        quoted,
                    });
                }
                Err(self.error_at(start, "unsupported parameter expansion"))
            }
            Some('(') => {
                if self.peek_at(2) == Some('(') {
                    return Err(self.error_at(start, "arithmetic expansion is not supported"));
                }
                self.pos += 2;
                let script = self.parse_list(Terminator::Paren)?;
                self.pos += 1;
                Ok(WordPart::CommandSubst { script, quoted })
            }
            Some(c) if c == '?' || is_name_start(c) => {
                self.pos += 1;
                let name = self.read_name();
                Ok(WordPart::Param {
                    name,
                    default: None,
                    quoted,
                })
            }
            _ => {
                self.pos += 1;
                Ok(WordPart::Literal {
                    text: "$".to_string(),
                    quoted,
                })
            }
        }
    }
}

/// Split `NAME=value` off a word in command-prefix position
fn split_assignment(word: &Word) -> Option<Assign> {
    let (first, rest) = word.parts.split_first()?;
    let text = match first {
        WordPart::Literal { text, quoted: false } => text,
        _ => return None,
    };
    let eq = text.find('=')?;
    let name = &text[..eq];
    let mut chars = name.chars();
    if !chars.next().map_or(false, is_name_start) || !chars.all(is_name_char) {
        return None;
    }

    let mut parts = Vec::new();
    if eq + 1 < text.len() {
        parts.push(WordPart::Literal {
            text: text[eq + 1..].to_string(),
            quoted: false,
        });
    }
    parts.extend(rest.iter().cloned());

    Some(Assign {
        name: name.to_string(),
        value: Word { parts },
    })
}
