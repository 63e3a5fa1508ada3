//! Syntax tree for shell statements

/// A parsed shell script
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub stmts: Vec<Stmt>,
}

/// One top-level statement, kept together with its source text for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub list: AndOrList,
    pub text: String,
    pub line: usize,
}

/// Pipelines joined by `&&` and `||`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndOrList {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Simple(SimpleCommand),
    Subshell(Script, Vec<Redirect>),
    Group(Script, Vec<Redirect>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleCommand {
    pub assigns: Vec<Assign>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assign {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: u32,
    pub op: RedirectOp,
    pub target: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `<`
    Read,
    /// `>`
    Write,
    /// `>>`
    Append,
    /// `>&` with a descriptor number as target
    Duplicate,
    /// `&>`
    WriteBoth,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    Literal { text: String, quoted: bool },
    Param { name: String, default: Option<Word>, quoted: bool },
    CommandSubst { script: Script, quoted: bool },
}

impl Word {
    /// The word's text when it consists of unquoted literals only
    pub fn as_plain_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, quoted: false } => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }
}
