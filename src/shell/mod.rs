//! POSIX shell subset used for task commands
//!
//! Task bodies are parsed once, when the task is declared, and executed
//! statement by statement by an [`Interpreter`].

pub mod ast;
mod builtins;
mod expand;
pub mod handlers;
mod interp;
pub mod parser;

pub use ast::{Script, Stmt};
pub use handlers::{
    DefaultExecHandler, DefaultOpenHandler, EngineExecHandler, ExecContext, ExecHandler, ExecIo,
    ExecOutcome, Input, OpenHandler, OpenMode, Output,
};
pub use interp::Interpreter;
pub use parser::parse;

/// Quote `value` so the shell reads it back as a single literal word
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("src/main.c"), "src/main.c");
        assert_eq!(quote("-DNAME=1"), "-DNAME=1");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_quoted_values_parse_back() {
        let value = "a 'b' $c *";
        let script = parse(&format!("echo {}", quote(value)), "t").unwrap();
        match &script.stmts[0].list.first.commands[0] {
            ast::Command::Simple(cmd) => {
                let text: String = cmd.words[1]
                    .parts
                    .iter()
                    .map(|part| match part {
                        ast::WordPart::Literal { text, .. } => text.as_str(),
                        _ => panic!("unexpected expansion"),
                    })
                    .collect();
                assert_eq!(text, value);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
