//! Word expansion: parameters, command substitution, field splitting and
//! pathname globbing

use crate::error::ShellResult;
use crate::shell::ast::{Script, Word, WordPart};
use glob::{MatchOptions, Pattern};
use std::path::Path;

/// What expansion needs from the interpreter
pub(super) trait Expand {
    fn lookup(&self, name: &str) -> Option<String>;
    fn substitute(&mut self, script: &Script) -> ShellResult<String>;
    fn cwd(&self) -> &Path;
}

/// A field under construction. Each segment remembers whether it was quoted
/// so quoted glob characters match literally.
#[derive(Debug, Default)]
struct Field {
    segments: Vec<(String, bool)>,
    present: bool,
}

impl Field {
    fn push(&mut self, text: &str, quoted: bool) {
        if quoted || !text.is_empty() {
            self.present = true;
        }
        self.segments.push((text.to_string(), quoted));
    }

    fn text(&self) -> String {
        self.segments.iter().map(|(s, _)| s.as_str()).collect()
    }

    fn has_glob(&self) -> bool {
        self.segments
            .iter()
            .any(|(s, quoted)| !quoted && s.contains(['*', '?', '[']))
    }

    fn pattern(&self) -> String {
        self.segments
            .iter()
            .map(|(s, quoted)| if *quoted { Pattern::escape(s) } else { s.clone() })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Fields {
    done: Vec<Field>,
    current: Field,
}

impl Fields {
    fn split(&mut self) {
        if self.current.present {
            self.done.push(std::mem::take(&mut self.current));
        } else {
            self.current = Field::default();
        }
    }

    /// Append the result of an unquoted expansion, splitting on blanks
    fn push_split(&mut self, value: &str) {
        let is_ifs = |c: char| c == ' ' || c == '\t' || c == '\n';
        for (i, piece) in value.split(is_ifs).enumerate() {
            if i > 0 {
                self.split();
            }
            if !piece.is_empty() {
                self.current.push(piece, false);
            }
        }
    }

    fn finish(mut self) -> Vec<Field> {
        self.split();
        self.done
    }
}

fn param_value<E: Expand>(ex: &mut E, name: &str, default: Option<&Word>) -> ShellResult<String> {
    let value = ex.lookup(name).unwrap_or_default();
    match default {
        Some(word) if value.is_empty() => expand_string(ex, word),
        _ => Ok(value),
    }
}

/// Expand command words into argument fields
pub(super) fn expand_fields<E: Expand>(ex: &mut E, words: &[Word]) -> ShellResult<Vec<String>> {
    let mut args = Vec::new();

    for word in words {
        let mut fields = Fields::default();
        for part in &word.parts {
            match part {
                WordPart::Literal { text, quoted } => fields.current.push(text, *quoted),
                WordPart::Param {
                    name,
                    default,
                    quoted,
                } => {
                    let value = param_value(ex, name, default.as_ref())?;
                    if *quoted {
                        fields.current.push(&value, true);
                    } else {
                        fields.push_split(&value);
                    }
                }
                WordPart::CommandSubst { script, quoted } => {
                    let value = ex.substitute(script)?;
                    if *quoted {
                        fields.current.push(&value, true);
                    } else {
                        fields.push_split(&value);
                    }
                }
            }
        }

        for field in fields.finish() {
            args.extend(glob_field(ex.cwd(), &field));
        }
    }

    Ok(args)
}

/// Expand a word to a single string without splitting or globbing, as for
/// assignment values and redirect targets
pub(super) fn expand_string<E: Expand>(ex: &mut E, word: &Word) -> ShellResult<String> {
    let mut out = String::new();
    for part in &word.parts {
        match part {
            WordPart::Literal { text, .. } => out.push_str(text),
            WordPart::Param { name, default, .. } => {
                out.push_str(&param_value(ex, name, default.as_ref())?)
            }
            WordPart::CommandSubst { script, .. } => out.push_str(&ex.substitute(script)?),
        }
    }
    Ok(out)
}

fn glob_field(cwd: &Path, field: &Field) -> Vec<String> {
    let text = field.text();
    if !field.has_glob() {
        return vec![text];
    }

    let relative = !Path::new(&text).is_absolute();
    let prefix = if relative {
        let mut escaped = Pattern::escape(&cwd.to_string_lossy());
        if !escaped.ends_with('/') && !escaped.ends_with('\\') {
            escaped.push('/');
        }
        escaped
    } else {
        String::new()
    };

    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let pattern = format!("{}{}", prefix, field.pattern());
    let mut matches: Vec<String> = match glob::glob_with(&pattern, options) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .map(|path| {
                let shown = if relative {
                    path.strip_prefix(cwd).map(|p| p.to_path_buf()).unwrap_or(path)
                } else {
                    path
                };
                shown.to_string_lossy().into_owned()
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    if matches.is_empty() {
        return vec![text];
    }
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::parse;
    use crate::shell::ast::Command;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fake {
        vars: HashMap<String, String>,
        dir: PathBuf,
    }

    impl Expand for Fake {
        fn lookup(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }

        fn substitute(&mut self, _script: &Script) -> ShellResult<String> {
            Ok("sub out".to_string())
        }

        fn cwd(&self) -> &Path {
            &self.dir
        }
    }

    fn expand(fake: &mut Fake, src: &str) -> Vec<String> {
        let script = parse(src, "t").unwrap();
        match &script.stmts[0].list.first.commands[0] {
            Command::Simple(cmd) => expand_fields(fake, &cmd.words).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn fake(dir: &Path) -> Fake {
        let mut vars = HashMap::new();
        vars.insert("FLAGS".to_string(), " -O2  -g ".to_string());
        vars.insert("EMPTY".to_string(), String::new());
        Fake {
            vars,
            dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_unquoted_expansion_splits() {
        let temp_dir = TempDir::new().unwrap();
        let mut fake = fake(temp_dir.path());
        assert_eq!(expand(&mut fake, "cc $FLAGS x"), vec!["cc", "-O2", "-g", "x"]);
        assert_eq!(expand(&mut fake, "cc \"$FLAGS\""), vec!["cc", " -O2  -g "]);
        assert_eq!(expand(&mut fake, "echo $(date)"), vec!["echo", "sub", "out"]);
    }

    #[test]
    fn test_empty_expansions() {
        let temp_dir = TempDir::new().unwrap();
        let mut fake = fake(temp_dir.path());
        assert_eq!(expand(&mut fake, "echo $EMPTY $UNSET"), vec!["echo"]);
        assert_eq!(expand(&mut fake, "echo \"$EMPTY\""), vec!["echo", ""]);
        assert_eq!(
            expand(&mut fake, "echo ${EMPTY:-fallback}"),
            vec!["echo", "fallback"]
        );
    }

    #[test]
    fn test_globbing_relative_to_cwd() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.c"), "").unwrap();
        std::fs::write(temp_dir.path().join("a.c"), "").unwrap();
        std::fs::write(temp_dir.path().join(".hidden.c"), "").unwrap();
        let mut fake = fake(temp_dir.path());

        assert_eq!(expand(&mut fake, "cc *.c"), vec!["cc", "a.c", "b.c"]);
        assert_eq!(expand(&mut fake, "cc '*.c'"), vec!["cc", "*.c"]);
        assert_eq!(expand(&mut fake, "cc *.h"), vec!["cc", "*.h"]);
    }
}
