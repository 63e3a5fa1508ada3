//! Portable `mv`, `rm` and `mkdir`
//!
//! Task commands use these three utilities so often that they are provided
//! in-process, giving the same behaviour on every platform.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::fs;
use std::path::{Path, PathBuf};

/// Run the shim named `name`, or return `None` if there is no such shim.
///
/// Paths are resolved against `dir`. The error string is the message that
/// follows `name: ` on the command's stderr.
pub fn run(name: &str, dir: &Path, args: &[String]) -> Option<Result<(), String>> {
    let result = match name {
        "mv" => mv(dir, args),
        "rm" => rm(dir, args),
        "mkdir" => mkdir(dir, args),
        _ => return None,
    };
    Some(result)
}

fn command(name: &'static str) -> Command {
    Command::new(name)
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("paths")
                .num_args(0..)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

fn flag(id: &'static str, short: char) -> Arg {
    Arg::new(id).short(short).action(ArgAction::SetTrue)
}

fn parse(cmd: Command, args: &[String]) -> Result<ArgMatches, String> {
    cmd.try_get_matches_from(args).map_err(|e| {
        let rendered = e.to_string();
        rendered
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("error: ")
            .to_string()
    })
}

fn paths(matches: &ArgMatches, dir: &Path) -> Vec<PathBuf> {
    matches
        .get_many::<PathBuf>("paths")
        .map(|values| values.map(|p| dir.join(p)).collect())
        .unwrap_or_default()
}

fn mv(dir: &Path, args: &[String]) -> Result<(), String> {
    let matches = parse(command("mv"), args)?;
    let mut items = paths(&matches, dir);
    if items.len() < 2 {
        return Err("missing destination operand".to_string());
    }
    let dest = items.pop().unwrap_or_default();

    if dest.is_dir() {
        for item in &items {
            let name = item
                .file_name()
                .ok_or_else(|| format!("cannot move '{}'", item.display()))?;
            let target = dest.join(name);
            fs::rename(item, &target).map_err(|e| {
                format!("cannot move '{}' to '{}': {}", item.display(), target.display(), e)
            })?;
        }
        return Ok(());
    }

    if items.len() > 1 {
        return Err(format!("target '{}' is not a directory", dest.display()));
    }
    let source = &items[0];
    fs::rename(source, &dest)
        .map_err(|e| format!("cannot move '{}' to '{}': {}", source.display(), dest.display(), e))
}

fn rm(dir: &Path, args: &[String]) -> Result<(), String> {
    let cmd = command("rm")
        .arg(flag("recursive", 'r').short_alias('R'))
        .arg(flag("force", 'f'));
    let matches = parse(cmd, args)?;
    let recursive = matches.get_flag("recursive");
    let force = matches.get_flag("force");

    let mut targets = Vec::new();
    for item in paths(&matches, dir) {
        match fs::symlink_metadata(&item) {
            Ok(meta) if meta.is_dir() && !recursive => {
                return Err(format!("cannot remove '{}': Is a directory", item.display()));
            }
            Ok(meta) => targets.push((item, meta.is_dir())),
            Err(_) if force => {}
            Err(e) => return Err(format!("cannot remove '{}': {}", item.display(), e)),
        }
    }

    for (item, is_dir) in targets {
        let result = if is_dir {
            fs::remove_dir_all(&item)
        } else {
            fs::remove_file(&item)
        };
        match result {
            Ok(()) => {}
            Err(e) if force && e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(format!("cannot remove '{}': {}", item.display(), e)),
        }
    }

    Ok(())
}

fn mkdir(dir: &Path, args: &[String]) -> Result<(), String> {
    let matches = parse(command("mkdir").arg(flag("parents", 'p')), args)?;
    let parents = matches.get_flag("parents");

    for item in paths(&matches, dir) {
        let result = if parents {
            fs::create_dir_all(&item)
        } else {
            fs::create_dir(&item)
        };
        result.map_err(|e| format!("cannot create directory '{}': {}", item.display(), e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unknown_name_is_not_a_shim() {
        assert!(run("cp", Path::new("."), &[]).is_none());
    }

    #[test]
    fn test_mkdir_with_and_without_parents() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        assert!(run("mkdir", dir, &args(&["a/b"])).unwrap().is_err());
        run("mkdir", dir, &args(&["-p", "a/b"])).unwrap().unwrap();
        assert!(dir.join("a/b").is_dir());

        let err = run("mkdir", dir, &args(&["a"])).unwrap().unwrap_err();
        assert!(err.contains("cannot create directory"));
    }

    #[test]
    fn test_rm_requires_recursive_for_directories() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::create_dir_all(dir.join("out/obj")).unwrap();
        fs::write(dir.join("out/obj/a.o"), "x").unwrap();

        let err = run("rm", dir, &args(&["out"])).unwrap().unwrap_err();
        assert!(err.contains("Is a directory"));

        run("rm", dir, &args(&["-rf", "out", "missing"])).unwrap().unwrap();
        assert!(!dir.join("out").exists());
    }

    #[test]
    fn test_rm_missing_file_fails_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let err = run("rm", temp_dir.path(), &args(&["nope.txt"]))
            .unwrap()
            .unwrap_err();
        assert!(err.contains("nope.txt"));
    }

    #[test]
    fn test_rm_rejects_unknown_flags() {
        let temp_dir = TempDir::new().unwrap();
        assert!(run("rm", temp_dir.path(), &args(&["-z", "x"])).unwrap().is_err());
    }

    #[test]
    fn test_mv_renames_and_moves_into_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("a.txt"), "a").unwrap();
        fs::write(dir.join("b.txt"), "b").unwrap();
        fs::create_dir(dir.join("dest")).unwrap();

        run("mv", dir, &args(&["a.txt", "c.txt"])).unwrap().unwrap();
        assert!(dir.join("c.txt").is_file());
        assert!(!dir.join("a.txt").exists());

        run("mv", dir, &args(&["b.txt", "c.txt", "dest"])).unwrap().unwrap();
        assert_eq!(fs::read_to_string(dir.join("dest/b.txt")).unwrap(), "b");
        assert_eq!(fs::read_to_string(dir.join("dest/c.txt")).unwrap(), "a");
    }

    #[test]
    fn test_mv_multiple_sources_need_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("a"), "a").unwrap();
        fs::write(dir.join("b"), "b").unwrap();

        let err = run("mv", dir, &args(&["a", "b", "c"])).unwrap().unwrap_err();
        assert!(err.contains("not a directory"));
        assert!(run("mv", dir, &args(&["a"])).unwrap().is_err());
    }
}
