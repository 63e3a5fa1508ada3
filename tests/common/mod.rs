//! Common test utilities

#![allow(dead_code)]

use rbuild::config::OptionValues;
use rbuild::script::{Evaluation, Evaluator};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

/// Create a temporary project with a tasks.rhai script
pub fn create_project(script: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let script_path = temp_dir.path().join("tasks.rhai");
    fs::write(&script_path, script).unwrap();
    (temp_dir, script_path)
}

/// Write a file below `dir`, creating parent directories
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// Move a file's modification time into the past
pub fn age(path: &Path, secs: u64) {
    set_mtime(path, SystemTime::now() - Duration::from_secs(secs));
}

pub fn evaluate(script: &Path) -> Evaluation {
    evaluate_with(script, OptionValues::new())
}

pub fn evaluate_with(script: &Path, options: OptionValues) -> Evaluation {
    let root = script.parent().unwrap().to_path_buf();
    Evaluator::new(script, root)
        .with_options(options)
        .evaluate()
        .unwrap()
}

pub fn options(pairs: &[(&str, &str)]) -> OptionValues {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Log sink shared between a test and its subscriber
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a subscriber that records log lines, returning its result
/// and the captured text
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_target(false)
        .with_writer(buffer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
}
