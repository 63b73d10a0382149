use std::io::Write;
use std::path::{Path, PathBuf};

use crate::parser;

/// File-backed ring buffer of recently entered command lines, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: Vec<String>,
    capacity: usize,
    /// `None` keeps the log in memory only.
    path: Option<PathBuf>,
}

impl HistoryLog {
    /// Load the newest `capacity` entries from `path`, if it exists.
    pub fn load(path: Option<PathBuf>, capacity: usize) -> Self {
        let mut entries: Vec<String> = path
            .as_deref()
            .map(read_entries)
            .unwrap_or_default();
        if entries.len() > capacity {
            let excess = entries.len() - capacity;
            entries.drain(..excess);
        }
        Self {
            entries,
            capacity,
            path,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Remember `line`. Blank lines, lines that invoke `log` in any stage, and
    /// repeats of the newest entry are not stored.
    pub fn record(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if parser::command_names(line).iter().any(|name| name == "log") {
            return;
        }
        if self.entries.last().map(String::as_str) == Some(line) {
            return;
        }

        self.entries.push(line.to_string());
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
        self.save();
    }

    /// The `index`-th most recent entry, 1 being the newest.
    pub fn nth_recent(&self, index: usize) -> Option<&str> {
        if index == 0 || index > self.entries.len() {
            return None;
        }
        self.entries
            .get(self.entries.len() - index)
            .map(String::as_str)
    }

    pub fn purge(&mut self) {
        self.entries.clear();
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let result = std::fs::File::create(path).and_then(|mut file| {
            for entry in &self.entries {
                writeln!(file, "{entry}")?;
            }
            Ok(())
        });
        if let Err(err) = result {
            eprintln!("hopsh: failed to save history: {err}");
        }
    }
}

fn read_entries(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
