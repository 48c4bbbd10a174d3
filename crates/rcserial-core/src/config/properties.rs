//! Properties file format
//!
//! Reads and writes `key=value` / `key:value` files with support for:
//! - Backslash continuation lines
//! - Unicode escapes (\uXXXX)
//! - Comment lines (# or !)
//! - Escaped special characters

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// An ordered set of string properties
#[derive(Debug, Clone, Default)]
pub struct Properties {
    /// Key-value pairs in order of appearance
    entries: Vec<(String, String)>,
    /// Fast lookup by key
    map: HashMap<String, String>,
    /// Header comments (lines before first entry)
    header_comments: Vec<String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse properties from a string
    pub fn parse(content: &str) -> Self {
        let mut props = Properties::new();
        let mut current_key: Option<String> = None;
        let mut current_value = String::new();
        let mut in_header = true;

        for line in content.lines() {
            if let Some(ref key) = current_key {
                let trimmed = line.trim_start();
                let continues = trimmed.ends_with('\\') && !trimmed.ends_with("\\\\");
                let value_part = if continues {
                    &trimmed[..trimmed.len() - 1]
                } else {
                    trimmed
                };
                current_value.push_str(&unescape(value_part));

                if continues {
                    continue;
                }

                props.set(key.clone(), current_value.clone());
                current_key = None;
                current_value.clear();
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with('#') || trimmed.starts_with('!') {
                if in_header {
                    props.header_comments.push(trimmed.to_string());
                }
                continue;
            }

            in_header = false;

            let (key, value) = parse_key_value(trimmed);
            if value.ends_with('\\') && !value.ends_with("\\\\") {
                current_key = Some(key);
                current_value = unescape(&value[..value.len() - 1]);
                continue;
            }

            props.set(key, unescape(&value));
        }

        if let Some(key) = current_key {
            props.set(key, current_value);
        }

        props
    }

    /// Load properties from a file
    ///
    /// Falls back to Latin-1 when the file is not valid UTF-8.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
        };
        Ok(Self::parse(&content))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Set a value, keeping the position of an existing key
    pub fn set(&mut self, key: String, value: String) {
        if self.map.contains_key(&key) {
            if let Some((_, v)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
                *v = value.clone();
            }
        } else {
            self.entries.push((key.clone(), value.clone()));
        }
        self.map.insert(key, value);
    }

    /// Replace the header with a single comment line
    pub fn set_comment(&mut self, comment: &str) {
        self.header_comments = comment.lines().map(|l| format!("#{}", l)).collect();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for comment in &self.header_comments {
            writeln!(f, "{}", comment)?;
        }
        for (key, value) in &self.entries {
            writeln!(f, "{}={}", escape_key(key), escape_value(value))?;
        }
        Ok(())
    }
}

/// Split a line at the first unescaped `=` or `:`
fn parse_key_value(line: &str) -> (String, String) {
    let mut key_end = None;
    let mut prev_backslash = false;

    for (i, c) in line.char_indices() {
        if !prev_backslash && (c == '=' || c == ':') {
            key_end = Some(i);
            break;
        }
        prev_backslash = c == '\\' && !prev_backslash;
    }

    match key_end {
        Some(pos) => {
            let key = unescape(line[..pos].trim_end());
            let value = line[pos + 1..].trim_start().to_string();
            (key, value)
        }
        None => (unescape(line.trim()), String::new()),
    }
}

fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => result.push('\t'),
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('f') => result.push('\x0C'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    result.push(ch);
                }
            }
            Some(other) => result.push(other),
            None => {}
        }
    }

    result
}

fn escape_key(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' => result.push_str("\\ "),
            '=' => result.push_str("\\="),
            ':' => result.push_str("\\:"),
            _ => push_escaped(&mut result, c),
        }
    }
    result
}

fn escape_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            ' ' if i == 0 => result.push_str("\\ "),
            _ => push_escaped(&mut result, c),
        }
    }
    result
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\t' => out.push_str("\\t"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        _ => out.push(c),
    }
}
