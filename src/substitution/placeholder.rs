// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tekgraph contributors

//! `$(...)` placeholder scanning and replacement

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\(([^()]+)\)").expect("static regex"))
}

fn task_result() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\(\s*tasks\.([A-Za-z0-9_-]+)\.results\.([A-Za-z0-9_.-]+?)\s*\)")
            .expect("static regex")
    })
}

/// Canonical form of a placeholder key.
///
/// `params["x"]`, `params['x']` and `inputs.params.x` all become
/// `params.x`; any index or member suffix is kept.
pub fn normalize_key(raw: &str) -> String {
    let key = raw.trim();
    let key = match key.strip_prefix("inputs.") {
        Some(rest) if rest.starts_with("params") => rest,
        _ => key,
    };

    if let Some(rest) = key.strip_prefix("params[") {
        let mut chars = rest.chars();
        if let Some(quote @ ('"' | '\'')) = chars.next() {
            let inner = chars.as_str();
            if let Some(end) = inner.find(quote) {
                let name = &inner[..end];
                if let Some(tail) = inner[end + 1..].strip_prefix(']') {
                    return format!("params.{}{}", name, tail);
                }
            }
        }
    }
    key.to_string()
}

/// Values for one substitution pass
#[derive(Debug, Clone, Default)]
pub struct Replacements {
    strings: BTreeMap<String, String>,
    arrays: BTreeMap<String, Vec<String>>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.strings.insert(key.into(), value.into());
    }

    /// Register an array value, expandable with `[*]` in list fields
    pub fn insert_array(&mut self, key: impl Into<String>, values: Vec<String>) {
        let key = key.into();
        for (i, v) in values.iter().enumerate() {
            self.strings.insert(format!("{}[{}]", key, i), v.clone());
        }
        self.arrays.insert(key, values);
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.arrays.is_empty()
    }

    /// Replace every known placeholder in `text`; unknown ones stay as-is
    pub fn apply(&self, text: &str) -> String {
        if !text.contains("$(") {
            return text.to_string();
        }
        placeholder()
            .replace_all(text, |caps: &Captures| {
                match self.strings.get(&normalize_key(&caps[1])) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Like [`apply`](Self::apply) over a list, expanding array params.
    ///
    /// An element that is exactly `$(params.x[*])` (or `$(params.x)` for
    /// an array param) is replaced by all of the array's elements.
    pub fn apply_list(&self, items: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.whole_array(item) {
                Some(values) => out.extend(values.iter().cloned()),
                None => out.push(self.apply(item)),
            }
        }
        out
    }

    fn whole_array(&self, item: &str) -> Option<&Vec<String>> {
        let caps = placeholder().captures(item.trim())?;
        if caps[0].len() != item.trim().len() {
            return None;
        }
        let key = normalize_key(&caps[1]);
        let base = key.strip_suffix("[*]").unwrap_or(&key);
        self.arrays.get(base)
    }
}

/// Whether `text` still holds a placeholder under one of `prefixes`
pub fn find_unresolved<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    placeholder().captures_iter(text).find_map(|caps| {
        let key = normalize_key(&caps[1]);
        if prefixes.iter().any(|p| key.starts_with(p)) {
            caps.get(0).map(|m| m.as_str())
        } else {
            None
        }
    })
}

/// `(task, result)` pairs referenced as `$(tasks.<t>.results.<r>)`
pub fn task_result_refs(text: &str) -> Vec<(String, String)> {
    task_result()
        .captures_iter(text)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Rewrite task result references into reads of the mounted result files
pub fn rewrite_task_results(text: &str, dir: &str) -> String {
    task_result()
        .replace_all(text, |caps: &Captures| {
            format!("$(cat {}/{}/{})", dir, &caps[1], &caps[2])
        })
        .into_owned()
}
