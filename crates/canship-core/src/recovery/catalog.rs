//! Known library namespaces and the purely syntactic rewrites built on them.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `from` → `to` textual substitution applied during simplification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineRewrite {
    pub from: String,
    pub to: String,
}

impl InlineRewrite {
    fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Library namespaces the artifact language ships with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryCatalog {
    pub namespaces: Vec<String>,

    /// Declaration line for a namespace; `{ns}` is substituted.
    pub import_template: String,

    pub inline_rewrites: Vec<InlineRewrite>,
}

impl Default for LibraryCatalog {
    fn default() -> Self {
        let namespaces = [
            "Array", "Blob", "Bool", "Buffer", "Char", "Debug", "Float", "Hash", "HashMap", "Int",
            "Iter", "List", "Nat", "Nat8", "Nat16", "Nat32", "Nat64", "Option", "Order",
            "Principal", "Result", "Text", "Time", "Trie", "TrieMap",
        ];
        Self {
            namespaces: namespaces.iter().map(|n| (*n).to_string()).collect(),
            import_template: r#"import {ns} "mo:base/{ns}";"#.to_string(),
            inline_rewrites: vec![
                InlineRewrite::new("Nat.toText(", "debug_show("),
                InlineRewrite::new("Int.toText(", "debug_show("),
                InlineRewrite::new("Float.toText(", "debug_show("),
                InlineRewrite::new("Bool.toText(", "debug_show("),
                InlineRewrite::new("Principal.toText(", "debug_show("),
                InlineRewrite::new("Debug.print(", "ignore ("),
            ],
        }
    }
}

impl LibraryCatalog {
    pub fn declaration(&self, namespace: &str) -> String {
        self.import_template.replace("{ns}", namespace)
    }

    /// Text of the template before the namespace, e.g. `import `.
    fn declaration_prefix(&self) -> &str {
        self.import_template
            .split("{ns}")
            .next()
            .unwrap_or_default()
    }

    fn alternation(&self) -> String {
        // Longest first so `Nat8` is not shadowed by `Nat`.
        let mut names: Vec<&String> = self.namespaces.iter().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|")
    }

    fn declaration_regex(&self) -> Option<Regex> {
        if self.namespaces.is_empty() {
            return None;
        }
        let pattern = format!(
            r"(?m)^\s*{}({})\b.*$",
            regex::escape(self.declaration_prefix().trim_start()),
            self.alternation()
        );
        Regex::new(&pattern).ok()
    }

    fn reference_regex(&self) -> Option<Regex> {
        if self.namespaces.is_empty() {
            return None;
        }
        Regex::new(&format!(r"\b({})\.[A-Za-z_]", self.alternation())).ok()
    }

    /// Namespaces the source declares.
    pub fn declared(&self, source: &str) -> BTreeSet<String> {
        let Some(re) = self.declaration_regex() else {
            return BTreeSet::new();
        };
        re.captures_iter(source)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Namespaces referenced as `Namespace.member`, ignoring comment lines
    /// and declaration lines.
    pub fn referenced(&self, source: &str) -> BTreeSet<String> {
        let (Some(refs), Some(decls)) = (self.reference_regex(), self.declaration_regex()) else {
            return BTreeSet::new();
        };
        source
            .lines()
            .filter(|line| !line.trim_start().starts_with("//"))
            .filter(|line| !decls.is_match(line))
            .flat_map(|line| {
                refs.captures_iter(line)
                    .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Referenced but undeclared namespaces, sorted.
    pub fn missing_declarations(&self, source: &str) -> Vec<String> {
        let declared = self.declared(source);
        self.referenced(source)
            .into_iter()
            .filter(|ns| !declared.contains(ns))
            .collect()
    }

    /// Prepend declarations for every missing namespace. `None` when nothing
    /// is missing.
    pub fn repair_imports(&self, source: &str) -> Option<String> {
        let missing = self.missing_declarations(source);
        if missing.is_empty() {
            return None;
        }
        let mut repaired: String = missing
            .iter()
            .map(|ns| format!("{}\n", self.declaration(ns)))
            .collect();
        repaired.push_str(source);
        Some(repaired)
    }

    /// Drop every catalog declaration and apply the inline rewrites.
    pub fn simplify(&self, source: &str) -> String {
        let stripped = match self.declaration_regex() {
            Some(re) => source
                .lines()
                .filter(|line| !re.is_match(line))
                .collect::<Vec<_>>()
                .join("\n"),
            None => source.to_string(),
        };

        let mut simplified = self
            .inline_rewrites
            .iter()
            .fold(stripped, |acc, rw| acc.replace(&rw.from, &rw.to));
        if source.ends_with('\n') && !simplified.ends_with('\n') {
            simplified.push('\n');
        }
        simplified
    }
}
