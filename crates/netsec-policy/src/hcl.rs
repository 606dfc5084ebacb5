//! Small HCL writer shared by the platform adapters
//!
//! Adapters build [`Block`] trees and render them; attribute runs are aligned
//! on `=` the way `terraform fmt` does, so generated files diff cleanly.

use std::fmt::Write as _;

const INDENT: &str = "  ";

/// Convert a name into a valid Terraform resource identifier
pub fn tf_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) || out.is_empty() {
        out.insert(0, '_');
    }
    out
}

/// Escape a value for use inside an HCL string literal
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Quoted, escaped HCL string literal
pub fn quote(value: &str) -> String {
    format!("\"{}\"", escape(value))
}

/// HCL list of string literals
pub fn tf_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = items.into_iter().map(|item| quote(item.as_ref())).collect();
    format!("[{}]", quoted.join(", "))
}

/// HCL list of bare expressions (resource references)
pub fn tf_ref_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let refs: Vec<String> = items
        .into_iter()
        .map(|item| item.as_ref().to_string())
        .collect();
    format!("[{}]", refs.join(", "))
}

/// IANA protocol number for the protocols every platform understands
pub fn protocol_number(protocol: &str) -> Option<u8> {
    match protocol.to_ascii_lowercase().as_str() {
        "icmp" => Some(1),
        "tcp" => Some(6),
        "udp" => Some(17),
        _ => None,
    }
}

enum Item {
    Attr(String, String),
    Block(Block),
    Comment(String),
    Blank,
}

/// A block such as `resource "type" "name" { ... }`
pub struct Block {
    kind: String,
    labels: Vec<String>,
    body: Vec<Item>,
}

impl Block {
    /// Nested block with no labels
    pub fn new(kind: impl Into<String>) -> Self {
        Block {
            kind: kind.into(),
            labels: Vec::new(),
            body: Vec::new(),
        }
    }

    /// `resource "<ty>" "<name>"`
    pub fn resource(ty: &str, name: &str) -> Self {
        let mut block = Block::new("resource");
        block.labels = vec![ty.to_string(), tf_name(name)];
        block
    }

    /// `data "<ty>" "<name>"`
    pub fn data(ty: &str, name: &str) -> Self {
        let mut block = Block::new("data");
        block.labels = vec![ty.to_string(), tf_name(name)];
        block
    }

    /// Attribute with a raw expression
    pub fn attr(mut self, key: &str, expr: impl Into<String>) -> Self {
        self.push_attr(key, expr);
        self
    }

    /// Attribute with a string literal value
    pub fn string(self, key: &str, value: &str) -> Self {
        self.attr(key, quote(value))
    }

    /// Attribute with a list of string literals
    pub fn list<I, S>(self, key: &str, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.attr(key, tf_list(items))
    }

    /// Attribute only when `value` is present
    pub fn string_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.string(key, value),
            None => self,
        }
    }

    /// Nested block
    pub fn child(mut self, block: Block) -> Self {
        self.push(block);
        self
    }

    /// Nested blocks
    pub fn children(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        for block in blocks {
            self.push(block);
        }
        self
    }

    /// Line comment
    pub fn comment(mut self, text: &str) -> Self {
        self.body.push(Item::Comment(text.to_string()));
        self
    }

    /// Empty line separating attribute runs
    pub fn blank(mut self) -> Self {
        self.body.push(Item::Blank);
        self
    }

    /// Append an attribute in place
    pub fn push_attr(&mut self, key: &str, expr: impl Into<String>) {
        self.body.push(Item::Attr(key.to_string(), expr.into()));
    }

    /// Append a nested block in place
    pub fn push(&mut self, block: Block) {
        self.body.push(Item::Block(block));
    }

    /// `lifecycle { create_before_destroy = true }`
    pub fn create_before_destroy(self) -> Self {
        self.child(Block::new("lifecycle").attr("create_before_destroy", "true"))
    }

    /// Render as HCL text ending in a newline
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        let _ = write!(out, "{pad}{}", self.kind);
        for label in &self.labels {
            let _ = write!(out, " {}", quote(label));
        }
        out.push_str(" {\n");

        let inner = INDENT.repeat(depth + 1);
        let mut index = 0;
        while index < self.body.len() {
            match &self.body[index] {
                Item::Attr(..) => {
                    let run_end = self.body[index..]
                        .iter()
                        .position(|item| !matches!(item, Item::Attr(..)))
                        .map_or(self.body.len(), |offset| index + offset);
                    let width = self.body[index..run_end]
                        .iter()
                        .filter_map(|item| match item {
                            Item::Attr(key, _) => Some(key.len()),
                            _ => None,
                        })
                        .max()
                        .unwrap_or(0);
                    for item in &self.body[index..run_end] {
                        if let Item::Attr(key, expr) = item {
                            let _ = writeln!(out, "{inner}{key:<width$} = {expr}");
                        }
                    }
                    index = run_end;
                    continue;
                }
                Item::Block(block) => {
                    if index > 0 && !matches!(self.body[index - 1], Item::Blank) {
                        out.push('\n');
                    }
                    block.render_into(out, depth + 1);
                }
                Item::Comment(text) => {
                    let _ = writeln!(out, "{inner}# {text}");
                }
                Item::Blank => out.push('\n'),
            }
            index += 1;
        }

        let _ = writeln!(out, "{pad}}}");
    }
}

/// Join rendered blocks with a blank line between them
pub fn join_blocks(blocks: impl IntoIterator<Item = Block>) -> String {
    blocks
        .into_iter()
        .map(|block| block.render())
        .collect::<Vec<_>>()
        .join("\n")
}
