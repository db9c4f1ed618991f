//! Markup helpers
//!
//! Serialization escapes, a small fragment reader used when rendering stored
//! content and accepting sanitized paste content, and the id rewrite applied
//! to stored content during renumbering.
//!
//! The reader is a simplified tokenizer plus a forgiving tree builder, not a
//! full HTML5 parser:
//! - Tag and attribute names are ASCII `[A-Za-z0-9:_-]`, lowercased.
//! - Void elements never take children; `<br/>` and `<br>` are the same.
//! - Unmatched end tags are dropped, unclosed elements close at end of input.
//! - Comments and `<!...>` declarations are skipped.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const OPENING_ID_PATTERN: &str = r#"^(\s*<[a-zA-Z][a-zA-Z0-9]*(?:\s+[^>]*?)?\sid=")([^"]*)(")"#;
const HTML_COMMENT_START: &str = "<!--";
const HTML_COMMENT_END: &str = "-->";

/// A node read from markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<MarkupNode>,
    },
    Text(String),
}

impl MarkupNode {
    pub fn tag(&self) -> Option<&str> {
        match self {
            MarkupNode::Element { tag, .. } => Some(tag),
            MarkupNode::Text(_) => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            MarkupNode::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            MarkupNode::Text(_) => None,
        }
    }

    /// Concatenated text of this node and its descendants
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            MarkupNode::Text(text) => out.push_str(text),
            MarkupNode::Element { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }
}

pub fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|end| *end <= 10) {
            Some(end) => {
                let entity = &tail[1..end];
                match decode_entity(entity) {
                    Some(c) => out.push(c),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End(String),
    Text(String),
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-')
}

fn tokenize(input: &str) -> Vec<Token> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    let flush_text = |tokens: &mut Vec<Token>, from: usize, to: usize| {
        if from < to {
            tokens.push(Token::Text(decode_entities(&input[from..to])));
        }
    };

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if input[i..].starts_with(HTML_COMMENT_START) {
            flush_text(&mut tokens, text_start, i);
            i = match input[i + HTML_COMMENT_START.len()..].find(HTML_COMMENT_END) {
                Some(end) => i + HTML_COMMENT_START.len() + end + HTML_COMMENT_END.len(),
                None => bytes.len(),
            };
            text_start = i;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        match next {
            Some(b'!') | Some(b'?') => {
                flush_text(&mut tokens, text_start, i);
                i = input[i..].find('>').map(|end| i + end + 1).unwrap_or(bytes.len());
                text_start = i;
            }
            Some(b'/') => {
                let mut j = i + 2;
                while j < bytes.len() && is_name_byte(bytes[j]) {
                    j += 1;
                }
                if j == i + 2 {
                    i += 1;
                    continue;
                }
                flush_text(&mut tokens, text_start, i);
                let name = input[i + 2..j].to_ascii_lowercase();
                i = input[j..].find('>').map(|end| j + end + 1).unwrap_or(bytes.len());
                tokens.push(Token::End(name));
                text_start = i;
            }
            Some(b) if b.is_ascii_alphabetic() => {
                flush_text(&mut tokens, text_start, i);
                let (token, end) = read_start_tag(input, i + 1);
                tokens.push(token);
                i = end;
                text_start = i;
            }
            _ => i += 1,
        }
    }
    flush_text(&mut tokens, text_start, bytes.len());
    tokens
}

/// Read a start tag whose name begins at `start`; returns the token and
/// the offset just past `>`
fn read_start_tag(input: &str, start: usize) -> (Token, usize) {
    let bytes = input.as_bytes();
    let mut i = start;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = input[start..i].to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i) {
            None => break,
            Some(b'>') => {
                i += 1;
                break;
            }
            Some(b'/') => {
                self_closing = true;
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        if i == name_start {
            i += 1;
            continue;
        }
        let attr_name = input[name_start..i].to_ascii_lowercase();
        self_closing = false;

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let value_start = i + 1;
                    let value_end = input[value_start..]
                        .find(quote as char)
                        .map(|end| value_start + end)
                        .unwrap_or(bytes.len());
                    value = decode_entities(&input[value_start..value_end]);
                    i = (value_end + 1).min(bytes.len());
                }
                _ => {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = decode_entities(&input[value_start..i]);
                }
            }
        }
        // First occurrence wins
        if !attrs.iter().any(|(n, _)| *n == attr_name) {
            attrs.push((attr_name, value));
        }
    }

    (
        Token::Start {
            name,
            attrs,
            self_closing,
        },
        i,
    )
}

/// Read a markup fragment into a forest of nodes
pub fn parse_fragment(html: &str) -> Vec<MarkupNode> {
    // Open elements: (tag, attrs, children)
    let mut stack: Vec<(String, Vec<(String, String)>, Vec<MarkupNode>)> = Vec::new();
    let mut roots: Vec<MarkupNode> = Vec::new();

    fn push_node(
        stack: &mut [(String, Vec<(String, String)>, Vec<MarkupNode>)],
        roots: &mut Vec<MarkupNode>,
        node: MarkupNode,
    ) {
        match stack.last_mut() {
            Some((_, _, children)) => children.push(node),
            None => roots.push(node),
        }
    }

    fn close_top(
        stack: &mut Vec<(String, Vec<(String, String)>, Vec<MarkupNode>)>,
        roots: &mut Vec<MarkupNode>,
    ) {
        if let Some((tag, attrs, children)) = stack.pop() {
            push_node(stack, roots, MarkupNode::Element { tag, attrs, children });
        }
    }

    for token in tokenize(html) {
        match token {
            Token::Text(text) => push_node(&mut stack, &mut roots, MarkupNode::Text(text)),
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                if self_closing || is_void_element(&name) {
                    push_node(
                        &mut stack,
                        &mut roots,
                        MarkupNode::Element {
                            tag: name,
                            attrs,
                            children: Vec::new(),
                        },
                    );
                } else {
                    stack.push((name, attrs, Vec::new()));
                }
            }
            Token::End(name) => {
                let Some(depth) = stack.iter().rposition(|(tag, _, _)| *tag == name) else {
                    continue;
                };
                while stack.len() > depth {
                    close_top(&mut stack, &mut roots);
                }
            }
        }
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }
    roots
}

/// Read exactly one element, ignoring surrounding whitespace. Inline
/// markup inside it is kept.
pub fn parse_block_markup(html: &str) -> Option<MarkupNode> {
    let mut elements = parse_fragment(html)
        .into_iter()
        .filter(|node| !matches!(node, MarkupNode::Text(t) if t.trim().is_empty()));
    let first = elements.next()?;
    if elements.next().is_some() || first.tag().is_none() {
        return None;
    }
    Some(first)
}

/// Replace the `id` attribute of the outermost element in `content`.
///
/// Content whose opening tag carries no `id` is returned unchanged.
pub fn rewrite_element_id(content: &str, new_id: &str) -> String {
    static OPENING_ID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = OPENING_ID_REGEX
        .get_or_init(|| Regex::new(OPENING_ID_PATTERN).expect("constant id pattern compiles"));
    regex
        .replacen(content, 1, |caps: &Captures| {
            format!("{}{}{}", &caps[1], escape_attr(new_id), &caps[3])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, attrs: &[(&str, &str)], children: Vec<MarkupNode>) -> MarkupNode {
        MarkupNode::Element {
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            children,
        }
    }

    fn text(t: &str) -> MarkupNode {
        MarkupNode::Text(t.to_string())
    }

    #[test]
    fn test_parse_block_keeps_inline_markup() {
        let block = parse_block_markup(r#"<p class="lead" data-x="1">Hello <b>bold</b> &amp; more</p>"#)
            .unwrap();
        assert_eq!(
            block,
            element(
                "p",
                &[("class", "lead"), ("data-x", "1")],
                vec![
                    text("Hello "),
                    element("b", &[], vec![text("bold")]),
                    text(" & more"),
                ]
            )
        );
        assert_eq!(block.text(), "Hello bold & more");
    }

    #[test]
    fn test_void_elements_take_no_children() {
        let block = parse_block_markup("<p>one<br>two<br/>three</p>").unwrap();
        assert_eq!(
            block,
            element(
                "p",
                &[],
                vec![
                    text("one"),
                    element("br", &[], vec![]),
                    text("two"),
                    element("br", &[], vec![]),
                    text("three"),
                ]
            )
        );
    }

    #[test]
    fn test_hypercites_and_marks_survive() {
        let block = parse_block_markup(
            r#"<p id="4">see <a id="hypercite_9" href='#x'>this</a> and <mark class="hl_1">that</mark></p>"#,
        )
        .unwrap();
        let MarkupNode::Element { children, .. } = &block else {
            panic!("element expected");
        };
        assert_eq!(children[1].attr("id"), Some("hypercite_9"));
        assert_eq!(children[1].attr("href"), Some("#x"));
        assert_eq!(children[3].tag(), Some("mark"));
    }

    #[test]
    fn test_forgiving_tree_building() {
        // Stray end tag dropped, unclosed element closed at the end
        assert_eq!(
            parse_fragment("<p>a</span><i>b"),
            vec![element("p", &[], vec![text("a"), element("i", &[], vec![text("b")])])]
        );
        // A closer for an outer element closes everything inside it
        assert_eq!(
            parse_fragment("<p><b>x</p>y"),
            vec![element("p", &[], vec![element("b", &[], vec![text("x")])]), text("y")]
        );
        assert_eq!(parse_fragment("a <!-- note --> b"), vec![text("a "), text(" b")]);
    }

    #[test]
    fn test_parse_rejects_bare_text_and_siblings() {
        assert!(parse_block_markup("just text").is_none());
        assert!(parse_block_markup("<p>a</p><p>b</p>").is_none());
        assert!(parse_block_markup("  <h2>ok</h2>\n").is_some());
    }

    #[test]
    fn test_entities_and_stray_angle_brackets() {
        assert_eq!(
            parse_fragment("1 < 2 &lt; 3 &#65;&#x42; &bogus; &"),
            vec![text("1 < 2 < 3 AB &bogus; &")]
        );
    }

    #[test]
    fn test_rewrite_element_id_only_touches_outer_element() {
        let content = r#"<p id="1.5" data-node-id="b_1_x">see <a id="hypercite_9">x</a></p>"#;
        assert_eq!(
            rewrite_element_id(content, "300"),
            r#"<p id="300" data-node-id="b_1_x">see <a id="hypercite_9">x</a></p>"#
        );
    }

    #[test]
    fn test_rewrite_element_id_without_id_is_unchanged() {
        let content = r#"<p data-node-id="b_1_x">text</p>"#;
        assert_eq!(rewrite_element_id(content, "300"), content);
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_text("a<b & c>"), "a&lt;b &amp; c&gt;");
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
    }
}
