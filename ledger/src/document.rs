//! Minimal markup tree for book bodies.
//!
//! Text nodes keep their raw source text. Character references are not
//! decoded; they are re-emitted verbatim inside attribution spans and counted
//! as one character each by [`crate::math::visible_len`].

use std::sync::LazyLock;

use regex::Regex;

use crate::error::DocumentError;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?P<comment><!--.*?-->)|<(?P<close>/?)(?P<name>[A-Za-z][A-Za-z0-9:_-]*)(?P<attrs>[^>]*)>|(?P<decl><[!?][^>]*>)")
        .expect("valid token pattern")
});

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocNode {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Raw attribute source, including its leading whitespace.
    pub attributes: String,
    pub children: Vec<DocNode>,
}

impl Element {
    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }

    pub fn open_tag(&self) -> String {
        if self.is_void() {
            format!("<{}{} />", self.name, self.attributes)
        } else {
            format!("<{}{}>", self.name, self.attributes)
        }
    }

    pub fn close_tag(&self) -> String {
        format!("</{}>", self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub nodes: Vec<DocNode>,
}

/// Capability that turns a book body into a [`Document`].
pub trait DocumentParser: Send + Sync {
    fn parse(&self, markup: &str) -> Result<Document, DocumentError>;
}

/// Strict fragment parser: every non-void element must be closed in order.
/// Comments and declarations are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentParser;

struct Frame {
    element: Element,
    offset: usize,
}

impl DocumentParser for FragmentParser {
    fn parse(&self, markup: &str) -> Result<Document, DocumentError> {
        let mut root: Vec<DocNode> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut cursor = 0;

        for caps in TOKEN_RE.captures_iter(markup) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > cursor {
                push_node(
                    &mut root,
                    &mut stack,
                    DocNode::Text(markup[cursor..whole.start()].to_string()),
                );
            }
            cursor = whole.end();

            if caps.name("comment").is_some() || caps.name("decl").is_some() {
                continue;
            }
            let (Some(name), Some(close), Some(attrs)) =
                (caps.name("name"), caps.name("close"), caps.name("attrs"))
            else {
                continue;
            };
            let name = name.as_str().to_ascii_lowercase();

            if !close.as_str().is_empty() {
                let frame = stack.pop().ok_or_else(|| DocumentError::StrayClose {
                    found: name.clone(),
                    offset: whole.start(),
                })?;
                if frame.element.name != name {
                    return Err(DocumentError::MismatchedClose {
                        expected: frame.element.name,
                        found: name,
                        offset: whole.start(),
                    });
                }
                push_node(&mut root, &mut stack, DocNode::Element(frame.element));
                continue;
            }

            let raw_attrs = attrs.as_str();
            let self_closing = raw_attrs.trim_end().ends_with('/');
            let attributes = raw_attrs.trim_end().trim_end_matches('/').trim_end().to_string();
            let element = Element {
                name,
                attributes,
                children: Vec::new(),
            };
            if element.is_void() || self_closing {
                push_node(&mut root, &mut stack, DocNode::Element(element));
            } else {
                stack.push(Frame {
                    element,
                    offset: whole.start(),
                });
            }
        }

        if cursor < markup.len() {
            push_node(
                &mut root,
                &mut stack,
                DocNode::Text(markup[cursor..].to_string()),
            );
        }
        if let Some(frame) = stack.pop() {
            log::debug!("unclosed <{}> opened at byte {}", frame.element.name, frame.offset);
            return Err(DocumentError::Unclosed {
                name: frame.element.name,
            });
        }
        Ok(Document { nodes: root })
    }
}

fn push_node(root: &mut Vec<DocNode>, stack: &mut [Frame], node: DocNode) {
    match stack.last_mut() {
        Some(frame) => frame.element.children.push(node),
        None => root.push(node),
    }
}
