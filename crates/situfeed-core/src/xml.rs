//! XML feed parsing into the [`Node`] object graph.
//!
//! Element names become field names (namespace prefixes and leading
//! underscores dropped), `xsi:type`
//! becomes the object's type name, attributes become text fields. Parsing is
//! all-or-nothing: any XML error or malformed record fails the document.

use crate::error::FetchError;
use crate::node::{Node, Object, Scalar};
use crate::record::{parse_timestamp, Publication, Situation, SituationRecord};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const SITUATION_PUBLICATION: &str = "SituationPublication";

/// Deepest element nesting accepted. DATEX II payloads stay well below 32.
pub const MAX_NESTING: usize = 256;

/// Parses a full feed document into a [`Publication`].
pub fn parse_publication(xml: &[u8]) -> Result<Publication, FetchError> {
    let root = parse_document(xml)?;
    publication_from_root(root)
}

/// Parses any XML document into its root [`Object`].
pub fn parse_document(xml: &[u8]) -> Result<Object, FetchError> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Object> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if root.is_some() {
                    return Err(FetchError::Malformed("content after root element".into()));
                }
                if stack.len() >= MAX_NESTING {
                    return Err(FetchError::Malformed("document nested too deeply".into()));
                }
                stack.push(Frame::open(&e)?);
            }
            Event::Empty(e) => {
                if root.is_some() {
                    return Err(FetchError::Malformed("content after root element".into()));
                }
                let frame = Frame::open(&e)?;
                close(frame, &mut stack, &mut root)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| FetchError::Malformed("unbalanced end tag".into()))?;
                close(frame, &mut stack, &mut root)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(FetchError::Malformed("document ended inside an element".into()));
    }
    root.ok_or_else(|| FetchError::Malformed("empty document".into()))
}

struct Frame {
    name: String,
    object: Object,
    text: String,
    typed: bool,
    nil: bool,
}

impl Frame {
    fn open(e: &BytesStart<'_>) -> Result<Self, FetchError> {
        // DATEX II extension elements carry a leading underscore.
        let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let name = local.trim_start_matches('_').to_string();
        let mut object = Object::new(upper_camel(&name));
        let mut typed = false;
        let mut nil = false;

        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let raw_key = attr.key.as_ref();
            if raw_key.starts_with(b"xmlns") {
                continue;
            }
            let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            if attr.key.prefix().is_some() {
                match local.as_str() {
                    "type" => {
                        object.type_name = local_part(&value).to_string();
                        typed = true;
                    }
                    "nil" => nil = value.trim() == "true",
                    _ => {}
                }
                continue;
            }
            object.push_field(local, Node::Scalar(Scalar::Text(value)));
        }

        Ok(Self {
            name,
            object,
            text: String::new(),
            typed,
            nil,
        })
    }

    fn finish(self) -> Option<Node> {
        if self.nil {
            return None;
        }
        let text = self.text.trim();
        let mut object = self.object;
        if object.fields.is_empty() && !self.typed {
            if text.is_empty() {
                return None;
            }
            return Some(Node::Scalar(Scalar::infer(text)));
        }
        if !text.is_empty() {
            object.text = Some(text.to_string());
        }
        Some(Node::Object(object))
    }
}

fn close(frame: Frame, stack: &mut [Frame], root: &mut Option<Object>) -> Result<(), FetchError> {
    let name = frame.name.clone();
    let type_name = frame.object.type_name.clone();
    let node = frame.finish();
    match stack.last_mut() {
        Some(parent) => {
            if let Some(node) = node {
                parent.object.push_field(name, node);
            }
        }
        None => match node {
            Some(Node::Object(obj)) => *root = Some(obj),
            _ => *root = Some(Object::new(type_name)),
        },
    }
    Ok(())
}

fn local_part(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified).trim()
}

fn upper_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn publication_from_root(mut root: Object) -> Result<Publication, FetchError> {
    if root.type_name != SITUATION_PUBLICATION {
        root = match take(&mut root, "payloadPublication") {
            Some(Node::Object(inner)) if inner.type_name == SITUATION_PUBLICATION => inner,
            _ => return Err(FetchError::UnexpectedPayload(root.type_name)),
        };
    }

    let publication_time = root
        .text_of("publicationTime")
        .and_then(|raw| parse_timestamp(&raw));

    let mut situations = Vec::new();
    for node in into_items(take(&mut root, "situation")) {
        let Node::Object(mut situation) = node else {
            return Err(FetchError::Malformed("situation is not an element".into()));
        };
        let id = situation.text_of("id");
        let mut records = Vec::new();
        for record in into_items(take(&mut situation, "situationRecord")) {
            let Node::Object(body) = record else {
                return Err(FetchError::Malformed("situationRecord is not an element".into()));
            };
            records.push(SituationRecord::from_object(body)?);
        }
        situations.push(Situation { id, records });
    }

    Ok(Publication {
        publication_time,
        situations,
    })
}

fn take(obj: &mut Object, name: &str) -> Option<Node> {
    let idx = obj.fields.iter().position(|(n, _)| n == name)?;
    Some(obj.fields.remove(idx).1)
}

fn into_items(node: Option<Node>) -> Vec<Node> {
    match node {
        Some(Node::List(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}
