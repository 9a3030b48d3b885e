//! RSS/Atom payload parsing.
//!
//! Feeds are parsed into a schema-agnostic JSON tree instead of typed
//! structs: element children become object keys, repeated elements become
//! arrays, attributes live under `"$"`, and mixed text lands in `"_"`.
//! The normalizer downstream decides what shape an item actually is, so
//! the parser stays ignorant of vendor namespaces.

use jobsync_core::AppError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Parse a feed payload and return its raw items.
///
/// Items are looked up at `rss/channel/item` and `feed/entry`. A feed with
/// a recognized envelope but no items is empty, not an error; anything
/// without either envelope is rejected.
pub fn parse_feed(xml: &str) -> Result<Vec<Value>, AppError> {
    let root = parse_tree(xml)?;

    let items = root
        .get("rss")
        .and_then(|rss| rss.get("channel"))
        .and_then(|channel| channel.get("item"))
        .or_else(|| root.get("feed").and_then(|feed| feed.get("entry")));

    match items {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(item) => Ok(vec![item.clone()]),
        None if root.get("rss").is_some() || root.get("feed").is_some() => Ok(Vec::new()),
        None => Err(AppError::Parse(
            "unrecognized feed format: expected an rss or feed envelope".into(),
        )),
    }
}

/// An element being built while its end tag is still pending.
struct PartialElement {
    name: String,
    attrs: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl PartialElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, AppError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| AppError::Parse(format!("bad attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| AppError::Parse(format!("bad attribute value: {e}")))?;
            attrs.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            attrs,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn finish(self) -> Value {
        let text = self.text.trim();
        if self.attrs.is_empty() && self.children.is_empty() {
            return Value::String(text.to_string());
        }

        let mut object = Map::new();
        if !self.attrs.is_empty() {
            object.insert("$".to_string(), Value::Object(self.attrs));
        }
        for (key, value) in self.children {
            object.insert(key, value);
        }
        if !text.is_empty() {
            object.insert("_".to_string(), Value::String(text.to_string()));
        }
        Value::Object(object)
    }
}

/// Insert a child, promoting repeated names to an array.
fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

/// Walk the event stream into a single tree rooted at the document element.
fn parse_tree(xml: &str) -> Result<Value, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().expand_empty_elements = true;

    let mut stack: Vec<PartialElement> = Vec::new();
    let mut root = Map::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(PartialElement::from_start(&start)?);
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = text
                        .unescape()
                        .map_err(|e| AppError::Parse(format!("bad text content: {e}")))?;
                    top.text.push_str(&decoded);
                }
            }
            Ok(Event::CData(cdata)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| AppError::Parse("unbalanced end tag".into()))?;
                let name = element.name.clone();
                let value = element.finish();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions, doctypes.
            Ok(_) => {}
            Err(e) => return Err(AppError::Parse(format!("malformed XML: {e}"))),
        }
    }

    if !stack.is_empty() {
        return Err(AppError::Parse("truncated document".into()));
    }
    if root.is_empty() {
        return Err(AppError::Parse("empty document".into()));
    }
    Ok(Value::Object(root))
}
