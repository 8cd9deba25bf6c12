//! Structural XML/JSON conversion for SOAP/REST conversion modes.
//!
//! Conversion is a structural reparse of the tree, not semantic mapping:
//! elements become object fields, repeated siblings become arrays,
//! attributes become `@`-prefixed fields, mixed text lands under `#text`.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised during structural conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed document: {0}")]
    Malformed(String),
}

struct ElementFrame {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<(String, Value)>,
    text: String,
}

/// Parses an XML document into a JSON tree `{root_name: root_value}`.
pub fn xml_to_json(xml: &str) -> Result<Value, ConversionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<ElementFrame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let frame = open_frame(&start)?;
                stack.push(frame);
            }
            Event::Empty(start) => {
                let frame = open_frame(&start)?;
                let (name, value) = close_frame(frame);
                attach(&mut stack, &mut root, name, value)?;
            }
            Event::Text(text) => {
                let decoded = text
                    .unescape()
                    .map_err(|e| ConversionError::Malformed(e.to_string()))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&decoded);
                }
            }
            Event::CData(cdata) => {
                if let Some(frame) = stack.last_mut() {
                    frame
                        .text
                        .push_str(&String::from_utf8_lossy(cdata.as_ref()));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| ConversionError::Malformed("Unbalanced end tag".to_string()))?;
                let (name, value) = close_frame(frame);
                attach(&mut stack, &mut root, name, value)?;
            }
            Event::Eof => break,
            // Declarations, comments and processing instructions carry no structure.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ConversionError::Malformed(
            "Document ended with unclosed elements".to_string(),
        ));
    }

    let (name, value) =
        root.ok_or_else(|| ConversionError::Malformed("Document has no root element".to_string()))?;
    let mut wrapper = Map::new();
    wrapper.insert(name, value);
    Ok(Value::Object(wrapper))
}

fn open_frame(start: &quick_xml::events::BytesStart<'_>) -> Result<ElementFrame, ConversionError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ConversionError::Malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ConversionError::Malformed(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(ElementFrame {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn close_frame(frame: ElementFrame) -> (String, Value) {
    let text = frame.text.trim().to_string();

    // Leaf element: just its text content.
    if frame.children.is_empty() && frame.attributes.is_empty() {
        return (frame.name, Value::String(text));
    }

    let mut object = Map::new();
    for (key, value) in frame.attributes {
        object.insert(format!("@{}", key), Value::String(value));
    }

    // Repeated sibling names collapse into arrays, preserving order.
    for (name, value) in frame.children {
        match object.get_mut(&name) {
            Some(Value::Array(existing)) => existing.push(value),
            Some(_) => {
                let first = object.remove(&name).unwrap_or(Value::Null);
                object.insert(name, Value::Array(vec![first, value]));
            }
            None => {
                object.insert(name, value);
            }
        }
    }

    if !text.is_empty() {
        object.insert("#text".to_string(), Value::String(text));
    }

    (frame.name, Value::Object(object))
}

fn attach(
    stack: &mut [ElementFrame],
    root: &mut Option<(String, Value)>,
    name: String,
    value: Value,
) -> Result<(), ConversionError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push((name, value));
        return Ok(());
    }
    if root.is_some() {
        return Err(ConversionError::Malformed(
            "Document has multiple root elements".to_string(),
        ));
    }
    *root = Some((name, value));
    Ok(())
}

/// Renders a JSON tree as an XML document.
///
/// When `value` is an object with exactly one key, that key becomes the
/// root element; otherwise the tree is wrapped in `root_name`.
pub fn json_to_xml(value: &Value, root_name: &str) -> Result<String, ConversionError> {
    let mut out = String::new();
    match value {
        Value::Object(map) if map.len() == 1 => {
            let (name, child) = map.iter().next().expect("len checked");
            write_element(&mut out, name, child);
        }
        other => write_element(&mut out, root_name, other),
    }
    Ok(out)
}

fn write_element(out: &mut String, name: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(out, name, item);
            }
        }
        Value::Object(map) => {
            out.push('<');
            out.push_str(name);
            for (key, child) in map.iter().filter(|(k, _)| k.starts_with('@')) {
                out.push(' ');
                out.push_str(&key[1..]);
                out.push_str("=\"");
                out.push_str(&escape(scalar_text(child).as_str()));
                out.push('"');
            }
            out.push('>');
            for (key, child) in map.iter() {
                if key.starts_with('@') {
                    continue;
                }
                if key == "#text" {
                    out.push_str(&escape(scalar_text(child).as_str()));
                } else {
                    write_element(out, key, child);
                }
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        scalar => {
            out.push('<');
            out.push_str(name);
            out.push('>');
            out.push_str(&escape(scalar_text(scalar).as_str()));
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_xml_to_json_nested_elements() {
        let xml = "<order><id>42</id><customer><name>Ada</name></customer></order>";
        let value = xml_to_json(xml).unwrap();
        assert_eq!(
            value,
            json!({"order": {"id": "42", "customer": {"name": "Ada"}}})
        );
    }

    #[test]
    fn test_xml_to_json_repeated_siblings_become_array() {
        let xml = "<cart><item>a</item><item>b</item><item>c</item></cart>";
        let value = xml_to_json(xml).unwrap();
        assert_eq!(value, json!({"cart": {"item": ["a", "b", "c"]}}));
    }

    #[test]
    fn test_xml_to_json_attributes_prefixed() {
        let xml = r#"<item sku="A-1">widget</item>"#;
        let value = xml_to_json(xml).unwrap();
        assert_eq!(value, json!({"item": {"@sku": "A-1", "#text": "widget"}}));
    }

    #[test]
    fn test_xml_to_json_empty_element() {
        let value = xml_to_json("<root><empty/></root>").unwrap();
        assert_eq!(value, json!({"root": {"empty": ""}}));
    }

    #[test]
    fn test_xml_to_json_unbalanced_is_error() {
        assert!(xml_to_json("<a><b></a>").is_err());
    }

    #[test]
    fn test_xml_to_json_no_root_is_error() {
        assert!(matches!(
            xml_to_json("   "),
            Err(ConversionError::Malformed(_))
        ));
    }

    #[test]
    fn test_json_to_xml_single_key_becomes_root() {
        let value = json!({"order": {"id": 42, "open": true}});
        let xml = json_to_xml(&value, "unused").unwrap();
        assert_eq!(xml, "<order><id>42</id><open>true</open></order>");
    }

    #[test]
    fn test_json_to_xml_array_repeats_element() {
        let value = json!({"cart": {"item": ["a", "b"]}});
        let xml = json_to_xml(&value, "unused").unwrap();
        assert_eq!(xml, "<cart><item>a</item><item>b</item></cart>");
    }

    #[test]
    fn test_json_to_xml_escapes_text() {
        let value = json!({"note": "a < b & c"});
        let xml = json_to_xml(&value, "unused").unwrap();
        assert_eq!(xml, "<note>a &lt; b &amp; c</note>");
    }

    #[test]
    fn test_json_to_xml_wraps_multi_key_object() {
        let value = json!({"a": 1, "b": 2});
        let xml = json_to_xml(&value, "payload").unwrap();
        assert_eq!(xml, "<payload><a>1</a><b>2</b></payload>");
    }

    #[test]
    fn test_structural_roundtrip() {
        let xml = "<envelope><body><amount>10</amount></body></envelope>";
        let value = xml_to_json(xml).unwrap();
        let back = json_to_xml(&value, "unused").unwrap();
        assert_eq!(back, xml);
    }
}
