//! RETS XML envelope interpretation.
//!
//! Every RETS reply is an XML document whose root carries `ReplyCode` and
//! `ReplyText`. [`parse`] builds a small owned element tree with quick_xml,
//! then enforces the reply-code contract: a nonzero code becomes
//! [`RetsError::Protocol`]. Text is kept exactly as sent (no trimming),
//! because compact search rows use tab and other whitespace as delimiters.
//! Bodies that are not valid UTF-8 are read as ISO-8859-1, which is what
//! older servers send for login and metadata replies.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Result, RetsError};

/// One XML element with its attributes, direct text and child elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated direct text and CDATA content.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First child named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a chain of first-children, e.g. `["METADATA", "METADATA-SYSTEM"]`.
    pub fn path(&self, names: &[&str]) -> Option<&Element> {
        names.iter().try_fold(self, |el, name| el.child(name))
    }
}

/// A decoded envelope whose reply code was zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub root: Element,
    pub reply_code: u32,
    pub reply_text: String,
}

/// Decode `body` and enforce the reply-code contract.
pub fn parse(body: &[u8]) -> Result<Envelope> {
    let root = parse_document(body)?;
    let reply_code = match root.attr("ReplyCode").map(str::trim) {
        None | Some("") => 0,
        Some(code) => code
            .parse::<u32>()
            .map_err(|_| RetsError::XmlParse(format!("ReplyCode is not a number: {code}")))?,
    };
    let reply_text = root.attr("ReplyText").unwrap_or_default().to_string();

    if reply_code != 0 {
        return Err(RetsError::Protocol {
            code: reply_code,
            text: reply_text,
        });
    }
    Ok(Envelope {
        root,
        reply_code,
        reply_text,
    })
}

/// `body` as text: UTF-8 when valid, otherwise ISO-8859-1.
pub fn decode_text(body: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(body) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(body.iter().map(|&b| char::from(b)).collect()),
    }
}

fn parse_document(body: &[u8]) -> Result<Element> {
    let text = decode_text(body);
    if text.trim().is_empty() {
        return Err(RetsError::XmlParse("empty response body".to_string()));
    }

    let mut reader = Reader::from_str(&text);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Err(e) => {
                return Err(RetsError::XmlParse(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                if root.is_some() {
                    return Err(RetsError::XmlParse("content after the root element".to_string()));
                }
                stack.push(element(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let el = element(&e)?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| RetsError::XmlParse("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| RetsError::XmlParse(e.to_string()))?;
                match stack.last_mut() {
                    Some(top) => top.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(RetsError::XmlParse("text outside the root element".to_string())),
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(RetsError::XmlParse("document ended inside an element".to_string()));
    }
    root.ok_or_else(|| RetsError::XmlParse("no root element".to_string()))
}

fn element(start: &BytesStart<'_>) -> Result<Element> {
    let mut el = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Element::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| RetsError::XmlParse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| RetsError::XmlParse(e.to_string()))?
            .into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None if root.is_none() => *root = Some(el),
        None => return Err(RetsError::XmlParse("more than one root element".to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_parse_error() {
        assert!(matches!(parse(b""), Err(RetsError::XmlParse(_))));
        assert!(matches!(parse(b"  \r\n"), Err(RetsError::XmlParse(_))));
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(parse(b"<RETS ReplyCode=\"0\"><COUNT></RETS>"), Err(RetsError::XmlParse(_))));
        assert!(matches!(parse(b"<RETS ReplyCode=\"0\">"), Err(RetsError::XmlParse(_))));
        assert!(matches!(parse(b"Service Unavailable"), Err(RetsError::XmlParse(_))));
    }

    #[test]
    fn nonzero_reply_code_is_protocol_error() {
        let err = parse(br#"<RETS ReplyCode="20201" ReplyText="No Records Found." />"#).unwrap_err();
        match err {
            RetsError::Protocol { code, text } => {
                assert_eq!(code, 20201);
                assert_eq!(text, "No Records Found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_reply_code_is_success() {
        let envelope = parse(b"<?xml version=\"1.0\"?><RETS><COUNT Records=\"3\"/></RETS>").unwrap();
        assert_eq!(envelope.reply_code, 0);
        assert_eq!(envelope.root.child("COUNT").unwrap().attr("Records"), Some("3"));
    }

    #[test]
    fn text_is_preserved_verbatim() {
        let envelope = parse(
            b"<RETS ReplyCode=\"0\" ReplyText=\"OK\"><DELIMITER value=\"09\"/><DATA>\tA\t\tB &amp; C\t</DATA></RETS>",
        )
        .unwrap();
        assert_eq!(envelope.reply_text, "OK");
        let data = envelope.root.child("DATA").unwrap();
        assert_eq!(data.text, "\tA\t\tB & C\t");
    }

    #[test]
    fn repeated_children_in_order() {
        let envelope = parse(b"<RETS ReplyCode=\"0\"><DATA>1</DATA><DATA>2</DATA><MAXROWS/></RETS>").unwrap();
        let rows: Vec<&str> = envelope.root.children("DATA").map(|d| d.text.as_str()).collect();
        assert_eq!(rows, ["1", "2"]);
        assert!(envelope.root.child("MAXROWS").is_some());
    }

    #[test]
    fn path_follows_nested_elements() {
        let envelope = parse(
            b"<RETS ReplyCode=\"0\"><METADATA><METADATA-SYSTEM><SYSTEM SystemID=\"MLS\"/></METADATA-SYSTEM></METADATA></RETS>",
        )
        .unwrap();
        let system = envelope.root.path(&["METADATA", "METADATA-SYSTEM", "SYSTEM"]).unwrap();
        assert_eq!(system.attr("SystemID"), Some("MLS"));
    }

    #[test]
    fn latin1_body_is_transcoded() {
        let envelope = parse(b"<RETS ReplyCode=\"0\"><SYSTEM SystemDescription=\"Montr\xe9al MLS\"/></RETS>").unwrap();
        let system = envelope.root.child("SYSTEM").unwrap();
        assert_eq!(system.attr("SystemDescription"), Some("Montréal MLS"));
        assert_eq!(decode_text("café".as_bytes()), "café");
    }

    #[test]
    fn cdata_contributes_text() {
        let envelope = parse(b"<RETS ReplyCode=\"0\"><RETS-RESPONSE><![CDATA[Search=/rets/search]]></RETS-RESPONSE></RETS>")
            .unwrap();
        assert_eq!(envelope.root.child("RETS-RESPONSE").unwrap().text, "Search=/rets/search");
    }
}
