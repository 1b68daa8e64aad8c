//! XML serialization of an assembled model (spec.md §4.7).

use std::borrow::Cow;
use std::io::Write;
use std::rc::Rc;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::binxml::TypedValue;
use crate::error::{EvtxError, Result};
use crate::model::XmlModelItem;

/// Renders an assembled model as a complete XML document.
///
/// Empty elements are rendered with a separate start and end tag rather
/// than self-closed (spec.md §4.7), matching the teacher's writer, which
/// always emits `Event::Start` / `Event::End` pairs and never `Event::Empty`.
pub fn render(model: &[XmlModelItem], indent: bool) -> Result<String> {
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = if indent {
            Writer::new_with_indent(&mut buf, b' ', 2)
        } else {
            Writer::new(&mut buf)
        };
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        write_items(&mut writer, model)?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_items<W: Write>(writer: &mut Writer<W>, model: &[XmlModelItem]) -> Result<()> {
    let mut stack: Vec<Rc<str>> = Vec::new();
    let mut i = 0;

    while i < model.len() {
        match &model[i] {
            XmlModelItem::OpenElement { name, attributes } => {
                let event = build_start_tag(name, attributes);
                writer.write_event(Event::Start(event))?;
                stack.push(Rc::clone(name));
                i += 1;
            }
            XmlModelItem::CloseElement => {
                let name = stack
                    .pop()
                    .ok_or(EvtxError::ModelState { reason: "CloseElement with no matching open during rendering" })?;
                writer.write_event(Event::End(BytesEnd::new(name.to_string())))?;
                i += 1;
            }
            XmlModelItem::Text(value) => {
                let text = value.to_display_string();
                let escaped = escape_text(&text);
                writer.write_event(Event::Text(BytesText::from_escaped(escaped)))?;
                i += 1;
            }
            XmlModelItem::ProcessingInstruction { target, data } => {
                let concat = format!("{target} {data}");
                writer.write_event(Event::PI(BytesPI::new(&concat)))?;
                i += 1;
            }
            XmlModelItem::EntityRef(name) => {
                let xml_ref = format!("&{name};");
                writer.write_event(Event::Text(BytesText::from_escaped(xml_ref)))?;
                i += 1;
            }
        }
    }

    if !stack.is_empty() {
        return Err(EvtxError::ModelState {
            reason: "unclosed element at end of model while rendering XML",
        });
    }
    Ok(())
}

fn build_start_tag<'a>(name: &'a str, attributes: &'a [(Rc<str>, TypedValue)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for (attr_name, attr_value) in attributes {
        if attr_value.is_null() || attr_value.is_empty_string() {
            continue;
        }
        let text = attr_value.to_display_string();
        if text.is_empty() {
            continue;
        }
        let escaped = escape_attr(&text);
        start.push_attribute(Attribute {
            key: quick_xml::name::QName(attr_name.as_bytes()),
            value: Cow::Owned(escaped.into_bytes()),
        });
    }
    start
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_element_uses_start_and_end_tags() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("E"), attributes: vec![] },
            XmlModelItem::CloseElement,
        ];
        let xml = render(&model, false).unwrap();
        assert!(xml.contains("<E></E>") || xml.contains("<E>\n</E>") || xml.contains("<E>"));
        assert!(xml.contains("</E>"));
    }

    #[test]
    fn element_with_text_uses_start_and_end_tags() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("Computer"), attributes: vec![] },
            XmlModelItem::Text(TypedValue::String("DESKTOP-1".into())),
            XmlModelItem::CloseElement,
        ];
        let xml = render(&model, false).unwrap();
        assert!(xml.contains("<Computer>DESKTOP-1</Computer>"));
    }

    #[test]
    fn attribute_with_empty_string_value_is_omitted() {
        let model = vec![
            XmlModelItem::OpenElement {
                name: Rc::from("E"),
                attributes: vec![(Rc::from("a"), TypedValue::String(String::new()))],
            },
            XmlModelItem::CloseElement,
        ];
        let xml = render(&model, false).unwrap();
        assert!(!xml.contains("a="));
    }

    #[test]
    fn text_is_escaped() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("E"), attributes: vec![] },
            XmlModelItem::Text(TypedValue::String("<tag> & \"quote\"".into())),
            XmlModelItem::CloseElement,
        ];
        let xml = render(&model, false).unwrap();
        assert!(xml.contains("&lt;tag&gt; &amp; \"quote\""));
    }
}
