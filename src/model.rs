//! Model assembler: folds an expanded token stream into a linear sequence
//! of XML-model items (spec.md §4.6, §3 XmlModelItem).

use std::rc::Rc;

use crate::binxml::{DeserializedToken, TypedValue};
use crate::error::{EvtxError, Result};
use crate::name::NameCache;

/// One item in the linearized element tree (spec.md §3).
#[derive(Debug, Clone)]
pub enum XmlModelItem {
    OpenElement {
        name: Rc<str>,
        attributes: Vec<(Rc<str>, TypedValue)>,
    },
    CloseElement,
    Text(TypedValue),
    ProcessingInstruction { target: Rc<str>, data: String },
    EntityRef(Rc<str>),
}

struct ElementBuilder {
    name: Rc<str>,
    attributes: Vec<(Rc<str>, TypedValue)>,
    pending_attr: Option<usize>,
    pending_attr_value_count: u32,
}

struct PiBuilder {
    target: Rc<str>,
}

/// Folds `tokens` (already expanded: no `TemplateInstance`/`Substitution`
/// remain) into a flat `XmlModelItem` sequence, resolving name references
/// against `chunk_data` via `names`.
pub fn assemble(
    tokens: &[DeserializedToken],
    chunk_data: &[u8],
    names: &mut NameCache,
) -> Result<Vec<XmlModelItem>> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut building: Option<ElementBuilder> = None;
    let mut pi_building: Option<PiBuilder> = None;
    let mut open_depth: u32 = 0;

    for token in tokens {
        match token {
            DeserializedToken::OpenStartElement { name_offset, .. } => {
                if building.is_some() {
                    return Err(ModelState("nested OpenStartElement before CloseStartElement"));
                }
                let name = names.resolve(chunk_data, *name_offset)?;
                building = Some(ElementBuilder {
                    name,
                    attributes: Vec::new(),
                    pending_attr: None,
                    pending_attr_value_count: 0,
                });
            }
            DeserializedToken::Attribute { name_offset } => {
                let builder = building
                    .as_mut()
                    .ok_or(ModelState("Attribute token outside of an element"))?;
                let name = names.resolve(chunk_data, *name_offset)?;
                builder.attributes.push((name, TypedValue::Null));
                builder.pending_attr = Some(builder.attributes.len() - 1);
                builder.pending_attr_value_count = 0;
            }
            DeserializedToken::CloseStartElement => {
                let builder = building
                    .take()
                    .ok_or(ModelState("CloseStartElement without a matching open"))?;
                finish_attribute(&builder)?;
                let attributes = builder
                    .attributes
                    .into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                out.push(XmlModelItem::OpenElement {
                    name: builder.name,
                    attributes,
                });
                open_depth += 1;
            }
            DeserializedToken::CloseEmptyElement => {
                let builder = building
                    .take()
                    .ok_or(ModelState("CloseEmptyElement without a matching open"))?;
                finish_attribute(&builder)?;
                let attributes = builder
                    .attributes
                    .into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                out.push(XmlModelItem::OpenElement {
                    name: builder.name,
                    attributes,
                });
                out.push(XmlModelItem::CloseElement);
            }
            DeserializedToken::CloseElement => {
                if open_depth == 0 {
                    return Err(ModelState("CloseElement with no matching open element"));
                }
                open_depth -= 1;
                out.push(XmlModelItem::CloseElement);
            }
            DeserializedToken::Value(value) => {
                push_value(value.clone(), &mut building, &mut out)?;
            }
            DeserializedToken::CDataSection(s) => {
                push_value(TypedValue::String(s.clone()), &mut building, &mut out)?;
            }
            DeserializedToken::CharRef(ch) => {
                push_value(TypedValue::String(ch.to_string()), &mut building, &mut out)?;
            }
            DeserializedToken::EntityRef { name_offset } => {
                let name = names.resolve(chunk_data, *name_offset)?;
                out.push(XmlModelItem::EntityRef(name));
            }
            DeserializedToken::PITarget { name_offset } => {
                if pi_building.is_some() {
                    return Err(ModelState("nested PITarget before PIData"));
                }
                let target = names.resolve(chunk_data, *name_offset)?;
                pi_building = Some(PiBuilder { target });
            }
            DeserializedToken::PIData(data) => {
                let pi = pi_building
                    .take()
                    .ok_or(ModelState("PIData without a preceding PITarget"))?;
                out.push(XmlModelItem::ProcessingInstruction {
                    target: pi.target,
                    data: data.clone(),
                });
            }
            DeserializedToken::FragmentHeader { .. }
            | DeserializedToken::AttributeList
            | DeserializedToken::StartOfStream
            | DeserializedToken::EndOfStream => {}
            DeserializedToken::TemplateInstance { .. } | DeserializedToken::Substitution { .. } => {
                return Err(ModelState(
                    "unexpanded TemplateInstance/Substitution reached the model assembler",
                ));
            }
        }
    }

    if building.is_some() {
        return Err(ModelState("dangling open element at end of stream"));
    }
    if pi_building.is_some() {
        return Err(ModelState("dangling processing instruction at end of stream"));
    }
    if open_depth != 0 {
        return Err(ModelState("unbalanced element nesting at end of stream"));
    }

    Ok(out)
}

fn finish_attribute(builder: &ElementBuilder) -> Result<()> {
    let _ = builder;
    Ok(())
}

fn push_value(
    value: TypedValue,
    building: &mut Option<ElementBuilder>,
    out: &mut Vec<XmlModelItem>,
) -> Result<()> {
    if let TypedValue::BinXmlFragment(_) = &value {
        return Err(ModelState(
            "embedded BinXML value reached the model assembler unexpanded",
        ));
    }

    match building {
        Some(builder) => match builder.pending_attr {
            Some(idx) => {
                if builder.pending_attr_value_count == 0 {
                    builder.attributes[idx].1 = value;
                } else {
                    let existing = builder.attributes[idx].1.to_display_string();
                    let appended = format!("{existing}{}", value.to_display_string());
                    builder.attributes[idx].1 = TypedValue::String(appended);
                }
                builder.pending_attr_value_count += 1;
                Ok(())
            }
            None => Err(ModelState("Value token inside an element's start tag with no pending attribute")),
        },
        None => {
            out.push(XmlModelItem::Text(value));
            Ok(())
        }
    }
}

#[allow(non_snake_case)]
fn ModelState(reason: &'static str) -> EvtxError {
    EvtxError::ModelState { reason }
}
