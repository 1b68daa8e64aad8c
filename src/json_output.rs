//! JSON value-tree serialization of an assembled model (spec.md §4.7).

use std::mem;

use serde_json::{Map, Number, Value};

use crate::binxml::TypedValue;
use crate::error::{EvtxError, Result};
use crate::model::XmlModelItem;

/// Whether 64-bit integers are emitted as JSON numbers (accepting the
/// well-known precision loss above 2^53) or as decimal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideIntMode {
    Number,
    String,
}

struct Frame {
    name: String,
    attributes: Map<String, Value>,
    value: Value,
}

/// Builds a `serde_json::Value` tree from an assembled model.
pub fn build(model: &[XmlModelItem], separate_attributes: bool, wide_int_mode: WideIntMode) -> Result<Value> {
    let mut root = Value::Object(Map::new());
    let mut stack: Vec<Frame> = Vec::new();

    for item in model {
        match item {
            XmlModelItem::OpenElement { name, attributes } => {
                let mut attrs = Map::with_capacity(attributes.len());
                for (attr_name, attr_value) in attributes {
                    attrs.insert(attr_name.to_string(), typed_value_to_json(attr_value, wide_int_mode));
                }
                stack.push(Frame {
                    name: name.to_string(),
                    attributes: attrs,
                    value: Value::Null,
                });
            }
            XmlModelItem::Text(value) => {
                let json_value = typed_value_to_json(value, wide_int_mode);
                let target = match stack.last_mut() {
                    Some(frame) => &mut frame.value,
                    None => return Err(EvtxError::JsonStructure {
                        message: "text content with no enclosing element".to_string(),
                    }),
                };
                merge_text(target, json_value);
            }
            XmlModelItem::EntityRef(name) => {
                let json_value = Value::String(format!("&{name};"));
                let target = match stack.last_mut() {
                    Some(frame) => &mut frame.value,
                    None => return Err(EvtxError::JsonStructure {
                        message: "entity reference with no enclosing element".to_string(),
                    }),
                };
                merge_text(target, json_value);
            }
            // Processing instructions have no natural JSON representation
            // and are dropped, matching the XML serializer's text-only model.
            XmlModelItem::ProcessingInstruction { .. } => {}
            XmlModelItem::CloseElement => {
                let frame = stack.pop().ok_or(EvtxError::ModelState {
                    reason: "CloseElement with no matching open during JSON rendering",
                })?;
                let parent = stack.last_mut().map(|f| &mut f.value).unwrap_or(&mut root);
                insert_closed_element(parent, frame, separate_attributes)?;
            }
        }
    }

    if !stack.is_empty() {
        return Err(EvtxError::JsonStructure {
            message: "unclosed element at end of model while rendering JSON".to_string(),
        });
    }

    Ok(root)
}

fn insert_closed_element(parent: &mut Value, frame: Frame, separate_attributes: bool) -> Result<()> {
    // <Data Name="X">text</Data> hoists to the enclosing container as `"X": "text"`.
    if frame.name == "Data" {
        if let Some(Value::String(key)) = frame.attributes.get("Name").cloned() {
            insert_into(parent, &key, frame.value);
            return Ok(());
        }
    }

    if frame.attributes.is_empty() {
        let value = if matches!(frame.value, Value::Null) {
            Value::Null
        } else {
            frame.value
        };
        insert_into(parent, &frame.name, value);
        return Ok(());
    }

    if separate_attributes {
        insert_into(parent, &format!("{}_attributes", frame.name), Value::Object(frame.attributes));
        insert_into(parent, &frame.name, frame.value);
    } else {
        let mut object = match frame.value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::with_capacity(2);
                map.insert("#text".to_string(), other);
                map
            }
        };
        object.insert("#attributes".to_string(), Value::Object(frame.attributes));
        insert_into(parent, &frame.name, Value::Object(object));
    }
    Ok(())
}

fn merge_text(target: &mut Value, json_value: Value) {
    match target {
        Value::Null => *target = json_value,
        Value::Array(arr) => arr.push(json_value),
        Value::Object(map) => {
            match map.get_mut("#text") {
                None | Some(Value::Null) => {
                    map.insert("#text".to_string(), json_value);
                }
                Some(existing @ Value::String(_)) => {
                    let prev = mem::replace(existing, Value::Null);
                    *existing = Value::Array(vec![prev, json_value]);
                }
                Some(Value::Array(arr)) => arr.push(json_value),
                _ => {}
            }
        }
        existing => {
            let prev = mem::replace(existing, Value::Null);
            *existing = Value::Array(vec![prev, json_value]);
        }
    }
}

fn insert_into(parent: &mut Value, key: &str, child: Value) {
    if !parent.is_object() {
        *parent = Value::Object(Map::new());
    }
    let obj = parent.as_object_mut().expect("just ensured object above");
    match obj.get_mut(key) {
        None => {
            obj.insert(key.to_string(), child);
        }
        Some(Value::Array(arr)) => arr.push(child),
        Some(existing) => {
            let prev = mem::replace(existing, Value::Null);
            *existing = Value::Array(vec![prev, child]);
        }
    }
}

fn typed_value_to_json(value: &TypedValue, wide_int_mode: WideIntMode) -> Value {
    match value {
        TypedValue::Null => Value::Null,
        TypedValue::Bool(b) => Value::Bool(*b),
        TypedValue::Int8(v) => Value::Number(Number::from(*v)),
        TypedValue::UInt8(v) => Value::Number(Number::from(*v)),
        TypedValue::Int16(v) => Value::Number(Number::from(*v)),
        TypedValue::UInt16(v) => Value::Number(Number::from(*v)),
        TypedValue::Int32(v) => Value::Number(Number::from(*v)),
        TypedValue::UInt32(v) => Value::Number(Number::from(*v)),
        TypedValue::Int64(v) => wide_int(*v as i128, wide_int_mode),
        TypedValue::UInt64(v) => wide_int(*v as i128, wide_int_mode),
        TypedValue::SizeT(v) => wide_int(*v as i128, wide_int_mode),
        TypedValue::EvtHandle(v) => wide_int(*v as i128, wide_int_mode),
        TypedValue::Real32(v) => Number::from_f64(*v as f64).map(Value::Number).unwrap_or(Value::Null),
        TypedValue::Real64(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
        TypedValue::StringArray(v) | TypedValue::AnsiStringArray(v) => {
            Value::Array(v.iter().cloned().map(Value::String).collect())
        }
        TypedValue::Int8Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::UInt8Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::Int16Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::UInt16Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::Int32Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::UInt32Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::Int64Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::UInt64Array(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::SizeTArray(v) => num_array(v.iter().map(|n| *n as i128), wide_int_mode),
        TypedValue::BoolArray(v) => Value::Array(v.iter().map(|b| Value::Bool(*b)).collect()),
        TypedValue::Real32Array(v) => Value::Array(
            v.iter()
                .map(|f| Number::from_f64(*f as f64).map(Value::Number).unwrap_or(Value::Null))
                .collect(),
        ),
        TypedValue::Real64Array(v) => Value::Array(
            v.iter()
                .map(|f| Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null))
                .collect(),
        ),
        TypedValue::GuidArray(v) | TypedValue::SidArray(v) | TypedValue::HexInt32Array(v) | TypedValue::HexInt64Array(v) => {
            Value::Array(v.iter().cloned().map(Value::String).collect())
        }
        TypedValue::BinaryArray(v) => Value::Array(
            v.iter()
                .map(|b| Value::String(TypedValue::Binary(b.clone()).to_display_string()))
                .collect(),
        ),
        TypedValue::FileTimeArray(v) | TypedValue::SysTimeArray(v) => {
            Value::Array(v.iter().map(|t| Value::String(t.to_iso8601())).collect())
        }
        // String, AnsiString, Binary, Guid, SizeT-rendered-as-string cases,
        // FileTime/SysTime, HexInt32/64, BinXmlFragment (never reaches here
        // post-expansion): all fall back to the shared display rendering.
        other => Value::String(other.to_display_string()),
    }
}

fn wide_int(value: i128, mode: WideIntMode) -> Value {
    match mode {
        WideIntMode::String => Value::String(value.to_string()),
        WideIntMode::Number => {
            if let Ok(v) = i64::try_from(value) {
                Value::Number(Number::from(v))
            } else if let Ok(v) = u64::try_from(value) {
                Value::Number(Number::from(v))
            } else {
                Value::String(value.to_string())
            }
        }
    }
}

fn num_array(values: impl Iterator<Item = i128>, mode: WideIntMode) -> Value {
    Value::Array(values.map(|v| wide_int(v, mode)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn empty_element_renders_null() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("E"), attributes: vec![] },
            XmlModelItem::CloseElement,
        ];
        let value = build(&model, false, WideIntMode::Number).unwrap();
        assert_eq!(value, serde_json::json!({ "E": null }));
    }

    #[test]
    fn element_with_text() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("Task"), attributes: vec![] },
            XmlModelItem::Text(TypedValue::Int32(12288)),
            XmlModelItem::CloseElement,
        ];
        let value = build(&model, false, WideIntMode::Number).unwrap();
        assert_eq!(value, serde_json::json!({ "Task": 12288 }));
    }

    #[test]
    fn element_with_attributes_nests_under_hash_attributes() {
        let model = vec![
            XmlModelItem::OpenElement {
                name: Rc::from("Header"),
                attributes: vec![(Rc::from("attribute1"), TypedValue::String("NoProxy".into()))],
            },
            XmlModelItem::CloseElement,
        ];
        let value = build(&model, false, WideIntMode::Number).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "Header": { "#attributes": { "attribute1": "NoProxy" } } })
        );
    }

    #[test]
    fn data_element_hoists_by_name_attribute() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("EventData"), attributes: vec![] },
            XmlModelItem::OpenElement {
                name: Rc::from("Data"),
                attributes: vec![(Rc::from("Name"), TypedValue::String("UserName".into()))],
            },
            XmlModelItem::Text(TypedValue::String("alice".into())),
            XmlModelItem::CloseElement,
            XmlModelItem::CloseElement,
        ];
        let value = build(&model, false, WideIntMode::Number).unwrap();
        assert_eq!(value, serde_json::json!({ "EventData": { "UserName": "alice" } }));
    }

    #[test]
    fn repeated_sibling_elements_collapse_into_array() {
        let model = vec![
            XmlModelItem::OpenElement { name: Rc::from("Parent"), attributes: vec![] },
            XmlModelItem::OpenElement { name: Rc::from("Item"), attributes: vec![] },
            XmlModelItem::Text(TypedValue::String("a".into())),
            XmlModelItem::CloseElement,
            XmlModelItem::OpenElement { name: Rc::from("Item"), attributes: vec![] },
            XmlModelItem::Text(TypedValue::String("b".into())),
            XmlModelItem::CloseElement,
            XmlModelItem::CloseElement,
        ];
        let value = build(&model, false, WideIntMode::Number).unwrap();
        assert_eq!(value, serde_json::json!({ "Parent": { "Item": ["a", "b"] } }));
    }
}
