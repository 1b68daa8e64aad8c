//! Template expansion (spec.md §4.5).
//!
//! Walks a record's flat token stream, replacing every `TemplateInstance`
//! with its definition's tokens (substituting in the instance's per-record
//! value array) and every embedded-BinXML `Value` with its own tokens,
//! recursively, until the output stream contains neither.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use encoding::EncodingRef;

use crate::binxml::{DeserializedToken, TypedValue, MAX_RECURSION_DEPTH};
use crate::error::{EvtxError, Result};
use crate::template::{parse_definition_at, TemplateCache, TemplateDefinition};

/// Everything the expander needs about the chunk it is operating in.
pub struct ExpansionContext<'a> {
    pub chunk_data: &'a [u8],
    pub template_cache: &'a TemplateCache,
    pub ansi_codec: EncodingRef,
    pub diagnostics: RefCell<Vec<(u64, String)>>,
}

impl<'a> ExpansionContext<'a> {
    pub fn note(&self, offset: u64, message: impl Into<String>) {
        self.diagnostics.borrow_mut().push((offset, message.into()));
    }

    fn resolve_definition(&self, offset: u32) -> Result<Rc<TemplateDefinition>> {
        if let Some(def) = self.template_cache.get(offset) {
            return Ok(def);
        }
        self.note(
            offset as u64,
            format!("template at offset {offset} missing from cache, parsing on the fly"),
        );
        match parse_definition_at(self.chunk_data, offset, self.ansi_codec) {
            Ok((def, _next)) => Ok(Rc::new(def)),
            Err(e) => Err(EvtxError::TemplateMissing {
                template_offset: offset,
                offset: offset as u64,
                reason: e.to_string(),
            }),
        }
    }
}

/// Expands a record's (or fragment's) token stream into one with no
/// `TemplateInstance` or `Substitution` tokens remaining.
pub fn expand(tokens: &[DeserializedToken], ctx: &ExpansionContext) -> Result<Vec<DeserializedToken>> {
    expand_at_depth(tokens, ctx, 0)
}

fn expand_at_depth(
    tokens: &[DeserializedToken],
    ctx: &ExpansionContext,
    depth: u32,
) -> Result<Vec<DeserializedToken>> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(EvtxError::TemplateRecursion {
            offset: 0,
            max_depth: MAX_RECURSION_DEPTH,
        });
    }

    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        expand_token(token, ctx, depth, &mut out)?;
    }
    Ok(out)
}

fn expand_token(
    token: &DeserializedToken,
    ctx: &ExpansionContext,
    depth: u32,
    out: &mut Vec<DeserializedToken>,
) -> Result<()> {
    match token {
        DeserializedToken::TemplateInstance {
            definition_offset,
            substitutions,
        } => {
            let definition = ctx.resolve_definition(*definition_offset)?;
            for def_token in definition.tokens.iter() {
                expand_definition_token(def_token, substitutions, ctx, depth + 1, out)?;
            }
        }
        DeserializedToken::Value(TypedValue::BinXmlFragment(fragment_tokens)) => {
            let expanded = expand_at_depth(fragment_tokens, ctx, depth + 1)?;
            out.extend(expanded);
        }
        // A bare Substitution only makes sense inside a template
        // definition, resolved against that definition's owning instance.
        // One reaching here unwrapped means upstream parsing is malformed;
        // drop it rather than violate the "no Substitution survives
        // expansion" invariant (spec.md §8).
        DeserializedToken::Substitution { .. } => {
            ctx.note(0, "substitution token found outside of a template instance, dropping");
        }
        other => out.push(other.clone()),
    }
    Ok(())
}

/// Expands one token drawn from a *template definition's* body, where
/// `Substitution` tokens are resolved against the owning instance's value
/// array rather than passed straight through.
fn expand_definition_token(
    def_token: &DeserializedToken,
    substitutions: &Rc<RefCell<Vec<TypedValue>>>,
    ctx: &ExpansionContext,
    depth: u32,
    out: &mut Vec<DeserializedToken>,
) -> Result<()> {
    match def_token {
        DeserializedToken::Substitution {
            index,
            optional,
            value_type: _,
        } => {
            let value = take_substitution(substitutions, *index as usize);
            if *optional && value.is_null() {
                // ConditionalSubstitution with a NullType slot: emit nothing.
                return Ok(());
            }
            expand_substitution_value(value, ctx, depth, out)
        }
        DeserializedToken::TemplateInstance {
            definition_offset,
            substitutions: nested_substitutions,
        } => {
            let definition = ctx.resolve_definition(*definition_offset)?;
            for nested_def_token in definition.tokens.iter() {
                expand_definition_token(nested_def_token, nested_substitutions, ctx, depth + 1, out)?;
            }
            Ok(())
        }
        DeserializedToken::Value(TypedValue::BinXmlFragment(fragment_tokens)) => {
            let expanded = expand_at_depth(fragment_tokens, ctx, depth + 1)?;
            out.extend(expanded);
            Ok(())
        }
        other => {
            out.push(other.clone());
            Ok(())
        }
    }
}

fn expand_substitution_value(
    value: TypedValue,
    ctx: &ExpansionContext,
    depth: u32,
    out: &mut Vec<DeserializedToken>,
) -> Result<()> {
    if let TypedValue::BinXmlFragment(fragment_tokens) = value {
        let expanded = expand_at_depth(&fragment_tokens, ctx, depth + 1)?;
        out.extend(expanded);
    } else {
        out.push(DeserializedToken::Value(value));
    }
    Ok(())
}

/// Takes the value at `index` out of the instance's substitution array,
/// leaving `TypedValue::Null` behind (spec.md §4.5 idempotence rule).
fn take_substitution(substitutions: &Rc<RefCell<Vec<TypedValue>>>, index: usize) -> TypedValue {
    let mut slots = substitutions.borrow_mut();
    match slots.get_mut(index) {
        Some(slot) => mem::replace(slot, TypedValue::Null),
        None => TypedValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateCache;
    use encoding::all::WINDOWS_1252;
    use std::cell::RefCell as StdRefCell;

    fn codec() -> EncodingRef {
        WINDOWS_1252 as EncodingRef
    }

    fn ctx<'a>(chunk_data: &'a [u8], cache: &'a TemplateCache) -> ExpansionContext<'a> {
        ExpansionContext {
            chunk_data,
            template_cache: cache,
            ansi_codec: codec(),
            diagnostics: StdRefCell::new(Vec::new()),
        }
    }

    #[test]
    fn normal_substitution_emits_value_even_when_null() {
        let tokens = vec![DeserializedToken::TemplateInstance {
            definition_offset: 0,
            substitutions: Rc::new(RefCell::new(vec![TypedValue::Null])),
        }];

        // Build a fake definition reachable purely in-memory by hand.
        let def = TemplateDefinition {
            guid: String::new(),
            data_size: 0,
            tokens: Rc::new(vec![DeserializedToken::Substitution {
                index: 0,
                value_type: crate::binxml::ValueType::Null,
                optional: false,
            }]),
        };
        let mut cache = TemplateCache::new();
        cache_insert_for_test(&mut cache, 0, def);

        let chunk_data = [0u8; 0];
        let ctx = ctx(&chunk_data, &cache);
        let expanded = expand(&tokens, &ctx).unwrap();
        assert_eq!(expanded.len(), 1);
        assert!(matches!(expanded[0], DeserializedToken::Value(TypedValue::Null)));
    }

    #[test]
    fn conditional_substitution_with_null_emits_nothing() {
        let tokens = vec![DeserializedToken::TemplateInstance {
            definition_offset: 0,
            substitutions: Rc::new(RefCell::new(vec![TypedValue::Null])),
        }];

        let def = TemplateDefinition {
            guid: String::new(),
            data_size: 0,
            tokens: Rc::new(vec![DeserializedToken::Substitution {
                index: 0,
                value_type: crate::binxml::ValueType::Null,
                optional: true,
            }]),
        };
        let mut cache = TemplateCache::new();
        cache_insert_for_test(&mut cache, 0, def);

        let chunk_data = [0u8; 0];
        let ctx = ctx(&chunk_data, &cache);
        let expanded = expand(&tokens, &ctx).unwrap();
        assert!(expanded.is_empty());
    }

    #[test]
    fn embedded_binxml_value_is_flattened_in_place() {
        let inner = vec![DeserializedToken::CloseElement];
        let tokens = vec![DeserializedToken::Value(TypedValue::BinXmlFragment(inner))];

        let chunk_data = [0u8; 0];
        let cache = TemplateCache::new();
        let ctx = ctx(&chunk_data, &cache);
        let expanded = expand(&tokens, &ctx).unwrap();
        assert_eq!(expanded.len(), 1);
        assert!(matches!(expanded[0], DeserializedToken::CloseElement));
    }

    // Test-only helper: TemplateCache's public API is populate-from-bytes
    // only, so reach in via its private field for this unit test.
    fn cache_insert_for_test(cache: &mut TemplateCache, offset: u32, def: TemplateDefinition) {
        cache.insert_for_test(offset, def);
    }
}
