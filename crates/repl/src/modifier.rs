//! Update-modifier evaluation
//!
//! [`BasicModifierEvaluator`] implements the modifier subset replicated
//! updates use: `$set`, `$unset`, `$inc`, `$push`, `$addToSet`, `$pull`
//! and `$rename`, plus whole-document replacement. Paths may be dotted.
//! New fields are appended, so field order matches what replicas produce.

use serde_json::{Map, Number, Value};
use tidemark_core::{Document, Error, Result, UpdateEvaluator, ID_FIELD};

/// Default [`UpdateEvaluator`]
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicModifierEvaluator;

impl BasicModifierEvaluator {
    /// Create an evaluator
    pub fn new() -> Self {
        Self
    }
}

fn is_modifier(modifier: &Document) -> bool {
    modifier.keys().any(|k| k.starts_with('$'))
}

fn fields<'a>(op: &str, arg: &'a Value) -> Result<&'a Map<String, Value>> {
    arg.as_object()
        .ok_or_else(|| Error::FailedToParse(format!("argument of {} must be an object", op)))
}

fn check_not_id(path: &str) -> Result<()> {
    if path == ID_FIELD || path.starts_with("_id.") {
        return Err(Error::BadValue(format!(
            "performing an update on the path '{}' would modify the immutable field '_id'",
            path
        )));
    }
    Ok(())
}

/// Parent object of `path`, creating intermediate objects when `create`
fn parent_mut<'a, 'p>(
    doc: &'a mut Map<String, Value>,
    path: &'p str,
    create: bool,
) -> Result<Option<(&'a mut Map<String, Value>, &'p str)>> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop().unwrap_or(path);
    let mut current = doc;
    for part in parts {
        if !current.contains_key(part) {
            if !create {
                return Ok(None);
            }
            current.insert(part.to_string(), Value::Object(Map::new()));
        }
        current = match current.get_mut(part) {
            Some(Value::Object(obj)) => obj,
            Some(_) if !create => return Ok(None),
            _ => {
                return Err(Error::UpdateOperationFailed(format!(
                    "cannot create field in non-object element '{}' of path '{}'",
                    part, path
                )))
            }
        };
    }
    Ok(Some((current, leaf)))
}

fn get_path<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    parts.try_fold(doc.get(first)?, |value, part| value.as_object()?.get(part))
}

fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    if let Some((parent, leaf)) = parent_mut(doc, path, true)? {
        parent.insert(leaf.to_string(), value);
    }
    Ok(())
}

fn remove_path(doc: &mut Map<String, Value>, path: &str) -> Result<Option<Value>> {
    Ok(match parent_mut(doc, path, false)? {
        Some((parent, leaf)) => parent.shift_remove(leaf),
        None => None,
    })
}

fn add_numbers(current: &Value, delta: &Value, path: &str) -> Result<Value> {
    let (Value::Number(a), Value::Number(b)) = (current, delta) else {
        return Err(Error::BadValue(format!(
            "cannot apply $inc to non-numeric value at '{}'",
            path
        )));
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::Number(sum.into()));
        }
    }
    let sum = a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| Error::BadValue(format!("$inc at '{}' produced a non-finite number", path)))
}

fn array_at<'a>(doc: &'a mut Map<String, Value>, path: &str, op: &str) -> Result<&'a mut Vec<Value>> {
    if get_path(doc, path).is_none() {
        set_path(doc, path, Value::Array(Vec::new()))?;
    }
    match parent_mut(doc, path, true)? {
        Some((parent, leaf)) => match parent.get_mut(leaf) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(Error::BadValue(format!(
                "{} requires an array at '{}'",
                op, path
            ))),
        },
        None => Err(Error::BadValue(format!("{} cannot reach '{}'", op, path))),
    }
}

fn apply_operator(doc: &mut Document, op: &str, arg: &Value) -> Result<()> {
    for (path, value) in fields(op, arg)? {
        check_not_id(path)?;
        match op {
            "$set" => set_path(doc, path, value.clone())?,
            "$unset" => {
                remove_path(doc, path)?;
            }
            "$inc" => {
                let next = match get_path(doc, path) {
                    Some(current) => add_numbers(current, value, path)?,
                    None => add_numbers(&Value::from(0), value, path)?,
                };
                set_path(doc, path, next)?;
            }
            "$push" => array_at(doc, path, op)?.push(value.clone()),
            "$addToSet" => {
                let items = array_at(doc, path, op)?;
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            "$pull" => {
                if get_path(doc, path).is_some() {
                    array_at(doc, path, op)?.retain(|item| item != value);
                }
            }
            "$rename" => {
                let target = value.as_str().ok_or_else(|| {
                    Error::BadValue(format!("$rename target for '{}' must be a string", path))
                })?;
                check_not_id(target)?;
                if let Some(moved) = remove_path(doc, path)? {
                    set_path(doc, target, moved)?;
                }
            }
            other => {
                return Err(Error::FailedToParse(format!(
                    "unknown modifier: {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn replace(base: &Document, replacement: &Document) -> Result<Document> {
    let id = base.get(ID_FIELD);
    match (id, replacement.get(ID_FIELD)) {
        (Some(old), Some(new)) if old != new => Err(Error::BadValue(
            "replacement would modify the immutable field '_id'".into(),
        )),
        _ => {
            let mut doc = Document::new();
            if let Some(id) = id {
                doc.insert(ID_FIELD.to_string(), id.clone());
            }
            for (k, v) in replacement {
                if k != ID_FIELD {
                    doc.insert(k.clone(), v.clone());
                }
            }
            Ok(doc)
        }
    }
}

impl UpdateEvaluator for BasicModifierEvaluator {
    fn apply(&self, base: &Document, modifier: &Document) -> Result<Document> {
        if !is_modifier(modifier) {
            return replace(base, modifier);
        }
        let mut doc = base.clone();
        for (op, arg) in modifier {
            if !op.starts_with('$') {
                return Err(Error::FailedToParse(format!(
                    "cannot mix modifiers and fields; found '{}'",
                    op
                )));
            }
            apply_operator(&mut doc, op, arg)?;
        }
        Ok(doc)
    }
}
