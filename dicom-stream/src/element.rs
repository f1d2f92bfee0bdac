use serde::Serialize;

use crate::tag::{Tag, Vr};

pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Strings(Vec<String>),
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    Floats(Vec<f64>),
    Tags(Vec<Tag>),
    Bytes(Vec<u8>),
    Sequence(Vec<Dataset>),
    /// Pixel data read without a frame sink: only the shape is kept.
    PixelData(PixelDataSummary),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PixelDataSummary {
    pub frames: usize,
    pub encapsulated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Element {
    pub tag: Tag,
    pub vr: Vr,
    /// Length as encoded in the stream, `UNDEFINED_LENGTH` for delimited values.
    pub length: u32,
    pub value: Value,
}

impl Element {
    pub fn first_string(&self) -> Option<&str> {
        match &self.value {
            Value::Strings(v) => v.first().map(String::as_str),
            _ => None,
        }
    }

    /// First numeric value, also accepting IS/DS strings.
    pub fn first_int(&self) -> Option<i64> {
        match &self.value {
            Value::Unsigned(v) => v.first().and_then(|n| i64::try_from(*n).ok()),
            Value::Signed(v) => v.first().copied(),
            Value::Strings(v) => v.first().and_then(|s| s.trim().parse::<i64>().ok()),
            _ => None,
        }
    }
}

/// Elements in stream order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Dataset {
    elements: Vec<Element>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    /// Top-level lookup.
    pub fn get(&self, tag: Tag) -> Option<&Element> {
        self.elements.iter().find(|e| e.tag == tag)
    }

    /// Depth-first lookup through sequence items.
    pub fn find_nested(&self, tag: Tag) -> Option<&Element> {
        for element in &self.elements {
            if element.tag == tag {
                return Some(element);
            }
            if let Value::Sequence(items) = &element.value {
                if let Some(found) = items.iter().find_map(|item| item.find_nested(tag)) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn string(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(Element::first_string)
    }

    pub fn int(&self, tag: Tag) -> Option<i64> {
        self.get(tag).and_then(Element::first_int)
    }
}
