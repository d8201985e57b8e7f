use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// One node of an immutable flamegraph snapshot.
///
/// `value` is the self cost accumulated at this node; cumulative subtree cost
/// is computed on demand via [`Frame::total`]. Children keep the order they
/// were frozen in, which for snapshots produced by the builder is descending
/// `value` with a lexical tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub name: String,
    pub value: i64,
    pub children: Vec<Frame>,
}

/// One row of a flattened snapshot, for CLI summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    pub depth: usize,
    pub self_value: i64,
    pub cumulative: i64,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Frame {
            name: name.into(),
            value: 0,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: impl Into<String>, value: i64) -> Self {
        Frame {
            name: name.into(),
            value,
            children: Vec::new(),
        }
    }

    /// Looks up a direct child by name.
    pub fn child(&self, name: &str) -> Option<&Frame> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Cumulative cost of this node and all descendants.
    pub fn total(&self) -> i64 {
        self.value + self.children.iter().map(Frame::total).sum::<i64>()
    }

    /// Re-orders children recursively by descending value, breaking ties by
    /// lexical name so traversal is deterministic.
    pub fn sort_children(&mut self) {
        self.children
            .sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
        for child in &mut self.children {
            child.sort_children();
        }
    }

    /// Depth-first rows, root first, with cumulative subtree costs.
    pub fn flatten(&self) -> Vec<Row> {
        fn walk(node: &Frame, depth: usize, rows: &mut Vec<Row>) -> i64 {
            let idx = rows.len();
            rows.push(Row {
                name: node.name.clone(),
                depth,
                self_value: node.value,
                cumulative: 0,
            });
            let mut cum = node.value;
            for child in &node.children {
                cum += walk(child, depth + 1, rows);
            }
            rows[idx].cumulative = cum;
            cum
        }
        let mut rows = Vec::new();
        walk(self, 0, &mut rows);
        rows
    }

    /// Serializes the snapshot to the wire chunk format.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a snapshot from its wire chunk format.
    pub fn from_json(bytes: &[u8]) -> crate::Result<Frame> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = if self.children.is_empty() { 2 } else { 3 };
        let mut st = serializer.serialize_struct("Frame", fields)?;
        st.serialize_field("name", &self.name)?;
        st.serialize_field("value", &self.value)?;
        if !self.children.is_empty() {
            st.serialize_field("children", &ChildMap(&self.children))?;
        }
        st.end()
    }
}

struct ChildMap<'a>(&'a [Frame]);

impl Serialize for ChildMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for child in self.0 {
            map.serialize_entry(&child.name, child)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Frame, D::Error> {
        deserializer.deserialize_map(FrameVisitor)
    }
}

struct FrameVisitor;

impl<'de> Visitor<'de> for FrameVisitor {
    type Value = Frame;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a flamegraph frame object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Frame, A::Error> {
        let mut name: Option<String> = None;
        let mut value: Option<i64> = None;
        let mut children: Option<Vec<Frame>> = None;

        while let Some(key) = access.next_key::<String>()? {
            match key.as_str() {
                "name" => {
                    if name.is_some() {
                        return Err(de::Error::duplicate_field("name"));
                    }
                    name = Some(access.next_value()?);
                }
                "value" => {
                    if value.is_some() {
                        return Err(de::Error::duplicate_field("value"));
                    }
                    value = Some(access.next_value()?);
                }
                "children" => {
                    if children.is_some() {
                        return Err(de::Error::duplicate_field("children"));
                    }
                    children = Some(access.next_value_seed(ChildrenSeed)?);
                }
                _ => {
                    access.next_value::<de::IgnoredAny>()?;
                }
            }
        }

        Ok(Frame {
            name: name.unwrap_or_default(),
            value: value.unwrap_or(0),
            children: children.unwrap_or_default(),
        })
    }
}

struct ChildrenSeed;

impl<'de> de::DeserializeSeed<'de> for ChildrenSeed {
    type Value = Vec<Frame>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Frame>, D::Error> {
        deserializer.deserialize_map(ChildrenVisitor)
    }
}

struct ChildrenVisitor;

impl<'de> Visitor<'de> for ChildrenVisitor {
    type Value = Vec<Frame>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of child name to frame")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Vec<Frame>, A::Error> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, mut child)) = access.next_entry::<String, Frame>()? {
            if !seen.insert(key.clone()) {
                return Err(de::Error::custom(format!("duplicate child key `{key}`")));
            }
            if child.name.is_empty() {
                child.name = key;
            } else if child.name != key {
                return Err(de::Error::custom(format!(
                    "child key `{key}` does not match frame name `{}`",
                    child.name
                )));
            }
            out.push(child);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Frame {
        Frame {
            name: "root".into(),
            value: 0,
            children: vec![Frame {
                name: "main".into(),
                value: 150,
                children: vec![
                    Frame::leaf("heavy", 100),
                    Frame::leaf("light", 50),
                ],
            }],
        }
    }

    #[test]
    fn serialize_omits_empty_children() {
        let json = serde_json::to_string(&Frame::leaf("leaf", 7)).unwrap();
        assert_eq!(json, r#"{"name":"leaf","value":7}"#);
    }

    #[test]
    fn serialize_children_in_stored_order() {
        let json = serde_json::to_string(&tree()).unwrap();
        let heavy = json.find("heavy").unwrap();
        let light = json.find("light").unwrap();
        assert!(heavy < light);
    }

    #[test]
    fn round_trip() {
        let original = tree();
        let json = original.to_json().unwrap();
        let decoded = Frame::from_json(&json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_rejects_duplicate_child_keys() {
        let json = r#"{"name":"r","value":0,"children":{
            "a":{"name":"a","value":1},
            "a":{"name":"a","value":2}}}"#;
        let err = Frame::from_json(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate child key"));
    }

    #[test]
    fn decode_rejects_mismatched_child_name() {
        let json = r#"{"name":"r","value":0,"children":{"a":{"name":"b","value":1}}}"#;
        assert!(Frame::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn decode_fills_child_name_from_key() {
        let json = r#"{"name":"r","value":0,"children":{"a":{"value":3}}}"#;
        let frame = Frame::from_json(json.as_bytes()).unwrap();
        assert_eq!(frame.children[0].name, "a");
    }

    #[test]
    fn total_is_cumulative() {
        assert_eq!(tree().total(), 300);
    }

    #[test]
    fn sort_children_orders_by_value_then_name() {
        let mut frame = Frame {
            name: "root".into(),
            value: 0,
            children: vec![
                Frame::leaf("b", 10),
                Frame::leaf("a", 10),
                Frame::leaf("c", 20),
            ],
        };
        frame.sort_children();
        let names: Vec<_> = frame.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn flatten_is_root_first_with_cumulative() {
        let rows = tree().flatten();
        assert_eq!(rows[0].name, "root");
        assert_eq!(rows[0].cumulative, 300);
        assert_eq!(rows[1].name, "main");
        assert_eq!(rows[1].self_value, 150);
        assert_eq!(rows[1].cumulative, 300);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[2].depth, 2);
    }
}
