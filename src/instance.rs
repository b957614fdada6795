//! Instance tree consumed by the validation engine.
//!
//! Parsing wire formats is left to callers; [`ElementNode::from_json`] covers
//! the common case of a JSON resource. Repeating elements become sibling
//! nodes sharing a name, and every node records its location.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Primitive type names as they appear in choice suffixes
const PRIMITIVE_TYPES: &[&str] = &[
    "Base64Binary",
    "Boolean",
    "Canonical",
    "Code",
    "Date",
    "DateTime",
    "Decimal",
    "Id",
    "Instant",
    "Integer",
    "Integer64",
    "Markdown",
    "Oid",
    "PositiveInt",
    "String",
    "Time",
    "UnsignedInt",
    "Uri",
    "Url",
    "Uuid",
];

/// Type label a choice element implies for one of its properties, e.g.
/// `Quantity` for `valueQuantity` under `value[x]`.
///
/// Only choice element names carry a type suffix; `referenceRange` or
/// `fullUrl` say nothing about the type of their value.
pub fn choice_type(element_name: &str, property: &str) -> Option<String> {
    let stem = element_name.strip_suffix("[x]")?;
    let suffix = property.strip_prefix(stem)?;
    if PRIMITIVE_TYPES.contains(&suffix) {
        let mut chars = suffix.chars();
        return chars
            .next()
            .map(|first| first.to_ascii_lowercase().to_string() + chars.as_str());
    }
    suffix
        .starts_with(|c: char| c.is_ascii_uppercase())
        .then(|| suffix.to_string())
}

/// Does an instance property name match a (possibly choice) element name?
pub fn matches_element_name(element_name: &str, property: &str) -> bool {
    match element_name.strip_suffix("[x]") {
        Some(prefix) => property
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_uppercase())),
        None => element_name == property,
    }
}

/// One node of an instance tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    /// Property name the node appears under
    pub name: String,
    /// Type label, when known
    pub instance_type: Option<String>,
    /// Primitive value
    pub value: Option<Value>,
    pub children: Vec<Arc<ElementNode>>,
    /// FHIRPath-style location, e.g. `Patient.telecom[1].system`
    pub location: String,
    /// Node was one item of a JSON array
    pub repeated: bool,
    /// Node is a resource (carries `resourceType`)
    pub is_resource: bool,
}

impl ElementNode {
    /// Build a tree from a JSON resource or datatype value.
    pub fn from_json(value: &Value) -> Self {
        let resource_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .map(str::to_string);
        let name = resource_type.clone().unwrap_or_else(|| "$this".to_string());
        let location = name.clone();
        Self::build(name, resource_type, value, location, false)
    }

    /// Build a tree for a value of a known datatype, e.g. a bare `HumanName`
    pub fn from_json_typed(value: &Value, type_name: &str) -> Self {
        Self::build(
            type_name.to_string(),
            Some(type_name.to_string()),
            value,
            type_name.to_string(),
            false,
        )
    }

    fn build(
        name: String,
        declared_type: Option<String>,
        value: &Value,
        location: String,
        repeated: bool,
    ) -> Self {
        match value {
            Value::Object(map) => {
                let resource_type = map
                    .get("resourceType")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let is_resource = resource_type.is_some();
                let children = Self::build_children(map, &location);
                Self {
                    name,
                    instance_type: resource_type.or(declared_type),
                    value: None,
                    children,
                    location,
                    repeated,
                    is_resource,
                }
            }
            primitive => {
                let inferred = match primitive {
                    Value::Bool(_) => Some("boolean".to_string()),
                    Value::Number(n) if n.is_i64() || n.is_u64() => Some("integer".to_string()),
                    Value::Number(_) => Some("decimal".to_string()),
                    _ => None,
                };
                Self {
                    name,
                    instance_type: declared_type.or(inferred),
                    value: Some(primitive.clone()),
                    children: Vec::new(),
                    location,
                    repeated,
                    is_resource: false,
                }
            }
        }
    }

    fn build_children(map: &Map<String, Value>, location: &str) -> Vec<Arc<ElementNode>> {
        let mut children = Vec::new();
        for (key, value) in map {
            // Primitive extensions (`_given`) and the type marker are not elements
            if key == "resourceType" || key.starts_with('_') {
                continue;
            }
            match value {
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        let loc = format!("{location}.{key}[{index}]");
                        children.push(Arc::new(Self::build(
                            key.clone(),
                            None,
                            item,
                            loc,
                            true,
                        )));
                    }
                }
                Value::Null => {}
                other => {
                    let loc = format!("{location}.{key}");
                    children.push(Arc::new(Self::build(key.clone(), None, other, loc, false)));
                }
            }
        }
        children
    }

    /// First child with the given property name
    pub fn child(&self, name: &str) -> Option<&Arc<ElementNode>> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given property name, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<ElementNode>> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Children matching an element name, honouring `[x]` choice names.
    /// Values of a choice element are labelled with the type their name implies.
    pub fn children_matching<'a>(
        &'a self,
        element_name: &'a str,
    ) -> impl Iterator<Item = Arc<ElementNode>> + 'a {
        self.children
            .iter()
            .filter(move |c| matches_element_name(element_name, &c.name))
            .map(move |c| c.labelled_as(element_name))
    }

    fn labelled_as(self: &Arc<Self>, element_name: &str) -> Arc<ElementNode> {
        match choice_type(element_name, &self.name) {
            Some(label) if self.instance_type.as_deref() != Some(label.as_str()) => {
                Arc::new(ElementNode {
                    instance_type: Some(label),
                    ..(**self).clone()
                })
            }
            _ => self.clone(),
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        if self.is_resource {
            self.instance_type.as_deref()
        } else {
            None
        }
    }

    /// Resource id, if this is a resource with an `id` child
    pub fn resource_id(&self) -> Option<String> {
        self.child("id").and_then(|c| c.primitive_string())
    }

    /// Profiles declared in `meta.profile`
    pub fn declared_profiles(&self) -> Vec<String> {
        self.child("meta")
            .map(|meta| {
                meta.children_named("profile")
                    .filter_map(|p| p.primitive_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// String form of a primitive value
    pub fn primitive_string(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Re-materialise the node as JSON, for fixed and pattern comparison
    pub fn to_json(&self) -> Value {
        if let Some(value) = &self.value {
            return value.clone();
        }

        let mut map = Map::new();
        if let Some(rt) = self.resource_type() {
            map.insert("resourceType".to_string(), Value::String(rt.to_string()));
        }
        for child in &self.children {
            let json = child.to_json();
            if child.repeated {
                let entry = map
                    .entry(child.name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(json);
                }
            } else {
                map.insert(child.name.clone(), json);
            }
        }
        Value::Object(map)
    }
}
