//! Schema model.
//!
//! A [`Schema`] is the ordered attribute list of one record type plus its
//! secondary index definitions. Schemas are immutable once built; they are
//! validated on construction and again after deserialization.

mod record;
mod value;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub use value::FieldValue;

/// Name of the synthetic id attribute every record carries.
pub const ID_ATTRIBUTE: &str = "id";

/// Primitive attribute type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeType {
    Boolean,
    CharOne,
    Enum,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    UtcDateSecs,
    Utf8Smallstring,
    Utf8Text,
    Any,
    Array,
    Map,
}

impl AttributeType {
    /// Whether values of this type can be stored in an index column.
    pub fn is_indexable(self) -> bool {
        !matches!(self, Self::Any | Self::Array | Self::Map)
    }

    /// Inclusive range accepted for integer types.
    pub(crate) fn integer_range(self) -> Option<(i128, i128)> {
        let range = match self {
            Self::I8 => (i8::MIN.into(), i8::MAX.into()),
            Self::I16 => (i16::MIN.into(), i16::MAX.into()),
            Self::I32 => (i32::MIN.into(), i32::MAX.into()),
            Self::I64 | Self::UtcDateSecs => (i64::MIN.into(), i64::MAX.into()),
            Self::U8 => (0, u8::MAX.into()),
            Self::U16 => (0, u16::MAX.into()),
            Self::U32 => (0, u32::MAX.into()),
            // Stored in a signed 64-bit column.
            Self::U64 => (0, i64::MAX.into()),
            _ => return None,
        };
        Some(range)
    }
}

/// Value transform applied before a value is stored in or compared against an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

impl AttributeTransform {
    pub fn apply(self, value: FieldValue) -> FieldValue {
        match (self, value) {
            (Self::Uppercase, FieldValue::Text(s)) => FieldValue::Text(s.to_uppercase()),
            (Self::Lowercase, FieldValue::Text(s)) => FieldValue::Text(s.to_lowercase()),
            (_, value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn invert(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    pub(crate) fn order(self) -> sea_query::Order {
        match self {
            Self::Ascending => sea_query::Order::Asc,
            Self::Descending => sea_query::Order::Desc,
        }
    }
}

/// One declared record attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    /// Allowed values of an `ENUM` attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub transform: AttributeTransform,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            values: None,
            nullable,
            transform: AttributeTransform::None,
        }
    }

    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_transform(mut self, transform: AttributeTransform) -> Self {
        self.transform = transform;
        self
    }
}

/// One column of an index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexAttribute {
    pub name: String,
    #[serde(default)]
    pub sort_direction: SortDirection,
    #[serde(default)]
    pub transform: AttributeTransform,
}

impl IndexAttribute {
    pub fn new(
        name: impl Into<String>,
        sort_direction: SortDirection,
        transform: AttributeTransform,
    ) -> Self {
        Self {
            name: name.into(),
            sort_direction,
            transform,
        }
    }

    /// Ascending column without a transform.
    pub fn ascending(name: impl Into<String>) -> Self {
        Self::new(name, SortDirection::Ascending, AttributeTransform::None)
    }

    pub fn is_id(&self) -> bool {
        self.name == ID_ATTRIBUTE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub attributes: Vec<IndexAttribute>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn attribute(&self, name: &str) -> Option<&IndexAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Declared attributes other than the synthetic id, in declared order.
    pub fn value_attributes(&self) -> impl Iterator<Item = &IndexAttribute> {
        self.attributes.iter().filter(|a| !a.is_id())
    }
}

/// First declared enum value that leaves the declared set once the
/// attribute's transform and then `column` have been applied.
fn lost_enum_value(attr: &Attribute, column: AttributeTransform) -> Option<&str> {
    let values = attr.values.as_deref().filter(|_| attr.attribute_type == AttributeType::Enum)?;
    values
        .iter()
        .find(|value| {
            let stored = column.apply(attr.transform.apply(FieldValue::Text(value.to_string())));
            !matches!(&stored, FieldValue::Text(s) if values.contains(s))
        })
        .map(String::as_str)
}

/// Attributes and indexes of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaParts", into = "SchemaParts")]
pub struct Schema {
    attributes: Vec<Attribute>,
    indexes: Vec<IndexDefinition>,
}

#[derive(Serialize, Deserialize)]
struct SchemaParts {
    attributes: Vec<Attribute>,
    #[serde(default)]
    indexes: Vec<IndexDefinition>,
}

impl TryFrom<SchemaParts> for Schema {
    type Error = StoreError;

    fn try_from(parts: SchemaParts) -> Result<Self> {
        Self::new(parts.attributes, parts.indexes)
    }
}

impl From<Schema> for SchemaParts {
    fn from(schema: Schema) -> Self {
        Self {
            attributes: schema.attributes,
            indexes: schema.indexes,
        }
    }
}

impl Schema {
    /// Build and validate a schema.
    pub fn new(attributes: Vec<Attribute>, indexes: Vec<IndexDefinition>) -> Result<Self> {
        let schema = Self {
            attributes,
            indexes,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Look up an index or fail with [`StoreError::SchemaMismatch`].
    pub fn require_index(&self, type_name: &str, name: &str) -> Result<&IndexDefinition> {
        self.index(name).ok_or_else(|| {
            StoreError::SchemaMismatch(format!("schema or index not found {type_name}.{name}"))
        })
    }

    /// Look up a non-id attribute or fail with [`StoreError::SchemaMismatch`].
    pub fn require_attribute(&self, name: &str) -> Result<&Attribute> {
        self.attribute(name)
            .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown attribute: {name}")))
    }

    fn validate(&self) -> Result<()> {
        let mismatch = |msg: String| Err(StoreError::SchemaMismatch(msg));

        let mut names = HashSet::new();
        for attr in &self.attributes {
            if attr.name.is_empty() {
                return mismatch("attribute name must not be empty".to_string());
            }
            if attr.name == ID_ATTRIBUTE {
                return mismatch("attribute name 'id' is reserved".to_string());
            }
            if !names.insert(attr.name.as_str()) {
                return mismatch(format!("duplicate attribute: {}", attr.name));
            }
            match (attr.attribute_type, &attr.values) {
                (AttributeType::Enum, Some(values)) if !values.is_empty() => {
                    if let Some(lost) = lost_enum_value(attr, AttributeTransform::None) {
                        return mismatch(format!(
                            "transform of {} turns '{lost}' into an undeclared value",
                            attr.name
                        ));
                    }
                }
                (AttributeType::Enum, _) => {
                    return mismatch(format!("enum attribute {} declares no values", attr.name));
                }
                (_, Some(_)) => {
                    return mismatch(format!("only enum attributes take values: {}", attr.name));
                }
                _ => {}
            }
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if index.name.is_empty() {
                return mismatch("index name must not be empty".to_string());
            }
            if !index_names.insert(index.name.as_str()) {
                return mismatch(format!("duplicate index: {}", index.name));
            }
            if index.value_attributes().next().is_none() {
                return mismatch(format!("index {} has no attributes", index.name));
            }

            let mut columns = HashSet::new();
            for column in &index.attributes {
                if !columns.insert(column.name.as_str()) {
                    return mismatch(format!(
                        "index {} repeats attribute {}",
                        index.name, column.name
                    ));
                }
                if column.is_id() {
                    continue;
                }
                let attr = self.require_attribute(&column.name)?;
                if !attr.attribute_type.is_indexable() {
                    return mismatch(format!(
                        "attribute {} of type {:?} cannot be indexed",
                        attr.name, attr.attribute_type
                    ));
                }
                if let Some(lost) = lost_enum_value(attr, column.transform) {
                    return mismatch(format!(
                        "index {} turns {} value '{lost}' into an undeclared value",
                        index.name, attr.name
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Incremental schema construction.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    attributes: Vec<Attribute>,
    indexes: Vec<IndexDefinition>,
}

impl SchemaBuilder {
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn add_attribute(
        self,
        name: impl Into<String>,
        attribute_type: AttributeType,
        nullable: bool,
    ) -> Self {
        self.attribute(Attribute::new(name, attribute_type, nullable))
    }

    pub fn add_enum_attribute<I, S>(self, name: impl Into<String>, values: I, nullable: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute(Attribute::new(name, AttributeType::Enum, nullable).with_values(values))
    }

    pub fn add_index(
        mut self,
        name: impl Into<String>,
        attributes: Vec<IndexAttribute>,
        unique: bool,
    ) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.into(),
            attributes,
            unique,
        });
        self
    }

    pub fn build(self) -> Result<Schema> {
        Schema::new(self.attributes, self.indexes)
    }
}

#[cfg(test)]
mod tests;
