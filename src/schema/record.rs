//! Validation of JSON records against a schema.

use serde_json::{Map, Value as JsonValue};

use super::{AttributeType, FieldValue, Schema};
use crate::error::{Result, StoreError};
use crate::index::binding::coerce;

impl Schema {
    /// Check every declared attribute of `record`.
    ///
    /// Undeclared fields are kept as-is. Scalar values are checked after the
    /// attribute transform, so enum membership is tested on the stored form.
    pub fn validate_record(&self, type_name: &str, record: &Map<String, JsonValue>) -> Result<()> {
        let mismatch = |name: &str, msg: String| {
            StoreError::SchemaMismatch(format!("{type_name}.{name}: {msg}"))
        };

        for attribute in self.attributes() {
            let name = attribute.name.as_str();
            let value = match record.get(name) {
                None | Some(JsonValue::Null) => {
                    if attribute.nullable {
                        continue;
                    }
                    return Err(mismatch(name, "required".to_string()));
                }
                Some(value) => value,
            };

            match attribute.attribute_type {
                AttributeType::Any => {}
                AttributeType::Array if value.is_array() => {}
                AttributeType::Map if value.is_object() => {}
                AttributeType::Array | AttributeType::Map => {
                    return Err(mismatch(
                        name,
                        format!("expected {:?}", attribute.attribute_type),
                    ));
                }
                _ => {
                    let scalar = FieldValue::from_json(value)
                        .ok_or_else(|| mismatch(name, "expected a scalar".to_string()))?;
                    coerce(attribute, attribute.transform.apply(scalar))
                        .map_err(|msg| mismatch(name, msg))?;
                }
            }
        }

        Ok(())
    }
}
