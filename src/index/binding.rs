//! Conversion of attribute values into bound SQL values.
//!
//! The attribute's own transform runs first, then the index column's
//! transform; enumeration membership is checked on the transformed value.
//! Errors are plain messages so callers can pick the error kind that fits
//! their context (query validation vs. record validation).

use sea_query::Value;

use crate::key::Key;
use crate::schema::{Attribute, AttributeType, FieldValue, IndexAttribute};

/// Width of `Utf8Smallstring` columns.
const SMALLSTRING_MAX_CHARS: usize = 255;

/// Convert `value` into the SQL value stored in the column of `column`.
pub(crate) fn bind_attribute_value(
    attribute: &Attribute,
    column: &IndexAttribute,
    value: &FieldValue,
) -> Result<Value, String> {
    let value = column.transform.apply(attribute.transform.apply(value.clone()));
    coerce(attribute, value)
}

/// Convert `value` to the attribute's SQL representation, without transforms.
pub(crate) fn coerce(attribute: &Attribute, value: FieldValue) -> Result<Value, String> {
    let attribute_type = attribute.attribute_type;

    if value.is_null() {
        return Ok(typed_null(attribute_type));
    }

    if let Some((min, max)) = attribute_type.integer_range() {
        let n: i128 = match &value {
            FieldValue::Int(i) => (*i).into(),
            FieldValue::UInt(u) => (*u).into(),
            FieldValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("'{s}' is not an integer"))?,
            other => return Err(format!("'{other}' is not an integer")),
        };
        if n < min || n > max {
            return Err(format!("{n} is out of range for {attribute_type:?}"));
        }
        // In range of i64 for every integer type.
        return Ok(Value::from(n as i64));
    }

    match attribute_type {
        AttributeType::Boolean => match value {
            FieldValue::Bool(b) => Ok(Value::from(b)),
            FieldValue::Text(s) if s == "true" || s == "false" => Ok(Value::from(s == "true")),
            other => Err(format!("'{other}' is not a boolean")),
        },
        AttributeType::CharOne => {
            let text = value.to_string();
            if text.chars().count() != 1 {
                return Err(format!("'{text}' is not a single character"));
            }
            Ok(Value::from(text))
        }
        AttributeType::Enum => {
            let text = value.to_string();
            let allowed = attribute.values.as_deref().unwrap_or_default();
            if !allowed.iter().any(|v| *v == text) {
                return Err(format!(
                    "'{text}' is not one of {allowed:?} for {}",
                    attribute.name
                ));
            }
            Ok(Value::from(text))
        }
        AttributeType::Utf8Smallstring => {
            let text = value.to_string();
            if text.chars().count() > SMALLSTRING_MAX_CHARS {
                return Err(format!(
                    "longer than {SMALLSTRING_MAX_CHARS} characters for {}",
                    attribute.name
                ));
            }
            Ok(Value::from(text))
        }
        AttributeType::Utf8Text => match value {
            FieldValue::Text(s) => Ok(Value::from(s)),
            other => Ok(Value::from(other.to_string())),
        },
        other => Err(format!("values of type {other:?} cannot be indexed")),
    }
}

/// Convert an `id` term value into the physical id.
///
/// Accepts a plain key of the queried type (`type:N`) or a bare id.
pub(crate) fn bind_id_value(type_name: &str, value: &FieldValue) -> Result<Value, String> {
    let invalid = || format!("invalid id: '{value}'");

    let id = match value {
        FieldValue::Int(i) => u64::try_from(*i).map_err(|_| invalid())?,
        FieldValue::UInt(u) => *u,
        FieldValue::Text(s) if s.contains(':') => {
            let key: Key = s.parse().map_err(|_| invalid())?;
            if key.type_name() != type_name {
                return Err(invalid());
            }
            key.id()
        }
        FieldValue::Text(s) => s.parse().map_err(|_| invalid())?,
        FieldValue::Null | FieldValue::Bool(_) => return Err(invalid()),
    };

    physical_id(id).map_err(|_| invalid())
}

/// Ids are stored in signed 64-bit columns.
pub(crate) fn physical_id(id: u64) -> Result<Value, String> {
    i64::try_from(id)
        .map(Value::from)
        .map_err(|_| format!("id {id} exceeds the storable range"))
}

fn typed_null(attribute_type: AttributeType) -> Value {
    if attribute_type.integer_range().is_some() {
        Value::BigInt(None)
    } else if attribute_type == AttributeType::Boolean {
        Value::Bool(None)
    } else {
        Value::String(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeTransform, SortDirection};

    fn column(transform: AttributeTransform) -> IndexAttribute {
        IndexAttribute::new("c", SortDirection::Ascending, transform)
    }

    #[test]
    fn test_integer_ranges() {
        let attr = Attribute::new("n", AttributeType::U8, false);
        let plain = column(AttributeTransform::None);

        assert_eq!(
            bind_attribute_value(&attr, &plain, &FieldValue::Int(255)).unwrap(),
            Value::BigInt(Some(255))
        );
        assert!(bind_attribute_value(&attr, &plain, &FieldValue::Int(256)).is_err());
        assert!(bind_attribute_value(&attr, &plain, &FieldValue::Int(-1)).is_err());
        assert_eq!(
            bind_attribute_value(&attr, &plain, &FieldValue::from("12")).unwrap(),
            Value::BigInt(Some(12))
        );

        let wide = Attribute::new("n", AttributeType::U64, false);
        assert!(bind_attribute_value(&wide, &plain, &FieldValue::UInt(u64::MAX)).is_err());
    }

    #[test]
    fn test_null_is_typed() {
        let attr = Attribute::new("s", AttributeType::Utf8Text, true);
        assert_eq!(
            bind_attribute_value(&attr, &column(AttributeTransform::None), &FieldValue::Null)
                .unwrap(),
            Value::String(None)
        );
    }

    #[test]
    fn test_transforms_apply_before_enum_check() {
        let attr = Attribute::new("power", AttributeType::Enum, false)
            .with_values(["ON", "OFF"])
            .with_transform(AttributeTransform::Lowercase);

        // Attribute transform lowercases, column transform uppercases again.
        assert_eq!(
            bind_attribute_value(&attr, &column(AttributeTransform::Uppercase), &"on".into())
                .unwrap(),
            Value::from("ON".to_string())
        );
        // Lowercased value is not a declared variant.
        assert!(
            bind_attribute_value(&attr, &column(AttributeTransform::None), &"ON".into()).is_err()
        );
    }

    #[test]
    fn test_char_one_and_boolean() {
        let flag = Attribute::new("f", AttributeType::CharOne, false);
        let plain = column(AttributeTransform::None);
        assert!(bind_attribute_value(&flag, &plain, &"Y".into()).is_ok());
        assert!(bind_attribute_value(&flag, &plain, &"YES".into()).is_err());

        let b = Attribute::new("b", AttributeType::Boolean, false);
        assert_eq!(
            bind_attribute_value(&b, &plain, &"true".into()).unwrap(),
            Value::Bool(Some(true))
        );
        assert!(bind_attribute_value(&b, &plain, &FieldValue::Int(1)).is_err());
    }

    #[test]
    fn test_smallstring_width() {
        let name = Attribute::new("name", AttributeType::Utf8Smallstring, false);
        let plain = column(AttributeTransform::None);
        let widest = "é".repeat(SMALLSTRING_MAX_CHARS);
        assert!(bind_attribute_value(&name, &plain, &widest.as_str().into()).is_ok());
        let wider = format!("{widest}x");
        assert!(bind_attribute_value(&name, &plain, &wider.into()).is_err());
        assert_eq!(
            bind_attribute_value(&name, &plain, &FieldValue::Int(7)).unwrap(),
            Value::from("7".to_string())
        );
    }

    #[test]
    fn test_id_values() {
        assert_eq!(
            bind_id_value("user", &"user:5".into()).unwrap(),
            Value::BigInt(Some(5))
        );
        assert_eq!(
            bind_id_value("user", &FieldValue::Int(9)).unwrap(),
            Value::BigInt(Some(9))
        );
        assert!(bind_id_value("user", &"order:5".into()).is_err());
        assert!(bind_id_value("user", &"five".into()).is_err());
        assert!(bind_id_value("user", &FieldValue::Int(-2)).is_err());
        assert!(bind_id_value("user", &FieldValue::UInt(u64::MAX)).is_err());
    }
}
