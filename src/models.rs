//! Task parameters and associated types

use crate::types::DataType;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// Compression algorithm of a stored array
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    /// Gzip
    Gzip,
    /// Zlib
    Zlib,
}

/// Requested compression of the output measure
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionRequest {
    Yes,
    No,
    /// Same as the input measure
    #[default]
    Auto,
}

impl CompressionRequest {
    /// Whether the output is compressed given the compression of the input.
    pub fn resolve(self, input_compressed: bool) -> bool {
        match self {
            Self::Yes => true,
            Self::No => false,
            Self::Auto => input_compressed,
        }
    }
}

/// Yes/no switch
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    #[default]
    Yes,
    No,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        self == Self::Yes
    }
}

/// Requested datatype of the output measure
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(try_from = "String")]
pub enum TypeRequest {
    /// Declare the input measure type on every primitive and infer the result
    Auto,
    /// Take the type declared by the outermost primitive
    #[default]
    Manual,
    /// A given type
    Explicit(DataType),
}

impl TryFrom<String> for TypeRequest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            name => DataType::from_name(name)
                .map(Self::Explicit)
                .ok_or_else(|| format!("unknown measure type {value}")),
        }
    }
}

/// Parameters of an apply task
///
/// Deserialised from the key-value map the engine hands to the operator. Keys used by the engine
/// itself are ignored.
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_task_parameters"))]
pub struct TaskParameters {
    /// Expression applied to the measure
    #[validate(length(min = 1, message = "query must not be empty"))]
    pub query: String,
    /// Expression applied to the values of the implicit dimension
    #[serde(default, deserialize_with = "null_as_none")]
    pub dim_query: Option<String>,
    /// PID of the input datacube
    #[validate(length(min = 1, message = "cube must not be empty"))]
    pub cube: String,
    /// Name of the output measure
    #[serde(default, deserialize_with = "null_as_none")]
    #[validate(custom = "validate_measure_name")]
    pub measure: Option<String>,
    /// Datatype of the output measure
    #[serde(default)]
    pub measure_type: TypeRequest,
    /// Whether to check the datatypes declared by the primitives
    #[serde(default)]
    pub check_type: YesNo,
    /// Compression of the output measure
    #[serde(default)]
    pub compressed: CompressionRequest,
    /// Free text attached to the output datacube
    #[serde(default, deserialize_with = "null_as_none")]
    pub description: Option<String>,
    pub sessionid: Option<String>,
    pub jobid: Option<String>,
}

impl TaskParameters {
    /// Deserialise and validate task parameters from a key-value map.
    pub fn from_map<'a, I>(map: I) -> Result<Self, crate::error::ApplyError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let map: serde_json::Map<String, serde_json::Value> = map
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.into()))
            .collect();
        let parameters: Self = serde_json::from_value(serde_json::Value::Object(map))?;
        parameters.validate()?;
        Ok(parameters)
    }
}

/// Treat the literal value `null` as an absent parameter.
fn null_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.trim().eq_ignore_ascii_case("null")))
}

/// Validate the name of the output measure
fn validate_measure_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        let mut error = ValidationError::new("measure must be a valid identifier");
        error.add_param("measure".into(), &name);
        return Err(error);
    }
    Ok(())
}

/// Validate task parameters
fn validate_task_parameters(parameters: &TaskParameters) -> Result<(), ValidationError> {
    if let Some(dim_query) = &parameters.dim_query {
        if dim_query.trim().is_empty() {
            return Err(ValidationError::new("dim_query must not be empty"));
        }
    }
    if parameters.query.trim().is_empty() {
        return Err(ValidationError::new("query must not be blank"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};

    #[test]
    fn test_required_fields() {
        let parameters = test_utils::get_test_task_parameters();
        assert_de_tokens(
            &parameters,
            &[
                Token::Struct {
                    name: "TaskParameters",
                    len: 2,
                },
                Token::Str("query"),
                Token::Str("oph_abs('oph_double','oph_double',measure)"),
                Token::Str("cube"),
                Token::Str("http://127.0.0.1/ophidia/1/1"),
                Token::StructEnd,
            ],
        );
        parameters.validate().unwrap()
    }

    #[test]
    fn test_optional_fields() {
        let parameters = test_utils::get_test_task_parameters_optional();
        assert_de_tokens(
            &parameters,
            &[
                Token::Struct {
                    name: "TaskParameters",
                    len: 2,
                },
                Token::Str("query"),
                Token::Str("oph_abs('oph_double','oph_double',measure)"),
                Token::Str("dim_query"),
                Token::Some,
                Token::Str("oph_abs('oph_double','oph_double',dimension)"),
                Token::Str("cube"),
                Token::Str("http://127.0.0.1/ophidia/1/1"),
                Token::Str("measure"),
                Token::Some,
                Token::Str("absolute"),
                Token::Str("measure_type"),
                Token::Str("oph_double"),
                Token::Str("check_type"),
                Token::Enum { name: "YesNo" },
                Token::Str("no"),
                Token::Unit,
                Token::Str("compressed"),
                Token::Enum {
                    name: "CompressionRequest",
                },
                Token::Str("yes"),
                Token::Unit,
                Token::Str("description"),
                Token::Some,
                Token::Str("absolute values"),
                Token::Str("sessionid"),
                Token::Some,
                Token::Str("session"),
                Token::Str("jobid"),
                Token::Some,
                Token::Str("7"),
                Token::StructEnd,
            ],
        );
        parameters.validate().unwrap()
    }

    #[test]
    fn test_missing_query() {
        assert_de_tokens_error::<TaskParameters>(
            &[
                Token::Struct {
                    name: "TaskParameters",
                    len: 2,
                },
                Token::Str("cube"),
                Token::Str("http://127.0.0.1/ophidia/1/1"),
                Token::StructEnd,
            ],
            "missing field `query`",
        )
    }

    #[test]
    fn test_missing_cube() {
        assert_de_tokens_error::<TaskParameters>(
            &[
                Token::Struct {
                    name: "TaskParameters",
                    len: 2,
                },
                Token::Str("query"),
                Token::Str("measure"),
                Token::StructEnd,
            ],
            "missing field `cube`",
        )
    }

    #[test]
    fn test_invalid_measure_type() {
        assert_de_tokens_error::<TaskParameters>(
            &[
                Token::Struct {
                    name: "TaskParameters",
                    len: 2,
                },
                Token::Str("measure_type"),
                Token::Str("oph_foo"),
                Token::StructEnd,
            ],
            "unknown measure type oph_foo",
        )
    }

    #[test]
    fn test_invalid_check_type() {
        assert_de_tokens_error::<TaskParameters>(
            &[
                Token::Struct {
                    name: "TaskParameters",
                    len: 2,
                },
                Token::Str("check_type"),
                Token::Enum { name: "YesNo" },
                Token::Str("maybe"),
                Token::StructEnd,
            ],
            "unknown variant `maybe`, expected `yes` or `no`",
        )
    }

    #[test]
    #[should_panic(expected = "query must not be empty")]
    fn test_empty_query() {
        let mut parameters = test_utils::get_test_task_parameters();
        parameters.query = "".to_string();
        parameters.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "query must not be blank")]
    fn test_blank_query() {
        let mut parameters = test_utils::get_test_task_parameters();
        parameters.query = "  ".to_string();
        parameters.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "cube must not be empty")]
    fn test_empty_cube() {
        let mut parameters = test_utils::get_test_task_parameters();
        parameters.cube = "".to_string();
        parameters.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "measure must be a valid identifier")]
    fn test_invalid_measure_name() {
        let mut parameters = test_utils::get_test_task_parameters();
        parameters.measure = Some("1 bad".to_string());
        parameters.validate().unwrap()
    }

    #[test]
    #[should_panic(expected = "dim_query must not be empty")]
    fn test_empty_dim_query() {
        let mut parameters = test_utils::get_test_task_parameters();
        parameters.dim_query = Some(" ".to_string());
        parameters.validate().unwrap()
    }

    #[test]
    fn test_from_map() {
        let parameters = TaskParameters::from_map([
            ("query", "oph_abs('oph_double','oph_double',measure)"),
            ("cube", "http://127.0.0.1/ophidia/1/1"),
            ("dim_query", "null"),
            ("measure_type", "AUTO"),
            ("compressed", "no"),
            ("ncores", "1"),
        ])
        .unwrap();
        assert_eq!(None, parameters.dim_query);
        assert_eq!(TypeRequest::Auto, parameters.measure_type);
        assert_eq!(CompressionRequest::No, parameters.compressed);
        assert_eq!(YesNo::Yes, parameters.check_type);
    }

    #[test]
    fn test_from_map_invalid() {
        assert!(TaskParameters::from_map([("query", "measure")]).is_err());
        assert!(TaskParameters::from_map([("query", ""), ("cube", "x/1/1")]).is_err());
    }

    #[test]
    fn test_compression_request_resolve() {
        assert!(CompressionRequest::Auto.resolve(true));
        assert!(!CompressionRequest::Auto.resolve(false));
        assert!(CompressionRequest::Yes.resolve(false));
        assert!(!CompressionRequest::No.resolve(true));
    }
}
