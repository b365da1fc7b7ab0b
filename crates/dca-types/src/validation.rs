//! Validation of backend-specific configuration tables.
//!
//! Each pluggable implementation (storage backend, signer, executor, event
//! source) describes the TOML table it accepts as a [`Schema`]. The loader
//! runs these schemas before any implementation is constructed so that a bad
//! key surfaces at startup instead of on the first tick.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

impl ValidationError {
	/// Re-roots the error under a parent table name.
	fn nested_in(self, parent: &str) -> Self {
		match self {
			ValidationError::MissingField(f) => ValidationError::MissingField(format!("{}.{}", parent, f)),
			ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
				field: format!("{}.{}", parent, field),
				message,
			},
			ValidationError::TypeMismatch {
				field,
				expected,
				actual,
			} => ValidationError::TypeMismatch {
				field: format!("{}.{}", parent, field),
				expected,
				actual,
			},
			other => other,
		}
	}

	fn mismatch(field: &str, expected: &str, value: &toml::Value) -> Self {
		ValidationError::TypeMismatch {
			field: field.to_string(),
			expected: expected.to_string(),
			actual: value.type_str().to_string(),
		}
	}
}

/// Type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// `0x`-prefixed hex string, optionally of an exact decoded byte length.
	HexString { bytes: Option<usize> },
	/// `http://` or `https://` endpoint.
	Url,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	Array(Box<FieldType>),
	Table(Schema),
}

pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field with its expected type and an optional extra check.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of one TOML table.
#[derive(Debug, Default)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML value against this schema.
	///
	/// Keys not named by the schema are ignored.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::mismatch("root", "table", config))?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn check_type(name: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			if !value.is_str() {
				return Err(ValidationError::mismatch(name, "string", value));
			}
		}
		FieldType::HexString { bytes } => {
			let s = value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(name, "hex string", value))?;
			let digits = s.strip_prefix("0x").ok_or_else(|| ValidationError::InvalidValue {
				field: name.to_string(),
				message: "Expected 0x prefix".to_string(),
			})?;
			if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: "Not a hex string".to_string(),
				});
			}
			if let Some(len) = bytes {
				if digits.len() != len * 2 {
					return Err(ValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("Expected {} bytes, got {} hex digits", len, digits.len()),
					});
				}
			}
		}
		FieldType::Url => {
			let s = value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(name, "url", value))?;
			if !(s.starts_with("http://") || s.starts_with("https://")) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("'{}' is not an http(s) url", s),
				});
			}
		}
		FieldType::Integer { min, max } => {
			let int_val = value
				.as_integer()
				.ok_or_else(|| ValidationError::mismatch(name, "integer", value))?;

			if let Some(min_val) = min {
				if int_val < *min_val {
					return Err(ValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("Value {} is less than minimum {}", int_val, min_val),
					});
				}
			}
			if let Some(max_val) = max {
				if int_val > *max_val {
					return Err(ValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("Value {} is greater than maximum {}", int_val, max_val),
					});
				}
			}
		}
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(ValidationError::mismatch(name, "boolean", value));
			}
		}
		FieldType::Array(inner) => {
			let array = value
				.as_array()
				.ok_or_else(|| ValidationError::mismatch(name, "array", value))?;
			for (i, item) in array.iter().enumerate() {
				check_type(&format!("{}[{}]", name, i), item, inner)?;
			}
		}
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| e.nested_in(name))?;
		}
	}

	Ok(())
}

/// Implemented by every pluggable backend to describe its config table.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

impl ConfigSchema for Schema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::validate(self, config)
	}
}
