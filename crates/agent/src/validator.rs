//! Argument validation against a tool's JSON Schema.
//!
//! Schemas are compiled with `jsonschema` once per tool and recompiled when the
//! tool's schema changes. Failures list every violation followed by a usage
//! summary built from the schema's properties.

use std::collections::{BTreeMap, HashMap};

use ferrocode_core::error::ToolError;
use tracing::warn;

struct CompiledSchema {
    source: serde_json::Value,
    validator: Result<jsonschema::Validator, String>,
    required: Vec<String>,
    properties: BTreeMap<String, PropertyRule>,
}

#[derive(Debug)]
struct PropertyRule {
    types: Vec<String>,
    description: Option<String>,
}

impl CompiledSchema {
    fn compile(tool: &str, schema: &serde_json::Value) -> Self {
        let validator = jsonschema::Validator::new(schema).map_err(|e| {
            warn!(tool = %tool, error = %e, "Tool has an invalid parameter schema");
            e.to_string()
        });

        let required = schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let properties = schema["properties"]
            .as_object()
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| {
                        let types = match &prop["type"] {
                            serde_json::Value::String(t) => vec![t.clone()],
                            serde_json::Value::Array(ts) => ts
                                .iter()
                                .filter_map(|t| t.as_str().map(String::from))
                                .collect(),
                            _ => Vec::new(),
                        };
                        let rule = PropertyRule {
                            types,
                            description: prop["description"].as_str().map(String::from),
                        };
                        (name.clone(), rule)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            source: schema.clone(),
            validator,
            required,
            properties,
        }
    }

    fn usage(&self, tool: &str) -> String {
        let mut text = format!("Parameters for '{tool}':");
        if self.properties.is_empty() {
            text.push_str("\n  (none)");
        }
        let mut example = serde_json::Map::new();
        for (name, rule) in &self.properties {
            let ty = rule.types.first().map(String::as_str).unwrap_or("any");
            let req = if self.required.contains(name) {
                "required"
            } else {
                "optional"
            };
            text.push_str(&format!("\n  - {name} ({ty}, {req})"));
            if let Some(desc) = &rule.description {
                text.push_str(&format!(": {desc}"));
            }
            if self.required.contains(name) {
                example.insert(name.clone(), placeholder(ty));
            }
        }
        text.push_str(&format!(
            "\nExample: {tool}({})",
            serde_json::Value::Object(example)
        ));
        text
    }
}

fn placeholder(ty: &str) -> serde_json::Value {
    match ty {
        "integer" => serde_json::json!(1),
        "number" => serde_json::json!(1.0),
        "boolean" => serde_json::json!(true),
        "array" => serde_json::json!([]),
        "object" => serde_json::json!({}),
        "null" => serde_json::Value::Null,
        other => serde_json::Value::String(format!("<{other}>")),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_f64() => "number",
        serde_json::Value::Number(_) => "integer",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Default)]
pub struct SchemaValidator {
    cache: HashMap<String, CompiledSchema>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `arguments` against `schema`; the error text ends with usage help.
    pub fn validate(
        &mut self,
        tool: &str,
        schema: &serde_json::Value,
        arguments: &serde_json::Value,
    ) -> Result<(), ToolError> {
        let stale = self
            .cache
            .get(tool)
            .is_none_or(|compiled| &compiled.source != schema);
        if stale {
            self.cache
                .insert(tool.to_string(), CompiledSchema::compile(tool, schema));
        }
        let Some(compiled) = self.cache.get(tool) else {
            return Ok(());
        };

        if !arguments.is_object() {
            return Err(ToolError::InvalidArguments(format!(
                "Error: Arguments for '{tool}' must be a JSON object, got {}.\n{}",
                json_type_name(arguments),
                compiled.usage(tool)
            )));
        }

        let validator = match &compiled.validator {
            Ok(validator) => validator,
            Err(reason) => {
                return Err(ToolError::InvalidArguments(format!(
                    "Error: Tool '{tool}' declares an invalid parameter schema ({reason}); it cannot be called."
                )));
            }
        };
        if validator.is_valid(arguments) {
            return Ok(());
        }

        let problems: Vec<String> = validator
            .iter_errors(arguments)
            .map(|error| {
                let at = error.instance_path.to_string();
                if at.is_empty() {
                    format!("  - {error}")
                } else {
                    format!("  - {at}: {error}")
                }
            })
            .collect();
        Err(ToolError::InvalidArguments(format!(
            "Error: Invalid arguments for '{tool}':\n{}\n{}",
            problems.join("\n"),
            compiled.usage(tool)
        )))
    }
}
