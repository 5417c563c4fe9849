//! Named, parameterized sub-pipeline templates.
//!
//! A plugin is a YAML text template plus a parameter schema. The registry
//! scans a directory of `*.yaml` files (each file's stem becomes the
//! plugin name), and a pipeline config whose `type` names a plugin expands
//! into the rendered child configs.
//!
//! Rendering is two-pass: the first pass exposes the `parameters` schema,
//! which is validated and used to check the supplied parameters and fill
//! defaults; the second pass renders the final `pipeline` fragment with the
//! complete parameter set. Template failures of any kind (syntax, unknown
//! filter, bad metadata) surface as [`PluginError`] values; the engine
//! never panics.
//!
//! Inside a plugin body, `{{ output }}` expands to the plugin instance's
//! configured downstream list as a YAML flow sequence, and the builtin
//! `default` filter supplies fallbacks (`{{ level | default('info') }}`).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use minijinja::Environment;
use serde::Deserialize;

use crate::operator::OperatorRegistry;
use crate::pipeline::Params;

/// Errors from loading or rendering plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin type '{0}' does not exist")]
    NotDefined(String),

    #[error("plugin '{0}' already exists")]
    Duplicate(String),

    #[error("plugin '{0}' collides with a registered operator type")]
    ReservedName(String),

    #[error("failed to parse '{name}' as a plugin template: {message}")]
    Template { name: String, message: String },

    #[error("failed to render plugin '{name}': {message}")]
    Render { name: String, message: String },

    #[error("invalid plugin metadata for '{name}': {message}")]
    Metadata { name: String, message: String },

    #[error("missing required parameter for plugin '{name}': {parameter}")]
    MissingRequired { name: String, parameter: String },

    #[error("plugin parameter failed validation: '{parameter}' {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("load plugin directory {path}: {message}")]
    LoadDir { path: String, message: String },
}

/// The declared type of one plugin parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ParameterType {
    String,
    Strings,
    Int,
    Bool,
    Enum,
}

/// Schema for one plugin parameter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Parameter {
    #[allow(dead_code)]
    label: Option<String>,
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(rename = "type")]
    param_type: ParameterType,
    #[serde(default)]
    required: bool,
    default: Option<serde_yaml::Value>,
    valid_values: Option<Vec<String>>,
}

impl Parameter {
    /// Checks the schema's own consistency.
    fn validate_definition(&self, name: &str) -> Result<(), PluginError> {
        let invalid = |message: String| PluginError::InvalidParameter {
            parameter: name.to_string(),
            message,
        };

        if self.required && self.default.is_some() {
            return Err(invalid(
                "must not have both required=true and a default".to_string(),
            ));
        }
        match self.param_type {
            ParameterType::Enum => {
                if self.valid_values.as_ref().is_none_or(Vec::is_empty) {
                    return Err(invalid(
                        "enum parameters require non-empty valid_values".to_string(),
                    ));
                }
            }
            _ => {
                if self.valid_values.is_some() {
                    return Err(invalid(
                        "valid_values is only allowed on enum parameters".to_string(),
                    ));
                }
            }
        }
        if let Some(default) = &self.default {
            self.check_value(name, default)
                .map_err(|e| invalid(format!("invalid default: {e}")))?;
        }
        Ok(())
    }

    /// Checks a supplied or default value against the declared type.
    fn check_value(&self, name: &str, value: &serde_yaml::Value) -> Result<(), String> {
        use serde_yaml::Value as Y;
        match self.param_type {
            ParameterType::String => match value {
                Y::String(_) => Ok(()),
                _ => Err(format!("'{name}' must be a string")),
            },
            ParameterType::Strings => match value {
                Y::Sequence(seq) if seq.iter().all(|v| matches!(v, Y::String(_))) => Ok(()),
                _ => Err(format!("'{name}' must be a list of strings")),
            },
            ParameterType::Int => match value {
                Y::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                _ => Err(format!("'{name}' must be an integer")),
            },
            ParameterType::Bool => match value {
                Y::Bool(_) => Ok(()),
                _ => Err(format!("'{name}' must be a boolean")),
            },
            ParameterType::Enum => {
                let valid = self.valid_values.as_deref().unwrap_or_default();
                match value {
                    Y::String(s) if valid.iter().any(|v| v == s) => Ok(()),
                    _ => Err(format!("'{name}' must be one of {valid:?}")),
                }
            }
        }
    }
}

/// The parsed shape of a rendered plugin file.
#[derive(Debug, Clone, Default, Deserialize)]
struct PluginFile {
    #[allow(dead_code)]
    version: Option<String>,
    #[allow(dead_code)]
    title: Option<String>,
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, Parameter>,
    pipeline: Option<Vec<Params>>,
}

/// Registry of plugin templates, immutable after load.
pub struct PluginRegistry {
    env: Environment<'static>,
    names: HashSet<String>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        PluginRegistry {
            env: Environment::new(),
            names: HashSet::new(),
        }
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Loads every `*.yaml`/`*.yml` file under `dir`; each file stem
    /// becomes the plugin name. A missing directory yields an empty
    /// registry.
    pub fn load_dir(dir: &Path, operators: &OperatorRegistry) -> Result<Self, PluginError> {
        let mut registry = PluginRegistry::new();
        if !dir.exists() {
            return Ok(registry);
        }
        let read_err = |e: std::io::Error| PluginError::LoadDir {
            path: dir.display().to_string(),
            message: e.to_string(),
        };
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(read_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();
        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path).map_err(read_err)?;
            registry.add(name, &source, operators)?;
        }
        Ok(registry)
    }

    /// Adds a plugin template under `name`.
    ///
    /// Rejects duplicates, names that collide with registered operator
    /// types, and templates that fail to parse.
    pub fn add(
        &mut self,
        name: &str,
        source: &str,
        operators: &OperatorRegistry,
    ) -> Result<(), PluginError> {
        if self.names.contains(name) {
            return Err(PluginError::Duplicate(name.to_string()));
        }
        if operators.is_registered(name) {
            return Err(PluginError::ReservedName(name.to_string()));
        }
        self.env
            .add_template_owned(name.to_string(), source.to_string())
            .map_err(|e| PluginError::Template {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        self.names.insert(name.to_string());
        Ok(())
    }

    /// True if `name` is a loaded plugin.
    pub fn is_defined(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Renders the plugin into its child pipeline configs.
    ///
    /// `params` is the plugin instance's full config; `output` is its
    /// effective downstream list, exposed to the template as `{{ output }}`
    /// in YAML flow form.
    pub fn render(
        &self,
        name: &str,
        params: &serde_yaml::Mapping,
        output: &[String],
    ) -> Result<Vec<Params>, PluginError> {
        if !self.names.contains(name) {
            return Err(PluginError::NotDefined(name.to_string()));
        }

        // First pass: expose the parameter schema.
        let context = template_context(params, output);
        let file = self.render_once(name, &context)?;

        for (param_name, schema) in &file.parameters {
            schema.validate_definition(param_name)?;
        }

        let mut merged = false;
        let mut full_params = params.clone();
        for (param_name, schema) in &file.parameters {
            let key = serde_yaml::Value::String(param_name.clone());
            match params.get(&key) {
                Some(value) => {
                    schema.check_value(param_name, value).map_err(|message| {
                        PluginError::InvalidParameter {
                            parameter: param_name.clone(),
                            message,
                        }
                    })?;
                }
                None if schema.required => {
                    return Err(PluginError::MissingRequired {
                        name: name.to_string(),
                        parameter: param_name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &schema.default {
                        full_params.insert(key, default.clone());
                        merged = true;
                    }
                }
            }
        }

        // Second pass only when defaults changed the parameter set.
        let file = if merged {
            let context = template_context(&full_params, output);
            self.render_once(name, &context)?
        } else {
            file
        };

        Ok(file.pipeline.unwrap_or_default())
    }

    fn render_once(
        &self,
        name: &str,
        context: &HashMap<String, minijinja::Value>,
    ) -> Result<PluginFile, PluginError> {
        let render_err = |message: String| PluginError::Render {
            name: name.to_string(),
            message,
        };
        let template = self
            .env
            .get_template(name)
            .map_err(|e| render_err(e.to_string()))?;
        let rendered = template
            .render(context)
            .map_err(|e| render_err(e.to_string()))?;
        serde_yaml::from_str(&rendered).map_err(|e| PluginError::Metadata {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Builds the template context: every string-keyed parameter, plus the
/// rendered downstream list.
fn template_context(
    params: &serde_yaml::Mapping,
    output: &[String],
) -> HashMap<String, minijinja::Value> {
    let mut context = HashMap::new();
    for (key, value) in params {
        if let serde_yaml::Value::String(key) = key {
            context.insert(key.clone(), minijinja::Value::from_serialize(value));
        }
    }
    context.insert(
        "output".to_string(),
        minijinja::Value::from(format!("[{}]", output.join(", "))),
    );
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_params() -> serde_yaml::Mapping {
        serde_yaml::Mapping::new()
    }

    fn params_from(yaml: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(yaml).expect("valid params yaml")
    }

    fn registry_with(name: &str, template: &str) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .add(name, template, &OperatorRegistry::new())
            .expect("template parses");
        registry
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut registry = PluginRegistry::new();
        let operators = OperatorRegistry::new();
        registry.add("copy", "pipeline:\n", &operators).expect("first add");
        let err = registry
            .add("copy", "pipeline:\n", &operators)
            .expect_err("duplicate");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn add_rejects_reserved_operator_names() {
        let mut registry = PluginRegistry::new();
        let operators = OperatorRegistry::with_builtins();
        let err = registry
            .add("noop", "pipeline:\n", &operators)
            .expect_err("reserved");
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn add_rejects_bad_template_syntax() {
        let mut registry = PluginRegistry::new();
        let err = registry
            .add("broken", "{% if %}", &OperatorRegistry::new())
            .expect_err("bad syntax");
        assert!(err.to_string().contains("as a plugin template"));
    }

    #[test]
    fn render_unknown_plugin_fails() {
        let registry = PluginRegistry::new();
        let err = registry
            .render("ghost", &empty_params(), &[])
            .expect_err("unknown plugin");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn render_unknown_filter_is_an_error_not_a_panic() {
        let registry = registry_with("p", "pipeline:\n  - type: noop\n    x: {{ v | nofunc }}\n");
        let err = registry
            .render("p", &params_from("v: 1"), &[])
            .expect_err("unknown filter");
        assert!(err.to_string().contains("failed to render"));
    }

    #[test]
    fn render_substitutes_parameters_and_output() {
        let template = "\
pipeline:
  - id: gen
    type: generate_input
    record:
      message: {{ message }}
    output: {{ output }}
";
        let registry = registry_with("my_plugin", template);
        let children = registry
            .render("my_plugin", &params_from("message: hello"), &["$.drop".to_string()])
            .expect("renders");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id(), "gen");
        assert_eq!(children[0].outputs(), vec!["$.drop"]);
        let record = children[0].0.get("record").expect("record key");
        assert_eq!(
            record.get("message").and_then(|v| v.as_str()),
            Some("hello")
        );
    }

    #[test]
    fn render_applies_defaults_via_second_pass() {
        let template = "\
parameters:
  message:
    label: Message
    description: What to emit
    type: string
    default: fallback
pipeline:
  - type: generate_input
    record:
      message: {{ message }}
";
        let registry = registry_with("p", template);
        let children = registry.render("p", &empty_params(), &[]).expect("renders");
        let record = children[0].0.get("record").expect("record key");
        assert_eq!(
            record.get("message").and_then(|v| v.as_str()),
            Some("fallback")
        );
    }

    #[test]
    fn default_filter_supplies_fallbacks() {
        let template = "\
pipeline:
  - type: generate_input
    record:
      message: {{ message | default('quiet') }}
";
        let registry = registry_with("p", template);
        let children = registry.render("p", &empty_params(), &[]).expect("renders");
        let record = children[0].0.get("record").expect("record key");
        assert_eq!(
            record.get("message").and_then(|v| v.as_str()),
            Some("quiet")
        );
    }

    #[test]
    fn missing_required_parameter_fails() {
        let template = "\
parameters:
  path:
    label: Path
    description: A parameter
    type: int
    required: true
pipeline:
";
        let registry = registry_with("p", template);
        let err = registry
            .render("p", &empty_params(), &[])
            .expect_err("missing required");
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[test]
    fn supplied_parameter_type_mismatch_fails() {
        let template = "\
parameters:
  path:
    label: Path
    description: A parameter
    type: int
    required: true
pipeline:
";
        let registry = registry_with("p", template);
        let err = registry
            .render("p", &params_from("path: test"), &[])
            .expect_err("wrong type");
        assert!(err.to_string().contains("parameter failed validation"));
    }

    /// Schema validation matrix: (name, template, expect_err).
    #[test]
    fn schema_validation_matrix() {
        let cases: Vec<(&str, String, bool)> = vec![
            ("no_meta", "pipeline:\n".to_string(), false),
            (
                "string_default_ok",
                schema_case("type: string\n    default: hello"),
                false,
            ),
            (
                "string_default_invalid",
                schema_case("type: string\n    default: 123"),
                true,
            ),
            (
                "strings_default_ok",
                schema_case("type: strings\n    default:\n     - hello"),
                false,
            ),
            (
                "strings_default_invalid",
                schema_case("type: strings\n    default: hello"),
                true,
            ),
            (
                "int_default_ok",
                schema_case("type: int\n    default: 123"),
                false,
            ),
            (
                "int_default_invalid",
                schema_case("type: int\n    default: hello"),
                true,
            ),
            (
                "bool_default_ok",
                schema_case("type: bool\n    default: true"),
                false,
            ),
            (
                "bool_default_invalid",
                schema_case("type: bool\n    default: 123"),
                true,
            ),
            (
                "enum_ok",
                schema_case("type: enum\n    valid_values: [one, two]"),
                false,
            ),
            (
                "enum_default_ok",
                schema_case("type: enum\n    valid_values: [one, two]\n    default: one"),
                false,
            ),
            (
                "enum_default_invalid",
                schema_case("type: enum\n    valid_values: [one, two]\n    default: three"),
                true,
            ),
            (
                "enum_missing_valid_values",
                schema_case("type: enum"),
                true,
            ),
            ("unknown_type", schema_case("type: custom"), true),
            (
                "required_with_default",
                schema_case("type: int\n    required: true\n    default: 123"),
                true,
            ),
            (
                "non_enum_valid_values",
                schema_case("type: int\n    valid_values: [1, 2, 3]"),
                true,
            ),
        ];

        for (name, template, expect_err) in cases {
            let mut registry = PluginRegistry::new();
            registry
                .add(name, &template, &OperatorRegistry::new())
                .expect("templates always parse");
            let result = registry.render(name, &empty_params(), &[]);
            assert_eq!(result.is_err(), expect_err, "case {name}: {result:?}");
        }
    }

    fn schema_case(param_body: &str) -> String {
        format!(
            "\
version: 0.0.0
title: Test Plugin
description: This is a test plugin
parameters:
  path:
    label: Parameter
    description: The thing of the thing
    {param_body}
pipeline:
"
        )
    }
}
