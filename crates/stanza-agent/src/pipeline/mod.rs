//! Declarative pipeline configuration and the builder that turns it into a
//! running operator graph.
//!
//! A pipeline config is an ordered list of [`Params`]: free-form,
//! string-keyed YAML mappings. Building proceeds in stages:
//!
//! 1. **Expansion**: entries whose `type` names a plugin are rendered into
//!    their child configs, inserted in place.
//! 2. **Namespacing**: every config gets a fully qualified ID, `$.<id>` at
//!    top level, `$.<plugin>.<id>` inside a plugin. Output references are
//!    rewritten into the same namespace unless they already point at a
//!    top-level operator.
//! 3. **Default output linkage**: operators that can emit but declared no
//!    `output` are routed to the next config in their sequence, then to the
//!    next config in the parent sequence, then to the pipeline default.
//! 4. **Build**: each config is bound to its typed form and constructed
//!    through the registry.
//! 5. **Wire**: `set_outputs` resolves every declared downstream.
//! 6. **Validation**: the result must form a DAG; cycles are rejected
//!    naming a participant.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::operator::{BuildContext, BuildError, Operator, OperatorRegistry};
use crate::plugin::PluginRegistry;

mod runtime;

pub use runtime::Pipeline;

/// A free-form operator configuration: an ordered YAML mapping.
///
/// `type` is required; `id` defaults to `type`; `output` is a string or a
/// list of strings. All other keys are passed through to the operator
/// factory untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(pub serde_yaml::Mapping);

impl Params {
    /// The configured `id`, falling back to `type`, falling back to empty.
    pub fn id(&self) -> String {
        self.get_string("id")
            .or_else(|| self.get_string("type"))
            .unwrap_or_default()
    }

    /// The configured `type`, if present.
    pub fn operator_type(&self) -> Option<String> {
        self.get_string("type")
    }

    /// The declared `output` references (zero or more).
    pub fn outputs(&self) -> Vec<String> {
        match self.0.get("output") {
            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
            Some(serde_yaml::Value::Sequence(seq)) => seq
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rejects configs without a `type`.
    pub fn validate(&self) -> Result<(), BuildError> {
        match self.operator_type() {
            Some(ty) if !ty.is_empty() => Ok(()),
            _ => Err(BuildError::MissingType),
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(|v| v.as_str().map(String::from))
    }

    fn set_id(&mut self, id: String) {
        self.0.insert(
            serde_yaml::Value::String("id".to_string()),
            serde_yaml::Value::String(id),
        );
    }

    fn set_outputs(&mut self, outputs: Vec<String>) {
        let value = serde_yaml::Value::Sequence(
            outputs.into_iter().map(serde_yaml::Value::String).collect(),
        );
        self.0
            .insert(serde_yaml::Value::String("output".to_string()), value);
    }

    /// Rewrites this config's `id` and `output` references into `namespace`.
    ///
    /// References already rooted at `$` are left alone, and references that
    /// resolve to a top-level operator escape the namespace.
    fn namespace(&mut self, namespace: &str, top_level_ids: &HashSet<String>) {
        self.set_id(format!("{namespace}.{}", self.id()));
        let declared = self.outputs();
        if declared.is_empty() {
            return;
        }
        let rewritten = namespace_refs(&declared, namespace, top_level_ids);
        self.set_outputs(rewritten);
    }
}

/// Namespaces a list of output references.
fn namespace_refs(
    refs: &[String],
    namespace: &str,
    top_level_ids: &HashSet<String>,
) -> Vec<String> {
    refs.iter()
        .map(|r| {
            if r.starts_with('$') {
                return r.clone();
            }
            let top_level = format!("$.{r}");
            if namespace == "$" || top_level_ids.contains(&top_level) {
                top_level
            } else {
                format!("{namespace}.{r}")
            }
        })
        .collect()
}

/// An ordered pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig(pub Vec<Params>);

/// One fully namespaced config plus the default-output targets to apply if
/// the built operator can emit but declared nothing.
#[derive(Debug, Clone)]
struct ExpandedConfig {
    params: Params,
    default_outputs: Vec<String>,
}

impl PipelineConfig {
    /// Builds the configuration into a validated, runnable [`Pipeline`].
    pub fn build_pipeline(
        &self,
        context: &BuildContext,
        registry: &OperatorRegistry,
        plugins: &PluginRegistry,
        default_output: Option<Arc<dyn Operator>>,
    ) -> Result<Pipeline, BuildError> {
        let default_output_id = default_output.as_ref().map(|op| op.id());
        let expanded = self.expand(plugins, default_output_id.as_deref())?;

        let mut operators: Vec<Arc<dyn Operator>> = Vec::with_capacity(expanded.len() + 1);
        for config in &expanded {
            let operator_type = config
                .params
                .operator_type()
                .ok_or(BuildError::MissingType)?;
            let operator = registry.build(&operator_type, config.params.clone(), context)?;
            operators.push(operator);
        }

        // Default-output linkage applies only to emitters that declared no
        // downstream; sinks never grow an output.
        for (operator, config) in operators.iter().zip(&expanded) {
            if operator.can_output()
                && operator.output_ids().is_empty()
                && !config.default_outputs.is_empty()
            {
                operator.set_output_ids(config.default_outputs.clone());
            }
        }

        if let Some(default) = default_output {
            operators.push(default);
        }

        let mut seen = HashSet::new();
        for operator in &operators {
            if !seen.insert(operator.id()) {
                return Err(BuildError::invalid(
                    operator.id(),
                    "duplicate operator id",
                ));
            }
        }

        for operator in &operators {
            if operator.can_output() {
                operator.set_outputs(&operators)?;
            }
        }

        Pipeline::new(operators)
    }

    /// Expands plugins, namespaces every config, and computes default
    /// output targets.
    ///
    /// Entries are walked back to front so that a config's default target
    /// (the entry point of whatever follows it) is already known when the
    /// config itself is processed.
    fn expand(
        &self,
        plugins: &PluginRegistry,
        default_output_id: Option<&str>,
    ) -> Result<Vec<ExpandedConfig>, BuildError> {
        let configs = &self.0;
        for params in configs {
            params.validate()?;
        }

        let top_level_ids: HashSet<String> =
            configs.iter().map(|p| format!("$.{}", p.id())).collect();

        let count = configs.len();
        let mut groups: Vec<Vec<ExpandedConfig>> = vec![Vec::new(); count];
        // The ID entries route to when they default into position i.
        let mut entry_ids: Vec<Option<String>> = vec![None; count];

        for i in (0..count).rev() {
            let params = &configs[i];
            let operator_type = params.operator_type().ok_or(BuildError::MissingType)?;

            // The target for anything that falls off the end of position i:
            // the next position's entry point, else the pipeline default.
            let next_target: Vec<String> = entry_ids[i + 1..]
                .iter()
                .flatten()
                .next()
                .cloned()
                .or_else(|| default_output_id.map(String::from))
                .into_iter()
                .collect();

            if plugins.is_defined(&operator_type) {
                let explicit = namespace_refs(&params.outputs(), "$", &top_level_ids);
                let plugin_target = if explicit.is_empty() {
                    next_target
                } else {
                    explicit
                };

                let namespace = format!("$.{}", params.id());
                let children =
                    plugins.render(&operator_type, &params.0, &plugin_target)?;

                let mut expanded_children = Vec::with_capacity(children.len());
                for mut child in children {
                    child.validate()?;
                    child.namespace(&namespace, &top_level_ids);
                    expanded_children.push(ExpandedConfig {
                        params: child,
                        default_outputs: Vec::new(),
                    });
                }
                // Children default to their next sibling; the last child
                // falls through to the plugin's own target.
                let child_ids: Vec<String> =
                    expanded_children.iter().map(|c| c.params.id()).collect();
                for (j, child) in expanded_children.iter_mut().enumerate() {
                    child.default_outputs = match child_ids.get(j + 1) {
                        Some(next) => vec![next.clone()],
                        None => plugin_target.clone(),
                    };
                }

                entry_ids[i] = expanded_children.first().map(|c| c.params.id());
                groups[i] = expanded_children;
            } else {
                let mut namespaced = params.clone();
                namespaced.namespace("$", &top_level_ids);
                entry_ids[i] = Some(namespaced.id());
                groups[i] = vec![ExpandedConfig {
                    params: namespaced,
                    default_outputs: next_target,
                }];
            }
        }

        Ok(groups.into_iter().flatten().collect())
    }
}
