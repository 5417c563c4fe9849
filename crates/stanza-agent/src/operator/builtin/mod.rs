//! Builtin operator types.

use serde::de::DeserializeOwned;

use crate::operator::BuildError;
use crate::pipeline::Params;

pub mod input;
pub mod output;
pub mod parser;
pub mod transformer;

/// Binds a parameter map to a typed config via YAML value round-trip.
///
/// Unknown keys are rejected so config typos surface at build time.
pub(crate) fn decode_config<T: DeserializeOwned>(params: Params) -> Result<T, BuildError> {
    let id = params.id();
    serde_yaml::from_value(serde_yaml::Value::Mapping(params.0))
        .map_err(|source| BuildError::InvalidConfig { id, source })
}
