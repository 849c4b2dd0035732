//! `${VAR}` substitution in configuration values.
//!
//! Only the braced forms are recognized: `${VAR}` (error when unset) and
//! `${VAR:-fallback}`. A bare `$VAR` passes through untouched, so values
//! such as URLs containing literal dollar signs survive expansion.

use crate::ConfigError;

/// An environment variable referenced without a fallback and not set.
struct Unset(String);

fn lookup(var: &str) -> Result<Option<String>, Unset> {
    std::env::var(var)
        .map(Some)
        .map_err(|_| Unset(var.to_owned()))
}

/// Substitute `${VAR}` references in `value`, attributing failures to the
/// named config `field`.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    match shellexpand::env_with_context(value, lookup) {
        Ok(expanded) => Ok(expanded.into_owned()),
        Err(error) => {
            let Unset(var) = error.cause;
            Err(ConfigError::EnvVar {
                field: field.to_owned(),
                message: format!("${{{var}}} not set"),
            })
        }
    }
}
