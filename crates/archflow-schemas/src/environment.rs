//! Process environment selector (spec.md §6)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
    Testing,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            "testing" => Ok(Environment::Testing),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Testing => "testing",
        };
        write!(f, "{s}")
    }
}

/// Resolve the process environment in the order defined by spec.md §6:
/// programmatic override -> `ARCHFLOW_ENV` -> configuration property ->
/// `development` default.
pub fn resolve_environment(
    override_value: Option<Environment>,
    config_property: Option<&str>,
) -> Environment {
    if let Some(env) = override_value {
        return env;
    }
    if let Ok(from_env) = std::env::var("ARCHFLOW_ENV") {
        if let Ok(parsed) = from_env.parse() {
            return parsed;
        }
    }
    if let Some(prop) = config_property {
        if let Ok(parsed) = prop.parse() {
            return parsed;
        }
    }
    Environment::Development
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_everything() {
        let env = resolve_environment(Some(Environment::Production), Some("staging"));
        assert_eq!(env, Environment::Production);
    }

    #[test]
    fn falls_back_to_config_property() {
        std::env::remove_var("ARCHFLOW_ENV");
        let env = resolve_environment(None, Some("staging"));
        assert_eq!(env, Environment::Staging);
    }

    #[test]
    fn falls_back_to_development() {
        std::env::remove_var("ARCHFLOW_ENV");
        let env = resolve_environment(None, None);
        assert_eq!(env, Environment::Development);
    }
}
