//! Limit settings loaded from YAML files or the environment.
//!
//! ```yaml
//! limits:
//!   - name: per-second
//!     preset: computeEngineAPI
//!     max_wait_ms: 5000
//!   - name: per-minute
//!     per_minute: 1200
//! ```
//!
//! Every entry becomes one token bucket; several entries are enforced together
//! through a [`CompositeLimiter`].

use crate::error::ErrorContext;
use crate::resilience::{
    CompositeLimiter, Limiter, RateLimiter, RateLimiterConfig, RateLimiterPreset,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_PRESET: &str = "GCP_RATELIMIT_PRESET";
pub const ENV_RPS: &str = "GCP_RATELIMIT_RPS";
pub const ENV_RPM: &str = "GCP_RATELIMIT_RPM";
pub const ENV_BURST: &str = "GCP_RATELIMIT_BURST";
pub const ENV_MAX_WAIT_MS: &str = "GCP_RATELIMIT_MAX_WAIT_MS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitSettings {
    #[serde(default)]
    pub limits: Vec<LimitSpec>,
}

/// One bucket. Starts from `preset` (or `per_minute`, or `refill_rate_per_second`
/// with one second of burst) and then applies the explicit fields on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    /// Shorthand for `refill_rate_per_second = n / 60` and `capacity = n`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_ms: Option<u64>,
}

fn settings_error(msg: impl Into<String>, field: String, details: Option<String>) -> Error {
    let mut context = ErrorContext::new()
        .with_field_path(field)
        .with_source("limit_settings");
    if let Some(details) = details {
        context = context.with_details(details);
    }
    Error::configuration_with_context(msg, context)
}

impl LimitSpec {
    pub fn from_preset(preset: RateLimiterPreset) -> Self {
        Self {
            name: Some(preset.name().to_string()),
            preset: Some(preset.name().to_string()),
            ..Self::default()
        }
    }

    /// Display label: the name, else the preset, else the position.
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.preset.clone())
            .unwrap_or_else(|| format!("limits[{}]", index))
    }

    /// Resolve and validate this entry. `index` is only used in error paths.
    pub fn to_config(&self, index: usize) -> Result<RateLimiterConfig> {
        let field = |name: &str| format!("limits[{}].{}", index, name);

        let mut cfg = if let Some(name) = &self.preset {
            RateLimiterPreset::from_name(name)
                .ok_or_else(|| {
                    settings_error(
                        format!("unknown rate limiter preset '{}'", name),
                        field("preset"),
                        None,
                    )
                })?
                .config()
        } else if let Some(per_minute) = self.per_minute {
            RateLimiterConfig::new(per_minute / 60.0, per_minute)
        } else if let Some(rate) = self.refill_rate_per_second {
            RateLimiterConfig::from_rps(rate).ok_or_else(|| {
                settings_error(
                    "invalid rate limiter refill_rate_per_second",
                    field("refill_rate_per_second"),
                    Some(format!("expected a finite value >= 0, got {}", rate)),
                )
            })?
        } else {
            return Err(settings_error(
                "limit needs one of preset, per_minute or refill_rate_per_second",
                format!("limits[{}]", index),
                None,
            ));
        };

        if self.preset.is_some() {
            if let Some(per_minute) = self.per_minute {
                cfg = cfg
                    .with_refill_rate(per_minute / 60.0)
                    .with_capacity(per_minute);
            }
        }
        if let Some(rate) = self.refill_rate_per_second {
            cfg = cfg.with_refill_rate(rate);
        }
        if let Some(capacity) = self.capacity {
            cfg = cfg.with_capacity(capacity);
        }
        if let Some(initial) = self.initial_tokens {
            cfg = cfg.with_initial_tokens(initial);
        }
        if let Some(ms) = self.max_wait_ms {
            cfg = cfg.with_max_wait_time(Duration::from_millis(ms));
        }

        cfg.validate().map_err(|e| match e {
            Error::Configuration {
                message,
                mut context,
            } => {
                let inner = context.field_path.take().unwrap_or_default();
                context.field_path = Some(field(&inner));
                context.source = Some("limit_settings".to_string());
                Error::Configuration { message, context }
            }
            other => other,
        })?;
        Ok(cfg)
    }
}

impl LimitSettings {
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new().with_source("limit_settings"),
            )
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("limit_settings"),
            )
        })
    }

    /// Read `GCP_RATELIMIT_*` variables. Returns `Ok(None)` when none is set.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_env_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`LimitSettings::from_env`] with an injectable variable lookup.
    pub fn from_env_vars<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
            match raw {
                None => Ok(None),
                Some(s) => s.trim().parse::<T>().map(Some).map_err(|_| {
                    settings_error(
                        format!("cannot parse {}", key),
                        key.to_string(),
                        Some(format!("got '{}'", s)),
                    )
                }),
            }
        }

        let preset = lookup(ENV_PRESET).filter(|s| !s.trim().is_empty());
        let rps: Option<f64> = parse(ENV_RPS, lookup(ENV_RPS))?;
        let rpm: Option<f64> = parse(ENV_RPM, lookup(ENV_RPM))?;
        let burst: Option<f64> = parse(ENV_BURST, lookup(ENV_BURST))?;
        let max_wait_ms: Option<u64> = parse(ENV_MAX_WAIT_MS, lookup(ENV_MAX_WAIT_MS))?;

        if let (Some(burst), None) = (burst, rps) {
            return Err(settings_error(
                format!("{} requires {}", ENV_BURST, ENV_RPS),
                ENV_BURST.to_string(),
                Some(format!("got '{}' with no per-second bucket to apply it to", burst)),
            ));
        }

        let mut limits = Vec::new();
        if let Some(preset) = preset {
            limits.push(LimitSpec {
                name: Some("env-preset".to_string()),
                preset: Some(preset.trim().to_string()),
                max_wait_ms,
                ..LimitSpec::default()
            });
        }
        if let Some(rps) = rps {
            limits.push(LimitSpec {
                name: Some("env-per-second".to_string()),
                refill_rate_per_second: Some(rps),
                capacity: Some(burst.unwrap_or_else(|| rps.max(1.0))),
                max_wait_ms,
                ..LimitSpec::default()
            });
        }
        if let Some(rpm) = rpm {
            limits.push(LimitSpec {
                name: Some("env-per-minute".to_string()),
                per_minute: Some(rpm),
                max_wait_ms,
                ..LimitSpec::default()
            });
        }

        if limits.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { limits }))
    }

    pub fn validate(&self) -> Result<()> {
        self.configs().map(|_| ())
    }

    pub fn configs(&self) -> Result<Vec<RateLimiterConfig>> {
        self.limits
            .iter()
            .enumerate()
            .map(|(idx, spec)| spec.to_config(idx))
            .collect()
    }

    /// One bucket per entry, in declaration order.
    pub fn build_limiters(&self) -> Result<Vec<Arc<RateLimiter>>> {
        Ok(self
            .configs()?
            .into_iter()
            .map(|cfg| Arc::new(RateLimiter::new(cfg)))
            .collect())
    }

    /// A single [`RateLimiter`] for one entry, a [`CompositeLimiter`] for several.
    pub fn build(&self) -> Result<Arc<dyn Limiter>> {
        let mut limiters = self.build_limiters()?;
        match limiters.len() {
            0 => Err(settings_error(
                "no limits configured",
                "limits".to_string(),
                None,
            )),
            1 => {
                let limiter: Arc<dyn Limiter> = limiters.remove(0);
                Ok(limiter)
            }
            _ => Ok(Arc::new(CompositeLimiter::new(limiters))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_yaml_settings() {
        let settings = LimitSettings::from_yaml_str(
            r#"
limits:
  - name: per-second
    preset: computeEngineAPI
    max_wait_ms: 5000
  - name: per-minute
    per_minute: 1200
  - refill_rate_per_second: 2.5
    capacity: 10
    initial_tokens: 0
"#,
        )
        .unwrap();
        let configs = settings.configs().unwrap();
        assert_eq!(configs.len(), 3);

        assert_eq!(configs[0].refill_rate_per_second, 15.0);
        assert_eq!(configs[0].capacity, 30.0);
        assert_eq!(configs[0].max_wait_time, Some(Duration::from_secs(5)));

        assert_eq!(configs[1].refill_rate_per_second, 20.0);
        assert_eq!(configs[1].capacity, 1200.0);

        assert_eq!(configs[2].refill_rate_per_second, 2.5);
        assert_eq!(configs[2].capacity, 10.0);
        assert_eq!(configs[2].initial_tokens, Some(0.0));
        assert_eq!(settings.limits[2].label(2), "limits[2]");
    }

    #[test]
    fn test_explicit_fields_override_preset() {
        let spec = LimitSpec {
            preset: Some("cloud_logging_api".into()),
            capacity: Some(25.0),
            ..LimitSpec::default()
        };
        let cfg = spec.to_config(0).unwrap();
        assert_eq!(cfg.refill_rate_per_second, 50.0);
        assert_eq!(cfg.capacity, 25.0);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(LimitSettings::from_yaml_str("limits:\n  - burst: 3\n").is_err());
    }

    #[test]
    fn test_validation_error_points_at_entry() {
        let settings = LimitSettings::from_yaml_str(
            "limits:\n  - preset: default\n  - refill_rate_per_second: 1\n    capacity: 0\n",
        )
        .unwrap();
        let err = settings.validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("limits[1].capacity")
        );
    }

    #[test]
    fn test_entry_without_rate_is_rejected() {
        let settings = LimitSettings::from_yaml_str("limits:\n  - name: empty\n").unwrap();
        let err = settings.validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("limits[0]")
        );
    }

    #[test]
    fn test_unknown_preset() {
        let spec = LimitSpec {
            preset: Some("bigquery".into()),
            ..LimitSpec::default()
        };
        assert!(spec.to_config(0).is_err());
    }

    #[tokio::test]
    async fn test_build_single_and_composite() {
        let single = LimitSettings {
            limits: vec![LimitSpec::from_preset(RateLimiterPreset::Conservative)],
        };
        let limiter = single.build().unwrap();
        assert_eq!(limiter.available_tokens().await, 20.0);

        let both = LimitSettings {
            limits: vec![
                LimitSpec::from_preset(RateLimiterPreset::Conservative),
                LimitSpec {
                    per_minute: Some(6.0),
                    ..LimitSpec::default()
                },
            ],
        };
        let limiter = both.build().unwrap();
        let available = limiter.available_tokens().await;
        assert!((6.0..6.01).contains(&available));

        assert!(LimitSettings::default().build().is_err());
    }

    #[test]
    fn test_from_env_vars() {
        let vars: HashMap<&str, &str> = [
            (ENV_RPS, "5"),
            (ENV_RPM, "120"),
            (ENV_MAX_WAIT_MS, "250"),
        ]
        .into_iter()
        .collect();
        let settings = LimitSettings::from_env_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap()
            .unwrap();
        let configs = settings.configs().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].refill_rate_per_second, 5.0);
        assert_eq!(configs[0].capacity, 5.0);
        assert_eq!(configs[1].refill_rate_per_second, 2.0);
        assert_eq!(configs[1].capacity, 120.0);
        assert!(configs
            .iter()
            .all(|c| c.max_wait_time == Some(Duration::from_millis(250))));
    }

    #[test]
    fn test_from_env_vars_empty_and_invalid() {
        assert!(LimitSettings::from_env_vars(|_| None).unwrap().is_none());

        let err = LimitSettings::from_env_vars(|k| (k == ENV_RPS).then(|| "fast".to_string()))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some(ENV_RPS)
        );
    }

    #[test]
    fn test_from_env_vars_burst() {
        let settings = LimitSettings::from_env_vars(|k| match k {
            ENV_PRESET => Some("aggressive".to_string()),
            ENV_RPS => Some("0.5".to_string()),
            ENV_BURST => Some("3".to_string()),
            _ => None,
        })
        .unwrap()
        .unwrap();
        let configs = settings.configs().unwrap();
        assert_eq!(configs[0].refill_rate_per_second, 500.0);
        assert_eq!(configs[1].refill_rate_per_second, 0.5);
        assert_eq!(configs[1].capacity, 3.0);
    }

    #[test]
    fn test_burst_without_rps_is_rejected() {
        let err = LimitSettings::from_env_vars(|k| match k {
            ENV_PRESET => Some("conservative".to_string()),
            ENV_BURST => Some("40".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some(ENV_BURST)
        );

        assert!(LimitSettings::from_env_vars(|k| (k == ENV_BURST).then(|| "2".to_string()))
            .is_err());
    }
}
