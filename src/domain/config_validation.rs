//! Configuration validation.
//!
//! Validates the `[engine]`, `[data]` and indicator sections before a batch
//! runs, and turns them into engine limits and indicator requests.

use crate::domain::definition::IndicatorRequest;
use crate::domain::error::QuantexprError;
use crate::domain::limits::{EngineLimits, MAX_DEPTH_CEILING};
use crate::ports::config_port::ConfigPort;
use std::collections::BTreeMap;
use std::time::Duration;

/// Section prefix for indicator definitions, e.g. `[indicator.sma]`.
pub const INDICATOR_SECTION_PREFIX: &str = "indicator.";

const ENGINE_KEYS: [&str; 6] = [
    "max_source_len",
    "max_depth",
    "max_nodes",
    "max_window",
    "cache_ttl_secs",
    "cache_capacity",
];

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), QuantexprError> {
    for key in ENGINE_KEYS {
        validate_positive_int(config, "engine", key)?;
    }
    validate_max_depth(config)?;
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), QuantexprError> {
    match config.get_string("data", "path") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(QuantexprError::ConfigMissing {
            section: "data".to_string(),
            key: "path".to_string(),
        }),
    }
}

fn validate_positive_int(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), QuantexprError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(());
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Ok(()),
        Ok(_) => Err(QuantexprError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{} must be positive", key),
        }),
        Err(_) => Err(QuantexprError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("'{}' is not an integer", raw.trim()),
        }),
    }
}

fn validate_max_depth(config: &dyn ConfigPort) -> Result<(), QuantexprError> {
    let depth = config.get_int("engine", "max_depth", 0);
    if depth > MAX_DEPTH_CEILING as i64 {
        return Err(QuantexprError::ConfigInvalid {
            section: "engine".to_string(),
            key: "max_depth".to_string(),
            reason: format!("max_depth must be at most {}", MAX_DEPTH_CEILING),
        });
    }
    Ok(())
}

/// Validated `[engine]` section; missing keys take the defaults.
pub fn build_engine_limits(config: &dyn ConfigPort) -> Result<EngineLimits, QuantexprError> {
    validate_engine_config(config)?;
    let defaults = EngineLimits::default();
    let get = |key: &str, default: usize| -> usize {
        let value = config.get_int("engine", key, default as i64);
        usize::try_from(value).unwrap_or(default)
    };
    Ok(EngineLimits {
        max_source_len: get("max_source_len", defaults.max_source_len),
        max_depth: get("max_depth", defaults.max_depth),
        max_nodes: get("max_nodes", defaults.max_nodes),
        max_window: get("max_window", defaults.max_window),
        cache_ttl: Duration::from_secs(get("cache_ttl_secs", defaults.cache_ttl.as_secs() as usize) as u64),
        cache_capacity: get("cache_capacity", defaults.cache_capacity),
    })
}

/// Indicator names in submission order: `[batch] indicators` when present,
/// otherwise every `[indicator.*]` section sorted by name.
pub fn indicator_names(config: &dyn ConfigPort) -> Vec<String> {
    let listed = config.get_list("batch", "indicators");
    if !listed.is_empty() {
        return listed;
    }
    let mut names: Vec<String> = config
        .sections()
        .into_iter()
        .filter_map(|s| s.strip_prefix(INDICATOR_SECTION_PREFIX).map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names
}

/// Build one request per configured indicator.
pub fn build_requests(config: &dyn ConfigPort) -> Result<Vec<IndicatorRequest>, QuantexprError> {
    let names = indicator_names(config);
    if names.is_empty() {
        return Err(QuantexprError::ConfigMissing {
            section: "batch".to_string(),
            key: "indicators".to_string(),
        });
    }
    names.iter().map(|name| build_request(config, name)).collect()
}

fn build_request(config: &dyn ConfigPort, name: &str) -> Result<IndicatorRequest, QuantexprError> {
    let section = format!("{}{}", INDICATOR_SECTION_PREFIX, name);
    let expression = match config.get_string(&section, "expression") {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            return Err(QuantexprError::ConfigMissing {
                section,
                key: "expression".to_string(),
            });
        }
    };

    let mut request = IndicatorRequest::new(name, expression.trim());
    request.parameters = match config.get_string(&section, "params") {
        Some(raw) => parse_params(&raw).map_err(|reason| QuantexprError::ConfigInvalid {
            section: section.clone(),
            key: "params".to_string(),
            reason,
        })?,
        None => BTreeMap::new(),
    };
    if let Some(raw) = config.get_string(&section, "lookback") {
        let lookback = raw.trim().parse::<usize>().map_err(|_| QuantexprError::ConfigInvalid {
            section: section.clone(),
            key: "lookback".to_string(),
            reason: format!("'{}' is not a non-negative integer", raw.trim()),
        })?;
        request.lookback = Some(lookback);
    }
    Ok(request)
}

/// Parse `k=v, k=v` into a parameter map. Values must be finite numbers.
pub fn parse_params(raw: &str) -> Result<BTreeMap<String, f64>, String> {
    let mut params = BTreeMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, found '{}'", item))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing parameter name in '{}'", item));
        }
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("parameter '{}' has non-numeric value '{}'", key, value.trim()))?;
        if !value.is_finite() {
            return Err(format!("parameter '{}' must be finite", key));
        }
        if params.insert(key.to_string(), value).is_some() {
            return Err(format!("parameter '{}' given more than once", key));
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn empty_engine_section_uses_defaults() {
        let config = make_config("[engine]\n");
        assert_eq!(build_engine_limits(&config).unwrap(), EngineLimits::default());
    }

    #[test]
    fn engine_values_are_read() {
        let config = make_config(
            r#"
[engine]
max_source_len = 100
max_depth = 10
max_nodes = 50
max_window = 200
cache_ttl_secs = 60
cache_capacity = 16
"#,
        );
        let limits = build_engine_limits(&config).unwrap();
        assert_eq!(limits.max_source_len, 100);
        assert_eq!(limits.max_depth, 10);
        assert_eq!(limits.max_nodes, 50);
        assert_eq!(limits.max_window, 200);
        assert_eq!(limits.cache_ttl, Duration::from_secs(60));
        assert_eq!(limits.cache_capacity, 16);
    }

    #[test]
    fn zero_limit_fails() {
        let config = make_config("[engine]\nmax_nodes = 0\n");
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { key, .. } if key == "max_nodes"));
    }

    #[test]
    fn non_numeric_limit_fails() {
        let config = make_config("[engine]\ncache_ttl_secs = soon\n");
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { key, .. } if key == "cache_ttl_secs"));
    }

    #[test]
    fn max_depth_above_ceiling_fails() {
        let config = make_config("[engine]\nmax_depth = 1000\n");
        let err = validate_engine_config(&config).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { key, .. } if key == "max_depth"));
    }

    #[test]
    fn data_path_is_required() {
        let err = validate_data_config(&make_config("[data]\nsymbol = BHP\n")).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigMissing { key, .. } if key == "path"));
        assert!(validate_data_config(&make_config("[data]\npath = prices.csv\n")).is_ok());
    }

    #[test]
    fn requests_follow_batch_order() {
        let config = make_config(
            r#"
[batch]
indicators = spread, fast

[indicator.fast]
expression = rolling_mean(close, window=n)
params = n=3
lookback = 2

[indicator.spread]
expression = close - fast
"#,
        );
        let requests = build_requests(&config).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].name, "spread");
        assert_eq!(requests[0].expression, "close - fast");
        assert_eq!(requests[1].name, "fast");
        assert_eq!(requests[1].parameters.get("n"), Some(&3.0));
        assert_eq!(requests[1].lookback, Some(2));
    }

    #[test]
    fn sections_are_used_without_batch_list() {
        let config = make_config(
            "[indicator.b]\nexpression = close\n\n[indicator.a]\nexpression = open\n\n[engine]\n",
        );
        let names: Vec<String> = build_requests(&config).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_expression_fails() {
        let config = make_config("[batch]\nindicators = ghost\n");
        let err = build_requests(&config).unwrap_err();
        assert!(
            matches!(err, QuantexprError::ConfigMissing { section, key } if section == "indicator.ghost" && key == "expression")
        );
    }

    #[test]
    fn no_indicators_fails() {
        let err = build_requests(&make_config("[engine]\n")).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigMissing { section, .. } if section == "batch"));
    }

    #[test]
    fn bad_lookback_fails() {
        let config = make_config("[indicator.x]\nexpression = close\nlookback = -1\n");
        let err = build_requests(&config).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { key, .. } if key == "lookback"));
    }

    #[test]
    fn params_parsing() {
        let params = parse_params("n = 3, w=0.5").unwrap();
        assert_eq!(params.get("n"), Some(&3.0));
        assert_eq!(params.get("w"), Some(&0.5));
        assert!(parse_params("").unwrap().is_empty());
        assert!(parse_params("n").is_err());
        assert!(parse_params("n=abc").is_err());
        assert!(parse_params("n=1, n=2").is_err());
        assert!(parse_params("=1").is_err());
        assert!(parse_params("n=inf").is_err());
    }

    #[test]
    fn bad_params_fail() {
        let config = make_config("[indicator.x]\nexpression = close\nparams = n=oops\n");
        let err = build_requests(&config).unwrap_err();
        assert!(matches!(err, QuantexprError::ConfigInvalid { key, .. } if key == "params"));
    }
}
