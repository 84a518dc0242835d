use crate::alerts::NewAlertRule;
use crate::models::Holding;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;

    let items: Vec<T> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {} in {}", what, path.display()))?;

    tracing::info!("Loaded {} {} from {}", items.len(), what, path.display());
    Ok(items)
}

/// Read holdings from a JSON array; a missing path yields no holdings
pub fn load_holdings(path: Option<&Path>) -> Result<Vec<Holding>> {
    match path {
        Some(path) => load_json(path, "holdings"),
        None => Ok(Vec::new()),
    }
}

/// Read alert rule definitions from a JSON array
pub fn load_alert_rules(path: Option<&Path>) -> Result<Vec<NewAlertRule>> {
    match path {
        Some(path) => load_json(path, "alert rules"),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertMetric, Comparator, RearmPolicy};

    fn temp_file(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("cryptoanalyzer-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_holdings() {
        let path = temp_file(
            r#"[
                {"asset":"bitcoin","quantity":0.5,"cost_basis":30000.0,"exchange":"binance"},
                {"asset":"ethereum","quantity":4.0,"cost_basis":1800.0}
            ]"#,
        );

        let holdings = load_holdings(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].exchange, "binance");
        assert_eq!(holdings[1].exchange, "wallet");
    }

    #[test]
    fn test_load_alert_rules() {
        let path = temp_file(
            r#"[
                {"asset":"bitcoin","metric":"price","comparator":"above","threshold":70000.0},
                {"asset":"ethereum","metric":"rsi","comparator":"below","threshold":30.0,"rearm":"manual"},
                {"asset":"solana","metric":"macd_histogram","comparator":"crosses","threshold":0.0}
            ]"#,
        );

        let rules = load_alert_rules(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].metric, AlertMetric::Price);
        assert_eq!(rules[0].rearm, None);
        assert_eq!(rules[1].rearm, Some(RearmPolicy::Manual));
        assert_eq!(rules[2].comparator, Comparator::Crosses);
    }

    #[test]
    fn test_missing_path_is_empty_but_missing_file_errors() {
        assert!(load_holdings(None).unwrap().is_empty());

        let missing = std::env::temp_dir().join("cryptoanalyzer-does-not-exist.json");
        let err = load_alert_rules(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Failed to read alert rules"));
    }

    #[test]
    fn test_malformed_file_errors() {
        let path = temp_file(r#"[{"asset":"bitcoin","metric":"volume"}]"#);
        let result = load_alert_rules(Some(&path));
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
