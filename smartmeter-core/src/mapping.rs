//! Code mapping table
//!
//! Maps OBIS codes to the rule describing what to do with their values.
//! The table is built once at startup from a [`MappingConfig`] and never
//! changes afterwards. Lookups are exact-match only; a code without an
//! entry is simply not of interest to the operator.
//!
//! # Configuration format
//!
//! ```yaml
//! "1-0:1.8.0*255":
//!   type: float
//!   metric:
//!     name: smartmeter_wirkarbeit_verbrauch_wh_total
//!     help: Summe Wirkarbeit Verbrauch über alle Phasen
//! "1-0:16.7.0*255":
//!   type: float
//!   mqtt:
//!     topic: momentane-wirkleistung
//! "1-0:96.1.0*255":
//!   type: string
//!   var: server_id
//! ```

use crate::error::{MeterError, MeterResult};
use crate::obis_code::ObisCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// How the value of a mapped code is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Parsed as a floating-point number and dispatched as a reading
    Numeric,
    /// Stored as a string in the derived state under the rule's variable
    String,
    /// Recognised but unused
    Ignored,
}

/// Metric a numeric code is exported as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    #[serde(default)]
    pub help: String,
}

/// Semantic rule for one OBIS code
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRule {
    pub value_kind: ValueKind,
    pub variable: Option<String>,
    pub metric: Option<MetricDescriptor>,
    pub topic: Option<String>,
}

impl MappingRule {
    /// A numeric rule exported as the given metric
    pub fn numeric(metric: MetricDescriptor) -> Self {
        Self {
            value_kind: ValueKind::Numeric,
            variable: None,
            metric: Some(metric),
            topic: None,
        }
    }

    /// A string rule stored under `variable`
    pub fn string(variable: impl Into<String>) -> Self {
        Self {
            value_kind: ValueKind::String,
            variable: Some(variable.into()),
            metric: None,
            topic: None,
        }
    }

    /// Set the publish topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Value type as written in the mapping file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "numeric")]
    Float,
    String,
    #[serde(alias = "ignored")]
    Ignore,
}

/// Publish target as written in the mapping file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic: String,
}

/// One rule record as written in the mapping file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(rename = "type", default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub mqtt: Option<TopicConfig>,
    #[serde(default)]
    pub metric: Option<MetricDescriptor>,
}

impl From<RuleConfig> for MappingRule {
    fn from(config: RuleConfig) -> Self {
        // Without an explicit type, a rule that routes somewhere is numeric
        let value_kind = match config.value_type {
            Some(ValueType::Float) => ValueKind::Numeric,
            Some(ValueType::String) => ValueKind::String,
            Some(ValueType::Ignore) => ValueKind::Ignored,
            None if config.metric.is_some() || config.mqtt.is_some() => ValueKind::Numeric,
            None => ValueKind::Ignored,
        };
        Self {
            value_kind,
            variable: config.var,
            metric: config.metric,
            topic: config.mqtt.map(|m| m.topic),
        }
    }
}

/// Mapping file contents: OBIS code string to rule record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingConfig(pub BTreeMap<String, RuleConfig>);

impl MappingConfig {
    /// Parse a mapping file in YAML form
    pub fn from_yaml_str(s: &str) -> MeterResult<Self> {
        serde_yaml::from_str(s)
            .map_err(|e| MeterError::Config(format!("Invalid mapping configuration: {}", e)))
    }
}

/// Immutable table from OBIS code to mapping rule
#[derive(Debug, Clone, Default)]
pub struct CodeMappingTable {
    rules: HashMap<ObisCode, Arc<MappingRule>>,
}

impl CodeMappingTable {
    /// Build the table from a parsed mapping file
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Config` if a metric name is empty or used by more
    /// than one code.
    pub fn from_config(config: MappingConfig) -> MeterResult<Self> {
        let mut rules = HashMap::with_capacity(config.0.len());
        let mut metric_names = HashSet::new();

        for (code, rule_config) in config.0 {
            let rule = MappingRule::from(rule_config);

            if let Some(metric) = &rule.metric {
                if metric.name.is_empty() {
                    return Err(MeterError::Config(format!("Empty metric name for {}", code)));
                }
                if !metric_names.insert(metric.name.clone()) {
                    return Err(MeterError::Config(format!(
                        "Metric {} is mapped more than once",
                        metric.name
                    )));
                }
            }
            if rule.value_kind == ValueKind::String && rule.variable.is_none() {
                log::warn!("String rule for {} has no variable and will have no effect", code);
            }

            rules.insert(ObisCode::new(code), Arc::new(rule));
        }

        Ok(Self { rules })
    }

    /// Parse and build the table from a YAML mapping file
    pub fn from_yaml_str(s: &str) -> MeterResult<Self> {
        Self::from_config(MappingConfig::from_yaml_str(s)?)
    }

    /// Table used when no mapping file is given
    ///
    /// Covers total consumption, total feed-in, momentary power and the
    /// meter's server id.
    pub fn default_table() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            ObisCode::new("1-0:1.8.0*255"),
            Arc::new(MappingRule::numeric(MetricDescriptor {
                name: "smartmeter_wirkarbeit_verbrauch_wh_total".to_string(),
                help: "Summe Wirkarbeit Verbrauch über alle Phasen".to_string(),
            })),
        );
        rules.insert(
            ObisCode::new("1-0:2.8.0*255"),
            Arc::new(MappingRule::numeric(MetricDescriptor {
                name: "smartmeter_wirkarbeit_einspeisung_wh_total".to_string(),
                help: "Summe Wirkarbeit Einspeisung über alle Phasen".to_string(),
            })),
        );
        rules.insert(
            ObisCode::new("1-0:16.7.0*255"),
            Arc::new(
                MappingRule::numeric(MetricDescriptor {
                    name: "smartmeter_wirkleistung_gesamt_w".to_string(),
                    help: "gelieferte Leistung ueber alle Phasen".to_string(),
                })
                .with_topic("momentane-wirkleistung"),
            ),
        );
        rules.insert(
            ObisCode::new("1-0:96.1.0*255"),
            Arc::new(MappingRule::string("server_id")),
        );
        Self { rules }
    }

    /// Build a table directly from rules
    pub fn from_rules(rules: impl IntoIterator<Item = (ObisCode, MappingRule)>) -> Self {
        Self {
            rules: rules.into_iter().map(|(code, rule)| (code, Arc::new(rule))).collect(),
        }
    }

    /// Look up the rule for a code
    ///
    /// Rules of kind [`ValueKind::Ignored`] are returned like any other;
    /// callers treat them the same as a missing entry.
    pub fn lookup(&self, code: &str) -> Option<&Arc<MappingRule>> {
        self.rules.get(code)
    }

    /// Iterate over all numeric rules carrying a metric descriptor
    pub fn metric_rules(&self) -> impl Iterator<Item = (&ObisCode, &MetricDescriptor)> {
        self.rules.iter().filter_map(|(code, rule)| match (&rule.value_kind, &rule.metric) {
            (ValueKind::Numeric, Some(metric)) => Some((code, metric)),
            _ => None,
        })
    }

    /// Number of mapped codes
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
