//! # Dashboards
//!
//! The read-only catalog of dashboards, their groups and items, loaded from
//! the `[[dashboards]]` tables of the hub configuration. Items are either a
//! raw query template or a [`presets::Preset`] with per-item overrides.

pub mod presets;

use presets::{DurationAggregate, Preset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tq_core::{ItemDuration, PipelineQuery};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemTotal {
    Sum,
    #[default]
    Average,
    /// Rate per minute: the window value is divided by its length in minutes.
    Rpm,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub disabled: f64,
    #[serde(default)]
    pub warning: f64,
    #[serde(default)]
    pub error: f64,
}

/// How the tile value is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    #[default]
    Integer,
    OneDecimal,
    /// `100 - value` with one decimal (failure rate shown as availability).
    InvertedPercentage,
}

impl ValueFormat {
    pub fn format(self, value: f64) -> String {
        match self {
            Self::Integer => format!("{}", value.round() as i64),
            Self::OneDecimal => one_decimal(value),
            Self::InvertedPercentage => one_decimal(100.0 - value),
        }
    }
}

fn one_decimal(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded:.1}")
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub items: Vec<ItemConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemConfig {
    pub name: Option<String>,
    pub store: String,
    pub query: Option<String>,
    pub preset: Option<Preset>,
    #[serde(default)]
    pub aggregate: DurationAggregate,
    /// Extra `where` predicates, `|`-separated.
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub postfix: Option<String>,
    pub duration: Option<ItemDuration>,
    pub total: Option<ItemTotal>,
    pub min_chart_value: Option<f64>,
    pub disabled_threshold: Option<f64>,
    pub warning_threshold: Option<f64>,
    pub error_threshold: Option<f64>,
    pub status_split_factor: Option<usize>,
    pub format: Option<ValueFormat>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("item '{item}' in group '{group}' has neither a query nor a preset")]
    MissingQuery { group: String, item: String },

    #[error("item '{item}' in group '{group}' uses a custom duration; items need a fixed one")]
    CustomDuration { group: String, item: String },

    #[error("query of item '{item}' has no ago(...) window")]
    MissingWindow { item: String },
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone)]
pub struct DashboardItem {
    pub name: String,
    pub store: String,
    pub query: String,
    pub postfix: String,
    pub duration: ItemDuration,
    pub total: ItemTotal,
    pub min_chart_value: f64,
    pub thresholds: Thresholds,
    pub status_split_factor: usize,
    pub format: ValueFormat,
}

impl DashboardItem {
    fn from_config(group: &str, config: ItemConfig) -> Result<Self, CatalogError> {
        let preset = config
            .preset
            .map(|preset| presets::defaults(preset, config.aggregate));

        let name = config
            .name
            .or_else(|| preset.as_ref().map(|p| p.name.to_string()))
            .unwrap_or_else(|| "Item".to_string());

        let template = match (&config.query, &preset) {
            (Some(query), _) => query.clone(),
            (None, Some(preset)) => preset.query.clone(),
            (None, None) => {
                return Err(CatalogError::MissingQuery {
                    group: group.to_string(),
                    item: name,
                })
            }
        };
        let query = with_extra_filters(&template, config.where_clause.as_deref());
        if PipelineQuery::parse(&query).extract_duration_token().is_err() {
            return Err(CatalogError::MissingWindow { item: name });
        }

        let duration = config
            .duration
            .or(preset.as_ref().map(|p| p.duration))
            .unwrap_or_default();
        if duration == ItemDuration::Custom {
            return Err(CatalogError::CustomDuration {
                group: group.to_string(),
                item: name,
            });
        }

        let base = preset.as_ref();
        let thresholds = base.map(|p| p.thresholds).unwrap_or_default();
        Ok(Self {
            name,
            store: config.store,
            query,
            postfix: config
                .postfix
                .or_else(|| base.map(|p| p.postfix.to_string()))
                .unwrap_or_default(),
            duration,
            total: config
                .total
                .or(base.map(|p| p.total))
                .unwrap_or_default(),
            min_chart_value: config
                .min_chart_value
                .or(base.map(|p| p.min_chart_value))
                .unwrap_or(100.0),
            thresholds: Thresholds {
                disabled: config.disabled_threshold.unwrap_or(thresholds.disabled),
                warning: config.warning_threshold.unwrap_or(thresholds.warning),
                error: config.error_threshold.unwrap_or(thresholds.error),
            },
            status_split_factor: config.status_split_factor.unwrap_or(4),
            format: config
                .format
                .or(base.map(|p| p.format))
                .unwrap_or_default(),
        })
    }
}

/// Insert each `where` stage of `extra` after the template's own filters.
fn with_extra_filters(template: &str, extra: Option<&str>) -> String {
    let Some(extra) = extra.filter(|e| !e.trim().is_empty()) else {
        return template.trim().to_string();
    };
    let fragment = PipelineQuery::parse(&format!("| {}", extra.trim().trim_start_matches('|')));
    fragment
        .stages()
        .iter()
        .fold(PipelineQuery::parse(template), |query, stage| {
            query.insert_filter(stage.text())
        })
        .to_query_string()
}

#[derive(Debug, Clone)]
pub struct DashboardGroup {
    pub name: String,
    pub items: Vec<DashboardItem>,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub id: Uuid,
    pub name: String,
    pub groups: Vec<DashboardGroup>,
}

/// What the dashboard page needs to lay out its tiles.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub items: Vec<ItemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub name: String,
    pub postfix: String,
}

#[derive(Debug, Clone, Default)]
pub struct DashboardCatalog {
    dashboards: Vec<Dashboard>,
}

impl DashboardCatalog {
    pub fn load(configs: Vec<DashboardConfig>) -> Result<Self, CatalogError> {
        let mut dashboards = Vec::with_capacity(configs.len());
        for config in configs {
            let id = config.id.unwrap_or_else(|| {
                let id = Uuid::new_v4();
                tracing::warn!(dashboard = %config.name, %id, "dashboard has no id, assigned one");
                id
            });
            let groups = config
                .groups
                .into_iter()
                .map(|group| {
                    let items = group
                        .items
                        .into_iter()
                        .map(|item| DashboardItem::from_config(&group.name, item))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(DashboardGroup {
                        name: group.name,
                        items,
                    })
                })
                .collect::<Result<Vec<_>, CatalogError>>()?;
            dashboards.push(Dashboard {
                id,
                name: config.name,
                groups,
            });
        }
        Ok(Self { dashboards })
    }

    pub fn len(&self) -> usize {
        self.dashboards.len()
    }

    pub fn dashboards(&self) -> &[Dashboard] {
        &self.dashboards
    }

    pub fn get(&self, id: Uuid) -> Option<&Dashboard> {
        self.dashboards.iter().find(|d| d.id == id)
    }

    pub fn summary(&self, id: Uuid) -> Option<Vec<GroupSummary>> {
        let dashboard = self.get(id)?;
        Some(
            dashboard
                .groups
                .iter()
                .map(|group| GroupSummary {
                    name: group.name.clone(),
                    items: group
                        .items
                        .iter()
                        .map(|item| ItemSummary {
                            name: item.name.clone(),
                            postfix: item.postfix.clone(),
                        })
                        .collect(),
                })
                .collect(),
        )
    }

    /// Group and item addressed by position, as the dashboard page lists them.
    pub fn item(&self, id: Uuid, group: usize, item: usize) -> Option<(&DashboardGroup, &DashboardItem)> {
        let group = self.get(id)?.groups.get(group)?;
        Some((group, group.items.get(item)?))
    }

    /// Every store name referenced by an item.
    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.dashboards
            .iter()
            .flat_map(|d| &d.groups)
            .flat_map(|g| &g.items)
            .map(|i| i.store.as_str())
    }
}
