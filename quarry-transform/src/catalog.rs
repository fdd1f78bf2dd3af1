//! Transform catalog
//!
//! The closed set of row operations a pipeline may run. Every member is a
//! pure function over borrowed rows returning a new row sequence, paired
//! with a typed parameter struct deserialized from the step's parameter map.

use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use quarry_core::{ParamMap, Row, Scalar};

static NULL: Scalar = Scalar::Null;

/// Members of the transform catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Select,
    FilterEquals,
    RenameColumns,
    ToPercent,
    TopN,
    ShareOfTotal,
    Yoy,
    RollingAvg,
}

impl TransformKind {
    /// Every catalog member, in documentation order.
    pub const ALL: [TransformKind; 8] = [
        Self::Select,
        Self::FilterEquals,
        Self::RenameColumns,
        Self::ToPercent,
        Self::TopN,
        Self::ShareOfTotal,
        Self::Yoy,
        Self::RollingAvg,
    ];

    /// Step name as written in spec files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::FilterEquals => "filter_equals",
            Self::RenameColumns => "rename_columns",
            Self::ToPercent => "to_percent",
            Self::TopN => "top_n",
            Self::ShareOfTotal => "share_of_total",
            Self::Yoy => "yoy",
            Self::RollingAvg => "rolling_avg",
        }
    }

    /// Resolve a step name. Matching is exact.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Names of every catalog member.
    pub fn catalog_names() -> Vec<String> {
        Self::ALL.iter().map(|kind| kind.name().to_string()).collect()
    }

    /// Parse `params` for this transform and apply it to `rows`.
    ///
    /// The error is a human-readable reason; the pipeline attaches the step
    /// name and position.
    pub fn apply(self, rows: &[Row], params: &ParamMap) -> Result<Vec<Row>, String> {
        match self {
            Self::Select => Ok(select(rows, &parse_params(params)?)),
            Self::FilterEquals => filter_equals(rows, &parse_params(params)?),
            Self::RenameColumns => Ok(rename_columns(rows, &parse_params(params)?)),
            Self::ToPercent => Ok(to_percent(rows, &parse_params(params)?)),
            Self::TopN => Ok(top_n(rows, &parse_params(params)?)),
            Self::ShareOfTotal => Ok(share_of_total(rows, &parse_params(params)?)),
            Self::Yoy => Ok(yoy(rows, &parse_params(params)?)),
            Self::RollingAvg => rolling_avg(rows, &parse_params(params)?),
        }
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: &ParamMap) -> Result<T, String> {
    let object: serde_json::Map<String, Value> = params
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())
}

/// Integer coercion shared by count-like parameters: numbers truncate,
/// numeric strings parse.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            })
        }
        _ => None,
    }
}

fn deserialize_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce_int(&value).ok_or_else(|| D::Error::custom(format!("expected an integer, got {value}")))
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a Scalar {
    row.get(column).unwrap_or(&NULL)
}

fn compare_by(a: &Row, b: &Row, keys: &[String]) -> Ordering {
    keys.iter()
        .map(|key| cell(a, key).total_cmp(cell(b, key)))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Grouping token of a cell. Numbers are keyed by value so `Int(1)` and
/// `Float(1.0)` share a group, matching `Scalar::loosely_equals`.
fn group_token(value: &Scalar) -> String {
    match value {
        Scalar::Int(v) => format!("n:{v}"),
        Scalar::Float(v) if v.fract() == 0.0 && v.abs() < 9.2e18 => format!("n:{}", *v as i64),
        Scalar::Float(v) => format!("n:{v}"),
        other => format!("{other:?}"),
    }
}

fn group_key(row: &Row, keys: &[String]) -> Vec<String> {
    keys.iter().map(|key| group_token(cell(row, key))).collect()
}

// =============================================================================
// ROW SHAPING
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectParams {
    pub columns: Vec<String>,
}

/// Project the listed columns. Missing columns are filled with null.
pub fn select(rows: &[Row], params: &SelectParams) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            params
                .columns
                .iter()
                .map(|column| (column.clone(), cell(row, column).clone()))
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterEqualsParams {
    #[serde(rename = "where")]
    pub conditions: BTreeMap<String, Value>,
}

/// Keep rows matching every condition. A row without a filtered column
/// does not match.
pub fn filter_equals(rows: &[Row], params: &FilterEqualsParams) -> Result<Vec<Row>, String> {
    let conditions = params
        .conditions
        .iter()
        .map(|(column, value)| {
            Scalar::from_json(value)
                .map(|scalar| (column.as_str(), scalar))
                .ok_or_else(|| format!("condition for '{column}' must be a scalar value"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .iter()
        .filter(|row| {
            conditions.iter().all(|(column, expected)| {
                row.get(*column)
                    .is_some_and(|actual| actual.loosely_equals(expected))
            })
        })
        .cloned()
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameColumnsParams {
    pub mapping: BTreeMap<String, String>,
}

/// Rename mapped columns; unmapped columns pass through. When a renamed
/// column collides with an existing one the renamed value wins.
pub fn rename_columns(rows: &[Row], params: &RenameColumnsParams) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut renamed = Row::new();
            for (column, value) in row {
                if !params.mapping.contains_key(column) {
                    renamed.insert(column.clone(), value.clone());
                }
            }
            for (from, to) in &params.mapping {
                if let Some(value) = row.get(from) {
                    renamed.insert(to.clone(), value.clone());
                }
            }
            renamed
        })
        .collect()
}

fn default_scale() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToPercentParams {
    pub columns: Vec<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

/// Multiply numeric cells of the listed columns by `scale`. Anything
/// non-numeric is left as it is.
pub fn to_percent(rows: &[Row], params: &ToPercentParams) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut scaled = row.clone();
            for column in &params.columns {
                if let Some(value) = scaled.get_mut(column) {
                    if let Some(number) = value.as_f64() {
                        *value = Scalar::finite_float(number * params.scale);
                    }
                }
            }
            scaled
        })
        .collect()
}

// =============================================================================
// RANKING AND SHARES
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopNParams {
    pub sort_key: String,
    #[serde(deserialize_with = "deserialize_int")]
    pub n: i64,
    /// `None` sorts descending.
    #[serde(default)]
    pub descending: Option<bool>,
}

/// Sort by `sort_key` and keep the first `n` rows. Negative `n` keeps
/// nothing. Nulls sort last in either direction and ties keep input order.
pub fn top_n(rows: &[Row], params: &TopNParams) -> Vec<Row> {
    let keep = usize::try_from(params.n.max(0)).unwrap_or(usize::MAX);
    if keep == 0 {
        return Vec::new();
    }
    let descending = params.descending.unwrap_or(true);

    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| {
        let (x, y) = (cell(a, &params.sort_key), cell(b, &params.sort_key));
        match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if descending => y.total_cmp(x),
            (false, false) => x.total_cmp(y),
        }
    });
    sorted.truncate(keep);
    sorted
}

fn default_share_key() -> String {
    "share".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareOfTotalParams {
    #[serde(default)]
    pub group_keys: Vec<String>,
    pub value_key: String,
    #[serde(default = "default_share_key")]
    pub out_key: String,
}

/// Percentage share of `value_key` within each group. Non-numeric values
/// count as zero; a zero-sum group yields 0.0 for every member.
pub fn share_of_total(rows: &[Row], params: &ShareOfTotalParams) -> Vec<Row> {
    let mut totals: BTreeMap<Vec<String>, f64> = BTreeMap::new();
    for row in rows {
        let value = cell(row, &params.value_key).as_f64().unwrap_or(0.0);
        *totals.entry(group_key(row, &params.group_keys)).or_insert(0.0) += value;
    }

    rows.iter()
        .map(|row| {
            let total = totals
                .get(&group_key(row, &params.group_keys))
                .copied()
                .unwrap_or(0.0);
            let value = cell(row, &params.value_key).as_f64().unwrap_or(0.0);
            let share = if total == 0.0 { 0.0 } else { value * 100.0 / total };
            let mut out = row.clone();
            out.insert(params.out_key.clone(), Scalar::finite_float(share));
            out
        })
        .collect()
}

// =============================================================================
// SERIES
// =============================================================================

/// Sort rows into series order: grouped by `group_keys`, then ordered by
/// `sort_keys` within each group.
fn series_order(rows: &[Row], group_keys: &[String], sort_keys: &[String]) -> Vec<Row> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| {
        compare_by(a, b, group_keys).then_with(|| compare_by(a, b, sort_keys))
    });
    sorted
}

fn default_yoy_key() -> String {
    "yoy_pct".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YoyParams {
    pub key: String,
    pub sort_keys: Vec<String>,
    #[serde(default = "default_yoy_key")]
    pub out_key: String,
    #[serde(default)]
    pub group_keys: Vec<String>,
}

/// Percent change of `key` against the previous row of the same series.
/// The first row of a series, and any row whose prior value is null, zero
/// or non-numeric, gets null.
pub fn yoy(rows: &[Row], params: &YoyParams) -> Vec<Row> {
    let sorted = series_order(rows, &params.group_keys, &params.sort_keys);
    let mut out = Vec::with_capacity(sorted.len());
    let mut previous: Option<(Vec<String>, Option<f64>)> = None;

    for row in sorted {
        let group = group_key(&row, &params.group_keys);
        let current = cell(&row, &params.key).as_f64();
        let change = match &previous {
            Some((prev_group, Some(prior))) if *prev_group == group && *prior != 0.0 => {
                current.map(|value| (value - *prior) * 100.0 / *prior)
            }
            _ => None,
        };
        let mut next = row;
        next.insert(
            params.out_key.clone(),
            change.map_or(Scalar::Null, Scalar::finite_float),
        );
        out.push(next);
        previous = Some((group, current));
    }
    out
}

fn default_rolling_key() -> String {
    "rolling_avg".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollingAvgParams {
    pub key: String,
    pub sort_keys: Vec<String>,
    #[serde(deserialize_with = "deserialize_int")]
    pub window: i64,
    #[serde(default = "default_rolling_key")]
    pub out_key: String,
    #[serde(default)]
    pub group_keys: Vec<String>,
}

/// Trailing mean of `key` over `window` rows of the same series. Rows
/// before the window fills, and windows holding a non-numeric value, get
/// null.
pub fn rolling_avg(rows: &[Row], params: &RollingAvgParams) -> Result<Vec<Row>, String> {
    let window = usize::try_from(params.window)
        .ok()
        .filter(|w| *w >= 1)
        .ok_or_else(|| format!("window must be at least 1, got {}", params.window))?;

    let sorted = series_order(rows, &params.group_keys, &params.sort_keys);
    let mut out = Vec::with_capacity(sorted.len());
    let mut current_group: Option<Vec<String>> = None;
    let mut values: Vec<Option<f64>> = Vec::new();

    for row in sorted {
        let group = group_key(&row, &params.group_keys);
        if current_group.as_ref() != Some(&group) {
            values.clear();
            current_group = Some(group);
        }
        values.push(cell(&row, &params.key).as_f64());

        let average = if values.len() < window {
            None
        } else {
            values[values.len() - window..]
                .iter()
                .copied()
                .sum::<Option<f64>>()
                .map(|sum| sum / window as f64)
        };
        let mut next = row;
        next.insert(
            params.out_key.clone(),
            average.map_or(Scalar::Null, Scalar::finite_float),
        );
        out.push(next);
    }
    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================
