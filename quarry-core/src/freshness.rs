//! Freshness verification
//!
//! Determines how old a result's data is and compares that age against the
//! spec's freshness SLA. Data-quality problems (no usable as-of signal, SLA
//! overage) become warnings on the result. Only a malformed SLA declaration
//! is an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::FreshnessError;
use crate::result::QueryResult;
use crate::scalar::Scalar;
use crate::spec::QueryConstraints;

/// Warning tag for a result whose as-of signal cannot be resolved.
pub const FRESHNESS_PARSE_ERROR: &str = "freshness_parse_error";
/// Warning tag for a result older than its SLA allows.
pub const FRESHNESS_SLA_VIOLATION: &str = "freshness_sla_violation";

/// Row column consulted for an explicit as-of value.
pub const AS_OF_COLUMN: &str = "as_of";
/// Row column consulted for year inference.
pub const YEAR_COLUMN: &str = "year";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Where the as-of instant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsOfSource {
    /// Explicit ISO date or timestamp.
    Explicit,
    /// Last instant of the newest year found in the rows.
    InferredYear,
}

/// Resolved as-of instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsOf {
    pub instant: DateTime<Utc>,
    pub source: AsOfSource,
}

/// Resolve the as-of instant of a result.
///
/// Priority: the declared as-of value, then an `as_of` column, then the
/// largest `year` in the rows taken as Dec 31 23:59:59 UTC. An explicit value
/// that does not parse falls through to year inference.
pub fn resolve_as_of(result: &QueryResult) -> Option<AsOf> {
    let explicit = result
        .freshness
        .declared_as_of
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| {
            result
                .rows
                .iter()
                .filter_map(|row| row.get(AS_OF_COLUMN))
                .filter_map(Scalar::as_str)
                .filter_map(parse_timestamp)
                .max()
        });
    if let Some(instant) = explicit {
        return Some(AsOf {
            instant,
            source: AsOfSource::Explicit,
        });
    }

    infer_year(result).map(|instant| AsOf {
        instant,
        source: AsOfSource::InferredYear,
    })
}

/// Run the verifier over `result`, recording as-of metadata and appending
/// any freshness warning.
///
/// `now` is the evaluation instant; production callers pass `Utc::now()`.
pub fn verify_freshness(
    result: &mut QueryResult,
    constraints: &QueryConstraints,
    now: DateTime<Utc>,
) -> Result<(), FreshnessError> {
    let sla_days = constraints.sla_days()?;
    let resolved = resolve_as_of(result);

    if let Some(as_of) = resolved {
        let age_secs = (now - as_of.instant).num_seconds();
        result.freshness.as_of = Some(as_of.instant.date_naive());
        result.freshness.age_days = Some(age_secs.div_euclid(SECONDS_PER_DAY as i64));
    }

    let Some(sla_days) = sla_days else {
        return Ok(());
    };

    let Some(as_of) = resolved else {
        let declared = result
            .freshness
            .declared_as_of
            .clone()
            .unwrap_or_else(|| "none".to_string());
        tracing::warn!(
            query_id = %result.query_id,
            declared_as_of = %declared,
            "could not resolve as-of signal"
        );
        let warning = format!(
            "{FRESHNESS_PARSE_ERROR}: query '{}' has no parseable as-of signal (declared: {declared})",
            result.query_id
        );
        result.push_warning(warning);
        return Ok(());
    };

    let age_days = (now - as_of.instant).num_seconds() as f64 / SECONDS_PER_DAY;
    if age_days > sla_days {
        let overage = age_days - sla_days;
        tracing::warn!(
            query_id = %result.query_id,
            age_days,
            sla_days,
            "freshness SLA violated"
        );
        let warning = format!(
            "{FRESHNESS_SLA_VIOLATION}: query '{}' data as of {} is {:.1} days old, exceeding the {} day SLA by {:.1} days",
            result.query_id,
            as_of.instant.date_naive(),
            age_days,
            sla_days,
            overage
        );
        result.push_warning(warning);
    }
    Ok(())
}

/// Parse an ISO date or timestamp. Accepts a trailing `Z` or offset, a `T`
/// or space separator and fractional seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
        .unwrap_or(trimmed);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(Utc.from_utc_datetime(&parsed));
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
}

fn infer_year(result: &QueryResult) -> Option<DateTime<Utc>> {
    let year = result
        .rows
        .iter()
        .filter_map(|row| row.get(YEAR_COLUMN))
        .filter_map(year_value)
        .max()?;
    let last_day = NaiveDate::from_ymd_opt(year, 12, 31)?;
    let last_second = NaiveTime::from_hms_opt(23, 59, 59)?;
    Some(Utc.from_utc_datetime(&last_day.and_time(last_second)))
}

fn year_value(value: &Scalar) -> Option<i32> {
    let year = value.coerce_i64()?;
    i32::try_from(year).ok().filter(|y| (1..=9999).contains(y))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Provenance;
    use crate::scalar::row;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).single().expect("valid date")
    }

    fn constraints(sla: serde_json::Value) -> QueryConstraints {
        QueryConstraints {
            freshness_sla_days: Some(sla),
        }
    }

    fn result_with_rows(rows: Vec<crate::scalar::Row>) -> QueryResult {
        let mut result = QueryResult::new("q_demo", Provenance::default());
        result.rows = rows;
        result
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).single();
        assert_eq!(parse_timestamp("2024-01-15"), expected);
        assert_eq!(parse_timestamp("2024-01-15T00:00:00Z"), expected);
        assert_eq!(parse_timestamp("2024-01-15T00:00:00"), expected);
        assert_eq!(parse_timestamp("2024-01-15 00:00:00"), expected);
        assert_eq!(parse_timestamp("2024-01-15T02:00:00+02:00"), expected);
        assert!(parse_timestamp("2024-01-15T00:00:00.250Z").is_some());
        assert!(parse_timestamp("last tuesday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_no_sla_means_no_warning() {
        let mut result = result_with_rows(vec![]);
        result.freshness.declared_as_of = Some("garbage".to_string());
        verify_freshness(&mut result, &QueryConstraints::default(), now())
            .expect("no sla is fine");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unparsable_signal_yields_single_parse_warning() {
        let mut result = result_with_rows(vec![row([("value", Scalar::Int(1))])]);
        result.freshness.declared_as_of = Some("around easter".to_string());

        verify_freshness(&mut result, &constraints(json!(30)), now()).expect("valid sla");

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with(FRESHNESS_PARSE_ERROR));
        assert!(!result.warnings.iter().any(|w| w.starts_with(FRESHNESS_SLA_VIOLATION)));
        assert_eq!(result.freshness.as_of, None);
    }

    #[test]
    fn test_year_inference_uses_last_instant() {
        let mut result = result_with_rows(vec![
            row([("year", Scalar::Int(2022))]),
            row([("year", Scalar::from("2023"))]),
        ]);

        verify_freshness(&mut result, &constraints(json!(365)), now()).expect("valid sla");

        assert_eq!(result.freshness.as_of, NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(result.freshness.age_days, Some(181));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_sla_violation_names_query_and_overage() {
        let mut result = result_with_rows(vec![]);
        result.freshness.declared_as_of = Some("2024-05-31T12:00:00Z".to_string());

        verify_freshness(&mut result, &constraints(json!(10)), now()).expect("valid sla");

        assert_eq!(result.freshness.age_days, Some(30));
        assert_eq!(result.warnings.len(), 1);
        let warning = &result.warnings[0];
        assert!(warning.starts_with(FRESHNESS_SLA_VIOLATION));
        assert!(warning.contains("q_demo"));
        assert!(warning.contains("by 20.0 days"));
    }

    #[test]
    fn test_unparsable_explicit_falls_back_to_year() {
        let mut result = result_with_rows(vec![row([("year", Scalar::Int(2024))])]);
        result.freshness.declared_as_of = Some("Q2".to_string());

        verify_freshness(&mut result, &constraints(json!(400)), now()).expect("valid sla");

        assert!(result.warnings.is_empty());
        assert_eq!(resolve_as_of(&result).map(|a| a.source), Some(AsOfSource::InferredYear));
    }

    #[test]
    fn test_as_of_column_is_explicit_signal() {
        let result = result_with_rows(vec![
            row([("as_of", Scalar::from("2024-03-01"))]),
            row([("as_of", Scalar::from("2024-04-01"))]),
            row([("year", Scalar::Int(1999))]),
        ]);
        let resolved = resolve_as_of(&result).expect("as_of column should resolve");
        assert_eq!(resolved.source, AsOfSource::Explicit);
        assert_eq!(resolved.instant.date_naive(), NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"));
    }

    #[test]
    fn test_invalid_sla_is_error() {
        let mut result = result_with_rows(vec![row([("year", Scalar::Int(2024))])]);
        let err = verify_freshness(&mut result, &constraints(json!(-3)), now())
            .expect_err("negative sla must fail");
        assert!(err.to_string().starts_with("freshness_invalid_sla"));

        let err = verify_freshness(&mut result, &constraints(json!({"days": 3})), now());
        assert!(err.is_err());
    }
}
