use crate::query::descriptor::{CountTarget, GroupBy, Resolution};

/// Table holding one row per processed, enriched view.
pub const PROCESSED_VIEWS_TABLE: &str = "processed_views";

/// Column identifying a visitor for distinct-user counts.
pub const VISITOR_ID_COLUMN: &str = "visitor_id";

/// Sentinel substituted for NULL grouping values.
pub const UNKNOWN_KEY: &str = "UNKNOWN";

/// Key used by the bucketed series when no grouping dimension is requested.
pub const ALL_KEY: &str = "ALL";

/// Format of timestamps exchanged with DuckDB as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The meaning of one positional result column.
///
/// The generator emits a `Vec<ColumnRole>` alongside the SQL text and the
/// materializer destructures rows by walking that same list, so column order
/// is decided in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Quantity,
    GroupKey,
    /// Year (or ISO year) of the bucket.
    YearPart,
    /// Day-of-year, ISO week or month within [`ColumnRole::YearPart`].
    SubPart,
    /// Raw event timestamp, rendered as text.
    EventTime,
}

impl ColumnRole {
    /// Alias used for this column in SELECT, GROUP BY and ORDER BY.
    pub const fn alias(self) -> &'static str {
        match self {
            Self::Quantity => "quantity",
            Self::GroupKey => "group_key",
            Self::YearPart => "year_part",
            Self::SubPart => "sub_part",
            Self::EventTime => "event_time",
        }
    }
}

impl Resolution {
    /// Calendar extraction terms, in select and grouping order.
    pub const fn calendar_terms(self) -> &'static [(ColumnRole, &'static str)] {
        match self {
            Self::AllTime => &[],
            Self::Day => &[
                (ColumnRole::YearPart, "year(timestamp)"),
                (ColumnRole::SubPart, "dayofyear(timestamp)"),
            ],
            Self::Week => &[
                (ColumnRole::YearPart, "isoyear(timestamp)"),
                (ColumnRole::SubPart, "week(timestamp)"),
            ],
            Self::Month => &[
                (ColumnRole::YearPart, "year(timestamp)"),
                (ColumnRole::SubPart, "month(timestamp)"),
            ],
            Self::Year => &[(ColumnRole::YearPart, "year(timestamp)")],
        }
    }
}

impl GroupBy {
    /// Column of `processed_views` backing this dimension.
    pub const fn column(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Country => Some("country"),
            Self::City => Some("city"),
            Self::Region => Some("region"),
            Self::Url => Some("url"),
            Self::Domain => Some("domain"),
            Self::OperatingSystem => Some("operating_system"),
            Self::Device => Some("device"),
            Self::DeviceType => Some("device_type"),
            Self::Browser => Some("browser"),
        }
    }
}

impl CountTarget {
    /// Aggregate expression producing the quantity column.
    pub fn count_expr(self) -> String {
        match self {
            Self::Views => "COUNT(*)".to_string(),
            Self::DistinctUsers => format!("COUNT(DISTINCT {VISITOR_ID_COLUMN})"),
        }
    }
}

/// Grouping-column expression with NULLs folded into [`UNKNOWN_KEY`].
pub fn group_key_expr(column: &str) -> String {
    format!("COALESCE({column}, '{UNKNOWN_KEY}')")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_uses_iso_year() {
        let terms = Resolution::Week.calendar_terms();
        assert_eq!(terms[0], (ColumnRole::YearPart, "isoyear(timestamp)"));
        assert_eq!(terms[1], (ColumnRole::SubPart, "week(timestamp)"));
    }

    #[test]
    fn test_calendar_term_arity() {
        assert!(Resolution::AllTime.calendar_terms().is_empty());
        assert_eq!(Resolution::Day.calendar_terms().len(), 2);
        assert_eq!(Resolution::Month.calendar_terms().len(), 2);
        assert_eq!(Resolution::Year.calendar_terms().len(), 1);
    }

    #[test]
    fn test_every_dimension_has_a_column() {
        for group in [
            GroupBy::Country,
            GroupBy::City,
            GroupBy::Region,
            GroupBy::Url,
            GroupBy::Domain,
            GroupBy::OperatingSystem,
            GroupBy::Device,
            GroupBy::DeviceType,
            GroupBy::Browser,
        ] {
            assert!(group.column().is_some(), "{group} has no column");
        }
        assert!(GroupBy::None.column().is_none());
    }

    #[test]
    fn test_count_expressions() {
        assert_eq!(CountTarget::Views.count_expr(), "COUNT(*)");
        assert_eq!(
            CountTarget::DistinctUsers.count_expr(),
            "COUNT(DISTINCT visitor_id)"
        );
    }

    #[test]
    fn test_group_key_expr() {
        assert_eq!(group_key_expr("city"), "COALESCE(city, 'UNKNOWN')");
    }
}
