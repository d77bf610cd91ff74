//! Compiles a [`FilterSpec`] into a sea-query [`Condition`] over the joined
//! `observation`, `time_series` and `geo_point` tables. Every literal ends up
//! as a bound parameter.

use sea_orm::sea_query::{
    Alias, BinOper, Condition, Expr, Func, IntoColumnRef, LikeExpr, SimpleExpr,
};

use crate::db::{GeoPoints, Observations, TimeSeries, obs_col, ts_col};
use obsdb_core::pattern::{
    IntPattern, LIKE_ESCAPE, RangePattern, WildcardPattern, parse_float_range, parse_int_pattern,
};
use obsdb_core::{
    Circle, FieldKind, FilterSpec, GeoPoint, ObsError, ObsResult, QueryableField, TimeInterval,
    ValidWindow,
};

const KM_PER_DEGREE_LAT: f64 = 110.574;
const KM_PER_DEGREE_LON_AT_EQUATOR: f64 = 111.320;

/// SQLite rejects expressions nested deeper than 1000 levels.
pub const MAX_POLYGON_VERTICES: usize = 512;

#[derive(Clone, Copy, Debug)]
pub struct FilterCompiler {
    pub window: ValidWindow,
    pub int_string_fallback: bool,
}

impl FilterCompiler {
    pub fn new(window: ValidWindow, int_string_fallback: bool) -> Self {
        Self {
            window,
            int_string_fallback,
        }
    }

    pub fn compile(&self, spec: &FilterSpec) -> ObsResult<Condition> {
        let mut condition = Condition::all().add(self.temporal(spec.interval.as_ref()));
        if let Some(spatial) = spatial(spec.polygon.as_deref(), spec.circle.as_ref())? {
            condition = condition.add(spatial);
        }
        if let Some(range) = &spec.camsl_range {
            let range = parse_float_range(range)?;
            condition = condition.add(range_expr(
                (Observations::Table, Observations::Camsl),
                range,
            ));
        }
        for (name, patterns) in &spec.metadata {
            let field = QueryableField::lookup(name)?;
            if patterns.is_empty() {
                continue;
            }
            let mut any = Condition::any();
            for pattern in patterns {
                any = any.add(self.pattern(field, pattern)?);
            }
            condition = condition.add(any);
        }
        Ok(condition)
    }

    fn temporal(&self, interval: Option<&TimeInterval>) -> Condition {
        let obstime = (Observations::Table, Observations::Obstime);
        let mut condition = Condition::all()
            .add(Expr::col(obstime).gte(self.window.lo.as_micros()))
            .add(Expr::col(obstime).lte(self.window.hi.as_micros()));
        if let Some(interval) = interval {
            if let Some(start) = interval.start {
                condition = condition.add(Expr::col(obstime).gte(start.as_micros()));
            }
            if let Some(end) = interval.end {
                condition = condition.add(Expr::col(obstime).lt(end.as_micros()));
            }
        }
        condition
    }

    fn pattern(&self, field: QueryableField, pattern: &str) -> ObsResult<SimpleExpr> {
        let column = match field {
            QueryableField::TimeSeries(field) => (TimeSeries::Table, ts_col(field)).into_column_ref(),
            QueryableField::Observation(field) => {
                (Observations::Table, obs_col(field)).into_column_ref()
            }
        };
        match field.kind() {
            FieldKind::Int64 => match parse_int_pattern(pattern, self.int_string_fallback)? {
                IntPattern::Range(range) => Ok(range_expr(column, range)),
                IntPattern::Wildcard(wildcard) => Ok(like_expr(
                    Func::cast_as(Expr::col(column), Alias::new("TEXT")).into(),
                    &wildcard,
                )),
            },
            FieldKind::String => Ok(like_expr(
                Expr::col(column).into(),
                &WildcardPattern::new(pattern),
            )),
            FieldKind::Links => Err(ObsError::unknown_field(
                field.name(),
                QueryableField::sorted_names(),
            )),
        }
    }
}

fn range_expr<T>(column: impl IntoColumnRef, range: RangePattern<T>) -> SimpleExpr
where
    T: Into<sea_orm::Value>,
{
    let column = column.into_column_ref();
    match (range.lo, range.hi) {
        (Some(lo), Some(hi)) => Expr::col(column.clone())
            .gte(lo)
            .and(Expr::col(column).lte(hi)),
        (Some(lo), None) => Expr::col(column).gte(lo),
        (None, Some(hi)) => Expr::col(column).lte(hi),
        // `../..` still contributes a disjunct; every stored value is non-null.
        (None, None) => Expr::col(column).is_not_null(),
    }
}

fn like_expr(text: SimpleExpr, wildcard: &WildcardPattern) -> SimpleExpr {
    Expr::expr(Func::lower(text)).like(LikeExpr::new(wildcard.to_like()).escape(LIKE_ESCAPE))
}

fn spatial(polygon: Option<&[GeoPoint]>, circle: Option<&Circle>) -> ObsResult<Option<SimpleExpr>> {
    match (polygon, circle) {
        (Some(_), Some(_)) => Err(ObsError::invalid(
            "polygon and circle are mutually exclusive",
        )),
        (Some(polygon), None) => polygon_expr(polygon).map(Some),
        (None, Some(circle)) => circle_expr(circle).map(Some),
        (None, None) => Ok(None),
    }
}

fn lon() -> Expr {
    Expr::col((GeoPoints::Table, GeoPoints::Lon))
}

fn lat() -> Expr {
    Expr::col((GeoPoints::Table, GeoPoints::Lat))
}

fn check_point(point: &GeoPoint) -> ObsResult<()> {
    if !point.lon.is_finite() || !point.lat.is_finite() {
        return Err(ObsError::invalid(format!(
            "coordinates must be finite: ({}, {})",
            point.lon, point.lat
        )));
    }
    Ok(())
}

/// Even-odd rule: a point is inside when a ray cast towards +lon crosses an odd
/// number of edges. Horizontal edges never count.
fn polygon_expr(polygon: &[GeoPoint]) -> ObsResult<SimpleExpr> {
    let mut vertices = polygon.to_vec();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return Err(ObsError::invalid(format!(
            "polygon needs at least 3 distinct vertices, got {}",
            vertices.len()
        )));
    }
    if vertices.len() > MAX_POLYGON_VERTICES {
        return Err(ObsError::invalid(format!(
            "polygon has {} vertices, at most {MAX_POLYGON_VERTICES} are supported",
            vertices.len()
        )));
    }
    vertices.iter().try_for_each(check_point)?;

    let mut terms: Vec<SimpleExpr> = Vec::with_capacity(vertices.len());
    for (index, from) in vertices.iter().enumerate() {
        let to = &vertices[(index + 1) % vertices.len()];
        if from.lat == to.lat {
            continue;
        }
        let (low, high) = if from.lat < to.lat {
            (from.lat, to.lat)
        } else {
            (to.lat, from.lat)
        };
        let slope = (to.lon - from.lon) / (to.lat - from.lat);
        let crossing_lon = Expr::val(from.lon).add(Expr::expr(lat().sub(from.lat)).mul(slope));
        let crosses = Condition::all()
            .add(lat().gte(low))
            .add(lat().lt(high))
            .add(lon().lt(crossing_lon));
        terms.push(Expr::case(crosses, Expr::val(1)).finally(Expr::val(0)).into());
    }
    let crossings = balanced_sum(terms)
        .ok_or_else(|| ObsError::invalid("polygon has no extent in latitude"))?;
    Ok(Expr::expr(Expr::expr(crossings).binary(BinOper::Mod, 2)).eq(1))
}

// Pairwise sums keep the nesting logarithmic in the number of terms.
fn balanced_sum(mut terms: Vec<SimpleExpr>) -> Option<SimpleExpr> {
    while terms.len() > 1 {
        let mut paired = Vec::with_capacity(terms.len().div_ceil(2));
        let mut rest = terms.into_iter();
        while let Some(left) = rest.next() {
            paired.push(match rest.next() {
                Some(right) => Expr::expr(left).add(right),
                None => left,
            });
        }
        terms = paired;
    }
    terms.pop()
}

/// Equirectangular approximation around the circle's centre, radius in kilometres.
fn circle_expr(circle: &Circle) -> ObsResult<SimpleExpr> {
    check_point(&circle.center)?;
    if !circle.radius_km.is_finite() || circle.radius_km < 0.0 {
        return Err(ObsError::invalid(format!(
            "circle radius must be a non-negative number of kilometres, got {}",
            circle.radius_km
        )));
    }
    let center = circle.center;
    let km_per_lon = KM_PER_DEGREE_LON_AT_EQUATOR * center.lat.to_radians().cos();
    let dx = Expr::expr(lon().sub(center.lon)).mul(km_per_lon);
    let dy = Expr::expr(lat().sub(center.lat)).mul(KM_PER_DEGREE_LAT);
    let dx2 = Expr::expr(dx.clone()).mul(dx);
    let dy2 = Expr::expr(dy.clone()).mul(dy);
    Ok(Expr::expr(Expr::expr(dx2).add(dy2)).lte(circle.radius_km * circle.radius_km))
}

#[cfg(test)]
mod tests {
    use sea_orm::sea_query::{Query, SqliteQueryBuilder, Value};

    use super::{FilterCompiler, MAX_POLYGON_VERTICES};
    use crate::db::Observations;
    use obsdb_core::{
        Circle, FilterSpec, GeoPoint, ObsError, ObsTime, TimeInterval, ValidWindow,
    };

    fn compiler(fallback: bool) -> FilterCompiler {
        let window = ValidWindow::new(ObsTime(0), ObsTime(1_000)).expect("window");
        FilterCompiler::new(window, fallback)
    }

    fn render(compiler: &FilterCompiler, spec: &FilterSpec) -> (String, Vec<Value>) {
        let condition = compiler.compile(spec).expect("compile");
        let (sql, values) = Query::select()
            .column(Observations::Value)
            .from(Observations::Table)
            .cond_where(condition)
            .to_owned()
            .build(SqliteQueryBuilder);
        (sql, values.0)
    }

    #[test]
    fn temporal_filter_is_half_open_inside_the_window() {
        let spec = FilterSpec {
            interval: Some(TimeInterval {
                start: Some(ObsTime(10)),
                end: Some(ObsTime(20)),
            }),
            ..Default::default()
        };
        let (sql, values) = render(&compiler(true), &spec);
        assert!(sql.contains(r#""observation"."obstime" >= ?"#));
        assert!(sql.contains(r#""observation"."obstime" <= ?"#));
        assert!(sql.contains(r#""observation"."obstime" < ?"#));
        assert_eq!(
            values,
            vec![
                Value::BigInt(Some(0)),
                Value::BigInt(Some(1_000)),
                Value::BigInt(Some(10)),
                Value::BigInt(Some(20)),
            ]
        );
    }

    #[test]
    fn literals_are_bound_not_inlined() {
        let spec = FilterSpec::default().with_patterns("platform", &["x'; DROP TABLE observation; --"]);
        let (sql, values) = render(&compiler(true), &spec);
        assert!(!sql.contains("DROP TABLE"));
        assert!(values.contains(&Value::String(Some(Box::new(
            "x'; drop table observation; --".to_string()
        )))));
    }

    #[test]
    fn patterns_of_a_field_are_alternatives() {
        let spec = FilterSpec::default()
            .with_patterns("platform", &["a*", "b*"])
            .with_patterns("level", &["10/20"]);
        let (sql, _) = render(&compiler(true), &spec);
        assert!(sql.contains(" OR "));
        assert!(sql.contains(r#""time_series"."level" >= ?"#));
        assert!(sql.contains(r#""time_series"."level" <= ?"#));
        assert!(sql.contains("LIKE"));
    }

    #[test]
    fn int_wildcard_requires_fallback() {
        let spec = FilterSpec::default().with_patterns("level", &["1*"]);
        let (sql, _) = render(&compiler(true), &spec);
        assert!(sql.contains("CAST"));
        let err = compiler(false).compile(&spec).expect_err("no fallback");
        assert!(matches!(err, ObsError::InvalidPattern { .. }));
    }

    #[test]
    fn unknown_field_lists_valid_names() {
        let spec = FilterSpec::default().with_patterns("colour", &["red"]);
        match compiler(true).compile(&spec).expect_err("unknown") {
            ObsError::UnknownField { name, available } => {
                assert_eq!(name, "colour");
                assert!(available.contains(&"parameter_name".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn polygon_and_circle_are_exclusive() {
        let spec = FilterSpec {
            polygon: Some(vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(1.0, 0.0),
                GeoPoint::new(0.0, 1.0),
            ]),
            circle: Some(Circle {
                center: GeoPoint::new(0.0, 0.0),
                radius_km: 1.0,
            }),
            ..Default::default()
        };
        let err = compiler(true).compile(&spec).expect_err("exclusive");
        assert!(matches!(err, ObsError::InvalidArgument { .. }));
    }

    #[test]
    fn degenerate_polygon_is_rejected() {
        let spec = FilterSpec {
            polygon: Some(vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)]),
            ..Default::default()
        };
        assert!(compiler(true).compile(&spec).is_err());
    }

    fn ring(vertices: usize) -> Vec<GeoPoint> {
        (0..vertices)
            .map(|index| {
                let angle = index as f64 / vertices as f64 * std::f64::consts::TAU;
                GeoPoint::new(angle.cos(), angle.sin())
            })
            .collect()
    }

    #[test]
    fn polygon_terms_are_bound_per_edge() {
        let spec = FilterSpec {
            polygon: Some(ring(MAX_POLYGON_VERTICES)),
            ..Default::default()
        };
        let (sql, values) = render(&compiler(true), &spec);
        assert_eq!(sql.matches("CASE").count(), MAX_POLYGON_VERTICES);
        assert!(values.len() > MAX_POLYGON_VERTICES);
    }

    #[test]
    fn oversized_polygon_is_rejected() {
        let spec = FilterSpec {
            polygon: Some(ring(MAX_POLYGON_VERTICES + 1)),
            ..Default::default()
        };
        let err = compiler(true).compile(&spec).expect_err("too many vertices");
        assert!(matches!(err, ObsError::InvalidArgument { .. }));
    }

    #[test]
    fn camsl_range_has_no_wildcard_fallback() {
        let spec = FilterSpec {
            camsl_range: Some("0/100".to_string()),
            ..Default::default()
        };
        let (sql, _) = render(&compiler(true), &spec);
        assert!(sql.contains(r#""observation"."camsl" >= ?"#));
        let spec = FilterSpec {
            camsl_range: Some("1*".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            compiler(true).compile(&spec).expect_err("pattern"),
            ObsError::InvalidPattern { .. }
        ));
    }
}
