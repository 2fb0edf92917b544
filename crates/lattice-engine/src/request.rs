//! Cell requests and aggregation keys.
//!
//! A cell request is the demand for a single measure value at one
//! coordinate. Requests sharing an aggregation key - star, constrained
//! columns, compound predicates - land in the same batch and resolve to
//! one SQL query.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_common::types::{BitKey, DataValue};
use lattice_segment::star::{Measure, Star, StarColumn, StarIdentity};
use lattice_segment::StarPredicate;

/// Demand for one measure value at one coordinate.
#[derive(Debug, Clone)]
pub struct CellRequest {
    star: Arc<Star>,
    measure: Measure,
    columns: Vec<StarColumn>,
    values: Vec<DataValue>,
    bit_key: BitKey,
    compound_predicates: Vec<StarPredicate>,
    unsatisfiable: bool,
}

impl CellRequest {
    /// Creates a request from `(column name, value)` coordinates.
    /// Coordinates are stored in ascending bit order regardless of
    /// argument order. Returns an unsatisfiable request if a column
    /// name is unknown.
    #[must_use]
    pub fn new(
        star: Arc<Star>,
        measure: Measure,
        coordinates: Vec<(String, DataValue)>,
        compound_predicates: Vec<StarPredicate>,
    ) -> Self {
        let mut pairs: Vec<(StarColumn, DataValue)> = Vec::with_capacity(coordinates.len());
        let mut unsatisfiable = false;
        for (name, value) in coordinates {
            match star.column_by_name(&name) {
                Some(column) => pairs.push((column.clone(), value)),
                None => unsatisfiable = true,
            }
        }
        pairs.sort_by_key(|(column, _)| column.bit_position);

        let mut bit_key = BitKey::empty();
        for (column, _) in &pairs {
            bit_key.set(column.bit_position);
        }
        let (columns, values) = pairs.into_iter().unzip();
        Self {
            star,
            measure,
            columns,
            values,
            bit_key,
            compound_predicates,
            unsatisfiable,
        }
    }

    /// Marks the request unsatisfiable (e.g. an empty slicer).
    #[must_use]
    pub fn unsatisfiable(mut self) -> Self {
        self.unsatisfiable = true;
        self
    }

    /// Returns whether the request can never produce a value.
    #[must_use]
    pub fn is_unsatisfiable(&self) -> bool {
        self.unsatisfiable
    }

    /// Returns the star.
    #[must_use]
    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    /// Returns the measure.
    #[must_use]
    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    /// Returns the constrained columns in ascending bit order.
    #[must_use]
    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    /// Returns the coordinate values, parallel to `columns`.
    #[must_use]
    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    /// Returns the constrained-columns bit key.
    #[must_use]
    pub fn bit_key(&self) -> &BitKey {
        &self.bit_key
    }

    /// Returns the compound predicates.
    #[must_use]
    pub fn compound_predicates(&self) -> &[StarPredicate] {
        &self.compound_predicates
    }

    /// Returns the coordinate as a map keyed by bit position.
    #[must_use]
    pub fn value_map(&self) -> HashMap<usize, DataValue> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(column, value)| (column.bit_position, value.clone()))
            .collect()
    }

    /// Returns the identity of this request's batch bucket.
    #[must_use]
    pub fn aggregation_key(&self) -> AggregationKey {
        AggregationKey {
            star: self.star.identity.clone(),
            bit_key: self.bit_key.clone(),
            compound_predicates: self.compound_predicates.clone(),
        }
    }
}

/// Identity of a batch bucket. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    /// Star identity.
    pub star: StarIdentity,
    /// Constrained-columns bit key.
    pub bit_key: BitKey,
    /// Compound predicates, in request order.
    pub compound_predicates: Vec<StarPredicate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_segment::star::Aggregator;

    fn sample_star() -> Arc<Star> {
        let mut star = Star::new(StarIdentity::new("Sales", "abc", "Sales", "sales_fact"));
        star.columns.push(StarColumn::new("year", 0, 2));
        star.columns.push(StarColumn::new("state", 1, 3));
        star.measures.push(Measure::new(
            "Unit Sales",
            8,
            Aggregator::Sum,
            "unit_sales",
        ));
        Arc::new(star)
    }

    fn request(year: i64, state: &str) -> CellRequest {
        let star = sample_star();
        let measure = star.measures[0].clone();
        CellRequest::new(
            star,
            measure,
            vec![
                // Deliberately out of bit order.
                ("state".to_string(), DataValue::from(state)),
                ("year".to_string(), DataValue::from(year)),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_coordinates_sorted_by_bit() {
        let r = request(1997, "CA");
        assert_eq!(r.columns()[0].name, "year");
        assert_eq!(r.columns()[1].name, "state");
        assert_eq!(r.values()[0], DataValue::from(1997));
        assert_eq!(r.bit_key(), &BitKey::from_positions([0, 1]));
    }

    #[test]
    fn test_same_key_for_same_shape() {
        let a = request(1997, "CA");
        let b = request(1998, "WA");
        assert_eq!(a.aggregation_key(), b.aggregation_key());
    }

    #[test]
    fn test_unknown_column_is_unsatisfiable() {
        let star = sample_star();
        let measure = star.measures[0].clone();
        let r = CellRequest::new(
            star,
            measure,
            vec![("city".to_string(), DataValue::from("Seattle"))],
            Vec::new(),
        );
        assert!(r.is_unsatisfiable());
    }
}
