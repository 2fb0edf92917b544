//! The segment index: in-process lookup of segment headers.
//!
//! Headers are bucketed by `(star identity, constrained-columns bit
//! key)`. `locate` returns every header that can serve a request,
//! smallest slice first, so the cheapest candidate body is fetched
//! first. All mutations serialise through the cache manager's command
//! thread.

use std::collections::HashMap;

use lattice_common::types::{BitKey, DataValue};
use lattice_segment::star::StarIdentity;
use lattice_segment::{SegmentHeader, StarPredicate};

/// In-process index of known segment headers.
#[derive(Debug, Default)]
pub struct SegmentIndex {
    buckets: HashMap<(StarIdentity, BitKey), Vec<SegmentHeader>>,
    len: usize,
}

impl SegmentIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a header. Re-registering is a no-op.
    pub fn register(&mut self, header: SegmentHeader) {
        let bucket = self
            .buckets
            .entry((header.star.clone(), header.constrained_bit_key.clone()))
            .or_default();
        if !bucket.contains(&header) {
            bucket.push(header);
            self.len += 1;
        }
    }

    /// Unregisters a header. Returns whether it was present.
    pub fn unregister(&mut self, header: &SegmentHeader) -> bool {
        let key = (header.star.clone(), header.constrained_bit_key.clone());
        if let Some(bucket) = self.buckets.get_mut(&key) {
            let before = bucket.len();
            bucket.retain(|h| h != header);
            let removed = before - bucket.len();
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
            self.len -= removed;
            removed > 0
        } else {
            false
        }
    }

    /// Returns whether the header is registered.
    #[must_use]
    pub fn contains(&self, header: &SegmentHeader) -> bool {
        self.buckets
            .get(&(header.star.clone(), header.constrained_bit_key.clone()))
            .is_some_and(|bucket| bucket.contains(header))
    }

    /// Number of registered headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index holds no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Locates every header able to serve a cell request.
    ///
    /// A header qualifies when its star identity, measure, and bit key
    /// match, each of its axis predicates accepts the requested value
    /// on its column, no excluded region shadows the coordinate, and
    /// its compound predicates express the same constraint as the
    /// request's. Results are ordered deterministically, smallest
    /// predicate domain first.
    #[must_use]
    pub fn locate(
        &self,
        star: &StarIdentity,
        measure_name: &str,
        bit_key: &BitKey,
        values: &HashMap<usize, DataValue>,
        compound_predicates: &[StarPredicate],
    ) -> Vec<SegmentHeader> {
        let Some(bucket) = self.buckets.get(&(star.clone(), bit_key.clone())) else {
            return Vec::new();
        };
        let mut matches: Vec<SegmentHeader> = bucket
            .iter()
            .filter(|header| {
                header.measure_name == measure_name
                    && StarPredicate::lists_equal(&header.compound_predicates, compound_predicates)
                    && header.can_constrain(values)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|header| (header.arity(), header.domain_weight()));
        matches
    }

    /// Iterates over every registered header of the given star, in
    /// unspecified order. Used by flush.
    pub fn headers_for_star<'a>(
        &'a self,
        star: &'a StarIdentity,
    ) -> impl Iterator<Item = &'a SegmentHeader> + 'a {
        self.buckets
            .iter()
            .filter(move |((identity, _), _)| identity == star)
            .flat_map(|(_, bucket)| bucket.iter())
    }

    /// Iterates over every registered header.
    pub fn all_headers(&self) -> impl Iterator<Item = &SegmentHeader> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_segment::header::ConstrainedColumn;
    use lattice_segment::predicate::ColumnPredicate;
    use lattice_segment::region::ExcludedRegion;

    fn star() -> StarIdentity {
        StarIdentity::new("Sales", "abc", "Sales", "sales_fact")
    }

    fn header_with_years(years: &[i64]) -> SegmentHeader {
        SegmentHeader::new(
            star(),
            "Unit Sales",
            BitKey::from_positions([0]),
            vec![ConstrainedColumn {
                name: "year".into(),
                bit_position: 0,
                predicate: ColumnPredicate::from_values(
                    years.iter().map(|y| DataValue::from(*y)),
                ),
            }],
            Vec::new(),
            Vec::new(),
        )
    }

    fn values_1997() -> HashMap<usize, DataValue> {
        let mut values = HashMap::new();
        values.insert(0, DataValue::from(1997));
        values
    }

    #[test]
    fn test_register_locate_unregister() {
        let mut index = SegmentIndex::new();
        let header = header_with_years(&[1997, 1998]);
        index.register(header.clone());
        index.register(header.clone()); // idempotent
        assert_eq!(index.len(), 1);

        let located = index.locate(
            &star(),
            "Unit Sales",
            &BitKey::from_positions([0]),
            &values_1997(),
            &[],
        );
        assert_eq!(located, vec![header.clone()]);

        assert!(index.unregister(&header));
        assert!(!index.unregister(&header));
        assert!(index.is_empty());
    }

    #[test]
    fn test_locate_filters_by_value() {
        let mut index = SegmentIndex::new();
        index.register(header_with_years(&[1998, 1999]));
        let located = index.locate(
            &star(),
            "Unit Sales",
            &BitKey::from_positions([0]),
            &values_1997(),
            &[],
        );
        assert!(located.is_empty());
    }

    #[test]
    fn test_locate_smallest_slice_first() {
        let mut index = SegmentIndex::new();
        let wide = header_with_years(&[1996, 1997, 1998, 1999]);
        let narrow = header_with_years(&[1997]);
        index.register(wide.clone());
        index.register(narrow.clone());

        let located = index.locate(
            &star(),
            "Unit Sales",
            &BitKey::from_positions([0]),
            &values_1997(),
            &[],
        );
        assert_eq!(located, vec![narrow, wide]);
    }

    #[test]
    fn test_locate_respects_excluded_regions() {
        let mut index = SegmentIndex::new();
        let mut header = header_with_years(&[1997, 1998]);
        header.excluded_regions.push(ExcludedRegion::new(
            vec![(0, ColumnPredicate::Value(DataValue::from(1997)))],
            Vec::new(),
            1.0,
        ));
        index.register(header);

        assert!(index
            .locate(
                &star(),
                "Unit Sales",
                &BitKey::from_positions([0]),
                &values_1997(),
                &[]
            )
            .is_empty());
    }

    #[test]
    fn test_locate_requires_equivalent_compound_predicates() {
        let mut index = SegmentIndex::new();
        let mut header = header_with_years(&[1997]);
        header.compound_predicates.push(StarPredicate::column(
            1,
            "quarter",
            ColumnPredicate::Value(DataValue::from("Q1")),
        ));
        index.register(header.clone());

        // Request without the compound predicate does not match.
        assert!(index
            .locate(
                &star(),
                "Unit Sales",
                &BitKey::from_positions([0]),
                &values_1997(),
                &[]
            )
            .is_empty());
        // Request with an equivalent compound predicate matches.
        let request_pred = StarPredicate::column(
            1,
            "quarter",
            ColumnPredicate::Value(DataValue::from("Q1")),
        );
        assert_eq!(
            index.locate(
                &star(),
                "Unit Sales",
                &BitKey::from_positions([0]),
                &values_1997(),
                std::slice::from_ref(&request_pred),
            ),
            vec![header]
        );
    }
}
