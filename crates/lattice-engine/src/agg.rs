//! Aggregate-table selection.
//!
//! Decides whether a load can target a pre-materialised aggregate table
//! instead of the fact table. Only the decision is modelled; matching
//! aggregate tables to a schema is an external concern.

use lattice_common::types::BitKey;
use lattice_segment::star::{AggTable, Star};

/// Finds an aggregate table carrying the requested levels and measures.
///
/// Tables are tried smallest first. Without distinct-count measures,
/// any table whose bits are a superset of `level ∪ measure` matches.
/// With distinct-count measures the level bit key must match exactly
/// within the rollable levels, and every foreign key of the table must
/// be claimed by a used distinct measure; otherwise rolling up would
/// double-count.
///
/// Returns the matching table and whether serving the request requires
/// a rollup (the table is finer-grained than the request).
#[must_use]
pub fn find_agg<'a>(
    star: &'a Star,
    level_bit_key: &BitKey,
    measure_bit_key: &BitKey,
) -> Option<(&'a AggTable, bool)> {
    let full_bit_key = level_bit_key.or(measure_bit_key);

    for table in &star.agg_tables {
        if !table.super_set_match(&full_bit_key) {
            continue;
        }

        let is_distinct = measure_bit_key.intersects(&table.distinct_measure_bit_key);
        if !is_distinct {
            let rollup = table.level_bit_key != *level_bit_key;
            return Some((table, rollup));
        }

        // Distinct-count measures: compute the levels every used
        // distinct measure can still roll over.
        let used_distinct = measure_bit_key.and(&table.distinct_measure_bit_key);
        let mut combined_rollable: Option<BitKey> = None;
        for bit in used_distinct.iter() {
            let rollable = table
                .rollable_level_bit_keys
                .get(&bit)
                .cloned()
                .unwrap_or_else(BitKey::empty);
            combined_rollable = Some(match combined_rollable {
                Some(combined) => combined.and(&rollable),
                None => rollable,
            });
        }

        if table.has_foreign_keys() {
            // Every foreign key must be carried by a used distinct
            // measure; any leftover key disqualifies the table.
            let mut leftover = table.foreign_key_bit_key.clone();
            for bit in used_distinct.iter() {
                leftover.clear(bit);
            }
            if !leftover.is_empty() {
                continue;
            }
        }

        // The request's levels must be answerable without rolling a
        // distinct measure over a non-rollable level.
        let rollable = combined_rollable.unwrap_or_else(BitKey::empty);
        let extra_levels = table.level_bit_key.clone();
        let exact = extra_levels == *level_bit_key;
        if !exact {
            let rollup_levels: Vec<usize> = table
                .level_bit_key
                .iter()
                .filter(|bit| !level_bit_key.get(*bit))
                .collect();
            if rollup_levels.iter().any(|bit| !rollable.get(*bit)) {
                continue;
            }
            if !table.level_bit_key.is_superset_of(level_bit_key) {
                continue;
            }
        }

        let rollup = !exact;
        return Some((table, rollup));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_segment::star::StarIdentity;
    use std::collections::HashMap;

    fn table(
        name: &str,
        levels: &[usize],
        measures: &[usize],
        distinct: &[usize],
        foreign: &[usize],
        rows: u64,
    ) -> AggTable {
        AggTable {
            name: name.into(),
            level_bit_key: BitKey::from_positions(levels.iter().copied()),
            measure_bit_key: BitKey::from_positions(measures.iter().copied()),
            distinct_measure_bit_key: BitKey::from_positions(distinct.iter().copied()),
            foreign_key_bit_key: BitKey::from_positions(foreign.iter().copied()),
            rollable_level_bit_keys: HashMap::new(),
            row_count: rows,
        }
    }

    fn star_with(tables: Vec<AggTable>) -> Star {
        let mut star = Star::new(StarIdentity::new("Sales", "abc", "Sales", "sales_fact"));
        star.agg_tables = tables;
        star
    }

    #[test]
    fn test_superset_match_without_distinct() {
        let star = star_with(vec![table("agg_small", &[0, 1], &[8], &[], &[], 100)]);
        let found = find_agg(
            &star,
            &BitKey::from_positions([0]),
            &BitKey::from_positions([8]),
        );
        let (t, rollup) = found.unwrap();
        assert_eq!(t.name, "agg_small");
        assert!(rollup, "finer-grained table requires rollup");

        let exact = find_agg(
            &star,
            &BitKey::from_positions([0, 1]),
            &BitKey::from_positions([8]),
        );
        assert!(!exact.unwrap().1);
    }

    #[test]
    fn test_smallest_table_wins() {
        let star = star_with(vec![
            table("agg_small", &[0], &[8], &[], &[], 10),
            table("agg_big", &[0, 1], &[8], &[], &[], 1000),
        ]);
        let found = find_agg(
            &star,
            &BitKey::from_positions([0]),
            &BitKey::from_positions([8]),
        );
        assert_eq!(found.unwrap().0.name, "agg_small");
    }

    #[test]
    fn test_no_match() {
        let star = star_with(vec![table("agg", &[0], &[8], &[], &[], 10)]);
        assert!(find_agg(
            &star,
            &BitKey::from_positions([2]),
            &BitKey::from_positions([8]),
        )
        .is_none());
    }

    #[test]
    fn test_distinct_requires_exact_levels() {
        // Table carries distinct measure 9 with no rollable levels.
        let star = star_with(vec![table("agg_d", &[0, 1], &[9], &[9], &[], 10)]);
        // Exact level match: usable.
        assert!(find_agg(
            &star,
            &BitKey::from_positions([0, 1]),
            &BitKey::from_positions([9]),
        )
        .is_some());
        // Coarser request would need rollup over level 1: rejected.
        assert!(find_agg(
            &star,
            &BitKey::from_positions([0]),
            &BitKey::from_positions([9]),
        )
        .is_none());
    }

    #[test]
    fn test_distinct_foreign_keys_must_be_claimed() {
        // Foreign key at bit 5 is not a distinct measure of the request.
        let star = star_with(vec![table("agg_fk", &[0], &[9], &[9], &[5], 10)]);
        assert!(find_agg(
            &star,
            &BitKey::from_positions([0]),
            &BitKey::from_positions([9]),
        )
        .is_none());

        // Foreign key claimed by the used distinct measure itself.
        let star = star_with(vec![table("agg_ok", &[0], &[9], &[9], &[9], 10)]);
        assert!(find_agg(
            &star,
            &BitKey::from_positions([0]),
            &BitKey::from_positions([9]),
        )
        .is_some());
    }
}
