//! Predicate optimisation: bloat-based constraint elimination.
//!
//! An IN-list enumerating most of a column's domain bloats the SQL
//! without narrowing the result much. Before SQL generation each
//! constrained column gets a bloat ratio - constrained value count over
//! the column's effective domain - and constraints are dropped, worst
//! first, while the product of surviving ratios stays above the limit.
//! Over-long lists are dropped unconditionally, so `IN` clauses never
//! exceed what the database accepts.

use tracing::debug;

use lattice_common::config::EngineConfig;
use lattice_segment::star::{Star, StarColumn};
use lattice_segment::{ColumnPredicate, MemberPredicate};

/// Returns the per-column constraints to use in SQL, with bloated
/// constraints replaced by `TRUE`.
#[must_use]
pub fn optimize_predicates(
    star: &Star,
    columns: &[StarColumn],
    predicates: &[ColumnPredicate],
    config: &EngineConfig,
) -> Vec<ColumnPredicate> {
    debug_assert_eq!(columns.len(), predicates.len());
    let mut optimized = predicates.to_vec();

    // Parents that appear as single-member constraints elsewhere in the
    // request: the drill-down shape, where the parent and its children
    // are both constrained.
    let potential_parents: Vec<String> = predicates
        .iter()
        .filter_map(|p| match p {
            ColumnPredicate::Member(m) => Some(m.value.to_string()),
            _ => None,
        })
        .collect();

    let bloats: Vec<f64> = columns
        .iter()
        .zip(predicates.iter())
        .map(|(column, predicate)| bloat(star, column, predicate, &potential_parents, config))
        .collect();

    // Drop constraints worst-first until the surviving product of
    // ratios is selective enough.
    let mut indexes: Vec<usize> = (0..columns.len()).collect();
    indexes.sort_by(|&a, &b| {
        bloats[b]
            .partial_cmp(&bloats[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut running = 1.0f64;
    for index in indexes {
        running *= bloats[index];
        if running <= config.bloat_limit {
            break;
        }
        // Over-long IN lists (bloat forced to 1.0) are dropped even
        // when optimisation is off.
        if config.optimize_predicates || bloats[index] == 1.0 {
            debug!(
                column = %columns[index].name,
                bloat = bloats[index],
                "replacing constraint with TRUE"
            );
            optimized[index] = ColumnPredicate::True;
        }
    }
    optimized
}

/// Computes the bloat ratio of one column's constraint.
fn bloat(
    star: &Star,
    column: &StarColumn,
    predicate: &ColumnPredicate,
    potential_parents: &[String],
    config: &EngineConfig,
) -> f64 {
    // Only enumerated lists can be optimised away.
    let ColumnPredicate::List(terms) = predicate else {
        return 0.0;
    };
    let value_count = terms.len();
    if value_count < 2 {
        return 0.0;
    }
    if value_count >= config.max_constraints {
        // Longer than the database accepts in one IN clause; always
        // dropped.
        return 1.0;
    }

    let constraint_length = value_count as f64;

    // Check for member constraints that are all children of one parent.
    let mut parent: Option<&MemberPredicate> = None;
    let mut level: Option<&str> = None;
    let mut all_members = true;
    for (i, term) in terms.iter().enumerate() {
        match term {
            ColumnPredicate::Member(m) => {
                if i == 0 {
                    parent = Some(m);
                    level = Some(&m.level);
                } else {
                    if parent.is_some_and(|p| p.parent != m.parent) {
                        parent = None;
                    }
                    if level.is_some_and(|l| l != m.level) {
                        level = None;
                    }
                }
            }
            _ => {
                all_members = false;
                break;
            }
        }
    }

    if !all_members {
        return constraint_length / column.cardinality.max(1) as f64;
    }

    if let Some(first) = parent {
        let parent_constrained = first.parent_is_all
            || first
                .parent
                .as_deref()
                .is_some_and(|p| potential_parents.iter().any(|pp| pp == p));
        if parent_constrained {
            match first.parent.as_deref().and_then(|p| star.child_count(p)) {
                Some(children) => return constraint_length / children.max(1) as f64,
                None => {
                    if !first.parent_is_all {
                        // Parent is in the constraints but its child
                        // count is unknown; do not optimise away.
                        return 0.0;
                    }
                }
            }
        }
    }

    if let Some(level) = level {
        if let Some(members) = star.level_cardinality(level) {
            return constraint_length / members.max(1) as f64;
        }
    }

    constraint_length / column.cardinality.max(1) as f64
}
