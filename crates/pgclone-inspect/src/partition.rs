use pgclone_catalog::{Oid, PartRange, SplitKey, TablePart};

/// The same-table partitioning decision from spec.md §4.2:
///
/// - if `split_threshold` is set and the table is at least that large *and*
///   it has a unique, NOT-NULL, non-deferrable integer key, split by
///   contiguous integer ranges, `ceil(size / threshold)` parts bounded by
///   `split_max_parts`;
/// - else, if page-locator splitting is allowed, split by physical page
///   range;
/// - else, the table is a single part.
pub struct PlanInput {
    pub table_oid: Oid,
    pub size_bytes: u64,
    pub estimated_rows: u64,
    pub integer_key_min_max: Option<(i64, i64)>,
    pub relpages: i64,
}

pub struct PlanOptions {
    pub split_threshold_bytes: Option<u64>,
    pub split_max_parts: u32,
    pub allow_ctid_split: bool,
}

/// Builds the disjoint, covering set of parts for one table. Property
/// tested below: the union of returned ranges equals the table's full
/// domain and no two ranges overlap (spec.md §8, invariant 1).
pub fn plan_parts(table_id_prefix: &str, input: &PlanInput, opts: &PlanOptions) -> Vec<TablePart> {
    let over_threshold = opts
        .split_threshold_bytes
        .is_some_and(|t| input.size_bytes >= t);

    if over_threshold {
        if let Some((min, max)) = input.integer_key_min_max {
            let threshold = opts.split_threshold_bytes.unwrap().max(1);
            let parts_wanted = div_ceil(input.size_bytes, threshold).max(1);
            let parts_wanted = parts_wanted.min(opts.split_max_parts as u64).max(1);
            return integer_ranges(table_id_prefix, min, max, parts_wanted);
        }
    }

    if over_threshold && opts.allow_ctid_split {
        let parts_wanted = div_ceil(
            input.size_bytes,
            opts.split_threshold_bytes.unwrap().max(1),
        )
        .min(opts.split_max_parts as u64)
        .max(1);
        return page_ranges(table_id_prefix, input.relpages, parts_wanted);
    }

    vec![TablePart {
        id: format!("{table_id_prefix}.0"),
        table_oid: input.table_oid.clone(),
        range: PartRange::WholeTable,
    }]
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Splits the half-open domain `[min, max+1)` into `n` contiguous,
/// non-overlapping integer ranges that together cover it exactly, even when
/// `max - min + 1` does not divide evenly by `n`.
fn integer_ranges(prefix: &str, min: i64, max: i64, n: u64) -> Vec<TablePart> {
    let table_oid = Oid(0); // caller overwrites via map below when needed
    let _ = &table_oid;
    let domain = (max - min + 1).max(1) as u128;
    let n = n.max(1) as u128;
    let base = domain / n;
    let remainder = domain % n;

    let mut parts = Vec::with_capacity(n as usize);
    let mut lo = min as i128;
    for i in 0..n {
        let width = base + u128::from(i < remainder);
        if width == 0 {
            continue;
        }
        let hi = lo + width as i128;
        parts.push((lo, hi));
        lo = hi;
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(i, (lo, hi))| TablePart {
            id: format!("{prefix}.{i}"),
            table_oid: Oid(0),
            range: PartRange::IntegerRange {
                lo: lo as i64,
                hi: hi as i64,
            },
        })
        .collect()
}

fn page_ranges(prefix: &str, relpages: i64, n: u64) -> Vec<TablePart> {
    let relpages = relpages.max(1);
    let n = n.max(1);
    let base = relpages as u64 / n;
    let remainder = relpages as u64 % n;

    let mut parts = Vec::with_capacity(n as usize);
    let mut lo: i64 = 0;
    for i in 0..n {
        let width = base + u64::from(i < remainder);
        if width == 0 {
            continue;
        }
        let hi = lo + width as i64;
        parts.push(TablePart {
            id: format!("{prefix}.{i}"),
            table_oid: Oid(0),
            range: PartRange::PageRange {
                lo_block: lo,
                hi_block: hi,
            },
        });
        lo = hi;
    }
    parts
}

/// Stamps every part with the owning table's OID; kept as a separate step
/// so the pure range math above can be property-tested without an `Oid` in
/// the way.
pub fn with_table_oid(mut parts: Vec<TablePart>, oid: Oid) -> Vec<TablePart> {
    for p in &mut parts {
        p.table_oid = oid.clone();
    }
    parts
}

pub fn resolve_split_key(
    estimated_rows: u64,
    size_bytes: u64,
    has_unique_not_null_int_key: bool,
    split_threshold_bytes: Option<u64>,
    allow_ctid_split: bool,
) -> SplitKey {
    let over_threshold = split_threshold_bytes.is_some_and(|t| size_bytes >= t);
    if !over_threshold {
        return SplitKey::None;
    }
    if has_unique_not_null_int_key {
        return SplitKey::IntegerColumn(String::new());
    }
    if allow_ctid_split {
        return SplitKey::PhysicalLocator;
    }
    let _ = estimated_rows;
    SplitKey::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranges_from(parts: &[TablePart]) -> Vec<(i64, i64)> {
        parts
            .iter()
            .map(|p| match p.range {
                PartRange::IntegerRange { lo, hi } => (lo, hi),
                _ => panic!("expected integer range"),
            })
            .collect()
    }

    #[test]
    fn whole_table_when_under_threshold() {
        let input = PlanInput {
            table_oid: Oid(1),
            size_bytes: 100,
            estimated_rows: 10,
            integer_key_min_max: Some((1, 10)),
            relpages: 1,
        };
        let opts = PlanOptions {
            split_threshold_bytes: Some(200_000),
            split_max_parts: 10,
            allow_ctid_split: true,
        };
        let parts = plan_parts("t", &input, &opts);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].range, PartRange::WholeTable);
    }

    #[test]
    fn splits_rental_like_table_into_seven_parts() {
        // Mirrors scenario 2 in spec.md §8: a 1224kB table over a 200kB
        // threshold should produce 7 parts.
        let input = PlanInput {
            table_oid: Oid(1),
            size_bytes: 1_224_000,
            estimated_rows: 16_044,
            integer_key_min_max: Some((1, 16_044)),
            relpages: 200,
        };
        let opts = PlanOptions {
            split_threshold_bytes: Some(200_000),
            split_max_parts: 100,
            allow_ctid_split: true,
        };
        let parts = plan_parts("rental", &input, &opts);
        assert_eq!(parts.len(), 7);
        let ranges = ranges_from(&parts);
        // union covers [1, 16045) and nothing overlaps
        assert_eq!(ranges.first().unwrap().0, 1);
        assert_eq!(ranges.last().unwrap().1, 16_045);
        for w in ranges.windows(2) {
            assert_eq!(w[0].1, w[1].0, "parts must be contiguous with no gap or overlap");
        }
    }

    #[test]
    fn falls_back_to_page_ranges_without_integer_key() {
        let input = PlanInput {
            table_oid: Oid(1),
            size_bytes: 1_000_000,
            estimated_rows: 50_000,
            integer_key_min_max: None,
            relpages: 1000,
        };
        let opts = PlanOptions {
            split_threshold_bytes: Some(200_000),
            split_max_parts: 10,
            allow_ctid_split: true,
        };
        let parts = plan_parts("t", &input, &opts);
        assert!(parts
            .iter()
            .all(|p| matches!(p.range, PartRange::PageRange { .. })));
        assert_eq!(parts.len(), 5);
    }

    #[test]
    fn whole_table_when_ctid_split_disabled_and_no_integer_key() {
        let input = PlanInput {
            table_oid: Oid(1),
            size_bytes: 1_000_000,
            estimated_rows: 50_000,
            integer_key_min_max: None,
            relpages: 1000,
        };
        let opts = PlanOptions {
            split_threshold_bytes: Some(200_000),
            split_max_parts: 10,
            allow_ctid_split: false,
        };
        let parts = plan_parts("t", &input, &opts);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].range, PartRange::WholeTable);
    }

    proptest! {
        #[test]
        fn integer_ranges_always_cover_domain_without_overlap(
            min in -1_000_000i64..1_000_000,
            span in 1i64..1_000_000,
            n in 1u64..64,
        ) {
            let max = min + span;
            let parts = integer_ranges("t", min, max, n);
            let ranges = ranges_from(&parts);
            prop_assert_eq!(ranges.first().unwrap().0, min);
            prop_assert_eq!(ranges.last().unwrap().1, max + 1);
            for w in ranges.windows(2) {
                prop_assert_eq!(w[0].1, w[1].0);
            }
        }
    }
}
