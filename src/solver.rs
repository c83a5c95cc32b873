//! Maximum-feasible-subset search over constraint disks.
//!
//! Real measurement batches contain a few landmarks whose calibration is
//! simply wrong for the path taken, so intersecting every empirical disk
//! usually annihilates the region. Instead we look for the largest subset of
//! disks whose joint intersection (with the base region) is non-empty,
//! breaking cardinality ties toward the smaller area.
//!
//! Subsets are enumerated lexicographically as a suffix tree over the disks
//! sorted by ascending area (tight constraints first). Each stack node keeps
//! the intersection of its prefix behind an `Rc`, so visiting a node costs
//! exactly one polygon intersection, and two prunes keep the walk tractable:
//! a cardinality upper bound against the best found so far, and the fact
//! that every superset of an empty intersection is empty.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::disk::Disk;
use crate::region::Region;

/// Result of one max-subset search.
#[derive(Clone, Debug)]
pub struct SubsetResult {
    pub region: Region,
    /// Indices into the input disk slice, ascending. Empty when no disk
    /// could be added, in which case `region` equals the base region.
    pub chosen: Vec<usize>,
}

/// Intersect the base region with as many of `disks` as possible.
pub fn max_subset_intersection(disks: &[Disk], base: &Region) -> SubsetResult {
    let n = disks.len();
    if n == 0 || base.is_empty() {
        return SubsetResult {
            region: base.clone(),
            chosen: Vec::new(),
        };
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        disks[a]
            .region
            .area()
            .partial_cmp(&disks[b].region.area())
            .unwrap_or(Ordering::Equal)
    });

    struct Node {
        cand: Vec<usize>,
        parent: Rc<Region>,
    }

    let mut best_region = base.clone();
    let mut best_area = base.area();
    let mut best_cand: Vec<usize> = Vec::new();

    let root = Rc::new(base.clone());
    let mut stack: Vec<Node> = (0..n)
        .rev()
        .map(|i| Node {
            cand: vec![i],
            parent: root.clone(),
        })
        .collect();

    while let Some(Node { cand, parent }) = stack.pop() {
        let last = *cand.last().expect("candidate sets are never empty");
        // Even taking every disk after `last`, this subtree cannot beat the
        // best cardinality found so far.
        if cand.len() + (n - 1 - last) < best_cand.len() {
            continue;
        }

        let region = parent.intersection(&disks[order[last]].region);
        if region.is_empty() {
            // All supersets of an empty intersection are empty.
            continue;
        }

        let area = region.area();
        if cand.len() > best_cand.len() || (cand.len() == best_cand.len() && area < best_area) {
            best_cand = cand.clone();
            best_area = area;
            best_region = region.clone();
        }

        let parent = Rc::new(region);
        for child in ((last + 1)..n).rev() {
            let mut extended = cand.clone();
            extended.push(child);
            stack.push(Node {
                cand: extended,
                parent: parent.clone(),
            });
        }
    }

    let mut chosen: Vec<usize> = best_cand.into_iter().map(|p| order[p]).collect();
    chosen.sort_unstable();
    SubsetResult {
        region: best_region,
        chosen,
    }
}

/// Outcome of the full three-step refinement for one (batch, variant).
#[derive(Clone, Debug)]
pub struct Solution {
    pub region: Region,
    /// Indices of empirical disks participating in the final intersection.
    pub included: Vec<usize>,
    /// Physical-limit disks the search had to exclude. Physics is not
    /// negotiable: any exclusion means the measurements are mutually
    /// inconsistent and the region is reported empty.
    pub physical_excluded: usize,
}

/// Refine `base` by the physical-limit disks, then by the largest feasible
/// subset of empirical disks.
pub fn solve(physical: &[Disk], empirical: &[Disk], base: &Region) -> Solution {
    debug_assert_eq!(physical.len(), empirical.len());

    let phy = max_subset_intersection(physical, base);
    if phy.chosen.len() < physical.len() {
        return Solution {
            region: Region::empty(),
            included: Vec::new(),
            physical_excluded: physical.len() - phy.chosen.len(),
        };
    }

    // An empirical disk that misses the physically possible region is an
    // outlier; one that is almost equal to its physical twin adds nothing.
    let keep: Vec<usize> = (0..empirical.len())
        .filter(|&i| {
            empirical[i].region.intersects(&phy.region)
                && !empirical[i].region.almost_equal(&physical[i].region)
        })
        .collect();
    let filtered: Vec<Disk> = keep.iter().map(|&i| empirical[i].clone()).collect();

    let refined = max_subset_intersection(&filtered, &phy.region);
    Solution {
        region: refined.region,
        included: refined.chosen.into_iter().map(|j| keep[j]).collect(),
        physical_excluded: 0,
    }
}
