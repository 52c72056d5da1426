//! Merging of overlapping clusters.
//!
//! Two maxima on the same finger produce two clusters covering mostly the
//! same cells. Boxes whose intersection over union reaches 0.5 are merged
//! before fitting, so every finger gets exactly one Gaussian.

use super::{Cluster, DetectError};

/// Calculates the intersection over union of two boxes (range 0 to 1).
fn overlap(a: &Cluster, b: &Cluster) -> f64 {
    if a == b {
        return 1.0;
    }

    let Some(intersection) = a.intersection(b) else {
        return 0.0;
    };

    let area_a = a.area() as f64;
    let area_b = b.area() as f64;
    let area_i = intersection.area() as f64;

    area_i / (area_a + area_b - area_i)
}

/// Searches for pairs of clusters with IoU >= 0.5.
///
/// Pairs are stored as `(i, j)` with `i < j`: when merging in index order,
/// by the time `j` is reached it has already been merged into `i` and can
/// be dropped.
fn search(clusters: &[Cluster], overlaps: &mut Vec<(usize, usize)>) -> bool {
    overlaps.clear();

    for i in 0..clusters.len() {
        for j in (i + 1)..clusters.len() {
            if overlap(&clusters[i], &clusters[j]) < 0.5 {
                continue;
            }

            overlaps.push((i, j));
        }
    }

    !overlaps.is_empty()
}

/// Merges overlapping clusters until a pass finds none, or the iteration
/// budget runs out.
///
/// Merging two boxes creates a bigger box that can overlap with boxes it
/// previously did not touch, hence the repeated passes. If overlaps remain
/// after `iterations` passes the frame is hopeless and an error is
/// returned.
pub fn merge(
    clusters: &mut Vec<Cluster>,
    temp: &mut Vec<Cluster>,
    iterations: usize,
) -> Result<(), DetectError> {
    let mut overlaps: Vec<(usize, usize)> = Vec::with_capacity(clusters.len());

    for _ in 0..iterations {
        if !search(clusters, &mut overlaps) {
            return Ok(());
        }

        temp.clear();

        for i in 0..clusters.len() {
            let mut cluster = clusters[i];
            let mut drop_cluster = false;

            for &(a, b) in &overlaps {
                // If this cluster is the second of a pair, it has already
                // been merged into the first one.
                if b == i {
                    drop_cluster = true;
                    break;
                }

                if a != i {
                    continue;
                }

                cluster = cluster.merged(&clusters[b]);
            }

            if !drop_cluster {
                temp.push(cluster);
            }
        }

        std::mem::swap(clusters, temp);
    }

    if search(clusters, &mut overlaps) {
        return Err(DetectError::FailedToMergeClusters);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(min_x: usize, min_y: usize, max_x: usize, max_y: usize) -> Cluster {
        Cluster {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[test]
    fn identical_boxes_merge() {
        let mut clusters = vec![cluster(1, 1, 3, 3), cluster(1, 1, 3, 3)];
        let mut temp = Vec::new();

        merge(&mut clusters, &mut temp, 5).unwrap();
        assert_eq!(clusters, vec![cluster(1, 1, 3, 3)]);
    }

    #[test]
    fn disjoint_boxes_stay() {
        let mut clusters = vec![cluster(0, 0, 2, 2), cluster(10, 10, 12, 12)];
        let mut temp = Vec::new();

        merge(&mut clusters, &mut temp, 5).unwrap();
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn slight_overlap_is_kept_separate() {
        // IoU well below 0.5.
        let mut clusters = vec![cluster(0, 0, 4, 4), cluster(4, 4, 8, 8)];
        let mut temp = Vec::new();

        merge(&mut clusters, &mut temp, 5).unwrap();
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn heavy_overlap_merges_to_bounding_box() {
        let mut clusters = vec![cluster(0, 0, 4, 4), cluster(1, 0, 5, 4)];
        let mut temp = Vec::new();

        merge(&mut clusters, &mut temp, 5).unwrap();
        assert_eq!(clusters, vec![cluster(0, 0, 5, 4)]);
    }

    #[test]
    fn no_overlaps_remain_after_merge() {
        let mut clusters = vec![
            cluster(0, 0, 4, 4),
            cluster(1, 1, 5, 5),
            cluster(2, 2, 6, 6),
            cluster(20, 20, 24, 24),
        ];
        let mut temp = Vec::new();

        merge(&mut clusters, &mut temp, 5).unwrap();

        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                assert!(overlap(&clusters[i], &clusters[j]) < 0.5);
            }
        }
    }

    #[test]
    fn zero_iterations_with_overlaps_fails() {
        let mut clusters = vec![cluster(0, 0, 3, 3), cluster(0, 0, 3, 3)];
        let mut temp = Vec::new();

        assert_eq!(
            merge(&mut clusters, &mut temp, 0),
            Err(DetectError::FailedToMergeClusters)
        );
    }
}
