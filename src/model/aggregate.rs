use std::collections::BTreeMap;

use crate::domain::matching::{Confidence, PairAggregate, RawFaceMatch, Thresholds};

pub const MAX_SAMPLE_PHOTOS: usize = 5;

/// Passing matches split by destination: per-(person, cluster) aggregates
/// for clustered target faces, the rest kept raw for the unclustered
/// assignment path.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Sorted: count desc, avg IoU desc, then ids.
    pub pairs: Vec<PairAggregate>,
    /// Passing matches per source person, clustered or not.
    pub per_person_matched: BTreeMap<i64, u64>,
    /// Passing matches whose target face has no cluster.
    pub passing_unclustered: Vec<RawFaceMatch>,
}

pub fn aggregate_matches(raw_matches: &[RawFaceMatch], thresholds: &Thresholds) -> Aggregation {
    let mut groups: BTreeMap<(i64, String), Vec<&RawFaceMatch>> = BTreeMap::new();
    let mut per_person_matched: BTreeMap<i64, u64> = BTreeMap::new();
    let mut passing_unclustered = Vec::new();

    for m in raw_matches.iter().filter(|m| thresholds.passes(m)) {
        *per_person_matched.entry(m.src_person_id).or_default() += 1;
        match &m.cluster_id {
            Some(cluster_id) => groups
                .entry((m.src_person_id, cluster_id.clone()))
                .or_default()
                .push(m),
            None => passing_unclustered.push(m.clone()),
        }
    }

    let mut pairs: Vec<PairAggregate> = groups
        .into_iter()
        .map(|((src_person_id, cluster_id), group)| {
            let count = group.len() as u64;
            let avg_iou = group.iter().map(|m| m.iou).sum::<f64>() / group.len() as f64;
            let avg_center_dist =
                group.iter().map(|m| m.center_dist).sum::<f64>() / group.len() as f64;

            let mut by_overlap = group.clone();
            by_overlap.sort_by(|a, b| b.iou.total_cmp(&a.iou));
            let mut sample_photos: Vec<String> = Vec::new();
            for m in by_overlap {
                if !sample_photos.contains(&m.photo.file_name) {
                    sample_photos.push(m.photo.file_name.clone());
                    if sample_photos.len() == MAX_SAMPLE_PHOTOS {
                        break;
                    }
                }
            }

            PairAggregate {
                src_person_name: group[0].src_person_name.clone(),
                cluster_name: group[0].cluster_name.clone(),
                src_person_id,
                cluster_id,
                face_matches: count,
                avg_iou,
                avg_center_dist,
                confidence: Confidence::grade(count, avg_iou),
                sample_photos,
            }
        })
        .collect();

    pairs.sort_by(|a, b| {
        b.face_matches
            .cmp(&a.face_matches)
            .then(b.avg_iou.total_cmp(&a.avg_iou))
            .then(a.src_person_id.cmp(&b.src_person_id))
            .then(a.cluster_id.cmp(&b.cluster_id))
    });

    Aggregation {
        pairs,
        per_person_matched,
        passing_unclustered,
    }
}
