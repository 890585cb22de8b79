use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::face::{PhotoKey, SourceInventory, TargetInventory};
use crate::domain::matching::RawFaceMatch;
use crate::tools::geometry;
use crate::tools::log::{log_info, LogServiceType};

/// Photos both stores know about, by PhotoKey intersection. The two
/// only-here counts are the main diagnostic for path-mapping mistakes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoJoin {
    pub common: Vec<PhotoKey>,
    pub only_in_source: usize,
    pub only_in_target: usize,
}

pub fn join_photos(source: &SourceInventory, target: &TargetInventory) -> PhotoJoin {
    let source_keys: HashSet<&PhotoKey> = source.faces_by_photo.keys().collect();
    let target_keys: HashSet<&PhotoKey> = target.assets_by_photo.keys().collect();

    let mut common: Vec<PhotoKey> = source_keys
        .intersection(&target_keys)
        .map(|k| (*k).clone())
        .collect();
    common.sort();

    let join = PhotoJoin {
        only_in_source: source_keys.len() - common.len(),
        only_in_target: target_keys.len() - common.len(),
        common,
    };
    log_info(
        LogServiceType::Matching,
        format!(
            "Photo join: {} common, {} only in source, {} only in target",
            join.common.len(),
            join.only_in_source,
            join.only_in_target
        ),
    );
    join
}

/// Cartesian product per common photo; one raw match per pair with any
/// overlap. Many-to-many on purpose: a source face may pair with several
/// target faces and vice versa, and no threshold is applied here.
pub fn compute_raw_matches(
    source: &SourceInventory,
    target: &TargetInventory,
    join: &PhotoJoin,
) -> Vec<RawFaceMatch> {
    let mut matches = Vec::new();

    for photo in &join.common {
        let Some(source_faces) = source.faces_by_photo.get(photo) else {
            continue;
        };
        let Some(target_faces) = target.faces_by_photo.get(photo) else {
            continue;
        };
        for src in source_faces {
            for tgt in target_faces {
                let iou = geometry::iou(&src.rect, &tgt.rect);
                if iou <= 0.0 {
                    continue;
                }
                let cluster_name = tgt
                    .cluster_id
                    .as_ref()
                    .and_then(|id| target.clusters.get(id))
                    .and_then(|c| c.name.clone());
                matches.push(RawFaceMatch {
                    src_person_id: src.person_id,
                    src_person_name: source.person_name(src.person_id).to_string(),
                    src_face_id: src.id,
                    tgt_face_id: tgt.id.clone(),
                    asset_id: tgt.asset_id.clone(),
                    cluster_id: tgt.cluster_id.clone(),
                    cluster_name,
                    photo: photo.clone(),
                    src_rect: src.rect,
                    tgt_rect: tgt.rect,
                    iou,
                    center_dist: geometry::center_distance(&src.rect, &tgt.rect),
                });
            }
        }
    }

    matches.sort_by(|a, b| {
        (&a.photo, a.src_face_id, &a.tgt_face_id).cmp(&(&b.photo, b.src_face_id, &b.tgt_face_id))
    });
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::face::{FaceRect, TargetAsset};
    use crate::model::fixtures::{source_with, target_with};

    fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> FaceRect {
        FaceRect { x1, y1, x2, y2 }
    }

    #[test]
    fn join_intersects_on_photo_key() {
        let shared = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![
            (1, "Alice", shared.clone(), rect(0.1, 0.1, 0.4, 0.4)),
            (1, "Alice", PhotoKey::new("src-only.jpg", 2), rect(0.1, 0.1, 0.4, 0.4)),
        ]);
        let target = target_with(
            vec![
                ("t1", None, shared.clone(), rect(0.1, 0.1, 0.4, 0.4)),
                ("t2", None, PhotoKey::new("tgt-only.jpg", 3), rect(0.1, 0.1, 0.4, 0.4)),
            ],
            vec![],
        );

        let join = join_photos(&source, &target);
        assert_eq!(join.common, vec![shared]);
        assert_eq!(join.only_in_source, 1);
        assert_eq!(join.only_in_target, 1);
    }

    #[test]
    fn raw_matches_are_threshold_free_and_many_to_many() {
        let photo = PhotoKey::new("a.jpg", 1);
        // One source face overlapping two target faces.
        let source = source_with(vec![(1, "Alice", photo.clone(), rect(0.1, 0.1, 0.5, 0.5))]);
        let target = target_with(
            vec![
                ("t1", Some("c1"), photo.clone(), rect(0.1, 0.1, 0.5, 0.5)),
                ("t2", Some("c2"), photo.clone(), rect(0.4, 0.4, 0.8, 0.8)),
                ("t3", None, photo.clone(), rect(0.8, 0.8, 0.9, 0.9)), // disjoint
            ],
            vec![("c1", Some("Named"), 1), ("c2", None, 1)],
        );

        let join = join_photos(&source, &target);
        let matches = compute_raw_matches(&source, &target, &join);
        assert_eq!(matches.len(), 2); // the disjoint pair is pruned
        assert!(matches.iter().all(|m| m.iou > 0.0 && m.iou <= 1.0));
        assert!(matches.iter().all(|m| (0.0..=1.0).contains(&m.center_dist)));
        assert_eq!(matches[0].cluster_name.as_deref(), Some("Named"));
        assert_eq!(matches[1].cluster_name, None);
    }

    #[test]
    fn identical_rect_yields_perfect_match() {
        let photo = PhotoKey::new("a.jpg", 1);
        let r = rect(0.0, 0.0, 1.0, 1.0);
        let source = source_with(vec![(1, "Alice", photo.clone(), r)]);
        let target = target_with(vec![("t1", None, photo.clone(), r)], vec![]);
        let join = join_photos(&source, &target);
        let matches = compute_raw_matches(&source, &target, &join);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].iou, 1.0);
        assert_eq!(matches[0].center_dist, 0.0);
    }

    #[test]
    fn photo_with_faces_on_one_side_only_emits_nothing() {
        let photo = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![(1, "Alice", photo.clone(), rect(0.1, 0.1, 0.4, 0.4))]);
        // Asset known to the target but zero detected faces.
        let mut target = target_with(vec![], vec![]);
        target.assets_by_photo.insert(
            photo.clone(),
            TargetAsset { asset_id: "asset-a".into(), image_width: 100, image_height: 100 },
        );

        let join = join_photos(&source, &target);
        assert_eq!(join.common.len(), 1);
        let matches = compute_raw_matches(&source, &target, &join);
        assert!(matches.is_empty());
    }

    #[test]
    fn output_order_is_deterministic() {
        let p1 = PhotoKey::new("a.jpg", 1);
        let p2 = PhotoKey::new("b.jpg", 1);
        let r = rect(0.1, 0.1, 0.4, 0.4);
        let source = source_with(vec![
            (1, "Alice", p2.clone(), r),
            (1, "Alice", p1.clone(), r),
        ]);
        let target = target_with(
            vec![("t9", None, p2.clone(), r), ("t1", None, p1.clone(), r)],
            vec![],
        );
        let join = join_photos(&source, &target);
        let a = compute_raw_matches(&source, &target, &join);
        let b = compute_raw_matches(&source, &target, &join);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].photo, p1);
        let keys_a: Vec<_> = a.iter().map(|m| (m.photo.clone(), m.src_face_id, m.tgt_face_id.clone())).collect();
        let keys_b: Vec<_> = b.iter().map(|m| (m.photo.clone(), m.src_face_id, m.tgt_face_id.clone())).collect();
        assert_eq!(keys_a, keys_b);
    }
}
