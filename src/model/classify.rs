use std::collections::{BTreeMap, HashSet};

use crate::domain::face::{SourceInventory, TargetInventory};
use crate::domain::matching::{
    CreateFaceDetail, CreateFacePreview, IssuePersonRef, IssueSeverity, MergeCandidate,
    MergeClusterRef, PairAggregate, RawFaceMatch, Thresholds, UnclusteredFaceDetail,
    UnclusteredPreview, ValidationIssue,
};

use super::aggregate::{Aggregation, MAX_SAMPLE_PHOTOS};
use super::matcher::PhotoJoin;

/// Classification knobs carried by the settings layer.
#[derive(Debug, Clone)]
pub struct ClassifyKnobs {
    /// A cluster must reach this many passing matches to count toward a
    /// merge candidate.
    pub min_matches: u64,
    /// Minority-person floor for a validation issue to become an error.
    pub validation_min_minority_faces: u64,
    /// Minority-person share of the cluster for an error, in [0, 1].
    pub validation_min_minority_share: f64,
    pub name_match_case_insensitive: bool,
}

impl Default for ClassifyKnobs {
    fn default() -> Self {
        Self {
            min_matches: 2,
            validation_min_minority_faces: 2,
            validation_min_minority_share: 0.10,
            name_match_case_insensitive: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub all_matches: Vec<PairAggregate>,
    /// Pairs whose cluster is currently unnamed: safe to rename.
    pub applicable: Vec<PairAggregate>,
    pub unclustered: Vec<UnclusteredPreview>,
    pub merge: Vec<MergeCandidate>,
    pub validation: Vec<ValidationIssue>,
    pub create_faces: Vec<CreateFacePreview>,
}

pub fn classify(
    source: &SourceInventory,
    target: &TargetInventory,
    join: &PhotoJoin,
    raw_matches: &[RawFaceMatch],
    aggregation: &Aggregation,
    thresholds: &Thresholds,
    knobs: &ClassifyKnobs,
) -> Buckets {
    Buckets {
        all_matches: aggregation.pairs.clone(),
        applicable: aggregation
            .pairs
            .iter()
            .filter(|p| p.cluster_name.is_none())
            .cloned()
            .collect(),
        unclustered: classify_unclustered(source, target, aggregation, knobs),
        merge: classify_merge(source, target, aggregation, knobs),
        validation: classify_validation(target, aggregation, knobs),
        create_faces: classify_create_faces(source, target, join, raw_matches, thresholds, knobs),
    }
}

fn classify_unclustered(
    source: &SourceInventory,
    target: &TargetInventory,
    aggregation: &Aggregation,
    knobs: &ClassifyKnobs,
) -> Vec<UnclusteredPreview> {
    let mut by_person: BTreeMap<i64, Vec<&RawFaceMatch>> = BTreeMap::new();
    for m in &aggregation.passing_unclustered {
        by_person.entry(m.src_person_id).or_default().push(m);
    }

    let mut previews: Vec<UnclusteredPreview> = by_person
        .into_iter()
        .map(|(person_id, matches)| {
            // A target face matched by several of the person's source faces
            // counts once, at its best overlap.
            let mut best: BTreeMap<&str, &RawFaceMatch> = BTreeMap::new();
            for m in matches {
                best.entry(m.tgt_face_id.as_str())
                    .and_modify(|kept| {
                        if m.iou > kept.iou {
                            *kept = m;
                        }
                    })
                    .or_insert(m);
            }

            let mut faces: Vec<UnclusteredFaceDetail> = best
                .values()
                .map(|m| UnclusteredFaceDetail {
                    face_id: m.tgt_face_id.clone(),
                    asset_id: m.asset_id.clone(),
                    file_name: m.photo.file_name.clone(),
                    iou: m.iou,
                    center_dist: m.center_dist,
                    src_rect: m.src_rect,
                    tgt_rect: m.tgt_rect,
                })
                .collect();
            faces.sort_by(|a, b| (&a.file_name, &a.face_id).cmp(&(&b.file_name, &b.face_id)));

            let avg_iou = faces.iter().map(|f| f.iou).sum::<f64>() / faces.len().max(1) as f64;
            let mut by_overlap = faces.clone();
            by_overlap.sort_by(|a, b| b.iou.total_cmp(&a.iou));
            let mut sample_filenames = Vec::new();
            for f in &by_overlap {
                if !sample_filenames.contains(&f.file_name) {
                    sample_filenames.push(f.file_name.clone());
                    if sample_filenames.len() == MAX_SAMPLE_PHOTOS {
                        break;
                    }
                }
            }

            let person_name = source.person_name(person_id).to_string();
            let existing = target.find_person_by_name(&person_name, knobs.name_match_case_insensitive);
            UnclusteredPreview {
                src_person_id: person_id,
                needs_person_creation: existing.is_none(),
                existing_person_id: existing.map(|p| p.id.clone()),
                total_faces_in_source: source
                    .persons
                    .get(&person_id)
                    .map(|p| p.face_count)
                    .unwrap_or(0),
                face_count: faces.len(),
                avg_iou,
                faces,
                sample_filenames,
                src_person_name: person_name,
            }
        })
        .collect();

    previews.sort_by(|a, b| {
        b.face_count
            .cmp(&a.face_count)
            .then(a.src_person_id.cmp(&b.src_person_id))
    });
    previews
}

fn classify_merge(
    source: &SourceInventory,
    target: &TargetInventory,
    aggregation: &Aggregation,
    knobs: &ClassifyKnobs,
) -> Vec<MergeCandidate> {
    let mut by_person: BTreeMap<i64, Vec<&PairAggregate>> = BTreeMap::new();
    for pair in &aggregation.pairs {
        by_person.entry(pair.src_person_id).or_default().push(pair);
    }

    let mut candidates: Vec<MergeCandidate> = by_person
        .into_iter()
        .filter_map(|(person_id, pairs)| {
            let valid: Vec<&&PairAggregate> = pairs
                .iter()
                .filter(|p| p.face_matches >= knobs.min_matches)
                .collect();
            if valid.len() < 2 {
                return None;
            }

            let mut clusters: Vec<MergeClusterRef> = valid
                .iter()
                .map(|p| MergeClusterRef {
                    cluster_id: p.cluster_id.clone(),
                    cluster_name: p.cluster_name.clone(),
                    matched_faces: p.face_matches,
                    total_faces: target
                        .clusters
                        .get(&p.cluster_id)
                        .map(|c| c.total_faces)
                        .unwrap_or(0),
                })
                .collect();
            clusters.sort_by(|a, b| {
                b.matched_faces
                    .cmp(&a.matched_faces)
                    .then(a.cluster_id.cmp(&b.cluster_id))
            });

            let total_source_faces = source
                .persons
                .get(&person_id)
                .map(|p| p.face_count)
                .unwrap_or(0);
            let matched: u64 = clusters.iter().map(|c| c.matched_faces).sum();
            let confidence = if total_source_faces > 0 {
                (matched as f64 / total_source_faces as f64).min(1.0)
            } else {
                0.0
            };

            Some(MergeCandidate {
                src_person_name: source.person_name(person_id).to_string(),
                src_person_id: person_id,
                total_source_faces,
                clusters,
                confidence,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.clusters
            .len()
            .cmp(&a.clusters.len())
            .then(a.src_person_id.cmp(&b.src_person_id))
    });
    candidates
}

fn classify_validation(
    target: &TargetInventory,
    aggregation: &Aggregation,
    knobs: &ClassifyKnobs,
) -> Vec<ValidationIssue> {
    let mut by_cluster: BTreeMap<&str, Vec<&PairAggregate>> = BTreeMap::new();
    for pair in &aggregation.pairs {
        by_cluster.entry(pair.cluster_id.as_str()).or_default().push(pair);
    }

    let mut issues: Vec<ValidationIssue> = by_cluster
        .into_iter()
        .filter_map(|(cluster_id, pairs)| {
            if pairs.len() < 2 {
                return None;
            }

            let mut persons: Vec<IssuePersonRef> = pairs
                .iter()
                .map(|p| IssuePersonRef {
                    person_id: p.src_person_id,
                    person_name: p.src_person_name.clone(),
                    face_count: p.face_matches,
                })
                .collect();
            persons.sort_by(|a, b| {
                b.face_count
                    .cmp(&a.face_count)
                    .then(a.person_id.cmp(&b.person_id))
            });

            let matched_faces: u64 = persons.iter().map(|p| p.face_count).sum();
            let cluster = target.clusters.get(cluster_id);
            let total_faces_in_cluster = cluster
                .map(|c| c.total_faces)
                .unwrap_or(matched_faces as i64);

            // The runner-up person decides the severity.
            let minority = persons[1].face_count;
            let severity = if minority >= knobs.validation_min_minority_faces
                && minority as f64
                    >= knobs.validation_min_minority_share * total_faces_in_cluster as f64
            {
                IssueSeverity::Error
            } else {
                IssueSeverity::Warning
            };

            let mut sample_photos = Vec::new();
            for pair in &pairs {
                for photo in &pair.sample_photos {
                    if !sample_photos.contains(photo) {
                        sample_photos.push(photo.clone());
                        if sample_photos.len() == MAX_SAMPLE_PHOTOS {
                            break;
                        }
                    }
                }
            }

            Some(ValidationIssue {
                cluster_id: cluster_id.to_string(),
                cluster_name: cluster.and_then(|c| c.name.clone()),
                total_faces_in_cluster,
                matched_faces,
                persons,
                severity,
                sample_photos,
            })
        })
        .collect();

    issues.sort_by(|a, b| {
        let rank = |s: IssueSeverity| match s {
            IssueSeverity::Error => 0,
            IssueSeverity::Warning => 1,
        };
        rank(a.severity)
            .cmp(&rank(b.severity))
            .then(b.persons.len().cmp(&a.persons.len()))
            .then(a.cluster_id.cmp(&b.cluster_id))
    });
    issues
}

fn classify_create_faces(
    source: &SourceInventory,
    target: &TargetInventory,
    join: &PhotoJoin,
    raw_matches: &[RawFaceMatch],
    thresholds: &Thresholds,
    knobs: &ClassifyKnobs,
) -> Vec<CreateFacePreview> {
    // A source face is covered when any target face overlaps it at the IoU
    // threshold, clustered or not. Center distance plays no part here.
    let covered: HashSet<i64> = raw_matches
        .iter()
        .filter(|m| m.iou >= thresholds.min_iou)
        .map(|m| m.src_face_id)
        .collect();

    let mut by_person: BTreeMap<i64, Vec<CreateFaceDetail>> = BTreeMap::new();
    for photo in &join.common {
        let Some(asset) = target.assets_by_photo.get(photo) else {
            continue;
        };
        let Some(faces) = source.faces_by_photo.get(photo) else {
            continue;
        };
        for face in faces {
            if covered.contains(&face.id) {
                continue;
            }
            by_person.entry(face.person_id).or_default().push(CreateFaceDetail {
                asset_id: asset.asset_id.clone(),
                file_name: photo.file_name.clone(),
                rect: face.rect,
                image_width: asset.image_width,
                image_height: asset.image_height,
            });
        }
    }

    let mut previews: Vec<CreateFacePreview> = by_person
        .into_iter()
        .map(|(person_id, faces)| {
            let person_name = source.person_name(person_id).to_string();
            let existing = target.find_person_by_name(&person_name, knobs.name_match_case_insensitive);
            let mut sample_filenames = Vec::new();
            for f in &faces {
                if !sample_filenames.contains(&f.file_name) {
                    sample_filenames.push(f.file_name.clone());
                    if sample_filenames.len() == MAX_SAMPLE_PHOTOS {
                        break;
                    }
                }
            }
            CreateFacePreview {
                src_person_id: person_id,
                needs_person_creation: existing.is_none(),
                existing_person_id: existing.map(|p| p.id.clone()),
                total_faces_in_source: source
                    .persons
                    .get(&person_id)
                    .map(|p| p.face_count)
                    .unwrap_or(0),
                face_count: faces.len(),
                faces,
                sample_filenames,
                src_person_name: person_name,
            }
        })
        .collect();

    previews.sort_by(|a, b| {
        b.face_count
            .cmp(&a.face_count)
            .then(a.src_person_id.cmp(&b.src_person_id))
    });
    previews
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::face::{FaceRect, PhotoKey, TargetAsset, TargetPerson};
    use crate::model::aggregate::aggregate_matches;
    use crate::model::fixtures::{source_with, target_with};
    use crate::model::matcher::{compute_raw_matches, join_photos};

    fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> FaceRect {
        FaceRect { x1, y1, x2, y2 }
    }

    fn run(
        source: &SourceInventory,
        target: &TargetInventory,
        knobs: &ClassifyKnobs,
    ) -> Buckets {
        let thresholds = Thresholds::default();
        let join = join_photos(source, target);
        let raw = compute_raw_matches(source, target, &join);
        let agg = aggregate_matches(&raw, &thresholds);
        classify(source, target, &join, &raw, &agg, &thresholds, knobs)
    }

    #[test]
    fn scenario_perfect_rename() {
        let photo = PhotoKey::new("a.jpg", 1);
        let r = rect(0.10, 0.10, 0.40, 0.40);
        let source = source_with(vec![(1, "Alice", photo.clone(), r)]);
        let target = target_with(
            vec![("t1", Some("x"), photo.clone(), r)],
            vec![("x", None, 1)],
        );

        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert_eq!(buckets.all_matches.len(), 1);
        let pair = &buckets.all_matches[0];
        assert_eq!(pair.face_matches, 1);
        assert_eq!(pair.avg_iou, 1.0);
        assert_eq!(pair.avg_center_dist, 0.0);
        assert_eq!(pair.confidence, crate::domain::matching::Confidence::Low);

        assert_eq!(buckets.applicable.len(), 1);
        assert_eq!(buckets.applicable[0].src_person_name, "Alice");
        assert_eq!(buckets.applicable[0].cluster_id, "x");
        assert!(buckets.unclustered.is_empty());
        assert!(buckets.merge.is_empty());
        assert!(buckets.validation.is_empty());
        assert!(buckets.create_faces.is_empty());
    }

    #[test]
    fn scenario_assign_unclustered() {
        let photo = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![(1, "Bob", photo.clone(), rect(0.5, 0.5, 0.7, 0.7))]);
        let mut target = target_with(
            vec![("t1", None, photo.clone(), rect(0.51, 0.51, 0.69, 0.69))],
            vec![],
        );

        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert!(buckets.applicable.is_empty());
        assert_eq!(buckets.unclustered.len(), 1);
        let preview = &buckets.unclustered[0];
        assert_eq!(preview.src_person_name, "Bob");
        assert_eq!(preview.face_count, 1);
        assert!(preview.needs_person_creation);

        // With an existing target-side Bob, no creation is needed.
        target.persons.push(TargetPerson { id: "p-bob".into(), name: "Bob".into() });
        let buckets = run(&source, &target, &ClassifyKnobs::default());
        let preview = &buckets.unclustered[0];
        assert!(!preview.needs_person_creation);
        assert_eq!(preview.existing_person_id.as_deref(), Some("p-bob"));
    }

    #[test]
    fn scenario_merge_candidate() {
        let p1 = PhotoKey::new("one.jpg", 1);
        let p2 = PhotoKey::new("two.jpg", 2);
        let r1 = rect(0.1, 0.1, 0.4, 0.4);
        let r1_near = rect(0.11, 0.11, 0.41, 0.41); // iou ~ 0.9
        let r2 = rect(0.5, 0.5, 0.8, 0.8);
        let r2_near = rect(0.51, 0.51, 0.81, 0.81);
        let source = source_with(vec![
            (1, "Carol", p1.clone(), r1),
            (1, "Carol", p2.clone(), r2),
        ]);
        let target = target_with(
            vec![
                ("t1", Some("x"), p1.clone(), r1_near),
                ("t2", Some("y"), p2.clone(), r2_near),
            ],
            vec![("x", None, 1), ("y", None, 1)],
        );

        let knobs = ClassifyKnobs { min_matches: 1, ..ClassifyKnobs::default() };
        let buckets = run(&source, &target, &knobs);
        assert_eq!(buckets.merge.len(), 1);
        let candidate = &buckets.merge[0];
        assert_eq!(candidate.src_person_name, "Carol");
        let ids: Vec<&str> = candidate.clusters.iter().map(|c| c.cluster_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"x") && ids.contains(&"y"));

        // At the default min_matches of 2 the single-face clusters drop out.
        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert!(buckets.merge.is_empty());
    }

    #[test]
    fn scenario_validation_error() {
        let photo = PhotoKey::new("a.jpg", 1);
        let r_a = rect(0.1, 0.1, 0.3, 0.3);
        let r_a_near = rect(0.11, 0.11, 0.31, 0.31);
        let r_b = rect(0.6, 0.6, 0.8, 0.8);
        let r_b_near = rect(0.61, 0.61, 0.81, 0.81);
        let source = source_with(vec![
            (1, "Dave", photo.clone(), r_a),
            (2, "Eve", photo.clone(), r_b),
        ]);
        let target = target_with(
            vec![
                ("ta", Some("z"), photo.clone(), r_a_near),
                ("tb", Some("z"), photo.clone(), r_b_near),
            ],
            vec![("z", Some("Dave"), 2)],
        );

        // Minority floor of 1 so single-face support still counts.
        let knobs = ClassifyKnobs { validation_min_minority_faces: 1, ..ClassifyKnobs::default() };
        let buckets = run(&source, &target, &knobs);
        assert_eq!(buckets.validation.len(), 1);
        let issue = &buckets.validation[0];
        assert_eq!(issue.cluster_id, "z");
        assert_eq!(issue.severity, IssueSeverity::Error);
        assert_eq!(issue.persons.len(), 2);
        assert_eq!(issue.matched_faces, 2);
        let names: Vec<&str> = issue.persons.iter().map(|p| p.person_name.as_str()).collect();
        assert!(names.contains(&"Dave") && names.contains(&"Eve"));

        // With the default floor of 2, one minority face is only a warning.
        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert_eq!(buckets.validation[0].severity, IssueSeverity::Warning);
    }

    #[test]
    fn scenario_create_face() {
        let photo = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![(1, "Frank", photo.clone(), rect(0.2, 0.2, 0.4, 0.4))]);
        let mut target = target_with(vec![], vec![]);
        target.assets_by_photo.insert(
            photo.clone(),
            TargetAsset { asset_id: "asset-1".into(), image_width: 4000, image_height: 3000 },
        );

        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert!(buckets.applicable.is_empty());
        assert!(buckets.unclustered.is_empty());
        assert!(buckets.merge.is_empty());
        assert!(buckets.validation.is_empty());
        assert_eq!(buckets.create_faces.len(), 1);
        let preview = &buckets.create_faces[0];
        assert_eq!(preview.src_person_name, "Frank");
        assert_eq!(preview.face_count, 1);
        assert_eq!(preview.faces[0].asset_id, "asset-1");
        assert_eq!(preview.faces[0].image_width, 4000);
        assert!(preview.needs_person_creation);
    }

    #[test]
    fn create_face_coverage_uses_iou_only() {
        // The pair passes IoU but fails a tight center-distance threshold:
        // excluded from assignment, yet the source face is still covered
        // for the create-face path.
        let photo = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![(1, "Gina", photo.clone(), rect(0.1, 0.1, 0.4, 0.4))]);
        let target = target_with(
            vec![("t1", None, photo.clone(), rect(0.15, 0.15, 0.45, 0.45))],
            vec![],
        );
        let thresholds = Thresholds { min_iou: 0.3, max_center_dist: 0.01 };
        let join = join_photos(&source, &target);
        let raw = compute_raw_matches(&source, &target, &join);
        let agg = aggregate_matches(&raw, &thresholds);
        let buckets = classify(
            &source,
            &target,
            &join,
            &raw,
            &agg,
            &thresholds,
            &ClassifyKnobs::default(),
        );
        assert!(buckets.unclustered.is_empty());
        assert!(buckets.create_faces.is_empty());
    }

    #[test]
    fn unclustered_counts_unique_target_faces() {
        // Two source faces of the same person both overlap one unclustered
        // target face: it must count once.
        let photo = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![
            (1, "Hana", photo.clone(), rect(0.1, 0.1, 0.4, 0.4)),
            (1, "Hana", photo.clone(), rect(0.12, 0.12, 0.42, 0.42)),
        ]);
        let target = target_with(
            vec![("t1", None, photo.clone(), rect(0.11, 0.11, 0.41, 0.41))],
            vec![],
        );
        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert_eq!(buckets.unclustered.len(), 1);
        assert_eq!(buckets.unclustered[0].face_count, 1);
    }

    #[test]
    fn same_cluster_matching_two_persons_yields_two_rename_entries() {
        let photo = PhotoKey::new("a.jpg", 1);
        let source = source_with(vec![
            (1, "Ivan", photo.clone(), rect(0.1, 0.1, 0.3, 0.3)),
            (2, "Judy", photo.clone(), rect(0.6, 0.6, 0.8, 0.8)),
        ]);
        let target = target_with(
            vec![
                ("t1", Some("c"), photo.clone(), rect(0.1, 0.1, 0.3, 0.3)),
                ("t2", Some("c"), photo.clone(), rect(0.6, 0.6, 0.8, 0.8)),
            ],
            vec![("c", None, 2)],
        );
        let buckets = run(&source, &target, &ClassifyKnobs::default());
        assert_eq!(buckets.applicable.len(), 2);
        // The same cluster also surfaces as a validation issue.
        assert_eq!(buckets.validation.len(), 1);
    }
}
