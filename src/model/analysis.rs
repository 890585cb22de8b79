use std::collections::HashSet;

use serde_json::json;

use crate::domain::face::{SourceInventory, TargetInventory};
use crate::domain::matching::{
    AnalysisBundle, CreateFacesSection, MatchAnalytics, MatchLists, MergeSection, RawFaceMatch,
    Thresholds, UnclusteredSection, ValidationSection, DEFAULT_MAX_CENTER_DIST, DEFAULT_MIN_IOU,
};
use crate::domain::matching::{Confidence, IssueSeverity};
use crate::tools::stats::{summarize_metric, PassDirection};

use super::aggregate::aggregate_matches;
use super::classify::{classify, Buckets, ClassifyKnobs};
use super::error::{Error, Result};
use super::matcher::{self, PhotoJoin};
use super::store::{SourceStore, TargetStore};

/// Everything loaded once per analysis session: both inventories, the
/// photo join and the un-thresholded raw matches. Published immutable;
/// threshold changes only recompute downstream of this.
#[derive(Debug, Clone)]
pub struct MatchSnapshot {
    pub source: SourceInventory,
    pub target: TargetInventory,
    pub join: PhotoJoin,
    pub raw_matches: Vec<RawFaceMatch>,
    pub analytics: MatchAnalytics,
}

pub async fn load_snapshot(source: &SourceStore, target: &TargetStore) -> Result<MatchSnapshot> {
    let source_inventory = source.load_inventory().await?;
    let target_inventory = target.load_inventory().await?;
    let join = matcher::join_photos(&source_inventory, &target_inventory);
    let raw_matches = matcher::compute_raw_matches(&source_inventory, &target_inventory, &join);
    let analytics = compute_analytics(&raw_matches);
    Ok(MatchSnapshot {
        source: source_inventory,
        target: target_inventory,
        join,
        raw_matches,
        analytics,
    })
}

pub fn compute_analytics(raw_matches: &[RawFaceMatch]) -> MatchAnalytics {
    let ious: Vec<f64> = raw_matches.iter().map(|m| m.iou).collect();
    let dists: Vec<f64> = raw_matches.iter().map(|m| m.center_dist).collect();
    MatchAnalytics {
        total_raw_matches: raw_matches.len(),
        iou: summarize_metric(&ious, PassDirection::AtLeast, DEFAULT_MIN_IOU),
        center_dist: summarize_metric(&dists, PassDirection::AtMost, DEFAULT_MAX_CENTER_DIST),
    }
}

pub fn validate_thresholds(thresholds: &Thresholds) -> Result<()> {
    let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
    if !in_unit(thresholds.min_iou) {
        return Err(Error::InvalidThreshold(format!(
            "min_iou must lie in [0, 1], got {}",
            thresholds.min_iou
        )));
    }
    if !in_unit(thresholds.max_center_dist) {
        return Err(Error::InvalidThreshold(format!(
            "max_center_dist must lie in [0, 1], got {}",
            thresholds.max_center_dist
        )));
    }
    Ok(())
}

/// Pure function of the snapshot and the thresholds: no store access.
pub fn build_bundle(
    snapshot: &MatchSnapshot,
    thresholds: Thresholds,
    knobs: &ClassifyKnobs,
) -> AnalysisBundle {
    let aggregation = aggregate_matches(&snapshot.raw_matches, &thresholds);
    let buckets = classify(
        &snapshot.source,
        &snapshot.target,
        &snapshot.join,
        &snapshot.raw_matches,
        &aggregation,
        &thresholds,
        knobs,
    );

    let unique_unclustered_faces: usize = buckets
        .unclustered
        .iter()
        .flat_map(|p| p.faces.iter().map(|f| f.face_id.as_str()))
        .collect::<HashSet<&str>>()
        .len();
    let faces_to_create: usize = buckets.create_faces.iter().map(|p| p.face_count).sum();
    let clusters_to_merge: usize = buckets.merge.iter().map(|m| m.clusters.len()).sum();
    let validation_errors = buckets
        .validation
        .iter()
        .filter(|i| i.severity == IssueSeverity::Error)
        .count();
    let validation_warnings = buckets.validation.len() - validation_errors;
    let confidence_count = |band: Confidence| {
        buckets
            .applicable
            .iter()
            .filter(|p| p.confidence == band)
            .count()
    };

    let stats = json!({
        "total_raw_matches": snapshot.raw_matches.len(),
        "common_photos": snapshot.join.common.len(),
        "only_in_source": snapshot.join.only_in_source,
        "only_in_target": snapshot.join.only_in_target,
        "source_people_count": snapshot.source.persons.len(),
        "source_orphan_people": snapshot.source.orphans.len(),
        "source_malformed_faces": snapshot.source.malformed_faces,
        "source_missing_key_faces": snapshot.source.missing_key_faces,
        "target_clusters_count": snapshot.target.clusters.len(),
        "target_named_people_count": snapshot.target.persons.len(),
        "target_malformed_faces": snapshot.target.malformed_faces,
        "target_missing_key_faces": snapshot.target.missing_key_faces,
        "total_matches": buckets.all_matches.len(),
        "applicable_matches": buckets.applicable.len(),
        "high_confidence": confidence_count(Confidence::High),
        "medium_confidence": confidence_count(Confidence::Medium),
        "low_confidence": confidence_count(Confidence::Low),
        "total_unclustered_faces": unique_unclustered_faces,
        "people_with_unclustered_matches": buckets.unclustered.len(),
        "people_with_split_clusters": buckets.merge.len(),
        "total_clusters_to_merge": clusters_to_merge,
        "clusters_with_issues": buckets.validation.len(),
        "validation_errors": validation_errors,
        "validation_warnings": validation_warnings,
        "people_with_missing_faces": buckets.create_faces.len(),
        "total_faces_to_create": faces_to_create,
    });

    let Buckets {
        all_matches,
        applicable,
        unclustered,
        merge,
        validation,
        create_faces,
    } = buckets;

    let unclustered_stats = json!({
        "total_people_with_matches": unclustered.len(),
        "total_faces_to_assign": unique_unclustered_faces,
        "people_needing_creation": unclustered.iter().filter(|p| p.needs_person_creation).count(),
        "people_already_exist": unclustered.iter().filter(|p| !p.needs_person_creation).count(),
    });
    let merge_summary = json!({
        "people_with_split_clusters": merge.len(),
        "total_clusters_to_merge": clusters_to_merge,
        "potential_faces_affected": merge
            .iter()
            .flat_map(|m| m.clusters.iter().map(|c| c.total_faces))
            .sum::<i64>(),
    });
    let validation_summary = json!({
        "errors": validation_errors,
        "warnings": validation_warnings,
        "clusters_checked": snapshot.target.clusters.len(),
        "clusters_with_issues": validation.len(),
    });
    let create_faces_stats = json!({
        "total_people_with_missing": create_faces.len(),
        "total_faces_to_create": faces_to_create,
        "people_needing_creation": create_faces.iter().filter(|p| p.needs_person_creation).count(),
        "people_already_exist": create_faces.iter().filter(|p| !p.needs_person_creation).count(),
        "common_photos_checked": snapshot.join.common.len(),
    });

    AnalysisBundle {
        analytics: snapshot.analytics.clone(),
        raw_matches: snapshot.raw_matches.clone(),
        matches: MatchLists { all_matches, applicable },
        unclustered: UnclusteredSection { previews: unclustered, stats: unclustered_stats },
        merge: MergeSection { candidates: merge, summary: merge_summary },
        validation: ValidationSection { issues: validation, summary: validation_summary },
        create_faces: CreateFacesSection { previews: create_faces, stats: create_faces_stats },
        stats,
        thresholds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::face::{FaceRect, PhotoKey};
    use crate::model::fixtures::{source_with, target_with};

    fn snapshot_of(source: SourceInventory, target: TargetInventory) -> MatchSnapshot {
        let join = matcher::join_photos(&source, &target);
        let raw_matches = matcher::compute_raw_matches(&source, &target, &join);
        let analytics = compute_analytics(&raw_matches);
        MatchSnapshot { source, target, join, raw_matches, analytics }
    }

    #[test]
    fn empty_snapshot_yields_empty_buckets_and_fallback_suggestions() {
        let snapshot = snapshot_of(SourceInventory::default(), TargetInventory::default());
        let bundle = build_bundle(&snapshot, Thresholds::default(), &ClassifyKnobs::default());
        assert_eq!(bundle.analytics.total_raw_matches, 0);
        assert!(bundle.analytics.iou.histogram.counts.iter().all(|c| *c == 0));
        assert_eq!(bundle.analytics.iou.suggested_threshold, DEFAULT_MIN_IOU);
        assert_eq!(bundle.analytics.center_dist.suggested_threshold, DEFAULT_MAX_CENTER_DIST);
        assert!(bundle.matches.all_matches.is_empty());
        assert!(bundle.unclustered.previews.is_empty());
        assert!(bundle.merge.candidates.is_empty());
        assert!(bundle.validation.issues.is_empty());
        assert!(bundle.create_faces.previews.is_empty());
    }

    #[test]
    fn rebuilding_at_same_thresholds_is_byte_identical() {
        let photo = PhotoKey::new("a.jpg", 1);
        let r = FaceRect { x1: 0.1, y1: 0.1, x2: 0.4, y2: 0.4 };
        let near = FaceRect { x1: 0.12, y1: 0.12, x2: 0.42, y2: 0.42 };
        let source = source_with(vec![
            (1, "Alice", photo.clone(), r),
            (2, "Bob", PhotoKey::new("b.jpg", 2), r),
        ]);
        let target = target_with(
            vec![
                ("t1", Some("x"), photo.clone(), near),
                ("t2", None, PhotoKey::new("b.jpg", 2), near),
            ],
            vec![("x", None, 1)],
        );
        let snapshot = snapshot_of(source, target);

        let a = build_bundle(&snapshot, Thresholds::default(), &ClassifyKnobs::default());
        let b = build_bundle(&snapshot, Thresholds::default(), &ClassifyKnobs::default());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn raw_matches_do_not_depend_on_thresholds() {
        let photo = PhotoKey::new("a.jpg", 1);
        let r = FaceRect { x1: 0.1, y1: 0.1, x2: 0.4, y2: 0.4 };
        let shifted = FaceRect { x1: 0.2, y1: 0.2, x2: 0.5, y2: 0.5 };
        let source = source_with(vec![(1, "Alice", photo.clone(), r)]);
        let target = target_with(vec![("t1", None, photo.clone(), shifted)], vec![]);
        let snapshot = snapshot_of(source, target);

        let strict = build_bundle(
            &snapshot,
            Thresholds { min_iou: 0.9, max_center_dist: 0.05 },
            &ClassifyKnobs::default(),
        );
        let lax = build_bundle(
            &snapshot,
            Thresholds { min_iou: 0.0, max_center_dist: 1.0 },
            &ClassifyKnobs::default(),
        );
        assert_eq!(strict.raw_matches.len(), lax.raw_matches.len());
        // Filtering differs downstream of the shared raw list.
        assert!(strict.unclustered.previews.is_empty());
        assert_eq!(lax.unclustered.previews.len(), 1);
    }

    #[test]
    fn threshold_validation_rejects_out_of_range() {
        assert!(validate_thresholds(&Thresholds::default()).is_ok());
        assert!(validate_thresholds(&Thresholds { min_iou: -0.1, max_center_dist: 0.4 }).is_err());
        assert!(validate_thresholds(&Thresholds { min_iou: 0.3, max_center_dist: 1.5 }).is_err());
        assert!(validate_thresholds(&Thresholds { min_iou: f64::NAN, max_center_dist: 0.4 }).is_err());
    }
}
