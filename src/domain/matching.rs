use serde::{Deserialize, Serialize};

use crate::tools::stats::MetricSummary;

use super::face::{FaceRect, PhotoKey};

pub const DEFAULT_MIN_IOU: f64 = 0.30;
pub const DEFAULT_MAX_CENTER_DIST: f64 = 0.40;

/// The two matching thresholds. A raw match passes when
/// iou >= min_iou and center_dist <= max_center_dist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_iou: f64,
    pub max_center_dist: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_iou: DEFAULT_MIN_IOU,
            max_center_dist: DEFAULT_MAX_CENTER_DIST,
        }
    }
}

impl Thresholds {
    pub fn passes(&self, m: &RawFaceMatch) -> bool {
        m.iou >= self.min_iou && m.center_dist <= self.max_center_dist
    }
}

/// One source-face / target-face pairing on a shared photo, with both
/// metrics. Emitted un-thresholded; everything downstream filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFaceMatch {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub src_face_id: i64,
    pub tgt_face_id: String,
    pub asset_id: String,
    pub cluster_id: Option<String>,
    pub cluster_name: Option<String>,
    pub photo: PhotoKey,
    pub src_rect: FaceRect,
    pub tgt_rect: FaceRect,
    pub iou: f64,
    pub center_dist: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// high: >= 5 matches averaging >= 0.40 IoU; medium: >= 2 averaging
    /// >= 0.35; everything else low.
    pub fn grade(count: u64, avg_iou: f64) -> Self {
        if count >= 5 && avg_iou >= 0.40 {
            Confidence::High
        } else if count >= 2 && avg_iou >= 0.35 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Aggregated relationship between one source person and one target
/// cluster over all passing face matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairAggregate {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub cluster_id: String,
    pub cluster_name: Option<String>,
    pub face_matches: u64,
    pub avg_iou: f64,
    pub avg_center_dist: f64,
    pub confidence: Confidence,
    /// Up to 5 distinct filenames, most-overlapping first.
    pub sample_photos: Vec<String>,
}

/// One matched unclustered target face, with both rectangles for overlay
/// drawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnclusteredFaceDetail {
    pub face_id: String,
    pub asset_id: String,
    pub file_name: String,
    pub iou: f64,
    pub center_dist: f64,
    pub src_rect: FaceRect,
    pub tgt_rect: FaceRect,
}

/// Per source person: the unclustered target faces that matched it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnclusteredPreview {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub existing_person_id: Option<String>,
    pub needs_person_creation: bool,
    pub face_count: usize,
    pub avg_iou: f64,
    pub total_faces_in_source: u64,
    pub faces: Vec<UnclusteredFaceDetail>,
    pub sample_filenames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeClusterRef {
    pub cluster_id: String,
    pub cluster_name: Option<String>,
    pub matched_faces: u64,
    pub total_faces: i64,
}

/// A source person whose passing matches span two or more clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub total_source_faces: u64,
    /// Involved clusters, matched count descending.
    pub clusters: Vec<MergeClusterRef>,
    /// Share of the person's source faces covered by the matches, capped at 1.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePersonRef {
    pub person_id: i64,
    pub person_name: String,
    pub face_count: u64,
}

/// A cluster onto which several distinct source persons project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub cluster_id: String,
    pub cluster_name: Option<String>,
    pub total_faces_in_cluster: i64,
    pub matched_faces: u64,
    /// Contributing source persons, face count descending.
    pub persons: Vec<IssuePersonRef>,
    pub severity: IssueSeverity,
    pub sample_photos: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFaceDetail {
    pub asset_id: String,
    pub file_name: String,
    /// Normalized source rectangle; callers convert to pixels with the
    /// image dimensions below.
    pub rect: FaceRect,
    pub image_width: i64,
    pub image_height: i64,
}

/// Per source person: labeled faces the target never detected on photos
/// both sides know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFacePreview {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub existing_person_id: Option<String>,
    pub needs_person_creation: bool,
    pub face_count: usize,
    pub total_faces_in_source: u64,
    pub faces: Vec<CreateFaceDetail>,
    pub sample_filenames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAnalytics {
    pub total_raw_matches: usize,
    pub iou: MetricSummary,
    pub center_dist: MetricSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLists {
    /// Every pair aggregate, count then avg IoU descending.
    pub all_matches: Vec<PairAggregate>,
    /// The subset whose cluster is currently unnamed.
    pub applicable: Vec<PairAggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnclusteredSection {
    pub previews: Vec<UnclusteredPreview>,
    pub stats: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSection {
    pub candidates: Vec<MergeCandidate>,
    pub summary: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSection {
    pub issues: Vec<ValidationIssue>,
    pub summary: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFacesSection {
    pub previews: Vec<CreateFacePreview>,
    pub stats: serde_json::Value,
}

/// The complete result of one analysis run at one threshold pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub analytics: MatchAnalytics,
    pub raw_matches: Vec<RawFaceMatch>,
    pub matches: MatchLists,
    pub unclustered: UnclusteredSection,
    pub merge: MergeSection,
    pub validation: ValidationSection,
    pub create_faces: CreateFacesSection,
    pub stats: serde_json::Value,
    pub thresholds: Thresholds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_banding() {
        assert_eq!(Confidence::grade(5, 0.40), Confidence::High);
        assert_eq!(Confidence::grade(5, 0.39), Confidence::Medium);
        assert_eq!(Confidence::grade(4, 0.90), Confidence::Medium);
        assert_eq!(Confidence::grade(2, 0.35), Confidence::Medium);
        assert_eq!(Confidence::grade(2, 0.34), Confidence::Low);
        assert_eq!(Confidence::grade(1, 1.0), Confidence::Low);
    }

    #[test]
    fn threshold_pass_is_inclusive() {
        let rect = FaceRect { x1: 0.1, y1: 0.1, x2: 0.3, y2: 0.3 };
        let m = RawFaceMatch {
            src_person_id: 1,
            src_person_name: "a".into(),
            src_face_id: 1,
            tgt_face_id: "t".into(),
            asset_id: "asset".into(),
            cluster_id: None,
            cluster_name: None,
            photo: PhotoKey::new("p.jpg", 1),
            src_rect: rect,
            tgt_rect: rect,
            iou: 0.30,
            center_dist: 0.40,
        };
        let t = Thresholds::default();
        assert!(t.passes(&m));
        let below = RawFaceMatch { iou: 0.30 - 1e-9, ..m.clone() };
        assert!(!t.passes(&below));
        let far = RawFaceMatch { center_dist: 0.40 + 1e-9, ..m };
        assert!(!t.passes(&far));
    }
}
