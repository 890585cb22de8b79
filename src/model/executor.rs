use std::collections::HashMap;

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::domain::face::{normalize_person_name, TargetPerson};
use crate::domain::progress::{
    ApplyErrorKind, ApplyItemResult, ApplyProgress, ApplyReport, ApplyStatus,
};
use crate::tools::log::{log_error, log_info, LogServiceType};

use super::error::Error;
use super::target_api::{CreateFaceCall, TargetService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameItem {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignItem {
    pub src_person_id: i64,
    pub src_person_name: String,
    pub face_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFaceItem {
    pub asset_id: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub image_width: i64,
    pub image_height: i64,
}

/// Advisory acknowledgements (merge / fix): no remote operation exists,
/// the item only transitions through the progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckItem {
    pub label: String,
}

/// Applies caller-selected operations against the target service, one
/// item at a time, in submission order, without retries.
pub struct Executor<'a> {
    service: &'a dyn TargetService,
    name_match_case_insensitive: bool,
}

/// Per-batch bookkeeping: the ordered item records plus the optional
/// progress stream with its monotonically increasing sequence.
struct Batch {
    batch_id: String,
    items: Vec<ApplyItemResult>,
    sender: Option<UnboundedSender<ApplyProgress>>,
    seq: u64,
    terminal_error: Option<String>,
}

impl Batch {
    fn new(labels: Vec<String>, sender: Option<UnboundedSender<ApplyProgress>>) -> Self {
        let items = labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| ApplyItemResult {
                index,
                label,
                status: ApplyStatus::Pending,
                error_kind: None,
                message: None,
            })
            .collect();
        Self {
            batch_id: nanoid!(),
            items,
            sender,
            seq: 0,
            terminal_error: None,
        }
    }

    fn transition(
        &mut self,
        index: usize,
        status: ApplyStatus,
        error_kind: Option<ApplyErrorKind>,
        message: Option<String>,
    ) {
        let total = self.items.len();
        let item = &mut self.items[index];
        item.status = status;
        item.error_kind = error_kind;
        item.message = message;
        if let Some(sender) = &self.sender {
            self.seq += 1;
            let _ = sender.send(ApplyProgress {
                seq: self.seq,
                batch_id: self.batch_id.clone(),
                index,
                total,
                label: item.label.clone(),
                status,
                error_kind: item.error_kind,
                message: item.message.clone(),
            });
        }
    }

    fn abort_remaining(&mut self, from: usize, message: &str) {
        for index in from..self.items.len() {
            if self.items[index].status == ApplyStatus::Pending {
                self.transition(
                    index,
                    ApplyStatus::Error,
                    Some(ApplyErrorKind::Aborted),
                    Some(message.to_string()),
                );
            }
        }
        self.terminal_error = Some(message.to_string());
    }

    fn into_report(self, dry_run: bool) -> ApplyReport {
        let count = |status: ApplyStatus| self.items.iter().filter(|i| i.status == status).count();
        let report = ApplyReport {
            batch_id: self.batch_id,
            dry_run,
            total: self.items.len(),
            success_count: count(ApplyStatus::Success),
            failed_count: count(ApplyStatus::Error),
            skipped_count: count(ApplyStatus::Skipped),
            cancelled_remaining: count(ApplyStatus::Pending),
            items: self.items,
            terminal_error: self.terminal_error,
        };
        log_info(
            LogServiceType::Executor,
            format!(
                "Batch {} done: {} total, {} ok, {} failed, {} skipped, {} cancelled",
                report.batch_id,
                report.total,
                report.success_count,
                report.failed_count,
                report.skipped_count,
                report.cancelled_remaining
            ),
        );
        report
    }
}

fn error_kind(error: &Error, fallback: ApplyErrorKind) -> ApplyErrorKind {
    match error {
        Error::Reqwest(e) if e.is_timeout() => ApplyErrorKind::Timeout,
        Error::Reqwest(e) if e.is_connect() => ApplyErrorKind::Network,
        Error::TargetApiStatus(404, _) => ApplyErrorKind::NotFound,
        Error::TargetApiStatus(..) => fallback,
        Error::TargetApiNotConfigured => ApplyErrorKind::Network,
        _ => fallback,
    }
}

/// Only a transport collapse aborts the rest of the batch; item-level
/// failures (timeouts included) let the batch continue.
fn is_terminal(kind: ApplyErrorKind) -> bool {
    kind == ApplyErrorKind::Network
}

impl<'a> Executor<'a> {
    pub fn new(service: &'a dyn TargetService, name_match_case_insensitive: bool) -> Self {
        Self {
            service,
            name_match_case_insensitive,
        }
    }

    fn find_person<'p>(&self, people: &'p [TargetPerson], name: &str) -> Option<&'p TargetPerson> {
        let wanted = normalize_person_name(name, self.name_match_case_insensitive);
        people
            .iter()
            .filter(|p| !p.name.trim().is_empty())
            .find(|p| normalize_person_name(&p.name, self.name_match_case_insensitive) == wanted)
    }

    /// Renames unnamed clusters to the chosen source-person names. Never
    /// overwrites an existing name: a named cluster fails with
    /// `already_named`, which also makes a second application of the same
    /// batch report `already_named` instead of a silent double-apply.
    pub async fn rename_clusters(
        &self,
        items: Vec<RenameItem>,
        dry_run: bool,
        token: &CancellationToken,
        progress: Option<UnboundedSender<ApplyProgress>>,
    ) -> ApplyReport {
        let labels = items
            .iter()
            .map(|i| format!("{} -> {}", i.cluster_id, i.src_person_name))
            .collect();
        let mut batch = Batch::new(labels, progress);

        let mut names: HashMap<String, String> = match self.service.get_people().await {
            Ok(people) => people.into_iter().map(|p| (p.id, p.name)).collect(),
            Err(error) => {
                log_error(
                    LogServiceType::Executor,
                    format!("Rename batch could not list target people: {}", error),
                );
                batch.abort_remaining(0, &format!("could not list target people: {}", error));
                return batch.into_report(dry_run);
            }
        };

        for (index, item) in items.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }
            batch.transition(index, ApplyStatus::Processing, None, None);

            match names.get(&item.cluster_id) {
                None => {
                    batch.transition(
                        index,
                        ApplyStatus::Error,
                        Some(ApplyErrorKind::NotFound),
                        Some(format!("cluster {} no longer exists", item.cluster_id)),
                    );
                }
                Some(name) if !name.trim().is_empty() => {
                    batch.transition(
                        index,
                        ApplyStatus::Error,
                        Some(ApplyErrorKind::AlreadyNamed),
                        Some(format!("cluster {} is already named {}", item.cluster_id, name)),
                    );
                }
                Some(_) if dry_run => {
                    names.insert(item.cluster_id.clone(), item.src_person_name.clone());
                    batch.transition(
                        index,
                        ApplyStatus::Success,
                        None,
                        Some("would_rename".to_string()),
                    );
                }
                Some(_) => match self
                    .service
                    .rename_person(&item.cluster_id, &item.src_person_name)
                    .await
                {
                    Ok(()) => {
                        names.insert(item.cluster_id.clone(), item.src_person_name.clone());
                        batch.transition(
                            index,
                            ApplyStatus::Success,
                            None,
                            Some("applied".to_string()),
                        );
                    }
                    Err(error) => {
                        let kind = error_kind(&error, ApplyErrorKind::Other);
                        batch.transition(
                            index,
                            ApplyStatus::Error,
                            Some(kind),
                            Some(error.to_string()),
                        );
                        if is_terminal(kind) {
                            batch.abort_remaining(index + 1, &error.to_string());
                            break;
                        }
                    }
                },
            }
        }

        batch.into_report(dry_run)
    }

    /// Assigns unclustered faces person by person, face by face: find or
    /// create the target person, then one reassign call per face so the
    /// progress stream stays face-granular.
    pub async fn assign_unclustered_faces(
        &self,
        items: Vec<AssignItem>,
        dry_run: bool,
        token: &CancellationToken,
        progress: Option<UnboundedSender<ApplyProgress>>,
    ) -> ApplyReport {
        let labels = items
            .iter()
            .flat_map(|i| {
                i.face_ids
                    .iter()
                    .map(move |f| format!("{} <- {}", i.src_person_name, f))
            })
            .collect();
        let mut batch = Batch::new(labels, progress);

        let mut people: Vec<TargetPerson> = match self.service.get_people().await {
            Ok(people) => people,
            Err(error) => {
                log_error(
                    LogServiceType::Executor,
                    format!("Assign batch could not list target people: {}", error),
                );
                batch.abort_remaining(0, &format!("could not list target people: {}", error));
                return batch.into_report(dry_run);
            }
        };

        let mut index = 0;
        'items: for item in &items {
            // Resolve the person once per item; read-your-writes ordering
            // makes this sequential on purpose.
            let mut person_id = self.find_person(&people, &item.src_person_name).map(|p| p.id.clone());
            let mut person_error: Option<(ApplyErrorKind, String)> = None;
            if person_id.is_none() && !dry_run {
                match self.service.create_person(&item.src_person_name).await {
                    Ok(person) => {
                        person_id = Some(person.id.clone());
                        people.push(person);
                    }
                    Err(error) => {
                        person_error = Some((
                            error_kind(&error, ApplyErrorKind::CreateFailed),
                            format!("failed to create person: {}", error),
                        ));
                    }
                }
            }

            for face_id in &item.face_ids {
                if token.is_cancelled() {
                    break 'items;
                }
                batch.transition(index, ApplyStatus::Processing, None, None);

                if let Some((kind, message)) = &person_error {
                    batch.transition(index, ApplyStatus::Error, Some(*kind), Some(message.clone()));
                    if is_terminal(*kind) {
                        batch.abort_remaining(index + 1, message);
                        break 'items;
                    }
                    index += 1;
                    continue;
                }

                if dry_run {
                    batch.transition(
                        index,
                        ApplyStatus::Success,
                        None,
                        Some("would_assign".to_string()),
                    );
                    index += 1;
                    continue;
                }

                let person = person_id.as_deref().unwrap_or_default();
                match self.service.reassign_face(face_id, person).await {
                    Ok(()) => {
                        batch.transition(
                            index,
                            ApplyStatus::Success,
                            None,
                            Some("assigned".to_string()),
                        );
                    }
                    Err(error) => {
                        let kind = error_kind(&error, ApplyErrorKind::AssignFailed);
                        batch.transition(
                            index,
                            ApplyStatus::Error,
                            Some(kind),
                            Some(error.to_string()),
                        );
                        if is_terminal(kind) {
                            batch.abort_remaining(index + 1, &error.to_string());
                            break 'items;
                        }
                    }
                }
                index += 1;
            }
        }

        batch.into_report(dry_run)
    }

    /// Creates target-side faces the detector never found, one call per
    /// face, after a single find-or-create of the target person.
    pub async fn create_faces(
        &self,
        src_person_name: &str,
        faces: Vec<CreateFaceItem>,
        dry_run: bool,
        token: &CancellationToken,
        progress: Option<UnboundedSender<ApplyProgress>>,
    ) -> ApplyReport {
        let labels = faces
            .iter()
            .map(|f| format!("{} @ {}", src_person_name, f.asset_id))
            .collect();
        let mut batch = Batch::new(labels, progress);

        let people = match self.service.get_people().await {
            Ok(people) => people,
            Err(error) => {
                log_error(
                    LogServiceType::Executor,
                    format!("Create-faces batch could not list target people: {}", error),
                );
                batch.abort_remaining(0, &format!("could not list target people: {}", error));
                return batch.into_report(dry_run);
            }
        };

        // Reuse an existing person with this name rather than creating a
        // duplicate; create only when truly absent.
        let mut person_id = self.find_person(&people, src_person_name).map(|p| p.id.clone());
        if person_id.is_none() && !dry_run {
            match self.service.create_person(src_person_name).await {
                Ok(person) => person_id = Some(person.id),
                Err(error) => {
                    batch.abort_remaining(0, &format!("failed to create person: {}", error));
                    return batch.into_report(dry_run);
                }
            }
        }

        for (index, face) in faces.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }
            batch.transition(index, ApplyStatus::Processing, None, None);

            if dry_run {
                batch.transition(
                    index,
                    ApplyStatus::Success,
                    None,
                    Some("would_create".to_string()),
                );
                continue;
            }

            let call = CreateFaceCall {
                asset_id: face.asset_id.clone(),
                person_id: person_id.clone().unwrap_or_default(),
                x: face.x,
                y: face.y,
                width: face.width,
                height: face.height,
                image_width: face.image_width,
                image_height: face.image_height,
            };
            match self.service.create_face(&call).await {
                Ok(()) => {
                    batch.transition(
                        index,
                        ApplyStatus::Success,
                        None,
                        Some("created".to_string()),
                    );
                }
                Err(error) => {
                    let kind = error_kind(&error, ApplyErrorKind::CreateFailed);
                    batch.transition(
                        index,
                        ApplyStatus::Error,
                        Some(kind),
                        Some(error.to_string()),
                    );
                    if is_terminal(kind) {
                        batch.abort_remaining(index + 1, &error.to_string());
                        break;
                    }
                }
            }
        }

        batch.into_report(dry_run)
    }

    /// Merge and fix advisories have no target API; items are acknowledged
    /// through the progress stream and nothing is called remotely.
    pub async fn acknowledge(
        &self,
        items: Vec<AckItem>,
        token: &CancellationToken,
        progress: Option<UnboundedSender<ApplyProgress>>,
    ) -> ApplyReport {
        let labels = items.iter().map(|i| i.label.clone()).collect();
        let mut batch = Batch::new(labels, progress);

        for index in 0..items.len() {
            if token.is_cancelled() {
                break;
            }
            batch.transition(index, ApplyStatus::Processing, None, None);
            batch.transition(
                index,
                ApplyStatus::Success,
                None,
                Some("acknowledged".to_string()),
            );
        }

        batch.into_report(false)
    }
}
