use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use tokio_rusqlite::Connection;

use crate::domain::face::{
    normalize_person_name, FaceRect, OrphanPerson, PhotoKey, SourceFace, SourceInventory,
    SourcePerson, SourceTotals,
};
use crate::tools::log::{log_info, LogServiceType};

use super::super::error::{Error, Result};

/// Read side of the legacy photo database. One face row as it comes off
/// the wire, before any validation.
#[derive(Debug, Clone)]
pub struct SourceFaceRow {
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub person_id: i64,
    pub person_name: String,
    pub face_id: i64,
    pub rect_top: Option<f64>,
    pub rect_left: Option<f64>,
    pub rect_width: Option<f64>,
    pub rect_height: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SourcePersonRow {
    pub person_id: i64,
    pub person_name: String,
    pub historical_item_count: i64,
    pub face_count: i64,
}

pub struct SourceStore {
    connection: Connection,
    path: PathBuf,
}

impl SourceStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(Error::SourceUnreachable(format!(
                "Database not found: {}",
                path.display()
            )));
        }
        let connection = Connection::open(&path)
            .await
            .map_err(|e| Error::SourceUnreachable(e.to_string()))?;

        // Cheap probe so a wrong file fails at connect time, not mid-read.
        connection
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM Person", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
            .map_err(|e| Error::SchemaUnexpected(e.to_string()))?;

        log_info(
            LogServiceType::Database,
            format!("Source store opened: {}", path.display()),
        );
        Ok(Self { connection, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn totals(&self) -> Result<SourceTotals> {
        let totals = self
            .connection
            .call(|conn| {
                let count = |sql: &str| -> rusqlite::Result<i64> {
                    conn.query_row(sql, [], |row| row.get(0))
                };
                Ok(SourceTotals {
                    total_persons: count("SELECT COUNT(*) FROM Person")?,
                    named_persons: count(
                        "SELECT COUNT(*) FROM Person WHERE Person_Name IS NOT NULL AND TRIM(Person_Name) != ''",
                    )?,
                    unique_named_persons: count(
                        "SELECT COUNT(DISTINCT TRIM(LOWER(Person_Name))) FROM Person WHERE Person_Name IS NOT NULL AND TRIM(Person_Name) != ''",
                    )?,
                    total_faces: count("SELECT COUNT(*) FROM Face")?,
                    total_items: count("SELECT COUNT(*) FROM Item")?,
                })
            })
            .await?;
        Ok(totals)
    }

    async fn face_rows(&self) -> Result<Vec<SourceFaceRow>> {
        let rows = self
            .connection
            .call(|conn| {
                let mut query = conn.prepare(
                    "SELECT
                        i.Item_FileName,
                        i.Item_FileSize,
                        p.Person_Id,
                        p.Person_Name,
                        f.Face_Id,
                        f.Face_Rect_Top,
                        f.Face_Rect_Left,
                        f.Face_Rect_Width,
                        f.Face_Rect_Height
                    FROM Face f
                    JOIN Item i ON f.Face_ItemId = i.Item_Id
                    JOIN Person p ON f.Face_PersonId = p.Person_Id
                    WHERE p.Person_Name IS NOT NULL
                      AND TRIM(p.Person_Name) != ''",
                )?;
                let rows = query.query_map([], |row| {
                    Ok(SourceFaceRow {
                        file_name: row.get(0)?,
                        file_size: row.get(1)?,
                        person_id: row.get(2)?,
                        person_name: row.get(3)?,
                        face_id: row.get(4)?,
                        rect_top: row.get(5)?,
                        rect_left: row.get(6)?,
                        rect_width: row.get(7)?,
                        rect_height: row.get(8)?,
                    })
                })?;
                let rows: Vec<SourceFaceRow> =
                    rows.collect::<std::result::Result<Vec<SourceFaceRow>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn person_rows(&self) -> Result<Vec<SourcePersonRow>> {
        let rows = self
            .connection
            .call(|conn| {
                let mut query = conn.prepare(
                    "SELECT
                        p.Person_Id,
                        p.Person_Name,
                        IFNULL(p.Person_ItemCount, 0),
                        (SELECT COUNT(*) FROM Face f WHERE f.Face_PersonId = p.Person_Id)
                    FROM Person p
                    WHERE p.Person_Name IS NOT NULL
                      AND TRIM(p.Person_Name) != ''",
                )?;
                let rows = query.query_map([], |row| {
                    Ok(SourcePersonRow {
                        person_id: row.get(0)?,
                        person_name: row.get(1)?,
                        historical_item_count: row.get(2)?,
                        face_count: row.get(3)?,
                    })
                })?;
                let rows: Vec<SourcePersonRow> =
                    rows.collect::<std::result::Result<Vec<SourcePersonRow>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn load_inventory(&self) -> Result<SourceInventory> {
        let face_rows = self
            .face_rows()
            .await
            .map_err(|e| Error::SchemaUnexpected(e.to_string()))?;
        let person_rows = self
            .person_rows()
            .await
            .map_err(|e| Error::SchemaUnexpected(e.to_string()))?;
        let totals = self.totals().await?;

        let inventory = build_source_inventory(face_rows, person_rows, totals)?;
        log_info(
            LogServiceType::Database,
            format!(
                "Source inventory: {} persons, {} photos with faces, {} malformed, {} without photo key",
                inventory.persons.len(),
                inventory.faces_by_photo.len(),
                inventory.malformed_faces,
                inventory.missing_key_faces
            ),
        );
        Ok(inventory)
    }
}

/// Turns raw rows into the published inventory: validates rectangles,
/// collapses equivalent person names, tallies what was dropped.
pub fn build_source_inventory(
    face_rows: Vec<SourceFaceRow>,
    person_rows: Vec<SourcePersonRow>,
    totals: SourceTotals,
) -> Result<SourceInventory> {
    let row_count = face_rows.len();
    let mut malformed = 0u64;
    let mut missing_key = 0u64;
    let mut seen_face_ids: HashSet<i64> = HashSet::new();
    let mut usable: Vec<(i64, String, SourceFace)> = Vec::new();

    for row in face_rows {
        if !seen_face_ids.insert(row.face_id) {
            return Err(Error::IdentifierCollision(format!(
                "duplicate source face id {}",
                row.face_id
            )));
        }
        let photo = match (&row.file_name, row.file_size) {
            (Some(name), Some(size)) if !name.is_empty() => PhotoKey::new(name, size),
            _ => {
                missing_key += 1;
                continue;
            }
        };
        let rect = match (row.rect_top, row.rect_left, row.rect_width, row.rect_height) {
            (Some(top), Some(left), Some(width), Some(height)) => {
                FaceRect::from_legacy(top, left, width, height)
            }
            _ => None,
        };
        let Some(rect) = rect else {
            malformed += 1;
            continue;
        };
        usable.push((
            row.person_id,
            row.person_name,
            SourceFace {
                id: row.face_id,
                person_id: row.person_id,
                photo,
                rect,
            },
        ));
    }

    if row_count > 0 && usable.is_empty() {
        return Err(Error::SchemaUnexpected(format!(
            "{} source face rows read, none usable ({} malformed, {} without photo key)",
            row_count, malformed, missing_key
        )));
    }

    // Collapse person-name variants that differ only in case or
    // surrounding whitespace. The variant owning the most faces keeps its
    // id and display name; ties go to the smallest id.
    let mut variant_counts: HashMap<i64, (String, u64)> = HashMap::new();
    for (person_id, person_name, _) in &usable {
        let entry = variant_counts
            .entry(*person_id)
            .or_insert_with(|| (person_name.trim().to_string(), 0));
        entry.1 += 1;
    }
    let mut by_normalized: HashMap<String, Vec<i64>> = HashMap::new();
    for (person_id, (name, _)) in &variant_counts {
        by_normalized
            .entry(normalize_person_name(name, true))
            .or_default()
            .push(*person_id);
    }
    let mut canonical_of: HashMap<i64, i64> = HashMap::new();
    let mut persons: BTreeMap<i64, SourcePerson> = BTreeMap::new();
    for ids in by_normalized.values() {
        let canonical = ids
            .iter()
            .copied()
            .max_by_key(|id| (variant_counts[id].1, std::cmp::Reverse(*id)))
            .unwrap_or(ids[0]);
        let total: u64 = ids.iter().map(|id| variant_counts[id].1).sum();
        for id in ids {
            canonical_of.insert(*id, canonical);
        }
        persons.insert(
            canonical,
            SourcePerson {
                id: canonical,
                name: variant_counts[&canonical].0.clone(),
                face_count: total,
            },
        );
    }

    let mut faces_by_photo: HashMap<PhotoKey, Vec<SourceFace>> = HashMap::new();
    for (person_id, _, mut face) in usable {
        face.person_id = canonical_of[&person_id];
        faces_by_photo.entry(face.photo.clone()).or_default().push(face);
    }
    for faces in faces_by_photo.values_mut() {
        faces.sort_by_key(|f| f.id);
    }

    let orphans: Vec<OrphanPerson> = person_rows
        .into_iter()
        .filter(|row| row.face_count == 0)
        .map(|row| OrphanPerson {
            id: row.person_id,
            name: row.person_name.trim().to_string(),
            historical_item_count: row.historical_item_count,
        })
        .collect();

    Ok(SourceInventory {
        persons,
        faces_by_photo,
        orphans,
        totals,
        malformed_faces: malformed,
        missing_key_faces: missing_key,
    })
}
