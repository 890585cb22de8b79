use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio_postgres::NoTls;

use crate::domain::face::{
    Cluster, FaceRect, PhotoKey, TargetAsset, TargetFace, TargetInventory, TargetPerson,
    TargetTotals,
};
use crate::tools::log::{log_error, log_info, LogServiceType};

use super::super::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TargetDbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TargetFaceRow {
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub face_id: String,
    pub asset_id: String,
    pub cluster_id: Option<String>,
    pub cluster_name: Option<String>,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub image_width: Option<i64>,
    pub image_height: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TargetAssetRow {
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub asset_id: String,
    pub image_width: i64,
    pub image_height: i64,
}

pub struct TargetStore {
    client: tokio_postgres::Client,
}

impl TargetStore {
    pub async fn connect(config: &TargetDbConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.name)
            .user(&config.user)
            .password(&config.password)
            .connect_timeout(Duration::from_secs(10));

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| Error::TargetUnreachable(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                log_error(
                    LogServiceType::Database,
                    format!("Target store connection ended: {}", error),
                );
            }
        });
        log_info(
            LogServiceType::Database,
            format!("Target store connected: {}:{}/{}", config.host, config.port, config.name),
        );
        Ok(Self { client })
    }

    pub async fn totals(&self) -> Result<TargetTotals> {
        let count = |sql: &'static str| async move {
            let row = self.client.query_one(sql, &[]).await?;
            Ok::<i64, Error>(row.get::<_, i64>(0))
        };
        let total_persons = count("SELECT COUNT(*) FROM person").await?;
        let named_persons =
            count("SELECT COUNT(*) FROM person WHERE name IS NOT NULL AND name != ''").await?;
        let unique_named_persons = count(
            "SELECT COUNT(DISTINCT name) FROM person WHERE name IS NOT NULL AND name != ''",
        )
        .await?;
        let total_faces =
            count("SELECT COUNT(*) FROM asset_face WHERE \"deletedAt\" IS NULL").await?;
        let total_assets = count("SELECT COUNT(*) FROM asset WHERE \"deletedAt\" IS NULL").await?;
        Ok(TargetTotals {
            total_persons,
            named_persons,
            unique_named_persons,
            unnamed_persons: total_persons - named_persons,
            total_faces,
            total_assets,
        })
    }

    async fn face_rows(&self) -> Result<Vec<TargetFaceRow>> {
        let rows = self
            .client
            .query(
                "SELECT
                    a.\"originalFileName\",
                    e.\"fileSizeInByte\",
                    af.id::text,
                    a.id::text,
                    af.\"personId\"::text,
                    p.name,
                    af.\"boundingBoxX1\",
                    af.\"boundingBoxY1\",
                    af.\"boundingBoxX2\",
                    af.\"boundingBoxY2\",
                    af.\"imageWidth\",
                    af.\"imageHeight\"
                FROM asset_face af
                JOIN asset a ON af.\"assetId\" = a.id
                LEFT JOIN asset_exif e ON a.id = e.\"assetId\"
                LEFT JOIN person p ON af.\"personId\" = p.id
                WHERE af.\"deletedAt\" IS NULL
                  AND a.\"deletedAt\" IS NULL
                  AND (p.id IS NULL OR p.\"isHidden\" = false)",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| TargetFaceRow {
                file_name: row.get(0),
                file_size: row.get(1),
                face_id: row.get(2),
                asset_id: row.get(3),
                cluster_id: row.get(4),
                cluster_name: row.get(5),
                x1: row.get::<_, i32>(6) as f64,
                y1: row.get::<_, i32>(7) as f64,
                x2: row.get::<_, i32>(8) as f64,
                y2: row.get::<_, i32>(9) as f64,
                image_width: row.get::<_, Option<i32>>(10).map(|v| v as i64),
                image_height: row.get::<_, Option<i32>>(11).map(|v| v as i64),
            })
            .collect())
    }

    async fn cluster_rows(&self) -> Result<Vec<Cluster>> {
        let rows = self
            .client
            .query(
                "SELECT p.id::text, p.name, COUNT(af.id)
                FROM person p
                LEFT JOIN asset_face af
                    ON p.id = af.\"personId\" AND af.\"deletedAt\" IS NULL
                WHERE p.\"isHidden\" = false
                GROUP BY p.id, p.name",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Cluster {
                id: row.get(0),
                name: row.get(1),
                total_faces: row.get(2),
            })
            .collect())
    }

    async fn person_rows(&self) -> Result<Vec<TargetPerson>> {
        let rows = self
            .client
            .query(
                "SELECT p.id::text, p.name
                FROM person p
                WHERE p.\"isHidden\" = false
                  AND p.name IS NOT NULL AND p.name != ''
                ORDER BY p.id",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| TargetPerson {
                id: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    async fn asset_rows(&self) -> Result<Vec<TargetAssetRow>> {
        let rows = self
            .client
            .query(
                "SELECT
                    a.\"originalFileName\",
                    e.\"fileSizeInByte\",
                    a.id::text,
                    COALESCE(e.\"exifImageWidth\", 1920),
                    COALESCE(e.\"exifImageHeight\", 1080)
                FROM asset a
                LEFT JOIN asset_exif e ON a.id = e.\"assetId\"
                WHERE a.\"deletedAt\" IS NULL
                  AND a.type = 'IMAGE'",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| TargetAssetRow {
                file_name: row.get(0),
                file_size: row.get(1),
                asset_id: row.get(2),
                image_width: row.get::<_, i32>(3) as i64,
                image_height: row.get::<_, i32>(4) as i64,
            })
            .collect())
    }

    pub async fn load_inventory(&self) -> Result<TargetInventory> {
        let face_rows = self.face_rows().await?;
        let cluster_rows = self.cluster_rows().await?;
        let person_rows = self.person_rows().await?;
        let asset_rows = self.asset_rows().await?;
        let totals = self.totals().await?;

        let inventory =
            build_target_inventory(face_rows, cluster_rows, person_rows, asset_rows, totals);
        log_info(
            LogServiceType::Database,
            format!(
                "Target inventory: {} clusters, {} photos with faces, {} assets, {} malformed, {} without photo key",
                inventory.clusters.len(),
                inventory.faces_by_photo.len(),
                inventory.assets_by_photo.len(),
                inventory.malformed_faces,
                inventory.missing_key_faces
            ),
        );
        Ok(inventory)
    }
}

pub fn build_target_inventory(
    face_rows: Vec<TargetFaceRow>,
    cluster_rows: Vec<Cluster>,
    person_rows: Vec<TargetPerson>,
    asset_rows: Vec<TargetAssetRow>,
    totals: TargetTotals,
) -> TargetInventory {
    let mut malformed = 0u64;
    let mut missing_key = 0u64;

    let mut faces_by_photo: HashMap<PhotoKey, Vec<TargetFace>> = HashMap::new();
    for row in face_rows {
        let photo = match (&row.file_name, row.file_size) {
            (Some(name), Some(size)) if !name.is_empty() => PhotoKey::new(name, size),
            _ => {
                missing_key += 1;
                continue;
            }
        };
        let rect = match (row.image_width, row.image_height) {
            (Some(w), Some(h)) => FaceRect::from_pixels(row.x1, row.y1, row.x2, row.y2, w, h),
            _ => None,
        };
        let Some(rect) = rect else {
            malformed += 1;
            continue;
        };
        faces_by_photo.entry(photo.clone()).or_default().push(TargetFace {
            id: row.face_id,
            asset_id: row.asset_id,
            photo,
            rect,
            cluster_id: row.cluster_id,
        });
    }
    for faces in faces_by_photo.values_mut() {
        faces.sort_by(|a, b| a.id.cmp(&b.id));
    }

    // The target schema stores '' for unnamed clusters; read that as None.
    let clusters: BTreeMap<String, Cluster> = cluster_rows
        .into_iter()
        .map(|mut c| {
            c.name = c.name.filter(|n| !n.trim().is_empty());
            (c.id.clone(), c)
        })
        .collect();

    let mut assets_by_photo: HashMap<PhotoKey, TargetAsset> = HashMap::new();
    for row in asset_rows {
        let photo = match (&row.file_name, row.file_size) {
            (Some(name), Some(size)) if !name.is_empty() => PhotoKey::new(name, size),
            _ => continue,
        };
        assets_by_photo.insert(
            photo,
            TargetAsset {
                asset_id: row.asset_id,
                image_width: row.image_width,
                image_height: row.image_height,
            },
        );
    }

    TargetInventory {
        faces_by_photo,
        clusters,
        persons: person_rows,
        assets_by_photo,
        totals,
        malformed_faces: malformed,
        missing_key_faces: missing_key,
    }
}
