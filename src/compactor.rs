use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(plate: &str) -> VehicleTypeDraft {
        VehicleTypeDraft {
            profile: VehicleProfile {
                title: "Clio 5".into(),
                ..Default::default()
            },
            available: true,
            category: Some(CategoryKind::ShortTerm),
            price: Some(80_000),
            units: vec![UnitDraft {
                plate: plate.into(),
                available: true,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn compacts_past_threshold_only() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let id = Ulid::new();
        engine.create_vehicle_type(id, draft("COMP1")).await.unwrap();
        engine
            .add_unit(id, UnitDraft { plate: "COMP2".into(), available: true })
            .await
            .unwrap();
        engine
            .set_unit_availability(id, "COMP2", false)
            .await
            .unwrap();

        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        drop(engine);

        let engine = Engine::new(path).unwrap();
        let vt = engine.get_vehicle_type(id).await.unwrap();
        assert_eq!(vt.units.len(), 2);
        assert!(!vt.unit("COMP2").unwrap().available);
    }
}
