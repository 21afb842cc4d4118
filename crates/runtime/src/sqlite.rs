//! Reference telemetry sink backed by sqlite.
//!
//! Schema: `regions(name, id, duration, events, run_id)`. A `run_id` of
//! zero in the configuration means one is allocated from the store on the
//! first write.

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::config::DbConfig;
use crate::telemetry::{RegionStat, SinkError, TelemetrySink};

pub struct SqliteSink {
    conn: Mutex<Connection>,
    run_id: u64,
}

impl SqliteSink {
    pub fn open(config: &DbConfig) -> Result<Self, SinkError> {
        let conn = Connection::open(&config.name).map_err(store_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS regions (
                 name TEXT NOT NULL,
                 id INTEGER NOT NULL,
                 duration INTEGER NOT NULL,
                 events INTEGER NOT NULL,
                 run_id INTEGER NOT NULL
             )",
            [],
        )
        .map_err(store_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS prototypes (
                 function_name TEXT NOT NULL,
                 serialized_ir TEXT NOT NULL,
                 run_id INTEGER NOT NULL
             )",
            [],
        )
        .map_err(store_err)?;

        let run_id = if config.run_id != 0 {
            config.run_id
        } else {
            conn.query_row(
                "SELECT COALESCE(MAX(run_id), 0) + 1 FROM regions",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(store_err)? as u64
        };

        Ok(Self {
            conn: Mutex::new(conn),
            run_id,
        })
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Regression corpus: one record per prototype seen this run.
    pub fn store_prototypes(&self, prototypes: &[(String, String)]) -> Result<(), SinkError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO prototypes (function_name, serialized_ir, run_id)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(store_err)?;
            for (name, ir) in prototypes {
                stmt.execute(params![name, ir, self.run_id as i64])
                    .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }
}

impl TelemetrySink for SqliteSink {
    fn store_run(&self, regions: &[(u64, RegionStat)]) -> Result<(), SinkError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO regions (name, id, duration, events, run_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(store_err)?;
            for (id, stat) in regions {
                stmt.execute(params![
                    stat.name,
                    *id as i64,
                    stat.duration_us as i64,
                    stat.events as i64,
                    self.run_id as i64,
                ])
                .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }
}

fn store_err(err: rusqlite::Error) -> SinkError {
    SinkError::Store(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::region;

    fn temp_db(name: &str) -> DbConfig {
        let mut config = DbConfig::default();
        config.name = std::env::temp_dir()
            .join(format!("ostinato-test-{name}-{}.db", std::process::id()))
            .to_string_lossy()
            .into_owned();
        let _ = std::fs::remove_file(&config.name);
        config
    }

    #[test]
    fn stores_and_allocates_run_ids() {
        let config = temp_db("runid");

        let sink = SqliteSink::open(&config).unwrap();
        assert_eq!(sink.run_id(), 1);
        let rows = vec![(
            region::START,
            RegionStat {
                name: "START".to_string(),
                duration_us: 1234,
                events: 1,
            },
        )];
        sink.store_run(&rows).unwrap();
        drop(sink);

        // A second run allocates the next id.
        let sink = SqliteSink::open(&config).unwrap();
        assert_eq!(sink.run_id(), 2);

        let _ = std::fs::remove_file(&config.name);
    }

    #[test]
    fn explicit_run_id_is_kept() {
        let mut config = temp_db("explicit");
        config.run_id = 99;
        let sink = SqliteSink::open(&config).unwrap();
        assert_eq!(sink.run_id(), 99);
        let _ = std::fs::remove_file(&config.name);
    }
}
