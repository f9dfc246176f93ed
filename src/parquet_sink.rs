use crate::config::WarehouseConfig;
use crate::data::{rows_to_record_batch, NormalizedRow};
use crate::error::Error;
use crate::warehouse::RowSink;
use chrono::Utc;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::SessionContext;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only local sink: every batch becomes a new parquet file under
/// `{output_dir}/{table}/`.
pub struct ParquetSink {
    output_dir: PathBuf,
    seq: AtomicU64,
}

impl ParquetSink {
    pub fn new(config: &WarehouseConfig) -> Self {
        ParquetSink {
            output_dir: PathBuf::from(&config.output_dir),
            seq: AtomicU64::new(0),
        }
    }

    fn next_file(&self, table: &str) -> Result<PathBuf, Error> {
        let dir = self.output_dir.join(table);
        fs::create_dir_all(&dir)?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f");

        Ok(dir.join(format!("{}-{}-{}.parquet", table, stamp, seq)))
    }
}

#[async_trait::async_trait]
impl RowSink for ParquetSink {
    async fn insert_rows(&self, table: &str, rows: &[NormalizedRow]) -> Result<usize, Error> {
        let path = self.next_file(table)?;
        let batch = rows_to_record_batch(rows)?;

        let ctx = SessionContext::new();
        let df = ctx.read_batch(batch)?;
        df.write_parquet(
            &path.to_string_lossy(),
            DataFrameWriteOptions::new().with_single_file_output(true),
            None,
        )
        .await?;

        Ok(rows.len())
    }
}
