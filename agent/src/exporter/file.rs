use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use bon::Builder;
use chrono::Utc;
use flamegraph::Frame;

use crate::exporter::{Encoder, Exporter};
use crate::Result;

/// Destination and naming for on-disk snapshots.
#[derive(Debug, Clone, Builder)]
pub struct FileConfig {
    /// Destination directory, created if missing.
    pub dir: PathBuf,
    #[builder(default = "flare".to_string())]
    pub prefix: String,
    /// Gzip the output and append `.gz` to the filename.
    #[builder(default)]
    pub compress: bool,
    /// Fsync after each write.
    #[builder(default)]
    pub sync: bool,
}

/// Writes each snapshot to `<dir>/<prefix>-<UTC timestamp>.json[.gz]`,
/// never overwriting an existing file. Primarily for offline analysis when
/// no gateway is reachable.
pub struct FileExporter {
    cfg: FileConfig,
}

impl FileExporter {
    pub fn new(cfg: FileConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.dir)?;
        Ok(FileExporter { cfg })
    }

    fn encoder(&self) -> Encoder {
        if self.cfg.compress {
            Encoder::GzipJson
        } else {
            Encoder::Json
        }
    }
}

impl Exporter for FileExporter {
    fn export(&mut self, snapshot: &Frame) -> Result<()> {
        let data = self.encoder().encode(snapshot)?;

        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut name = format!("{}-{}.json", self.cfg.prefix, ts);
        if self.cfg.compress {
            name.push_str(".gz");
        }
        let path = self.cfg.dir.join(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&data)?;
        if self.cfg.sync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
