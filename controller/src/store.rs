use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use tokio::sync::Mutex;
use tracing::{info, warn};

use alarmclock_common::{AlarmSet, RuntimeConfig};

/// Header written at the top of the alarm save file.
const ALARM_FILE_HEADER: &str = "# m h dom mon dow , buzzer";

#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    data_dir: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("ALARMCLOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.alarmclock"));
        Self::at(data_dir)
    }

    pub fn at(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            data_dir: Arc::new(data_dir),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    /// Resolves the configured alarm file against the data dir. `None`
    /// when persistence is disabled.
    fn alarm_path(&self, runtime: &RuntimeConfig) -> Option<PathBuf> {
        if runtime.alarm_file.is_empty() {
            return None;
        }
        let path = PathBuf::from(&runtime.alarm_file);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(self.data_dir.join(path))
        }
    }

    /// Forgiving load: a missing, unreadable, or corrupt save file means
    /// starting with an empty set rather than refusing to boot.
    pub async fn load_alarms(&self, runtime: &RuntimeConfig) -> AlarmSet {
        let Some(path) = self.alarm_path(runtime) else {
            return AlarmSet::default();
        };

        let _guard = self.lock.lock().await;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("no alarm file at {}, starting empty", path.display());
                return AlarmSet::default();
            }
            Err(err) => {
                warn!("failed to read alarm file {}: {err}", path.display());
                return AlarmSet::default();
            }
        };

        match AlarmSet::from_save_text(&text) {
            Ok(alarms) => alarms,
            Err(err) => {
                warn!(
                    "corrupt alarm file {}, starting empty: {err}",
                    path.display()
                );
                AlarmSet::default()
            }
        }
    }

    pub async fn save_alarms(
        &self,
        runtime: &RuntimeConfig,
        alarms: &AlarmSet,
    ) -> anyhow::Result<()> {
        let Some(path) = self.alarm_path(runtime) else {
            return Ok(());
        };

        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut text = String::from(ALARM_FILE_HEADER);
        text.push('\n');
        for line in alarms.save_lines() {
            text.push_str(&line);
            text.push('\n');
        }
        tokio::fs::write(path, text).await?;
        Ok(())
    }
}
