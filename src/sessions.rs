use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::research::RunState;

/// Run snapshots as pretty JSON, one file per run id.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub async fn new(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create session dir {:?}", dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("invalid run id '{}'", id);
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    pub async fn save(&self, state: &RunState) -> Result<PathBuf> {
        let path = self.path(&state.id)?;
        let json = serde_json::to_vec_pretty(state).context("serialize run state")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        debug!(run_id = %state.id, path = ?path, "session saved");
        Ok(path)
    }

    pub async fn load(&self, id: &str) -> Result<RunState> {
        let path = self.path(id)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("No session {:?}", path))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Corrupt session {:?}", path))
    }

    /// Stored run ids, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::Outcome;
    use crate::evidence::Language;
    use crate::testing::evidence;

    async fn store(tag: &str) -> SessionStore {
        let dir = std::env::temp_dir().join(format!(
            "factloop-sessions-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        SessionStore::new(&dir).await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = store("roundtrip").await;
        let mut state = RunState::new("coral reefs", Language::En);
        state.evidence.push(evidence("https://a.example", "A", "alpha"));
        state.draft = "Reefs bleached [1].".to_string();
        state.citations.insert(1, "https://a.example".to_string());
        state.loop_count = 2;
        state.terminal = true;
        state.outcome = Some(Outcome::Converged);

        store.save(&state).await.unwrap();
        let loaded = store.load(&state.id).await.unwrap();

        assert_eq!(loaded.id, state.id);
        assert_eq!(loaded.evidence, state.evidence);
        assert_eq!(loaded.citations, state.citations);
        assert_eq!(loaded.outcome, Some(Outcome::Converged));
        assert_eq!(store.list().await.unwrap(), vec![state.id.clone()]);
    }

    #[tokio::test]
    async fn test_rejects_bad_ids() {
        let store = store("bad-ids").await;
        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load("").await.is_err());
        assert!(store.load("0123456789abcdef").await.is_err());
    }
}
