use serde_json::{Value, json};

use crate::error::Result;
use crate::gateway::Outcome;
use crate::graph::{dependency_waves, projection_digest};
use crate::model::format_task_id;
use crate::store::atomic;

use super::workspace;

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaveCache {
    digest: String,
    waves: Vec<Vec<u64>>,
}

/// Dependency-wave projection. The computation is memoized in a cache
/// file keyed on the digest of `(id, status, parent, depends)` tuples;
/// cache failures fall back to recomputation.
pub fn run(params: &Value) -> Result<Outcome> {
    let ws = workspace(params)?;
    let todo = ws.load_todo()?;
    let digest = projection_digest(&todo.tasks);
    let cache_path = ws.paths.cleo_dir().join(".waves-cache.json");

    let mut cached = false;
    let waves = match read_cache(&cache_path, &digest) {
        Some(waves) => {
            cached = true;
            waves
        }
        None => {
            let waves = dependency_waves(&todo.tasks)?;
            let _ = atomic::write_json_atomic(
                &cache_path,
                &WaveCache {
                    digest: digest.clone(),
                    waves: waves.clone(),
                },
            );
            waves
        }
    };

    let rendered: Vec<Vec<String>> = waves
        .iter()
        .map(|wave| wave.iter().map(|&id| format_task_id(id)).collect())
        .collect();
    Ok(Outcome::data(
        json!({"waves": rendered, "cached": cached, "digest": digest}),
    ))
}

fn read_cache(path: &std::path::Path, digest: &str) -> Option<Vec<Vec<u64>>> {
    if !path.exists() {
        return None;
    }
    let cache: WaveCache = atomic::read_json(path).ok()?;
    (cache.digest == digest).then_some(cache.waves)
}
