//! Weight cache locations and acquisition progress reporting.
//!
//! Local engines download weights into a per-engine, per-model directory.
//! Where that directory lives is decided by (in priority order):
//!
//! 1. The modality's own `cache_dir`.
//! 2. The provider-wide `cache_dir` root, as `<root>/<engine>/<model>`.
//! 3. A default `.uni_cache/<engine>/<model>` relative to the working directory.
//!
//! Nothing here reads or writes process environment variables.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// Default root cache directory name (relative to CWD).
pub const DEFAULT_CACHE_ROOT: &str = ".uni_cache";

/// Replace `/` with `--` and strip characters that are unsafe in directory names.
///
/// The result is always a single normal path component: a name left empty or
/// made only of dots is escaped to underscores.
pub fn sanitize_model_name(model_id: &str) -> String {
    let name: String = model_id
        .replace('/', "--")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if name.chars().all(|c| c == '.') {
        return "_".repeat(name.len().max(1));
    }
    name
}

/// Engine ids look like `local/candle`; only the last segment names the
/// directory.
fn engine_dir_name(engine_id: &str) -> &str {
    engine_id.rsplit('/').next().unwrap_or(engine_id)
}

/// Resolve the cache directory for one modality's model.
pub fn resolve_cache_dir(
    modality_dir: Option<&Path>,
    provider_root: Option<&Path>,
    engine_id: &str,
    model_id: &str,
) -> PathBuf {
    if let Some(dir) = modality_dir {
        return dir.to_path_buf();
    }
    provider_root
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT))
        .join(engine_dir_name(engine_id))
        .join(sanitize_model_name(model_id))
}

/// Weight acquisition progress, emitted by engines that download files.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// `file` of `model` is `percent` (0–100) acquired.
    Progress {
        model: String,
        file: String,
        percent: f32,
    },
    /// Every file of `model` is available locally.
    Done { model: String },
}

/// Channel end engines report [`ProgressEvent`]s on.
pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// Send `event` if anyone is listening. A closed receiver is ignored.
pub fn report(progress: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(tx) = progress
        && tx.send(event).is_err()
    {
        tracing::debug!("Progress receiver dropped; event discarded");
    }
}
