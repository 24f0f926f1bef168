// Shader hot reload
//
// Watches the compiled shader directory. Recompiling a shader with glslc
// while the app runs swaps the pipelines on the next frame.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};

pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl ShaderWatcher {
    pub fn new(directory: &Path) -> Result<Self> {
        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", directory))?;

        log::info!("Watching {:?} for shader changes", directory);

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Drain pending events; true if any SPIR-V file was written
    pub fn poll(&self) -> bool {
        let mut changed = false;
        while let Ok(result) = self.events.try_recv() {
            match result {
                Ok(event) if is_shader_change(&event) => {
                    log::debug!("Shader change: {:?}", event.paths);
                    changed = true;
                }
                Ok(_) => {}
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        }
        changed
    }
}

pub fn is_shader_change(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.extension().map_or(false, |ext| ext == "spv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(path.into())
    }

    #[test]
    fn spirv_writes_trigger_reload() {
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(is_shader_change(&event(modify, "shaders/model.frag.spv")));
        assert!(is_shader_change(&event(
            EventKind::Create(CreateKind::File),
            "shaders/gbuffer.frag.spv"
        )));
    }

    #[test]
    fn sources_reads_and_removals_are_ignored() {
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(!is_shader_change(&event(modify, "shaders/model.frag")));
        assert!(!is_shader_change(&event(
            EventKind::Access(AccessKind::Read),
            "shaders/model.frag.spv"
        )));
        assert!(!is_shader_change(&event(
            EventKind::Remove(RemoveKind::File),
            "shaders/model.frag.spv"
        )));
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(ShaderWatcher::new(Path::new("definitely/not/a/shader/dir")).is_err());
    }
}
