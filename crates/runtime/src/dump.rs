//! Debug IR dumps.
//!
//! With `debug.ir_dump` enabled, every generated module is written under
//! a uniquely-named directory as `<layer>-<module>.oir`, where the layer
//! prefix orders the pipeline stages.

use std::path::PathBuf;

use ostinato_ir::{Module, ModuleWriter};
use tracing::warn;

pub struct IrDumper {
    dir: Option<PathBuf>,
}

impl IrDumper {
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { dir: None };
        }

        let dir = PathBuf::from(format!("ostinato/run-{}", std::process::id()));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Self { dir: Some(dir) },
            Err(err) => {
                warn!(error = %err, "cannot create ir dump directory; dumps disabled");
                Self { dir: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dump(&self, layer: &str, module: &Module) {
        let Some(dir) = &self.dir else { return };

        let text = ModuleWriter::new(module).write();
        let path = dir.join(format!("{layer}-{}.oir", module.name));
        if let Err(err) = std::fs::write(&path, text) {
            warn!(error = %err, path = %path.display(), "ir dump failed");
        }
    }
}
