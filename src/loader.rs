use crate::{
    error::{LoadError, TemplateError},
    model::{LlmBackend, LlmModel},
    template::PromptTemplate,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Instant,
};

const MODEL_EXTENSIONS: [&str; 2] = ["bin", "gguf"];
const SKIPPED_EXTENSIONS: [&str; 4] = ["tmpl", "yaml", "yml", "keep"];

/// Source of model artifacts and their prompt templates.
///
/// `load` does no caching of its own; the registry guarantees it is called at
/// most once per successfully loaded name.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, name: &str) -> Result<Arc<dyn LlmModel>, LoadError>;
    fn list_names(&self) -> Result<Vec<String>, LoadError>;
    fn template(&self, name: &str, input: &str) -> Result<String, TemplateError>;
}

/// Loads models from a flat directory: `<dir>/<name>`, `<dir>/<name>.bin` or
/// `<dir>/<name>.gguf`, each with an optional `<file>.tmpl` prompt template.
pub struct FsModelLoader {
    models_path: PathBuf,
    backend: Arc<dyn LlmBackend>,
    templates: RwLock<HashMap<String, PromptTemplate>>,
}

impl FsModelLoader {
    pub fn new(models_path: impl Into<PathBuf>, backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            models_path: models_path.into(),
            backend,
            templates: RwLock::new(HashMap::new()),
        }
    }

    pub fn models_path(&self) -> &Path {
        &self.models_path
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let mut components = Path::new(name).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
        if !single_normal {
            return None;
        }

        std::iter::once(self.models_path.join(name))
            .chain(MODEL_EXTENSIONS.iter().map(|ext| self.models_path.join(format!("{name}.{ext}"))))
            .find(|p| p.is_file())
    }

    fn load_template(&self, name: &str, model_file: &Path) {
        let mut tmpl_path = OsString::from(model_file.as_os_str());
        tmpl_path.push(".tmpl");
        let tmpl_path = PathBuf::from(tmpl_path);
        if !tmpl_path.is_file() {
            return;
        }

        let parsed = std::fs::read_to_string(&tmpl_path)
            .map_err(|source| TemplateError::Io { path: tmpl_path.clone(), source })
            .and_then(|src| PromptTemplate::parse(&src));
        match parsed {
            Ok(t) => {
                tracing::info!(model = name, path = ?tmpl_path, "prompt template loaded");
                self.templates.write().insert(name.to_owned(), t);
            }
            Err(e) => tracing::warn!(model = name, path = ?tmpl_path, error = %e, "ignoring prompt template"),
        }
    }
}

impl ModelLoader for FsModelLoader {
    fn load(&self, name: &str) -> Result<Arc<dyn LlmModel>, LoadError> {
        let path = self.locate(name).ok_or_else(|| LoadError::NotFound {
            name: name.to_owned(),
            dir: self.models_path.clone(),
        })?;

        let started = Instant::now();
        let model = self
            .backend
            .load(&path)
            .map_err(|source| LoadError::Backend { path: path.clone(), source })?;
        tracing::info!(model = name, ?path, elapsed = ?started.elapsed(), "model loaded");

        self.load_template(name, &path);
        Ok(model)
    }

    fn list_names(&self) -> Result<Vec<String>, LoadError> {
        let dir_err = |source: std::io::Error| LoadError::Directory { dir: self.models_path.clone(), source };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.models_path).map_err(dir_err)? {
            let entry = entry.map_err(dir_err)?;
            if !entry.file_type().map_err(dir_err)?.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            let ext = Path::new(&file_name).extension().and_then(|e| e.to_str());
            if ext.is_some_and(|e| SKIPPED_EXTENSIONS.contains(&e)) {
                continue;
            }
            let name = match ext {
                Some(e) if MODEL_EXTENSIONS.contains(&e) => file_name[..file_name.len() - e.len() - 1].to_owned(),
                _ => file_name,
            };
            names.push(name);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn template(&self, name: &str, input: &str) -> Result<String, TemplateError> {
        let templates = self.templates.read();
        templates
            .get(name)
            .or_else(|| templates.get(&format!("{name}.bin")))
            .map(|t| t.render(input))
            .ok_or_else(|| TemplateError::Missing(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::echo::EchoBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "llama-gate-loader-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn loader(dir: &Path) -> FsModelLoader {
        FsModelLoader::new(dir, Arc::new(EchoBackend))
    }

    #[test]
    fn lists_models_without_extensions_and_side_files() {
        let dir = scratch_dir();
        for f in ["alpaca.bin", "alpaca.bin.tmpl", "vicuna.gguf", "raw-model", ".keep", "cfg.yaml"] {
            std::fs::write(dir.join(f), b"x").unwrap();
        }
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        let names = loader(&dir).list_names().unwrap();
        assert_eq!(names, vec!["alpaca", "raw-model", "vicuna"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = scratch_dir().join("absent");
        assert!(matches!(loader(&dir).list_names(), Err(LoadError::Directory { .. })));
    }

    #[test]
    fn resolves_bin_suffix_and_reads_template() {
        let dir = scratch_dir();
        std::fs::write(dir.join("alpaca.bin"), b"weights").unwrap();
        std::fs::write(dir.join("alpaca.bin.tmpl"), "Below is an instruction.\n{{.Input}}\nResponse:").unwrap();
        let l = loader(&dir);

        assert!(matches!(l.template("alpaca", "hi"), Err(TemplateError::Missing(_))));
        l.load("alpaca").unwrap();
        assert_eq!(l.template("alpaca", "hi").unwrap(), "Below is an instruction.\nhi\nResponse:");
    }

    #[test]
    fn bad_template_is_ignored() {
        let dir = scratch_dir();
        std::fs::write(dir.join("m.gguf"), b"weights").unwrap();
        std::fs::write(dir.join("m.gguf.tmpl"), "{{range .Messages}}{{end}}").unwrap();
        let l = loader(&dir);
        l.load("m").unwrap();
        assert!(matches!(l.template("m", "x"), Err(TemplateError::Missing(_))));
    }

    #[test]
    fn rejects_unknown_and_escaping_names() {
        let dir = scratch_dir();
        std::fs::write(dir.join("ok.bin"), b"w").unwrap();
        let l = loader(&dir);
        for name in ["nope", "../ok", "sub/ok", ""] {
            assert!(matches!(l.load(name), Err(LoadError::NotFound { .. })), "{name}");
        }
    }
}
