//! Prompt template loading and rendering via `minijinja`.
//!
//! Templates are loaded from the filesystem (the configured templates
//! directory) so operators can tune avatar behavior without
//! recompiling. Every task renders two templates against the same
//! substitutions value: `system.j2` establishing the world, and the
//! task's own `<name>.j2` carrying the request.

use minijinja::Environment;
use minijinja::path_loader;

use crate::AiError;

/// Manages prompt template loading and rendering.
pub struct PromptEngine {
    env: Environment<'static>,
}

/// The complete rendered prompt ready to send to an LLM backend.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// System message establishing the simulated world.
    pub system: String,
    /// User message carrying the task request.
    pub user: String,
}

impl PromptEngine {
    /// Create a prompt engine loading templates on demand from `dir`.
    ///
    /// The directory must contain `system.j2` plus one `<task>.j2` per
    /// task template; missing files surface at render time.
    pub fn new(dir: &str) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(dir));
        Self { env }
    }

    /// Render the system template and a task template against the same
    /// substitutions.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Template`] when either template is missing or
    /// fails to render.
    pub fn render(
        &self,
        template: &str,
        substitutions: &serde_json::Value,
    ) -> Result<RenderedPrompt, AiError> {
        let system = self.render_one("system.j2", substitutions)?;
        let file = format!("{template}.j2");
        let user = self.render_one(&file, substitutions)?;
        Ok(RenderedPrompt { system, user })
    }

    /// Render a single template file.
    fn render_one(&self, file: &str, substitutions: &serde_json::Value) -> Result<String, AiError> {
        self.env
            .get_template(file)
            .map_err(|e| AiError::Template(format!("missing template {file}: {e}")))?
            .render(substitutions)
            .map_err(|e| AiError::Template(format!("render of {file} failed: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn template_dir() -> std::path::PathBuf {
        // Unique directory per test process/thread to avoid races when
        // tests run in parallel.
        let dir = std::env::temp_dir().join(format!(
            "xiuxian_prompts_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("system.j2"),
            "You narrate a world of cultivators in year {{ year }}.",
        )
        .unwrap();
        std::fs::write(
            dir.join("decide.j2"),
            "{{ avatar.name }} (level {{ avatar.level }}) must choose. Respond with JSON.",
        )
        .unwrap();
        dir
    }

    #[test]
    fn renders_system_and_task() {
        let dir = template_dir();
        let engine = PromptEngine::new(dir.to_str().unwrap());
        let subs = serde_json::json!({
            "year": 412,
            "avatar": {"name": "Li Chen", "level": 17}
        });
        let prompt = engine.render("decide", &subs).unwrap();
        assert_eq!(prompt.system, "You narrate a world of cultivators in year 412.");
        assert!(prompt.user.contains("Li Chen"));
        assert!(prompt.user.contains("17"));
    }

    #[test]
    fn missing_template_is_an_error() {
        let dir = template_dir();
        let engine = PromptEngine::new(dir.to_str().unwrap());
        let result = engine.render("nonexistent", &serde_json::json!({"year": 1}));
        assert!(matches!(result, Err(AiError::Template(_))));
    }
}
