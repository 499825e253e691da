//! Template engine for configuration files
//!
//! Uses minijinja with default delimiters and strict undefined handling.
//! Templates are registered once by name and rendered many times per pass.

use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};

use super::error::TemplateError;
use super::filters;

/// Compiled set of named configuration templates
///
/// Supports:
/// - `{{ ... }}` variables and `{% ... %}` blocks
/// - Strict undefined variable handling
/// - Custom filters (with_port, pybool, required)
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// Create an engine with the given `(name, source)` templates compiled in
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::Syntax` naming the first template that fails
    /// to compile.
    pub fn with_templates<'a>(
        templates: impl IntoIterator<Item = &'a (&'static str, &'static str)>,
    ) -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        // Names carry file extensions; none of the outputs are markup.
        env.set_auto_escape_callback(|_| AutoEscape::None);

        env.add_filter("with_port", filters::with_port);
        env.add_filter("pybool", filters::pybool);
        env.add_filter("required", filters::required);

        for &(name, source) in templates {
            env.add_template(name, source)
                .map_err(|source| TemplateError::Syntax {
                    name: name.to_string(),
                    source,
                })?;
        }

        Ok(Self { env })
    }

    /// Render a registered template
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if:
    /// - No template is registered under `name`
    /// - A referenced variable is undefined
    /// - A filter operation fails
    pub fn render(&self, name: &str, ctx: Value) -> Result<String, TemplateError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|_| TemplateError::missing(name))?;
        Ok(template.render(ctx)?)
    }

    /// Whether a template is registered under `name`
    pub fn has_template(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }
}
