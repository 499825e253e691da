//! Configuration file templating
//!
//! Every per-kind configuration file is a named minijinja template compiled
//! once at startup. Rendering is strict: referencing an undefined value is
//! an error rather than an empty string, so a missing dependency field can
//! never silently produce a half-written configuration file.
//!
//! Templates see the values produced by [`crate::render::RenderContext`]:
//! - `name`, `namespace` - the owning intent
//! - `instances` - the instance's own pods, sorted by address
//! - `deps.<kind>` - resolved dependency views (addresses, endpoints, ports)
//! - `creds.<field>` - credentials fetched once per pass
//! - `params` - kind parameters with defaults applied
//! - `instance` - the pod being rendered, for per-instance files

mod engine;
mod error;
mod filters;

pub use engine::TemplateEngine;
pub use error::TemplateError;
