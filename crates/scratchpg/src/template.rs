//! Server configuration file template.
//!
//! The template is plain text with `{{ working_dir }}` placeholders, replaced
//! by the instance's working directory when the data directory is
//! initialised. The working directory doubles as the directory holding the
//! server's Unix-domain socket.

use std::path::Path;

use thiserror::Error;

/// Name of the single variable a template may reference.
pub const WORKING_DIR_VARIABLE: &str = "working_dir";

/// Default `postgresql.conf` contents for a throwaway server.
///
/// Durability is disabled and the server listens on its Unix-domain socket
/// only.
pub const DEFAULT_CONFIG_TEMPLATE: &str = "
unix_socket_directories = '{{ working_dir }}'
listen_addresses = ''
shared_buffers = 12MB
fsync = off
synchronous_commit = off
full_page_writes = off
log_min_duration_statement = 0
log_connections = on
log_disconnections = on
max_worker_processes = 4
";

/// Errors raised when a template cannot be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `{{` was never closed.
    #[error("unterminated placeholder starting at byte {offset}")]
    Unterminated {
        /// Byte offset of the opening braces.
        offset: usize,
    },
    /// A placeholder referenced something other than the working directory.
    #[error("unknown template variable '{name}' (only 'working_dir' is supported)")]
    UnknownVariable {
        /// Name found between the braces.
        name: String,
    },
}

/// Text rendered into the server configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTemplate {
    source: String,
}

impl ConfigTemplate {
    /// Validates `source` and wraps it as a template.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] when a placeholder is unterminated or
    /// names an unknown variable.
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let template = Self {
            source: source.into(),
        };
        template.render(Path::new(""))?;
        Ok(template)
    }

    /// Raw template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitutes `working_dir` into every placeholder.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] when the template is malformed.
    pub fn render(&self, working_dir: &Path) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some((literal, after_open)) = rest.split_once("{{") {
            rendered.push_str(literal);
            let Some((name, after_close)) = after_open.split_once("}}") else {
                let offset = self.source.len() - after_open.len() - 2;
                return Err(TemplateError::Unterminated { offset });
            };
            match name.trim() {
                WORKING_DIR_VARIABLE => rendered.push_str(&working_dir.display().to_string()),
                other => {
                    return Err(TemplateError::UnknownVariable {
                        name: other.to_owned(),
                    });
                }
            }
            rest = after_close;
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

impl Default for ConfigTemplate {
    fn default() -> Self {
        Self {
            source: String::from(DEFAULT_CONFIG_TEMPLATE),
        }
    }
}
