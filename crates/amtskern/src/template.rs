//! A minimal `{{name}}`-placeholder template, used to assemble the
//! synthesis prompt from `sources`/`agent_results`/`query` without pulling
//! in a full templating engine for one substitution pass.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("unresolved placeholder: {0}")]
    UnresolvedPlaceholder(String),
}

/// Renders `template`, substituting every `{{name}}` occurrence with
/// `values[name]`. A single literal `{` or `}` (not doubled) passes through
/// unescaped. Fails if any placeholder has no matching value.
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let Some(end) = rest[open + 2..].find("}}") else {
            return Err(TemplateError::UnresolvedPlaceholder(rest[open..].to_string()));
        };
        let name = rest[open + 2..open + 2 + end].trim();
        let value = values
            .get(name)
            .ok_or_else(|| TemplateError::UnresolvedPlaceholder(name.to_string()))?;
        out.push_str(value);
        rest = &rest[open + 2 + end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}
