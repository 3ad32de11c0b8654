/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! `{{variable}}` substitution for configured credentials and commands.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown variable {name:?}")]
    UnknownVariable { name: String },
    #[error("unterminated placeholder starting at byte {at}")]
    Unterminated { at: usize },
}

/// Replace every `{{name}}` placeholder with its binding.
///
/// Referencing a variable absent from the binding map is an error, not a
/// silent pass-through.
pub fn substitute(
    template: &str,
    bindings: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find("}}").ok_or(TemplateError::Unterminated {
            at: template.len() - rest.len() + start,
        })?;

        let name = after[..end].trim();
        let value = bindings
            .get(name)
            .ok_or_else(|| TemplateError::UnknownVariable {
                name: name.to_owned(),
            })?;

        out.push_str(value);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}
