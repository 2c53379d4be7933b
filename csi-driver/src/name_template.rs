//! Name templating.
//!
//! Renders the backend dataset/ZVOL leaf name from the orchestrator's
//! identity tuple. Closed vocabulary, not a general template engine: the
//! only substitutions recognized are `{PVCNamespace}`, `{PVCName}`,
//! `{PVName}`, `{Name}`. An unrecognized placeholder is a validation error,
//! not a silently-ignored token.

use std::fmt;

use crate::error::DriverError;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Default)]
pub struct NameIdentity {
    pub pvc_namespace: String,
    pub pvc_name: String,
    pub pv_name: String,
    pub name: String,
}

impl NameIdentity {
    fn lookup(&self, var: &str) -> Option<&str> {
        match var {
            "PVCNamespace" => Some(&self.pvc_namespace),
            "PVCName" => Some(&self.pvc_name),
            "PVName" => Some(&self.pv_name),
            "Name" => Some(&self.name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NameTemplateError(String);

impl fmt::Display for NameTemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NameTemplateError {}

impl From<NameTemplateError> for DriverError {
    fn from(err: NameTemplateError) -> Self {
        DriverError::InvalidArgument(err.0)
    }
}

/// Renders the leaf name: `nameTemplate` if present, else
/// `namePrefix + PVName + nameSuffix`.
pub fn render(
    identity: &NameIdentity,
    name_template: Option<&str>,
    name_prefix: &str,
    name_suffix: &str,
) -> Result<String, NameTemplateError> {
    let rendered = match name_template {
        Some(template) => substitute(template, identity)?,
        None => format!("{name_prefix}{}{name_suffix}", identity.pv_name),
    };
    sanitize(&rendered)
}

fn substitute(template: &str, identity: &NameIdentity) -> Result<String, NameTemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            return Err(NameTemplateError(format!(
                "unterminated placeholder in nameTemplate '{template}'"
            )));
        };
        let var = &after_open[..close];
        match identity.lookup(var) {
            Some(value) => out.push_str(value),
            None => {
                return Err(NameTemplateError(format!(
                    "unknown nameTemplate placeholder '{{{var}}}'"
                )));
            }
        }
        rest = &after_open[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Enforces the backend's dataset naming rules: no leading `/`, no `@`, no
/// whitespace, length cap.
fn sanitize(name: &str) -> Result<String, NameTemplateError> {
    if name.is_empty() {
        return Err(NameTemplateError("rendered name is empty".to_string()));
    }
    if name.starts_with('/') {
        return Err(NameTemplateError(format!("rendered name '{name}' must not start with '/'")));
    }
    if name.contains('@') {
        return Err(NameTemplateError(format!("rendered name '{name}' must not contain '@'")));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NameTemplateError(format!("rendered name '{name}' must not contain whitespace")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameTemplateError(format!(
            "rendered name '{name}' exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> NameIdentity {
        NameIdentity {
            pvc_namespace: "default".to_string(),
            pvc_name: "my-claim".to_string(),
            pv_name: "pvc-12345".to_string(),
            name: "pvc-12345".to_string(),
        }
    }

    #[test]
    fn prefix_suffix_path_with_no_template() {
        let rendered = render(&identity(), None, "csi-", "-vol").unwrap();
        assert_eq!(rendered, "csi-pvc-12345-vol");
    }

    #[test]
    fn template_substitutes_closed_vocabulary() {
        let rendered = render(&identity(), Some("{PVCNamespace}-{PVCName}"), "", "").unwrap();
        assert_eq!(rendered, "default-my-claim");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = render(&identity(), Some("{Unknown}"), "", "").unwrap_err();
        assert!(err.to_string().contains("Unknown"));
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        assert!(render(&identity(), Some("{PVName"), "", "").is_err());
    }

    #[test]
    fn leading_slash_is_rejected() {
        assert!(render(&identity(), Some("/{PVName}"), "", "").is_err());
    }

    #[test]
    fn at_sign_is_rejected() {
        assert!(render(&identity(), Some("{PVName}@bad"), "", "").is_err());
    }

    #[test]
    fn whitespace_is_rejected() {
        assert!(render(&identity(), None, "csi ", "").is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut id = identity();
        id.pv_name = String::new();
        assert!(render(&id, None, "", "").is_err());
    }
}
