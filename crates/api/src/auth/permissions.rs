//! Role-capability matrix
//!
//! Coarse access roles map to capabilities through a static matrix. A
//! member's granular-permission document, when present, takes precedence over
//! the matrix for the modules it mentions.

use serde_json::Value;

use hearth_shared::AccessRole;

/// Domain module a capability applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Profile,
    Health,
    Finance,
    Education,
    Diary,
    Family,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Health => "health",
            Self::Finance => "finance",
            Self::Education => "education",
            Self::Diary => "diary",
            Self::Family => "family",
        }
    }
}

/// Action within a module. The governance actions only apply to `Family`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Invite,
    Remove,
    ManageRoles,
    DeleteFamily,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Invite => "invite",
            Self::Remove => "remove",
            Self::ManageRoles => "manage_roles",
            Self::DeleteFamily => "delete_family",
        }
    }

    fn is_governance(&self) -> bool {
        matches!(
            self,
            Self::Invite | Self::Remove | Self::ManageRoles | Self::DeleteFamily
        )
    }
}

/// Outcome of a capability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Denied,
    Allowed,
    /// Allowed only against the member's own rows
    OwnOnly,
}

impl Grant {
    pub fn permits(&self) -> bool {
        !matches!(self, Grant::Denied)
    }
}

/// Evaluate a capability: granular override first, static matrix otherwise
pub fn evaluate(
    role: AccessRole,
    granular: Option<&Value>,
    module: Module,
    action: Action,
) -> Grant {
    if let Some(doc) = granular {
        if let Some(grant) = granular_grant(doc, module, action) {
            return grant;
        }
    }
    static_grant(role, module, action)
}

/// The static matrix: admin holds governance on top of full content control;
/// parent has full content control; guardian views everything and writes
/// health; child acts in own scope; viewer only reads.
fn static_grant(role: AccessRole, module: Module, action: Action) -> Grant {
    match role {
        AccessRole::Admin => Grant::Allowed,
        AccessRole::Parent => {
            if action.is_governance() {
                Grant::Denied
            } else {
                Grant::Allowed
            }
        }
        AccessRole::Guardian => match action {
            Action::View => Grant::Allowed,
            Action::Create | Action::Edit if module == Module::Health => Grant::Allowed,
            _ => Grant::Denied,
        },
        AccessRole::Child => {
            if action.is_governance() || module == Module::Family || module == Module::Finance {
                Grant::Denied
            } else {
                Grant::OwnOnly
            }
        }
        AccessRole::Viewer => match action {
            Action::View => Grant::Allowed,
            _ => Grant::Denied,
        },
    }
}

/// A granular document lists allowed actions per module, e.g.
/// `{"health": ["view", "edit"], "finance": []}`. A mentioned module replaces
/// the matrix entirely; an unmentioned one falls through to it.
fn granular_grant(doc: &Value, module: Module, action: Action) -> Option<Grant> {
    let actions = doc.get(module.as_str())?.as_array()?;
    let allowed = actions
        .iter()
        .filter_map(|a| a.as_str())
        .any(|a| a == action.as_str());
    Some(if allowed { Grant::Allowed } else { Grant::Denied })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn admin_holds_governance() {
        assert_eq!(
            evaluate(AccessRole::Admin, None, Module::Family, Action::Invite),
            Grant::Allowed
        );
        assert_eq!(
            evaluate(AccessRole::Admin, None, Module::Family, Action::DeleteFamily),
            Grant::Allowed
        );
    }

    #[test]
    fn parent_has_content_control_but_no_governance() {
        assert_eq!(
            evaluate(AccessRole::Parent, None, Module::Health, Action::Delete),
            Grant::Allowed
        );
        assert_eq!(
            evaluate(AccessRole::Parent, None, Module::Family, Action::Remove),
            Grant::Denied
        );
    }

    #[test]
    fn guardian_views_all_and_writes_health_only() {
        assert_eq!(
            evaluate(AccessRole::Guardian, None, Module::Finance, Action::View),
            Grant::Allowed
        );
        assert_eq!(
            evaluate(AccessRole::Guardian, None, Module::Health, Action::Edit),
            Grant::Allowed
        );
        assert_eq!(
            evaluate(AccessRole::Guardian, None, Module::Finance, Action::Edit),
            Grant::Denied
        );
    }

    #[test]
    fn child_is_own_scope_only() {
        assert_eq!(
            evaluate(AccessRole::Child, None, Module::Diary, Action::Edit),
            Grant::OwnOnly
        );
        assert_eq!(
            evaluate(AccessRole::Child, None, Module::Finance, Action::View),
            Grant::Denied
        );
    }

    #[test]
    fn viewer_is_read_only() {
        assert_eq!(
            evaluate(AccessRole::Viewer, None, Module::Education, Action::View),
            Grant::Allowed
        );
        assert_eq!(
            evaluate(AccessRole::Viewer, None, Module::Education, Action::Create),
            Grant::Denied
        );
    }

    #[test]
    fn granular_document_overrides_mentioned_modules_only() {
        let doc = json!({"health": ["view"], "diary": ["view", "edit"]});

        // viewer normally cannot edit diary; the document grants it
        assert_eq!(
            evaluate(AccessRole::Viewer, Some(&doc), Module::Diary, Action::Edit),
            Grant::Allowed
        );
        // guardian normally edits health; the document narrows it to view
        assert_eq!(
            evaluate(AccessRole::Guardian, Some(&doc), Module::Health, Action::Edit),
            Grant::Denied
        );
        // unmentioned module falls through to the matrix
        assert_eq!(
            evaluate(AccessRole::Guardian, Some(&doc), Module::Finance, Action::View),
            Grant::Allowed
        );
    }
}
