//! Securable component tree.
//!
//! A page is a strict tree of tagged nodes. Any node may carry one capability
//! descriptor, fixed while the node is being built. Visible/enabled flags are
//! not stored on nodes; the gate derives them on every render pass.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::capability::CapabilityDescriptor;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Form,
    FormField,
    Container,
    Label,
}

impl ComponentKind {
    /// Form controls stay visible when denied so the user can see why they are inert.
    pub fn is_form_control(&self) -> bool {
        matches!(self, ComponentKind::Form | ComponentKind::FormField)
    }
}

#[derive(Clone, Debug)]
pub struct SecurableComponent {
    id: String,
    kind: ComponentKind,
    capability: Option<CapabilityDescriptor>,
    children: Vec<SecurableComponent>,
}

impl SecurableComponent {
    fn new(id: &str, kind: ComponentKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            capability: None,
            children: Vec::new(),
        }
    }

    pub fn form(id: &str) -> Self {
        Self::new(id, ComponentKind::Form)
    }

    pub fn field(id: &str) -> Self {
        Self::new(id, ComponentKind::FormField)
    }

    pub fn container(id: &str) -> Self {
        Self::new(id, ComponentKind::Container)
    }

    pub fn label(id: &str) -> Self {
        Self::new(id, ComponentKind::Label)
    }

    /// Attach the capability this node requires.
    ///
    /// Consumes the node, so it can only happen before the node is attached to a
    /// parent or page; a page hands out shared references only.
    pub fn with_capability(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.capability = Some(descriptor);
        self
    }

    pub fn child(mut self, child: SecurableComponent) -> Self {
        self.children.push(child);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn capability(&self) -> Option<&CapabilityDescriptor> {
        self.capability.as_ref()
    }

    pub fn children(&self) -> &[SecurableComponent] {
        &self.children
    }

    fn validate_ids(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for child in &self.children {
            validate_component_id(&child.id)?;
            if !seen.insert(child.id.as_str()) {
                return Err(anyhow!(
                    "duplicate component id '{}' under '{}'",
                    child.id,
                    self.id
                ));
            }
            child.validate_ids()?;
        }
        Ok(())
    }
}

pub fn validate_component_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("component id cannot be empty"));
    }
    if id.contains(ComponentPath::SEPARATOR) {
        return Err(anyhow!("component id '{}' must not contain ':'", id));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(anyhow!("component id '{}' must not contain whitespace", id));
    }
    Ok(())
}

/// Colon-separated ids from just below the page root, e.g. `auditDeleteForm:delete`.
/// The page root itself has the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ComponentPath(String);

impl ComponentPath {
    pub const SEPARATOR: char = ':';

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().trim_matches(Self::SEPARATOR).to_string())
    }

    pub fn join(&self, id: &str) -> Self {
        if self.0.is_empty() {
            Self(id.to_string())
        } else {
            Self(format!("{}{}{}", self.0, Self::SEPARATOR, id))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR).filter(|s| !s.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit traversal of a page, parents before children.
pub trait ComponentVisitor {
    /// Decision carried from a parent into its children.
    type State: Copy;

    /// `inherited` is the parent's result, or `None` at the page root.
    fn enter(
        &mut self,
        node: &SecurableComponent,
        path: &ComponentPath,
        inherited: Option<Self::State>,
    ) -> Self::State;
}

#[derive(Clone, Debug)]
pub struct Page {
    name: String,
    root: SecurableComponent,
}

impl Page {
    pub fn new(name: &str, root: SecurableComponent) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(anyhow!("page name cannot be empty"));
        }
        validate_component_id(&root.id)?;
        root.validate_ids()?;
        Ok(Self {
            name: name.trim().to_string(),
            root,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &SecurableComponent {
        &self.root
    }

    /// Resolve a path to its chain of nodes, page root first and target last.
    pub fn resolve(&self, path: &ComponentPath) -> Option<Vec<&SecurableComponent>> {
        let mut chain = vec![&self.root];
        let mut current = &self.root;
        for segment in path.segments() {
            current = current.children.iter().find(|c| c.id == segment)?;
            chain.push(current);
        }
        Some(chain)
    }

    pub fn walk<V: ComponentVisitor>(&self, visitor: &mut V) {
        fn visit<V: ComponentVisitor>(
            visitor: &mut V,
            node: &SecurableComponent,
            path: ComponentPath,
            inherited: Option<V::State>,
        ) {
            let state = visitor.enter(node, &path, inherited);
            for child in &node.children {
                visit(visitor, child, path.join(&child.id), Some(state));
            }
        }
        visit(visitor, &self.root, ComponentPath::root(), None);
    }
}
