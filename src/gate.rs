//! Page lifecycle gate.
//!
//! Two hooks run against a [`Page`]: the render pass, which derives every
//! node's visible/enabled flags, and the pre-dispatch check, which refuses to
//! run a callback whose target is not authorized. Neither keeps any state
//! between calls; each pass starts from `Unevaluated`.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::capability::CapabilityDescriptor;
use crate::component::{ComponentKind, ComponentPath, ComponentVisitor, Page, SecurableComponent};
use crate::oracle::AuthorizationOracle;
use crate::principal::Principal;

pub const UNAUTHORIZED_ACTION: &str = "UNAUTHORIZED_ACTION";

/// Per-request collaborators threaded into render and dispatch.
#[derive(Clone, Copy)]
pub struct RequestContext<'a> {
    pub oracle: &'a dyn AuthorizationOracle,
    pub principal: &'a Principal,
}

impl<'a> RequestContext<'a> {
    pub fn new(oracle: &'a dyn AuthorizationOracle, principal: &'a Principal) -> Self {
        Self { oracle, principal }
    }

    pub fn allows(&self, descriptor: Option<&CapabilityDescriptor>) -> bool {
        self.oracle.is_authorized(self.principal, descriptor)
    }
}

/// Raised when a dispatch target (or one of its ancestors) is not authorized.
///
/// Distinct from validation feedback: callers map it to an access-denied
/// response, never to a form error.
#[derive(Clone, Debug)]
pub struct AuthorizationError {
    pub code: &'static str,
    pub principal: String,
    pub target: String,
    pub capability: Option<CapabilityDescriptor>,
}

impl AuthorizationError {
    pub fn new(principal: &Principal, target: &str, capability: Option<&CapabilityDescriptor>) -> Self {
        Self {
            code: UNAUTHORIZED_ACTION,
            principal: principal.id().to_string(),
            target: target.to_string(),
            capability: capability.cloned(),
        }
    }
}

impl std::fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.capability {
            Some(capability) => write!(
                f,
                "{}: {} may not {} via '{}'",
                self.code, self.principal, capability, self.target
            ),
            None => write!(f, "{}: {} denied at '{}'", self.code, self.principal, self.target),
        }
    }
}

impl std::error::Error for AuthorizationError {}

pub fn is_authorization_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AuthorizationError>().is_some()
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unevaluated,
    Authorized,
    Denied,
}

#[derive(Clone, Debug, Serialize)]
pub struct RenderedNode {
    pub path: ComponentPath,
    pub id: String,
    pub kind: ComponentKind,
    pub state: AuthState,
    pub visible: bool,
    pub enabled: bool,
}

/// Output of one render pass. Discarded after the response is produced.
#[derive(Clone, Debug, Serialize)]
pub struct RenderPlan {
    pub page: String,
    pub nodes: Vec<RenderedNode>,
    #[serde(skip)]
    pub oracle_calls: usize,
}

impl RenderPlan {
    pub fn node(&self, path: &str) -> Option<&RenderedNode> {
        let path = ComponentPath::parse(path);
        self.nodes.iter().find(|n| n.path == path)
    }

    pub fn is_visible(&self, path: &str) -> bool {
        self.node(path).map(|n| n.visible).unwrap_or(false)
    }

    pub fn is_enabled(&self, path: &str) -> bool {
        self.node(path).map(|n| n.enabled).unwrap_or(false)
    }

    pub fn state(&self, path: &str) -> AuthState {
        self.node(path)
            .map(|n| n.state)
            .unwrap_or(AuthState::Unevaluated)
    }
}

struct RenderPass<'a> {
    ctx: RequestContext<'a>,
    nodes: Vec<RenderedNode>,
    oracle_calls: usize,
}

impl ComponentVisitor for RenderPass<'_> {
    type State = AuthState;

    fn enter(
        &mut self,
        node: &SecurableComponent,
        path: &ComponentPath,
        inherited: Option<AuthState>,
    ) -> AuthState {
        let state = if inherited == Some(AuthState::Denied) {
            AuthState::Denied
        } else {
            match node.capability() {
                None => AuthState::Authorized,
                Some(descriptor) => {
                    self.oracle_calls += 1;
                    if self.ctx.allows(Some(descriptor)) {
                        AuthState::Authorized
                    } else {
                        log::debug!(
                            "render: {} denied {} at '{}'",
                            self.ctx.principal.id(),
                            descriptor,
                            path
                        );
                        AuthState::Denied
                    }
                }
            }
        };
        let authorized = state == AuthState::Authorized;
        let visible = node.kind().is_form_control() || authorized;
        self.nodes.push(RenderedNode {
            path: path.clone(),
            id: node.id().to_string(),
            kind: node.kind(),
            state,
            visible,
            enabled: authorized,
        });
        state
    }
}

pub struct PageGate;

impl PageGate {
    /// Derive visible/enabled for every node of `page`.
    ///
    /// Depth-first, parents first. A denied node forces its whole subtree to
    /// denied without consulting the oracle again.
    pub fn render_pass(page: &Page, ctx: RequestContext<'_>) -> RenderPlan {
        let mut pass = RenderPass {
            ctx,
            nodes: Vec::new(),
            oracle_calls: 0,
        };
        page.walk(&mut pass);
        RenderPlan {
            page: page.name().to_string(),
            nodes: pass.nodes,
            oracle_calls: pass.oracle_calls,
        }
    }

    /// Check that `target` and every ancestor up to the page root are authorized.
    pub fn authorize_dispatch(page: &Page, target: &str, ctx: RequestContext<'_>) -> Result<()> {
        let path = ComponentPath::parse(target);
        let chain = page
            .resolve(&path)
            .ok_or_else(|| anyhow!("unknown dispatch target '{}' on page {}", target, page.name()))?;
        for node in chain {
            let Some(descriptor) = node.capability() else {
                continue;
            };
            if !ctx.allows(Some(descriptor)) {
                log::warn!(
                    "dispatch rejected: {} attempted {} via {}:{}",
                    ctx.principal.id(),
                    descriptor,
                    page.name(),
                    path
                );
                return Err(AuthorizationError::new(ctx.principal, path.as_str(), Some(descriptor)).into());
            }
        }
        Ok(())
    }

    /// Run `callback` only if the target passes [`PageGate::authorize_dispatch`].
    pub fn dispatch<T>(
        page: &Page,
        target: &str,
        ctx: RequestContext<'_>,
        callback: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        Self::authorize_dispatch(page, target, ctx)?;
        callback()
    }
}
