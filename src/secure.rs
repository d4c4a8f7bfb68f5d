//! Capability-gated submission handlers.
//!
//! [`Securable`] wraps any [`FormHandler`] with an optional capability. A
//! submission is checked against the oracle before the input is even
//! validated, so valid data never reaches a handler the principal may not use.

use anyhow::Result;
use serde::Serialize;

use crate::capability::CapabilityDescriptor;
use crate::gate::{AuthorizationError, RequestContext};
use crate::json::JsonResponse;
use crate::validation::Feedback;

pub trait FormHandler {
    type Input;
    type Output;

    /// Field-level checks. Report problems through `feedback`.
    fn validate(&self, input: &Self::Input, feedback: &mut Feedback);

    /// Business action, run only for an authorized principal with valid input.
    fn on_submit(
        &mut self,
        ctx: RequestContext<'_>,
        input: Self::Input,
        feedback: &mut Feedback,
    ) -> Result<Self::Output>;
}

#[derive(Debug)]
pub enum SubmitOutcome<T> {
    Accepted { output: T, feedback: Feedback },
    Rejected(Feedback),
}

impl<T> SubmitOutcome<T> {
    pub fn accepted(self) -> Option<T> {
        match self {
            SubmitOutcome::Accepted { output, .. } => Some(output),
            SubmitOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SubmitOutcome::Rejected(_))
    }
}

pub struct Securable<H> {
    id: String,
    capability: Option<CapabilityDescriptor>,
    handler: H,
}

impl<H: FormHandler> Securable<H> {
    pub fn new(id: &str, handler: H) -> Self {
        Self {
            id: id.to_string(),
            capability: None,
            handler,
        }
    }

    pub fn with_capability(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.capability = Some(descriptor);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capability(&self) -> Option<&CapabilityDescriptor> {
        self.capability.as_ref()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_authorized(&self, ctx: RequestContext<'_>) -> bool {
        ctx.allows(self.capability.as_ref())
    }

    /// Authorization, then validation, then the handler.
    ///
    /// An unauthorized principal gets `Err(AuthorizationError)`; invalid input
    /// gets `Ok(Rejected)`.
    pub fn submit(
        &mut self,
        ctx: RequestContext<'_>,
        input: H::Input,
    ) -> Result<SubmitOutcome<H::Output>> {
        if !self.is_authorized(ctx) {
            log::warn!(
                "submission to '{}' rejected for {}",
                self.id,
                ctx.principal.id()
            );
            return Err(
                AuthorizationError::new(ctx.principal, &self.id, self.capability.as_ref()).into(),
            );
        }

        let mut feedback = Feedback::new();
        self.handler.validate(&input, &mut feedback);
        if feedback.has_errors() {
            log::debug!("submission to '{}' failed validation", self.id);
            return Ok(SubmitOutcome::Rejected(feedback));
        }

        let output = self.handler.on_submit(ctx, input, &mut feedback)?;
        Ok(SubmitOutcome::Accepted { output, feedback })
    }
}

/// Handler that answers an authorized submit with a JSON payload.
pub struct JsonDataForm<F> {
    producer: F,
}

impl<F, T> JsonDataForm<F>
where
    F: FnMut(RequestContext<'_>) -> Result<T>,
    T: Serialize,
{
    pub fn new(producer: F) -> Self {
        Self { producer }
    }
}

impl<F, T> FormHandler for JsonDataForm<F>
where
    F: FnMut(RequestContext<'_>) -> Result<T>,
    T: Serialize,
{
    type Input = ();
    type Output = JsonResponse;

    fn validate(&self, _input: &(), _feedback: &mut Feedback) {}

    fn on_submit(
        &mut self,
        ctx: RequestContext<'_>,
        _input: (),
        _feedback: &mut Feedback,
    ) -> Result<JsonResponse> {
        let value = (self.producer)(ctx)?;
        JsonResponse::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::EntityType;
    use crate::gate::is_authorization_failure;
    use crate::oracle::{Grant, InMemoryPermissionStore, RoleGrantOracle, Subject};
    use crate::principal::Principal;
    use crate::validation::{StringLengthValidator, Validator};

    struct RenameHandler {
        calls: usize,
    }

    impl FormHandler for RenameHandler {
        type Input = String;
        type Output = String;

        fn validate(&self, input: &String, feedback: &mut Feedback) {
            StringLengthValidator::new(0, 32).validate("name", input, feedback);
        }

        fn on_submit(
            &mut self,
            _ctx: RequestContext<'_>,
            input: String,
            feedback: &mut Feedback,
        ) -> Result<String> {
            self.calls += 1;
            feedback.info("renamed");
            Ok(input)
        }
    }

    fn oracle_with(grant: Option<Grant>) -> RoleGrantOracle<InMemoryPermissionStore> {
        let store = InMemoryPermissionStore::default();
        if let Some(grant) = grant {
            store.grant(Subject::role("operator"), grant).unwrap();
        }
        RoleGrantOracle::new(store)
    }

    fn operator() -> Principal {
        Principal::new("op").unwrap().with_role("operator")
    }

    fn rename_form() -> Securable<RenameHandler> {
        Securable::new("migrationEditForm", RenameHandler { calls: 0 }).with_capability(
            CapabilityDescriptor::attempted_update_any(EntityType::MigrationRecord),
        )
    }

    #[test]
    fn valid_data_with_denied_capability_never_reaches_handler() {
        let oracle = oracle_with(None);
        let p = operator();
        let mut form = rename_form();
        let err = form
            .submit(RequestContext::new(&oracle, &p), "nightly".to_string())
            .unwrap_err();
        assert!(is_authorization_failure(&err));
        assert_eq!(form.handler().calls, 0);
    }

    #[test]
    fn authorization_is_checked_before_validation() {
        let oracle = oracle_with(None);
        let p = operator();
        let mut form = rename_form();
        let err = form
            .submit(RequestContext::new(&oracle, &p), "x".repeat(40))
            .unwrap_err();
        assert!(is_authorization_failure(&err));
    }

    #[test]
    fn invalid_input_is_rejected_with_feedback() {
        let oracle = oracle_with(Some(Grant::new(
            crate::capability::OperationKind::UpdateAny,
            EntityType::MigrationRecord,
        )));
        let p = operator();
        let mut form = rename_form();
        let outcome = form
            .submit(RequestContext::new(&oracle, &p), "x".repeat(33))
            .unwrap();
        match outcome {
            SubmitOutcome::Rejected(feedback) => assert_eq!(feedback.errors_for("name").count(), 1),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(form.handler().calls, 0);
    }

    #[test]
    fn authorized_valid_submission_runs_handler() {
        let oracle = oracle_with(Some(Grant::new(
            crate::capability::OperationKind::UpdateAny,
            EntityType::MigrationRecord,
        )));
        let p = operator();
        let mut form = rename_form();
        let outcome = form
            .submit(RequestContext::new(&oracle, &p), "x".repeat(32))
            .unwrap();
        assert_eq!(outcome.accepted().as_deref(), Some("x".repeat(32).as_str()));
        assert_eq!(form.handler().calls, 1);
    }

    #[test]
    fn form_without_capability_accepts_anyone() {
        let oracle = oracle_with(None);
        let p = operator();
        let mut form = Securable::new("open", RenameHandler { calls: 0 });
        let outcome = form
            .submit(RequestContext::new(&oracle, &p), String::new())
            .unwrap();
        assert!(!outcome.is_rejected());
    }

    #[test]
    fn json_data_form_serializes_producer_value() {
        let oracle = oracle_with(Some(Grant::new(
            crate::capability::OperationKind::ReadAll,
            EntityType::MigrationRecord,
        )));
        let p = operator();
        let mut form = Securable::new(
            "previousMigrations",
            JsonDataForm::new(|_ctx| Ok(serde_json::json!({ "ok": true }))),
        )
        .with_capability(CapabilityDescriptor::attempted_read_all(
            EntityType::MigrationRecord,
        ));
        let response = form
            .submit(RequestContext::new(&oracle, &p), ())
            .unwrap()
            .accepted()
            .unwrap();
        assert_eq!(response.body_str(), r#"{"ok":true}"#);
    }
}
