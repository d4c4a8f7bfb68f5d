//! Field validation and form feedback.
//!
//! Validators never fail a request; they append messages to [`Feedback`] and
//! the form decides whether to proceed.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLevel {
    Info,
    Error,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FeedbackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub level: FeedbackLevel,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Feedback {
    messages: Vec<FeedbackMessage>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.messages.push(FeedbackMessage {
            field: Some(field.to_string()),
            level: FeedbackLevel::Error,
            message: message.into(),
        });
    }

    pub fn form_error(&mut self, message: impl Into<String>) {
        self.messages.push(FeedbackMessage {
            field: None,
            level: FeedbackLevel::Error,
            message: message.into(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.messages.push(FeedbackMessage {
            field: None,
            level: FeedbackLevel::Info,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.level == FeedbackLevel::Error)
    }

    pub fn errors_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FeedbackMessage> {
        self.messages.iter().filter(move |m| {
            m.level == FeedbackLevel::Error && m.field.as_deref() == Some(field)
        })
    }

    pub fn messages(&self) -> &[FeedbackMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

pub trait Validator<T: ?Sized> {
    fn validate(&self, field: &str, value: &T, feedback: &mut Feedback);
}

/// Required integer within `[min, max]`, both ends inclusive.
#[derive(Clone, Copy, Debug)]
pub struct RangeValidator {
    pub min: i64,
    pub max: i64,
}

impl RangeValidator {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Validator<Option<i64>> for RangeValidator {
    fn validate(&self, field: &str, value: &Option<i64>, feedback: &mut Feedback) {
        match value {
            None => feedback.error(field, format!("'{}' is required", field)),
            Some(v) if !self.contains(*v) => feedback.error(
                field,
                format!(
                    "'{}' must be between {} and {}, got {}",
                    field, self.min, self.max, v
                ),
            ),
            Some(_) => {}
        }
    }
}

/// String whose length in characters lies within `[min, max]`.
#[derive(Clone, Copy, Debug)]
pub struct StringLengthValidator {
    pub min: usize,
    pub max: usize,
}

impl StringLengthValidator {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

impl Validator<str> for StringLengthValidator {
    fn validate(&self, field: &str, value: &str, feedback: &mut Feedback) {
        let len = value.chars().count();
        if len < self.min || len > self.max {
            feedback.error(
                field,
                format!(
                    "'{}' must be between {} and {} characters, got {}",
                    field, self.min, self.max, len
                ),
            );
        }
    }
}

/// Password and its confirmation must match whenever a password is given.
#[derive(Clone, Copy, Debug, Default)]
pub struct EqualInputValidator;

impl EqualInputValidator {
    pub fn validate(&self, field: &str, value: &str, confirmation: &str, feedback: &mut Feedback) {
        if value.is_empty() && confirmation.is_empty() {
            return;
        }
        if value != confirmation {
            feedback.error(field, format!("'{}' and its confirmation do not match", field));
        }
    }
}
