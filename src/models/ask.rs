use garde::Validate;
use serde::{Deserialize, Serialize};

/// Form posted to `/ask`. Extra fields are allowed and kept in the raw body.
#[derive(Debug, Deserialize, Validate)]
pub struct AskForm {
    #[garde(length(min = 1, max = 1000))]
    pub question: String,
}

impl AskForm {
    /// Parse and validate a raw `application/x-www-form-urlencoded` body.
    ///
    /// Returns the body as text alongside the form, since the text is what a
    /// job is keyed on.
    pub fn from_body(body: &[u8]) -> Result<(String, AskForm), AskFormError> {
        let text = std::str::from_utf8(body).map_err(|_| AskFormError::NotUtf8)?;
        let form: AskForm = serde_urlencoded::from_str(text)?;
        let form = AskForm {
            question: form.question.trim().to_string(),
        };
        form.validate()?;
        Ok((text.to_string(), form))
    }
}

/// The question carried by a job input.
///
/// Inputs submitted over HTTP are form bodies; anything else is taken to be
/// the question itself.
pub fn question_from_input(input: &str) -> String {
    match serde_urlencoded::from_str::<AskForm>(input) {
        Ok(form) if !form.question.trim().is_empty() => form.question.trim().to_string(),
        _ => input.trim().to_string(),
    }
}

/// Decoded `key=value` pairs of a form body, for display.
pub fn form_pairs(input: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(input).unwrap_or_default()
}

/// Body of `GET /ping`, and of 404 responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
}

impl StatusMessage {
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: "Not found".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AskFormError {
    #[error("Request body is not valid UTF-8")]
    NotUtf8,

    #[error("Request body is not a valid form: {0}")]
    Decode(#[from] serde_urlencoded::de::Error),

    #[error("Invalid question: {0}")]
    Invalid(#[from] garde::Report),
}
