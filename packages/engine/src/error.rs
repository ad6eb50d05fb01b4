use thiserror::Error;

use crate::errors::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{title}: {description}")]
pub struct StrataError {
    pub code: String,
    pub title: String,
    pub description: String,
}

impl StrataError {
    pub fn new(code: &str, title: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}
