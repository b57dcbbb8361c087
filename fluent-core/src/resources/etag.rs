use crate::common::Result;
use crate::dag::PendingOperation;
use crate::http::HttpRequest;
use reqwest::header::{IF_MATCH, IF_NONE_MATCH};

/// Optimistic-concurrency intent for the next operation on a resource.
///
/// Holds no I/O. The generated resource layer records what the caller asked
/// for, reads the conditional header values when it builds the request, and
/// calls [`clear`](ETagState::clear) once the operation finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ETagState {
    implicit_check_on_create: bool,
    implicit_check_on_update: bool,
    etag_on_update: Option<String>,
    etag_on_delete: Option<String>,
}

impl ETagState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only create if absent (`If-None-Match: *`), or only update the version
    /// last read (`If-Match: <current etag>`).
    pub fn with_implicit_etag_check_on_create_or_update(&mut self, is_in_create_mode: bool) -> &mut Self {
        if is_in_create_mode {
            self.implicit_check_on_create = true;
        } else {
            self.implicit_check_on_update = true;
        }
        self
    }

    pub fn with_explicit_etag_check_on_update(&mut self, etag: impl Into<String>) -> &mut Self {
        self.etag_on_update = Some(etag.into());
        self
    }

    pub fn with_explicit_etag_check_on_delete(&mut self, etag: impl Into<String>) -> &mut Self {
        self.etag_on_delete = Some(etag.into());
        self
    }

    /// `If-Match` for an update. An explicit ETag wins over the implicit one.
    pub fn if_match_value_on_update(&self, current_etag: Option<&str>) -> Option<String> {
        if let Some(etag) = &self.etag_on_update {
            return Some(etag.clone());
        }
        if self.implicit_check_on_update {
            return current_etag.map(ToString::to_string);
        }
        None
    }

    pub fn if_match_value_on_delete(&self) -> Option<String> {
        self.etag_on_delete.clone()
    }

    pub fn if_none_match_value_on_create(&self) -> Option<&'static str> {
        self.implicit_check_on_create.then_some("*")
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Set the conditional headers matching `operation` on `request`
    pub fn apply_to_request(
        &self,
        request: &mut HttpRequest,
        operation: PendingOperation,
        current_etag: Option<&str>,
    ) -> Result<()> {
        match operation {
            PendingOperation::ToBeCreated => {
                if let Some(value) = self.if_none_match_value_on_create() {
                    request.insert_header(IF_NONE_MATCH, value)?;
                }
            }
            PendingOperation::ToBeUpdated => {
                if let Some(value) = self.if_match_value_on_update(current_etag) {
                    request.insert_header(IF_MATCH, &value)?;
                }
            }
            PendingOperation::ToBeRemoved => {
                if let Some(value) = self.if_match_value_on_delete() {
                    request.insert_header(IF_MATCH, &value)?;
                }
            }
            PendingOperation::None => {}
        }
        Ok(())
    }
}
