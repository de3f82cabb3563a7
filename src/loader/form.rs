//! Automatic form handling for mounted units
//!
//! A form is intercepted when it is marked for auto-binding or carries an
//! action. Placeholders in the action are resolved against the unit's
//! parameters, data, and computed properties before the body is encoded.

use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderValue, Method, StatusCode};
use log::{debug, warn};
use regex::Regex;
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use crate::core::{FetchRequest, Fetcher, RouterError, RouterResult};
use crate::query::ParamValue;
use crate::utils::encoding::encode_component;

use super::unit::ViewInstance;

/// Input type, as far as constraint validation and encoding care
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Text,
    Email,
    Number,
    File {
        file_name: String,
        content_type: String,
        content: Bytes,
    },
}

#[derive(Debug, Clone, Default)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    /// Name of the module validator to run after the native checks
    pub validation: Option<String>,
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::File {
                file_name: file_name.into(),
                content_type: content_type.into(),
                content: content.into(),
            },
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_validation(mut self, validator: impl Into<String>) -> Self {
        self.validation = Some(validator.into());
        self
    }

    fn has_file(&self) -> bool {
        matches!(&self.kind, FieldKind::File { content, .. } if !content.is_empty())
    }

    /// Native constraint validation
    pub fn check_validity(&self) -> bool {
        if let FieldKind::File { content, .. } = &self.kind {
            return !self.required || !content.is_empty();
        }
        let value = self.value.as_str();
        if value.is_empty() {
            return !self.required;
        }
        let len = value.chars().count();
        if self.min_length.is_some_and(|min| len < min) || self.max_length.is_some_and(|max| len > max) {
            return false;
        }
        if let Some(pattern) = &self.pattern {
            // invalid patterns are ignored, as browsers do
            if let Ok(re) = Regex::new(&format!("^(?:{pattern})$")) {
                if !re.is_match(value) {
                    return false;
                }
            }
        }
        match self.kind {
            FieldKind::Email => value
                .split_once('@')
                .is_some_and(|(user, domain)| !user.is_empty() && !domain.is_empty()),
            FieldKind::Number => value.parse::<f64>().is_ok(),
            _ => true,
        }
    }
}

/// A form as seen by the submit handler
#[derive(Debug, Clone, Default)]
pub struct FormSpec {
    pub action: Option<String>,
    pub method: Option<String>,
    /// Marked for auto-binding
    pub auto_form: bool,
    pub fields: Vec<FormField>,
    pub success_handler: Option<String>,
    pub error_handler: Option<String>,
    pub loading_handler: Option<String>,
    /// Route to navigate to after a successful submit
    pub redirect: Option<String>,
}

impl FormSpec {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn is_intercepted(&self) -> bool {
        self.auto_form || self.action.is_some()
    }

    fn has_file(&self) -> bool {
        self.fields.iter().any(FormField::has_file)
    }
}

/// Argument passed to named form handlers
#[derive(Debug)]
pub enum FormEvent<'a> {
    Loading(bool),
    Success(&'a JsonValue),
    Error(&'a RouterError),
}

/// Result of one submit
#[derive(Debug)]
pub enum FormOutcome {
    /// Neither auto-bound nor carrying an action
    NotIntercepted,
    /// Names of the fields that failed validation
    Invalid(Vec<String>),
    Submitted(JsonValue),
    Failed(RouterError),
}

/// Forms out of `forms` that get intercepted on submit
pub fn bind_auto_forms(forms: &[FormSpec]) -> Vec<&FormSpec> {
    forms
        .iter()
        .filter(|form| form.is_intercepted())
        .inspect(|form| debug!("Form auto-bound: {}", form.action.as_deref().unwrap_or("")))
        .collect()
}

fn param_to_string(value: ParamValue) -> String {
    value.to_string()
}

fn json_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Substitute every `{name}` in `action`; unresolved names stay as written.
pub fn process_action_params(action: &str, view: &ViewInstance) -> String {
    let mut processed = String::with_capacity(action.len());
    let mut rest = action;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let end = start + 1 + len;
        let name = &rest[start + 1..end];
        processed.push_str(&rest[..start]);

        let resolved = if name.is_empty() {
            None
        } else {
            view.context()
                .get_param(name)
                .map(param_to_string)
                .or_else(|| view.get(name).as_ref().and_then(json_to_string))
                .or_else(|| view.computed(name).as_ref().and_then(json_to_string))
        };
        match resolved {
            Some(value) => {
                debug!("Parameter resolved: {name} = {value}");
                processed.push_str(&encode_component(&value));
            }
            None => {
                warn!("Parameter '{name}' not found in component data, computed, or route params");
                processed.push_str(&rest[start..=end]);
            }
        }
        rest = &rest[end + 1..];
    }
    processed.push_str(rest);
    processed
}

/// Names of the fields failing native or custom validation.
pub fn validate_form(form: &FormSpec, view: &ViewInstance) -> Vec<String> {
    form.fields
        .iter()
        .filter(|field| {
            if !field.check_validity() {
                return true;
            }
            let Some(validator) = &field.validation else {
                return false;
            };
            match view.module().validate(validator, &field.value) {
                Some(Ok(valid)) => !valid,
                Some(Err(e)) => {
                    warn!("Validation function '{validator}' error: {e}");
                    true
                }
                None => {
                    warn!("Validation function '{validator}' not found");
                    false
                }
            }
        })
        .map(|field| field.name.clone())
        .collect()
}

fn multipart_body(form: &FormSpec, boundary: &str) -> Bytes {
    let mut body = BytesMut::new();
    for field in &form.fields {
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        match &field.kind {
            FieldKind::File {
                file_name,
                content_type,
                content,
            } => {
                body.put_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        field.name, file_name, content_type
                    )
                    .as_bytes(),
                );
                body.put_slice(content);
            }
            _ => {
                body.put_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        field.name, field.value
                    )
                    .as_bytes(),
                );
            }
        }
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{boundary}--\r\n").as_bytes());
    body.freeze()
}

/// Encode the form as multipart when a file is attached, as JSON otherwise.
pub fn build_submission(
    action: &str,
    method: &str,
    form: &FormSpec,
    token: Option<&str>,
) -> RouterResult<FetchRequest> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| RouterError::Validation(format!("Invalid form method {method}: {e}")))?;
    let mut request = FetchRequest::new(method, action);
    request
        .headers
        .insert(header::ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                request.headers.insert(header::AUTHORIZATION, value);
            }
            Err(e) => warn!("Token is not a valid header value, sending without it: {e}"),
        }
    }

    if form.has_file() {
        let boundary = format!("----FormBoundary{}", Uuid::new_v4().simple());
        let content_type = HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
            .map_err(|e| RouterError::Build(format!("Invalid multipart boundary: {e}")))?;
        request.headers.insert(header::CONTENT_TYPE, content_type);
        request.body = Some(multipart_body(form, &boundary));
    } else {
        let data: Map<String, JsonValue> = form
            .fields
            .iter()
            .filter(|field| !matches!(field.kind, FieldKind::File { .. }))
            .map(|field| (field.name.clone(), JsonValue::String(field.value.clone())))
            .collect();
        request.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        request.body = Some(Bytes::from(serde_json::to_vec(&data)?));
    }
    Ok(request)
}

/// Send the submission; non-success statuses carry the server's message.
pub async fn submit_form_data(fetcher: &dyn Fetcher, request: FetchRequest) -> RouterResult<JsonValue> {
    let response = fetcher.fetch(request).await?;
    if !response.is_success() {
        let status = response.status;
        let message = response
            .json()
            .ok()
            .and_then(|body| body.get("message").and_then(JsonValue::as_str).map(str::to_string))
            .unwrap_or_else(|| fallback_message(status));
        return Err(RouterError::http_with_message(status, message));
    }
    Ok(response.json().unwrap_or_else(|_| json!({ "success": true })))
}

fn fallback_message(status: StatusCode) -> String {
    format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}
