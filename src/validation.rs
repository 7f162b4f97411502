//! Structural validation of ExposureClasses and Shoots
//!
//! Pure functions returning every violation found. Admission is expected to
//! reject invalid objects; the operator only reports what it sees.

use std::fmt;

use kube::ResourceExt;

use crate::crd::{ExposureClass, Shoot};

const DNS1123_LABEL_MAX: usize = 63;
const DNS1123_SUBDOMAIN_MAX: usize = 253;

/// Kind of violation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorType {
    Required,
    Invalid,
}

/// A single violation at a field path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub error_type: FieldErrorType,
    pub field: String,
    pub value: String,
    pub detail: String,
}

impl FieldError {
    fn required(field: &str, detail: &str) -> Self {
        Self {
            error_type: FieldErrorType::Required,
            field: field.to_string(),
            value: String::new(),
            detail: detail.to_string(),
        }
    }

    fn invalid(field: &str, value: &str, detail: impl Into<String>) -> Self {
        Self {
            error_type: FieldErrorType::Invalid,
            field: field.to_string(),
            value: value.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_type {
            FieldErrorType::Required => write!(f, "{}: Required value: {}", self.field, self.detail),
            FieldErrorType::Invalid => write!(
                f,
                "{}: Invalid value: {:?}: {}",
                self.field, self.value, self.detail
            ),
        }
    }
}

/// Validate an ExposureClass
pub fn validate_exposure_class(class: &ExposureClass) -> Vec<FieldError> {
    let mut errors = validate_name(&class.name_any(), "metadata.name");

    if class.spec.handler.is_empty() {
        errors.push(FieldError::required("spec.handler", "must provide a handler"));
    } else {
        errors.extend(validate_dns1123_label(&class.spec.handler, "spec.handler"));
    }

    if let Some(selector) = class
        .spec
        .scheduling
        .as_ref()
        .and_then(|s| s.seed_selector.as_ref())
    {
        for key in selector.match_labels.keys() {
            if key.is_empty() {
                errors.push(FieldError::invalid(
                    "spec.scheduling.seedSelector.matchLabels",
                    key,
                    "label key must not be empty",
                ));
            }
        }
    }

    errors
}

/// Validate the fields of a Shoot the operator relies on
pub fn validate_shoot(shoot: &Shoot) -> Vec<FieldError> {
    let mut errors = validate_name(&shoot.name_any(), "metadata.name");

    if shoot.spec.cloud_profile_name.is_empty() {
        errors.push(FieldError::required(
            "spec.cloudProfileName",
            "must specify a cloud profile",
        ));
    }
    if shoot.spec.region.is_empty() {
        errors.push(FieldError::required("spec.region", "must specify a region"));
    }
    // an empty reference means the Shoot uses no ExposureClass
    if let Some(class) = shoot.spec.exposure_class_name.as_deref().filter(|c| !c.is_empty()) {
        errors.extend(validate_dns1123_subdomain(class, "spec.exposureClassName"));
    }

    errors
}

/// Object names must be DNS-1123 subdomains without consecutive hyphens
pub fn validate_name(name: &str, field: &str) -> Vec<FieldError> {
    let mut errors = validate_dns1123_subdomain(name, field);
    if name.contains("--") {
        errors.push(FieldError::invalid(
            field,
            name,
            "name may not contain two consecutive hyphens",
        ));
    }
    errors
}

pub fn validate_dns1123_subdomain(value: &str, field: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX {
        errors.push(FieldError::invalid(
            field,
            value,
            format!("must be no more than {} characters", DNS1123_SUBDOMAIN_MAX),
        ));
    }
    if value.is_empty() || !value.split('.').all(is_dns1123_label) {
        errors.push(FieldError::invalid(
            field,
            value,
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, \
             '-' or '.', and must start and end with an alphanumeric character",
        ));
    }
    errors
}

pub fn validate_dns1123_label(value: &str, field: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if value.len() > DNS1123_LABEL_MAX {
        errors.push(FieldError::invalid(
            field,
            value,
            format!("must be no more than {} characters", DNS1123_LABEL_MAX),
        ));
    }
    if !is_dns1123_label(value) {
        errors.push(FieldError::invalid(
            field,
            value,
            "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', \
             and must start and end with an alphanumeric character",
        ));
    }
    errors
}

fn is_dns1123_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
}
