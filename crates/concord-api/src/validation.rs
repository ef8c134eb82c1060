//! Shape validation for credential requests

use crate::error::{ApiError, FieldError, Result};
use crate::types::{TokenCredentialRequest, TOKEN_CREDENTIAL_TYPE};

/// Options accompanying a create call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Requested dry-run stages (e.g., `All`)
    pub dry_run: Vec<String>,
}

impl CreateOptions {
    /// Options requesting a dry run of every stage
    pub fn dry_run_all() -> Self {
        Self {
            dry_run: vec!["All".to_string()],
        }
    }
}

/// Check the request's type and token
///
/// Stops at the first problem; each check depends on the one before it.
pub fn validate_request(request: &TokenCredentialRequest) -> Result<()> {
    let credential_type = request.spec.credential_type.as_deref().unwrap_or_default();
    if credential_type.is_empty() {
        return Err(invalid(
            request,
            FieldError::required("spec.type", "type must be supplied"),
        ));
    }

    if credential_type != TOKEN_CREDENTIAL_TYPE {
        return Err(invalid(
            request,
            FieldError::invalid("spec.type", credential_type, "unrecognized type"),
        ));
    }

    if request.token().unwrap_or_default().is_empty() {
        return Err(invalid(
            request,
            FieldError::required("spec.token.value", "token must be supplied"),
        ));
    }

    Ok(())
}

/// Reject options this virtual resource cannot honor
pub fn validate_options(request: &TokenCredentialRequest, options: &CreateOptions) -> Result<()> {
    if !options.dry_run.is_empty() {
        return Err(invalid(
            request,
            FieldError::not_supported("dryRun", options.dry_run.join(",")),
        ));
    }
    Ok(())
}

fn invalid(request: &TokenCredentialRequest, cause: FieldError) -> ApiError {
    ApiError::invalid(request.name(), vec![cause])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldErrorKind;

    fn only_cause(err: ApiError) -> FieldError {
        let causes = err.causes().to_vec();
        assert_eq!(causes.len(), 1, "expected one cause, got {:?}", causes);
        causes.into_iter().next().unwrap()
    }

    #[test]
    fn accepts_token_credential() {
        validate_request(&TokenCredentialRequest::new("abc", None)).unwrap();
    }

    #[test]
    fn missing_type_is_required() {
        let mut request = TokenCredentialRequest::new("abc", None);
        request.spec.credential_type = None;

        let cause = only_cause(validate_request(&request).unwrap_err());
        assert_eq!(cause.kind, FieldErrorKind::Required);
        assert_eq!(cause.field, "spec.type");
    }

    #[test]
    fn unknown_type_is_invalid() {
        let mut request = TokenCredentialRequest::new("abc", None);
        request.spec.credential_type = Some("Password".to_string());

        let cause = only_cause(validate_request(&request).unwrap_err());
        assert_eq!(cause.kind, FieldErrorKind::Invalid);
        assert_eq!(cause.field, "spec.type");
        assert_eq!(cause.value.as_deref(), Some("Password"));
        assert_eq!(cause.detail, "unrecognized type");
    }

    #[test]
    fn empty_token_names_token_value_field() {
        let cause = only_cause(validate_request(&TokenCredentialRequest::new("", None)).unwrap_err());
        assert_eq!(cause.kind, FieldErrorKind::Required);
        assert_eq!(cause.field, "spec.token.value");
        assert_eq!(cause.detail, "token must be supplied");
    }

    #[test]
    fn absent_token_names_token_value_field() {
        let mut request = TokenCredentialRequest::new("abc", None);
        request.spec.token = None;

        let cause = only_cause(validate_request(&request).unwrap_err());
        assert_eq!(cause.field, "spec.token.value");
    }

    #[test]
    fn type_is_checked_before_token() {
        let mut request = TokenCredentialRequest::new("", None);
        request.spec.credential_type = Some("Password".to_string());

        let cause = only_cause(validate_request(&request).unwrap_err());
        assert_eq!(cause.field, "spec.type");
    }

    #[test]
    fn dry_run_is_not_supported() {
        let request = TokenCredentialRequest::new("abc", None);
        validate_options(&request, &CreateOptions::default()).unwrap();

        let cause = only_cause(validate_options(&request, &CreateOptions::dry_run_all()).unwrap_err());
        assert_eq!(cause.kind, FieldErrorKind::NotSupported);
        assert_eq!(cause.field, "dryRun");
        assert_eq!(cause.value.as_deref(), Some("All"));
    }
}
