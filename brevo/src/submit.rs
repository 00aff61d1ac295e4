//! Form-submission pipeline. Maps submitted form fields onto a contact
//! payload according to the per-form settings and sends it upstream.
//!
//! Every failure path downgrades to [`SubmitOutcome::Skipped`]: the
//! person submitting the form must never see an error from this
//! integration, so problems are logged and the submission is dropped.

use crate::contacts::{ContactsClient, CreateContact, DoubleOptinContact};
use crate::phone::{DEFAULT_COUNTRY_CODE, format_phone, is_phone_attribute};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Per-form integration settings, under the key names used in stored
/// configuration records. Flags are the stored `"yes"`/`""` strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub sendinblue_use_global_api_key: String,
    pub sendinblue_api: String,
    pub sendinblue_list: String,
    pub sendinblue_double_optin: String,
    pub sendinblue_double_optin_template: String,
    pub sendinblue_double_optin_redirect_url: String,
    pub sendinblue_double_optin_check_if_email_exists: String,
    pub sendinblue_gdpr_checkbox: String,
    pub sendinblue_gdpr_checkbox_field: String,
    pub sendinblue_email_field: String,
    pub sendinblue_name_attribute_field: String,
    pub sendinblue_name_field: String,
    pub sendinblue_name_country_code: String,
    pub sendinblue_last_name_attribute_field: String,
    pub sendinblue_last_name_field: String,
    pub sendinblue_last_name_country_code: String,
}

/// Settings of the unsubscribe action, which deletes the contact.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UnsubscribeSettings {
    pub sendinblue_unsubscribe_use_global_api_key: String,
    pub sendinblue_unsubscribe_api: String,
    pub sendinblue_unsubscribe_gdpr_checkbox: String,
    pub sendinblue_unsubscribe_gdpr_checkbox_field: String,
    pub sendinblue_unsubscribe_email_field: String,
}

/// Site-level context the pipeline needs besides the form settings.
#[derive(Debug, Clone, Default)]
pub struct SubmitContext {
    pub base_url: String,
    pub global_api_key: String,
    /// Fallback redirect for double opt-in when the form sets none.
    pub default_redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingApiKey,
    MissingListId,
    MissingOptinTemplate,
    MissingEmailField,
    MissingEmail,
    MissingGdprField,
    GdprNotAccepted,
    UpstreamFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    DoubleOptinSent,
    Deleted,
    Skipped(SkipReason),
}

fn is_on(flag: &str) -> bool {
    flag == "yes"
}

fn resolve_api_key(use_global: &str, form_key: &str, global_key: &str) -> Option<String> {
    if is_on(use_global) {
        if global_key.is_empty() {
            tracing::debug!("global API key requested but not set");
            return None;
        }
        return Some(global_key.to_string());
    }
    if form_key.is_empty() {
        tracing::debug!("form API key not set");
        return None;
    }
    Some(form_key.to_string())
}

fn country_code(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        DEFAULT_COUNTRY_CODE.to_string()
    } else {
        digits
    }
}

/// Add one (attribute, field) mapping to the payload, formatting phone
/// values for SMS/WHATSAPP attributes.
fn push_attribute(
    attributes: &mut Map<String, Value>,
    attribute_name: &str,
    field_id: &str,
    code: &str,
    fields: &HashMap<String, String>,
) {
    if attribute_name.is_empty() || field_id.is_empty() {
        return;
    }
    let Some(value) = fields.get(field_id) else {
        return;
    };

    let mut value = value.clone();
    if is_phone_attribute(attribute_name) && !value.is_empty() {
        let formatted = format_phone(&value, &country_code(code));
        tracing::debug!(
            attribute = attribute_name,
            from = %value,
            to = %formatted,
            "formatted phone value"
        );
        value = formatted;
    }

    attributes.insert(attribute_name.to_string(), Value::String(value));
}

/// Run the subscribe action for one submission.
pub async fn run(
    settings: &FormSettings,
    fields: &HashMap<String, String>,
    ctx: &SubmitContext,
) -> SubmitOutcome {
    let Some(api_key) = resolve_api_key(
        &settings.sendinblue_use_global_api_key,
        &settings.sendinblue_api,
        &ctx.global_api_key,
    ) else {
        return SubmitOutcome::Skipped(SkipReason::MissingApiKey);
    };

    let Ok(list_id) = settings.sendinblue_list.parse::<i64>() else {
        tracing::debug!("list ID not set");
        return SubmitOutcome::Skipped(SkipReason::MissingListId);
    };

    let double_optin = is_on(&settings.sendinblue_double_optin);
    let mut redirect_url = String::new();
    let mut template_id = 0;
    if double_optin {
        let Ok(id) = settings.sendinblue_double_optin_template.parse::<i64>() else {
            tracing::debug!("double opt-in template ID not set");
            return SubmitOutcome::Skipped(SkipReason::MissingOptinTemplate);
        };
        template_id = id;
        redirect_url = if settings.sendinblue_double_optin_redirect_url.is_empty() {
            ctx.default_redirect_url.clone()
        } else {
            settings.sendinblue_double_optin_redirect_url.clone()
        };
    }

    if settings.sendinblue_email_field.is_empty() {
        tracing::debug!("email field ID not set");
        return SubmitOutcome::Skipped(SkipReason::MissingEmailField);
    }

    if is_on(&settings.sendinblue_gdpr_checkbox) {
        if settings.sendinblue_gdpr_checkbox_field.is_empty() {
            tracing::debug!("GDPR acceptance field ID not set");
            return SubmitOutcome::Skipped(SkipReason::MissingGdprField);
        }
        let accepted = fields
            .get(&settings.sendinblue_gdpr_checkbox_field)
            .is_some_and(|v| v == "on");
        if !accepted {
            tracing::debug!("GDPR checkbox not ticked");
            return SubmitOutcome::Skipped(SkipReason::GdprNotAccepted);
        }
    }

    let Some(email) = fields
        .get(&settings.sendinblue_email_field)
        .filter(|v| !v.is_empty())
    else {
        tracing::debug!("submission has no email value");
        return SubmitOutcome::Skipped(SkipReason::MissingEmail);
    };

    let mut attributes = Map::new();
    push_attribute(
        &mut attributes,
        &settings.sendinblue_name_attribute_field,
        &settings.sendinblue_name_field,
        &settings.sendinblue_name_country_code,
        fields,
    );
    push_attribute(
        &mut attributes,
        &settings.sendinblue_last_name_attribute_field,
        &settings.sendinblue_last_name_field,
        &settings.sendinblue_last_name_country_code,
        fields,
    );

    let client = ContactsClient::new(&ctx.base_url, &api_key);

    // Double opt-in only makes sense for contacts not already known.
    let mut email_exists = false;
    if double_optin && is_on(&settings.sendinblue_double_optin_check_if_email_exists) {
        email_exists = match client.exists(email).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::debug!(error = %err, "contact existence check failed, assuming absent");
                false
            }
        };
    }

    if double_optin && !email_exists {
        let contact = DoubleOptinContact {
            email: email.clone(),
            attributes,
            include_list_ids: vec![list_id],
            template_id,
            redirection_url: redirect_url,
        };
        match client.double_optin(&contact).await {
            Ok(()) => SubmitOutcome::DoubleOptinSent,
            Err(err) => {
                tracing::debug!(error = %err, "double opt-in request failed");
                SubmitOutcome::Skipped(SkipReason::UpstreamFailure)
            }
        }
    } else {
        let contact = CreateContact {
            email: email.clone(),
            attributes,
            update_enabled: true,
            list_ids: vec![list_id],
        };
        match client.upsert(&contact).await {
            Ok(()) => SubmitOutcome::Submitted,
            Err(err) => {
                tracing::debug!(error = %err, "contact upsert failed");
                SubmitOutcome::Skipped(SkipReason::UpstreamFailure)
            }
        }
    }
}

/// Run the unsubscribe action for one submission, deleting the contact.
pub async fn unsubscribe(
    settings: &UnsubscribeSettings,
    fields: &HashMap<String, String>,
    ctx: &SubmitContext,
) -> SubmitOutcome {
    let Some(api_key) = resolve_api_key(
        &settings.sendinblue_unsubscribe_use_global_api_key,
        &settings.sendinblue_unsubscribe_api,
        &ctx.global_api_key,
    ) else {
        return SubmitOutcome::Skipped(SkipReason::MissingApiKey);
    };

    if settings.sendinblue_unsubscribe_email_field.is_empty() {
        tracing::debug!("email field ID not set");
        return SubmitOutcome::Skipped(SkipReason::MissingEmailField);
    }

    let Some(email) = fields
        .get(&settings.sendinblue_unsubscribe_email_field)
        .filter(|v| !v.is_empty())
    else {
        tracing::debug!("submission has no email value");
        return SubmitOutcome::Skipped(SkipReason::MissingEmail);
    };

    if is_on(&settings.sendinblue_unsubscribe_gdpr_checkbox) {
        if settings.sendinblue_unsubscribe_gdpr_checkbox_field.is_empty() {
            tracing::debug!("GDPR acceptance field ID not set");
            return SubmitOutcome::Skipped(SkipReason::MissingGdprField);
        }
        let accepted = fields
            .get(&settings.sendinblue_unsubscribe_gdpr_checkbox_field)
            .is_some_and(|v| v == "on");
        if !accepted {
            tracing::debug!("GDPR checkbox not ticked");
            return SubmitOutcome::Skipped(SkipReason::GdprNotAccepted);
        }
    }

    let client = ContactsClient::new(&ctx.base_url, &api_key);
    match client.delete(email).await {
        Ok(()) => SubmitOutcome::Deleted,
        Err(err) => {
            tracing::debug!(error = %err, "contact delete failed");
            SubmitOutcome::Skipped(SkipReason::UpstreamFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_settings() -> FormSettings {
        FormSettings {
            sendinblue_api: "key-1".into(),
            sendinblue_list: "4".into(),
            sendinblue_email_field: "email".into(),
            sendinblue_name_attribute_field: "FIRSTNAME".into(),
            sendinblue_name_field: "name".into(),
            ..FormSettings::default()
        }
    }

    fn ctx(server: &MockServer) -> SubmitContext {
        SubmitContext {
            base_url: server.uri(),
            global_api_key: "global-key".into(),
            default_redirect_url: "https://example.com".into(),
        }
    }

    #[tokio::test]
    async fn plain_submission_upserts_contact() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/contacts"))
            .and(body_partial_json(json!({
                "email": "jo@example.com",
                "listIds": [4],
                "updateEnabled": true,
                "attributes": {"FIRSTNAME": "Jo"},
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = run(
            &base_settings(),
            &fields(&[("email", "jo@example.com"), ("name", "Jo")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Submitted);
    }

    #[tokio::test]
    async fn phone_attribute_value_is_formatted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/contacts"))
            .and(body_partial_json(json!({
                "attributes": {"SMS": "32471234567"},
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let settings = FormSettings {
            sendinblue_name_attribute_field: "SMS".into(),
            sendinblue_name_field: "phone".into(),
            ..base_settings()
        };
        let outcome = run(
            &settings,
            &fields(&[("email", "jo@example.com"), ("phone", "0471234567")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Submitted);
    }

    #[tokio::test]
    async fn double_optin_skips_existing_contact() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/contacts/jo%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
            .mount(&server)
            .await;
        // Existing contact goes through a plain upsert, not opt-in.
        Mock::given(method("POST"))
            .and(path("/v3/contacts"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let settings = FormSettings {
            sendinblue_double_optin: "yes".into(),
            sendinblue_double_optin_template: "3".into(),
            sendinblue_double_optin_check_if_email_exists: "yes".into(),
            ..base_settings()
        };
        let outcome = run(
            &settings,
            &fields(&[("email", "jo@example.com"), ("name", "Jo")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Submitted);
    }

    #[tokio::test]
    async fn double_optin_sends_confirmation_for_new_contact() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/contacts/doubleOptinConfirmation"))
            .and(body_partial_json(json!({
                "templateId": 3,
                "includeListIds": [4],
                "redirectionUrl": "https://example.com",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let settings = FormSettings {
            sendinblue_double_optin: "yes".into(),
            sendinblue_double_optin_template: "3".into(),
            ..base_settings()
        };
        let outcome = run(
            &settings,
            &fields(&[("email", "jo@example.com"), ("name", "Jo")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::DoubleOptinSent);
    }

    #[tokio::test]
    async fn gdpr_checkbox_gates_submission() {
        let server = MockServer::start().await;

        let settings = FormSettings {
            sendinblue_gdpr_checkbox: "yes".into(),
            sendinblue_gdpr_checkbox_field: "accept".into(),
            ..base_settings()
        };
        let outcome = run(
            &settings,
            &fields(&[("email", "jo@example.com"), ("accept", "off")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Skipped(SkipReason::GdprNotAccepted));
    }

    #[tokio::test]
    async fn global_key_toggle_uses_site_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/contacts"))
            .and(wiremock::matchers::header("api-key", "global-key"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let settings = FormSettings {
            sendinblue_use_global_api_key: "yes".into(),
            sendinblue_api: String::new(),
            ..base_settings()
        };
        let outcome = run(
            &settings,
            &fields(&[("email", "jo@example.com")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Submitted);
    }

    #[tokio::test]
    async fn upstream_failure_is_swallowed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v3/contacts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = run(
            &base_settings(),
            &fields(&[("email", "jo@example.com")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Skipped(SkipReason::UpstreamFailure));
    }

    #[tokio::test]
    async fn missing_list_id_skips() {
        let server = MockServer::start().await;
        let settings = FormSettings {
            sendinblue_list: String::new(),
            ..base_settings()
        };
        let outcome = run(
            &settings,
            &fields(&[("email", "jo@example.com")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Skipped(SkipReason::MissingListId));
    }

    #[tokio::test]
    async fn unsubscribe_deletes_contact() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v3/contacts/jo%40example.com"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let settings = UnsubscribeSettings {
            sendinblue_unsubscribe_api: "key-1".into(),
            sendinblue_unsubscribe_email_field: "email".into(),
            ..UnsubscribeSettings::default()
        };
        let outcome = unsubscribe(
            &settings,
            &fields(&[("email", "jo@example.com")]),
            &ctx(&server),
        )
        .await;
        assert_eq!(outcome, SubmitOutcome::Deleted);
    }
}
