//! Recursive rewrite of stored configuration trees. Form widgets
//! carrying this integration's settings can sit arbitrarily deep inside
//! unrelated wrappers, so the walk descends into every map value and
//! list element regardless of whether the current node matched.

use crate::report::MigrationReport;
use brevo::cache::{AttributeCache, AttributeMap};
use brevo::types::normalize_name;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

const WIDGET_TYPE_KEY: &str = "widgetType";
const FORM_WIDGET: &str = "form";
const SUBMIT_ACTIONS_KEY: &str = "submit_actions";
const INTEGRATION_ACTION: &str = "sendinblue integration";

const USE_GLOBAL_KEY: &str = "sendinblue_use_global_api_key";
const FORM_API_KEY: &str = "sendinblue_api";
const NAME_ATTRIBUTE_KEY: &str = "sendinblue_name_attribute_field";
const LAST_NAME_ATTRIBUTE_KEY: &str = "sendinblue_last_name_attribute_field";

pub struct TreeMigrator<'a> {
    cache: &'a AttributeCache,
    global_api_key: &'a str,
}

impl<'a> TreeMigrator<'a> {
    pub fn new(cache: &'a AttributeCache, global_api_key: &'a str) -> Self {
        TreeMigrator {
            cache,
            global_api_key,
        }
    }

    /// Rewrite one tree in place. Returns whether anything changed;
    /// unresolved attribute references are appended to `report`.
    pub async fn migrate(&self, tree: &mut Value, report: &mut MigrationReport) -> bool {
        let mut modified = false;
        self.visit(tree, &mut modified, report).await;
        modified
    }

    fn visit<'v>(
        &'v self,
        node: &'v mut Value,
        modified: &'v mut bool,
        report: &'v mut MigrationReport,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'v>> {
        Box::pin(async move {
            match node {
                Value::Object(map) => {
                    if is_integration_form(map) {
                        let api_key = self.resolve_api_key(map);
                        let attributes = self.cache.get_attributes(&api_key).await;
                        if let Some(Value::Object(settings)) = map.get_mut("settings") {
                            rewrite_attribute_field(
                                settings,
                                NAME_ATTRIBUTE_KEY,
                                &attributes,
                                modified,
                                report,
                            );
                            rewrite_attribute_field(
                                settings,
                                LAST_NAME_ATTRIBUTE_KEY,
                                &attributes,
                                modified,
                                report,
                            );
                        }
                    }
                    for value in map.values_mut() {
                        self.visit(value, &mut *modified, &mut *report).await;
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        self.visit(item, &mut *modified, &mut *report).await;
                    }
                }
                _ => {}
            }
        })
    }

    /// Effective credential for one form node: the global key when the
    /// toggle is on, else the per-form key, else the global key as a
    /// fallback. All three absent yields "", for which the cache returns
    /// no attributes, so validation is skipped while the rewrite still
    /// runs.
    fn resolve_api_key(&self, map: &Map<String, Value>) -> String {
        let settings = map.get("settings");
        let setting = |key: &str| {
            settings
                .and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
        };

        if setting(USE_GLOBAL_KEY) == "yes" && !self.global_api_key.is_empty() {
            return self.global_api_key.to_string();
        }
        let form_key = setting(FORM_API_KEY);
        if !form_key.is_empty() {
            return form_key.to_string();
        }
        self.global_api_key.to_string()
    }
}

/// A map node is a form widget with this integration enabled.
fn is_integration_form(map: &Map<String, Value>) -> bool {
    if map.get(WIDGET_TYPE_KEY).and_then(Value::as_str) != Some(FORM_WIDGET) {
        return false;
    }
    map.get("settings")
        .and_then(|s| s.get(SUBMIT_ACTIONS_KEY))
        .and_then(Value::as_array)
        .is_some_and(|actions| {
            actions
                .iter()
                .any(|action| action.as_str() == Some(INTEGRATION_ACTION))
        })
}

fn rewrite_attribute_field(
    settings: &mut Map<String, Value>,
    key: &str,
    attributes: &AttributeMap,
    modified: &mut bool,
    report: &mut MigrationReport,
) {
    let Some(value) = settings.get(key).and_then(Value::as_str).map(str::to_owned) else {
        return;
    };
    if value.is_empty() {
        return;
    }

    let formatted = normalize_name(&value);
    if formatted != value {
        settings.insert(key.to_string(), Value::String(formatted.clone()));
        *modified = true;
    }

    // Rewrite and validation are independent: the reference is checked
    // even when the spelling was already canonical. An empty attribute
    // map means the account could not be queried, so stay quiet.
    if !attributes.is_empty() && !attributes.contains_key(&formatted) {
        report.unresolved.push(formatted);
    }
}
