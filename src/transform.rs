//! Lock service dynamic configuration upgrade.
//!
//! `transform_lock_dynamic_config` is pure: it takes the stored document and the
//! deployment values it depends on, and returns the upgraded document with a
//! flag telling whether anything changed. Rules run in a fixed order since the
//! last one relies on `baseEndpoint` having been populated.

use serde_json::{json, Map, Value};

pub const OPA_CONFIGURATION: &str = "opaConfiguration";
pub const TOKEN_CHANNELS: &str = "tokenChannels";
pub const NEW_TOKEN_CHANNEL: &str = "jans_token";
pub const OLD_TOKEN_CHANNEL: &str = "id_token";
pub const REMOVED_KEYS: [&str; 2] = ["messageConsumerType", "policyConsumerType"];

/// Deployment values the transformation depends on.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    pub hostname: String,
    pub opa_url: String,
    pub client_id: Option<String>,
    pub client_password: Option<String>,
}

impl TransformContext {
    pub fn base_endpoint(&self) -> String { format!("https://{}/jans-auth/v1", self.hostname) }
    pub fn token_url(&self) -> String { format!("https://{}/jans-auth/restv1/token", self.hostname) }
}

fn opt_string(v: &Option<String>) -> Value {
    v.as_ref().map(|s| Value::String(s.clone())).unwrap_or(Value::Null)
}

fn default_endpoint_details() -> Value {
    json!({
        "jans-config-api/lock/audit/telemetry": [
            "https://jans.io/oauth/lock/telemetry.readonly",
            "https://jans.io/oauth/lock/telemetry.write"
        ],
        "jans-config-api/lock/audit/log": [
            "https://jans.io/oauth/lock/log.write"
        ],
        "jans-config-api/lock/audit/health": [
            "https://jans.io/oauth/lock/health.readonly",
            "https://jans.io/oauth/lock/health.write"
        ]
    })
}

fn default_endpoint_groups() -> Value {
    json!({ "audit": ["telemetry", "health", "log"] })
}

/// Set `key` to `value` unless it already holds exactly that. Returns whether it wrote.
fn replace_if_different(map: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    if map.get(key) == Some(&value) { return false; }
    map.insert(key.to_string(), value);
    true
}

/// Mutable view of a nested object, created (or replaced, if not an object) on demand.
/// The flag reports whether the parent had to be modified.
fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> (&'a mut Map<String, Value>, bool) {
    let created = !matches!(map.get(key), Some(Value::Object(_)));
    if created {
        map.insert(key.to_string(), Value::Object(Map::new()));
    }
    match map.get_mut(key) {
        Some(Value::Object(inner)) => (inner, created),
        _ => unreachable!("object inserted above"),
    }
}

fn apply_opa_base_url(conf: &mut Map<String, Value>, ctx: &TransformContext) -> bool {
    let (opa, created) = object_entry(conf, OPA_CONFIGURATION);
    replace_if_different(opa, "baseUrl", Value::String(ctx.opa_url.clone())) || created
}

/// Move `old` to `new`. The old key never survives; its value is only kept when
/// `new` was not already set.
fn rename_with_transfer(conf: &mut Map<String, Value>, old: &str, new: &str) -> bool {
    let previous = conf.remove(old);
    let removed = previous.is_some();
    if conf.contains_key(new) { return removed; }
    conf.insert(new.to_string(), previous.unwrap_or_else(|| Value::String(String::new())));
    true
}

fn insert_missing(conf: &mut Map<String, Value>, ctx: &TransformContext) -> bool {
    let mut changed = false;
    changed |= rename_with_transfer(conf, "policiesJsonUrisAccessToken", "policiesJsonUrisAuthorizationToken");
    changed |= rename_with_transfer(conf, "policiesZipUrisAccessToken", "policiesZipUrisAuthorizationToken");

    let defaults: [(&str, Value); 8] = [
        ("policiesZipUris", json!([])),
        ("pdpType", json!("OPA")),
        ("baseEndpoint", Value::String(ctx.base_endpoint())),
        ("clientId", opt_string(&ctx.client_id)),
        ("clientPassword", opt_string(&ctx.client_password)),
        ("tokenUrl", Value::String(ctx.token_url())),
        ("endpointDetails", default_endpoint_details()),
        ("endpointGroups", default_endpoint_groups()),
    ];
    for (key, value) in defaults {
        if !conf.contains_key(key) {
            conf.insert(key.to_string(), value);
            changed = true;
        }
    }
    changed
}

fn insert_missing_opa_keys(conf: &mut Map<String, Value>) -> bool {
    let (opa, created) = object_entry(conf, OPA_CONFIGURATION);
    if opa.contains_key("accessToken") { return created; }
    opa.insert("accessToken".to_string(), Value::String(String::new()));
    true
}

fn migrate_token_channels(conf: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    if !matches!(conf.get(TOKEN_CHANNELS), Some(Value::Array(_))) {
        conf.insert(TOKEN_CHANNELS.to_string(), Value::Array(Vec::new()));
        changed = true;
    }
    let Some(Value::Array(channels)) = conf.get_mut(TOKEN_CHANNELS) else { return changed };
    if !channels.iter().any(|c| c.as_str() == Some(NEW_TOKEN_CHANNEL)) {
        channels.push(Value::String(NEW_TOKEN_CHANNEL.to_string()));
        changed = true;
    }
    let before = channels.len();
    channels.retain(|c| c.as_str() != Some(OLD_TOKEN_CHANNEL));
    changed || channels.len() != before
}

fn remove_deprecated(conf: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    for key in REMOVED_KEYS {
        changed |= conf.remove(key).is_some();
    }
    changed
}

/// Upgrade one lock dynamic configuration document.
///
/// Documents that are not JSON objects are returned untouched with `false`.
pub fn transform_lock_dynamic_config(conf: Value, ctx: &TransformContext) -> (Value, bool) {
    let Value::Object(mut conf) = conf else { return (conf, false) };

    let mut changed = apply_opa_base_url(&mut conf, ctx);
    changed |= insert_missing(&mut conf, ctx);
    changed |= insert_missing_opa_keys(&mut conf);
    changed |= migrate_token_channels(&mut conf);
    changed |= remove_deprecated(&mut conf);
    // base endpoint moved from jans-lock to jans-auth
    changed |= replace_if_different(&mut conf, "baseEndpoint", Value::String(ctx.base_endpoint()));

    (Value::Object(conf), changed)
}
