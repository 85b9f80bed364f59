//! Structured fuzz target for claim mapping.
//!
//! Uses the `arbitrary` crate to generate structured claim sets, then runs
//! them through every membership derivation: realm roles, the `access`
//! list, and configured claim mappings. This reaches deeper code paths than
//! raw byte fuzzing because the inputs have plausible structure.

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};

use forge_common_authn::{
    Claims, ClaimMapping,
    mapping::resolve_org_data,
    processors::{keycloak::org_data_from_realm_roles, legacy_v1::has_org_access},
};

/// A claim value in one of the shapes issuers actually send.
#[derive(Debug, Arbitrary)]
enum FuzzedValue {
    /// Plain string, possibly delimited
    Str(String),
    /// JSON array of strings
    List(Vec<String>),
    /// Number
    Num(i64),
    /// Boolean
    Bool(bool),
    /// Nested object with one key
    Nested(String, Box<FuzzedValue>),
    /// Explicit null
    Null,
}

impl FuzzedValue {
    fn to_json(&self) -> Value {
        match self {
            Self::Str(s) => json!(s),
            Self::List(items) => json!(items),
            Self::Num(n) => json!(n),
            Self::Bool(b) => json!(b),
            Self::Nested(key, inner) => json!({ key: inner.to_json() }),
            Self::Null => Value::Null,
        }
    }
}

/// Structured input representing a fuzzed claim set.
#[derive(Debug, Arbitrary)]
struct FuzzedClaims {
    /// Realm roles, usually `<org>:<ROLE>`
    realm_roles: Vec<String>,
    /// `access` entries as (type, name)
    access: Vec<(String, String)>,
    /// Organization claim for dynamic mappings
    org: FuzzedValue,
    /// Display name claim for dynamic mappings
    display: FuzzedValue,
    /// Roles claim
    roles: FuzzedValue,
    /// Organization requested by the caller
    requested_org: String,
    /// Extra top-level claims
    extra: Vec<(String, FuzzedValue)>,
}

fn mappings() -> Vec<ClaimMapping> {
    vec![
        ClaimMapping::builder().org_name("Acme").roles_attribute("forge.roles").build(),
        ClaimMapping::builder().org_name("ops").is_service_account(true).build(),
        ClaimMapping::builder()
            .org_attribute("tenant.org")
            .org_display_attribute("tenant.display")
            .roles_attribute("tenant.roles")
            .build(),
    ]
}

fuzz_target!(|input: FuzzedClaims| {
    let mut object = serde_json::Map::new();
    for (key, value) in &input.extra {
        object.insert(key.clone(), value.to_json());
    }
    object.insert("realm_access".to_owned(), json!({ "roles": input.realm_roles }));
    object.insert(
        "access".to_owned(),
        Value::Array(
            input.access.iter().map(|(t, n)| json!({ "type": t, "name": n })).collect(),
        ),
    );
    object.insert("forge".to_owned(), json!({ "roles": input.roles.to_json() }));
    object.insert(
        "tenant".to_owned(),
        json!({
            "org": input.org.to_json(),
            "display": input.display.to_json(),
            "roles": input.roles.to_json(),
        }),
    );

    let Ok(claims) = Claims::try_from(Value::Object(object)) else {
        return;
    };

    // Realm roles: every derived org name is lowercased and non-empty
    let org_data = org_data_from_realm_roles(&claims.get_list("realm_access.roles"));
    for (name, entry) in &org_data {
        assert!(!name.is_empty());
        assert_eq!(name, &entry.name);
        assert!(!entry.roles.is_empty());
    }

    let _ = has_org_access(&claims, &input.requested_org);

    // Mapping: a success always describes exactly the requested org
    let reserved: BTreeSet<String> = ["acme".to_owned(), "ops".to_owned()].into();
    if let Ok(resolution) =
        resolve_org_data(&mappings(), &reserved, &claims, &input.requested_org, chrono::Utc::now())
    {
        assert_eq!(resolution.org_data.len(), 1);
        let requested = input.requested_org.trim().to_lowercase();
        assert!(resolution.org_data.contains_key(&requested));
    }
});
