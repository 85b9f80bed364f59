//! Verified claim sets and the helpers that read them.
//!
//! Claims are kept as an open JSON map because custom issuers put identity
//! data under arbitrary, sometimes nested, keys. Paths use dots to step into
//! nested objects (`"data.org.name"`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claim names checked for scopes, in priority order. The first one present
/// wins, even if it holds an empty value.
pub const SCOPE_CLAIMS: &[&str] = &["scope", "scopes", "scp"];

/// Claim names holding a first (or full) name, in priority order.
pub const FIRST_NAME_CLAIMS: &[&str] =
    &["given_name", "name", "preferred_username", "firstName", "first_name"];

/// Claim names holding a family name, in priority order.
pub const LAST_NAME_CLAIMS: &[&str] = &["family_name", "lastName", "last_name"];

/// A JWT claim set.
///
/// # Examples
///
/// ```
/// use forge_common_authn::Claims;
/// use serde_json::json;
///
/// let claims = Claims::try_from(json!({
///     "sub": "user-1",
///     "data": { "org": "acme" },
///     "scope": "read write",
/// }))
/// .unwrap();
///
/// assert_eq!(claims.subject(), Some("user-1"));
/// assert_eq!(claims.get_str("data.org"), Some("acme"));
/// assert_eq!(claims.scopes(), vec!["read", "write"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl TryFrom<Value> for Claims {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Claims {
    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Look up a value by dot-separated path.
    ///
    /// Returns `None` for an empty path, a missing key, a `null` value, or
    /// any intermediate step that is not an object.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }

        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }

        (!current.is_null()).then_some(current)
    }

    /// Look up a non-empty string by dot-separated path.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Return the first non-empty string found across `paths`.
    #[must_use]
    pub fn first_str(&self, paths: &[&str]) -> Option<&str> {
        paths.iter().find_map(|path| self.get_str(path))
    }

    /// Look up a list-valued claim, accepting every shape [`parse_list`]
    /// understands. Missing claims yield an empty list.
    #[must_use]
    pub fn get_list(&self, path: &str) -> Vec<String> {
        self.get(path).map(parse_list).unwrap_or_default()
    }

    /// The `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// The `sub` claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// The `email` claim.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    /// The `aud` claim, which may be a single string or a list.
    #[must_use]
    pub fn audiences(&self) -> Vec<String> {
        match self.0.get("aud") {
            Some(Value::String(aud)) if !aud.is_empty() => vec![aud.clone()],
            Some(Value::Array(values)) => {
                values.iter().filter_map(Value::as_str).map(str::to_owned).collect()
            },
            _ => Vec::new(),
        }
    }

    /// Scopes from the first present claim in [`SCOPE_CLAIMS`].
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        SCOPE_CLAIMS
            .iter()
            .find_map(|name| self.0.get(*name))
            .map(parse_list)
            .unwrap_or_default()
    }

    /// Returns `true` when `required` is empty or any token audience is in it.
    #[must_use]
    pub fn has_any_audience(&self, required: &[String]) -> bool {
        if required.is_empty() {
            return true;
        }
        self.audiences().iter().any(|aud| required.contains(aud))
    }

    /// Returns `true` when every scope in `required` is granted.
    #[must_use]
    pub fn has_all_scopes(&self, required: &[String]) -> bool {
        if required.is_empty() {
            return true;
        }
        let granted = self.scopes();
        required.iter().all(|scope| granted.contains(scope))
    }

    /// First and last name.
    ///
    /// When no family-name claim exists, the first-name value is split on
    /// its first run of whitespace ("Jane Q Doe" gives "Jane" and "Q Doe").
    #[must_use]
    pub fn names(&self) -> (Option<String>, Option<String>) {
        let first = self.first_str(FIRST_NAME_CLAIMS);
        match self.first_str(LAST_NAME_CLAIMS) {
            Some(last) => (first.map(str::to_owned), Some(last.to_owned())),
            None => match first {
                Some(full) => split_full_name(full),
                None => (None, None),
            },
        }
    }
}

/// Split a display name on its first whitespace run.
#[must_use]
pub fn split_full_name(full: &str) -> (Option<String>, Option<String>) {
    let trimmed = full.trim();
    if trimmed.is_empty() {
        return (None, None);
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => {
            let rest = rest.trim();
            (Some(first.to_owned()), (!rest.is_empty()).then(|| rest.to_owned()))
        },
        None => (Some(trimmed.to_owned()), None),
    }
}

/// Turn a multi-valued claim into a list of strings.
///
/// Accepted shapes, tried in order:
///
/// 1. a JSON array (strings kept, numbers and booleans stringified)
/// 2. a string holding a JSON array (`"[\"a\", \"b\"]"`)
/// 3. a comma-delimited string
/// 4. a semicolon-delimited string
/// 5. a whitespace-delimited string
/// 6. a single scalar
///
/// Entries are trimmed and empties dropped.
///
/// # Examples
///
/// ```
/// use forge_common_authn::claims::parse_list;
/// use serde_json::json;
///
/// assert_eq!(parse_list(&json!(["a", "b"])), vec!["a", "b"]);
/// assert_eq!(parse_list(&json!("a, b;c")), vec!["a", "b;c"]);
/// assert_eq!(parse_list(&json!("a;b")), vec!["a", "b"]);
/// assert_eq!(parse_list(&json!("a b")), vec!["a", "b"]);
/// ```
#[must_use]
pub fn parse_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).filter_map(trimmed).collect(),
        Value::String(s) => parse_list_str(s),
        Value::Number(_) | Value::Bool(_) => scalar_to_string(value).into_iter().collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

/// String form of [`parse_list`].
#[must_use]
pub fn parse_list_str(s: &str) -> Vec<String> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }

    if s.starts_with('[')
        && s.ends_with(']')
        && let Ok(items) = serde_json::from_str::<Vec<String>>(s)
    {
        return items.iter().filter_map(|item| trimmed(item.clone())).collect();
    }

    for delimiter in [',', ';'] {
        if s.contains(delimiter) {
            return s.split(delimiter).filter_map(|part| trimmed(part.to_owned())).collect();
        }
    }

    s.split_whitespace().map(str::to_owned).collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn trimmed(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else if t.len() == s.len() {
        Some(s)
    } else {
        Some(t.to_owned())
    }
}
