//! Request context building and HTTP-to-request mapping

use crate::principal::Principal;
use crate::types::{actions, Context};
use serde_json::Value;

/// Builds the per-request context map.
///
/// Path and query parameters are copied verbatim; the `user:*` keys of the
/// principal and the `request:*` keys are applied last and win on collision.
#[derive(Debug, Default, Clone)]
pub struct ContextBuilder {
    params: Context,
    principal: Context,
    request: Context,
    extra: Context,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn principal(mut self, principal: &Principal) -> Self {
        self.principal = principal.context();
        self
    }

    pub fn path_params<'a, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in params {
            self.params.insert(key.to_string(), Value::from(value));
        }
        self
    }

    /// Only the first value of a repeated query parameter is kept
    pub fn query_params<'a, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in params {
            self.params
                .entry(key.to_string())
                .or_insert_with(|| Value::from(value));
        }
        self
    }

    pub fn request(mut self, method: &str, path: &str) -> Self {
        self.request.insert("request:method".to_string(), Value::from(method));
        self.request.insert("request:path".to_string(), Value::from(path));
        self
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Context {
        let mut context = self.params;
        context.extend(self.extra);
        context.extend(self.principal);
        context.extend(self.request);
        context
    }
}

/// Map an HTTP method to an action atom
pub fn action_from_method(method: &str) -> &'static str {
    match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" => actions::READ,
        "POST" => actions::CREATE,
        "PUT" | "PATCH" => actions::UPDATE,
        "DELETE" => actions::DELETE,
        _ => actions::READ,
    }
}

/// Derive a resource name from a request path: the segment after
/// `/api/<version>/`, else the first segment
pub fn resource_from_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    if let Some(i) = segments.iter().position(|s| *s == "api") {
        if let Some(resource) = segments.get(i + 2).filter(|s| !s.is_empty()) {
            return resource.to_string();
        }
    }

    match segments.first() {
        Some(first) if !first.is_empty() => first.to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_from_method() {
        assert_eq!(action_from_method("GET"), "read");
        assert_eq!(action_from_method("head"), "read");
        assert_eq!(action_from_method("POST"), "create");
        assert_eq!(action_from_method("PATCH"), "update");
        assert_eq!(action_from_method("PUT"), "update");
        assert_eq!(action_from_method("DELETE"), "delete");
        assert_eq!(action_from_method("OPTIONS"), "read");
    }

    #[test]
    fn test_resource_from_path() {
        assert_eq!(resource_from_path("/api/v1/posts/42"), "posts");
        assert_eq!(resource_from_path("/api/v2/wiki"), "wiki");
        assert_eq!(resource_from_path("/tasks/7?done=true"), "tasks");
        assert_eq!(resource_from_path("/api/v1"), "api");
        assert_eq!(resource_from_path("/"), "unknown");
        assert_eq!(resource_from_path(""), "unknown");
    }

    #[test]
    fn test_builder_precedence() {
        let principal = Principal {
            user_id: "u1".into(),
            realm_id: "R1".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            roles: vec!["editor".into()],
        };

        let context = ContextBuilder::new()
            .path_params([("id", "42"), ("user:id", "spoofed")])
            .query_params([("page", "2"), ("page", "3"), ("id", "99")])
            .principal(&principal)
            .request("GET", "/api/v1/posts/42")
            .insert("ip", "10.0.0.1")
            .build();

        assert_eq!(context["id"], json!("42"));
        assert_eq!(context["page"], json!("2"));
        assert_eq!(context["user:id"], json!("u1"));
        assert_eq!(context["user:roles"], json!(["editor"]));
        assert_eq!(context["request:method"], json!("GET"));
        assert_eq!(context["ip"], json!("10.0.0.1"));
    }
}
