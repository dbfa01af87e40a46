//! User service.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::resource::Resource;
use super::validate::{Mode, Validator, default_field, retain_fields};
use crate::error::AppResult;
use crate::query::Filter;
use crate::store::document::{Document, ID_FIELD};
use crate::store::Collection;

/// Roles a user may hold.
pub const ROLES: [&str; 4] = ["user", "guide", "lead-guide", "admin"];

const WRITABLE_FIELDS: [&str; 5] = ["name", "email", "photo", "role", "active"];

/// Loose email shape check: something@something.tld, no whitespace.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex literal")
});

/// Inactive users are hidden from every read, including references.
pub fn active_filter() -> Filter {
    Filter::new().ne("active", false)
}

pub struct UserService {
    users: Arc<dyn Collection>,
}

impl UserService {
    pub fn new(users: Arc<dyn Collection>) -> Self {
        Self { users }
    }

    fn validate(doc: &mut Document, mode: Mode) -> AppResult<()> {
        let mut v = Validator::new(mode);

        v.require(doc, "name", "Please tell us your name!");
        v.string(doc, "name");

        if v.require(doc, "email", "Please provide your email")
            && let Some(email) = v.string(doc, "email")
        {
            let email = email.to_lowercase();
            v.check(EMAIL.is_match(&email), "Please provide a valid email");
            doc.insert("email".to_string(), Value::String(email));
        }

        v.string(doc, "photo");
        v.one_of(
            doc,
            "role",
            &ROLES,
            "Role is either: user, guide, lead-guide, admin",
        );
        v.boolean(doc, "active");

        v.finish()
    }
}

#[async_trait]
impl Resource for UserService {
    fn label(&self) -> &'static str {
        "user"
    }

    fn collection(&self) -> &Arc<dyn Collection> {
        &self.users
    }

    fn base_filter(&self) -> Filter {
        active_filter()
    }

    async fn prepare_create(&self, mut input: Document) -> AppResult<Document> {
        let mut allowed = WRITABLE_FIELDS.to_vec();
        allowed.push(ID_FIELD);
        retain_fields(&mut input, &allowed);

        Self::validate(&mut input, Mode::Create)?;

        default_field(&mut input, "photo", Value::String("default.jpg".to_string()));
        default_field(&mut input, "role", Value::String("user".to_string()));
        default_field(&mut input, "active", Value::Bool(true));
        Ok(input)
    }

    async fn prepare_update(&self, _current: &Document, mut patch: Document) -> AppResult<Document> {
        retain_fields(&mut patch, &WRITABLE_FIELDS);
        Self::validate(&mut patch, Mode::Update)?;
        Ok(patch)
    }

    /// `active` is internal and never serialised.
    fn present(&self, mut doc: Document) -> Document {
        doc.remove("active");
        doc
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::MemoryCollection;
    use crate::store::document;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    fn service() -> UserService {
        UserService::new(Arc::new(
            MemoryCollection::new("users").with_unique_index(&["email"]),
        ))
    }

    #[tokio::test]
    async fn create_normalises_and_defaults() {
        let users = service();
        let receipt = users
            .create(doc(json!({ "name": " Leo ", "email": " LEO@Example.COM ", "password": "x" })))
            .await
            .unwrap();

        let user = receipt.document;
        assert_eq!(user["name"], json!("Leo"));
        assert_eq!(user["email"], json!("leo@example.com"));
        assert_eq!(user["photo"], json!("default.jpg"));
        assert_eq!(user["role"], json!("user"));
        assert!(!user.contains_key("active"));
        assert!(!user.contains_key("password"));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let users = service();
        let err = users
            .create(doc(json!({ "email": "not-an-email", "role": "boss" })))
            .await
            .unwrap_err();
        let AppError::BadRequest(message) = err else {
            panic!("expected a validation failure");
        };
        assert!(message.contains("Please tell us your name!"));
        assert!(message.contains("Please provide a valid email"));
        assert!(message.contains("Role is either"));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let users = service();
        users
            .create(doc(json!({ "name": "A", "email": "a@x.io" })))
            .await
            .unwrap();
        let err = users
            .create(doc(json!({ "name": "B", "email": "A@X.IO" })))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn inactive_users_are_hidden() {
        let users = service();
        let receipt = users
            .create(doc(json!({ "name": "A", "email": "a@x.io", "active": false })))
            .await
            .unwrap();
        let id = document::id_of(&receipt.document).unwrap().to_string();

        assert!(users.get(&id).await.is_err());
        let listed = users
            .list(Filter::new(), &crate::query::QueryParams::new())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
