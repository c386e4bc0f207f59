//! IAM verification and grant flows.
//!
//! Verification reads through the permission cache and only asks the provider
//! to build the grant list on a miss. Every mutation is forwarded to the
//! provider first and then invalidates the affected cache scope locally,
//! without waiting for the provider's own invalidation event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::upstream::{UpstreamClient, UpstreamError};
use crate::auth::matcher::{MatchResult, PermissionFilter, match_permission};
use crate::auth::permissions::Action;
use crate::cache::{CacheFacade, CacheLookup, InvalidationRequest};
use crate::error::AppError;

pub const ACTION_ACCESS_BUILD: &str = "api.application.iam.access.build";
pub const ACTION_ACCESS_GRANT: &str = "api.application.iam.access.grant";
pub const ACTION_ACCESS_REVOKE: &str = "api.application.iam.access.revoke";
pub const ACTION_PERMISSION_SAVE: &str = "api.application.iam.permission.save";
pub const ACTION_PERMISSION_FILTER: &str = "api.application.iam.permission.filter";
pub const ACTION_PERMISSION_DELETE: &str = "api.application.iam.permission.delete";
pub const ACTION_CATEGORY_USER_SAVE: &str = "api.application.iam.category.user.save";
pub const ACTION_CATEGORY_USER_FILTER: &str = "api.application.iam.category.user.filter";
pub const ACTION_CATEGORY_USER_DELETE: &str = "api.application.iam.category.user.delete";
pub const ACTION_API_KEY_VERIFY: &str = "api.application.apiKey.verify";

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn require<'a>(value: &'a str, message: &str) -> Result<&'a str, AppError> {
    if value.is_empty() {
        Err(AppError::InvalidInput(message.to_string()))
    } else {
        Ok(value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub access_id: String,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub pattern: bool,
    #[serde(default)]
    pub action: Option<Vec<String>>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// A role lookup returns the raw grant list; a user lookup returns a match verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VerifyResponse {
    Entries(Vec<String>),
    Match(MatchResult),
}

/// Grant or revoke a role on an access for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessGrantRequest {
    #[serde(default)]
    pub access_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub role_id: Option<String>,
    /// Role code, used instead of `role_id` when given.
    #[serde(default)]
    pub role: Option<String>,
}

/// Which permission a grant or revoke addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionTarget {
    #[serde(default)]
    pub access_id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

impl PermissionTarget {
    fn validate(&self) -> Result<(), AppError> {
        require(&self.access_id, "Missing access information")?;
        if present(&self.category).is_none() && present(&self.category_id).is_none() {
            return Err(AppError::InvalidInput("Missing category information".to_string()));
        }
        Ok(())
    }

    /// Provider payload. Codes win over ids and the user travels as `profile_id`.
    fn provider_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("access_id".to_string(), json!(self.access_id));

        match (present(&self.category), present(&self.category_id)) {
            (Some(category), _) => payload.insert("category".to_string(), json!(category)),
            (None, Some(category_id)) => payload.insert("category_id".to_string(), json!(category_id)),
            (None, None) => None,
        };
        match (present(&self.role), present(&self.role_id)) {
            (Some(role), _) => payload.insert("role".to_string(), json!(role)),
            (None, Some(role_id)) => payload.insert("role_id".to_string(), json!(role_id)),
            (None, None) => None,
        };
        if let Some(user_id) = present(&self.user_id) {
            payload.insert("profile_id".to_string(), json!(user_id));
        }
        if let Some(entity_type) = present(&self.entity_type) {
            payload.insert("entity_type".to_string(), json!(entity_type));
        }
        if let Some(entity_id) = present(&self.entity_id) {
            payload.insert("entity_id".to_string(), json!(entity_id));
        }
        payload
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionGrantRequest {
    #[serde(flatten)]
    pub target: PermissionTarget,
    #[serde(default)]
    pub create: Option<bool>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub update: Option<bool>,
    #[serde(default)]
    pub delete: Option<bool>,
}

/// Arbitrary provider action forwarded as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Provider results for mutations default to an empty object.
fn mutation_result(result: Value) -> Value {
    if result.is_null() { json!({}) } else { result }
}

fn grant_entries(result: Value) -> Result<Vec<String>, UpstreamError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            })
            .collect()),
        other => Err(UpstreamError::InvalidResponse(format!(
            "expected grant list, got {}",
            other
        ))),
    }
}

/// IAM operations over the cache and the provider.
#[derive(Clone)]
pub struct IamService {
    cache: CacheFacade,
    upstream: Arc<dyn UpstreamClient>,
}

impl IamService {
    pub fn new(cache: CacheFacade, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self { cache, upstream }
    }

    pub fn cache(&self) -> &CacheFacade {
        &self.cache
    }

    /// Ask the provider whether the configured key is accepted.
    pub async fn verify_key(&self) -> Result<(), AppError> {
        self.upstream.dispatch(ACTION_API_KEY_VERIFY, json!({})).await?;
        debug!("Provider key accepted");
        Ok(())
    }

    /// Forward a caller-chosen action and payload to the provider.
    ///
    /// The cache is not touched; mutations made this way are picked up through provider events.
    pub async fn custom(&self, request: CustomRequest) -> Result<Value, AppError> {
        let action = require(&request.action, "Missing action name")?;
        if !request.payload.is_object() {
            return Err(AppError::InvalidInput("Missing action payload".to_string()));
        }

        let result = self.upstream.dispatch(action, request.payload).await?;
        debug!(action, "Custom action dispatched");
        Ok(mutation_result(result))
    }

    /// Check a role or user against the cached (or freshly built) grant list.
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, AppError> {
        let access_id = require(&request.access_id, "Missing access information")?;
        let role_id = present(&request.role_id);

        let (lookup, payload) = match (role_id, present(&request.user_id)) {
            (Some(role_id), _) => (
                CacheLookup::role(access_id, role_id),
                json!({"access_id": access_id, "role_id": role_id}),
            ),
            (None, Some(user_id)) => (
                CacheLookup::user(access_id, user_id),
                json!({"access_id": access_id, "profile_id": user_id}),
            ),
            (None, None) => {
                return Err(AppError::InvalidInput(
                    "Either role_id or user_id must be specified".to_string(),
                ));
            }
        };

        let entries = match self.cache.hit(&lookup).await? {
            Some(entries) => entries,
            None => {
                let result = self.upstream.dispatch(ACTION_ACCESS_BUILD, payload).await?;
                let entries = grant_entries(result)?;
                self.cache.save(&lookup, entries.clone()).await?;
                entries
            }
        };

        if role_id.is_some() {
            return Ok(VerifyResponse::Entries(entries));
        }

        let Some(category) = present(&request.category) else {
            return Ok(VerifyResponse::Match(MatchResult::default()));
        };
        if entries.is_empty() {
            return Ok(VerifyResponse::Match(MatchResult::default()));
        }

        let filter = PermissionFilter {
            category: category.to_string(),
            pattern: request.pattern,
            action: request.action.as_deref().and_then(Action::parse_list),
            entity_type: present(&request.entity_type).map(str::to_string),
            entity_id: present(&request.entity_id).map(str::to_string),
        };
        Ok(VerifyResponse::Match(match_permission(&entries, &filter)))
    }

    pub async fn grant_access(&self, request: AccessGrantRequest) -> Result<Value, AppError> {
        self.change_access(ACTION_ACCESS_GRANT, request).await
    }

    pub async fn revoke_access(&self, request: AccessGrantRequest) -> Result<Value, AppError> {
        self.change_access(ACTION_ACCESS_REVOKE, request).await
    }

    async fn change_access(&self, action: &str, request: AccessGrantRequest) -> Result<Value, AppError> {
        let access_id = require(&request.access_id, "Missing access information")?;
        let user_id = require(&request.user_id, "Missing user information")?;

        let mut payload = json!({"access_id": access_id, "profile_id": user_id});
        match (present(&request.role), present(&request.role_id)) {
            (Some(role), _) => payload["role_code"] = json!(role),
            (None, Some(role_id)) => payload["role_id"] = json!(role_id),
            (None, None) => {
                return Err(AppError::InvalidInput("Missing role information".to_string()));
            }
        }

        let result = self.upstream.dispatch(action, payload).await?;
        self.cache
            .invalidate(&InvalidationRequest::user(access_id, user_id))
            .await;

        info!(action, access_id, user_id, "Access changed");
        Ok(mutation_result(result))
    }

    pub async fn grant_permission(&self, request: PermissionGrantRequest) -> Result<Value, AppError> {
        let target = &request.target;
        target.validate()?;

        let mut payload = target.provider_payload();
        for (name, flag) in [
            ("create", request.create),
            ("read", request.read),
            ("update", request.update),
            ("delete", request.delete),
        ] {
            if let Some(flag) = flag {
                payload.insert(name.to_string(), json!(flag));
            }
        }

        let user_id = present(&target.user_id);
        let action = if user_id.is_some() {
            ACTION_CATEGORY_USER_SAVE
        } else {
            ACTION_PERMISSION_SAVE
        };

        let result = self.upstream.dispatch(action, Value::Object(payload)).await?;
        self.cache
            .invalidate(&scoped_invalidation(&target.access_id, user_id))
            .await;

        info!(action, access_id = %target.access_id, "Permission granted");
        Ok(mutation_result(result))
    }

    /// Find the permission (or the user's category grant) and delete it.
    ///
    /// Nothing found is not an error: the cache is still invalidated.
    pub async fn revoke_permission(&self, target: PermissionTarget) -> Result<Value, AppError> {
        target.validate()?;
        let payload = Value::Object(target.provider_payload());
        let mut result = Value::Null;

        let invalidation = match present(&target.user_id) {
            None => {
                let found = self.upstream.dispatch(ACTION_PERMISSION_FILTER, payload).await?;
                if let Some(found) = found.as_object() {
                    let delete = json!({"id": found.get("id").cloned().unwrap_or(Value::Null)});
                    result = self.upstream.dispatch(ACTION_PERMISSION_DELETE, delete).await?;
                }
                InvalidationRequest::access(target.access_id.as_str())
            }
            Some(user_id) => {
                let found = self.upstream.dispatch(ACTION_CATEGORY_USER_FILTER, payload).await?;
                match found.as_object() {
                    Some(found) => {
                        let delete = json!({
                            "category_id": found.get("category_id").cloned().unwrap_or(Value::Null),
                            "id": found.get("id").cloned().unwrap_or(Value::Null),
                        });
                        result = self.upstream.dispatch(ACTION_CATEGORY_USER_DELETE, delete).await?;
                        InvalidationRequest::user(target.access_id.as_str(), user_id)
                    }
                    None => {
                        debug!(access_id = %target.access_id, user_id, "No user category grant to revoke");
                        InvalidationRequest::access(target.access_id.as_str())
                    }
                }
            }
        };

        self.cache.invalidate(&invalidation).await;
        Ok(mutation_result(result))
    }
}

fn scoped_invalidation(access_id: &str, user_id: Option<&str>) -> InvalidationRequest {
    match user_id {
        Some(user_id) => InvalidationRequest::user(access_id, user_id),
        None => InvalidationRequest::access(access_id),
    }
}
