//! Local permission matching over cached grant records.
//!
//! Records are tried in the order the provider returned them and the first one
//! passing every active test wins. There is no ranking.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::permissions::{Action, CrudMask, PermissionRecord};

/// What the caller wants to be allowed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFilter {
    pub category: String,
    /// When set, a record whose category is a prefix of `category` also matches.
    #[serde(default)]
    pub pattern: bool,
    #[serde(default)]
    pub action: Option<Vec<Action>>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

impl PermissionFilter {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn with_pattern(mut self, pattern: bool) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.action = Some(actions);
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: Option<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = entity_id;
        self
    }
}

/// Outcome of a match.
///
/// `entity_field` carries the entity type of the last scanned record that had
/// an entity segment, which is not necessarily the matched record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(rename = "match")]
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_field: Option<String>,
}

/// Find the first record satisfying `filter`.
///
/// # Examples
///
/// ```rust
/// use iam_proxy::auth::matcher::{match_permission, PermissionFilter};
///
/// let records = vec!["iam:billing:1111:u1:".to_string()];
/// let filter = PermissionFilter::new("billing.invoices").with_pattern(true);
/// assert!(match_permission(&records, &filter).matched);
/// ```
pub fn match_permission<S: AsRef<str>>(records: &[S], filter: &PermissionFilter) -> MatchResult {
    let requested = filter.action.as_deref().map(CrudMask::from_actions);
    let mut result = MatchResult::default();

    for raw in records {
        let raw = raw.as_ref();
        let record = match PermissionRecord::parse(raw) {
            Ok(record) => record,
            Err(e) => {
                trace!(error = %e, "Skipping unparseable permission record");
                continue;
            }
        };

        if let Some(entity) = &record.entity {
            result.entity_field = Some(entity.entity_type.to_string());
        }

        if !category_matches(record.category, filter) {
            continue;
        }

        if let Some(requested) = &requested {
            if !record.mask.covers(requested) {
                continue;
            }
        }

        if let Some(entity_type) = &filter.entity_type {
            let Some(entity) = &record.entity else {
                continue;
            };
            if entity.entity_type != entity_type {
                continue;
            }
            if let Some(entity_id) = &filter.entity_id {
                if entity.entity_id != Some(entity_id.as_str()) {
                    continue;
                }
            }
        }

        debug!(
            category = %filter.category,
            permission = %raw,
            "Permission matched"
        );
        result.matched = true;
        result.permission = Some(raw.to_string());
        break;
    }

    result
}

fn category_matches(record_category: &str, filter: &PermissionFilter) -> bool {
    if filter.pattern {
        filter.category.starts_with(record_category)
    } else {
        record_category == filter.category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stored_mask_must_cover_requested_action() {
        let items = records(&["iam:billing:1100:u1:invoice#42"]);
        let filter = PermissionFilter::new("billing").with_actions(vec![Action::Read]);

        let result = match_permission(&items, &filter);
        assert!(!result.matched);
        assert!(result.permission.is_none());
    }

    #[test]
    fn test_full_match_with_entity() {
        let items = records(&["iam:billing:1100:u1:invoice#42"]);
        let filter = PermissionFilter::new("billing")
            .with_actions(vec![Action::Create])
            .with_entity("invoice", Some("42".to_string()));

        let result = match_permission(&items, &filter);
        assert!(result.matched);
        assert_eq!(result.permission.as_deref(), Some("iam:billing:1100:u1:invoice#42"));
    }

    #[test]
    fn test_entity_id_ignores_trailing_hash_pieces() {
        let items = records(&["iam:docs:1111:u1:folder#7#x"]);
        let filter = PermissionFilter::new("docs").with_entity("folder", Some("7".to_string()));

        let result = match_permission(&items, &filter);
        assert!(result.matched);
        assert_eq!(result.permission.as_deref(), Some("iam:docs:1111:u1:folder#7#x"));
    }

    #[test]
    fn test_pattern_mode_accepts_broader_stored_category() {
        let items = records(&["iam:billing:1111:u1:"]);
        let filter = PermissionFilter::new("billing.invoices").with_pattern(true);

        assert!(match_permission(&items, &filter).matched);
    }

    #[test]
    fn test_exact_mode_rejects_prefix() {
        let items = records(&["iam:billing:1111:u1:"]);
        let filter = PermissionFilter::new("billing.invoices");

        assert!(!match_permission(&items, &filter).matched);
    }

    #[test]
    fn test_pattern_mode_rejects_narrower_stored_category() {
        let items = records(&["iam:billing.invoices:1111:u1:"]);
        let filter = PermissionFilter::new("billing").with_pattern(true);

        assert!(!match_permission(&items, &filter).matched);
    }

    #[test]
    fn test_first_match_wins_in_input_order() {
        let items = records(&[
            "iam:billing:0100:u1:",
            "iam:billing:1111:u1:",
        ]);
        let filter = PermissionFilter::new("billing").with_actions(vec![Action::Read]);

        let result = match_permission(&items, &filter);
        assert_eq!(result.permission.as_deref(), Some("iam:billing:0100:u1:"));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let items = records(&["", "garbage", "iam::1111", "iam:billing:1000:u1:"]);
        let filter = PermissionFilter::new("billing").with_actions(vec![Action::Create]);

        let result = match_permission(&items, &filter);
        assert!(result.matched);
        assert_eq!(result.permission.as_deref(), Some("iam:billing:1000:u1:"));
    }

    #[test]
    fn test_record_without_entity_never_satisfies_entity_filter() {
        let items = records(&["iam:billing:1111:u1:"]);
        let filter = PermissionFilter::new("billing").with_entity("invoice", None);

        assert!(!match_permission(&items, &filter).matched);
    }

    #[test]
    fn test_entity_id_required_when_filtered() {
        let items = records(&["iam:billing:1111:u1:invoice"]);

        let by_type = PermissionFilter::new("billing").with_entity("invoice", None);
        assert!(match_permission(&items, &by_type).matched);

        let by_id = PermissionFilter::new("billing").with_entity("invoice", Some("42".to_string()));
        assert!(!match_permission(&items, &by_id).matched);
    }

    #[test]
    fn test_entity_id_mismatch_rejects() {
        let items = records(&["iam:billing:1111:u1:invoice#41"]);
        let filter = PermissionFilter::new("billing").with_entity("invoice", Some("42".to_string()));

        assert!(!match_permission(&items, &filter).matched);
    }

    #[test]
    fn test_missing_mask_grants_nothing() {
        let items = records(&["iam:billing"]);
        let filter = PermissionFilter::new("billing").with_actions(vec![Action::Read]);
        assert!(!match_permission(&items, &filter).matched);

        // Without an action filter the category alone is enough
        assert!(match_permission(&items, &PermissionFilter::new("billing")).matched);
    }

    #[test]
    fn test_entity_field_tracks_last_entity_record_seen() {
        let items = records(&[
            "iam:reports:1111:u1:chart#9",
            "iam:billing:1111:u1:",
            "iam:billing:1111:u1:invoice#1",
        ]);
        let filter = PermissionFilter::new("billing");

        let result = match_permission(&items, &filter);
        // The winning record has no entity, yet the field comes from an earlier record
        assert_eq!(result.permission.as_deref(), Some("iam:billing:1111:u1:"));
        assert_eq!(result.entity_field.as_deref(), Some("chart"));
    }

    #[test]
    fn test_entity_field_set_without_match() {
        let items = records(&["iam:billing:0000:u1:invoice#1"]);
        let filter = PermissionFilter::new("billing").with_actions(vec![Action::Delete]);

        let result = match_permission(&items, &filter);
        assert!(!result.matched);
        assert_eq!(result.entity_field.as_deref(), Some("invoice"));
    }

    #[test]
    fn test_match_result_serializes_match_key() {
        let result = MatchResult {
            matched: true,
            permission: Some("iam:billing:1111:u1:".to_string()),
            entity_field: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["match"], true);
        assert!(json.get("entity_field").is_none());
    }
}
