//! Permission record types
//!
//! The IAM provider encodes every grant as a compact colon-delimited string:
//!
//! ```text
//! iam:{category}:{crud}:{owner_id}:{entityType}#{entityId}
//! ```
//!
//! `crud` is four characters in create, read, update, delete order where `'1'`
//! grants the capability and anything else withholds it. The trailing entity
//! segment is optional and so is the `#entityId` part inside it.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

const RECORD_PREFIX: &str = "iam";

/// A CRUD action that can be requested against a category.
///
/// # Examples
///
/// ```rust
/// use iam_proxy::auth::permissions::Action;
///
/// assert_eq!(Action::Read.to_string(), "READ");
/// assert_eq!(Action::parse("update"), Some(Action::Update));
/// assert_eq!(Action::parse("admin"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "CREATE",
            Action::Read => "READ",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

impl Action {
    /// Get all available actions
    pub fn all() -> Vec<Action> {
        vec![Action::Create, Action::Read, Action::Update, Action::Delete]
    }

    /// Case-insensitive parse; unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Action> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Some(Action::Create),
            "READ" => Some(Action::Read),
            "UPDATE" => Some(Action::Update),
            "DELETE" => Some(Action::Delete),
            _ => None,
        }
    }

    /// Normalize a caller-supplied action list.
    ///
    /// Unknown names are dropped. An empty result means "no action filter".
    pub fn parse_list<S: AsRef<str>>(values: &[S]) -> Option<Vec<Action>> {
        let actions: Vec<Action> = values
            .iter()
            .filter_map(|value| Action::parse(value.as_ref()))
            .collect();

        if actions.is_empty() { None } else { Some(actions) }
    }
}

/// Decoded create/read/update/delete capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrudMask {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

impl CrudMask {
    /// Decode a stored mask string. Missing or empty decodes as `"0000"`.
    pub fn decode(mask: Option<&str>) -> Self {
        let mask = match mask {
            Some(m) if !m.is_empty() => m,
            _ => "0000",
        };
        let mut flags = mask.chars().map(|c| c == '1');

        Self {
            create: flags.next().unwrap_or(false),
            read: flags.next().unwrap_or(false),
            update: flags.next().unwrap_or(false),
            delete: flags.next().unwrap_or(false),
        }
    }

    /// Build the set of flags a caller asked for.
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut mask = Self::default();
        for action in actions {
            match action {
                Action::Create => mask.create = true,
                Action::Read => mask.read = true,
                Action::Update => mask.update = true,
                Action::Delete => mask.delete = true,
            }
        }
        mask
    }

    /// Every flag set in `requested` must also be set here.
    pub fn covers(&self, requested: &CrudMask) -> bool {
        (!requested.create || self.create)
            && (!requested.read || self.read)
            && (!requested.update || self.update)
            && (!requested.delete || self.delete)
    }

    pub fn encode(&self) -> String {
        [self.create, self.read, self.update, self.delete]
            .iter()
            .map(|granted| if *granted { '1' } else { '0' })
            .collect()
    }
}

/// The optional `entityType#entityId` tail of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef<'a> {
    pub entity_type: &'a str,
    pub entity_id: Option<&'a str>,
}

/// A parsed view over one permission record string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord<'a> {
    pub category: &'a str,
    pub mask: CrudMask,
    pub owner_id: Option<&'a str>,
    pub entity: Option<EntityRef<'a>>,
}

impl<'a> PermissionRecord<'a> {
    /// Parse a record, borrowing from the input.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use iam_proxy::auth::permissions::PermissionRecord;
    ///
    /// let record = PermissionRecord::parse("iam:billing:1100:u1:invoice#42").unwrap();
    /// assert_eq!(record.category, "billing");
    /// assert!(record.mask.create && !record.mask.read);
    /// assert_eq!(record.entity.unwrap().entity_id, Some("42"));
    /// ```
    pub fn parse(raw: &'a str) -> Result<Self, CacheError> {
        let mut parts = raw.split(':');

        if parts.next() != Some(RECORD_PREFIX) {
            return Err(CacheError::MalformedRecord(raw.to_string()));
        }

        let category = match parts.next() {
            Some(category) if !category.is_empty() => category,
            _ => return Err(CacheError::MalformedRecord(raw.to_string())),
        };

        let mask = CrudMask::decode(parts.next());
        let owner_id = parts.next().filter(|owner| !owner.is_empty());
        let entity = parts
            .next()
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                let mut pieces = segment.split('#');
                EntityRef {
                    entity_type: pieces.next().unwrap_or_default(),
                    entity_id: pieces.next(),
                }
            });

        Ok(Self {
            category,
            mask,
            owner_id,
            entity,
        })
    }
}
