//! Authorization context threaded through every repository call.

use serde::{Deserialize, Serialize};

use crate::models::new_v7;

/// Identity of the caller plus a correlation id for logs.
///
/// Supplied by the authentication layer; repositories trust `user_id` as-is and
/// use it for every ownership predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub request_id: String,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            request_id: request_id.into(),
        }
    }

    /// Context with a freshly generated request id.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::new(user_id, new_v7().to_string())
    }
}
