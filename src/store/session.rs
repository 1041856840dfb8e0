//! Authenticated session shared by the HTTP store and the realtime client.

use std::sync::RwLock;

use crate::models::User;

/// Auth token and the user it belongs to.
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<String>>,
    user: RwLock<Option<User>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn set(&self, token: String, user: User) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let session = Session::new();
        assert!(!session.is_authenticated());

        let user = User {
            id: "u1".to_string(),
            ..User::default()
        };
        session.set("tok".to_string(), user);
        assert_eq!(session.token().as_deref(), Some("tok"));
        assert_eq!(session.user().map(|u| u.id), Some("u1".to_string()));

        session.clear();
        assert!(session.token().is_none());
        assert!(session.user().is_none());
    }
}
