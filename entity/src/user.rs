use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::Role;

/// User model, as selected with its role name joined in.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// The password in hashed PHC form, as represented in the database
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_password_change: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn password_expires_at(&self, expiry_days: i64) -> DateTime<Utc> {
        self.last_password_change + Duration::days(expiry_days)
    }

    pub fn is_password_expired(&self, now: DateTime<Utc>, expiry_days: i64) -> bool {
        now > self.password_expires_at(expiry_days)
    }

    /// Whole days left before the password expires, never negative.
    pub fn days_until_password_expires(&self, now: DateTime<Utc>, expiry_days: i64) -> i64 {
        (self.password_expires_at(expiry_days) - now).num_days().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_changed_at(last_password_change: DateTime<Utc>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: String::new(),
            role: Role::User,
            created_at: last_password_change,
            last_password_change,
        }
    }

    #[test]
    fn password_expiry_counts_whole_days() {
        let changed = Utc::now();
        let user = user_changed_at(changed);

        assert!(!user.is_password_expired(changed + Duration::days(30), 30));
        assert!(user.is_password_expired(changed + Duration::days(30) + Duration::seconds(1), 30));
        assert_eq!(user.days_until_password_expires(changed + Duration::days(25), 30), 5);
        assert_eq!(user.days_until_password_expires(changed + Duration::days(40), 30), 0);
    }
}
