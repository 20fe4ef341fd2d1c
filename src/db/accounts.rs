//! Profiles, newsletter subscribers and newsletter campaigns.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::repository::{bump_revision, new_id, now, require, Repository};
use crate::errors::AppError;
use crate::models::{
    CreateNewsletterRequest, CreateUserRequest, Newsletter, Subscriber, UpdateUserRequest,
    UserProfile, UserRole,
};

const PROFILE_COLUMNS: &str = "id, email, full_name, phone, address, role, created_at";
const NEWSLETTER_COLUMNS: &str = "id, subject, body_html, created_at, sent_at, recipient_count";

impl Repository {
    // ==================== PROFILE OPERATIONS ====================

    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<UserProfile, AppError> {
        let email = normalize_email(&request.email)?;
        require(&request.full_name, "Full name")?;

        let taken = sqlx::query("SELECT 1 FROM profiles WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if taken {
            return Err(AppError::Validation(format!(
                "An account already exists for {}",
                email
            )));
        }

        let user = UserProfile {
            id: new_id(),
            email,
            full_name: request.full_name.trim().to_string(),
            phone: request.phone.clone(),
            address: request.address.clone(),
            role: UserRole::Customer,
            created_at: now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO profiles (id, email, full_name, phone, address, role, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(user.role.as_str())
        .bind(&user.created_at)
        .execute(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "Profile created");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM profiles WHERE id = ?",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(profile_from_row))
    }

    /// Fetch a profile or fail with `NotFound`.
    pub async fn require_user(&self, id: &str) -> Result<UserProfile, AppError> {
        self.get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
    }

    pub async fn list_users(&self, role: Option<UserRole>) -> Result<Vec<UserProfile>, AppError> {
        let rows = match role {
            Some(role) => {
                sqlx::query(&format!(
                    "SELECT {} FROM profiles WHERE role = ? ORDER BY full_name",
                    PROFILE_COLUMNS
                ))
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM profiles ORDER BY full_name",
                    PROFILE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(profile_from_row).collect())
    }

    pub async fn update_user(
        &self,
        id: &str,
        request: &UpdateUserRequest,
    ) -> Result<UserProfile, AppError> {
        let existing = self.require_user(id).await?;
        if let Some(name) = &request.full_name {
            require(name, "Full name")?;
        }

        let updated = UserProfile {
            full_name: request
                .full_name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.full_name),
            phone: request.phone.clone().or(existing.phone),
            address: request.address.clone().or(existing.address),
            ..existing
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE profiles SET full_name = ?, phone = ?, address = ? WHERE id = ?")
            .bind(&updated.full_name)
            .bind(&updated.phone)
            .bind(&updated.address)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn set_user_role(&self, id: &str, role: UserRole) -> Result<UserProfile, AppError> {
        let existing = self.require_user(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE profiles SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(user_id = %id, role = role.as_str(), "Role changed");
        Ok(UserProfile { role, ..existing })
    }

    // ==================== NEWSLETTER OPERATIONS ====================

    /// Subscribe an address. Re-subscribing reactivates it.
    pub async fn subscribe(&self, email: &str) -> Result<Subscriber, AppError> {
        let email = normalize_email(email)?;
        let now = now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO subscribers (email, active, subscribed_at) VALUES (?, 1, ?)
               ON CONFLICT(email) DO UPDATE SET active = 1"#,
        )
        .bind(&email)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT email, active, subscribed_at FROM subscribers WHERE email = ?")
            .bind(&email)
            .fetch_one(&mut *tx)
            .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(subscriber_from_row(&row))
    }

    pub async fn unsubscribe(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE subscribers SET active = 0 WHERE email = ?")
            .bind(&email)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} is not subscribed", email)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_active_subscribers(&self) -> Result<Vec<Subscriber>, AppError> {
        let rows = sqlx::query(
            "SELECT email, active, subscribed_at FROM subscribers WHERE active = 1 ORDER BY email",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(subscriber_from_row).collect())
    }

    pub async fn create_newsletter(
        &self,
        request: &CreateNewsletterRequest,
    ) -> Result<Newsletter, AppError> {
        require(&request.subject, "Subject")?;
        require(&request.body_html, "Body")?;

        let newsletter = Newsletter {
            id: new_id(),
            subject: request.subject.trim().to_string(),
            body_html: request.body_html.clone(),
            created_at: now(),
            sent_at: None,
            recipient_count: 0,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO newsletters (id, subject, body_html, created_at, sent_at, recipient_count) VALUES (?, ?, ?, ?, NULL, 0)",
        )
        .bind(&newsletter.id)
        .bind(&newsletter.subject)
        .bind(&newsletter.body_html)
        .bind(&newsletter.created_at)
        .execute(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(newsletter)
    }

    pub async fn list_newsletters(&self) -> Result<Vec<Newsletter>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM newsletters ORDER BY created_at DESC",
            NEWSLETTER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(newsletter_from_row).collect())
    }

    /// Stamp an unsent newsletter as sent so no other request can send it.
    ///
    /// Fails with a validation error when it was already claimed.
    pub async fn claim_newsletter(&self, id: &str) -> Result<Newsletter, AppError> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("UPDATE newsletters SET sent_at = ? WHERE id = ? AND sent_at IS NULL")
                .bind(now())
                .bind(id)
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM newsletters WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if exists {
                AppError::Validation(format!("Newsletter {} was already sent", id))
            } else {
                AppError::NotFound(format!("Newsletter {} not found", id))
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM newsletters WHERE id = ?",
            NEWSLETTER_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(newsletter_from_row(&row))
    }

    /// Undo a claim after delivery failed, so the newsletter can be sent again.
    pub async fn release_newsletter(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE newsletters SET sent_at = NULL, recipient_count = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record how many recipients a claimed newsletter reached.
    pub async fn mark_newsletter_sent(
        &self,
        id: &str,
        recipient_count: i64,
    ) -> Result<Newsletter, AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE newsletters SET recipient_count = ? WHERE id = ? AND sent_at IS NOT NULL",
        )
        .bind(recipient_count)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Newsletter {} has not been claimed for sending",
                id
            )));
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM newsletters WHERE id = ?",
            NEWSLETTER_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(newsletter_from_row(&row))
    }
}

/// Lowercase and sanity-check an email address.
fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(AppError::Validation(format!(
            "Invalid email address: {}",
            email
        )));
    }
    Ok(email)
}

fn profile_from_row(row: &SqliteRow) -> UserProfile {
    let role: String = row.get("role");
    UserProfile {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        phone: row.get("phone"),
        address: row.get("address"),
        role: UserRole::from_str(&role).unwrap_or(UserRole::Customer),
        created_at: row.get("created_at"),
    }
}

fn subscriber_from_row(row: &SqliteRow) -> Subscriber {
    let active: i32 = row.get("active");
    Subscriber {
        email: row.get("email"),
        active: active != 0,
        subscribed_at: row.get("subscribed_at"),
    }
}

fn newsletter_from_row(row: &SqliteRow) -> Newsletter {
    Newsletter {
        id: row.get("id"),
        subject: row.get("subject"),
        body_html: row.get("body_html"),
        created_at: row.get("created_at"),
        sent_at: row.get("sent_at"),
        recipient_count: row.get("recipient_count"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Ada@Example.COM ").unwrap(),
            "ada@example.com"
        );
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("ada@localhost").is_err());
    }
}
