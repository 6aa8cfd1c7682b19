use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::provider::Profile,
    error::{AuthError, AuthResult},
    users::{repo::NewUser, User},
};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// The user rows the resolver needs. `PgPool` is the production directory;
/// tests drive the decision logic against an in-memory one.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_google_id(&self, google_id: &str) -> sqlx::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> sqlx::Result<Option<User>>;
    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<User>;
    async fn link_google_id(
        &self,
        id: Uuid,
        google_id: &str,
        name: &str,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<User>;
    async fn create(&self, new: &NewUser) -> sqlx::Result<User>;
}

#[async_trait]
impl UserDirectory for PgPool {
    async fn find_by_google_id(&self, google_id: &str) -> sqlx::Result<Option<User>> {
        User::find_by_google_id(self, google_id).await
    }

    async fn find_by_email(&self, email: &str) -> sqlx::Result<Option<User>> {
        User::find_by_email(self, email).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<User> {
        User::update_profile(self, id, name, avatar_url).await
    }

    async fn link_google_id(
        &self,
        id: Uuid,
        google_id: &str,
        name: &str,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<User> {
        User::link_google_id(self, id, google_id, name, avatar_url).await
    }

    async fn create(&self, new: &NewUser) -> sqlx::Result<User> {
        User::create(self, new).await
    }
}

pub struct Resolution {
    pub user: User,
    pub is_new_user: bool,
}

/// Maps a federation profile to a local user. Lookup order is provider id
/// first, then email (exact match, which also links the provider id to a
/// pre-existing account). A profile that matches neither needs a usable
/// email before a new account is created.
#[instrument(skip(dir, profile), fields(provider_id = %profile.provider_id))]
pub async fn resolve<D: UserDirectory + ?Sized>(
    dir: &D,
    profile: &Profile,
) -> AuthResult<Resolution> {
    if let Some(existing) = dir.find_by_google_id(&profile.provider_id).await? {
        let user = dir
            .update_profile(existing.id, &profile.name, profile.avatar_url.as_deref())
            .await?;
        return Ok(Resolution {
            user,
            is_new_user: false,
        });
    }

    let email = match profile.email.as_deref() {
        Some(e) if is_valid_email(e) => e,
        _ => return Err(AuthError::IncompleteProfile),
    };

    if let Some(existing) = dir.find_by_email(email).await? {
        info!(user_id = %existing.id, "linking provider id to existing account");
        let user = dir
            .link_google_id(
                existing.id,
                &profile.provider_id,
                &profile.name,
                profile.avatar_url.as_deref(),
            )
            .await?;
        return Ok(Resolution {
            user,
            is_new_user: false,
        });
    }

    let user = dir
        .create(&NewUser {
            google_id: profile.provider_id.clone(),
            email: email.to_owned(),
            name: profile.name.clone(),
            avatar_url: profile.avatar_url.clone(),
            email_verified: profile.email_verified,
        })
        .await?;
    info!(user_id = %user.id, "new user created from federation profile");

    Ok(Resolution {
        user,
        is_new_user: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserStatus;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    struct FakeDirectory {
        users: Mutex<Vec<User>>,
    }

    impl FakeDirectory {
        fn new(seed: Vec<User>) -> Self {
            Self {
                users: Mutex::new(seed),
            }
        }

        fn count(&self) -> usize {
            self.users.lock().unwrap().len()
        }
    }

    fn make_user(google_id: &str, email: &str, name: &str) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            google_id: google_id.into(),
            email: email.into(),
            name: name.into(),
            avatar_url: None,
            status: UserStatus::Active,
            email_verified: true,
            preferences: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn find_by_google_id(&self, google_id: &str) -> sqlx::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.google_id == google_id)
                .cloned())
        }

        async fn find_by_email(&self, email: &str) -> sqlx::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn update_profile(
            &self,
            id: Uuid,
            name: &str,
            avatar_url: Option<&str>,
        ) -> sqlx::Result<User> {
            let mut users = self.users.lock().unwrap();
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or(sqlx::Error::RowNotFound)?;
            user.name = name.into();
            user.avatar_url = avatar_url.map(str::to_owned);
            Ok(user.clone())
        }

        async fn link_google_id(
            &self,
            id: Uuid,
            google_id: &str,
            name: &str,
            avatar_url: Option<&str>,
        ) -> sqlx::Result<User> {
            let mut users = self.users.lock().unwrap();
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or(sqlx::Error::RowNotFound)?;
            user.google_id = google_id.into();
            user.name = name.into();
            user.avatar_url = avatar_url.map(str::to_owned);
            Ok(user.clone())
        }

        async fn create(&self, new: &NewUser) -> sqlx::Result<User> {
            let mut user = make_user(&new.google_id, &new.email, &new.name);
            user.avatar_url = new.avatar_url.clone();
            user.email_verified = new.email_verified;
            self.users.lock().unwrap().push(user.clone());
            Ok(user)
        }
    }

    fn profile(provider_id: &str, email: Option<&str>, name: &str) -> Profile {
        Profile {
            provider_id: provider_id.into(),
            email: email.map(str::to_owned),
            name: name.into(),
            avatar_url: Some("https://lh3.example/p.jpg".into()),
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn provider_id_hit_refreshes_profile() {
        let dir = FakeDirectory::new(vec![make_user("g-1", "alice@example.com", "Old Name")]);
        let resolution = resolve(&dir, &profile("g-1", Some("alice@example.com"), "Alice"))
            .await
            .expect("resolve");
        assert!(!resolution.is_new_user);
        assert_eq!(resolution.user.name, "Alice");
        assert_eq!(dir.count(), 1);
    }

    #[tokio::test]
    async fn email_hit_links_provider_id() {
        let seed = make_user("legacy-0", "bob@example.com", "Bob");
        let seed_id = seed.id;
        let dir = FakeDirectory::new(vec![seed]);

        let resolution = resolve(&dir, &profile("g-42", Some("bob@example.com"), "Bob"))
            .await
            .expect("resolve");
        assert!(!resolution.is_new_user);
        assert_eq!(resolution.user.id, seed_id);
        assert_eq!(resolution.user.google_id, "g-42");
        assert_eq!(dir.count(), 1);
    }

    #[tokio::test]
    async fn unknown_profile_creates_user() {
        let dir = FakeDirectory::new(vec![]);
        let resolution = resolve(&dir, &profile("g-7", Some("carol@example.com"), "Carol"))
            .await
            .expect("resolve");
        assert!(resolution.is_new_user);
        assert_eq!(resolution.user.email, "carol@example.com");
        assert_eq!(resolution.user.google_id, "g-7");
        assert_eq!(dir.count(), 1);
    }

    #[tokio::test]
    async fn missing_email_is_incomplete_profile() {
        let dir = FakeDirectory::new(vec![]);
        let result = resolve(&dir, &profile("g-9", None, "Nameless")).await;
        assert!(matches!(result, Err(AuthError::IncompleteProfile)));
        assert_eq!(dir.count(), 0);
    }

    #[test]
    fn email_validation_accepts_and_rejects() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+tag@sub.example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("trailing@example"));
        assert!(!is_valid_email("spa ce@example.com"));
    }
}
