use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{check_password_policy, Claims, TokenPair};
use crate::engine::parcels::check_phone;
use crate::error::AppError;
use crate::models::user::{Credentials, Registration, Role, User};
use crate::realtime::RealtimeEvent;
use crate::state::AppState;
use crate::store::bounded;

pub async fn register(
    state: &AppState,
    role: Role,
    mut registration: Registration,
) -> Result<User, AppError> {
    if role == Role::Admin {
        let expected = state.config.auth.register_key_admin.as_deref();
        let given = registration.register_key.as_deref();
        if expected.is_none() || given != expected {
            warn!(email = %registration.email, "admin registration with invalid key");
            return Err(AppError::Authorization(
                "Invalid admin registration key".to_string(),
            ));
        }
    }

    registration.email = registration.email.trim().to_lowercase();
    registration.name = registration.name.trim().to_string();
    registration.validate()?;
    check_password_policy(&registration.password)
        .map_err(|err| AppError::Validation(vec![err]))?;

    let phone = registration
        .phone
        .map(|phone| phone.trim().to_string())
        .filter(|phone| !phone.is_empty());
    if let Some(phone) = &phone {
        check_user_phone(phone)?;
    }

    let password_hash = hash_password(state, registration.password).await?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: registration.name,
        email: registration.email,
        phone,
        address: registration.address.map(|address| address.trim().to_string()),
        role,
        // Agents wait for an admin to activate them.
        is_active: role != Role::Agent,
        password_hash,
        created_at: now,
        updated_at: now,
    };

    let user = bounded(state.storage_timeout(), "user insert", state.users.insert(user)).await?;
    info!(user_id = %user.id, role = %user.role, "user registered");
    Ok(user)
}

/// Account phones are 10-15 characters on top of the general phone format.
fn check_user_phone(phone: &str) -> Result<(), AppError> {
    if !(10..=15).contains(&phone.chars().count()) {
        return Err(AppError::field(
            "phone",
            "Phone number must be 10-15 characters long",
        ));
    }
    check_phone("phone", phone)
}

pub async fn login(state: &AppState, credentials: Credentials) -> Result<(User, TokenPair), AppError> {
    let email = credentials.email.trim().to_lowercase();
    let credentials = Credentials {
        email,
        ..credentials
    };
    credentials.validate()?;

    let user = bounded(
        state.storage_timeout(),
        "user lookup",
        state.users.find_by_email(&credentials.email),
    )
    .await?;

    let Some(user) = user else {
        warn!(email = %credentials.email, "login for unknown email");
        return Err(invalid_credentials());
    };

    if !verify_password(state, credentials.password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(invalid_credentials());
    }

    let tokens = state.jwt.issue_pair(&user)?;
    info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok((user, tokens))
}

/// Rotates both tokens. The user is reloaded so role and activation changes
/// made since the last login are picked up.
pub async fn refresh(state: &AppState, refresh_token: &str) -> Result<(User, TokenPair), AppError> {
    let claims = state.jwt.verify_refresh(refresh_token)?;
    let user = bounded(
        state.storage_timeout(),
        "user lookup",
        state.users.find_by_id(claims.user_id()),
    )
    .await?
    .ok_or_else(|| AppError::Authentication("Invalid token".to_string()))?;

    let tokens = state.jwt.issue_pair(&user)?;
    Ok((user, tokens))
}

pub async fn current_user(state: &AppState, claims: &Claims) -> Result<User, AppError> {
    bounded(
        state.storage_timeout(),
        "user lookup",
        state.users.find_by_id(claims.user_id()),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub async fn list_users(state: &AppState, role: Option<Role>) -> Result<Vec<User>, AppError> {
    bounded(state.storage_timeout(), "user listing", state.users.list(role)).await
}

/// Activates or deactivates an agent and tells their open session.
pub async fn set_agent_active(
    state: &AppState,
    agent_id: Uuid,
    is_active: bool,
) -> Result<User, AppError> {
    let timeout = state.storage_timeout();
    let user = bounded(timeout, "user lookup", state.users.find_by_id(agent_id))
        .await?
        .ok_or_else(|| AppError::NotFound("Agent not found".to_string()))?;

    if user.role != Role::Agent {
        return Err(AppError::field("agentId", "User is not an agent"));
    }

    let user = bounded(timeout, "user update", state.users.set_active(agent_id, is_active))
        .await?
        .ok_or_else(|| AppError::NotFound("Agent not found".to_string()))?;

    let delivery = state
        .dispatcher
        .send_to_user(agent_id, RealtimeEvent::UserStatusUpdated(user.clone()));
    info!(agent_id = %agent_id, is_active, ?delivery, "agent status updated");

    Ok(user)
}

fn invalid_credentials() -> AppError {
    AppError::Authentication("Invalid credentials".to_string())
}

async fn hash_password(state: &AppState, password: String) -> Result<String, AppError> {
    let hasher = state.passwords.clone();
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|err| AppError::Internal(format!("password hashing task failed: {err}")))?
}

async fn verify_password(state: &AppState, password: String, hash: String) -> Result<bool, AppError> {
    let hasher = state.passwords.clone();
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .map_err(|err| AppError::Internal(format!("password verification task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::realtime::Delivery;

    fn registration(email: &str) -> Registration {
        Registration {
            name: "Nadia Rahman".to_string(),
            email: email.to_string(),
            password: "Secret@123".to_string(),
            phone: None,
            address: Some("House 4, Road 2, Banani".to_string()),
            register_key: None,
        }
    }

    #[tokio::test]
    async fn agents_start_inactive_customers_active() {
        let state = AppState::new(Config::for_tests());
        let agent = register(&state, Role::Agent, registration("agent@example.com"))
            .await
            .unwrap();
        let customer = register(&state, Role::Customer, registration("c@example.com"))
            .await
            .unwrap();

        assert!(!agent.is_active);
        assert!(customer.is_active);
    }

    #[tokio::test]
    async fn email_is_normalized_and_unique() {
        let state = AppState::new(Config::for_tests());
        let user = register(&state, Role::Customer, registration("  Nadia@Example.COM "))
            .await
            .unwrap();
        assert_eq!(user.email, "nadia@example.com");

        let err = register(&state, Role::Customer, registration("nadia@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn weak_password_is_a_field_error() {
        let state = AppState::new(Config::for_tests());
        let request = Registration {
            password: "password".to_string(),
            ..registration("weak@example.com")
        };
        match register(&state, Role::Customer, request).await.unwrap_err() {
            AppError::Validation(errors) => assert_eq!(errors[0].field, "password"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn account_phone_must_be_ten_to_fifteen_characters() {
        let state = AppState::new(Config::for_tests());
        for phone in ["01712345", "+880 1712-345-678-9"] {
            let request = Registration {
                phone: Some(phone.to_string()),
                ..registration("short@example.com")
            };
            match register(&state, Role::Customer, request).await.unwrap_err() {
                AppError::Validation(errors) => assert_eq!(errors[0].field, "phone"),
                other => panic!("unexpected {other:?}"),
            }
        }

        let request = Registration {
            phone: Some(" 01712345678 ".to_string()),
            ..registration("ok@example.com")
        };
        let user = register(&state, Role::Customer, request).await.unwrap();
        assert_eq!(user.phone.as_deref(), Some("01712345678"));
    }

    #[tokio::test]
    async fn admin_registration_needs_the_key() {
        let state = AppState::new(Config::for_tests());
        let err = register(&state, Role::Admin, registration("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let request = Registration {
            register_key: Some("test-admin-key".to_string()),
            ..registration("a@example.com")
        };
        let admin = register(&state, Role::Admin, request).await.unwrap();
        assert_eq!(admin.role, Role::Admin);
    }

    #[tokio::test]
    async fn login_checks_the_password() {
        let state = AppState::new(Config::for_tests());
        register(&state, Role::Customer, registration("c@example.com"))
            .await
            .unwrap();

        let ok = login(
            &state,
            Credentials {
                email: "C@example.com".to_string(),
                password: "Secret@123".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(state.jwt.verify_access(&ok.1.access_token).unwrap().user_id(), ok.0.id);

        let err = login(
            &state,
            Credentials {
                email: "c@example.com".to_string(),
                password: "Secret@124".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn refresh_rejects_access_tokens() {
        let state = AppState::new(Config::for_tests());
        let user = register(&state, Role::Customer, registration("c@example.com"))
            .await
            .unwrap();
        let pair = state.jwt.issue_pair(&user).unwrap();

        assert!(refresh(&state, &pair.refresh_token).await.is_ok());
        assert!(matches!(
            refresh(&state, &pair.access_token).await.unwrap_err(),
            AppError::Authentication(_)
        ));
    }

    #[tokio::test]
    async fn activating_an_agent_notifies_their_connection() {
        let state = AppState::new(Config::for_tests());
        let agent = register(&state, Role::Agent, registration("agent@example.com"))
            .await
            .unwrap();
        let mut conn = state.dispatcher.connect();
        state.dispatcher.bind(agent.id, conn.id);

        let updated = set_agent_active(&state, agent.id, true).await.unwrap();
        assert!(updated.is_active);

        let event = conn.direct.recv().await.unwrap();
        assert_eq!(event.name(), "user:status-updated");
        assert_eq!(
            state.dispatcher.send_to_user(Uuid::new_v4(), event),
            Delivery::Fallback
        );
    }

    #[tokio::test]
    async fn status_change_needs_an_agent() {
        let state = AppState::new(Config::for_tests());
        let customer = register(&state, Role::Customer, registration("c@example.com"))
            .await
            .unwrap();

        assert!(matches!(
            set_agent_active(&state, customer.id, true).await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            set_agent_active(&state, Uuid::new_v4(), true).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
