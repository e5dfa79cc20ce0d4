//! Authentication orchestrator: composes the token codec, the session
//! store, the identity directory, and the audit sink into the login /
//! refresh / verify / revoke operations the HTTP layer calls.
//!
//! Session lifecycle: ACTIVE --rotate--> ACTIVE (new refresh token),
//! ACTIVE --expire--> EXPIRED (detected lazily at use, triggers revoke),
//! ACTIVE --revoke--> REVOKED (terminal). There is no resurrection.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;

use crate::audit::{AuditEvent, AuditSink};
use crate::errors::AppError;
use crate::store::{DeviceInfo, SessionRecord, SessionStore};
use crate::token::{AccessClaims, TokenCodec};
use crate::users::{Identity, UserDirectory};

/// A validated login request, as produced by the HTTP layer.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// Transport-level context attached to a login: where the client called from.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Everything a client needs after login or refresh. The refresh token here
/// is the only place it ever leaves the service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTokens {
    pub token_type: &'static str,
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub session: SessionSummary,
}

/// A session as shown to its owner: secret fields stripped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

impl From<&SessionRecord> for SessionSummary {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
            expires_at: record.expires_at,
            device: record.device.clone(),
        }
    }
}

/// The identity attached to a request once its bearer token verified.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub session_id: String,
}

pub struct AuthService {
    codec: TokenCodec,
    sessions: Arc<dyn SessionStore>,
    users: Arc<UserDirectory>,
    audit: Arc<dyn AuditSink>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(
        codec: TokenCodec,
        sessions: Arc<dyn SessionStore>,
        users: Arc<UserDirectory>,
        audit: Arc<dyn AuditSink>,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Self {
        Self {
            codec,
            sessions,
            users,
            audit,
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        trace_id: Option<&str>,
        client: ClientInfo,
    ) -> Result<SignedTokens, AppError> {
        let identity = self
            .users
            .validate_credentials(&request.email, &request.password)
            .ok_or(AppError::InvalidCredentials)?;

        let device = DeviceInfo {
            device_id: request.device_id.clone(),
            device_name: request.device_name,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent,
        };
        let session = self
            .sessions
            .create(&identity.id, self.refresh_ttl, Some(device))
            .await?;

        let tokens = self.issue_tokens(&identity, &session)?;
        self.audit_event(
            "auth.login",
            Some(&identity.id),
            trace_id,
            json!({
                "sessionId": session.id,
                "deviceId": request.device_id,
                "ipAddress": client.ip_address,
            }),
        );
        Ok(tokens)
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        trace_id: Option<&str>,
    ) -> Result<SignedTokens, AppError> {
        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?
            .ok_or(AppError::InvalidRefreshToken)?;

        if session.is_expired(Utc::now()) {
            self.sessions.revoke(&session.id).await?;
            return Err(AppError::RefreshTokenExpired);
        }

        let Some(identity) = self.users.find_by_id(&session.user_id) else {
            self.sessions.revoke(&session.id).await?;
            return Err(AppError::AccountNotFound);
        };

        // Rotation-on-use: the presented token dies here. `None` means a
        // concurrent revoke won the race.
        let rotated = self
            .sessions
            .rotate(&session.id, self.refresh_ttl)
            .await?
            .ok_or(AppError::SessionNotActive)?;

        let tokens = self.issue_tokens(&identity, &rotated)?;
        self.audit_event(
            "auth.refresh",
            Some(&identity.id),
            trace_id,
            json!({ "sessionId": rotated.id }),
        );
        Ok(tokens)
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let claims = self.codec.verify(token)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(AppError::AccessTokenExpired);
        }

        let session = self
            .sessions
            .touch(&claims.session_id)
            .await?
            .ok_or(AppError::SessionNotActive)?;
        if session.user_id != claims.sub {
            // A verified token naming someone else's session: refuse without
            // revoking, so a forged token cannot destroy the owner's session.
            return Err(AppError::SessionNotActive);
        }

        let identity = self
            .users
            .find_by_id(&claims.sub)
            .ok_or(AppError::AccountNotFound)?;

        Ok(AuthenticatedUser {
            id: identity.id,
            email: identity.email,
            roles: identity.roles,
            session_id: session.id,
        })
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, AppError> {
        let sessions = self.sessions.list_by_user(user_id).await?;
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    pub async fn revoke_session(
        &self,
        user_id: &str,
        session_id: &str,
        trace_id: Option<&str>,
    ) -> Result<(), AppError> {
        // Existence is only confirmed to the owner: a foreign session id gets
        // the same answer as an unknown one.
        self.sessions
            .find_owned(user_id, session_id)
            .await?
            .ok_or(AppError::SessionNotFound)?;

        self.sessions.revoke(session_id).await?;
        self.audit_event(
            "auth.session.revoked",
            Some(user_id),
            trace_id,
            json!({ "sessionId": session_id }),
        );
        Ok(())
    }

    fn issue_tokens(
        &self,
        identity: &Identity,
        session: &SessionRecord,
    ) -> Result<SignedTokens, AppError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: identity.id.clone(),
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            session_id: session.id.clone(),
            iat: now,
            exp: now + self.access_ttl.num_seconds(),
        };
        let access_token = self.codec.issue(&claims)?;

        Ok(SignedTokens {
            token_type: "Bearer",
            access_token,
            expires_in: self.access_ttl.num_seconds(),
            refresh_token: session.refresh_token.clone(),
            session: session.into(),
        })
    }

    fn audit_event(
        &self,
        event: &str,
        user_id: Option<&str>,
        trace_id: Option<&str>,
        metadata: serde_json::Value,
    ) {
        self.audit.record(AuditEvent {
            event: event.to_string(),
            occurred_at: Utc::now(),
            user_id: user_id.map(String::from),
            trace_id: trace_id.map(String::from),
            metadata,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::memory::MemorySessionStore;

    const ACCESS_TTL: i64 = 900;
    const REFRESH_TTL: i64 = 30 * 24 * 60 * 60;

    struct Harness {
        service: AuthService,
        sessions: Arc<MemorySessionStore>,
        audit: Arc<MemoryAuditSink>,
    }

    fn harness() -> Harness {
        let sessions = Arc::new(MemorySessionStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let service = AuthService::new(
            TokenCodec::new(vec!["test-secret".into()]).unwrap(),
            sessions.clone(),
            Arc::new(UserDirectory::seeded().unwrap()),
            audit.clone(),
            ACCESS_TTL,
            REFRESH_TTL,
        );
        Harness {
            service,
            sessions,
            audit,
        }
    }

    fn learner_login() -> LoginRequest {
        LoginRequest {
            email: "learner@example.com".into(),
            password: "Learner#123".into(),
            device_id: Some("ios-uuid-123".into()),
            device_name: Some("iPhone 15 Pro".into()),
        }
    }

    #[tokio::test]
    async fn login_issues_tokens_with_expected_ttls() {
        let h = harness();
        let before = Utc::now();
        let tokens = h
            .service
            .login(learner_login(), Some("trace-1"), ClientInfo::default())
            .await
            .unwrap();

        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 900);
        assert_eq!(tokens.refresh_token.len(), 96);

        // Session expiry lands ~30 days out.
        let lifetime = tokens.session.expires_at - before;
        assert!(lifetime >= Duration::days(30) - Duration::seconds(5));
        assert!(lifetime <= Duration::days(30) + Duration::seconds(5));

        let events = h.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "auth.login");
        assert_eq!(events[0].user_id.as_deref(), Some("user-learner"));
        assert_eq!(events[0].trace_id.as_deref(), Some("trace-1"));
    }

    #[tokio::test]
    async fn login_with_wrong_password_creates_no_session() {
        let h = harness();
        let mut request = learner_login();
        request.password = "nope".into();

        let err = h
            .service
            .login(request, None, ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert!(h
            .sessions
            .list_by_user("user-learner")
            .await
            .unwrap()
            .is_empty());
        assert!(h.audit.events().is_empty());
    }

    #[tokio::test]
    async fn verify_resolves_the_authenticated_identity() {
        let h = harness();
        let tokens = h
            .service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();

        let user = h
            .service
            .verify_access_token(&tokens.access_token)
            .await
            .unwrap();
        assert_eq!(user.id, "user-learner");
        assert_eq!(user.email, "learner@example.com");
        assert_eq!(user.session_id, tokens.session.id);
    }

    #[tokio::test]
    async fn verify_fails_once_the_session_is_revoked() {
        let h = harness();
        let tokens = h
            .service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();
        h.sessions.revoke(&tokens.session.id).await.unwrap();

        let err = h
            .service
            .verify_access_token(&tokens.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotActive));
    }

    #[tokio::test]
    async fn verify_rejects_expired_access_tokens() {
        let h = harness();
        let expired_service = AuthService::new(
            TokenCodec::new(vec!["test-secret".into()]).unwrap(),
            h.sessions.clone(),
            Arc::new(UserDirectory::seeded().unwrap()),
            Arc::new(MemoryAuditSink::new()),
            -60, // already expired at issuance
            REFRESH_TTL,
        );
        let tokens = expired_service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();

        let err = h
            .service
            .verify_access_token(&tokens.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessTokenExpired));
    }

    #[tokio::test]
    async fn refresh_rotates_and_kills_the_presented_token() {
        let h = harness();
        let tokens = h
            .service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();

        let refreshed = h
            .service
            .refresh(&tokens.refresh_token, None)
            .await
            .unwrap();
        assert_eq!(refreshed.session.id, tokens.session.id);
        assert_ne!(refreshed.refresh_token, tokens.refresh_token);

        // Replaying the stale token now fails: it is no longer indexed.
        let err = h
            .service
            .refresh(&tokens.refresh_token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn refresh_with_an_expired_session_revokes_it() {
        let h = harness();
        let session = h
            .sessions
            .create("user-learner", Duration::seconds(-1), None)
            .await
            .unwrap();

        let err = h
            .service
            .refresh(&session.refresh_token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RefreshTokenExpired));

        // Revoked, not merely rejected: a retry gets "unknown token".
        let err = h
            .service
            .refresh(&session.refresh_token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn refresh_for_a_vanished_account_revokes_the_session() {
        let h = harness();
        let session = h
            .sessions
            .create("user-deleted", Duration::days(30), None)
            .await
            .unwrap();

        let err = h
            .service
            .refresh(&session.refresh_token, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccountNotFound));
        assert!(h
            .sessions
            .find_by_refresh_token(&session.refresh_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_sessions_strips_secret_fields() {
        let h = harness();
        let tokens = h
            .service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();

        let sessions = h.service.list_sessions("user-learner").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, tokens.session.id);

        let rendered = serde_json::to_string(&sessions).unwrap();
        assert!(!rendered.contains("refreshToken"));
        assert!(!rendered.contains("userId"));
    }

    #[tokio::test]
    async fn revoking_a_foreign_session_reports_not_found() {
        let h = harness();
        let tokens = h
            .service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();

        // user-admin does not own this session; existence is not confirmed.
        let err = h
            .service
            .revoke_session("user-admin", &tokens.session.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound));

        // The owner can revoke it.
        h.service
            .revoke_session("user-learner", &tokens.session.id, Some("trace-2"))
            .await
            .unwrap();
        assert!(h
            .sessions
            .list_by_user("user-learner")
            .await
            .unwrap()
            .is_empty());

        let events = h.audit.events();
        assert_eq!(events.last().unwrap().event, "auth.session.revoked");
    }

    #[tokio::test]
    async fn token_bound_to_a_foreign_session_is_rejected() {
        let h = harness();
        let learner = h
            .service
            .login(learner_login(), None, ClientInfo::default())
            .await
            .unwrap();

        // Forge claims naming the learner's session but the admin subject,
        // signed with the real secret (worst case short of key compromise).
        let codec = TokenCodec::new(vec!["test-secret".into()]).unwrap();
        let now = Utc::now().timestamp();
        let forged = codec
            .issue(&AccessClaims {
                sub: "user-admin".into(),
                email: "admin@example.com".into(),
                roles: vec!["admin".into()],
                session_id: learner.session.id.clone(),
                iat: now,
                exp: now + 900,
            })
            .unwrap();

        let err = h.service.verify_access_token(&forged).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotActive));

        // The learner's session survives the attempt.
        assert_eq!(h.service.list_sessions("user-learner").await.unwrap().len(), 1);
    }
}
