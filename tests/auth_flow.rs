use anyhow::{anyhow, Result};
use lexauth::lexauth::{
    config::AuthConfig,
    error::ApiError,
    invitations::Acceptance,
    mailer::{EmailTemplate, RecordingMailer},
    models::{AuditAction, ClientMeta, OnboardingStep, OrganizationStatus, Role},
    password::HashingParams,
    service::{AuthContext, AuthService, AuthSession, Registration},
    store::{MemoryStore, OrganizationStore},
};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

const PASSWORD: &str = "P@ssw0rd123!";

struct Harness {
    service: AuthService,
    mailer: Arc<RecordingMailer>,
    client: ClientMeta,
}

fn config() -> AuthConfig {
    AuthConfig::new(
        "https://app.lexauth.test".to_string(),
        SecretString::from("integration-secret-integration-secret".to_string()),
    )
    .with_password_hashing(HashingParams::low_cost())
}

fn harness_with(config: AuthConfig) -> Harness {
    let mailer = Arc::new(RecordingMailer::new());
    Harness {
        service: AuthService::new(Arc::new(MemoryStore::new()), config, mailer.clone()),
        mailer,
        client: ClientMeta {
            ip: Some("198.51.100.10".to_string()),
            user_agent: Some("auth-flow-tests".to_string()),
        },
    }
}

fn harness() -> Harness {
    harness_with(config())
}

impl Harness {
    async fn register(&self, email: &str) -> Result<AuthSession> {
        Ok(self
            .service
            .register(
                Registration {
                    email: email.to_string(),
                    password: PASSWORD.to_string(),
                    first_name: Some("Ada".to_string()),
                    ..Registration::default()
                },
                &self.client,
            )
            .await?)
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ApiError> {
        self.service
            .login(email, password.to_string(), &self.client)
            .await
    }

    async fn context(&self, session: &AuthSession) -> Result<AuthContext> {
        Ok(self
            .service
            .authenticate(&session.tokens.access_token)
            .await?)
    }

    /// Invite `email` into the tenant of `owner` and accept the invitation.
    async fn add_member(&self, owner: &AuthContext, email: &str, role: Role) -> Result<AuthSession> {
        self.service
            .create_invitation(owner, email, role, &self.client)
            .await?;
        let token = self
            .mailer
            .last_token(email, EmailTemplate::Invitation)
            .ok_or_else(|| anyhow!("no invitation email for {email}"))?;
        Ok(self
            .service
            .accept_invitation(
                Acceptance {
                    token,
                    password: PASSWORD.to_string(),
                    first_name: None,
                    last_name: None,
                },
                &self.client,
            )
            .await?)
    }
}

#[tokio::test]
async fn register_then_login_issues_claims_for_user_and_tenant() -> Result<()> {
    let h = harness();
    let registered = h.register("founder@example.com").await?;

    let session = h.login("Founder@Example.com", PASSWORD).await?;
    let claims = h.service.tokens().verify(&session.tokens.access_token)?;

    assert_eq!(claims.sub, registered.user.id);
    assert_eq!(claims.tid, registered.organization.id);
    assert_eq!(claims.role, Role::OrganizationOwner);
    assert_eq!(session.tokens.expires_in, 900);
    assert!(session.user.last_login_at.is_some());
    Ok(())
}

#[tokio::test]
async fn duplicate_email_is_conflict() -> Result<()> {
    let h = harness();
    h.register("dup@example.com").await?;
    let result = h.register("DUP@example.com").await;
    let err = result.err().ok_or_else(|| anyhow!("second registration succeeded"))?;
    assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Conflict(_))));
    Ok(())
}

#[tokio::test]
async fn unknown_email_and_wrong_password_look_the_same() -> Result<()> {
    let h = harness();
    h.register("known@example.com").await?;

    let unknown = h.login("test@example.com", PASSWORD).await;
    let wrong = h.login("known@example.com", "Wr0ngPassword").await;

    for result in [unknown, wrong] {
        let err = result.err().ok_or_else(|| anyhow!("login succeeded"))?;
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(err.to_string(), "invalid credentials");
    }
    Ok(())
}

#[tokio::test]
async fn refresh_token_rotates_exactly_once() -> Result<()> {
    let h = harness();
    let session = h.register("rotate@example.com").await?;
    let original = session.tokens.refresh_token;

    let rotated = h.service.refresh(&original, &h.client).await?;
    assert_ne!(rotated.refresh_token, original);

    let replay = h.service.refresh(&original, &h.client).await;
    assert!(matches!(replay, Err(ApiError::Unauthorized)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_admits_one_winner() -> Result<()> {
    let h = harness();
    h.register("race@example.com").await?;

    let race = |token: String| {
        let service = h.service.clone();
        let client = h.client.clone();
        tokio::spawn(async move { service.refresh(&token, &client).await })
    };
    for _ in 0..10 {
        let session = h.login("race@example.com", PASSWORD).await?;
        let token = session.tokens.refresh_token;
        let (first, second) = tokio::join!(race(token.clone()), race(token));
        let winners = [first?, second?].iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1);
    }
    Ok(())
}

#[tokio::test]
async fn replaying_rotated_token_revokes_the_family() -> Result<()> {
    let h = harness();
    let session = h.register("family@example.com").await?;
    let other_device = h.login("family@example.com", PASSWORD).await?;

    let rotated = h
        .service
        .refresh(&session.tokens.refresh_token, &h.client)
        .await?;
    let _ = h
        .service
        .refresh(&session.tokens.refresh_token, &h.client)
        .await;

    for token in [rotated.refresh_token, other_device.tokens.refresh_token] {
        let result = h.service.refresh(&token, &h.client).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
    Ok(())
}

#[tokio::test]
async fn reuse_detection_can_be_disabled() -> Result<()> {
    let h = harness_with(config().with_refresh_reuse_detection(false));
    let session = h.register("lenient@example.com").await?;

    let rotated = h
        .service
        .refresh(&session.tokens.refresh_token, &h.client)
        .await?;
    let _ = h
        .service
        .refresh(&session.tokens.refresh_token, &h.client)
        .await;

    h.service.refresh(&rotated.refresh_token, &h.client).await?;
    Ok(())
}

#[tokio::test]
async fn logout_invalidates_refresh_token() -> Result<()> {
    let h = harness();
    let session = h.register("logout@example.com").await?;
    let ctx = h.context(&session).await?;

    h.service
        .logout(&ctx, &session.tokens.refresh_token, &h.client)
        .await?;
    // idempotent
    h.service
        .logout(&ctx, &session.tokens.refresh_token, &h.client)
        .await?;

    let result = h
        .service
        .refresh(&session.tokens.refresh_token, &h.client)
        .await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn logout_all_invalidates_every_device() -> Result<()> {
    let h = harness();
    let first = h.register("devices@example.com").await?;
    let mut tokens = vec![first.tokens.refresh_token.clone()];
    for _ in 0..3 {
        tokens.push(h.login("devices@example.com", PASSWORD).await?.tokens.refresh_token);
    }

    let ctx = h.context(&first).await?;
    assert_eq!(h.service.list_sessions(&ctx).await?.len(), 4);

    let revoked = h.service.logout_all(&ctx, &h.client).await?;
    assert_eq!(revoked, 4);

    for token in tokens {
        let result = h.service.refresh(&token, &h.client).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
    assert!(h.service.list_sessions(&ctx).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn revoke_session_logs_out_one_device() -> Result<()> {
    let h = harness();
    let first = h.register("one-device@example.com").await?;
    let second = h.login("one-device@example.com", PASSWORD).await?;
    let ctx = h.context(&first).await?;

    let sessions = h.service.list_sessions(&ctx).await?;
    assert_eq!(sessions.len(), 2);
    let newest = sessions[0].id;
    h.service.revoke_session(&ctx, newest, &h.client).await?;

    let remaining = h.service.list_sessions(&ctx).await?;
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id, newest);

    let refreshed_first = h.service.refresh(&first.tokens.refresh_token, &h.client).await;
    let refreshed_second = h.service.refresh(&second.tokens.refresh_token, &h.client).await;
    assert!(refreshed_first.is_ok() != refreshed_second.is_ok());
    Ok(())
}

#[tokio::test]
async fn lockout_after_threshold_until_window_passes() -> Result<()> {
    let h = harness_with(
        config()
            .with_max_failed_logins(3)
            .with_lockout(Duration::from_secs(1), Duration::from_secs(1)),
    );
    h.register("locked@example.com").await?;

    for _ in 0..3 {
        let result = h.login("locked@example.com", "Wr0ngPassword").await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    let while_locked = h.login("locked@example.com", PASSWORD).await;
    assert!(matches!(while_locked, Err(ApiError::Unauthorized)));

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let session = h.login("locked@example.com", PASSWORD).await?;
    assert_eq!(session.user.failed_login_attempts, 0);
    Ok(())
}

#[tokio::test]
async fn reset_password_token_is_single_use() -> Result<()> {
    let h = harness();
    let session = h.register("reset@example.com").await?;

    h.service.forgot_password("reset@example.com").await?;
    let token = h
        .mailer
        .last_token("reset@example.com", EmailTemplate::PasswordReset)
        .ok_or_else(|| anyhow!("no reset email"))?;

    h.service
        .reset_password(&token, "N3wPassword!".to_string(), &h.client)
        .await?;
    let second = h
        .service
        .reset_password(&token, "An0therPassword".to_string(), &h.client)
        .await;
    assert!(matches!(second, Err(ApiError::BadRequest(_))));

    // every session was revoked and only the new password works
    let refresh = h
        .service
        .refresh(&session.tokens.refresh_token, &h.client)
        .await;
    assert!(matches!(refresh, Err(ApiError::Unauthorized)));
    assert!(h.login("reset@example.com", PASSWORD).await.is_err());
    h.login("reset@example.com", "N3wPassword!").await?;
    Ok(())
}

#[tokio::test]
async fn forgot_password_for_unknown_email_is_silent() -> Result<()> {
    let h = harness();
    h.service.forgot_password("nobody@example.com").await?;
    assert!(h.mailer.messages().is_empty());
    Ok(())
}

#[tokio::test]
async fn verify_email_consumes_token() -> Result<()> {
    let h = harness();
    let session = h.register("verify@example.com").await?;
    let token = h
        .mailer
        .last_token("verify@example.com", EmailTemplate::VerifyEmail)
        .ok_or_else(|| anyhow!("no verification email"))?;

    h.service.verify_email(&token).await?;
    let again = h.service.verify_email(&token).await;
    assert!(matches!(again, Err(ApiError::BadRequest(_))));

    let ctx = h.context(&session).await?;
    let (user, _) = h.service.me(&ctx).await?;
    assert!(user.email_verified);

    // nothing to resend once verified
    let sent = h.mailer.messages().len();
    h.service.resend_verification("verify@example.com").await?;
    assert_eq!(h.mailer.messages().len(), sent);
    Ok(())
}

#[tokio::test]
async fn change_password_requires_current_password() -> Result<()> {
    let h = harness();
    let session = h.register("change@example.com").await?;
    let ctx = h.context(&session).await?;

    let wrong = h
        .service
        .change_password(&ctx, "not-it-1".to_string(), "N3wPassword!".to_string(), &h.client)
        .await;
    assert!(matches!(wrong, Err(ApiError::Unauthorized)));

    h.service
        .change_password(&ctx, PASSWORD.to_string(), "N3wPassword!".to_string(), &h.client)
        .await?;
    h.login("change@example.com", "N3wPassword!").await?;
    Ok(())
}

#[tokio::test]
async fn tenant_isolation_across_entities() -> Result<()> {
    let h = harness();
    let a = h.register("owner-a@example.com").await?;
    let b = h.register("owner-b@example.com").await?;
    let ctx_a = h.context(&a).await?;
    let ctx_b = h.context(&b).await?;

    h.add_member(&ctx_b, "lawyer-b@example.com", Role::Lawyer).await?;
    h.service
        .create_invitation(&ctx_b, "pending-b@example.com", Role::Assistant, &h.client)
        .await?;
    let case_b = h
        .service
        .create_case(&ctx_b, "B v. Somebody", None, &h.client)
        .await?;

    let members = h.service.list_members(&ctx_a).await?;
    assert!(members.iter().all(|user| user.tenant_id == ctx_a.tenant_id));
    assert_eq!(members.len(), 1);

    assert!(h.service.list_invitations(&ctx_a).await?.is_empty());
    assert!(h.service.list_cases(&ctx_a).await?.is_empty());
    assert!(h
        .service
        .list_audit(&ctx_a, None)
        .await?
        .iter()
        .all(|entry| entry.tenant_id == ctx_a.tenant_id));

    assert!(matches!(
        h.service.get_case(&ctx_a, case_b.id).await,
        Err(ApiError::NotFound)
    ));
    let foreign_member = h.service.list_members(&ctx_b).await?[0].id;
    assert!(matches!(
        h.service
            .change_member_role(&ctx_a, foreign_member, Role::Assistant, &h.client)
            .await,
        Err(ApiError::NotFound)
    ));
    Ok(())
}

#[tokio::test]
async fn invitation_flow_respects_roles_and_seats() -> Result<()> {
    let h = harness();
    let owner = h.register("firm@example.com").await?;
    let owner_ctx = h.context(&owner).await?;

    let admin = h
        .add_member(&owner_ctx, "admin@example.com", Role::OrganizationAdmin)
        .await?;
    assert_eq!(admin.user.tenant_id, owner.organization.id);
    assert!(admin.user.email_verified);
    let admin_ctx = h.context(&admin).await?;

    // admins invite ordinary roles only
    let privileged = h
        .service
        .create_invitation(&admin_ctx, "boss@example.com", Role::OrganizationOwner, &h.client)
        .await;
    assert!(matches!(privileged, Err(ApiError::Forbidden)));

    let taken = h
        .service
        .create_invitation(&admin_ctx, "firm@example.com", Role::Lawyer, &h.client)
        .await;
    assert!(matches!(taken, Err(ApiError::Conflict(_))));

    // one pending invitation per email
    h.service
        .create_invitation(&admin_ctx, "owner-elsewhere@example.com", Role::Lawyer, &h.client)
        .await?;
    let again = h
        .service
        .create_invitation(&admin_ctx, "owner-elsewhere@example.com", Role::Lawyer, &h.client)
        .await;
    assert!(matches!(again, Err(ApiError::Conflict(_))));

    // trial plan: 5 seats = owner + admin + 1 pending + 2 more
    for email in ["s1@example.com", "s2@example.com"] {
        h.service
            .create_invitation(&admin_ctx, email, Role::Assistant, &h.client)
            .await?;
    }
    let full = h
        .service
        .create_invitation(&admin_ctx, "s3@example.com", Role::Assistant, &h.client)
        .await;
    assert!(matches!(full, Err(ApiError::Conflict(_))));

    let billing = h.service.billing(&owner_ctx).await?;
    assert_eq!(billing.seats_used, 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invitations_share_the_last_seat() -> Result<()> {
    let h = harness();
    let owner = h.register("lastseat@example.com").await?;
    let owner_ctx = h.context(&owner).await?;

    // trial plan: 5 seats, the owner plus three pending leave one
    for email in ["p1@example.com", "p2@example.com", "p3@example.com"] {
        h.service
            .create_invitation(&owner_ctx, email, Role::Assistant, &h.client)
            .await?;
    }

    let invite = |email: &'static str| {
        let service = h.service.clone();
        let client = h.client.clone();
        tokio::spawn(async move {
            service
                .create_invitation(&owner_ctx, email, Role::Assistant, &client)
                .await
        })
    };
    let (first, second) = tokio::join!(invite("p4@example.com"), invite("p5@example.com"));
    let (first, second) = (first?, second?);
    assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
    assert!(matches!(
        first.and(second),
        Err(ApiError::Conflict(ref message)) if message == "seat limit reached"
    ));

    let billing = h.service.billing(&owner_ctx).await?;
    assert_eq!(billing.seats_used, 5);
    Ok(())
}

#[tokio::test]
async fn role_change_revokes_target_sessions() -> Result<()> {
    let h = harness();
    let owner = h.register("roles@example.com").await?;
    let owner_ctx = h.context(&owner).await?;
    let lawyer = h.add_member(&owner_ctx, "counsel@example.com", Role::Lawyer).await?;

    let updated = h
        .service
        .change_member_role(&owner_ctx, lawyer.user.id, Role::Assistant, &h.client)
        .await?;
    assert_eq!(updated.role, Role::Assistant);

    // the old access token carries the old role and is refused
    assert!(matches!(
        h.service.authenticate(&lawyer.tokens.access_token).await,
        Err(ApiError::Unauthorized)
    ));
    assert!(matches!(
        h.service.refresh(&lawyer.tokens.refresh_token, &h.client).await,
        Err(ApiError::Unauthorized)
    ));

    let entries = h.service.list_audit(&owner_ctx, None).await?;
    assert!(entries
        .iter()
        .any(|entry| entry.action == AuditAction::PermissionChange));
    Ok(())
}

#[tokio::test]
async fn removed_member_cannot_log_in() -> Result<()> {
    let h = harness();
    let owner = h.register("remove@example.com").await?;
    let owner_ctx = h.context(&owner).await?;
    let member = h.add_member(&owner_ctx, "leaver@example.com", Role::Accountant).await?;

    h.service
        .remove_member(&owner_ctx, member.user.id, &h.client)
        .await?;
    assert!(matches!(
        h.login("leaver@example.com", PASSWORD).await,
        Err(ApiError::Unauthorized)
    ));

    let self_removal = h
        .service
        .remove_member(&owner_ctx, owner.user.id, &h.client)
        .await;
    assert!(matches!(self_removal, Err(ApiError::Forbidden)));
    Ok(())
}

#[tokio::test]
async fn onboarding_activates_organization() -> Result<()> {
    let h = harness();
    let owner = h.register("onboard@example.com").await?;
    assert_eq!(owner.organization.status, OrganizationStatus::Provisioning);
    let ctx = h.context(&owner).await?;

    let overview = h.service.onboarding(&ctx).await?;
    assert_eq!(overview.steps.len(), OnboardingStep::ALL.len());
    assert_eq!(overview.percentage, 0);

    h.service
        .update_onboarding_step(
            &ctx,
            OnboardingStep::OrganizationDetails,
            true,
            None,
            None,
            &h.client,
        )
        .await?;
    let organization = h.service.current_organization(&ctx).await?;
    assert_eq!(organization.status, OrganizationStatus::Active);

    h.service
        .create_case(&ctx, "First matter", Some("intake"), &h.client)
        .await?;
    let overview = h.service.onboarding(&ctx).await?;
    assert!(overview
        .steps
        .iter()
        .any(|step| step.step == OnboardingStep::FirstCaseCreated && step.completed));
    assert_eq!(overview.percentage, 40);

    let invalid = h
        .service
        .update_onboarding_step(&ctx, OnboardingStep::UserProfile, false, Some(150), None, &h.client)
        .await;
    assert!(matches!(invalid, Err(ApiError::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn deleted_organization_locks_everyone_out() -> Result<()> {
    let h = harness();
    let owner = h.register("closing@example.com").await?;
    let ctx = h.context(&owner).await?;

    h.service.delete_organization(&ctx, &h.client).await?;

    assert!(matches!(
        h.service.authenticate(&owner.tokens.access_token).await,
        Err(ApiError::Unauthorized)
    ));
    assert!(matches!(
        h.login("closing@example.com", PASSWORD).await,
        Err(ApiError::Unauthorized)
    ));
    assert!(matches!(
        h.service.refresh(&owner.tokens.refresh_token, &h.client).await,
        Err(ApiError::Unauthorized)
    ));
    Ok(())
}

#[tokio::test]
async fn deleted_organization_frees_member_emails() -> Result<()> {
    let h = harness();
    let owner = h.register("closing@example.com").await?;
    let ctx = h.context(&owner).await?;
    h.add_member(&ctx, "clerk@example.com", Role::Assistant).await?;

    h.service.delete_organization(&ctx, &h.client).await?;

    let reopened = h.register("closing@example.com").await?;
    assert_ne!(reopened.organization.id, owner.organization.id);

    let reopened_ctx = h.context(&reopened).await?;
    let clerk = h
        .add_member(&reopened_ctx, "clerk@example.com", Role::Assistant)
        .await?;
    assert_eq!(clerk.user.tenant_id, reopened.organization.id);
    Ok(())
}

#[tokio::test]
async fn suspended_organization_receives_no_account_emails() -> Result<()> {
    let h = harness();
    let owner = h.register("dormant@example.com").await?;
    h.service
        .store()
        .set_organization_status(owner.organization.id, OrganizationStatus::Suspended)
        .await?;
    let sent = h.mailer.messages().len();

    h.service.forgot_password("dormant@example.com").await?;
    h.service.resend_verification("dormant@example.com").await?;

    assert_eq!(h.mailer.messages().len(), sent);
    assert!(h
        .mailer
        .last_to("dormant@example.com", EmailTemplate::PasswordReset)
        .is_none());
    Ok(())
}

#[tokio::test]
async fn malicious_input_is_forbidden() -> Result<()> {
    let h = harness();
    let result = h
        .service
        .register(
            Registration {
                email: "xss@example.com".to_string(),
                password: PASSWORD.to_string(),
                first_name: Some("<script>alert(1)</script>".to_string()),
                ..Registration::default()
            },
            &h.client,
        )
        .await;
    assert!(matches!(result, Err(ApiError::Forbidden)));
    Ok(())
}
