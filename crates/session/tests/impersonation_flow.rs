use std::sync::Arc;
use std::time::Duration;

use classroom_auth::{AccessQuery, MembershipEntry, MembershipField, Permission, Role, TokenPolicy, UserRecord, permissions};
use classroom_session::{
    Fault, ImpersonationManager, InMemoryAuthService, RemoteError, SessionContext, SessionError,
};

fn record(id: &str, roles: &[&str]) -> UserRecord {
    UserRecord {
        roles: roles.iter().map(|r| r.to_string()).collect(),
        display_name: Some(format!("User {id}")),
        ..UserRecord::new(id)
    }
}

fn directory() -> Arc<InMemoryAuthService> {
    let mut ta = record("ta1", &[]);
    ta.class_memberships = Some(MembershipField::List(vec![MembershipEntry::new("bmi101", "ta")]));
    Arc::new(InMemoryAuthService::new(TokenPolicy::default()).with_users([
        record("admin", &["admin"]),
        record("admin2", &["admin"]),
        record("inst", &["instructor"]),
        record("s1", &["student"]),
        record("s2", &["student"]),
        ta,
    ]))
}

async fn signed_in(service: &Arc<InMemoryAuthService>, id: &str) -> ImpersonationManager<InMemoryAuthService> {
    let credential = service.login(id).unwrap();
    ImpersonationManager::establish(service.clone(), credential).await.unwrap()
}

fn snapshot(manager: &ImpersonationManager<InMemoryAuthService>) -> SessionContext {
    manager.session().context()
}

#[tokio::test]
async fn start_then_stop_switches_active_subject() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let session = manager.session().clone();

    let acting = manager.start_impersonation("s1").await.unwrap();
    assert_eq!(acting.id, "s1");
    assert_eq!(session.active_subject().id, "s1");
    assert_eq!(session.true_identity().id, "admin");
    assert!(session.is_impersonating());

    let restored = manager.stop_impersonation().await.unwrap();
    assert_eq!(restored.id, "admin");
    assert_eq!(session.active_subject().id, "admin");
    assert!(!session.is_impersonating());
}

#[tokio::test]
async fn access_follows_the_impersonated_subject() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let session = manager.session();
    let manage = AccessQuery::permission(Permission::from_static(permissions::STUDENT_MANAGE));

    assert!(session.can_access(&manage));
    manager.start_impersonation("s1").await.unwrap();
    assert!(!session.can_access(&manage));
    assert!(!session.can_access(&AccessQuery::role(Role::Admin)));
    manager.stop_impersonation().await.unwrap();
    assert!(session.can_access(&manage));
}

#[tokio::test]
async fn non_admin_start_is_forbidden_and_changes_nothing() {
    let service = directory();
    for id in ["inst", "s1", "ta1"] {
        let manager = signed_in(&service, id).await;
        let before = snapshot(&manager);
        let credential = manager.session().credential();

        let err = manager.start_impersonation("s2").await.unwrap_err();

        assert_eq!(err, SessionError::Forbidden, "caller {id}");
        assert_eq!(snapshot(&manager), before);
        assert_eq!(manager.session().credential(), credential);
    }
    assert_eq!(service.exchange_count(), 0);
}

#[tokio::test]
async fn second_start_is_rejected_and_first_impersonation_remains() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    manager.start_impersonation("s1").await.unwrap();

    let err = manager.start_impersonation("s2").await.unwrap_err();

    assert_eq!(err, SessionError::AlreadyImpersonating);
    assert_eq!(manager.session().active_subject().id, "s1");
}

#[tokio::test]
async fn impersonating_an_admin_does_not_allow_chaining() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    manager.start_impersonation("admin2").await.unwrap();

    let err = manager.start_impersonation("s1").await.unwrap_err();
    assert_eq!(err, SessionError::AlreadyImpersonating);
    assert_eq!(manager.session().active_subject().id, "admin2");
}

#[tokio::test]
async fn stop_without_impersonation_never_mutates() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let before = snapshot(&manager);

    assert_eq!(manager.stop_impersonation().await.unwrap_err(), SessionError::NotImpersonating);
    assert_eq!(manager.stop_impersonation().await.unwrap_err(), SessionError::NotImpersonating);
    assert_eq!(snapshot(&manager), before);
}

#[tokio::test]
async fn unknown_target_is_not_found() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let before = snapshot(&manager);

    let err = manager.start_impersonation("ghost").await.unwrap_err();

    assert_eq!(err, SessionError::NotFound("ghost".to_string()));
    assert_eq!(snapshot(&manager), before);
}

#[tokio::test]
async fn self_and_empty_targets_are_invalid() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;

    assert!(matches!(
        manager.start_impersonation("admin").await,
        Err(SessionError::InvalidTarget(_))
    ));
    assert!(matches!(
        manager.start_impersonation("  ").await,
        Err(SessionError::InvalidTarget(_))
    ));
    assert_eq!(service.exchange_count(), 0);
}

#[tokio::test]
async fn failed_exchange_leaves_state_untouched() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let epoch = manager.session().epoch();
    let credential = manager.session().credential();

    service.inject(Fault::Fail(RemoteError::Unavailable("timeout".to_string())));
    let err = manager.start_impersonation("s1").await.unwrap_err();

    assert_eq!(err, SessionError::Exchange(RemoteError::Unavailable("timeout".to_string())));
    assert!(!manager.session().is_impersonating());
    assert_eq!(manager.session().credential(), credential);
    assert_eq!(manager.session().epoch(), epoch);
    assert!(!manager.is_in_flight());

    manager.start_impersonation("s1").await.unwrap();
    let before = snapshot(&manager);
    service.inject(Fault::Fail(RemoteError::Unavailable("timeout".to_string())));
    assert!(manager.stop_impersonation().await.is_err());
    assert_eq!(snapshot(&manager), before);
}

#[tokio::test]
async fn mismatched_grant_forces_reauthentication() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;

    service.inject(Fault::MisreportActive(record("s2", &["student"])));
    let err = manager.start_impersonation("s1").await.unwrap_err();

    assert!(matches!(err, SessionError::InconsistentState(_)));
    assert!(err.requires_reauthentication());
    let session = manager.session();
    assert!(session.requires_reauthentication());
    assert!(session.credential().is_none());
    assert!(!session.can_access(&AccessQuery::authenticated()));
    // Nothing further is attempted on a revoked session.
    assert!(matches!(
        manager.start_impersonation("s1").await,
        Err(SessionError::InconsistentState(_))
    ));
}

#[tokio::test]
async fn grant_without_original_user_forces_reauthentication() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;

    service.inject(Fault::DropOriginal);
    let err = manager.start_impersonation("s1").await.unwrap_err();

    assert!(matches!(err, SessionError::InconsistentState(_)));
    assert!(manager.session().requires_reauthentication());
}

#[tokio::test]
async fn stop_after_original_user_was_deleted_revokes_session() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    manager.start_impersonation("s1").await.unwrap();

    service.remove_user("admin");
    let err = manager.stop_impersonation().await.unwrap_err();

    assert!(matches!(err, SessionError::InconsistentState(_)));
    assert!(manager.session().requires_reauthentication());
    assert!(!manager.session().can_access(&AccessQuery::authenticated()));
}

#[tokio::test]
async fn stop_restores_current_roles_of_true_identity() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    manager.start_impersonation("s1").await.unwrap();

    // Roles changed on the server while impersonating.
    service.upsert_user(record("admin", &["admin", "instructor"]));
    let restored = manager.stop_impersonation().await.unwrap();

    assert!(restored.global_roles.contains(&Role::Instructor));
    assert!(manager.session().true_identity().global_roles.contains(&Role::Instructor));
}

#[tokio::test]
async fn concurrent_transition_is_rejected_while_in_flight() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    service.set_latency(Some(Duration::from_millis(50)));

    let (first, second) = tokio::join!(manager.start_impersonation("s1"), async {
        tokio::task::yield_now().await;
        assert!(manager.is_in_flight());
        manager.stop_impersonation().await
    });

    assert_eq!(first.unwrap().id, "s1");
    assert_eq!(second.unwrap_err(), SessionError::OperationInFlight);
    assert!(!manager.is_in_flight());
    assert_eq!(manager.session().active_subject().id, "s1");
}

#[tokio::test]
async fn subscribers_are_notified_on_each_transition() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let mut changes = manager.session().subscribe();

    manager.start_impersonation("s1").await.unwrap();
    assert!(changes.has_changed().unwrap());
    assert_eq!(*changes.borrow_and_update(), 1);

    manager.stop_impersonation().await.unwrap();
    assert_eq!(*changes.borrow_and_update(), 2);
}

#[tokio::test]
async fn establishing_from_an_impersonation_credential_resumes_it() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    manager.start_impersonation("ta1").await.unwrap();
    let credential = manager.session().credential().unwrap();

    let resumed = ImpersonationManager::establish(service.clone(), credential).await.unwrap();
    let status = resumed.session().status();

    assert!(status.identity.is_impersonating);
    assert_eq!(status.identity.acting_as.id, "ta1");
    assert_eq!(status.identity.signed_in_as.id, "admin");
    assert!(status.identity.started_at.is_some());
    assert!(status.identity.expires_at.is_some());
    assert!(!status.requires_reauthentication);
    assert!(resumed.session().can_access(&AccessQuery::role(Role::Ta)));
}

#[tokio::test]
async fn refresh_picks_up_role_changes() {
    let service = directory();
    let manager = signed_in(&service, "inst").await;
    assert!(!manager.session().can_access(&AccessQuery::role(Role::Admin)));

    service.upsert_user(record("inst", &["admin"]));
    manager.refresh().await.unwrap();

    assert!(manager.session().can_access(&AccessQuery::role(Role::Admin)));
}

#[tokio::test]
async fn candidates_exclude_the_signed_in_admin() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let ids: Vec<String> = manager
        .impersonation_candidates()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id.into_inner())
        .collect();

    assert!(!ids.contains(&"admin".to_string()));
    assert!(ids.contains(&"s1".to_string()));

    let student = signed_in(&service, "s1").await;
    assert_eq!(student.impersonation_candidates().await.unwrap_err(), SessionError::Forbidden);
}

#[tokio::test]
async fn logout_denies_outstanding_handles() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    let session = manager.session().clone();

    manager.logout();

    assert!(session.requires_reauthentication());
    assert!(!session.can_access(&AccessQuery::authenticated()));
}

#[tokio::test]
async fn stop_rejected_as_not_impersonating_by_the_service_revokes_session() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;
    manager.start_impersonation("s1").await.unwrap();

    service.inject(Fault::Fail(RemoteError::NotImpersonating));
    let err = manager.stop_impersonation().await.unwrap_err();

    assert!(matches!(err, SessionError::InconsistentState(_)));
    assert!(err.requires_reauthentication());
    assert!(manager.session().requires_reauthentication());
    assert!(manager.session().credential().is_none());
    assert!(!manager.session().can_access(&AccessQuery::authenticated()));
}

#[tokio::test]
async fn start_rejected_as_already_impersonating_by_the_service_revokes_session() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;

    service.inject(Fault::Fail(RemoteError::AlreadyImpersonating));
    let err = manager.start_impersonation("s1").await.unwrap_err();

    assert!(matches!(err, SessionError::InconsistentState(_)));
    assert!(manager.session().requires_reauthentication());
    assert!(!manager.session().can_access(&AccessQuery::authenticated()));
}

#[tokio::test]
async fn grant_ids_are_compared_after_trimming() {
    let service = directory();
    let manager = signed_in(&service, "admin").await;

    service.inject(Fault::MisreportActive(record(" s1 ", &["student"])));
    let acting = manager.start_impersonation("s1").await.unwrap();

    assert_eq!(acting.id, "s1");
    assert!(manager.session().is_impersonating());
    assert!(!manager.session().requires_reauthentication());
}
