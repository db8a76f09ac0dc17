// tests/auth_and_invitations_test.rs
// C2 round-trip and the invitation-acceptance end-to-end scenario (§8.6):
// create user -> login -> session -> role listing, and a group invitation
// promoting an individual account, rejecting a second acceptance.

use relay_backend::auth::AuthService;
use relay_backend::role::RoleResolver;
use relay_backend::store::Store;

async fn new_auth_service() -> (Store, AuthService) {
    let store = Store::in_memory().await.unwrap();
    let auth = AuthService::new(store.clone(), 30);
    (store, auth)
}

#[tokio::test]
async fn signup_then_login_round_trips_through_roles() {
    let (store, auth) = new_auth_service().await;
    let resolver = RoleResolver::new(store.clone());

    let (user, _session) = auth
        .signup_individual("u@x.com", Some("U"))
        .await
        .unwrap();
    resolver.create_role(&user.id, "r1", None).await.unwrap();

    let (logged_in_user, session) = auth.login("u@x.com").await.unwrap();
    assert_eq!(logged_in_user.id, user.id);

    let (authed_user, _) = auth.authenticate(&session.id).await.unwrap().unwrap();
    assert_eq!(authed_user.id, user.id);

    let roles = resolver.list_roles(&user.id).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, "r1");
}

#[tokio::test]
async fn login_with_unknown_email_fails() {
    let (_store, auth) = new_auth_service().await;
    assert!(auth.login("nobody@x.com").await.is_err());
}

#[tokio::test]
async fn invitation_acceptance_promotes_individual_to_group() {
    let (store, auth) = new_auth_service().await;

    let (owner, _owner_session, group_id) = auth
        .signup_group("owner@x.com", Some("Owner"), "Acme", None)
        .await
        .unwrap();

    let invitation = store
        .create_invitation(
            &uuid::Uuid::new_v4().to_string(),
            "invite-code-1",
            &group_id,
            &owner.id,
            Some("member@x.com"),
            "member",
            None,
        )
        .await
        .unwrap();

    let (member, _member_session) = auth
        .signup_individual("member@x.com", None)
        .await
        .unwrap();
    assert_eq!(member.account_type, "individual");

    auth.accept_invitation(&invitation.code, &member.id)
        .await
        .unwrap();

    let promoted = store.get_user_by_email("member@x.com").await.unwrap().unwrap();
    assert_eq!(promoted.account_type, "group");
    assert!(store.is_group_member(&group_id, &member.id).await.unwrap());

    // Second acceptance of the same code is rejected.
    let err = auth.accept_invitation(&invitation.code, &member.id).await;
    assert!(err.is_err());
}
