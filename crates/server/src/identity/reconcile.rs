//! Create-or-match of remote profiles onto local user accounts.

use crate::entity::user_account;
use crate::error::{ReconcileError, StoreError};
use crate::identity::RemoteProfile;
use crate::store::{CredentialStore, NewUser, UserPatch};

/// Upper bound on insert races before giving up.
pub const MAX_RECONCILE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Found by identity key.
    Matched,
    /// Found by email and bound to the identity key for the first time.
    Linked,
    Created,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub user: user_account::Model,
    pub outcome: ReconcileOutcome,
}

#[derive(Clone, Debug)]
pub struct Reconciler {
    store: CredentialStore,
}

fn metadata(profile: &RemoteProfile) -> UserPatch {
    UserPatch {
        display_name: profile.given_name.clone(),
        surname: profile.surname.clone(),
        photo_url: profile.photo_url.clone(),
        role: None,
    }
}

impl Reconciler {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Bind `profile` to exactly one local account.
    ///
    /// Safe to call repeatedly with the same profile. Never changes approval state,
    /// role or an identity key that is already set.
    #[tracing::instrument(skip(self, profile), fields(subject = %profile.id))]
    pub async fn reconcile(&self, profile: &RemoteProfile) -> Result<Reconciled, ReconcileError> {
        for attempt in 1..=MAX_RECONCILE_ATTEMPTS {
            match self.attempt(profile).await {
                Err(ReconcileError::Store(StoreError::Conflict(detail))) => {
                    tracing::debug!(attempt, %detail, "Concurrent registration, re-querying");
                }
                other => return other,
            }
        }

        tracing::error!(
            attempts = MAX_RECONCILE_ATTEMPTS,
            "Reconciliation kept conflicting"
        );
        Err(ReconcileError::Contended(MAX_RECONCILE_ATTEMPTS))
    }

    async fn attempt(&self, profile: &RemoteProfile) -> Result<Reconciled, ReconcileError> {
        if let Some(user) = self.store.find_by_identity_key(&profile.id).await? {
            let user = self.store.apply(&user.id, metadata(profile)).await?;
            return Ok(Reconciled {
                user,
                outcome: ReconcileOutcome::Matched,
            });
        }

        if let Some(user) = self.store.find_by_email(&profile.email).await? {
            return match user.identity_key.as_deref() {
                None => {
                    if !self
                        .store
                        .link_identity(&user.id, &profile.id, metadata(profile))
                        .await?
                    {
                        // Someone linked it between our read and write; decide on the
                        // next pass with the fresh row.
                        return Err(StoreError::Conflict(format!(
                            "identity key of {} changed concurrently",
                            user.id
                        ))
                        .into());
                    }
                    let user = self
                        .store
                        .find_by_id(&user.id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(user.id.clone()))?;
                    tracing::info!(user_id = %user.id, "Linked provider identity to existing account");
                    Ok(Reconciled {
                        user,
                        outcome: ReconcileOutcome::Linked,
                    })
                }
                Some(key) if key == profile.id => {
                    // Matched by key lookup racing with us; treat as a plain match.
                    let user = self.store.apply(&user.id, metadata(profile)).await?;
                    Ok(Reconciled {
                        user,
                        outcome: ReconcileOutcome::Matched,
                    })
                }
                Some(_) => {
                    tracing::warn!(
                        user_id = %user.id,
                        "Email is bound to a different provider identity"
                    );
                    Err(ReconcileError::IdentityMismatch { email: user.email })
                }
            };
        }

        let user = self
            .store
            .insert_pending(NewUser {
                identity_key: Some(profile.id.clone()),
                email: profile.email.clone(),
                display_name: profile.given_name.clone(),
                surname: profile.surname.clone(),
                photo_url: profile.photo_url.clone(),
            })
            .await?;
        tracing::info!(user_id = %user.id, "Registered new account, awaiting approval");
        Ok(Reconciled {
            user,
            outcome: ReconcileOutcome::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::user_account::{ApprovalState, Role};
    use crate::store::tests::{new_user, setup_test_store};

    fn profile(id: &str, email: &str) -> RemoteProfile {
        RemoteProfile {
            id: id.into(),
            email: email.into(),
            given_name: Some("Ana".into()),
            surname: Some("Lopez".into()),
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn first_login_creates_pending_user() {
        let store = setup_test_store().await;
        let reconciler = Reconciler::new(store.clone());

        let first = reconciler.reconcile(&profile("abc123", "Ana@X.com")).await.unwrap();
        assert_eq!(first.outcome, ReconcileOutcome::Created);
        assert_eq!(first.user.approval_state, ApprovalState::Pending);
        assert_eq!(first.user.role, Role::User);
        assert_eq!(first.user.email, "ana@x.com");

        let second = reconciler.reconcile(&profile("abc123", "ana@x.com")).await.unwrap();
        assert_eq!(second.outcome, ReconcileOutcome::Matched);
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn relogin_refreshes_metadata_only() {
        let store = setup_test_store().await;
        let reconciler = Reconciler::new(store.clone());
        let created = reconciler.reconcile(&profile("abc123", "a@x.com")).await.unwrap();

        let admin = store
            .bootstrap_admin(new_user(Some("admin-oid"), "admin@x.com"))
            .await
            .unwrap();
        store
            .transition(&created.user.id, ApprovalState::Approved, &admin)
            .await
            .unwrap();

        let mut renamed = profile("abc123", "a@x.com");
        renamed.given_name = Some("Anabel".into());
        let again = reconciler.reconcile(&renamed).await.unwrap();

        assert_eq!(again.user.display_name.as_deref(), Some("Anabel"));
        assert_eq!(again.user.approval_state, ApprovalState::Approved);
        assert_eq!(again.user.identity_key.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn preprovisioned_email_is_linked() {
        let store = setup_test_store().await;
        let seeded = store.insert_pending(new_user(None, "a@x.com")).await.unwrap();
        let reconciler = Reconciler::new(store.clone());

        let linked = reconciler.reconcile(&profile("abc123", "A@x.com")).await.unwrap();
        assert_eq!(linked.outcome, ReconcileOutcome::Linked);
        assert_eq!(linked.user.id, seeded.id);
        assert_eq!(linked.user.identity_key.as_deref(), Some("abc123"));
        assert_eq!(linked.user.display_name.as_deref(), Some("Ana"));
        assert_eq!(linked.user.surname.as_deref(), Some("Lopez"));

        let matched = reconciler.reconcile(&profile("abc123", "a@x.com")).await.unwrap();
        assert_eq!(matched.outcome, ReconcileOutcome::Matched);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn email_bound_elsewhere_is_a_mismatch() {
        let store = setup_test_store().await;
        store
            .insert_pending(new_user(Some("original"), "a@x.com"))
            .await
            .unwrap();
        let reconciler = Reconciler::new(store.clone());

        let result = reconciler.reconcile(&profile("intruder", "a@x.com")).await;
        assert!(matches!(
            result,
            Err(ReconcileError::IdentityMismatch { ref email }) if email == "a@x.com"
        ));

        let kept = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(kept.identity_key.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn concurrent_first_logins_converge_on_one_record() {
        let store = setup_test_store().await;
        let reconciler = Reconciler::new(store.clone());

        let a = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile(&profile("abc123", "a@x.com")).await })
        };
        let b = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile(&profile("abc123", "a@x.com")).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.user.id, b.user.id);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
